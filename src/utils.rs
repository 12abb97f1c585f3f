use glam::Vec3;

// AABB utilities
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AABB {
    pub min: Vec3,
    pub max: Vec3,
}

impl AABB {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Smallest box around all points, or `None` for an empty iterator.
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Vec3>,
    {
        let mut iter = points.into_iter();
        let first = *iter.next()?;
        Some(iter.fold(Self::new(first, first), |bounds, &p| Self {
            min: bounds.min.min(p),
            max: bounds.max.max(p),
        }))
    }

    /// Slab test. Returns the entry distance along `direction` (0 when starting inside).
    pub fn ray_intersects(&self, origin: Vec3, direction: Vec3, max_dist: f32) -> Option<f32> {
        let inv_dir = direction.recip();

        let t1 = (self.min - origin) * inv_dir;
        let t2 = (self.max - origin) * inv_dir;

        let tmin = t1.min(t2).max_element();
        let tmax = t1.max(t2).min_element();

        if tmax < 0.0 || tmin > tmax || tmin > max_dist {
            None
        } else {
            Some(tmin.max(0.0))
        }
    }
}

/// Moller-Trumbore ray/triangle test. Returns the hit distance along `direction`.
pub fn ray_triangle(origin: Vec3, direction: Vec3, triangle: &[Vec3; 3]) -> Option<f32> {
    const EPSILON: f32 = 1e-7;

    let edge1 = triangle[1] - triangle[0];
    let edge2 = triangle[2] - triangle[0];
    let p = direction.cross(edge2);
    let det = edge1.dot(p);
    if det.abs() < EPSILON {
        return None;
    }

    let inv_det = 1.0 / det;
    let s = origin - triangle[0];
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let v = direction.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = edge2.dot(q) * inv_det;
    (t >= 0.0).then_some(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_points() {
        let points = [Vec3::new(1.0, -2.0, 0.5), Vec3::new(-1.0, 3.0, 0.0), Vec3::ZERO];
        let bounds = AABB::from_points(&points).unwrap();
        assert_eq!(bounds.min, Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(bounds.max, Vec3::new(1.0, 3.0, 0.5));
        assert!(AABB::from_points(&[]).is_none());
    }

    #[test]
    fn test_ray_hits_box() {
        let bounds = AABB::new(Vec3::NEG_ONE, Vec3::ONE);
        let hit = bounds.ray_intersects(Vec3::new(-5.0, 0.0, 0.0), Vec3::X, 100.0);
        assert_eq!(hit, Some(4.0));
        assert!(bounds.ray_intersects(Vec3::new(-5.0, 3.0, 0.0), Vec3::X, 100.0).is_none());
        assert!(bounds.ray_intersects(Vec3::new(-5.0, 0.0, 0.0), Vec3::X, 3.0).is_none());
        assert_eq!(bounds.ray_intersects(Vec3::ZERO, Vec3::Y, 1.0), Some(0.0));
    }

    #[test]
    fn test_ray_triangle() {
        let tri = [Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0)];
        let hit = ray_triangle(Vec3::new(0.25, 0.25, 2.0), Vec3::NEG_Z, &tri);
        assert!((hit.unwrap() - 2.0).abs() < 1e-6);
        assert!(ray_triangle(Vec3::new(0.9, 0.9, 2.0), Vec3::NEG_Z, &tri).is_none());
        assert!(ray_triangle(Vec3::new(0.25, 0.25, 2.0), Vec3::Z, &tri).is_none());
    }
}
