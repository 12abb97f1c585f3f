use glam::Vec3;
use hashbrown::HashMap;

use crate::request::MaterialHandle;
use crate::physics::CollisionShape;

// Vertex data for mesh rendering, laid out for direct upload
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    pub fn normal(&self) -> Vec3 {
        Vec3::from_array(self.normal)
    }
}

/// Indexed triangle mesh with smooth normals.
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an indexed mesh from a triangle list, translating every vertex by
    /// `translation`.
    ///
    /// Coincident positions are welded so normals are shared across triangles.
    /// Triangles that collapse to a line or a point after welding are dropped.
    pub fn from_triangles(soup: &[Vec3], translation: Vec3) -> Self {
        let mut mesh = Self::new();
        let mut lookup: HashMap<[u32; 3], u32> = HashMap::with_capacity(soup.len() / 2);
        let mut positions: Vec<Vec3> = Vec::with_capacity(soup.len() / 2);

        for triangle in soup.chunks_exact(3) {
            let mut ids = [0u32; 3];
            for (slot, &corner) in ids.iter_mut().zip(triangle) {
                let position = corner + translation;
                // adding zero folds -0.0 into 0.0 so both hash alike
                let key = [
                    (position.x + 0.0).to_bits(),
                    (position.y + 0.0).to_bits(),
                    (position.z + 0.0).to_bits(),
                ];
                *slot = *lookup.entry(key).or_insert_with(|| {
                    positions.push(position);
                    (positions.len() - 1) as u32
                });
            }

            if ids[0] != ids[1] && ids[1] != ids[2] && ids[0] != ids[2] {
                mesh.indices.extend_from_slice(&ids);
            }
        }

        let mut normals = vec![Vec3::ZERO; positions.len()];
        for tri in mesh.indices.chunks_exact(3) {
            let [a, b, c] = [positions[tri[0] as usize], positions[tri[1] as usize], positions[tri[2] as usize]];
            // area weighted
            let face = (b - a).cross(c - a);
            for &i in tri {
                normals[i as usize] += face;
            }
        }

        mesh.vertices = positions
            .into_iter()
            .zip(normals)
            .map(|(p, n)| Vertex::new(p, n.normalize_or_zero()))
            .collect();
        mesh
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        self.indices.chunks_exact(3).map(move |tri| {
            [
                self.vertices[tri[0] as usize].position(),
                self.vertices[tri[1] as usize].position(),
                self.vertices[tri[2] as usize].position(),
            ]
        })
    }

    /// Smallest and largest distance of any vertex from `origin`.
    pub fn height_range(&self, origin: Vec3) -> Option<(f32, f32)> {
        self.vertices.iter().fold(None, |range, v| {
            let h = v.position().distance(origin);
            Some(match range {
                None => (h, h),
                Some((lo, hi)) => (lo.min(h), hi.max(h)),
            })
        })
    }

    /// Number of edges used by exactly one triangle. Zero for a closed surface.
    pub fn open_edge_count(&self) -> usize {
        let mut edges: HashMap<(u32, u32), u32> = HashMap::new();
        for tri in self.indices.chunks_exact(3) {
            for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
                *edges.entry((a.min(b), a.max(b))).or_insert(0) += 1;
            }
        }
        edges.values().filter(|&&uses| uses == 1).count()
    }
}

/// Finished meshing result for one chunk, ready to attach to the scene.
pub struct ChunkMesh {
    pub mesh: MeshData,
    pub collision: CollisionShape,
    pub material: Option<MaterialHandle>,
    pub min_height: f32,
    pub max_height: f32,
    pub chunk_center: Vec3,
}

impl std::fmt::Debug for ChunkMesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkMesh")
            .field("triangles", &self.mesh.triangle_count())
            .field("min_height", &self.min_height)
            .field("max_height", &self.max_height)
            .field("chunk_center", &self.chunk_center)
            .field("has_material", &self.material.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> Vec<Vec3> {
        vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ]
    }

    #[test]
    fn test_welds_shared_corners() {
        let mesh = MeshData::from_triangles(&quad(), Vec3::ZERO);
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.triangle_count(), 2);
        for v in &mesh.vertices {
            assert!((v.normal() - Vec3::Z).length() < 1e-6);
        }
        assert_eq!(mesh.open_edge_count(), 4);
    }

    #[test]
    fn test_translation_and_heights() {
        let mesh = MeshData::from_triangles(&quad(), Vec3::new(0.0, 0.0, 3.0));
        let (lo, hi) = mesh.height_range(Vec3::ZERO).unwrap();
        assert!((lo - 3.0).abs() < 1e-6);
        assert!((hi - 11.0f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_drops_collapsed_triangles() {
        let soup = vec![Vec3::ZERO, Vec3::ZERO, Vec3::X, Vec3::ZERO, Vec3::X, Vec3::Y];
        let mesh = MeshData::from_triangles(&soup, Vec3::ZERO);
        assert_eq!(mesh.triangle_count(), 1);
    }

    #[test]
    fn test_empty_soup() {
        let mesh = MeshData::from_triangles(&[], Vec3::ONE);
        assert!(mesh.is_empty());
        assert!(mesh.height_range(Vec3::ZERO).is_none());
    }
}
