// Compute shaders used by the GPU extraction strategy

// One invocation per cell. Corner and edge ordering must stay in sync with
// `voxel::tables`, otherwise the table lookups select the wrong edges.
pub const MARCHING_CUBES_SHADER: &str = r#"
struct Params {
    size_x: u32,
    size_y: u32,
    size_z: u32,
    iso_level: f32,
    scale: f32,
    offset_x: u32,
    offset_y: u32,
    offset_z: u32,
};

struct Triangle {
    a: vec4<f32>,
    b: vec4<f32>,
    c: vec4<f32>,
};

@group(0) @binding(0)
var<storage, read> densities: array<f32>;

@group(0) @binding(1)
var<uniform> params: Params;

@group(0) @binding(2)
var<storage, read> tri_table: array<i32>;

@group(0) @binding(3)
var<storage, read_write> triangle_count: atomic<u32>;

@group(0) @binding(4)
var<storage, read_write> triangles: array<Triangle>;

var<private> CORNERS: array<vec3<u32>, 8> = array<vec3<u32>, 8>(
    vec3<u32>(0u, 0u, 0u),
    vec3<u32>(1u, 0u, 0u),
    vec3<u32>(1u, 0u, 1u),
    vec3<u32>(0u, 0u, 1u),
    vec3<u32>(0u, 1u, 0u),
    vec3<u32>(1u, 1u, 0u),
    vec3<u32>(1u, 1u, 1u),
    vec3<u32>(0u, 1u, 1u),
);

var<private> EDGES: array<vec2<u32>, 12> = array<vec2<u32>, 12>(
    vec2<u32>(0u, 1u),
    vec2<u32>(1u, 2u),
    vec2<u32>(3u, 2u),
    vec2<u32>(0u, 3u),
    vec2<u32>(4u, 5u),
    vec2<u32>(5u, 6u),
    vec2<u32>(7u, 6u),
    vec2<u32>(4u, 7u),
    vec2<u32>(0u, 4u),
    vec2<u32>(1u, 5u),
    vec2<u32>(2u, 6u),
    vec2<u32>(3u, 7u),
);

fn density_at(p: vec3<u32>) -> f32 {
    return densities[p.x + params.size_x * (p.y + params.size_y * p.z)];
}

@compute @workgroup_size(4, 4, 4)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x >= params.size_x - 1u || id.y >= params.size_y - 1u || id.z >= params.size_z - 1u) {
        return;
    }

    var values: array<f32, 8>;
    var config: u32 = 0u;
    for (var i: u32 = 0u; i < 8u; i = i + 1u) {
        let v = density_at(id + CORNERS[i]);
        values[i] = v;
        if (v >= params.iso_level) {
            config = config | (1u << i);
        }
    }

    let base = config * 16u;
    let capacity = arrayLength(&triangles);
    let cell = id + vec3<u32>(params.offset_x, params.offset_y, params.offset_z);

    for (var k: u32 = 0u; k < 15u; k = k + 3u) {
        if (tri_table[base + k] < 0) {
            break;
        }

        var corners: array<vec4<f32>, 3>;
        for (var j: u32 = 0u; j < 3u; j = j + 1u) {
            let edge = EDGES[u32(tri_table[base + k + j])];
            let a = values[edge.x];
            let b = values[edge.y];
            var t: f32 = 0.5;
            if (a != b) {
                t = (params.iso_level - a) / (b - a);
            }
            let pa = vec3<f32>(cell + CORNERS[edge.x]) * params.scale;
            let pb = vec3<f32>(cell + CORNERS[edge.y]) * params.scale;
            corners[j] = vec4<f32>(pa + (pb - pa) * t, 1.0);
        }

        let slot = atomicAdd(&triangle_count, 1u);
        if (slot < capacity) {
            triangles[slot] = Triangle(corners[0], corners[1], corners[2]);
        }
    }
}
"#;
