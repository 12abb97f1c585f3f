//! Compute-shader marching cubes.
//!
//! The grid is cut into sub-chunks of `batch_size` samples per axis that
//! share one lattice layer with their neighbours, so every cell is marched
//! exactly once. Each sub-chunk gets its own density, parameter, counter and
//! output buffers for the duration of one dispatch. The device, pipeline and
//! triangulation table live as long as the extractor and sit behind a mutex
//! because dispatches from several workers must not interleave.

use glam::Vec3;
use log::{debug, info};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use wgpu::util::DeviceExt;

use super::shaders::MARCHING_CUBES_SHADER;
use crate::error::{Result, TerrainError};
use crate::voxel::grid::ScalarGrid;
use crate::voxel::tables::{self, MAX_TRIANGLES_PER_CELL};

/// Invocations per work-group axis; must match `@workgroup_size` in the shader.
const WORKGROUP_SIZE: u32 = 4;
/// Floats per triangle in the output buffer: three `vec4` corners.
const TRIANGLE_FLOATS: usize = 12;
const TRIANGLE_BYTES: u64 = (TRIANGLE_FLOATS * std::mem::size_of::<f32>()) as u64;

pub const DEFAULT_BATCH_SIZE: u32 = 32;
pub const MAX_BATCH_SIZE: u32 = 64;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct BatchParams {
    size_x: u32,
    size_y: u32,
    size_z: u32,
    iso_level: f32,
    scale: f32,
    offset_x: u32,
    offset_y: u32,
    offset_z: u32,
}

struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    tri_table: wgpu::Buffer,
}

pub struct GpuExtractor {
    context: OnceCell<Mutex<GpuContext>>,
    batch_size: u32,
}

impl GpuExtractor {
    /// Creates the extractor and initializes the device right away, so a
    /// missing adapter is reported here rather than on the first request.
    pub fn new(batch_size: u32) -> Result<Self> {
        if !(2..=MAX_BATCH_SIZE).contains(&batch_size) {
            return Err(TerrainError::Config(format!(
                "GPU batch size must be within 2..={}, got {}",
                MAX_BATCH_SIZE, batch_size
            )));
        }

        let extractor = Self {
            context: OnceCell::new(),
            batch_size,
        };
        extractor.context()?;
        Ok(extractor)
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    fn context(&self) -> Result<&Mutex<GpuContext>> {
        self.context
            .get_or_try_init(|| pollster::block_on(GpuContext::create()).map(Mutex::new))
    }

    pub fn generate(&self, grid: &ScalarGrid, iso_level: f32, scale: f32) -> Result<Vec<Vec3>> {
        if !grid.has_cells() {
            return Ok(Vec::new());
        }

        let context = self.context()?.lock();
        let [nx, ny, nz] = grid.dims();
        let batch = self.batch_size as usize;
        let step = batch - 1;
        let mut vertices = Vec::new();

        for z0 in (0..nz - 1).step_by(step) {
            for y0 in (0..ny - 1).step_by(step) {
                for x0 in (0..nx - 1).step_by(step) {
                    let dims = [batch.min(nx - x0), batch.min(ny - y0), batch.min(nz - z0)];
                    let sub = grid.sub_grid([x0, y0, z0], dims)?;
                    context.dispatch(&sub, [x0 as u32, y0 as u32, z0 as u32], iso_level, scale, &mut vertices)?;
                }
            }
        }

        Ok(vertices)
    }
}

impl Drop for GpuExtractor {
    fn drop(&mut self) {
        if let Some(context) = self.context.get_mut() {
            context.get_mut().tri_table.destroy();
            debug!("GPU extractor released");
        }
    }
}

impl GpuContext {
    async fn create() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(TerrainError::GpuUnavailable)?;
        info!("GPU extractor using adapter: {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Marching Cubes Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| TerrainError::GpuDevice(e.to_string()))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Marching Cubes Shader"),
            source: wgpu::ShaderSource::Wgsl(MARCHING_CUBES_SHADER.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Marching Cubes Bind Group Layout"),
            entries: &[
                layout_entry(0, wgpu::BufferBindingType::Storage { read_only: true }),
                layout_entry(1, wgpu::BufferBindingType::Uniform),
                layout_entry(2, wgpu::BufferBindingType::Storage { read_only: true }),
                layout_entry(3, wgpu::BufferBindingType::Storage { read_only: false }),
                layout_entry(4, wgpu::BufferBindingType::Storage { read_only: false }),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Marching Cubes Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Marching Cubes Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        let tri_table = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Triangulation Table Buffer"),
            contents: bytemuck::cast_slice(&tables::flattened_tri_table()),
            usage: wgpu::BufferUsages::STORAGE,
        });

        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            tri_table,
        })
    }

    /// Marches one sub-chunk whose minimum corner sits at `offset` in the full grid.
    fn dispatch(
        &self,
        sub: &ScalarGrid,
        offset: [u32; 3],
        iso_level: f32,
        scale: f32,
        out: &mut Vec<Vec3>,
    ) -> Result<()> {
        let [bx, by, bz] = sub.dims();
        let cells = (bx - 1) * (by - 1) * (bz - 1);
        let capacity = (cells * MAX_TRIANGLES_PER_CELL) as u64;

        let params = BatchParams {
            size_x: bx as u32,
            size_y: by as u32,
            size_z: bz as u32,
            iso_level,
            scale,
            offset_x: offset[0],
            offset_y: offset[1],
            offset_z: offset[2],
        };

        let density_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Density Buffer"),
            contents: bytemuck::cast_slice(sub.as_slice()),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let params_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Batch Params Buffer"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let counter_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Triangle Counter Buffer"),
            contents: bytemuck::bytes_of(&0u32),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        });
        let triangle_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Triangle Buffer"),
            size: capacity * TRIANGLE_BYTES,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let counter_staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Triangle Counter Staging"),
            size: std::mem::size_of::<u32>() as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Marching Cubes Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: density_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: params_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: self.tri_table.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: counter_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: triangle_buffer.as_entire_binding() },
            ],
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Marching Cubes Encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Marching Cubes Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                workgroups(bx - 1),
                workgroups(by - 1),
                workgroups(bz - 1),
            );
        }
        encoder.copy_buffer_to_buffer(&counter_buffer, 0, &counter_staging, 0, counter_staging.size());
        self.queue.submit(Some(encoder.finish()));

        let reported = read_staging::<u32>(&self.device, &counter_staging, 1)?
            .first()
            .copied()
            .unwrap_or(0) as u64;
        let count = reported.min(capacity);

        if count > 0 {
            let triangle_staging = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Triangle Staging"),
                size: count * TRIANGLE_BYTES,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });

            let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Triangle Readback Encoder"),
            });
            encoder.copy_buffer_to_buffer(&triangle_buffer, 0, &triangle_staging, 0, count * TRIANGLE_BYTES);
            self.queue.submit(Some(encoder.finish()));

            let floats = read_staging::<f32>(&self.device, &triangle_staging, count as usize * TRIANGLE_FLOATS)?;
            decode_triangles(&floats, out);
        }

        Ok(())
    }
}

fn layout_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn workgroups(cells: usize) -> u32 {
    (cells as u32).div_ceil(WORKGROUP_SIZE)
}

/// Maps a staging buffer and copies out its first `count` elements.
fn read_staging<T: bytemuck::Pod>(device: &wgpu::Device, staging: &wgpu::Buffer, count: usize) -> Result<Vec<T>> {
    let slice = staging.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device.poll(wgpu::Maintain::Wait);

    pollster::block_on(receiver)
        .map_err(|e| TerrainError::GpuMapping(format!("channel closed: {}", e)))?
        .map_err(|e| TerrainError::GpuMapping(format!("{:?}", e)))?;

    let mapped = slice.get_mapped_range();
    let data: &[T] = bytemuck::cast_slice(&mapped);
    let result = data[..count.min(data.len())].to_vec();
    drop(mapped);
    staging.unmap();

    Ok(result)
}

/// Converts padded `vec4` corners back into a flat vertex list.
fn decode_triangles(floats: &[f32], out: &mut Vec<Vec3>) {
    out.reserve(floats.len() / TRIANGLE_FLOATS * 3);
    for triangle in floats.chunks_exact(TRIANGLE_FLOATS) {
        for corner in triangle.chunks_exact(4) {
            out.push(Vec3::new(corner[0], corner[1], corner[2]));
        }
    }
}
