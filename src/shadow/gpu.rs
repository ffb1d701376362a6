//! GPU shadow tracing using wgpu compute shaders
//!
//! Runs the same ray march as [`super::march_ray`] with one invocation per
//! cell. The kernel also classifies the cell into its band colour, so the
//! device hands back a finished RGBA image together with the raw occlusion
//! flags.

use std::borrow::Cow;
use std::path::Path;

use bytemuck::{Pod, Zeroable};
use image::RgbaImage;
use wgpu::util::DeviceExt;

use super::{ShadowMap, Shading, ShadowTracer, SunState, TraceSettings};
use crate::bands::{BandTable, ColorBuffer};
use crate::error::TerrainError;
use crate::heightmap::HeightField;
use crate::tilemap::Tilemap;

/// Cells per workgroup along each axis.
pub const WORKGROUP_SIZE: u32 = 8;

/// Workgroups needed along one axis to cover `size` cells.
pub fn workgroup_count(size: usize) -> u32 {
    (size as u32).div_ceil(WORKGROUP_SIZE)
}

/// A WGSL compute program and the entry point to dispatch.
///
/// The program must use the bind layout of [`SHADOW_SHADER`]: heights,
/// bands, params, image, occlusion at bindings 0 to 4 of group 0, with an
/// 8x8 workgroup.
#[derive(Clone, Debug, PartialEq)]
pub struct ComputeProgram {
    label: String,
    source: String,
    entry_point: String,
}

impl ComputeProgram {
    pub fn new(label: impl Into<String>, source: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            source: source.into(),
            entry_point: entry_point.into(),
        }
    }

    /// The shader shipped with the crate.
    pub fn builtin() -> Self {
        Self::new("builtin shadow shader", SHADOW_SHADER, "main")
    }

    pub fn from_file(path: impl AsRef<Path>, entry_point: impl Into<String>) -> Result<Self, TerrainError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| TerrainError::ReadProgram {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(path.display().to_string(), source, entry_point))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

/// Parameters passed to the compute shader
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct GpuShadowParams {
    size: u32,
    band_count: u32,
    ray_steps: u32,
    brightness: f32,
    sun_x: f32,
    sun_y: f32,
    sun_z: f32,
    step_length: f32,
}

/// Band layout matching the WGSL `Band` struct (32-byte stride).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct GpuBand {
    color: [f32; 4],
    threshold: f32,
    _pad: [f32; 3],
}

/// Buffers read back from one dispatch.
struct Readback {
    pixels: Vec<u32>,
    occlusion: Vec<u32>,
}

/// Shadow tracer running on a wgpu compute pipeline.
pub struct ParallelTracer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    settings: TraceSettings,
    adapter_name: String,
}

impl ParallelTracer {
    /// Acquire a GPU and compile `program`.
    ///
    /// Fails with [`TerrainError::AcceleratorUnavailable`] when no adapter
    /// exists and with [`TerrainError::Accelerator`] when the program does not
    /// validate.
    pub fn new(program: &ComputeProgram, settings: TraceSettings) -> Result<Self, TerrainError> {
        pollster::block_on(Self::new_async(program, settings))
    }

    async fn new_async(program: &ComputeProgram, settings: TraceSettings) -> Result<Self, TerrainError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
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
            .ok_or(TerrainError::AcceleratorUnavailable)?;

        let adapter_name = adapter.get_info().name;
        tracing::info!(adapter = %adapter_name, "GPU adapter selected");

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Shadow GPU"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| TerrainError::Accelerator(format!("device request failed: {e}")))?;

        // Catch shader and pipeline validation errors instead of panicking.
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(program.label()),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(program.source())),
        });

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Shadow Bind Group Layout"),
            entries: &[
                // Heights
                storage(0, true),
                // Band table
                storage(1, true),
                // Parameters
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Packed RGBA8 output
                storage(3, false),
                // Occlusion flags
                storage(4, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Shadow Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Shadow Compute Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some(program.entry_point()),
            compilation_options: Default::default(),
            cache: None,
        });

        if let Some(err) = device.pop_error_scope().await {
            return Err(TerrainError::Accelerator(format!(
                "compute program '{}' rejected: {err}",
                program.label()
            )));
        }

        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            settings,
            adapter_name,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn dispatch(&self, heights: &HeightField, bands: &BandTable, sun: &SunState) -> Result<Readback, TerrainError> {
        if heights.width != heights.height {
            return Err(TerrainError::Accelerator(format!(
                "height field must be square, got {}x{}",
                heights.width, heights.height
            )));
        }
        if heights.is_empty() {
            return Err(TerrainError::Accelerator("height field is empty".to_string()));
        }
        let size = heights.width;
        let cells = heights.len();
        let byte_len = (cells * std::mem::size_of::<u32>()) as u64;

        let gpu_bands: Vec<GpuBand> = bands
            .bands()
            .iter()
            .map(|b| GpuBand {
                color: [b.color.r, b.color.g, b.color.b, b.color.a],
                threshold: b.height,
                _pad: [0.0; 3],
            })
            .collect();

        let [sun_x, sun_y, sun_z] = sun.position_3d;
        let gpu_params = GpuShadowParams {
            size: size as u32,
            band_count: gpu_bands.len() as u32,
            ray_steps: self.settings.ray_steps,
            brightness: self.settings.brightness_coef,
            sun_x,
            sun_y,
            sun_z,
            step_length: self.settings.step_length,
        };

        let heights_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Heights Buffer"),
            contents: bytemuck::cast_slice(heights.as_slice()),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let bands_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Bands Buffer"),
            contents: bytemuck::cast_slice(&gpu_bands),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let params_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Params Buffer"),
            contents: bytemuck::bytes_of(&gpu_params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let output_buffer = |label: &str| {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: byte_len,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        };
        let image_buffer = output_buffer("Image Buffer");
        let occlusion_buffer = output_buffer("Occlusion Buffer");

        let staging_buffer = |label: &str| {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: byte_len,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let image_staging = staging_buffer("Image Staging Buffer");
        let occlusion_staging = staging_buffer("Occlusion Staging Buffer");

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Shadow Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: heights_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: bands_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: image_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: occlusion_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Shadow Encoder"),
        });

        let groups = workgroup_count(size);
        tracing::debug!(size, groups, "dispatching shadow kernel");
        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Shadow Pass"),
                timestamp_writes: None,
            });

            compute_pass.set_pipeline(&self.pipeline);
            compute_pass.set_bind_group(0, &bind_group, &[]);
            compute_pass.dispatch_workgroups(groups, groups, 1);
        }

        encoder.copy_buffer_to_buffer(&image_buffer, 0, &image_staging, 0, byte_len);
        encoder.copy_buffer_to_buffer(&occlusion_buffer, 0, &occlusion_staging, 0, byte_len);
        self.queue.submit(std::iter::once(encoder.finish()));

        Ok(Readback {
            pixels: self.read_buffer(&image_staging)?,
            occlusion: self.read_buffer(&occlusion_staging)?,
        })
    }

    /// Map a staging buffer and block until its contents are on the host.
    fn read_buffer(&self, staging: &wgpu::Buffer) -> Result<Vec<u32>, TerrainError> {
        let buffer_slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        receiver
            .recv()
            .map_err(|e| TerrainError::Accelerator(format!("readback channel closed: {e}")))?
            .map_err(|e| TerrainError::Accelerator(format!("buffer map failed: {e}")))?;

        let data = buffer_slice.get_mapped_range();
        let result: Vec<u32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging.unmap();
        Ok(result)
    }
}

impl ShadowTracer for ParallelTracer {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn trace(&self, heights: &HeightField, sun: &SunState) -> Result<ShadowMap, TerrainError> {
        // The kernel always classifies; a single placeholder band keeps the
        // band buffer non-empty when only occlusion is wanted.
        let bands = placeholder_bands()?;
        let readback = self.dispatch(heights, &bands, sun)?;
        occlusion_map(heights, readback.occlusion, self.settings.brightness_coef)
    }

    fn shade(
        &self,
        heights: &HeightField,
        bands: &BandTable,
        _colors: &mut ColorBuffer,
        sun: &SunState,
    ) -> Result<Shading, TerrainError> {
        let readback = self.dispatch(heights, bands, sun)?;
        let bytes: Vec<u8> = readback.pixels.iter().flat_map(|p| p.to_le_bytes()).collect();
        let image = RgbaImage::from_raw(heights.width as u32, heights.height as u32, bytes)
            .ok_or_else(|| TerrainError::Accelerator("image readback has the wrong length".to_string()))?;
        let shadows = occlusion_map(heights, readback.occlusion, self.settings.brightness_coef)?;
        Ok(Shading { shadows, image: Some(image) })
    }
}

fn placeholder_bands() -> Result<BandTable, TerrainError> {
    use crate::bands::{Color, TerrainBand};
    Ok(BandTable::new(vec![TerrainBand::new("all", 0.0, Color::rgb(1.0, 1.0, 1.0))])?)
}

fn occlusion_map(heights: &HeightField, flags: Vec<u32>, brightness_coef: f32) -> Result<ShadowMap, TerrainError> {
    let occluded: Vec<bool> = flags.into_iter().map(|f| f != 0).collect();
    let occluded = Tilemap::from_vec(heights.width, heights.height, occluded)
        .ok_or_else(|| TerrainError::Accelerator("occlusion readback has the wrong length".to_string()))?;
    Ok(ShadowMap::new(occluded, brightness_coef))
}

/// WGSL compute shader for band classification and shadow ray marching
pub const SHADOW_SHADER: &str = r#"
struct Params {
    size: u32,
    band_count: u32,
    ray_steps: u32,
    brightness: f32,
    sun_x: f32,
    sun_y: f32,
    sun_z: f32,
    step_length: f32,
}

struct Band {
    color: vec4<f32>,
    threshold: f32,
}

@group(0) @binding(0) var<storage, read> heights: array<f32>;
@group(0) @binding(1) var<storage, read> bands: array<Band>;
@group(0) @binding(2) var<uniform> params: Params;
@group(0) @binding(3) var<storage, read_write> image: array<u32>;
@group(0) @binding(4) var<storage, read_write> occlusion: array<u32>;

fn in_bounds(x: i32, z: i32) -> bool {
    let s = i32(params.size);
    return x >= 0 && z >= 0 && x < s && z < s;
}

fn height_at(x: i32, z: i32) -> f32 {
    return heights[u32(z) * params.size + u32(x)];
}

// Last band whose threshold does not exceed h. Bands are sorted ascending.
fn band_color(h: f32) -> vec4<f32> {
    var color = vec4<f32>(0.0, 0.0, 0.0, 0.0);
    for (var i = 0u; i < params.band_count; i++) {
        if (h >= bands[i].threshold) {
            color = bands[i].color;
        } else {
            break;
        }
    }
    return color;
}

// Mirrors march_ray on the host: floor sampling, out of bounds is lit.
fn is_occluded(x: u32, z: u32) -> bool {
    let origin_x = f32(x);
    let origin_y = height_at(i32(x), i32(z));
    let origin_z = f32(z);

    let dx = params.sun_x - origin_x;
    let dy = params.sun_y - origin_y;
    let dz = params.sun_z - origin_z;
    let len = sqrt(dx * dx + dy * dy + dz * dz);
    if (len <= 1.1920929e-7) {
        return false;
    }
    let step_x = dx / len * params.step_length;
    let step_y = dy / len * params.step_length;
    let step_z = dz / len * params.step_length;

    for (var i = 1u; i <= params.ray_steps; i++) {
        let t = f32(i);
        let px = origin_x + step_x * t;
        let py = origin_y + step_y * t;
        let pz = origin_z + step_z * t;

        let cx = i32(floor(px));
        let cz = i32(floor(pz));
        if (!in_bounds(cx, cz)) {
            return false;
        }
        if (py < height_at(cx, cz)) {
            return true;
        }
    }
    return false;
}

@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    if (global_id.x >= params.size || global_id.y >= params.size) {
        return;
    }
    let idx = global_id.y * params.size + global_id.x;

    var color = band_color(heights[idx]);
    if (is_occluded(global_id.x, global_id.y)) {
        color = vec4<f32>(color.rgb * params.brightness, color.a);
        occlusion[idx] = 1u;
    } else {
        occlusion[idx] = 0u;
    }
    image[idx] = pack4x8unorm(color);
}
"#;
