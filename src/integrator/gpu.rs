//! GPU compute integration backend.
//!
//! Integration runs as a two-stage parallel reduction so no kernel ever
//! needs cross-workgroup synchronization: Stage A computes one weighted
//! partial sum per workgroup into an intermediate buffer, Stage B gathers
//! a vertex's partials into its final irradiance. Stage B is deferred
//! until a configured number of Stage-A batches are pending, or until the
//! pass's last batch forces a flush.

use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use wgpu::util::DeviceExt;

use crate::atlas::{AtlasLayout, RadianceAtlas};
use crate::error::{RadiosityError, Result};
use crate::integrator::RadianceIntegrator;
use crate::scene::AtlasSource;
use crate::weights::WeightTable;

/// Workgroup size of the Stage-A reduction kernel.
const STAGE_A_WORKGROUP: u32 = 128;
/// Texels accumulated per Stage-A thread before the shared-memory reduce.
const TEXELS_PER_THREAD: u32 = 2;
/// Workgroup size of the Stage-B and accumulate kernels.
const STAGE_B_WORKGROUP: u32 = 64;

/// Device and queue shared by every GPU integration dispatch.
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl GpuContext {
    /// Acquire any compute-capable adapter.
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::new_async())
    }

    async fn new_async() -> Result<Self> {
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
            .ok_or_else(|| {
                RadiosityError::InitializationFailed("no compute-capable adapter found".to_string())
            })?;

        let info = adapter.get_info();
        log::info!(
            "radiosity GPU backend using adapter: {} ({:?})",
            info.name,
            info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Radiosity Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| RadiosityError::InitializationFailed(e.to_string()))?;

        Ok(Self { device, queue })
    }

    /// Block until all queued GPU work has completed. The readback paths
    /// go through here; it is the pipeline's only blocking point.
    pub fn wait_idle(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

/// Deferred Stage-B trigger: flush after `threshold` pending Stage-A
/// batches, or whenever the pass's last batch arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushState {
    pending: u32,
    threshold: u32,
}

impl FlushState {
    pub fn new(threshold: u32) -> Self {
        Self {
            pending: 0,
            threshold: threshold.max(1),
        }
    }

    /// Number of Stage-A batches recorded since the last flush.
    pub fn pending(&self) -> u32 {
        self.pending
    }

    pub fn record_batch(&mut self) {
        self.pending += 1;
    }

    pub fn should_flush(&self, last_batch: bool) -> bool {
        self.pending >= self.threshold || (last_batch && self.pending > 0)
    }

    pub fn reset(&mut self) {
        self.pending = 0;
    }
}

/// Per-dispatch parameters, mirrored by the WGSL `GiParams` struct.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct GiParams {
    /// First vertex of the pending Stage-B window.
    first_vertex: u32,
    /// Index of the current Stage-A batch within the window.
    batch_in_window: u32,
    /// Total vertices in the scene (bounds check for accumulate).
    vertex_count: u32,
    /// Vertices covered by the pending Stage-B window.
    window_vertices: u32,
    vertex_weight: f32,
    _pad: [u32; 3],
}

/// GPU backend of the radiance integrator.
pub struct GpuIntegrator {
    ctx: GpuContext,
    face_size: u32,
    batch_size: u32,
    groups_per_vertex: u32,

    stage_a_pipeline: wgpu::ComputePipeline,
    stage_b_pipeline: wgpu::ComputePipeline,
    accumulate_pipeline: wgpu::ComputePipeline,
    stage_a_layout: wgpu::BindGroupLayout,
    stage_b_layout: wgpu::BindGroupLayout,
    accumulate_layout: wgpu::BindGroupLayout,

    params_a: wgpu::Buffer,
    params_b: wgpu::Buffer,
    params_acc: wgpu::Buffer,
    weights_buffer: Option<wgpu::Buffer>,
    atlas_texture: Option<(wgpu::Texture, wgpu::TextureView, u32, u32)>,

    partials: Option<wgpu::Buffer>,
    this_pass: Option<[wgpu::Buffer; 2]>,
    running_total: Option<[wgpu::Buffer; 2]>,
    vertex_count: usize,

    flush: FlushState,
    window_first_vertex: u32,
    window_vertices: u32,
}

impl GpuIntegrator {
    /// Create the integrator and build its compute pipelines.
    ///
    /// `batch_size * stage_b_interval` bounds the Stage-B dispatch extent
    /// and must not exceed the device's maximum workgroups per dispatch
    /// dimension; violating it is a configuration error, never a runtime
    /// fallback.
    pub fn new(
        ctx: GpuContext,
        face_size: u32,
        batch_size: u32,
        stage_b_interval: u32,
    ) -> Result<Self> {
        if face_size < 4 || !face_size.is_power_of_two() {
            return Err(RadiosityError::InvalidParameter(format!(
                "hemicube face size must be a power of two >= 4, got {face_size}"
            )));
        }
        let batch_size = batch_size.max(1);
        let stage_b_interval = stage_b_interval.max(1);

        let max_dim = ctx.device.limits().max_compute_workgroups_per_dimension;
        let window = batch_size as u64 * stage_b_interval as u64;
        if window > max_dim as u64 {
            return Err(RadiosityError::ConfigurationUnsupported(format!(
                "batch size {batch_size} x stage-B interval {stage_b_interval} exceeds the \
                 device's maximum dispatch dimension of {max_dim}"
            )));
        }

        // One hemicube has F^2 front texels plus four half faces: 3*F^2.
        let weighted_texels = 3 * face_size * face_size;
        let groups_per_vertex =
            weighted_texels.div_ceil(STAGE_A_WORKGROUP * TEXELS_PER_THREAD).max(1);

        let device = &ctx.device;
        let stage_a_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Radiosity Stage A Layout"),
            entries: &[
                uniform_entry(0),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                storage_entry(2, true),
                storage_entry(3, false),
            ],
        });
        let stage_b_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Radiosity Stage B Layout"),
            entries: &[uniform_entry(0), storage_entry(4, true), storage_entry(5, false)],
        });
        let accumulate_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Radiosity Accumulate Layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(6, true),
                storage_entry(7, true),
                storage_entry(8, false),
            ],
        });

        let shader_src = integration_shader_source(face_size, batch_size, groups_per_vertex);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Radiosity Integration Shaders"),
            source: wgpu::ShaderSource::Wgsl(shader_src.into()),
        });

        let make_pipeline = |label: &str, layout: &wgpu::BindGroupLayout, entry: &str| {
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: None,
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: entry,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            })
        };
        let stage_a_pipeline =
            make_pipeline("Radiosity Stage A", &stage_a_layout, "integrate_partial");
        let stage_b_pipeline = make_pipeline("Radiosity Stage B", &stage_b_layout, "reduce_vertex");
        let accumulate_pipeline =
            make_pipeline("Radiosity Accumulate", &accumulate_layout, "accumulate");

        let make_params = |label: &str| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: std::mem::size_of::<GiParams>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let params_a = make_params("Radiosity Params A");
        let params_b = make_params("Radiosity Params B");
        let params_acc = make_params("Radiosity Params Accumulate");

        Ok(Self {
            ctx,
            face_size,
            batch_size,
            groups_per_vertex,
            stage_a_pipeline,
            stage_b_pipeline,
            accumulate_pipeline,
            stage_a_layout,
            stage_b_layout,
            accumulate_layout,
            params_a,
            params_b,
            params_acc,
            weights_buffer: None,
            atlas_texture: None,
            partials: None,
            this_pass: None,
            running_total: None,
            vertex_count: 0,
            flush: FlushState::new(stage_b_interval),
            window_first_vertex: 0,
            window_vertices: 0,
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    fn vertex_buffer(&self, label: &str, vertex_count: usize) -> wgpu::Buffer {
        self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (vertex_count * 16) as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Upload the weight tables once per face size: front table followed
    /// by the side table, matching the WGSL indexing.
    fn ensure_weights(&mut self, weights: &WeightTable) -> Result<()> {
        if weights.face_size() != self.face_size {
            return Err(RadiosityError::InvalidParameter(format!(
                "weight table face size {} does not match integrator face size {}",
                weights.face_size(),
                self.face_size
            )));
        }
        if self.weights_buffer.is_none() {
            let mut data = Vec::with_capacity(weights.front_raw().len() * 2);
            data.extend_from_slice(weights.front_raw());
            data.extend_from_slice(weights.side_raw());
            self.weights_buffer = Some(self.ctx.device.create_buffer_init(
                &wgpu::util::BufferInitDescriptor {
                    label: Some("Radiosity Weights"),
                    contents: bytemuck::cast_slice(&data),
                    usage: wgpu::BufferUsages::STORAGE,
                },
            ));
        }
        Ok(())
    }

    /// Upload CPU atlas samples into the internal texture, recreating it
    /// when the layout's dimensions change.
    fn upload_atlas(&mut self, samples: &RadianceAtlas, layout: &AtlasLayout) {
        let (width, height) = (layout.width(), layout.height());
        let recreate = !matches!(
            &self.atlas_texture,
            Some((_, _, w, h)) if *w == width && *h == height
        );
        if recreate {
            let texture = self.ctx.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Radiosity Atlas Upload"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba32Float,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            self.atlas_texture = Some((texture, view, width, height));
        }
        let (texture, ..) = self.atlas_texture.as_ref().unwrap();
        self.ctx.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            samples.as_bytes(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * 16),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn write_params(&self, buffer: &wgpu::Buffer, params: GiParams) {
        self.ctx
            .queue
            .write_buffer(buffer, 0, bytemuck::bytes_of(&params));
    }

    /// Copy a per-vertex buffer back to the CPU through a staging buffer.
    fn read_back(&self, source: &wgpu::Buffer) -> Result<Vec<Vec4>> {
        let size = (self.vertex_count * 16) as u64;
        let staging = self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Radiosity Readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Radiosity Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
        self.ctx.queue.submit([encoder.finish()]);

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.ctx.wait_idle();
        rx.recv()
            .map_err(|_| RadiosityError::ReadbackFailed("map_async channel closed".to_string()))?
            .map_err(|e| RadiosityError::ReadbackFailed(e.to_string()))?;

        let data = slice.get_mapped_range();
        let values: Vec<Vec4> = bytemuck::cast_slice::<u8, [f32; 4]>(&data)
            .iter()
            .map(|&v| Vec4::from_array(v))
            .collect();
        drop(data);
        staging.unmap();
        Ok(values)
    }

    fn buffers(&self) -> Result<(&[wgpu::Buffer; 2], &[wgpu::Buffer; 2], &wgpu::Buffer)> {
        match (&self.this_pass, &self.running_total, &self.partials) {
            (Some(tp), Some(rt), Some(p)) => Ok((tp, rt, p)),
            _ => Err(RadiosityError::InvalidParameter(
                "integrate called before begin_scene".to_string(),
            )),
        }
    }
}

impl RadianceIntegrator for GpuIntegrator {
    fn begin_scene(&mut self, vertex_count: usize) -> Result<()> {
        if vertex_count == 0 {
            return Err(RadiosityError::InvalidParameter(
                "cannot integrate a scene with zero vertices".to_string(),
            ));
        }

        // Fresh buffers every bake: vertex counts change between scenes.
        // wgpu zero-initializes on creation.
        self.this_pass = Some([
            self.vertex_buffer("Radiosity This Pass 0", vertex_count),
            self.vertex_buffer("Radiosity This Pass 1", vertex_count),
        ]);
        self.running_total = Some([
            self.vertex_buffer("Radiosity Running Total 0", vertex_count),
            self.vertex_buffer("Radiosity Running Total 1", vertex_count),
        ]);

        let window = self.batch_size as u64 * self.flush.threshold as u64;
        let partial_size = window * self.groups_per_vertex as u64 * 16;
        self.partials = Some(self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Radiosity Partial Sums"),
            size: partial_size,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        }));

        self.vertex_count = vertex_count;
        self.flush.reset();
        self.window_first_vertex = 0;
        self.window_vertices = 0;
        Ok(())
    }

    fn integrate_batch(
        &mut self,
        atlas: &AtlasSource<'_>,
        weights: &WeightTable,
        layout: &AtlasLayout,
        first_vertex: usize,
        count: usize,
        pass: u32,
        last_batch: bool,
    ) -> Result<()> {
        if count == 0 || count > self.batch_size as usize {
            return Err(RadiosityError::InvalidParameter(format!(
                "batch of {count} vertices outside 1..={}",
                self.batch_size
            )));
        }
        if first_vertex + count > self.vertex_count {
            return Err(RadiosityError::InvalidParameter(format!(
                "batch {first_vertex}..{} exceeds scene vertex count {}",
                first_vertex + count,
                self.vertex_count
            )));
        }
        self.ensure_weights(weights)?;

        if self.flush.pending() == 0 {
            self.window_first_vertex = first_vertex as u32;
            self.window_vertices = 0;
        }
        let params = GiParams {
            first_vertex: self.window_first_vertex,
            batch_in_window: self.flush.pending(),
            vertex_count: self.vertex_count as u32,
            window_vertices: 0,
            vertex_weight: weights.vertex_weight(),
            _pad: [0; 3],
        };
        self.write_params(&self.params_a, params);

        if let AtlasSource::Cpu(samples) = atlas {
            self.upload_atlas(samples, layout);
        }
        let view = match atlas {
            AtlasSource::Gpu(view) => *view,
            AtlasSource::Cpu(_) => &self.atlas_texture.as_ref().unwrap().1,
        };

        // Field-level borrows: the flush bookkeeping below mutates
        // disjoint fields while these stay alive.
        let not_started = || {
            RadiosityError::InvalidParameter("integrate called before begin_scene".to_string())
        };
        let this_pass = self.this_pass.as_ref().ok_or_else(not_started)?;
        let partials = self.partials.as_ref().ok_or_else(not_started)?;
        let weights_buffer = self.weights_buffer.as_ref().ok_or_else(not_started)?;

        let stage_a_bind = self.ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Radiosity Stage A Bind"),
            layout: &self.stage_a_layout,
            entries: &[
                bind_buffer(0, &self.params_a),
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                bind_buffer(2, weights_buffer),
                bind_buffer(3, partials),
            ],
        });

        let mut encoder =
            self.ctx
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Radiosity Integration Encoder"),
                });
        {
            let mut pass_enc = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Radiosity Stage A"),
                timestamp_writes: None,
            });
            pass_enc.set_pipeline(&self.stage_a_pipeline);
            pass_enc.set_bind_group(0, &stage_a_bind, &[]);
            pass_enc.dispatch_workgroups(self.groups_per_vertex, count as u32, 1);
        }

        self.flush.record_batch();
        self.window_vertices += count as u32;

        // Stage B flush: pending window filled, or nothing more coming in
        // this pass. Submission order on the single queue guarantees the
        // Stage-A partials are complete before Stage B reads them.
        if self.flush.should_flush(last_batch) {
            let params_b = GiParams {
                first_vertex: self.window_first_vertex,
                batch_in_window: 0,
                vertex_count: self.vertex_count as u32,
                window_vertices: self.window_vertices,
                vertex_weight: weights.vertex_weight(),
                _pad: [0; 3],
            };
            self.write_params(&self.params_b, params_b);

            let output = &this_pass[(pass % 2) as usize];
            let stage_b_bind = self.ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Radiosity Stage B Bind"),
                layout: &self.stage_b_layout,
                entries: &[
                    bind_buffer(0, &self.params_b),
                    bind_buffer(4, partials),
                    bind_buffer(5, output),
                ],
            });
            {
                let mut pass_enc = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Radiosity Stage B"),
                    timestamp_writes: None,
                });
                pass_enc.set_pipeline(&self.stage_b_pipeline);
                pass_enc.set_bind_group(0, &stage_b_bind, &[]);
                pass_enc.dispatch_workgroups(
                    self.window_vertices.div_ceil(STAGE_B_WORKGROUP),
                    1,
                    1,
                );
            }
            self.flush.reset();
            self.window_vertices = 0;
        }

        self.ctx.queue.submit([encoder.finish()]);
        Ok(())
    }

    fn finish_pass(&mut self, pass: u32, first_executed_pass: bool) -> Result<()> {
        let (this_pass, running_total, _) = self.buffers()?;
        let current = (pass % 2) as usize;
        let previous = ((pass + 1) % 2) as usize;
        let size = (self.vertex_count * 16) as u64;

        let mut encoder =
            self.ctx
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Radiosity Accumulate Encoder"),
                });

        if first_executed_pass {
            // First executed pass: the running total is the pass verbatim.
            encoder.copy_buffer_to_buffer(&this_pass[current], 0, &running_total[current], 0, size);
        } else {
            let params = GiParams {
                first_vertex: 0,
                batch_in_window: 0,
                vertex_count: self.vertex_count as u32,
                window_vertices: 0,
                vertex_weight: 0.0,
                _pad: [0; 3],
            };
            self.write_params(&self.params_acc, params);

            let bind = self.ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Radiosity Accumulate Bind"),
                layout: &self.accumulate_layout,
                entries: &[
                    bind_buffer(0, &self.params_acc),
                    bind_buffer(6, &running_total[previous]),
                    bind_buffer(7, &this_pass[current]),
                    bind_buffer(8, &running_total[current]),
                ],
            });
            {
                let mut pass_enc = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Radiosity Accumulate"),
                    timestamp_writes: None,
                });
                pass_enc.set_pipeline(&self.accumulate_pipeline);
                pass_enc.set_bind_group(0, &bind, &[]);
                pass_enc.dispatch_workgroups(
                    (self.vertex_count as u32).div_ceil(STAGE_B_WORKGROUP),
                    1,
                    1,
                );
            }
        }

        self.ctx.queue.submit([encoder.finish()]);
        Ok(())
    }

    fn pass_irradiance(&mut self, pass: u32) -> Result<Vec<Vec4>> {
        let (this_pass, _, _) = self.buffers()?;
        self.read_back(&this_pass[(pass % 2) as usize])
    }

    fn final_irradiance(&mut self, pass: u32) -> Result<Vec<Vec4>> {
        let (_, running_total, _) = self.buffers()?;
        self.read_back(&running_total[(pass % 2) as usize])
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bind_buffer(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

/// Assemble the WGSL source with the integrator's constants baked in.
fn integration_shader_source(face_size: u32, batch_size: u32, groups_per_vertex: u32) -> String {
    let mut src = String::new();
    src.push_str(&format!("const FACE_SIZE: u32 = {face_size}u;\n"));
    src.push_str(&format!("const BATCH_SIZE: u32 = {batch_size}u;\n"));
    src.push_str(&format!(
        "const GROUPS_PER_VERTEX: u32 = {groups_per_vertex}u;\n"
    ));
    src.push_str(&format!("const WG_SIZE: u32 = {STAGE_A_WORKGROUP}u;\n"));
    src.push_str(&format!(
        "const TEXELS_PER_THREAD: u32 = {TEXELS_PER_THREAD}u;\n"
    ));
    src.push_str(&format!("const WG_SIZE_B: u32 = {STAGE_B_WORKGROUP}u;\n"));
    src.push_str(INTEGRATION_SHADER_BODY);
    src
}

const INTEGRATION_SHADER_BODY: &str = r#"
struct GiParams {
    first_vertex: u32,
    batch_in_window: u32,
    vertex_count: u32,
    window_vertices: u32,
    vertex_weight: f32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

@group(0) @binding(0) var<uniform> params: GiParams;

// Stage A bindings.
@group(0) @binding(1) var radiance: texture_2d<f32>;
@group(0) @binding(2) var<storage, read> weights: array<f32>;
@group(0) @binding(3) var<storage, read_write> partials_out: array<vec4<f32>>;

var<workgroup> shared_sums: array<vec4<f32>, WG_SIZE>;

// Weighted texels per hemicube: the full front face plus four half faces.
fn total_texels() -> u32 {
    return 3u * FACE_SIZE * FACE_SIZE;
}

// Linear weighted-texel index -> (face, row, col). Enumeration order is
// front face first, then the active half of each side face; it mirrors
// the CPU integration loop exactly.
fn decode_texel(t: u32) -> vec3<u32> {
    let ff = FACE_SIZE * FACE_SIZE;
    let half = ff / 2u;
    let hw = FACE_SIZE / 2u;
    if t < ff {
        return vec3<u32>(0u, t / FACE_SIZE, t % FACE_SIZE);
    }
    let s = t - ff;
    let face = 1u + s / half;
    let r = s % half;
    if face == 1u {
        return vec3<u32>(1u, r / hw, r % hw);
    }
    if face == 2u {
        return vec3<u32>(2u, r / hw, hw + r % hw);
    }
    if face == 3u {
        return vec3<u32>(3u, hw + r / FACE_SIZE, r % FACE_SIZE);
    }
    return vec3<u32>(4u, r / FACE_SIZE, r % FACE_SIZE);
}

// Weight lookup: front table then side table, with the bitangent faces'
// index swap (their outward axis runs along v).
fn texel_weight(face: u32, row: u32, col: u32) -> f32 {
    let ff = FACE_SIZE * FACE_SIZE;
    if face == 0u {
        return weights[row * FACE_SIZE + col];
    }
    if face <= 2u {
        return weights[ff + row * FACE_SIZE + col];
    }
    return weights[ff + col * FACE_SIZE + row];
}

const FACES_PER_VERTEX: u32 = 5u;

@compute @workgroup_size(WG_SIZE, 1, 1)
fn integrate_partial(
    @builtin(workgroup_id) wg: vec3<u32>,
    @builtin(local_invocation_id) local: vec3<u32>,
) {
    let slot = wg.y;
    let group = wg.x;
    let faces_per_row = textureDimensions(radiance).x / FACE_SIZE;

    var sum = vec4<f32>(0.0);
    for (var i = 0u; i < TEXELS_PER_THREAD; i = i + 1u) {
        let t = (group * WG_SIZE + local.x) * TEXELS_PER_THREAD + i;
        if t >= total_texels() {
            continue;
        }
        let d = decode_texel(t);
        let cell = slot * FACES_PER_VERTEX + d.x;
        let origin = vec2<u32>(
            (cell % faces_per_row) * FACE_SIZE,
            (cell / faces_per_row) * FACE_SIZE,
        );
        let texel = textureLoad(radiance, origin + vec2<u32>(d.z, d.y), 0);
        sum += vec4<f32>(texel.rgb, 0.0) * texel_weight(d.x, d.y, d.z);
    }
    shared_sums[local.x] = sum;
    workgroupBarrier();

    var stride = WG_SIZE / 2u;
    while stride > 0u {
        if local.x < stride {
            shared_sums[local.x] += shared_sums[local.x + stride];
        }
        workgroupBarrier();
        stride = stride / 2u;
    }

    if local.x == 0u {
        let record = (params.batch_in_window * BATCH_SIZE + slot) * GROUPS_PER_VERTEX + group;
        partials_out[record] = shared_sums[0];
    }
}

// Stage B bindings.
@group(0) @binding(4) var<storage, read> partials_in: array<vec4<f32>>;
@group(0) @binding(5) var<storage, read_write> pass_irradiance: array<vec4<f32>>;

@compute @workgroup_size(WG_SIZE_B, 1, 1)
fn reduce_vertex(@builtin(global_invocation_id) gid: vec3<u32>) {
    let idx = gid.x;
    if idx >= params.window_vertices {
        return;
    }
    var sum = vec4<f32>(0.0);
    for (var g = 0u; g < GROUPS_PER_VERTEX; g = g + 1u) {
        sum += partials_in[idx * GROUPS_PER_VERTEX + g];
    }
    pass_irradiance[params.first_vertex + idx] = sum * params.vertex_weight;
}

// Accumulate bindings.
@group(0) @binding(6) var<storage, read> prev_total: array<vec4<f32>>;
@group(0) @binding(7) var<storage, read> pass_only: array<vec4<f32>>;
@group(0) @binding(8) var<storage, read_write> new_total: array<vec4<f32>>;

@compute @workgroup_size(WG_SIZE_B, 1, 1)
fn accumulate(@builtin(global_invocation_id) gid: vec3<u32>) {
    if gid.x >= params.vertex_count {
        return;
    }
    new_total[gid.x] = prev_total[gid.x] + pass_only[gid.x];
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::RadianceAtlas;
    use crate::integrator::CpuIntegrator;

    #[test]
    fn flush_state_waits_for_threshold() {
        let mut flush = FlushState::new(3);
        assert!(!flush.should_flush(false));
        flush.record_batch();
        flush.record_batch();
        assert!(!flush.should_flush(false));
        flush.record_batch();
        assert!(flush.should_flush(false));
        flush.reset();
        assert_eq!(flush.pending(), 0);
    }

    #[test]
    fn flush_state_last_batch_forces_flush() {
        let mut flush = FlushState::new(4);
        flush.record_batch();
        assert!(flush.should_flush(true));
        // Nothing pending: nothing to flush even on the last batch.
        flush.reset();
        assert!(!flush.should_flush(true));
    }

    #[test]
    fn flush_state_threshold_is_clamped() {
        let mut flush = FlushState::new(0);
        flush.record_batch();
        assert!(flush.should_flush(false));
    }

    fn gpu_context() -> Option<GpuContext> {
        let _ = env_logger::builder().is_test(true).try_init();
        match GpuContext::new() {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                eprintln!("skipping GPU test: {e}");
                None
            }
        }
    }

    #[test]
    fn rejects_oversized_dispatch_window() {
        let Some(ctx) = gpu_context() else { return };
        let max = ctx.device().limits().max_compute_workgroups_per_dimension;
        let result = GpuIntegrator::new(ctx, 16, max, 2);
        assert!(matches!(
            result.err(),
            Some(RadiosityError::ConfigurationUnsupported(_))
        ));
    }

    #[test]
    fn zero_atlas_integrates_to_zero() {
        let Some(ctx) = gpu_context() else { return };
        let weights = WeightTable::build(16).unwrap();
        let layout = AtlasLayout::new(16, 2, 8192).unwrap();
        let atlas = RadianceAtlas::new(layout);

        let mut integ = GpuIntegrator::new(ctx, 16, 2, 1).unwrap();
        integ.begin_scene(2).unwrap();
        integ
            .integrate_batch(&AtlasSource::Cpu(&atlas), &weights, &layout, 0, 2, 0, true)
            .unwrap();
        integ.finish_pass(0, true).unwrap();
        for v in integ.final_irradiance(0).unwrap() {
            assert_eq!(v, Vec4::ZERO);
        }
    }

    #[test]
    fn matches_cpu_backend_within_epsilon() {
        let Some(ctx) = gpu_context() else { return };
        let face_size = 16u32;
        let batch = 2u32;
        let vertex_count = 5usize;
        let weights = WeightTable::build(face_size).unwrap();
        let layout = AtlasLayout::new(face_size, batch, 8192).unwrap();

        // Non-uniform radiance so indexing errors cannot cancel out.
        let mut atlas = RadianceAtlas::new(layout);
        for y in 0..layout.height() {
            for x in 0..layout.width() {
                let r = (x as f32 * 0.37 + y as f32 * 0.11).sin().abs();
                let g = (x as f32 * 0.05).cos().abs();
                let b = (y as f32 * 0.23).fract();
                atlas.set(x, y, Vec4::new(r, g, b, 1.0));
            }
        }

        let mut cpu = CpuIntegrator::new();
        let mut gpu = GpuIntegrator::new(ctx, face_size, batch, 2).unwrap();
        cpu.begin_scene(vertex_count).unwrap();
        gpu.begin_scene(vertex_count).unwrap();

        // Three batches (2 + 2 + 1): exercises both the threshold flush
        // and the forced last-batch flush.
        let batches = [(0usize, 2usize, false), (2, 2, false), (4, 1, true)];
        let src = AtlasSource::Cpu(&atlas);
        for (first, count, last) in batches {
            cpu.integrate_batch(&src, &weights, &layout, first, count, 0, last)
                .unwrap();
            gpu.integrate_batch(&src, &weights, &layout, first, count, 0, last)
                .unwrap();
        }
        cpu.finish_pass(0, true).unwrap();
        gpu.finish_pass(0, true).unwrap();

        let cpu_result = cpu.final_irradiance(0).unwrap();
        let gpu_result = gpu.final_irradiance(0).unwrap();
        assert_eq!(cpu_result.len(), gpu_result.len());
        for (i, (c, g)) in cpu_result.iter().zip(&gpu_result).enumerate() {
            for k in 0..3 {
                let (cv, gv) = (c[k], g[k]);
                let rel = (cv - gv).abs() / cv.abs().max(1e-6);
                assert!(rel < 1e-4, "vertex {i} channel {k}: cpu {cv} vs gpu {gv}");
            }
        }
    }
}
