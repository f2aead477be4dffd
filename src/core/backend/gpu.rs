//! GPU backend: PBKDF2-HMAC-SHA1 in a wgpu compute shader.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use super::{Backend, BackendKind};
use crate::error::BackendError;
use crate::model::{Essid, Password, Pmk};

const SHADER: &str = include_str!("pbkdf2_sha1.wgsl");

/// Must match `@workgroup_size` in the shader.
const WORKGROUP_SIZE: u32 = 64;

/// Password slots per dispatch; keeps buffers well below binding limits.
const MAX_BATCH: usize = 262_144;

const PASSWORD_WORDS: usize = 16;
const PMK_WORDS: usize = 8;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Params {
    count: u32,
    salt_len: u32,
    _pad0: u32,
    _pad1: u32,
    salt: [u32; 8],
}

pub struct GpuBackend {
    name: String,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

/// Pack bytes into big-endian words, zero padded.
fn pack_be(bytes: &[u8], words: &mut [u32]) {
    for (i, b) in bytes.iter().enumerate() {
        words[i / 4] |= (*b as u32) << (24 - 8 * (i % 4));
    }
}

impl GpuBackend {
    pub fn new() -> Result<Self, BackendError> {
        pollster::block_on(Self::new_async())
    }

    async fn new_async() -> Result<Self, BackendError> {
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
            .ok_or_else(|| BackendError::Unavailable("no GPU adapter found".into()))?;

        let info = adapter.get_info();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("pmkforge-gpu"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| BackendError::Gpu(format!("failed to request device: {}", e)))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("pbkdf2-sha1-shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER.into()),
        });

        let storage_entry = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
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
            label: Some("pbkdf2-bind-group-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage_entry(1, true),
                storage_entry(2, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("pbkdf2-pipeline-layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("pbkdf2-pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        Ok(Self {
            name: format!("GPU {} ({:?})", info.name, info.backend),
            device: Arc::new(device),
            queue: Arc::new(queue),
            pipeline,
            bind_group_layout,
        })
    }

    fn run_chunk(&self, essid: &Essid, passwords: &[Password]) -> Result<Vec<Pmk>, BackendError> {
        let count = passwords.len() as u32;

        let mut salt = [0u32; 8];
        pack_be(essid.as_bytes(), &mut salt);
        let params = Params {
            count,
            salt_len: essid.as_bytes().len() as u32,
            _pad0: 0,
            _pad1: 0,
            salt,
        };

        let mut inputs = vec![0u32; passwords.len() * PASSWORD_WORDS];
        for (pw, words) in passwords.iter().zip(inputs.chunks_exact_mut(PASSWORD_WORDS)) {
            pack_be(pw.as_bytes(), words);
        }

        let params_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("pbkdf2-params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let input_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("pbkdf2-passwords"),
            contents: bytemuck::cast_slice(&inputs),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let output_size = (passwords.len() * PMK_WORDS * 4) as u64;
        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pbkdf2-pmks"),
            size: output_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pbkdf2-staging"),
            size: output_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pbkdf2-bind-group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: input_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("pbkdf2-encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("pbkdf2-pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(count.div_ceil(WORKGROUP_SIZE), 1, 1);
        }
        encoder.copy_buffer_to_buffer(&output_buffer, 0, &staging, 0, output_size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| BackendError::Gpu("map callback dropped".into()))?
            .map_err(|e| BackendError::Gpu(format!("failed to map output: {}", e)))?;

        let pmks = {
            let data = slice.get_mapped_range();
            let words: &[u32] = bytemuck::cast_slice(&data);
            words
                .chunks_exact(PMK_WORDS)
                .map(|chunk| {
                    let mut pmk = [0u8; 32];
                    for (i, w) in chunk.iter().enumerate() {
                        pmk[i * 4..i * 4 + 4].copy_from_slice(&w.to_be_bytes());
                    }
                    pmk
                })
                .collect()
        };
        staging.unmap();
        Ok(pmks)
    }
}

impl Backend for GpuBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Gpu
    }

    fn submit(&self, essid: &Essid, passwords: &[Password]) -> Result<Vec<Pmk>, BackendError> {
        let mut out = Vec::with_capacity(passwords.len());
        for chunk in passwords.chunks(MAX_BATCH) {
            out.extend(self.run_chunk(essid, chunk)?);
        }
        Ok(out)
    }

    fn preferred_batch(&self) -> usize {
        16_384
    }
}
