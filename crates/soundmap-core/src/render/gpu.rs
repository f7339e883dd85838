//! wgpu compute engine.
//!
//! Notes are marshaled into packed records, custom and buffered wavetables are
//! concatenated into one storage buffer (each table is `sample_rate` floats
//! long) and a WGSL kernel evaluates one frame per invocation. The table
//! buffer is only rebuilt when the SHA-256 of the tables in use changes.

use std::{collections::HashMap, sync::Arc};

use bytemuck::{Pod, Zeroable};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, instrument, trace, warn};
use wgpu::util::DeviceExt;

use super::{
    EngineError, EngineKind, FrameSpan, PeakLevels, RenderClock, RenderEngine, RenderFormat,
    begin_pass,
};
use crate::{
    envelope::Envelope,
    note::{Note, NotePoint, Voice},
    waveform::Wavetable,
};

const WORKGROUP_SIZE: u32 = 64;
const REQUIRED_STORAGE_BUFFERS: u32 = 5;
const SHADER_SOURCE: &str = include_str!("wave.wgsl");

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct PointRecord {
    pub amplitude: f32,
    pub frequency: f32,
    pub left_pct: f32,
    pub right_pct: f32,
    pub waveform_index: i32,
    pub is_mute: i32,
}

impl PointRecord {
    const MUTED: Self = Self {
        amplitude: 0.0,
        frequency: 0.0,
        left_pct: 0.0,
        right_pct: 0.0,
        waveform_index: -1,
        is_mute: 1,
    };
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct EnvelopeRecord {
    pub attack_k: f32,
    pub attack_time: f32,
    pub decay_k: f32,
    pub decay_time: f32,
    pub release_k: f32,
    pub release_time: f32,
    pub start_time: f32,
    /// −1 while the note has not been released.
    pub stop_time: f32,
    pub stop_value: f32,
    pub sustain_level: f32,
}

impl From<&Envelope> for EnvelopeRecord {
    fn from(envelope: &Envelope) -> Self {
        Self {
            attack_k: envelope.attack_k() as f32,
            attack_time: envelope.attack_time() as f32,
            decay_k: envelope.decay_k() as f32,
            decay_time: envelope.decay_time() as f32,
            release_k: envelope.release_k() as f32,
            release_time: envelope.release_time() as f32,
            start_time: envelope.start_time().unwrap_or_default() as f32,
            stop_time: envelope.stop_time().map_or(-1.0, |time| time as f32),
            stop_value: envelope.stop_value() as f32,
            sustain_level: envelope.sustain_level() as f32,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct NoteRecord {
    pub envelope: EnvelopeRecord,
    pub volume: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct RenderParams {
    pub start_time: f32,
    pub time_delta: f32,
    pub sample_rate: i32,
    pub master_volume: f32,
    pub from_offset: u32,
    pub note_count: u32,
    pub points_per_note: u32,
}

/// Distinct wavetables referenced by a pass, in first-use order.
#[derive(Debug, Default)]
pub struct TableSet {
    tables: Vec<Arc<Wavetable>>,
    indices: HashMap<[u8; 32], i32>,
}

impl TableSet {
    fn index_of(&mut self, table: &Arc<Wavetable>) -> i32 {
        if let Some(index) = self.indices.get(table.fingerprint()) {
            return *index;
        }
        let index = self.tables.len() as i32;
        self.indices.insert(*table.fingerprint(), index);
        self.tables.push(Arc::clone(table));
        index
    }

    /// Hash over the fingerprints of every table in order.
    #[must_use]
    pub fn content_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for table in &self.tables {
            hasher.update(table.fingerprint());
        }
        hasher.finalize().into()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    fn concatenated(&self, sample_rate: u32) -> Result<Vec<f32>, EngineError> {
        let mut samples = Vec::with_capacity(self.tables.len() * sample_rate as usize);
        for table in &self.tables {
            if table.sample_rate() != sample_rate {
                return Err(EngineError::TableRateMismatch {
                    expected: sample_rate,
                    found: table.sample_rate(),
                });
            }
            samples.extend_from_slice(table.samples());
        }
        if samples.is_empty() {
            samples.push(0.0);
        }
        Ok(samples)
    }
}

/// Packed device input for one pass.
#[derive(Debug, Default)]
pub struct MarshaledNotes {
    pub notes: Vec<NoteRecord>,
    pub points: Vec<PointRecord>,
    pub points_per_note: u32,
    pub tables: TableSet,
}

/// Flattens voices into fixed-stride records. A soloed point mutes every
/// other point of its note; notes with fewer points are padded with muted
/// records so every note has `points_per_note` entries.
#[must_use]
pub fn marshal_voices(voices: &[Voice]) -> MarshaledNotes {
    let points_per_note = voices
        .iter()
        .map(|voice| voice.points.len())
        .max()
        .unwrap_or_default()
        .max(1);

    let mut marshaled = MarshaledNotes {
        notes: Vec::with_capacity(voices.len()),
        points: Vec::with_capacity(voices.len() * points_per_note),
        points_per_note: points_per_note as u32,
        tables: TableSet::default(),
    };

    for voice in voices {
        marshaled.notes.push(NoteRecord {
            envelope: EnvelopeRecord::from(&voice.envelope),
            volume: voice.volume as f32,
        });

        let solo = voice
            .points
            .iter()
            .position(|point| !point.mute && point.solo);
        for (index, point) in voice.points.iter().enumerate() {
            let muted = point.mute || solo.is_some_and(|solo| solo != index);
            marshaled
                .points
                .push(point_record(point, muted, &mut marshaled.tables));
        }
        for _ in voice.points.len()..points_per_note {
            marshaled.points.push(PointRecord::MUTED);
        }
    }

    if marshaled.notes.is_empty() {
        marshaled.notes.push(NoteRecord::default());
        marshaled.points.push(PointRecord::MUTED);
    }
    marshaled
}

fn point_record(point: &NotePoint, muted: bool, tables: &mut TableSet) -> PointRecord {
    PointRecord {
        amplitude: point.volume as f32,
        frequency: point.frequency as f32,
        left_pct: point.left_pct as f32,
        right_pct: point.right_pct as f32,
        waveform_index: point
            .waveform
            .table()
            .map_or(-1, |table| tables.index_of(table)),
        is_mute: i32::from(muted),
    }
}

struct TableBuffer {
    hash: [u8; 32],
    sample_rate: u32,
    buffer: wgpu::Buffer,
}

pub struct GpuEngine {
    clock: RenderClock,
    adapter_name: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    tables: Option<TableBuffer>,
}

impl std::fmt::Debug for GpuEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuEngine")
            .field("adapter", &self.adapter_name)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl GpuEngine {
    /// Acquires a device and builds the compute pipeline. Fails when no
    /// adapter is present or the kernel does not validate.
    #[instrument]
    pub fn new() -> Result<Self, EngineError> {
        pollster::block_on(Self::build())
    }

    async fn build() -> Result<Self, EngineError> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| EngineError::Gpu("no compatible adapter".to_string()))?;

        let limits = adapter.limits();
        if limits.max_storage_buffers_per_shader_stage < REQUIRED_STORAGE_BUFFERS {
            return Err(EngineError::Gpu(format!(
                "adapter supports {} storage buffers per stage, {} required",
                limits.max_storage_buffers_per_shader_stage, REQUIRED_STORAGE_BUFFERS
            )));
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("soundmap-render"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits,
                },
                None,
            )
            .await
            .map_err(|error| EngineError::Gpu(error.to_string()))?;
        device.on_uncaptured_error(Box::new(|error| {
            error!(%error, "uncaptured gpu error");
        }));

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("wave"),
            source: wgpu::ShaderSource::Wgsl(SHADER_SOURCE.into()),
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
            label: Some("wave-bindings"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, false),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("wave-layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("wave-pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "main",
        });
        if let Some(error) = device.pop_error_scope().await {
            return Err(EngineError::Gpu(format!("kernel build failed: {error}")));
        }

        let adapter_name = adapter.get_info().name;
        info!(adapter = %adapter_name, "gpu engine ready");
        Ok(Self {
            clock: RenderClock::default(),
            adapter_name,
            device,
            queue,
            pipeline,
            bind_group_layout,
            tables: None,
        })
    }

    #[must_use]
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn table_buffer(&mut self, tables: &TableSet, sample_rate: u32) -> Result<(), EngineError> {
        let hash = tables.content_hash();
        let current = self
            .tables
            .as_ref()
            .is_some_and(|tables| tables.hash == hash && tables.sample_rate == sample_rate);
        if current {
            return Ok(());
        }

        let samples = tables.concatenated(sample_rate)?;
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("wave-tables"),
                contents: bytemuck::cast_slice(&samples),
                usage: wgpu::BufferUsages::STORAGE,
            });
        debug!(tables = tables.len(), floats = samples.len(), "wavetable buffer rebuilt");
        self.tables = Some(TableBuffer {
            hash,
            sample_rate,
            buffer,
        });
        Ok(())
    }

    fn dispatch(
        &mut self,
        voices: &[Voice],
        out: &mut [f32],
        from: usize,
        span: &FrameSpan,
        master_volume: f64,
    ) -> Result<(), EngineError> {
        let marshaled = marshal_voices(voices);
        self.table_buffer(&marshaled.tables, span.sample_rate)?;
        let Some(tables) = &self.tables else {
            return Err(EngineError::Gpu("wavetable buffer missing".to_string()));
        };

        let params = RenderParams {
            start_time: span.start_time() as f32,
            time_delta: span.time_delta as f32,
            sample_rate: span.sample_rate as i32,
            master_volume: master_volume as f32,
            from_offset: from as u32,
            note_count: voices.len() as u32,
            points_per_note: marshaled.points_per_note,
        };

        let storage = |label: &str, contents: &[u8]| {
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents,
                    usage: wgpu::BufferUsages::STORAGE,
                })
        };
        let params_buffer = storage("render-params", bytemuck::bytes_of(&params));
        let notes_buffer = storage("note-records", bytemuck::cast_slice(&marshaled.notes));
        let points_buffer = storage("point-records", bytemuck::cast_slice(&marshaled.points));

        let out_bytes = (out.len() * std::mem::size_of::<f32>()) as u64;
        let from_bytes = (from * std::mem::size_of::<f32>()) as u64;
        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("mix-out"),
            size: from_bytes + out_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("mix-readback"),
            size: out_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("wave-bind-group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: notes_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: points_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: tables.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: output_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("wave-encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("wave-pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups((span.frames as u32).div_ceil(WORKGROUP_SIZE), 1, 1);
        }
        encoder.copy_buffer_to_buffer(&output_buffer, from_bytes, &staging_buffer, 0, out_bytes);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging_buffer.slice(..);
        let (sender, receiver) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            if sender.send(result).is_err() {
                warn!("read-back receiver gone before the staging buffer mapped");
            }
        });
        let maintain = self.device.poll(wgpu::Maintain::Wait);
        if !maintain.is_queue_empty() {
            warn!("gpu queue still busy after waiting for read-back");
        }
        receiver
            .recv()
            .map_err(|error| EngineError::Gpu(error.to_string()))?
            .map_err(|error| EngineError::Gpu(error.to_string()))?;

        {
            let mapped = slice.get_mapped_range();
            out.copy_from_slice(bytemuck::cast_slice(&mapped));
        }
        staging_buffer.unmap();
        Ok(())
    }
}

impl RenderEngine for GpuEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Gpu
    }

    fn init(&mut self, format: RenderFormat) -> Result<(), EngineError> {
        self.tables = None;
        self.clock.reset(format)
    }

    fn read(
        &mut self,
        notes: &[Arc<Note>],
        buffer: &mut [f32],
        from: usize,
        to: usize,
        master_volume: f64,
    ) -> Result<PeakLevels, EngineError> {
        let span = self.clock.prepare(buffer.len(), from, to)?;
        let voices = begin_pass(notes, span.start_time());
        let out = &mut buffer[from..to];

        if voices.is_empty() || span.frames == 0 {
            out.fill(0.0);
        } else {
            self.dispatch(&voices, out, from, &span, master_volume)?;
        }

        let peaks = out.chunks_exact(2).fold(PeakLevels::default(), |peaks, frame| {
            peaks.merge(PeakLevels {
                left: frame[0].abs(),
                right: frame[1].abs(),
            })
        });
        self.clock.advance(span.frames);
        trace!(frames = span.frames, voices = voices.len(), "gpu pass rendered");
        Ok(peaks)
    }

    fn time(&self) -> f64 {
        self.clock.time()
    }
}
