//! The format conversion stage.
//!
//! Executes a conversion between the packed 10-bit 4:2:2 format and the
//! RGB family, either as a wgpu compute kernel or as a host scalar path.
//! Bit extraction is a pure performance switch: both paths decode the
//! packed format identically.

use crate::context::ContextToken;
use crate::renderer::Renderer;
use framecast_core::packed10::{self, SampleGroup};
use framecast_core::{Chromaticity, Frame, FramecastError, ImageFormat, PixelFormat, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{mpsc, Arc};
use tracing::{debug, warn};
use wgpu::util::DeviceExt;

const SHADER_SOURCE: &str = include_str!("shaders/convert.wgsl");
const WORKGROUP_SIZE: u32 = 64;

/// Where the bit extraction runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversionMode {
    /// Scalar decode/encode on the CPU before/after transfer.
    HostScalar,
    /// Compute kernel on the device. Falls back to the host path when
    /// the token has no device or the pair is host-only.
    GpuCompute,
}

impl fmt::Display for ConversionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HostScalar => "host_scalar",
            Self::GpuCompute => "gpu_compute",
        };
        f.write_str(name)
    }
}

/// Chroma downsampling filter used when encoding 4:2:2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChromaFilter {
    /// Take the chroma of the even pixel of each pair.
    Replicate,
    /// Average the chroma of both pixels of each pair.
    Average,
}

/// Configuration of a [`FormatConverter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConverterConfig {
    pub mode: ConversionMode,
    pub chroma_filter: ChromaFilter,
    /// Keep device readback buffers persistently mapped, saving one
    /// copy per frame. Requires the mappable-buffer capability of the
    /// execution token; refused at first conversion otherwise.
    pub persistent_mapping: bool,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            mode: ConversionMode::GpuCompute,
            chroma_filter: ChromaFilter::Average,
            persistent_mapping: false,
        }
    }
}

/// Production conversion stage between the packed 10-bit 4:2:2 format
/// and the 8-bit/float RGB family.
pub struct FormatConverter {
    name: String,
    config: ConverterConfig,
    input_format: ImageFormat,
    output_format: ImageFormat,
    passthrough: bool,
    fallback_logged: bool,
    gpu: Option<GpuState>,
}

impl FormatConverter {
    /// Create a converter for the given format pair.
    ///
    /// Fails if dimensions differ or the pixel format pair is not a
    /// supported conversion.
    pub fn new(
        input_format: ImageFormat,
        output_format: ImageFormat,
        config: ConverterConfig,
    ) -> Result<Self> {
        if input_format.width() != output_format.width()
            || input_format.height() != output_format.height()
        {
            return Err(FramecastError::Configuration(format!(
                "conversion cannot resize: input {}x{}, output {}x{}",
                input_format.width(),
                input_format.height(),
                output_format.width(),
                output_format.height()
            )));
        }
        if !Self::supports(input_format.pixel_format(), output_format.pixel_format()) {
            return Err(FramecastError::Configuration(format!(
                "no conversion available from {} to {}",
                input_format.pixel_format(),
                output_format.pixel_format()
            )));
        }

        let passthrough = input_format.pixel_format() == output_format.pixel_format();
        if passthrough {
            debug!(
                "converter {} -> {} is a passthrough",
                input_format.pixel_format(),
                output_format.pixel_format()
            );
        }

        Ok(Self {
            name: format!(
                "FormatConverter ({} -> {})",
                input_format.pixel_format(),
                output_format.pixel_format()
            ),
            config,
            input_format,
            output_format,
            passthrough,
            fallback_logged: false,
            gpu: None,
        })
    }

    /// Whether a pixel format pair is convertible.
    pub fn supports(input: PixelFormat, output: PixelFormat) -> bool {
        if input == output {
            return true;
        }
        let rgb_side = |pf: PixelFormat| {
            matches!(pf, PixelFormat::Rgb8 | PixelFormat::Rgba8 | PixelFormat::RgbaF32)
        };
        (input == PixelFormat::Yuv10Bit422 && rgb_side(output))
            || (output == PixelFormat::Yuv10Bit422 && rgb_side(input))
    }

    /// Whether the compute kernel serves this pair. `Rgb8` rows are not
    /// 32-bit aligned, so that side stays on the host path.
    fn gpu_serves(&self) -> bool {
        let rgb_word = |pf: PixelFormat| matches!(pf, PixelFormat::Rgba8 | PixelFormat::RgbaF32);
        !self.passthrough
            && ((self.input_format.pixel_format() == PixelFormat::Yuv10Bit422
                && rgb_word(self.output_format.pixel_format()))
                || (self.output_format.pixel_format() == PixelFormat::Yuv10Bit422
                    && rgb_word(self.input_format.pixel_format())))
    }

    /// Chromaticity of the packed side, which defines the YCbCr matrix.
    fn matrix_chromaticity(&self) -> Chromaticity {
        if self.input_format.pixel_format() == PixelFormat::Yuv10Bit422 {
            self.input_format.chromaticity()
        } else {
            self.output_format.chromaticity()
        }
    }

    fn check_operands(&self, input: &Frame, output: &Frame) -> Result<()> {
        if input.format() != &self.input_format {
            return Err(FramecastError::DataValidation(format!(
                "input frame format [{}] does not match converter input [{}]",
                input.format(),
                self.input_format
            )));
        }
        if output.format() != &self.output_format {
            return Err(FramecastError::DataValidation(format!(
                "output frame format [{}] does not match converter output [{}]",
                output.format(),
                self.output_format
            )));
        }
        if !input.is_valid() {
            return Err(FramecastError::DataValidation(
                "input frame holds no valid data".to_string(),
            ));
        }
        if input.byte_size() != self.input_format.byte_size()
            || output.byte_size() != self.output_format.byte_size()
        {
            return Err(FramecastError::DataValidation(format!(
                "buffer sizes do not match formats: input {} vs {}, output {} vs {}",
                input.byte_size(),
                self.input_format.byte_size(),
                output.byte_size(),
                self.output_format.byte_size()
            )));
        }
        Ok(())
    }
}

impl Renderer for FormatConverter {
    fn name(&self) -> &str {
        &self.name
    }

    fn convert(
        &mut self,
        ctx: &mut ContextToken,
        input: &Frame,
        output: &mut Frame,
    ) -> Result<()> {
        self.check_operands(input, output)?;

        if self.passthrough {
            return output.copy_from_slice(input.data());
        }

        let use_gpu = self.config.mode == ConversionMode::GpuCompute
            && ctx.is_gpu()
            && self.gpu_serves();

        if self.config.mode == ConversionMode::GpuCompute && !use_gpu && !self.fallback_logged {
            warn!(
                "{}: falling back to host path (token '{}', gpu={})",
                self.name,
                ctx.label(),
                ctx.is_gpu()
            );
            self.fallback_logged = true;
        }

        if use_gpu {
            self.convert_gpu(ctx, input, output)
        } else {
            self.convert_host(input, output)
        }
    }
}

// ---------------------------------------------------------------------
// Host scalar path
// ---------------------------------------------------------------------

/// YCbCr <-> R'G'B' coefficients for narrow-range 10-bit video.
struct YcbcrCoeffs {
    kr: f32,
    kg: f32,
    kb: f32,
    cr_r: f32,
    cb_g: f32,
    cr_g: f32,
    cb_b: f32,
}

impl YcbcrCoeffs {
    fn for_chromaticity(chromaticity: Chromaticity) -> Self {
        match chromaticity {
            Chromaticity::Bt709 | Chromaticity::Srgb => Self {
                kr: 0.2126,
                kg: 0.7152,
                kb: 0.0722,
                cr_r: 1.5748,
                cb_g: -0.187_324_3,
                cr_g: -0.468_124_3,
                cb_b: 1.8556,
            },
            Chromaticity::Bt601 => Self {
                kr: 0.299,
                kg: 0.587,
                kb: 0.114,
                cr_r: 1.402,
                cb_g: -0.344_136_3,
                cr_g: -0.714_136_3,
                cb_b: 1.772,
            },
        }
    }
}

#[inline]
fn ycbcr_to_rgb(y: u16, cb: u16, cr: u16, c: &YcbcrCoeffs) -> [f32; 3] {
    let yn = (y as f32 - 64.0) / 876.0;
    let cbn = (cb as f32 - 512.0) / 448.0;
    let crn = (cr as f32 - 512.0) / 448.0;
    let r = yn + c.cr_r * crn;
    let g = yn + c.cb_g * cbn + c.cr_g * crn;
    let b = yn + c.cb_b * cbn;
    [r.clamp(0.0, 1.0), g.clamp(0.0, 1.0), b.clamp(0.0, 1.0)]
}

#[inline]
fn quant_luma(v: f32) -> u16 {
    (v * 876.0 + 64.0)
        .round()
        .clamp(packed10::SAMPLE_MIN as f32, packed10::SAMPLE_MAX as f32) as u16
}

#[inline]
fn quant_chroma(v: f32) -> u16 {
    (v * 448.0 + 512.0)
        .round()
        .clamp(packed10::SAMPLE_MIN as f32, packed10::SAMPLE_MAX as f32) as u16
}

#[inline]
fn write_pixel(dst: &mut [u8], pf: PixelFormat, pixel: usize, rgb: [f32; 3]) {
    match pf {
        PixelFormat::Rgb8 => {
            let o = pixel * 3;
            dst[o] = (rgb[0] * 255.0).round() as u8;
            dst[o + 1] = (rgb[1] * 255.0).round() as u8;
            dst[o + 2] = (rgb[2] * 255.0).round() as u8;
        }
        PixelFormat::Rgba8 => {
            let o = pixel * 4;
            dst[o] = (rgb[0] * 255.0).round() as u8;
            dst[o + 1] = (rgb[1] * 255.0).round() as u8;
            dst[o + 2] = (rgb[2] * 255.0).round() as u8;
            dst[o + 3] = 255;
        }
        PixelFormat::RgbaF32 => {
            let o = pixel * 16;
            dst[o..o + 4].copy_from_slice(&rgb[0].to_le_bytes());
            dst[o + 4..o + 8].copy_from_slice(&rgb[1].to_le_bytes());
            dst[o + 8..o + 12].copy_from_slice(&rgb[2].to_le_bytes());
            dst[o + 12..o + 16].copy_from_slice(&1.0f32.to_le_bytes());
        }
        _ => unreachable!("unsupported RGB-side format"),
    }
}

#[inline]
fn read_pixel(src: &[u8], pf: PixelFormat, pixel: usize) -> [f32; 3] {
    match pf {
        PixelFormat::Rgb8 => {
            let o = pixel * 3;
            [
                src[o] as f32 / 255.0,
                src[o + 1] as f32 / 255.0,
                src[o + 2] as f32 / 255.0,
            ]
        }
        PixelFormat::Rgba8 => {
            let o = pixel * 4;
            [
                src[o] as f32 / 255.0,
                src[o + 1] as f32 / 255.0,
                src[o + 2] as f32 / 255.0,
            ]
        }
        PixelFormat::RgbaF32 => {
            let o = pixel * 16;
            let component = |at: usize| {
                let mut b = [0u8; 4];
                b.copy_from_slice(&src[at..at + 4]);
                f32::from_le_bytes(b)
            };
            [component(o), component(o + 4), component(o + 8)]
        }
        _ => unreachable!("unsupported RGB-side format"),
    }
}

impl FormatConverter {
    fn convert_host(&self, input: &Frame, output: &mut Frame) -> Result<()> {
        let coeffs = YcbcrCoeffs::for_chromaticity(self.matrix_chromaticity());
        if self.input_format.pixel_format() == PixelFormat::Yuv10Bit422 {
            self.host_unpack(input, output, &coeffs)
        } else {
            self.host_pack(input, output, &coeffs)
        }
    }

    fn host_unpack(&self, input: &Frame, output: &mut Frame, coeffs: &YcbcrCoeffs) -> Result<()> {
        let width = self.input_format.width() as usize;
        let groups_per_row = packed10::groups_per_row(self.input_format.width());
        let height = self.input_format.height() as usize;
        let out_pf = self.output_format.pixel_format();

        let src = input.data();
        let dst = output.data_mut();

        for row in 0..height {
            for g in 0..groups_per_row {
                let offset = (row * groups_per_row + g) * packed10::GROUP_BYTES;
                let mut group = [0u8; packed10::GROUP_BYTES];
                group.copy_from_slice(&src[offset..offset + packed10::GROUP_BYTES]);
                let samples = packed10::decode_group(&group);

                let pixel0 = row * width + g * packed10::SAMPLES_PER_GROUP;
                for k in 0..packed10::SAMPLES_PER_GROUP {
                    let rgb = ycbcr_to_rgb(
                        samples.luma[k],
                        samples.cb[k / 2],
                        samples.cr[k / 2],
                        coeffs,
                    );
                    write_pixel(dst, out_pf, pixel0 + k, rgb);
                }
            }
        }
        Ok(())
    }

    fn host_pack(&self, input: &Frame, output: &mut Frame, coeffs: &YcbcrCoeffs) -> Result<()> {
        let width = self.output_format.width() as usize;
        let groups_per_row = packed10::groups_per_row(self.output_format.width());
        let height = self.output_format.height() as usize;
        let in_pf = self.input_format.pixel_format();
        let average = self.config.chroma_filter == ChromaFilter::Average;

        let src = input.data();
        let dst = output.data_mut();

        for row in 0..height {
            for g in 0..groups_per_row {
                let pixel0 = row * width + g * packed10::SAMPLES_PER_GROUP;
                let mut samples = SampleGroup {
                    luma: [0; 6],
                    cb: [0; 3],
                    cr: [0; 3],
                };
                for k in 0..3 {
                    let even = read_pixel(src, in_pf, pixel0 + 2 * k);
                    let odd = read_pixel(src, in_pf, pixel0 + 2 * k + 1);
                    let y_even = coeffs.kr * even[0] + coeffs.kg * even[1] + coeffs.kb * even[2];
                    let y_odd = coeffs.kr * odd[0] + coeffs.kg * odd[1] + coeffs.kb * odd[2];
                    samples.luma[2 * k] = quant_luma(y_even);
                    samples.luma[2 * k + 1] = quant_luma(y_odd);

                    let mut cb_n = (even[2] - y_even) / coeffs.cb_b;
                    let mut cr_n = (even[0] - y_even) / coeffs.cr_r;
                    if average {
                        cb_n = (cb_n + (odd[2] - y_odd) / coeffs.cb_b) * 0.5;
                        cr_n = (cr_n + (odd[0] - y_odd) / coeffs.cr_r) * 0.5;
                    }
                    samples.cb[k] = quant_chroma(cb_n);
                    samples.cr[k] = quant_chroma(cr_n);
                }

                let bytes = packed10::encode_group(&samples);
                let offset = (row * groups_per_row + g) * packed10::GROUP_BYTES;
                dst[offset..offset + packed10::GROUP_BYTES].copy_from_slice(&bytes);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------
// GPU compute path
// ---------------------------------------------------------------------

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ConvertParams {
    width: u32,
    height: u32,
    groups_per_row: u32,
    rgb_kind: u32,
    cr_r: f32,
    cb_g: f32,
    cr_g: f32,
    cb_b: f32,
    kr: f32,
    kg: f32,
    kb: f32,
    chroma_average: u32,
}

struct GpuState {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    src: wgpu::Buffer,
    dst: wgpu::Buffer,
    /// Copy target for readback; absent when the destination buffer is
    /// mappable directly (persistent mapping).
    readback: Option<wgpu::Buffer>,
    out_size: u64,
    workgroups: u32,
}

impl FormatConverter {
    fn convert_gpu(
        &mut self,
        ctx: &mut ContextToken,
        input: &Frame,
        output: &mut Frame,
    ) -> Result<()> {
        if self.config.persistent_mapping && !ctx.capabilities().persistent_mapping {
            return Err(FramecastError::Configuration(format!(
                "persistent mapping requested but token '{}' lacks mappable buffers",
                ctx.label()
            )));
        }
        if self.gpu.is_none() {
            self.gpu = Some(self.build_gpu_state(ctx)?);
        }
        let state = self
            .gpu
            .as_ref()
            .ok_or_else(|| FramecastError::Internal("GPU state missing".to_string()))?;

        state
            .device
            .push_error_scope(wgpu::ErrorFilter::Validation);

        state.queue.write_buffer(&state.src, 0, input.data());

        let mut encoder = state
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("convert_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("convert_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&state.pipeline);
            pass.set_bind_group(0, &state.bind_group, &[]);
            pass.dispatch_workgroups(state.workgroups, 1, 1);
        }
        if let Some(readback) = &state.readback {
            encoder.copy_buffer_to_buffer(&state.dst, 0, readback, 0, state.out_size);
        }
        state.queue.submit(Some(encoder.finish()));

        if let Some(error) = pollster::block_on(state.device.pop_error_scope()) {
            return Err(FramecastError::GpuExecution(format!(
                "conversion dispatch failed: {}",
                error
            )));
        }

        let map_target = state.readback.as_ref().unwrap_or(&state.dst);
        let slice = map_target.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = state.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| {
                FramecastError::GpuExecution("readback mapping callback dropped".to_string())
            })?
            .map_err(|e| FramecastError::GpuExecution(format!("readback mapping failed: {}", e)))?;

        {
            let data = slice.get_mapped_range();
            output.copy_from_slice(&data)?;
        }
        map_target.unmap();

        Ok(())
    }

    fn build_gpu_state(&self, ctx: &ContextToken) -> Result<GpuState> {
        let (device, queue) = ctx.device_queue().ok_or_else(|| {
            FramecastError::GpuExecution(format!("token '{}' has no device", ctx.label()))
        })?;

        let unpacking = self.input_format.pixel_format() == PixelFormat::Yuv10Bit422;
        let packed_format = if unpacking {
            &self.input_format
        } else {
            &self.output_format
        };
        let rgb_pf = if unpacking {
            self.output_format.pixel_format()
        } else {
            self.input_format.pixel_format()
        };

        let coeffs = YcbcrCoeffs::for_chromaticity(self.matrix_chromaticity());
        let groups_per_row = packed10::groups_per_row(packed_format.width()) as u32;
        let total_groups = groups_per_row * packed_format.height();
        let params = ConvertParams {
            width: packed_format.width(),
            height: packed_format.height(),
            groups_per_row,
            rgb_kind: if rgb_pf == PixelFormat::Rgba8 { 0 } else { 1 },
            cr_r: coeffs.cr_r,
            cb_g: coeffs.cb_g,
            cr_g: coeffs.cr_g,
            cb_b: coeffs.cb_b,
            kr: coeffs.kr,
            kg: coeffs.kg,
            kb: coeffs.kb,
            chroma_average: (self.config.chroma_filter == ChromaFilter::Average) as u32,
        };

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("convert_shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER_SOURCE.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("convert_bind_layout"),
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
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("convert_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("convert_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some(if unpacking { "unpack_groups" } else { "pack_groups" }),
            compilation_options: Default::default(),
            cache: None,
        });

        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("convert_params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let in_size = self.input_format.byte_size() as u64;
        let out_size = self.output_format.byte_size() as u64;

        let src = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("convert_src"),
            size: in_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let (dst, readback) = if self.config.persistent_mapping {
            let dst = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("convert_dst_mappable"),
                size: out_size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            });
            (dst, None)
        } else {
            let dst = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("convert_dst"),
                size: out_size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            });
            let readback = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("convert_readback"),
                size: out_size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            (dst, Some(readback))
        };

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("convert_bind_group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: src.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: dst.as_entire_binding(),
                },
            ],
        });

        debug!(
            "{}: built compute pipeline ({} groups, {} workgroups)",
            self.name,
            total_groups,
            total_groups.div_ceil(WORKGROUP_SIZE)
        );

        Ok(GpuState {
            device: Arc::clone(device),
            queue: Arc::clone(queue),
            pipeline,
            bind_group,
            src,
            dst,
            readback,
            out_size,
            workgroups: total_groups.div_ceil(WORKGROUP_SIZE),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framecast_core::{FrameTime, Origin, Transfer};

    fn v210(width: u32, height: u32) -> ImageFormat {
        ImageFormat::new(
            width,
            height,
            Transfer::Bt709,
            Chromaticity::Bt709,
            PixelFormat::Yuv10Bit422,
            Origin::UpperLeft,
        )
        .unwrap()
    }

    fn rgb(width: u32, height: u32, pf: PixelFormat) -> ImageFormat {
        ImageFormat::new(
            width,
            height,
            Transfer::Bt709,
            Chromaticity::Bt709,
            pf,
            Origin::UpperLeft,
        )
        .unwrap()
    }

    fn host_config() -> ConverterConfig {
        ConverterConfig {
            mode: ConversionMode::HostScalar,
            chroma_filter: ChromaFilter::Average,
            persistent_mapping: false,
        }
    }

    /// A v210 frame of neutral-chroma gray with the given luma codes,
    /// repeated across every group.
    fn gray_frame(format: ImageFormat, luma: [u16; 6]) -> Frame {
        let samples = SampleGroup {
            luma,
            cb: [512; 3],
            cr: [512; 3],
        };
        let bytes = packed10::encode_group(&samples);
        let mut frame = Frame::new(format, FrameTime::ZERO);
        for chunk in frame.data_mut().chunks_exact_mut(packed10::GROUP_BYTES) {
            chunk.copy_from_slice(&bytes);
        }
        frame
    }

    #[test]
    fn test_unsupported_pair_rejected() {
        let err = FormatConverter::new(
            rgb(12, 2, PixelFormat::Rgb8),
            rgb(12, 2, PixelFormat::Rgba8),
            host_config(),
        );
        assert!(matches!(err, Err(FramecastError::Configuration(_))));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let err = FormatConverter::new(v210(12, 2), rgb(12, 4, PixelFormat::Rgb8), host_config());
        assert!(matches!(err, Err(FramecastError::Configuration(_))));
    }

    #[test]
    fn test_passthrough_copies_bytes() {
        let format = v210(12, 2);
        let mut converter = FormatConverter::new(format, format, host_config()).unwrap();
        let mut ctx = ContextToken::host("test");

        let input = gray_frame(format, [64, 200, 400, 600, 800, 940]);
        let mut output = Frame::new(format, FrameTime::ZERO);
        converter.convert(&mut ctx, &input, &mut output).unwrap();
        assert_eq!(output.data(), input.data());
    }

    #[test]
    fn test_nominal_black_and_white_decode() {
        let in_fmt = v210(6, 1);
        let out_fmt = rgb(6, 1, PixelFormat::Rgb8);
        let mut converter = FormatConverter::new(in_fmt, out_fmt, host_config()).unwrap();
        let mut ctx = ContextToken::host("test");

        // Luma at nominal black (64) and white (940), chroma neutral.
        let input = gray_frame(in_fmt, [64, 940, 64, 940, 64, 940]);
        let mut output = Frame::new(out_fmt, FrameTime::ZERO);
        converter.convert(&mut ctx, &input, &mut output).unwrap();

        let data = output.data();
        assert_eq!(&data[0..3], &[0, 0, 0]);
        assert_eq!(&data[3..6], &[255, 255, 255]);
    }

    #[test]
    fn test_gray_round_trip_is_exact() {
        // Neutral-chroma values stay inside gamut, so decode -> encode
        // reproduces the original codes exactly.
        let packed = v210(12, 2);
        let rgbaf = rgb(12, 2, PixelFormat::RgbaF32);

        let mut decode = FormatConverter::new(packed, rgbaf, host_config()).unwrap();
        let mut encode = FormatConverter::new(rgbaf, packed, host_config()).unwrap();
        let mut ctx = ContextToken::host("test");

        let input = gray_frame(packed, [64, 172, 350, 512, 700, 940]);
        let mut mid = Frame::new(rgbaf, FrameTime::ZERO);
        let mut back = Frame::new(packed, FrameTime::ZERO);
        decode.convert(&mut ctx, &input, &mut mid).unwrap();
        encode.convert(&mut ctx, &mid, &mut back).unwrap();

        assert_eq!(back.data(), input.data());
    }

    #[test]
    fn test_chroma_filter_changes_encode() {
        let rgba = rgb(6, 1, PixelFormat::Rgba8);
        let packed = v210(6, 1);

        let mut input = Frame::new(rgba, FrameTime::ZERO);
        // Alternate saturated red and blue so pair averaging matters.
        for (p, chunk) in input.data_mut().chunks_exact_mut(4).enumerate() {
            if p % 2 == 0 {
                chunk.copy_from_slice(&[255, 0, 0, 255]);
            } else {
                chunk.copy_from_slice(&[0, 0, 255, 255]);
            }
        }

        let mut ctx = ContextToken::host("test");
        let mut replicate_out = Frame::new(packed, FrameTime::ZERO);
        let mut average_out = Frame::new(packed, FrameTime::ZERO);

        let mut replicate = FormatConverter::new(
            rgba,
            packed,
            ConverterConfig {
                chroma_filter: ChromaFilter::Replicate,
                ..host_config()
            },
        )
        .unwrap();
        let mut average = FormatConverter::new(rgba, packed, host_config()).unwrap();

        replicate
            .convert(&mut ctx, &input, &mut replicate_out)
            .unwrap();
        average.convert(&mut ctx, &input, &mut average_out).unwrap();
        assert_ne!(replicate_out.data(), average_out.data());
    }

    #[test]
    fn test_format_mismatch_reported() {
        let in_fmt = v210(12, 2);
        let out_fmt = rgb(12, 2, PixelFormat::Rgb8);
        let mut converter = FormatConverter::new(in_fmt, out_fmt, host_config()).unwrap();
        let mut ctx = ContextToken::host("test");

        let wrong = Frame::new(rgb(12, 2, PixelFormat::Rgba8), FrameTime::ZERO);
        let mut output = Frame::new(out_fmt, FrameTime::ZERO);
        let err = converter.convert(&mut ctx, &wrong, &mut output);
        assert!(matches!(err, Err(FramecastError::DataValidation(_))));
    }

    #[test]
    fn test_invalid_frame_reported() {
        let in_fmt = v210(12, 2);
        let out_fmt = rgb(12, 2, PixelFormat::Rgb8);
        let mut converter = FormatConverter::new(in_fmt, out_fmt, host_config()).unwrap();
        let mut ctx = ContextToken::host("test");

        let invalid = Frame::placeholder(in_fmt);
        let mut output = Frame::new(out_fmt, FrameTime::ZERO);
        let err = converter.convert(&mut ctx, &invalid, &mut output);
        assert!(matches!(err, Err(FramecastError::DataValidation(_))));
    }
}
