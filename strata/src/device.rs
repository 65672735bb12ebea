// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The capability interface of a GPU backend.
//!
//! The renderer drives the GPU only through [`Device`]. Resources are owned
//! values of the device's associated types and are released when dropped.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::time::Duration;

use strata_encoding::{IntPoint, IntRect, IntSize};

use crate::shaders::{DataType, ShaderSource};
use crate::{Error, Result};

/// Errors reported by a [`Device`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum DeviceError {
    /// The device was lost and must be recreated.
    #[error("GPU device lost")]
    DeviceLost,
    /// The contents of a buffer were lost before they could be read. The
    /// operation that produced them may be retried.
    #[error("buffer content lost")]
    ContentLost,
    /// The device lacks a required feature.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    /// A resource couldn't be created.
    #[error("resource creation failed: {0}")]
    Creation(String),
}

/// Usage mask of buffers and textures.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct BufferBinding(u8);

impl BufferBinding {
    pub const NONE: Self = Self(0);
    pub const INDICES: Self = Self(1 << 0);
    pub const VERTICES: Self = Self(1 << 1);
    pub const UNIFORMS: Self = Self(1 << 2);
    pub const TEXTURE: Self = Self(1 << 3);
    pub const FRAMEBUFFER: Self = Self(1 << 4);
    pub const SHADER_STORAGE_READ: Self = Self(1 << 5);
    pub const SHADER_STORAGE_WRITE: Self = Self(1 << 6);

    /// Reports whether every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// The bits set in either mask.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for BufferBinding {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for BufferBinding {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for BufferBinding {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for BufferBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [&str; 7] = [
            "INDICES",
            "VERTICES",
            "UNIFORMS",
            "TEXTURE",
            "FRAMEBUFFER",
            "SHADER_STORAGE_READ",
            "SHADER_STORAGE_WRITE",
        ];
        let mut first = true;
        write!(f, "BufferBinding(")?;
        for (i, name) in NAMES.iter().enumerate() {
            if self.0 & (1 << i) != 0 {
                if !first {
                    write!(f, " | ")?;
                }
                first = false;
                write!(f, "{name}")?;
            }
        }
        write!(f, ")")
    }
}

/// Optional device features.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Features {
    pub timers: bool,
    pub float_render_targets: bool,
    pub compute: bool,
    pub srgb: bool,
}

/// Device capabilities.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Caps {
    /// Whether the device has its origin in the lower left corner. Readbacks
    /// are flipped to match.
    pub bottom_left_origin: bool,
    pub features: Features,
    pub max_texture_size: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8-bit RGBA with sRGB encoding.
    Srgba,
    Float,
    /// 8-bit linear RGBA.
    Rgba8,
    /// The format of the output framebuffer.
    Output,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TextureFilter {
    #[default]
    Nearest,
    Linear,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum LoadAction {
    #[default]
    Keep,
    Clear,
    Invalidate,
}

/// How a render pass initializes its target.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct LoadDesc {
    pub action: LoadAction,
    /// Linear, premultiplied RGBA.
    pub clear_color: [f32; 4],
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Topology {
    TriangleStrip,
    #[default]
    Triangles,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BlendFactor {
    #[default]
    One,
    OneMinusSrcAlpha,
    Zero,
    DstColor,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BlendDesc {
    pub enable: bool,
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
}

/// A vertex attribute as laid out in a vertex buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InputDesc {
    pub data_type: DataType,
    /// Number of components.
    pub size: u32,
    /// Offset in bytes from the start of the vertex.
    pub offset: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VertexLayout {
    pub inputs: Vec<InputDesc>,
    pub stride: u32,
}

/// Fixed-function state of a render pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineDesc {
    pub vertex_layout: VertexLayout,
    pub blend: BlendDesc,
    pub pixel_format: TextureFormat,
    pub topology: Topology,
}

/// Checks that `desc` supplies exactly the vertex inputs `vertex` declares.
pub fn validate_pipeline(desc: &PipelineDesc, vertex: &ShaderSource) -> Result<()> {
    let provided = &desc.vertex_layout.inputs;
    let matches = provided.len() == vertex.inputs.len()
        && vertex
            .inputs
            .iter()
            .zip(provided)
            .all(|(decl, input)| decl.data_type == input.data_type && decl.size == input.size);
    if !matches {
        return Err(Error::InvalidPipeline {
            shader: vertex.name.to_string(),
            declared: vertex.inputs.len(),
            provided: provided.len(),
        });
    }
    Ok(())
}

/// A texture, usable as a render target.
pub trait Texture {
    /// Uploads `size` pixels at `offset`. `pixels` rows are `stride` bytes
    /// apart.
    fn upload(&self, offset: IntPoint, size: IntSize, pixels: &[u8], stride: usize);

    /// Reads the pixels in `rect` into `pixels`, with rows `stride` bytes apart.
    fn read_pixels(
        &self,
        rect: IntRect,
        pixels: &mut [u8],
        stride: usize,
    ) -> Result<(), DeviceError>;
}

pub trait Buffer {
    fn upload(&self, data: &[u8]);

    /// Downloads the start of the buffer into `data`.
    ///
    /// Fails with [`DeviceError::ContentLost`] when the contents were lost.
    fn download(&self, data: &mut [u8]) -> Result<(), DeviceError>;
}

/// A GPU timer query.
pub trait Timer {
    fn begin(&mut self);
    fn end(&mut self);
    /// The measured duration, once available.
    fn duration(&mut self) -> Option<Duration>;
}

/// Abstraction of a GPU API.
///
/// Render passes and compute passes are bracketed by `begin_*`/`end_*` pairs
/// that never nest. Frames are bracketed by [`Device::begin_frame`] and
/// [`Device::end_frame`].
pub trait Device {
    type Texture: Texture;
    type Buffer: Buffer;
    type Program;
    type VertexShader;
    type FragmentShader;
    type Pipeline;
    type Timer: Timer;
    /// Where frames are presented.
    type RenderTarget;

    /// Starts a frame and returns the framebuffer of `target`.
    ///
    /// Dropping the returned texture doesn't release the framebuffer.
    fn begin_frame(
        &mut self,
        target: &Self::RenderTarget,
        clear: bool,
        viewport: IntSize,
    ) -> Result<Self::Texture, DeviceError>;
    fn end_frame(&mut self);

    fn caps(&self) -> Caps;
    fn new_timer(&mut self) -> Self::Timer;
    /// Reports whether all timer measurements are valid at the point of call.
    fn is_time_continuous(&self) -> bool;

    fn new_texture(
        &mut self,
        format: TextureFormat,
        width: u32,
        height: u32,
        min_filter: TextureFilter,
        mag_filter: TextureFilter,
        bindings: BufferBinding,
    ) -> Result<Self::Texture, DeviceError>;
    fn new_immutable_buffer(
        &mut self,
        binding: BufferBinding,
        data: &[u8],
    ) -> Result<Self::Buffer, DeviceError>;
    fn new_buffer(
        &mut self,
        binding: BufferBinding,
        size: usize,
    ) -> Result<Self::Buffer, DeviceError>;
    fn new_compute_program(&mut self, source: &ShaderSource)
        -> Result<Self::Program, DeviceError>;
    fn new_vertex_shader(
        &mut self,
        source: &ShaderSource,
    ) -> Result<Self::VertexShader, DeviceError>;
    fn new_fragment_shader(
        &mut self,
        source: &ShaderSource,
    ) -> Result<Self::FragmentShader, DeviceError>;
    fn new_pipeline(
        &mut self,
        vertex: &Self::VertexShader,
        fragment: &Self::FragmentShader,
        desc: &PipelineDesc,
    ) -> Result<Self::Pipeline, DeviceError>;

    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32);
    fn draw_arrays(&mut self, offset: u32, count: u32);
    fn draw_elements(&mut self, offset: u32, count: u32);

    fn begin_render_pass(&mut self, target: &Self::Texture, load: LoadDesc);
    fn end_render_pass(&mut self);
    /// Prepares `texture` for sampling in the next render pass.
    fn prepare_texture(&mut self, texture: &Self::Texture);
    fn bind_program(&mut self, program: &Self::Program);
    fn bind_pipeline(&mut self, pipeline: &Self::Pipeline);
    fn bind_texture(&mut self, unit: u32, texture: &Self::Texture);
    fn bind_vertex_buffer(&mut self, buffer: &Self::Buffer, offset: usize);
    fn bind_index_buffer(&mut self, buffer: &Self::Buffer);
    fn bind_image_texture(&mut self, unit: u32, texture: &Self::Texture);
    fn bind_uniforms(&mut self, buffer: &Self::Buffer);
    fn bind_storage_buffer(&mut self, binding: u32, buffer: &Self::Buffer);

    fn begin_compute(&mut self);
    fn end_compute(&mut self);
    fn copy_texture(
        &mut self,
        dst: &Self::Texture,
        dst_origin: IntPoint,
        src: &Self::Texture,
        src_rect: IntRect,
    );
    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32);
}
