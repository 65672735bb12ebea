// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Strata tests.
//!
//! [`MockDevice`] implements [`Device`] by recording every call, and panics
//! when the renderer breaks the pass brackets the trait documents. Memory
//! header downloads can be scripted to exercise the retry loop of the
//! compute stages.

// LINEBENDER LINT SET - lib.rs - v2
// See https://linebender.org/wiki/canonical-lints/
// These lints aren't included in Cargo.toml because they
// shouldn't apply to examples and tests
#![warn(unused_crate_dependencies)]
#![warn(clippy::print_stdout, clippy::print_stderr)]
// Targeting e.g. 32-bit means structs containing usize can give false positives for 64-bit.
#![cfg_attr(target_pointer_width = "64", warn(clippy::trivially_copy_pass_by_ref))]
// END LINEBENDER LINT SET
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
// The following lints are part of the Linebender standard set,
// but resolving them has been deferred for now.
#![allow(
    missing_debug_implementations,
    unreachable_pub,
    missing_docs,
    clippy::missing_assert_message,
    clippy::allow_attributes_without_reason
)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use strata::cpu::CpuBinding;
use strata::encoding::{MemoryHeader, TILE_HEIGHT, TILE_WIDTH};
use strata::{
    Buffer, BufferBinding, Caps, ComputeShader, DataType, Device, DeviceError, Features,
    InputLocation, IntPoint, IntRect, IntSize, LoadDesc, PipelineDesc, ShaderSource, Shaders,
    Texture, TextureFilter, TextureFormat, Timer,
};

/// Pixel color the CPU `kernel4` fixture writes.
pub const KERNEL4_COLOR: [u8; 4] = [255, 0, 0, 255];

/// A recorded [`Device`] call. Resources are identified by creation order.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    BeginFrame {
        clear: bool,
        viewport: IntSize,
        framebuffer: u32,
    },
    EndFrame,
    NewTexture {
        id: u32,
        format: TextureFormat,
        size: IntSize,
        bindings: BufferBinding,
    },
    NewBuffer {
        id: u32,
        binding: BufferBinding,
        size: usize,
    },
    UploadBuffer {
        id: u32,
        len: usize,
        zeroed: bool,
    },
    DownloadBuffer {
        id: u32,
    },
    UploadTexture {
        id: u32,
        offset: IntPoint,
        size: IntSize,
    },
    Viewport(IntRect),
    DrawArrays {
        offset: u32,
        count: u32,
    },
    BeginRenderPass {
        target: u32,
        load: LoadDesc,
    },
    EndRenderPass,
    PrepareTexture(u32),
    BindProgram(u32),
    BindPipeline(u32),
    BindTexture {
        unit: u32,
        texture: u32,
    },
    BindVertexBuffer(u32),
    BindImageTexture {
        unit: u32,
        texture: u32,
    },
    BindUniforms(u32),
    BindStorageBuffer {
        binding: u32,
        buffer: u32,
    },
    BeginCompute,
    EndCompute,
    CopyTexture {
        dst: u32,
        dst_origin: IntPoint,
        src: u32,
        src_rect: IntRect,
    },
    Dispatch([u32; 3]),
}

/// Scripted result of a memory header download.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Download {
    /// Reports `mem_error` in the header.
    Error(u32),
    ContentLost,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Pass {
    None,
    Render,
    Compute,
}

struct State {
    calls: RefCell<Vec<Call>>,
    next_id: Cell<u32>,
    downloads: RefCell<VecDeque<Download>>,
}

impl State {
    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn next_id(&self) -> u32 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }
}

pub struct MockTexture {
    id: u32,
    size: IntSize,
    pixels: RefCell<Vec<u8>>,
    state: Rc<State>,
}

impl MockTexture {
    fn new(state: &Rc<State>, size: IntSize) -> Self {
        let len = size.width as usize * size.height as usize * 4;
        Self {
            id: state.next_id(),
            size,
            pixels: RefCell::new(vec![0; len]),
            state: state.clone(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn size(&self) -> IntSize {
        self.size
    }

    /// The pixel at `(x, y)`.
    pub fn pixel(&self, x: i32, y: i32) -> [u8; 4] {
        let i = (y * self.size.width + x) as usize * 4;
        let pixels = self.pixels.borrow();
        [pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]]
    }

    fn row_offset(&self, x: i32, y: i32) -> usize {
        assert!(
            x >= 0 && y >= 0 && x < self.size.width && y < self.size.height,
            "({x}, {y}) outside of texture {} ({:?})",
            self.id,
            self.size
        );
        (y * self.size.width + x) as usize * 4
    }
}

impl Texture for MockTexture {
    fn upload(&self, offset: IntPoint, size: IntSize, pixels: &[u8], stride: usize) {
        self.state.record(Call::UploadTexture {
            id: self.id,
            offset,
            size,
        });
        let row = size.width as usize * 4;
        let mut dst = self.pixels.borrow_mut();
        for y in 0..size.height {
            let start = self.row_offset(offset.x, offset.y + y);
            let src = y as usize * stride;
            dst[start..start + row].copy_from_slice(&pixels[src..src + row]);
        }
    }

    fn read_pixels(
        &self,
        rect: IntRect,
        pixels: &mut [u8],
        stride: usize,
    ) -> Result<(), DeviceError> {
        let row = rect.width() as usize * 4;
        let src = self.pixels.borrow();
        for y in 0..rect.height() {
            let start = self.row_offset(rect.min.x, rect.min.y + y);
            let dst = y as usize * stride;
            pixels[dst..dst + row].copy_from_slice(&src[start..start + row]);
        }
        Ok(())
    }
}

pub struct MockBuffer {
    id: u32,
    data: RefCell<Vec<u8>>,
    state: Rc<State>,
}

impl Buffer for MockBuffer {
    fn upload(&self, data: &[u8]) {
        self.state.record(Call::UploadBuffer {
            id: self.id,
            len: data.len(),
            zeroed: data.iter().all(|&b| b == 0),
        });
        let mut dst = self.data.borrow_mut();
        assert!(data.len() <= dst.len(), "upload overflows buffer {}", self.id);
        dst[..data.len()].copy_from_slice(data);
    }

    fn download(&self, data: &mut [u8]) -> Result<(), DeviceError> {
        self.state.record(Call::DownloadBuffer { id: self.id });
        let src = self.data.borrow();
        data.copy_from_slice(&src[..data.len()]);
        match self.state.downloads.borrow_mut().pop_front() {
            None => Ok(()),
            Some(Download::ContentLost) => Err(DeviceError::ContentLost),
            Some(Download::Error(code)) => {
                // The error field follows the offset.
                let field = size_of::<u32>();
                if data.len() >= size_of::<MemoryHeader>() {
                    data[field..field * 2].copy_from_slice(&code.to_le_bytes());
                }
                Ok(())
            }
        }
    }
}

/// A timer that reports 100µs once ended.
#[derive(Debug, Default)]
pub struct MockTimer {
    ended: bool,
}

impl Timer for MockTimer {
    fn begin(&mut self) {
        self.ended = false;
    }

    fn end(&mut self) {
        self.ended = true;
    }

    fn duration(&mut self) -> Option<Duration> {
        self.ended.then_some(Duration::from_micros(100))
    }
}

/// A [`Device`] that records its calls.
pub struct MockDevice {
    caps: Caps,
    state: Rc<State>,
    pass: Pass,
    in_frame: bool,
}

impl MockDevice {
    pub fn new(caps: Caps) -> Self {
        Self {
            caps,
            state: Rc::new(State {
                calls: RefCell::new(Vec::new()),
                next_id: Cell::new(1),
                downloads: RefCell::new(VecDeque::new()),
            }),
            pass: Pass::None,
            in_frame: false,
        }
    }

    /// A device with compute support and timers.
    pub fn gpu() -> Self {
        Self::new(Caps {
            bottom_left_origin: false,
            features: Features {
                timers: true,
                float_render_targets: true,
                compute: true,
                srgb: true,
            },
            max_texture_size: 8192,
        })
    }

    /// A device without compute support.
    pub fn without_compute() -> Self {
        Self::new(Caps {
            bottom_left_origin: false,
            features: Features::default(),
            max_texture_size: 8192,
        })
    }

    /// Queues results for the next memory header downloads. Downloads
    /// without a scripted result report success.
    pub fn script_downloads(&self, downloads: impl IntoIterator<Item = Download>) {
        self.state.downloads.borrow_mut().extend(downloads);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.borrow().clone()
    }

    /// Returns and forgets the calls recorded so far.
    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.state.calls.borrow_mut())
    }

    /// Number of recorded calls matching `f`.
    pub fn count(&self, f: impl Fn(&Call) -> bool) -> usize {
        self.state.calls.borrow().iter().filter(|c| f(c)).count()
    }

    fn expect_pass(&self, pass: Pass, what: &str) {
        assert_eq!(self.pass, pass, "{what} in {:?} pass", self.pass);
    }
}

impl Device for MockDevice {
    type Texture = MockTexture;
    type Buffer = MockBuffer;
    type Program = u32;
    type VertexShader = ();
    type FragmentShader = ();
    type Pipeline = u32;
    type Timer = MockTimer;
    type RenderTarget = ();

    fn begin_frame(
        &mut self,
        _target: &(),
        clear: bool,
        viewport: IntSize,
    ) -> Result<MockTexture, DeviceError> {
        assert!(!self.in_frame, "nested frame");
        self.in_frame = true;
        let framebuffer = MockTexture::new(&self.state, viewport);
        self.state.record(Call::BeginFrame {
            clear,
            viewport,
            framebuffer: framebuffer.id,
        });
        Ok(framebuffer)
    }

    fn end_frame(&mut self) {
        assert!(self.in_frame, "end_frame without begin_frame");
        self.expect_pass(Pass::None, "end_frame");
        self.in_frame = false;
        self.state.record(Call::EndFrame);
    }

    fn caps(&self) -> Caps {
        self.caps
    }

    fn new_timer(&mut self) -> MockTimer {
        MockTimer::default()
    }

    fn is_time_continuous(&self) -> bool {
        true
    }

    fn new_texture(
        &mut self,
        format: TextureFormat,
        width: u32,
        height: u32,
        _min_filter: TextureFilter,
        _mag_filter: TextureFilter,
        bindings: BufferBinding,
    ) -> Result<MockTexture, DeviceError> {
        let size = IntSize::new(width as i32, height as i32);
        let max = self.caps.max_texture_size;
        if width > max || height > max {
            return Err(DeviceError::Creation(format!("texture too large: {size:?}")));
        }
        let texture = MockTexture::new(&self.state, size);
        self.state.record(Call::NewTexture {
            id: texture.id,
            format,
            size,
            bindings,
        });
        Ok(texture)
    }

    fn new_immutable_buffer(
        &mut self,
        binding: BufferBinding,
        data: &[u8],
    ) -> Result<MockBuffer, DeviceError> {
        let buffer = self.new_buffer(binding, data.len())?;
        buffer.data.borrow_mut().copy_from_slice(data);
        Ok(buffer)
    }

    fn new_buffer(&mut self, binding: BufferBinding, size: usize) -> Result<MockBuffer, DeviceError> {
        let id = self.state.next_id();
        self.state.record(Call::NewBuffer { id, binding, size });
        Ok(MockBuffer {
            id,
            data: RefCell::new(vec![0; size]),
            state: self.state.clone(),
        })
    }

    fn new_compute_program(&mut self, source: &ShaderSource) -> Result<u32, DeviceError> {
        if !self.caps.features.compute {
            return Err(DeviceError::Unsupported("compute programs"));
        }
        assert!(!source.name.is_empty(), "unnamed compute program");
        Ok(self.state.next_id())
    }

    fn new_vertex_shader(&mut self, _source: &ShaderSource) -> Result<(), DeviceError> {
        Ok(())
    }

    fn new_fragment_shader(&mut self, _source: &ShaderSource) -> Result<(), DeviceError> {
        Ok(())
    }

    fn new_pipeline(&mut self, _: &(), _: &(), _desc: &PipelineDesc) -> Result<u32, DeviceError> {
        Ok(self.state.next_id())
    }

    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.state
            .record(Call::Viewport(IntRect::new(x, y, x + width, y + height)));
    }

    fn draw_arrays(&mut self, offset: u32, count: u32) {
        self.expect_pass(Pass::Render, "draw_arrays");
        self.state.record(Call::DrawArrays { offset, count });
    }

    fn draw_elements(&mut self, offset: u32, count: u32) {
        self.expect_pass(Pass::Render, "draw_elements");
        self.state.record(Call::DrawArrays { offset, count });
    }

    fn begin_render_pass(&mut self, target: &MockTexture, load: LoadDesc) {
        self.expect_pass(Pass::None, "begin_render_pass");
        self.pass = Pass::Render;
        self.state.record(Call::BeginRenderPass {
            target: target.id,
            load,
        });
    }

    fn end_render_pass(&mut self) {
        self.expect_pass(Pass::Render, "end_render_pass");
        self.pass = Pass::None;
        self.state.record(Call::EndRenderPass);
    }

    fn prepare_texture(&mut self, texture: &MockTexture) {
        self.expect_pass(Pass::None, "prepare_texture");
        self.state.record(Call::PrepareTexture(texture.id));
    }

    fn bind_program(&mut self, program: &u32) {
        self.expect_pass(Pass::Compute, "bind_program");
        self.state.record(Call::BindProgram(*program));
    }

    fn bind_pipeline(&mut self, pipeline: &u32) {
        self.expect_pass(Pass::Render, "bind_pipeline");
        self.state.record(Call::BindPipeline(*pipeline));
    }

    fn bind_texture(&mut self, unit: u32, texture: &MockTexture) {
        self.state.record(Call::BindTexture {
            unit,
            texture: texture.id,
        });
    }

    fn bind_vertex_buffer(&mut self, buffer: &MockBuffer, _offset: usize) {
        self.state.record(Call::BindVertexBuffer(buffer.id));
    }

    fn bind_index_buffer(&mut self, _buffer: &MockBuffer) {}

    fn bind_image_texture(&mut self, unit: u32, texture: &MockTexture) {
        self.expect_pass(Pass::Compute, "bind_image_texture");
        self.state.record(Call::BindImageTexture {
            unit,
            texture: texture.id,
        });
    }

    fn bind_uniforms(&mut self, buffer: &MockBuffer) {
        self.state.record(Call::BindUniforms(buffer.id));
    }

    fn bind_storage_buffer(&mut self, binding: u32, buffer: &MockBuffer) {
        self.state.record(Call::BindStorageBuffer {
            binding,
            buffer: buffer.id,
        });
    }

    fn begin_compute(&mut self) {
        self.expect_pass(Pass::None, "begin_compute");
        self.pass = Pass::Compute;
        self.state.record(Call::BeginCompute);
    }

    fn end_compute(&mut self) {
        self.expect_pass(Pass::Compute, "end_compute");
        self.pass = Pass::None;
        self.state.record(Call::EndCompute);
    }

    fn copy_texture(
        &mut self,
        dst: &MockTexture,
        dst_origin: IntPoint,
        src: &MockTexture,
        src_rect: IntRect,
    ) {
        self.expect_pass(Pass::None, "copy_texture");
        self.state.record(Call::CopyTexture {
            dst: dst.id,
            dst_origin,
            src: src.id,
            src_rect,
        });
        let stride = src_rect.width() as usize * 4;
        let mut pixels = vec![0; stride * src_rect.height() as usize];
        if src.read_pixels(src_rect, &mut pixels, stride).is_ok() {
            let mut dst_pixels = dst.pixels.borrow_mut();
            for y in 0..src_rect.height() {
                let start = dst.row_offset(dst_origin.x, dst_origin.y + y);
                let row = y as usize * stride;
                dst_pixels[start..start + stride].copy_from_slice(&pixels[row..row + stride]);
            }
        }
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        self.expect_pass(Pass::Compute, "dispatch_compute");
        self.state.record(Call::Dispatch([x, y, z]));
    }
}

fn source(name: &'static str, inputs: &[(&str, DataType, u32)]) -> ShaderSource {
    ShaderSource {
        name: name.into(),
        inputs: inputs
            .iter()
            .enumerate()
            .map(|(i, &(name, data_type, size))| InputLocation {
                name: name.to_owned(),
                location: i as u32,
                data_type,
                size,
            })
            .collect(),
        code: Vec::new().into(),
    }
}

fn stage(name: &'static str, cpu: Option<strata::cpu::CpuKernel>) -> ComputeShader {
    ComputeShader {
        source: source(name, &[]),
        cpu,
    }
}

fn noop_kernel(_workgroup: [u32; 3], _bindings: &[CpuBinding]) {}

/// Fills the workgroup's tile of the output image with [`KERNEL4_COLOR`].
fn fill_kernel(workgroup: [u32; 3], bindings: &[CpuBinding]) {
    let image = bindings[2].as_image();
    let size = image.size();
    let x0 = (workgroup[0] * TILE_WIDTH) as i32;
    let y0 = (workgroup[1] * TILE_HEIGHT) as i32;
    for y in y0..(y0 + TILE_HEIGHT as i32).min(size.height) {
        for x in x0..(x0 + TILE_WIDTH as i32).min(size.width) {
            image.store(x, y, KERNEL4_COLOR);
        }
    }
}

/// Shaders for the mock device, with CPU kernels when `cpu` is set.
pub fn shaders(cpu: bool) -> Shaders {
    let kernel = |k: strata::cpu::CpuKernel| cpu.then_some(k);
    let quad_inputs = [("pos", DataType::Float, 2), ("uv", DataType::Float, 2)];
    Shaders {
        elements: stage("elements", kernel(noop_kernel)),
        tile_alloc: stage("tile_alloc", kernel(noop_kernel)),
        path_coarse: stage("path_coarse", kernel(noop_kernel)),
        backdrop: stage("backdrop", kernel(noop_kernel)),
        binning: stage("binning", kernel(noop_kernel)),
        coarse: stage("coarse", kernel(noop_kernel)),
        kernel4: stage("kernel4", kernel(fill_kernel)),
        copy_vert: source("copy.vert", &quad_inputs),
        copy_frag: source("copy.frag", &[]),
        material_vert: source("material.vert", &quad_inputs),
        material_frag: source("material.frag", &[]),
    }
}

/// Creates an empty directory for test output under the system temporary
/// directory.
pub fn output_dir(name: &str) -> Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!("strata_tests-{}-{name}", std::process::id()));
    if dir.exists() {
        std::fs::remove_dir_all(&dir).context("removing stale output")?;
    }
    std::fs::create_dir_all(&dir).context("creating output directory")?;
    Ok(dir)
}

/// Loads a PNG written by [`strata::Renderer::dump_atlases`].
pub fn read_png(path: &Path) -> Result<image::RgbaImage> {
    if !path.exists() {
        bail!("{} was not written", path.display());
    }
    Ok(image::open(path)?.into_rgba8())
}
