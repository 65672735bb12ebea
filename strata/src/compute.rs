// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Driver for the seven compute stages.
//!
//! The kernels share one `memory` buffer. Its start holds a [`MemoryHeader`]
//! followed by the static allocations of the [`Layout`]; the rest is handed
//! out by a bump allocator running on the GPU. When the GPU runs out of
//! memory it reports [`MEM_MALLOC_FAILED`] in the header, and the driver
//! grows the buffer and runs every stage again.

use std::num::NonZeroU32;
use std::sync::Arc;

use bytemuck::Zeroable;
use strata_encoding::{
    Encoding, IntPoint, IntSize, Layout, LayoutError, MemoryHeader, MEMORY_SIZE_BUMP,
    MEM_MALLOC_FAILED, MEM_NO_ERROR, PARTITION_SIZE, TILE_HEIGHT, TILE_WIDTH,
};

use crate::atlas::Atlas;
use crate::cpu::{CpuBinding, CpuBuffer, CpuImage, CpuKernel, Dispatcher};
use crate::device::{
    Buffer, BufferBinding, Device, DeviceError, Texture, TextureFilter, TextureFormat,
};
use crate::shaders::{ComputeShader, Shaders};
use crate::{Error, Result};

/// Image unit of the kernel4 output.
const KERNEL4_OUTPUT_UNIT: u32 = 2;
/// Image unit of the kernel4 materials atlas.
const KERNEL4_ATLAS_UNIT: u32 = 3;

const STORAGE: BufferBinding = BufferBinding::SHADER_STORAGE_READ;
const STORAGE_RW: BufferBinding =
    BufferBinding::SHADER_STORAGE_READ.union(BufferBinding::SHADER_STORAGE_WRITE);

/// A buffer on the GPU, or its equivalent CPU memory.
#[derive(Debug)]
pub(crate) enum SizedBuffer<B> {
    Empty,
    Gpu {
        buffer: B,
        size: usize,
    },
    Cpu(Arc<CpuBuffer>),
}

impl<B> Default for SizedBuffer<B> {
    fn default() -> Self {
        Self::Empty
    }
}

impl<B: Buffer> SizedBuffer<B> {
    pub fn size(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Gpu { size, .. } => *size,
            Self::Cpu(buf) => buf.size(),
        }
    }

    /// Replaces the buffer with one of exactly `size` bytes, unless it is
    /// already large enough. The contents are not preserved.
    pub fn ensure_capacity<D: Device<Buffer = B>>(
        &mut self,
        use_cpu: bool,
        ctx: &mut D,
        binding: BufferBinding,
        size: usize,
    ) -> Result<(), DeviceError> {
        if self.size() >= size {
            return Ok(());
        }
        *self = Self::Empty;
        *self = if use_cpu {
            Self::Cpu(Arc::new(CpuBuffer::new(size)))
        } else {
            Self::Gpu {
                buffer: ctx.new_buffer(binding, size)?,
                size,
            }
        };
        Ok(())
    }

    pub fn upload(&self, data: &[u8]) {
        match self {
            Self::Empty => {}
            Self::Gpu { buffer, .. } => buffer.upload(data),
            Self::Cpu(buf) => buf.upload(data),
        }
    }

    pub fn download(&self, data: &mut [u8]) -> Result<(), DeviceError> {
        match self {
            Self::Empty => Ok(()),
            Self::Gpu { buffer, .. } => buffer.download(data),
            Self::Cpu(buf) => {
                buf.download(data);
                Ok(())
            }
        }
    }

    pub fn gpu(&self) -> Option<&B> {
        match self {
            Self::Gpu { buffer, .. } => Some(buffer),
            _ => None,
        }
    }

    fn cpu_binding(&self) -> Option<CpuBinding> {
        match self {
            Self::Cpu(buf) => Some(CpuBinding::Buffer(buf.clone())),
            _ => None,
        }
    }
}

/// A compute program, or its equivalent CPU implementation.
#[derive(Debug)]
pub(crate) enum ComputeProgram<P> {
    Gpu(P),
    Cpu(CpuKernel),
}

#[derive(Debug)]
struct Programs<P> {
    elements: ComputeProgram<P>,
    tile_alloc: ComputeProgram<P>,
    path_coarse: ComputeProgram<P>,
    backdrop: ComputeProgram<P>,
    binning: ComputeProgram<P>,
    coarse: ComputeProgram<P>,
    kernel4: ComputeProgram<P>,
}

#[derive(Debug)]
struct Buffers<B> {
    config: SizedBuffer<B>,
    scene: SizedBuffer<B>,
    state: SizedBuffer<B>,
    memory: SizedBuffer<B>,
}

impl<B> Default for Buffers<B> {
    fn default() -> Self {
        Self {
            config: SizedBuffer::Empty,
            scene: SizedBuffer::Empty,
            state: SizedBuffer::Empty,
            memory: SizedBuffer::Empty,
        }
    }
}

/// Where the stages run.
enum Backend<D: Device> {
    Gpu {
        /// Bound in place of a missing materials atlas.
        null_materials: D::Texture,
    },
    Cpu {
        dispatcher: Dispatcher,
        null_materials: Arc<CpuImage>,
    },
}

/// Runs the compute stages for one output region at a time.
pub(crate) struct ComputeDriver<D: Device> {
    programs: Programs<D::Program>,
    buffers: Buffers<D::Buffer>,
    backend: Backend<D>,
    max_memory_retries: Option<NonZeroU32>,
    zeros: Vec<u8>,
}

impl<D: Device> std::fmt::Debug for ComputeDriver<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeDriver")
            .field("use_cpu", &self.use_cpu())
            .field("memory_size", &self.buffers.memory.size())
            .field("max_memory_retries", &self.max_memory_retries)
            .finish_non_exhaustive()
    }
}

/// The CPU resources of one dispatch attempt.
struct CpuBindings {
    elements: Arc<[CpuBinding]>,
    common: Arc<[CpuBinding]>,
    kernel4: Arc<[CpuBinding]>,
}

impl<D: Device> ComputeDriver<D> {
    /// Creates the compute programs on the GPU.
    pub fn new_gpu(
        ctx: &mut D,
        shaders: &Shaders,
        max_memory_retries: Option<NonZeroU32>,
    ) -> Result<Self> {
        let mut program = |stage: &ComputeShader| {
            ctx.new_compute_program(&stage.source).map(ComputeProgram::Gpu)
        };
        let programs = Programs {
            elements: program(&shaders.elements)?,
            tile_alloc: program(&shaders.tile_alloc)?,
            path_coarse: program(&shaders.path_coarse)?,
            backdrop: program(&shaders.backdrop)?,
            binning: program(&shaders.binning)?,
            coarse: program(&shaders.coarse)?,
            kernel4: program(&shaders.kernel4)?,
        };
        let null_materials = ctx.new_texture(
            TextureFormat::Rgba8,
            1,
            1,
            TextureFilter::Nearest,
            TextureFilter::Nearest,
            BufferBinding::SHADER_STORAGE_READ,
        )?;
        Ok(Self {
            programs,
            buffers: Buffers::default(),
            backend: Backend::Gpu { null_materials },
            max_memory_retries,
            zeros: Vec::new(),
        })
    }

    /// Runs the stages on the CPU kernels of `shaders`.
    pub fn new_cpu(
        shaders: &Shaders,
        dispatcher: Dispatcher,
        max_memory_retries: Option<NonZeroU32>,
    ) -> Result<Self> {
        let kernel = |stage: &ComputeShader| {
            stage.cpu.map(ComputeProgram::Cpu).ok_or(Error::MissingCompute)
        };
        let programs = Programs {
            elements: kernel(&shaders.elements)?,
            tile_alloc: kernel(&shaders.tile_alloc)?,
            path_coarse: kernel(&shaders.path_coarse)?,
            backdrop: kernel(&shaders.backdrop)?,
            binning: kernel(&shaders.binning)?,
            coarse: kernel(&shaders.coarse)?,
            kernel4: kernel(&shaders.kernel4)?,
        };
        Ok(Self {
            programs,
            buffers: Buffers::default(),
            backend: Backend::Cpu {
                dispatcher,
                null_materials: Arc::new(CpuImage::new(IntSize::new(1, 1))),
            },
            max_memory_retries,
            zeros: Vec::new(),
        })
    }

    pub fn use_cpu(&self) -> bool {
        matches!(self.backend, Backend::Cpu { .. })
    }

    /// Current size of the memory buffer.
    pub fn memory_size(&self) -> usize {
        self.buffers.memory.size()
    }

    /// Rasterizes `enc` into the top left `tile_dims` tiles of `dst`,
    /// sampling images from `materials`.
    ///
    /// `enc` is padded to a whole number of partitions.
    pub fn render(
        &mut self,
        ctx: &mut D,
        enc: &mut Encoding,
        materials: Option<&Atlas<D::Texture>>,
        dst: &Atlas<D::Texture>,
        tile_dims: IntSize,
    ) -> Result<()> {
        let (tiles_x, tiles_y) = (tile_dims.width as u32, tile_dims.height as u32);
        enc.pad_to_partition(PARTITION_SIZE as usize);
        let layout = Layout::new(enc, tiles_x, tiles_y).map_err(layout_error)?;
        let use_cpu = self.use_cpu();

        let scene = enc.scene_bytes();
        if scene.len() > self.buffers.scene.size() {
            let padded = scene.len() * 11 / 10;
            self.buffers
                .scene
                .ensure_capacity(use_cpu, ctx, STORAGE, padded)?;
        }
        self.buffers.scene.upload(scene);

        let state_size = layout.state_size() as usize;
        if state_size > self.buffers.state.size() {
            let padded = state_size * 11 / 10;
            self.buffers
                .state
                .ensure_capacity(use_cpu, ctx, STORAGE_RW, padded)?;
        }

        let config = bytemuck::bytes_of(&layout.config);
        self.buffers
            .config
            .ensure_capacity(use_cpu, ctx, STORAGE, config.len())?;
        self.buffers.config.upload(config);

        let min_size = layout.memory_min_size() as usize;
        if min_size > self.buffers.memory.size() {
            // Leave room for the GPU's own allocations.
            let size = min_size + MEMORY_SIZE_BUMP as usize;
            log::debug!("memory buffer grows to {size} bytes");
            self.buffers
                .memory
                .ensure_capacity(use_cpu, ctx, STORAGE_RW, size)?;
        }

        if self.zeros.len() < state_size {
            self.zeros.resize(state_size, 0);
        }
        let counts = layout.workgroup_counts;
        let mut retries = 0;
        loop {
            self.buffers
                .memory
                .upload(bytemuck::bytes_of(&layout.memory_header()));
            self.buffers.state.upload(&self.zeros[..state_size]);

            let cpu_bindings = match &self.backend {
                Backend::Gpu { null_materials } => {
                    ctx.begin_compute();
                    if let Some(tex) = dst.texture() {
                        ctx.bind_image_texture(KERNEL4_OUTPUT_UNIT, tex);
                    }
                    let images = materials.and_then(Atlas::texture).unwrap_or(null_materials);
                    ctx.bind_image_texture(KERNEL4_ATLAS_UNIT, images);
                    None
                }
                Backend::Cpu { null_materials, .. } => {
                    // Invariant: atlases realized for the CPU own an image.
                    let Some(dst_image) = dst.cpu_image() else {
                        panic!("output atlas realized without a CPU image");
                    };
                    let images = materials
                        .and_then(Atlas::cpu_image)
                        .unwrap_or(null_materials);
                    Some(self.cpu_bindings(dst_image, images))
                }
            };
            self.bind_buffers(ctx);

            self.barrier()?;
            self.dispatch(ctx, Stage::Elements, &cpu_bindings, counts.elements);
            self.barrier()?;
            self.dispatch(ctx, Stage::TileAlloc, &cpu_bindings, counts.tile_alloc);
            self.barrier()?;
            self.dispatch(ctx, Stage::PathCoarse, &cpu_bindings, counts.path_coarse);
            self.barrier()?;
            self.dispatch(ctx, Stage::Backdrop, &cpu_bindings, counts.backdrop);
            // Binning doesn't read what backdrop writes.
            self.dispatch(ctx, Stage::Binning, &cpu_bindings, counts.binning);
            self.barrier()?;
            self.dispatch(ctx, Stage::Coarse, &cpu_bindings, counts.coarse);
            self.barrier()?;
            self.dispatch(ctx, Stage::Kernel4, &cpu_bindings, counts.kernel4);
            self.barrier()?;
            if !use_cpu {
                ctx.end_compute();
            }

            let mut header = MemoryHeader::zeroed();
            match self
                .buffers
                .memory
                .download(bytemuck::bytes_of_mut(&mut header))
            {
                Ok(()) => {}
                Err(DeviceError::ContentLost) => {
                    log::warn!("memory header lost, dispatching again");
                    self.count_retry(&mut retries)?;
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
            match header.mem_error {
                MEM_NO_ERROR => {
                    if use_cpu {
                        if let (Some(image), Some(tex)) = (dst.cpu_image(), dst.texture()) {
                            let size = IntSize::new(
                                (tiles_x * TILE_WIDTH) as i32,
                                (tiles_y * TILE_HEIGHT) as i32,
                            );
                            tex.upload(IntPoint::ZERO, size, &image.to_bytes(), image.stride());
                        }
                    }
                    return Ok(());
                }
                MEM_MALLOC_FAILED => {
                    self.count_retry(&mut retries)?;
                    let size = self.buffers.memory.size() * 15 / 10;
                    log::warn!("GPU memory exhausted, retrying with {size} bytes");
                    self.buffers
                        .memory
                        .ensure_capacity(use_cpu, ctx, STORAGE_RW, size)?;
                }
                code => return Err(Error::ShaderFailed(code)),
            }
        }
    }

    fn count_retry(&self, retries: &mut u32) -> Result<()> {
        if let Some(max) = self.max_memory_retries {
            if *retries >= max.get() {
                return Err(Error::MemoryRetriesExhausted(*retries));
            }
        }
        *retries += 1;
        Ok(())
    }

    fn cpu_bindings(&self, dst: &Arc<CpuImage>, materials: &Arc<CpuImage>) -> CpuBindings {
        let b = &self.buffers;
        let common: Vec<CpuBinding> = [&b.memory, &b.config]
            .into_iter()
            .filter_map(SizedBuffer::cpu_binding)
            .collect();
        let elements: Vec<CpuBinding> = [&b.memory, &b.config, &b.scene, &b.state]
            .into_iter()
            .filter_map(SizedBuffer::cpu_binding)
            .collect();
        let mut kernel4 = common.clone();
        kernel4.push(CpuBinding::Image(dst.clone()));
        kernel4.push(CpuBinding::Image(materials.clone()));
        CpuBindings {
            elements: elements.into(),
            common: common.into(),
            kernel4: kernel4.into(),
        }
    }

    /// Binds `memory`, `config`, `scene` and `state` to storage slots 0 to 3.
    /// Grown buffers are new resources, so this runs before every attempt.
    fn bind_buffers(&self, ctx: &mut D) {
        let b = &self.buffers;
        for (slot, buf) in [&b.memory, &b.config, &b.scene, &b.state]
            .into_iter()
            .enumerate()
        {
            if let Some(buffer) = buf.gpu() {
                ctx.bind_storage_buffer(slot as u32, buffer);
            }
        }
    }

    /// Makes the writes of the previous stage visible to the next. Compute
    /// passes on the GPU order their dispatches already.
    fn barrier(&self) -> Result<()> {
        match &self.backend {
            Backend::Cpu { dispatcher, .. } => dispatcher.barrier(),
            Backend::Gpu { .. } => Ok(()),
        }
    }

    fn dispatch(
        &self,
        ctx: &mut D,
        stage: Stage,
        cpu_bindings: &Option<CpuBindings>,
        (x, y, z): (u32, u32, u32),
    ) {
        let p = &self.programs;
        let program = match stage {
            Stage::Elements => &p.elements,
            Stage::TileAlloc => &p.tile_alloc,
            Stage::PathCoarse => &p.path_coarse,
            Stage::Backdrop => &p.backdrop,
            Stage::Binning => &p.binning,
            Stage::Coarse => &p.coarse,
            Stage::Kernel4 => &p.kernel4,
        };
        match (program, &self.backend, cpu_bindings) {
            (ComputeProgram::Gpu(program), _, _) => {
                ctx.bind_program(program);
                ctx.dispatch_compute(x, y, z);
            }
            (ComputeProgram::Cpu(kernel), Backend::Cpu { dispatcher, .. }, Some(bindings)) => {
                let bindings = match stage {
                    Stage::Elements => &bindings.elements,
                    Stage::Kernel4 => &bindings.kernel4,
                    _ => &bindings.common,
                };
                dispatcher.dispatch(*kernel, bindings, [x, y, z]);
            }
            (ComputeProgram::Cpu(_), _, _) => {
                unreachable!("CPU kernel without a CPU backend");
            }
        }
    }
}

#[derive(Copy, Clone, Debug)]
enum Stage {
    Elements,
    TileAlloc,
    PathCoarse,
    Backdrop,
    Binning,
    Coarse,
    Kernel4,
}

fn layout_error(err: LayoutError) -> Error {
    match err {
        LayoutError::OutputTooLarge { width, height } => Error::OutputTooLarge { width, height },
    }
}
