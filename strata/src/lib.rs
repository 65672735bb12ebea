// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Strata is a 2D renderer that rasterizes vector paths with a pipeline of
//! compute kernels, and falls back to running the same kernels on the CPU
//! when the GPU lacks compute support.
//!
//! Scenes are recorded into a [`Scene`] and drawn by a [`Renderer`]. The
//! renderer groups paint operations into layers and caches their rasterized
//! pixels in texture atlases, so content that doesn't change between frames
//! is only blitted, not rasterized again.
//!
//! The renderer drives the GPU through the [`Device`] trait, and treats the
//! kernels and shaders in [`Shaders`] as black boxes.
//!
//! ```ignore
//! let mut renderer = strata::Renderer::new(device, &shaders, RendererOptions::default())?;
//! let mut scene = strata::Scene::new();
//! scene.fill_rect(Rect::new(10.0, 10.0, 100.0, 50.0), Color::from_rgb8(255, 99, 71));
//! renderer.render(&scene, &target, IntSize::new(800, 600))?;
//! ```

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
#![allow(missing_docs, reason = "We have many as-yet undocumented items.")]
#![allow(
    clippy::cast_possible_truncation,
    clippy::missing_panics_doc,
    reason = "Deferred"
)]

mod atlas;
mod collect;
mod compute;
mod debug;
mod device;
mod layer;
mod materials;
mod packer;
mod render;
mod scene;
mod shaders;
mod timer;

pub mod cpu;

use std::num::{NonZeroU32, NonZeroUsize};

use thiserror::Error;

/// Styling and composition primitives.
pub use peniko;
/// 2D geometry, with a focus on curves.
pub use peniko::kurbo;

pub use strata_encoding as encoding;
pub use strata_encoding::{IntPoint, IntRect, IntSize, PathData, PathEncoder};

pub use atlas::{
    AllocId, AllocQuery, Allocation, Atlas, AtlasBackend, AtlasId, Atlases, COMBINED_BINDINGS,
    LAYER_BINDINGS, MATERIAL_BINDINGS, MAX_ALLOC_AGE, MAX_ATLAS_AGE,
};
pub use collect::{Collector, PaintOp};
pub use device::{
    validate_pipeline, BlendDesc, BlendFactor, Buffer, BufferBinding, Caps, Device, DeviceError,
    Features, InputDesc, LoadAction, LoadDesc, PipelineDesc, Texture, TextureFilter,
    TextureFormat, Timer, Topology, VertexLayout,
};
pub use layer::Layer;
pub use packer::{Packer, Placement};
pub use render::Renderer;
pub use scene::{PathSpec, Scene, SceneOp};
pub use shaders::{ComputeShader, DataType, InputLocation, ShaderSource, Shaders};

/// Errors that can occur in Strata.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A device operation failed.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
    /// The device lacks compute support, and no CPU kernels were provided.
    #[error("missing support for compute programs")]
    MissingCompute,
    /// An output needs more bins than the coarse stage can handle.
    #[error("output too large for the compute stages ({width}x{height})")]
    OutputTooLarge { width: u32, height: u32 },
    /// A kernel reported an unknown error code in the memory header.
    #[error("compute shader failed with error code {0}")]
    ShaderFailed(u32),
    /// The vertex inputs of a pipeline don't match its vertex shader.
    #[error("pipeline for `{shader}` provides {provided} vertex inputs, shader declares {declared}")]
    InvalidPipeline {
        shader: String,
        declared: usize,
        provided: usize,
    },
    /// A CPU kernel panicked.
    #[error("CPU kernel panicked: {0}")]
    KernelPanicked(String),
    /// The CPU worker pool couldn't be started.
    #[error("failed to start the CPU worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    /// The kernels kept running out of memory.
    #[error("compute memory still exhausted after {0} retries")]
    MemoryRetriesExhausted(u32),
    /// Failed to encode an atlas dump.
    #[error("failed to write image")]
    Image(#[from] image::ImageError),
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

/// Options which are set at renderer creation time, used in [`Renderer::new`].
#[derive(Clone, Debug, Default)]
pub struct RendererOptions {
    /// If true, run the compute stages on the CPU even if the device
    /// supports compute programs.
    pub use_cpu: bool,

    /// How many threads run the compute stages on the CPU.
    ///
    /// Set to `None` to use one per available core.
    pub num_cpu_workers: Option<NonZeroUsize>,

    /// How many times a compute pass may be repeated after the kernels ran
    /// out of memory or the results were lost.
    ///
    /// `None` retries until the pass succeeds.
    pub max_memory_retries: Option<NonZeroU32>,

    /// Limits the size of atlas textures below the device and pipeline
    /// limits.
    pub max_texture_dim: Option<u32>,
}
