// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shader sources consumed by the renderer.
//!
//! The kernels themselves are opaque to the renderer: they are compiled by
//! the [`Device`](crate::Device) or, without compute support, run as
//! [`CpuKernel`]s on the CPU dispatcher.

use std::borrow::Cow;

use crate::cpu::CpuKernel;

/// Scalar type of a shader input.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Float,
    Int,
    Short,
}

/// A vertex input declared by a shader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputLocation {
    pub name: String,
    pub location: u32,
    pub data_type: DataType,
    /// Number of components.
    pub size: u32,
}

/// Source of a single shader, in whatever form the device consumes.
#[derive(Clone, Debug, Default)]
pub struct ShaderSource {
    pub name: Cow<'static, str>,
    /// Vertex inputs. Empty for fragment and compute shaders.
    pub inputs: Vec<InputLocation>,
    pub code: Cow<'static, [u8]>,
}

/// A compute stage, with an optional CPU implementation.
#[derive(Clone, Debug, Default)]
pub struct ComputeShader {
    pub source: ShaderSource,
    pub cpu: Option<CpuKernel>,
}

/// Every shader the renderer needs.
#[derive(Clone, Debug, Default)]
pub struct Shaders {
    pub elements: ComputeShader,
    pub tile_alloc: ComputeShader,
    pub path_coarse: ComputeShader,
    pub backdrop: ComputeShader,
    pub binning: ComputeShader,
    pub coarse: ComputeShader,
    pub kernel4: ComputeShader,
    /// Blits layers to the output.
    pub copy_vert: ShaderSource,
    pub copy_frag: ShaderSource,
    /// Renders transformed images into the materials atlas.
    pub material_vert: ShaderSource,
    pub material_frag: ShaderSource,
}

impl Shaders {
    /// The compute stages in dispatch order.
    pub(crate) fn stages(&self) -> [&ComputeShader; 7] {
        [
            &self.elements,
            &self.tile_alloc,
            &self.path_coarse,
            &self.backdrop,
            &self.binning,
            &self.coarse,
            &self.kernel4,
        ]
    }

    /// Reports whether every compute stage has a CPU implementation.
    pub fn has_cpu_kernels(&self) -> bool {
        self.stages().iter().all(|s| s.cpu.is_some())
    }
}
