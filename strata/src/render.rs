// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The frame orchestrator.

use std::path::Path;

use bytemuck::{Pod, Zeroable};
use peniko::Color;
use strata_encoding::{Encoding, IntRect, IntSize, TILE_HEIGHT, TILE_WIDTH};

use crate::atlas::{AllocId, AllocQuery, AtlasId, Atlases, COMBINED_BINDINGS};
use crate::collect::{Collector, TextureOp};
use crate::compute::{ComputeDriver, SizedBuffer};
use crate::cpu::Dispatcher;
use crate::device::{
    validate_pipeline, BlendDesc, BlendFactor, Buffer, BufferBinding, Caps, Device, InputDesc,
    LoadAction, LoadDesc, PipelineDesc, TextureFormat, Topology, VertexLayout,
};
use crate::layer::{encode_layer, match_layers};
use crate::materials::Materials;
use crate::scene::SceneOp;
use crate::shaders::{DataType, Shaders};
use crate::timer::{Stage, Timers};
use crate::{debug, Error, RendererOptions, Result};

/// Atlas textures larger than this lose precision in the shaders.
const MAX_PRECISE_DIM: u32 = 8192;
/// The compute stages span at most 128x64 tiles. Keep atlases square.
const MAX_COMPUTE_DIM: u32 = 4096;

#[derive(Copy, Clone, Debug, Default, PartialEq, Zeroable, Pod)]
#[repr(C)]
struct BlitVertex {
    pos: [f32; 2],
    uv: [f32; 2],
}

/// Must match the uniform block of the copy shader.
#[derive(Copy, Clone, Debug, Default, Zeroable, Pod)]
#[repr(C)]
struct CopyUniforms {
    scale: [f32; 2],
    pos: [f32; 2],
    uv_scale: [f32; 2],
    _padding: [f32; 2],
}

static_assertions::const_assert_eq!(size_of::<CopyUniforms>(), 32);

/// Blits rendered layers to the output.
struct Output<D: Device> {
    pipeline: D::Pipeline,
    uniforms: D::Buffer,
    buffer: SizedBuffer<D::Buffer>,
    vertices: Vec<BlitVertex>,
}

/// Renders scenes through a [`Device`], caching rasterized layers across
/// frames.
pub struct Renderer<D: Device> {
    ctx: D,
    caps: Caps,
    use_cpu: bool,
    collector: Collector,
    tex_ops: Vec<TextureOp>,
    atlases: Atlases<D::Texture>,
    materials: Materials<D>,
    compute: ComputeDriver<D>,
    output: Output<D>,
    enc: Encoding,
    timers: Option<Timers<D::Timer>>,
    profile: String,
    frame_count: u64,
    viewport: IntSize,
}

impl<D: Device> std::fmt::Debug for Renderer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("use_cpu", &self.use_cpu)
            .field("frame_count", &self.frame_count)
            .field("viewport", &self.viewport)
            .field("atlases", &self.atlases.len())
            .field("materials", &self.materials.len())
            .field("compute", &self.compute)
            .finish_non_exhaustive()
    }
}

impl<D: Device> Renderer<D> {
    /// Creates a renderer drawing through `ctx`.
    ///
    /// The compute stages run on the CPU when `ctx` lacks compute support or
    /// when [`RendererOptions::use_cpu`] is set. That requires CPU kernels for
    /// every stage in `shaders`.
    pub fn new(mut ctx: D, shaders: &Shaders, options: RendererOptions) -> Result<Self> {
        let caps = ctx.caps();
        let mut max_dim = caps
            .max_texture_size
            .min(MAX_PRECISE_DIM)
            .min(MAX_COMPUTE_DIM);
        if let Some(dim) = options.max_texture_dim {
            max_dim = max_dim.min(dim);
        }
        let use_cpu = options.use_cpu || !caps.features.compute;
        if use_cpu && !shaders.has_cpu_kernels() {
            return Err(Error::MissingCompute);
        }
        log::info!(
            "strata renderer: {} compute, max atlas size {max_dim}",
            if use_cpu { "CPU" } else { "GPU" }
        );

        let desc = PipelineDesc {
            vertex_layout: VertexLayout {
                inputs: vec![
                    InputDesc {
                        data_type: DataType::Float,
                        size: 2,
                        offset: 0,
                    },
                    InputDesc {
                        data_type: DataType::Float,
                        size: 2,
                        offset: 8,
                    },
                ],
                stride: size_of::<BlitVertex>() as u32,
            },
            blend: BlendDesc {
                enable: true,
                src_factor: BlendFactor::One,
                dst_factor: BlendFactor::OneMinusSrcAlpha,
            },
            pixel_format: TextureFormat::Output,
            topology: Topology::Triangles,
        };
        validate_pipeline(&desc, &shaders.copy_vert)?;
        let vert = ctx.new_vertex_shader(&shaders.copy_vert)?;
        let frag = ctx.new_fragment_shader(&shaders.copy_frag)?;
        let pipeline = ctx.new_pipeline(&vert, &frag, &desc)?;
        let uniforms = ctx.new_buffer(BufferBinding::UNIFORMS, size_of::<CopyUniforms>())?;
        let output = Output {
            pipeline,
            uniforms,
            buffer: SizedBuffer::Empty,
            vertices: Vec::new(),
        };

        let materials = Materials::new(&mut ctx, shaders, caps.features.srgb)?;
        let compute = if use_cpu {
            let dispatcher = Dispatcher::new(options.num_cpu_workers)?;
            ComputeDriver::new_cpu(shaders, dispatcher, options.max_memory_retries)?
        } else {
            ComputeDriver::new_gpu(&mut ctx, shaders, options.max_memory_retries)?
        };
        Ok(Self {
            ctx,
            caps,
            use_cpu,
            collector: Collector::new(),
            tex_ops: Vec::new(),
            atlases: Atlases::new(max_dim),
            materials,
            compute,
            output,
            enc: Encoding::new(),
            timers: None,
            profile: String::new(),
            frame_count: 0,
            viewport: IntSize::default(),
        })
    }

    pub fn device(&self) -> &D {
        &self.ctx
    }

    /// Whether the compute stages run on the CPU.
    pub fn uses_cpu(&self) -> bool {
        self.use_cpu
    }

    /// The paint operations and layers of the last frame.
    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    pub fn atlases(&self) -> &Atlases<D::Texture> {
        &self.atlases
    }

    /// Number of frames rendered.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Size of the compute stages' memory buffer.
    pub fn memory_size(&self) -> usize {
        self.compute.memory_size()
    }

    /// Clears the output to `color` before drawing the next frame.
    pub fn clear(&mut self, color: Color) {
        self.collector.set_clear(color);
    }

    /// Timings of the most recent profiled frame, or an empty string.
    ///
    /// A frame is profiled when its scene contains [`SceneOp::Profile`] and
    /// the device supports timers.
    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Renders the operations of a frame to `target`.
    pub fn render<'a>(
        &mut self,
        ops: impl IntoIterator<Item = &'a SceneOp>,
        target: &D::RenderTarget,
        viewport: IntSize,
    ) -> Result<()> {
        self.frame_count += 1;
        self.collect(viewport, ops);
        self.frame(target)
    }

    /// Writes the contents of every atlas to `dump-{i}.png` files in `dir`.
    pub fn dump_atlases(&self, dir: impl AsRef<Path>) -> Result<()> {
        debug::dump_atlases(&self.atlases, self.caps.bottom_left_origin, dir.as_ref())
    }

    fn collect<'a>(&mut self, viewport: IntSize, ops: impl IntoIterator<Item = &'a SceneOp>) {
        self.viewport = viewport;
        self.collector.reset();
        self.tex_ops.clear();
        self.collector.collect(ops, viewport, &mut self.tex_ops);
    }

    fn frame(&mut self, target: &D::RenderTarget) -> Result<()> {
        let fbo = self
            .ctx
            .begin_frame(target, self.collector.clear, self.viewport)?;
        let result = self.draw(&fbo);
        self.ctx.end_frame();
        result
    }

    fn draw(&mut self, fbo: &D::Texture) -> Result<()> {
        let frame = self.frame_count;
        let viewport = self.viewport;
        if self.collector.profile && self.timers.is_none() && self.caps.features.timers {
            self.timers = Some(Timers::new(&mut self.ctx));
        }

        self.materials
            .upload_images(&mut self.ctx, &mut self.atlases, &mut self.tex_ops, frame)?;
        self.materials.render(
            &mut self.ctx,
            &mut self.atlases,
            &mut self.tex_ops,
            frame,
            self.use_cpu,
        )?;
        match_layers(&mut self.collector, &self.tex_ops, &mut self.atlases, frame);

        self.begin_timer(Stage::Render);
        self.render_layers(viewport)?;
        self.end_timer(Stage::Render);

        let mut load = LoadDesc {
            action: LoadAction::Keep,
            clear_color: self.collector.clear_color,
        };
        if self.collector.clear {
            self.collector.clear = false;
            load.action = LoadAction::Clear;
        }
        self.begin_timer(Stage::Blit);
        self.blit_layers(load, fbo, viewport)?;
        self.end_timer(Stage::Blit);

        self.begin_timer(Stage::Compact);
        self.atlases.compact(frame, &mut self.ctx)?;
        self.end_timer(Stage::Compact);

        if self.collector.profile {
            let continuous = self.ctx.is_time_continuous();
            if let Some(timers) = &mut self.timers {
                if timers.ready(continuous) {
                    self.profile = timers.summary();
                }
            }
        }
        Ok(())
    }

    fn begin_timer(&mut self, stage: Stage) {
        if let Some(timers) = &mut self.timers {
            timers.stage(stage).begin();
        }
    }

    fn end_timer(&mut self, stage: Stage) {
        if let Some(timers) = &mut self.timers {
            timers.stage(stage).end();
        }
    }

    /// Rasterizes the layers without an allocation, one compute pass per
    /// output atlas.
    fn render_layers(&mut self, viewport: IntSize) -> Result<()> {
        let mut next = 0;
        loop {
            let layers = &mut self.collector.frame.layers;
            let mut materials: Option<AtlasId> = None;
            let mut dst: Option<AtlasId> = None;
            self.enc.reset();
            while next < layers.len() {
                let layer = &mut layers[next];
                if layer.alloc.is_some() {
                    next += 1;
                    continue;
                }
                match (materials, layer.materials) {
                    // A compute pass binds a single materials atlas.
                    (Some(m), Some(l)) if m != l => break,
                    (None, l) => materials = l,
                    _ => {}
                }
                let query = AllocQuery {
                    atlas: dst,
                    empty: true,
                    // Pad to avoid overlap.
                    ..AllocQuery::new(
                        layer.rect.size().pad(1, 1),
                        TextureFormat::Rgba8,
                        COMBINED_BINDINGS,
                    )
                };
                // A compute pass writes a single output atlas.
                let Some(id) = self.atlases.alloc(&query, self.frame_count, self.use_cpu) else {
                    break;
                };
                let alloc = *self.atlases.allocation(id);
                dst = Some(alloc.atlas);
                self.atlases.atlas_mut(alloc.atlas).set_compact();
                layer.alloc = Some(id);
                encode_layer(
                    layer,
                    &self.collector.frame.ops,
                    alloc.rect.min,
                    viewport,
                    &mut self.enc,
                    &self.tex_ops,
                    &self.atlases,
                );
                next += 1;
            }
            let Some(dst) = dst else {
                return Ok(());
            };
            let packed = self.atlases.atlas(dst).packed_size();
            let tile_dims = IntSize::new(
                packed.width / TILE_WIDTH as i32 + (packed.width % TILE_WIDTH as i32 > 0) as i32,
                packed.height / TILE_HEIGHT as i32 + (packed.height % TILE_HEIGHT as i32 > 0) as i32,
            );
            let size = IntSize::new(
                tile_dims.width * TILE_WIDTH as i32,
                tile_dims.height * TILE_HEIGHT as i32,
            );
            self.atlases.realize(dst, self.use_cpu, size, &mut self.ctx)?;
            log::trace!("rasterizing into a {size:?} atlas");
            let result = self.compute.render(
                &mut self.ctx,
                &mut self.enc,
                materials.map(|id| self.atlases.atlas(id)),
                self.atlases.atlas(dst),
                tile_dims,
            );
            if result.is_err() {
                // Nothing was rasterized into `dst`, so its layers are new again
                // next frame.
                let atlases = &self.atlases;
                for layer in &mut self.collector.frame.layers {
                    if layer
                        .alloc
                        .is_some_and(|id| atlases.allocation(id).atlas == dst)
                    {
                        layer.alloc = None;
                    }
                }
            }
            result?;
        }
    }

    /// Draws every layer of the frame to `fbo`.
    fn blit_layers(&mut self, load: LoadDesc, fbo: &D::Texture, viewport: IntSize) -> Result<()> {
        // Invariant: a frame only gets here after `render_layers` allocated
        // every layer.
        debug_assert!(
            self.collector.frame.layers.iter().all(|l| l.alloc.is_some()),
            "blitting a layer that wasn't rendered"
        );
        let layers: Vec<(IntRect, AllocId)> = self
            .collector
            .frame
            .layers
            .iter()
            .filter_map(|l| Some((l.rect, l.alloc?)))
            .collect();
        let out = &mut self.output;
        out.vertices.clear();
        for &(r, id) in &layers {
            let alloc = *self.atlases.allocation(id);
            let [u, v] = [alloc.rect.min.x as f32, alloc.rect.min.y as f32];
            let size = r.size();
            let [w, h] = [size.width as f32, size.height as f32];
            let (x0, y0, x1, y1) = (
                r.min.x as f32,
                r.min.y as f32,
                r.max.x as f32,
                r.max.y as f32,
            );
            let quad = [
                BlitVertex {
                    pos: [x0, y0],
                    uv: [u, v],
                },
                BlitVertex {
                    pos: [x1, y0],
                    uv: [u + w, v],
                },
                BlitVertex {
                    pos: [x1, y1],
                    uv: [u + w, v + h],
                },
                BlitVertex {
                    pos: [x0, y1],
                    uv: [u, v + h],
                },
            ];
            out.vertices
                .extend([quad[0], quad[1], quad[3], quad[3], quad[2], quad[1]]);
            if let Some(tex) = self.atlases.atlas(alloc.atlas).texture() {
                self.ctx.prepare_texture(tex);
            }
        }
        if !out.vertices.is_empty() {
            let data: &[u8] = bytemuck::cast_slice(&out.vertices);
            out.buffer
                .ensure_capacity(false, &mut self.ctx, BufferBinding::VERTICES, data.len())?;
            out.buffer.upload(data);
        }

        self.ctx.begin_render_pass(fbo, load);
        // The buffer exists whenever there are layers.
        let (false, Some(vertices)) = (layers.is_empty(), out.buffer.gpu()) else {
            self.ctx.end_render_pass();
            return Ok(());
        };
        self.ctx.viewport(0, 0, viewport.width, viewport.height);
        self.ctx.bind_pipeline(&out.pipeline);
        self.ctx.bind_vertex_buffer(vertices, 0);
        const VERTICES_PER_QUAD: u32 = 6;
        let mut start = 0;
        for run in layers.chunk_by(|a, b| {
            self.atlases.allocation(a.1).atlas == self.atlases.allocation(b.1).atlas
        }) {
            let atlas = self.atlases.atlas(self.atlases.allocation(run[0].1).atlas);
            let count = run.len() as u32 * VERTICES_PER_QUAD;
            // Positions to clip space [-1, 1], texture coordinates to [0, 1].
            let size = atlas.size();
            let uniforms = CopyUniforms {
                scale: [2.0 / viewport.width as f32, 2.0 / viewport.height as f32],
                pos: [-1.0, -1.0],
                uv_scale: [1.0 / size.width as f32, 1.0 / size.height as f32],
                ..Default::default()
            };
            out.uniforms.upload(bytemuck::bytes_of(&uniforms));
            self.ctx.bind_uniforms(&out.uniforms);
            if let Some(tex) = atlas.texture() {
                self.ctx.bind_texture(0, tex);
            }
            self.ctx.draw_arrays(start, count);
            start += count;
        }
        self.ctx.end_render_pass();
        Ok(())
    }
}

