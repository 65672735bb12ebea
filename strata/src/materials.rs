// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Image uploads and transformed image materials.
//!
//! Source images are uploaded once into image atlases. Every distinct
//! fractional transform of an image is then rendered by a small render
//! pipeline into a materials atlas, where the fine rasterizer samples it
//! without filtering.

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use peniko::kurbo::{Affine, Rect};
use strata_encoding::{IntPoint, IntRect, IntSize};

use crate::atlas::{AllocId, AllocQuery, Atlases, COMBINED_BINDINGS};
use crate::collect::{TextureKey, TextureOp};
use crate::compute::SizedBuffer;
use crate::device::{
    validate_pipeline, BlendDesc, Buffer, BufferBinding, Device, InputDesc, LoadAction, LoadDesc,
    PipelineDesc, Texture, TextureFormat, Topology, VertexLayout,
};
use crate::shaders::{DataType, Shaders};
use crate::Result;

/// Pixels added to the right of and below every image and material, so
/// imprecise clipping and filtering never reach a neighbor.
const PADDING: i32 = 1;

/// A transformed image placed in a materials atlas.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct MaterialAlloc {
    pub alloc: AllocId,
    /// Added to output positions to get positions in the allocation.
    pub offset: IntPoint,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Zeroable, Pod)]
#[repr(C)]
pub(crate) struct MaterialVertex {
    pub pos: [f32; 2],
    pub uv: [f32; 2],
}

/// Must match the uniform block of the material shader.
#[derive(Copy, Clone, Debug, Default, Zeroable, Pod)]
#[repr(C)]
struct MaterialUniforms {
    scale: [f32; 2],
    pos: [f32; 2],
    emulate_srgb: f32,
    _padding: [f32; 3],
}

static_assertions::const_assert_eq!(size_of::<MaterialUniforms>(), 32);
static_assertions::const_assert_eq!(size_of::<MaterialVertex>(), 16);

/// Caches uploaded images and rendered materials across frames.
pub(crate) struct Materials<D: Device> {
    allocs: HashMap<TextureKey, MaterialAlloc>,
    /// Image allocations by image handle.
    img_allocs: HashMap<u64, AllocId>,
    pipeline: D::Pipeline,
    uniforms: D::Buffer,
    vertices: SizedBuffer<D::Buffer>,
    quads: Vec<MaterialVertex>,
    zeros: Vec<u8>,
    srgb: bool,
}

impl<D: Device> Materials<D> {
    pub fn new(ctx: &mut D, shaders: &Shaders, srgb: bool) -> Result<Self> {
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
                stride: size_of::<MaterialVertex>() as u32,
            },
            blend: BlendDesc::default(),
            pixel_format: TextureFormat::Rgba8,
            topology: Topology::Triangles,
        };
        validate_pipeline(&desc, &shaders.material_vert)?;
        let vert = ctx.new_vertex_shader(&shaders.material_vert)?;
        let frag = ctx.new_fragment_shader(&shaders.material_frag)?;
        let pipeline = ctx.new_pipeline(&vert, &frag, &desc)?;
        let uniforms = ctx.new_buffer(BufferBinding::UNIFORMS, size_of::<MaterialUniforms>())?;
        Ok(Self {
            allocs: HashMap::new(),
            img_allocs: HashMap::new(),
            pipeline,
            uniforms,
            vertices: SizedBuffer::Empty,
            quads: Vec::new(),
            zeros: Vec::new(),
            srgb,
        })
    }

    /// Number of cached materials.
    pub fn len(&self) -> usize {
        self.allocs.len()
    }

    /// Uploads the source images of `tex_ops` not already in an atlas.
    pub fn upload_images(
        &mut self,
        ctx: &mut D,
        atlases: &mut Atlases<D::Texture>,
        tex_ops: &mut [TextureOp],
        frame: u64,
    ) -> Result<()> {
        self.img_allocs.retain(|_, id| atlases.is_live(*id));
        let format = if self.srgb {
            TextureFormat::Srgba
        } else {
            TextureFormat::Rgba8
        };
        let bindings = BufferBinding::TEXTURE | BufferBinding::FRAMEBUFFER;
        let mut uploads: Vec<(IntPoint, usize)> = Vec::new();
        let mut next = 0;
        while next < tex_ops.len() {
            uploads.clear();
            let mut atlas = None;
            while next < tex_ops.len() {
                let op = &mut tex_ops[next];
                if let Some(&id) = self.img_allocs.get(&op.key.handle) {
                    atlases.touch(id, frame);
                    op.img_alloc = Some(id);
                    next += 1;
                    continue;
                }
                let size = image_size(&op.image).pad(PADDING, PADDING);
                let query = AllocQuery {
                    atlas,
                    ..AllocQuery::new(size, format, bindings)
                };
                let Some(id) = atlases.alloc(&query, frame, false) else {
                    break;
                };
                let alloc = atlases.allocation(id);
                atlas = Some(alloc.atlas);
                uploads.push((alloc.rect.min, next));
                op.img_alloc = Some(id);
                self.img_allocs.insert(op.key.handle, id);
                next += 1;
            }
            let Some(atlas) = atlas else {
                break;
            };
            let size = atlases.atlas(atlas).packed_size();
            atlases.realize(atlas, false, size, ctx)?;
            // Invariant: realizing for the GPU creates the texture.
            let Some(tex) = atlases.atlas(atlas).texture() else {
                panic!("realized image atlas without a texture");
            };
            log::trace!("uploading {} images", uploads.len());
            for &(pos, i) in &uploads {
                let image = &tex_ops[i].image;
                let size = image_size(image);
                tex.upload(pos, size, image.data.data(), size.width as usize * 4);
                let right = IntSize::new(PADDING, size.height);
                let bottom = IntSize::new(size.width, PADDING);
                let blank = zeros(&mut self.zeros, right.area().max(bottom.area()) as usize * 4);
                tex.upload(
                    IntPoint::new(pos.x + size.width, pos.y),
                    right,
                    blank,
                    right.width as usize * 4,
                );
                tex.upload(
                    IntPoint::new(pos.x, pos.y + size.height),
                    bottom,
                    blank,
                    bottom.width as usize * 4,
                );
            }
        }
        Ok(())
    }

    /// Renders every transformed image of `tex_ops` into a materials atlas
    /// and records its placement in the op.
    ///
    /// The source images must have been uploaded by [`Self::upload_images`].
    pub fn render(
        &mut self,
        ctx: &mut D,
        atlases: &mut Atlases<D::Texture>,
        tex_ops: &mut [TextureOp],
        frame: u64,
        use_cpu: bool,
    ) -> Result<()> {
        self.allocs.retain(|_, mat| atlases.is_live(mat.alloc));
        let mut new_allocs: Vec<AllocId> = Vec::new();
        let mut next = 0;
        while next < tex_ops.len() {
            self.quads.clear();
            new_allocs.clear();
            let mut atlas = None;
            let mut img_atlas = None;
            while next < tex_ops.len() {
                let op = &mut tex_ops[next];
                if let Some(&mat) = self.allocs.get(&op.key) {
                    atlases.touch(mat.alloc, frame);
                    op.mat_alloc = Some(mat);
                    next += 1;
                    continue;
                }
                // Invariant: `upload_images` placed every image first.
                let Some(img_alloc) = op.img_alloc else {
                    panic!("material of an image that wasn't uploaded");
                };
                let img = *atlases.allocation(img_alloc);
                // The material pipeline samples a single image atlas.
                if img_atlas.is_some_and(|a| a != img.atlas) {
                    break;
                }
                img_atlas = Some(img.atlas);
                let mut quad = material_quad(
                    atlases.atlas(img.atlas).size(),
                    op.key.transform(),
                    image_size(&op.image),
                    img.rect.min,
                );
                let bounds = IntRect::round_out(&quad_bounds(&quad)).intersect(&op.key.bounds);
                let size = bounds.size();
                let query = AllocQuery {
                    atlas,
                    ..AllocQuery::new(size.pad(PADDING, PADDING), TextureFormat::Rgba8, COMBINED_BINDINGS)
                };
                let Some(id) = atlases.alloc(&query, frame, use_cpu) else {
                    break;
                };
                atlas = Some(atlases.allocation(id).atlas);
                // Move the quad to the allocation and scale it to the
                // viewport's unit square.
                let (ox, oy) = (-bounds.min.x as f32, -bounds.min.y as f32);
                let (sx, sy) = (size.width as f32, size.height as f32);
                for v in &mut quad {
                    v.pos = [(v.pos[0] + ox) / sx, (v.pos[1] + oy) / sy];
                }
                let [q0, q1, q2, q3] = quad;
                self.quads.extend([q0, q1, q3, q3, q1, q2]);
                let mat = MaterialAlloc {
                    alloc: id,
                    offset: IntPoint::new(-bounds.min.x, -bounds.min.y),
                };
                self.allocs.insert(op.key, mat);
                op.mat_alloc = Some(mat);
                new_allocs.push(id);
                next += 1;
            }
            let (Some(atlas), Some(img_atlas)) = (atlas, img_atlas) else {
                break;
            };
            let realized = atlases.atlas(atlas).is_realized();
            let size = atlases.atlas(atlas).packed_size();
            atlases.realize(atlas, use_cpu, size, ctx)?;

            // Transform to clip space: [-1, -1] - [1, 1].
            let uniforms = MaterialUniforms {
                scale: [2.0, 2.0],
                pos: [-1.0, -1.0],
                emulate_srgb: if self.srgb { 0.0 } else { 1.0 },
                ..Default::default()
            };
            self.uniforms.upload(bytemuck::bytes_of(&uniforms));
            let vertex_data: &[u8] = bytemuck::cast_slice(&self.quads);
            self.vertices.ensure_capacity(
                false,
                ctx,
                BufferBinding::VERTICES,
                pow2_ceil(vertex_data.len()),
            )?;
            self.vertices.upload(vertex_data);

            // Invariant: both atlases were realized and the vertices uploaded above.
            let dst = atlases.atlas(atlas);
            let (Some(dst_tex), Some(img_tex), Some(vertices)) = (
                dst.texture(),
                atlases.atlas(img_atlas).texture(),
                self.vertices.gpu(),
            ) else {
                panic!("material pass without realized resources");
            };
            let load = LoadDesc {
                action: if realized {
                    LoadAction::Keep
                } else {
                    LoadAction::Clear
                },
                ..Default::default()
            };
            ctx.prepare_texture(img_tex);
            ctx.begin_render_pass(dst_tex, load);
            ctx.bind_texture(0, img_tex);
            ctx.bind_pipeline(&self.pipeline);
            ctx.bind_uniforms(&self.uniforms);
            ctx.bind_vertex_buffer(vertices, 0);
            for (i, &id) in new_allocs.iter().enumerate() {
                let rect = atlases.allocation(id).rect;
                ctx.viewport(
                    rect.min.x,
                    rect.min.y,
                    rect.width() - PADDING,
                    rect.height() - PADDING,
                );
                ctx.draw_arrays(i as u32 * 6, 6);
            }
            ctx.end_render_pass();

            if let Some(image) = dst.cpu_image().filter(|_| use_cpu) {
                for &id in &new_allocs {
                    let rect = atlases.allocation(id).rect;
                    let stride = rect.width() as usize * 4;
                    let mut pixels = vec![0; stride * rect.height() as usize];
                    dst_tex.read_pixels(rect, &mut pixels, stride)?;
                    image.write_rect(rect.min, rect.size(), &pixels, stride);
                }
            }
        }
        Ok(())
    }
}

fn image_size(image: &peniko::Image) -> IntSize {
    IntSize::new(image.width as i32, image.height as i32)
}

fn zeros(buf: &mut Vec<u8>, len: usize) -> &[u8] {
    if buf.len() < len {
        buf.resize(len, 0);
    }
    &buf[..len]
}

/// Builds the quad covering an image of `img_size` transformed by `m`, with
/// texture coordinates addressing the image at `uv_pos` in an atlas of
/// `atlas_size`.
///
/// The corners are in the order top left, bottom left, bottom right, top
/// right of the source image.
pub(crate) fn material_quad(
    atlas_size: IntSize,
    m: Affine,
    img_size: IntSize,
    uv_pos: IntPoint,
) -> [MaterialVertex; 4] {
    let [sx, hy, hx, sy, ox, oy] = m.as_coeffs().map(|c| c as f32);
    let (w, h) = (img_size.width as f32, img_size.height as f32);
    // The image corners transformed by the linear part of `m`: q0 is the
    // origin and q2 = q1 + q3.
    let q1 = [hx * h, sy * h];
    let q3 = [sx * w, hy * w];
    let q2 = [q1[0] + q3[0], q1[1] + q3[1]];
    let at = |q: [f32; 2]| [q[0] + ox, q[1] + oy];

    let (ax, ay) = (atlas_size.width as f32, atlas_size.height as f32);
    let u0 = uv_pos.x as f32 / ax;
    let v0 = uv_pos.y as f32 / ay;
    let u1 = (uv_pos.x as f32 + w) / ax;
    let v1 = (uv_pos.y as f32 + h) / ay;
    [
        MaterialVertex {
            pos: [ox, oy],
            uv: [u0, v0],
        },
        MaterialVertex {
            pos: at(q1),
            uv: [u0, v1],
        },
        MaterialVertex {
            pos: at(q2),
            uv: [u1, v1],
        },
        MaterialVertex {
            pos: at(q3),
            uv: [u1, v0],
        },
    ]
}

/// The bounding box of the quad's positions.
pub(crate) fn quad_bounds(quad: &[MaterialVertex; 4]) -> Rect {
    let mut min = quad[0].pos;
    let mut max = quad[0].pos;
    for v in &quad[1..] {
        min = [min[0].min(v.pos[0]), min[1].min(v.pos[1])];
        max = [max[0].max(v.pos[0]), max[1].max(v.pos[1])];
    }
    Rect::new(min[0].into(), min[1].into(), max[0].into(), max[1].into())
}

/// Rounds `v` up to a power of two.
pub(crate) fn pow2_ceil(v: usize) -> usize {
    v.next_power_of_two()
}
