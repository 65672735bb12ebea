// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Flattening of a [`SceneOp`] stream into hashed paint operations.
//!
//! Every paint becomes a [`PaintOp`] carrying its whole clip ancestry, so
//! that operations can be compared and cached independently of the scene
//! they came from. Transforms are split into a relative part, stored per
//! clip, and an integer offset, so that content that only moved by whole
//! pixels hashes the same.

use std::hash::{DefaultHasher, Hash, Hasher};

use peniko::color::LinearSrgb;
use peniko::kurbo::{Affine, Point, Rect};
use peniko::{Color, Image};
use smallvec::SmallVec;
use strata_encoding::math::{rect_intersect, rect_is_empty};
use strata_encoding::{IntPoint, IntRect, IntSize, PathData};

use crate::atlas::AllocId;
use crate::layer::Layer;
use crate::materials::MaterialAlloc;
use crate::scene::SceneOp;

/// Everything that describes a clip, apart from its path bytes.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ClipKey {
    /// Bounds in the local space of the clip.
    pub bounds: Rect,
    /// Transform from the local space to the space of the enclosing clip.
    pub rel_trans: Affine,
    /// Stroke width, or zero for fills.
    pub stroke_width: f32,
    pub path_hash: u64,
}

impl Hash for ClipKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_rect(&self.bounds, state);
        hash_affine(&self.rel_trans, state);
        self.stroke_width.to_bits().hash(state);
        self.path_hash.hash(state);
    }
}

/// One entry of a flattened clip stack.
#[derive(Clone, Debug)]
pub(crate) struct ClipCmd {
    pub key: ClipKey,
    /// The outline, or `None` for a rectangle covering `key.bounds`.
    pub path: Option<PathData>,
    /// Bounds in output space.
    pub abs_bounds: Rect,
}

/// What a paint fills its clip with.
#[derive(Clone, Debug)]
pub(crate) enum Material {
    Color(Color),
    LinearGradient {
        stop1: Point,
        stop2: Point,
        color1: Color,
        color2: Color,
    },
    Image(Image),
}

impl PartialEq for Material {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Color(a), Self::Color(b)) => a.components == b.components,
            (
                Self::LinearGradient {
                    stop1,
                    stop2,
                    color1,
                    color2,
                },
                Self::LinearGradient {
                    stop1: o_stop1,
                    stop2: o_stop2,
                    color1: o_color1,
                    color2: o_color2,
                },
            ) => {
                stop1 == o_stop1
                    && stop2 == o_stop2
                    && color1.components == o_color1.components
                    && color2.components == o_color2.components
            }
            (Self::Image(a), Self::Image(b)) => {
                image_handle(a) == image_handle(b) && a.width == b.width && a.height == b.height
            }
            _ => false,
        }
    }
}

impl Hash for Material {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Color(c) => {
                0_u8.hash(state);
                hash_color(c, state);
            }
            Self::LinearGradient {
                stop1,
                stop2,
                color1,
                color2,
            } => {
                1_u8.hash(state);
                hash_point(stop1, state);
                hash_point(stop2, state);
                hash_color(color1, state);
                hash_color(color2, state);
            }
            Self::Image(image) => {
                2_u8.hash(state);
                image_handle(image).hash(state);
                image.width.hash(state);
                image.height.hash(state);
            }
        }
    }
}

/// Everything that describes a paint, apart from its clips.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PaintKey {
    /// Absolute transform, minus the integer offset of the op.
    pub transform: Affine,
    pub material: Material,
}

impl Hash for PaintKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_affine(&self.transform, state);
        self.material.hash(state);
    }
}

impl Default for PaintKey {
    fn default() -> Self {
        Self {
            transform: Affine::IDENTITY,
            material: Material::Color(Color::BLACK),
        }
    }
}

/// A single paint with its flattened clip stack, innermost clip first.
#[derive(Clone, Debug)]
pub struct PaintOp {
    pub(crate) clip_stack: SmallVec<[ClipCmd; 4]>,
    pub(crate) key: PaintKey,
    /// Intersection of the absolute bounds of every clip.
    pub(crate) intersect: Rect,
    /// Integer translation separated from the outermost clip transform.
    pub(crate) offset: IntPoint,
    pub(crate) hash: u64,
    /// Index of the layer the op was assigned to.
    pub(crate) layer: usize,
    /// Index into the frame's texture ops, for image materials.
    pub(crate) tex_op: Option<usize>,
}

impl PaintOp {
    /// Number of clips left after redundant ones were removed.
    pub fn clip_depth(&self) -> usize {
        self.clip_stack.len()
    }

    /// Content hash, independent of the integer offset.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn offset(&self) -> IntPoint {
        self.offset
    }

    /// Output space bounds covered by the op.
    pub fn bounds(&self) -> Rect {
        self.intersect
    }

    /// Index of the layer the op was assigned to.
    pub fn layer(&self) -> usize {
        self.layer
    }
}

/// Identifies a transformed image in the materials atlas.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct TextureKey {
    pub handle: u64,
    /// Bit patterns of the fractional transform coefficients.
    pub transform: [u64; 6],
    pub bounds: IntRect,
}

impl TextureKey {
    pub fn transform(&self) -> Affine {
        Affine::new(self.transform.map(f64::from_bits))
    }
}

/// A paint that needs its image transformed into the materials atlas.
#[derive(Clone, Debug)]
pub(crate) struct TextureOp {
    pub image: Image,
    pub key: TextureKey,
    /// Integer offset separated from `key.transform`.
    pub offset: IntPoint,
    /// The uploaded source image.
    pub img_alloc: Option<AllocId>,
    /// Placement in the materials atlas, once rendered.
    pub mat_alloc: Option<MaterialAlloc>,
}

/// Paint operations and layers of one frame.
#[derive(Debug, Default)]
pub(crate) struct FrameOps {
    pub ops: Vec<PaintOp>,
    pub layers: Vec<Layer>,
}

impl FrameOps {
    fn reset(&mut self) {
        self.ops.clear();
        self.layers.clear();
    }
}

#[derive(Clone, Debug)]
struct ClipState {
    parent: Option<usize>,
    abs_bounds: Rect,
    path: Option<PathData>,
    intersect: Rect,
    key: ClipKey,
}

#[derive(Clone, Debug)]
struct TransEntry {
    t: Affine,
    rel_trans: Affine,
}

#[derive(Clone, Debug, Default)]
struct EncoderState {
    /// Transform relative to the current clip.
    rel_trans: Affine,
    clip: Option<usize>,
    paint: PaintKey,
}

/// Collects the paint operations of a frame, keeping the previous frame's
/// operations around for layer matching.
#[derive(Debug, Default)]
pub struct Collector {
    pub(crate) frame: FrameOps,
    pub(crate) prev_frame: FrameOps,
    clip_states: Vec<ClipState>,
    trans_stack: Vec<TransEntry>,
    /// One entry per pushed clip, `false` for pushes that were elided.
    clip_pushes: Vec<bool>,
    states: Vec<Affine>,
    pub(crate) clear: bool,
    /// Linear premultiplied clear color.
    pub(crate) clear_color: [f32; 4],
    pub(crate) profile: bool,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The paint operations of the last collected frame.
    pub fn ops(&self) -> &[PaintOp] {
        &self.frame.ops
    }

    /// The layers of the last rendered frame.
    pub fn layers(&self) -> &[Layer] {
        &self.frame.layers
    }

    /// The pending clear color, if the next frame starts with a clear.
    pub fn clear_color(&self) -> Option<[f32; 4]> {
        self.clear.then_some(self.clear_color)
    }

    /// Reports whether the last frame requested profiling.
    pub fn profile_requested(&self) -> bool {
        self.profile
    }

    /// Requests a clear to `color` for the next frame.
    pub(crate) fn set_clear(&mut self, color: Color) {
        self.clear = true;
        self.clear_color = color.convert::<LinearSrgb>().premultiply().components;
    }

    /// Moves the current frame to the previous frame and starts a new one.
    pub(crate) fn reset(&mut self) {
        std::mem::swap(&mut self.frame, &mut self.prev_frame);
        self.profile = false;
        self.clip_states.clear();
        self.trans_stack.clear();
        self.clip_pushes.clear();
        self.frame.reset();
    }

    /// Adds a clip to `state`, unless it is a rectangle that already contains
    /// one of its ancestors. Returns whether the clip was added.
    fn add_clip(
        &mut self,
        state: &mut EncoderState,
        bounds: Rect,
        path: Option<PathData>,
        stroke_width: f32,
    ) -> bool {
        if path.is_none() {
            let mut p = state.clip;
            let mut t = state.rel_trans.inverse();
            while let Some(idx) = p {
                let clip = &self.clip_states[idx];
                if Quad::transform(t, &clip.key.bounds).inside(&bounds) {
                    return false;
                }
                t *= clip.key.rel_trans.inverse();
                p = clip.parent;
            }
        }

        let abs_bounds = Quad::transform(state.paint.transform, &bounds).bounds();
        let intersect = match state.clip {
            Some(parent) => rect_intersect(&self.clip_states[parent].intersect, &abs_bounds),
            None => abs_bounds,
        };
        let path_hash = path.as_ref().map_or(0, PathData::hash);
        self.clip_states.push(ClipState {
            parent: state.clip,
            abs_bounds,
            path,
            intersect,
            key: ClipKey {
                bounds,
                rel_trans: state.rel_trans,
                stroke_width,
                path_hash,
            },
        });
        state.clip = Some(self.clip_states.len() - 1);
        state.rel_trans = Affine::IDENTITY;
        true
    }

    /// Collects the paint operations of `ops`, rendered to a `viewport`
    /// sized output, and appends the operations of image paints to
    /// `tex_ops`.
    pub(crate) fn collect<'a>(
        &mut self,
        ops: impl IntoIterator<Item = &'a SceneOp>,
        viewport: IntSize,
        tex_ops: &mut Vec<TextureOp>,
    ) {
        let fview = IntRect::from_origin_size(IntPoint::ZERO, viewport).to_kurbo();
        let mut state = EncoderState::default();
        let mut path_data: Option<PathData> = None;
        let mut stroke_width = 0.0;
        self.add_clip(&mut state, fview, None, 0.0);
        let root = state.clip;

        for op in ops {
            match op {
                SceneOp::Profile => self.profile = true,
                SceneOp::Transform { transform, push } => {
                    if *push {
                        self.trans_stack.push(TransEntry {
                            t: state.paint.transform,
                            rel_trans: state.rel_trans,
                        });
                    }
                    state.paint.transform *= *transform;
                    state.rel_trans *= *transform;
                }
                SceneOp::PopTransform => {
                    if let Some(entry) = self.trans_stack.pop() {
                        state.paint.transform = entry.t;
                        state.rel_trans = entry.rel_trans;
                    } else {
                        log::warn!("unbalanced transform pop");
                    }
                }
                SceneOp::Stroke { width } => stroke_width = *width,
                SceneOp::Path(path) => path_data = Some(path.data.clone()),
                SceneOp::Clip { bounds } => {
                    let added = self.add_clip(&mut state, *bounds, path_data.take(), stroke_width);
                    self.clip_pushes.push(added);
                    stroke_width = 0.0;
                }
                SceneOp::PopClip => match self.clip_pushes.pop() {
                    Some(true) => {
                        if let Some(idx) = state.clip {
                            let clip = &self.clip_states[idx];
                            state.rel_trans = clip.key.rel_trans * state.rel_trans;
                            state.clip = clip.parent;
                        }
                    }
                    Some(false) => {}
                    None => log::warn!("unbalanced clip pop"),
                },
                SceneOp::Color(color) => state.paint.material = Material::Color(*color),
                SceneOp::LinearGradient {
                    stop1,
                    stop2,
                    color1,
                    color2,
                } => {
                    state.paint.material = Material::LinearGradient {
                        stop1: *stop1,
                        stop2: *stop2,
                        color1: *color1,
                        color2: *color2,
                    };
                }
                SceneOp::Image(image) => state.paint.material = Material::Image(image.clone()),
                SceneOp::Paint => self.paint(&state, root),
                SceneOp::Save { id } => {
                    if *id >= self.states.len() {
                        self.states.resize(*id + 1, Affine::IDENTITY);
                    }
                    self.states[*id] = state.paint.transform;
                }
                SceneOp::Load { id } => {
                    state = EncoderState {
                        clip: root,
                        ..Default::default()
                    };
                    self.clip_pushes.clear();
                    let t = self.states.get(*id).copied().unwrap_or(Affine::IDENTITY);
                    state.paint.transform = t;
                    state.rel_trans = t;
                }
            }
        }

        for op in &mut self.frame.ops {
            elide_clips(&mut op.clip_stack);

            // Two ops differing only in integer offsets may share a layer.
            if let Some(outer) = op.clip_stack.last_mut() {
                let (t, off) = separate_transform(outer.key.rel_trans);
                outer.key.rel_trans = t;
                op.offset = off;
                op.key.transform = op.key.transform.then_translate(-off.to_vec2());
            }

            let mut hasher = DefaultHasher::new();
            for clip in &op.clip_stack {
                clip.key.hash(&mut hasher);
            }
            op.key.hash(&mut hasher);
            op.hash = hasher.finish();

            op.tex_op = None;
            if let Material::Image(image) = &op.key.material {
                // Texture ops differing only in integer offsets share a
                // transformed image.
                let t = op.key.transform.then_translate(op.offset.to_vec2());
                let (t, off) = separate_transform(t);
                let bounds = IntRect::round_out(&op.intersect).translate(IntPoint::new(-off.x, -off.y));
                op.tex_op = Some(tex_ops.len());
                tex_ops.push(TextureOp {
                    image: image.clone(),
                    offset: off,
                    key: TextureKey {
                        handle: image_handle(image),
                        transform: t.as_coeffs().map(f64::to_bits),
                        bounds,
                    },
                    img_alloc: None,
                    mat_alloc: None,
                });
            }
        }
    }

    fn paint(&mut self, state: &EncoderState, root: Option<usize>) {
        let mut paint_state = state.clone();
        if let Material::Image(image) = &state.paint.material {
            // Clip to the image bounds, to hide its neighbors in the atlas.
            let bounds = Rect::new(0.0, 0.0, image.width as f64, image.height as f64);
            self.add_clip(&mut paint_state, bounds, None, 0.0);
        }
        let Some(clip) = paint_state.clip else {
            return;
        };
        let intersect = self.clip_states[clip].intersect;
        if rect_is_empty(&intersect) {
            return;
        }

        // An opaque color directly under the root clip covers everything
        // painted before it.
        if paint_state.clip == root {
            if let Material::Color(color) = &paint_state.paint.material {
                if color.to_rgba8().a == 255 {
                    self.set_clear(color.with_alpha(1.0));
                    self.frame.reset();
                    return;
                }
            }
        }

        let mut clip_stack = SmallVec::new();
        let mut p = paint_state.clip;
        while let Some(idx) = p {
            let clip = &self.clip_states[idx];
            clip_stack.push(ClipCmd {
                key: clip.key.clone(),
                path: clip.path.clone(),
                abs_bounds: clip.abs_bounds,
            });
            p = clip.parent;
        }
        self.frame.ops.push(PaintOp {
            clip_stack,
            key: paint_state.paint,
            intersect,
            offset: IntPoint::ZERO,
            hash: 0,
            layer: 0,
            tex_op: None,
        });
    }
}

/// Removes rectangular clips that contain one of their descendants.
fn elide_clips(stack: &mut SmallVec<[ClipCmd; 4]>) {
    let mut j = 0;
    while j + 1 < stack.len() {
        let inner = &stack[j].key;
        let mut r = Quad::transform(inner.rel_trans, &inner.bounds);
        let mut k = j + 1;
        while k < stack.len() {
            let outer_trans = stack[k].key.rel_trans;
            if stack[k].path.is_none() && r.inside(&stack[k].key.bounds) {
                stack.remove(k);
                let child = &mut stack[k - 1].key;
                child.rel_trans = outer_trans * child.rel_trans;
            } else {
                k += 1;
            }
            r = r.then(outer_trans);
        }
        j += 1;
    }
}

/// Splits the translation of `t` into an integer offset, truncated towards
/// zero, and the fractional remainder.
pub(crate) fn separate_transform(t: Affine) -> (Affine, IntPoint) {
    let [a, b, c, d, ox, oy] = t.as_coeffs();
    let (ix, iy) = (ox.trunc(), oy.trunc());
    (
        Affine::new([a, b, c, d, ox - ix, oy - iy]),
        IntPoint::new(ix as i32, iy as i32),
    )
}

/// Stable cache handle of an image.
pub(crate) fn image_handle(image: &Image) -> u64 {
    image.data.id()
}

/// An oriented rectangle.
#[derive(Copy, Clone, Debug)]
struct Quad([Point; 4]);

impl Quad {
    fn transform(t: Affine, r: &Rect) -> Self {
        Self([
            t * Point::new(r.x0, r.y0),
            t * Point::new(r.x1, r.y0),
            t * Point::new(r.x1, r.y1),
            t * Point::new(r.x0, r.y1),
        ])
    }

    fn then(self, t: Affine) -> Self {
        Self(self.0.map(|p| t * p))
    }

    /// Reports whether every corner lies within `b`, edges included.
    fn inside(&self, b: &Rect) -> bool {
        self.0
            .iter()
            .all(|c| b.x0 <= c.x && c.x <= b.x1 && b.y0 <= c.y && c.y <= b.y1)
    }

    fn bounds(&self) -> Rect {
        let first = Rect::from_points(self.0[0], self.0[0]);
        self.0[1..]
            .iter()
            .fold(first, |r, p| r.union_pt(*p))
    }
}

fn hash_affine<H: Hasher>(t: &Affine, state: &mut H) {
    t.as_coeffs().map(f64::to_bits).hash(state);
}

fn hash_rect<H: Hasher>(r: &Rect, state: &mut H) {
    [r.x0, r.y0, r.x1, r.y1].map(f64::to_bits).hash(state);
}

fn hash_point<H: Hasher>(p: &Point, state: &mut H) {
    [p.x, p.y].map(f64::to_bits).hash(state);
}

fn hash_color<H: Hasher>(c: &Color, state: &mut H) {
    c.components.map(f32::to_bits).hash(state);
}

#[cfg(test)]
mod tests {
    use peniko::kurbo::Shape;
    use peniko::{Blob, ImageFormat};

    use super::*;
    use crate::Scene;

    const VIEWPORT: IntSize = IntSize::new(200, 200);

    fn collect(scene: &Scene) -> (Collector, Vec<TextureOp>) {
        let mut c = Collector::new();
        let mut tex_ops = Vec::new();
        c.reset();
        c.collect(scene, VIEWPORT, &mut tex_ops);
        (c, tex_ops)
    }

    fn translucent() -> Color {
        Color::from_rgba8(10, 20, 30, 128)
    }

    fn square(size: f64) -> PathData {
        PathData::from_path(Rect::new(0.0, 0.0, size, size).path_elements(0.1))
    }

    #[test]
    fn nested_rects_keep_the_innermost() {
        let mut decreasing = Scene::new();
        decreasing.push_clip(Rect::new(0.0, 0.0, 100.0, 100.0));
        decreasing.push_clip(Rect::new(10.0, 10.0, 20.0, 20.0));
        decreasing.color(translucent());
        decreasing.paint();
        let (c, _) = collect(&decreasing);
        assert_eq!(c.ops().len(), 1);
        assert_eq!(c.ops()[0].clip_depth(), 1);
        assert_eq!(c.ops()[0].clip_stack[0].key.bounds, Rect::new(10.0, 10.0, 20.0, 20.0));

        let mut increasing = Scene::new();
        increasing.push_clip(Rect::new(10.0, 10.0, 20.0, 20.0));
        increasing.push_clip(Rect::new(0.0, 0.0, 100.0, 100.0));
        increasing.color(translucent());
        increasing.paint();
        increasing.pop_clip();
        // The elided push must not pop the real clip.
        increasing.paint();
        let (c, _) = collect(&increasing);
        assert_eq!(c.ops().len(), 2);
        for op in c.ops() {
            assert_eq!(op.clip_depth(), 1);
            assert_eq!(op.bounds(), Rect::new(10.0, 10.0, 20.0, 20.0));
        }
    }

    #[test]
    fn path_clips_are_kept() {
        let mut scene = Scene::new();
        scene.push_clip_path(&square(50.0));
        scene.push_clip(Rect::new(10.0, 10.0, 20.0, 20.0));
        scene.color(translucent());
        scene.paint();
        let (c, _) = collect(&scene);
        let op = &c.ops()[0];
        assert_eq!(op.clip_depth(), 2);
        assert!(op.clip_stack[0].path.is_none());
        assert!(op.clip_stack[1].path.is_some());
    }

    #[test]
    fn rotated_rect_is_not_contained() {
        let mut scene = Scene::new();
        scene.push_clip(Rect::new(0.0, 0.0, 12.0, 12.0));
        scene.push_transform(Affine::rotate(0.5).then_translate((6.0, 0.0).into()));
        scene.push_clip(Rect::new(0.0, 0.0, 10.0, 10.0));
        scene.color(translucent());
        scene.paint();
        let (c, _) = collect(&scene);
        assert_eq!(c.ops()[0].clip_depth(), 2);
    }

    #[test]
    fn integer_translation_keeps_hash() {
        let ops_at = |x: f64, y: f64| {
            let mut scene = Scene::new();
            scene.push_transform(Affine::translate((x, y)));
            scene.push_clip_path(&square(20.0));
            scene.color(translucent());
            scene.paint();
            scene.pop_clip();
            scene.pop_transform();
            let (c, _) = collect(&scene);
            c.ops()[0].clone()
        };
        let a = ops_at(10.25, 20.0);
        let b = ops_at(15.25, 23.0);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.offset(), IntPoint::new(10, 20));
        assert_eq!(b.offset(), IntPoint::new(15, 23));

        let c = ops_at(10.5, 20.0);
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn opaque_root_paint_clears() {
        let mut scene = Scene::new();
        scene.fill_rect(Rect::new(5.0, 5.0, 50.0, 50.0), translucent());
        scene.fill_rect(
            Rect::new(0.0, 0.0, 200.0, 200.0),
            Color::from_rgba8(255, 0, 0, 255),
        );
        scene.push_transform(Affine::translate((30.0, 40.0)));
        scene.fill_rect(Rect::new(0.0, 0.0, 10.0, 10.0), translucent());
        scene.pop_transform();
        let (c, _) = collect(&scene);
        assert_eq!(c.ops().len(), 1);
        assert_eq!(c.ops()[0].bounds(), Rect::new(30.0, 40.0, 40.0, 50.0));
        let clear = c.clear_color().unwrap();
        let expected = [1.0, 0.0, 0.0, 1.0];
        for (a, b) in clear.iter().zip(expected) {
            assert!((a - b).abs() < 1e-4, "{clear:?}");
        }
    }

    #[test]
    fn translucent_root_paint_does_not_clear() {
        let mut scene = Scene::new();
        scene.color(translucent());
        scene.paint();
        let (c, _) = collect(&scene);
        assert_eq!(c.ops().len(), 1);
        assert_eq!(c.clear_color(), None);
    }

    #[test]
    fn offscreen_paint_is_dropped() {
        let mut scene = Scene::new();
        scene.fill_rect(Rect::new(300.0, 300.0, 310.0, 310.0), translucent());
        let (c, tex_ops) = collect(&scene);
        assert!(c.ops().is_empty());
        assert!(tex_ops.is_empty());
    }

    #[test]
    fn image_paint_records_texture_op() {
        let image = Image::new(Blob::from(vec![0_u8; 8 * 4 * 4]), ImageFormat::Rgba8, 8, 4);
        let mut scene = Scene::new();
        scene.push_transform(Affine::translate((20.5, 30.0)));
        scene.image(&image);
        scene.paint();
        scene.pop_transform();
        let (c, tex_ops) = collect(&scene);
        assert_eq!(tex_ops.len(), 1);
        let op = &c.ops()[0];
        assert_eq!(op.tex_op, Some(0));
        assert_eq!(op.bounds(), Rect::new(20.5, 30.0, 28.5, 34.0));
        let tex = &tex_ops[0];
        assert_eq!(tex.key.handle, image.data.id());
        assert_eq!(tex.offset, IntPoint::new(20, 30));
        assert_eq!(tex.key.transform(), Affine::translate((0.5, 0.0)));
        assert_eq!(tex.key.bounds, IntRect::new(0, 0, 9, 4));
    }

    #[test]
    fn load_restores_saved_transform() {
        let mut scene = Scene::new();
        scene.transform(Affine::translate((50.0, 60.0)));
        scene.save(3);
        scene.transform(Affine::translate((1000.0, 0.0)));
        scene.load(3);
        scene.fill_rect(Rect::new(0.0, 0.0, 10.0, 10.0), translucent());
        let (c, _) = collect(&scene);
        assert_eq!(c.ops()[0].bounds(), Rect::new(50.0, 60.0, 60.0, 70.0));
    }

    #[test]
    fn reset_swaps_frames() {
        let mut scene = Scene::new();
        scene.fill_rect(Rect::new(0.0, 0.0, 10.0, 10.0), translucent());
        let (mut c, mut tex_ops) = collect(&scene);
        c.reset();
        assert!(c.ops().is_empty());
        assert_eq!(c.prev_frame.ops.len(), 1);
        c.collect(&Scene::new(), VIEWPORT, &mut tex_ops);
        c.reset();
        assert!(c.prev_frame.ops.is_empty());
    }

    #[test]
    fn separate_truncates_towards_zero() {
        let (t, off) = separate_transform(Affine::translate((-2.5, 3.75)));
        assert_eq!(off, IntPoint::new(-2, 3));
        assert_eq!(t, Affine::translate((-0.5, 0.75)));
    }
}
