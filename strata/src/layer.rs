// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Grouping of paint operations into cached layers.
//!
//! A layer is a run of consecutive paint operations rasterized together into
//! one atlas allocation. Runs that are equal to a run of the previous frame
//! reuse its allocation instead of being rasterized again.

use std::ops::Range;

use peniko::color::{AlphaColor, LinearSrgb, Srgb};
use peniko::kurbo::{Affine, Rect};
use peniko::Color;
use smallvec::SmallVec;
use strata_encoding::math::rect_union;
use strata_encoding::{Encoding, FillMode, IntPoint, IntRect, IntSize, Transform};

use crate::atlas::{AllocId, AtlasId, Atlases};
use crate::collect::{Collector, FrameOps, Material, PaintOp, TextureOp};

/// A run of paint operations sharing an atlas allocation.
#[derive(Clone, Debug)]
pub struct Layer {
    /// Output space bounds of the ops.
    pub(crate) rect: IntRect,
    /// Where the layer is rasterized, once it is.
    pub(crate) alloc: Option<AllocId>,
    /// The ops of the layer, as indices into the frame's ops.
    pub(crate) ops: Range<usize>,
    /// The materials atlas referenced by the ops, if any.
    pub(crate) materials: Option<AtlasId>,
}

impl Layer {
    /// Output space bounds of the layer.
    pub fn rect(&self) -> IntRect {
        self.rect
    }

    /// The atlas allocation holding the rasterized layer.
    pub fn alloc(&self) -> Option<AllocId> {
        self.alloc
    }

    /// Indices of the layer's ops in [`Collector::ops`].
    pub fn ops(&self) -> Range<usize> {
        self.ops.clone()
    }
}

#[derive(Copy, Clone, Debug)]
struct HashIndex {
    index: usize,
    hash: u64,
}

/// Splits the ops of the current frame into layers, reusing the layers of
/// the previous frame where a run of ops is unchanged.
///
/// Material allocations of `tex_ops` must be assigned before matching.
pub(crate) fn match_layers<T>(
    collector: &mut Collector,
    tex_ops: &[TextureOp],
    atlases: &mut Atlases<T>,
    frame: u64,
) {
    let Collector {
        frame: cur,
        prev_frame: prev,
        ..
    } = collector;

    let mut order: Vec<HashIndex> = prev
        .ops
        .iter()
        .enumerate()
        .map(|(index, op)| HashIndex {
            index,
            hash: op.hash,
        })
        .collect();
    // Stable, so equal hashes keep their frame order.
    order.sort_by_key(|h| h.hash);

    let mut splitter = Splitter {
        cur,
        prev,
        tex_ops,
        atlases,
        frame,
    };
    let n = splitter.cur.ops.len();
    let mut start = 0;
    let mut idx = 0;
    while start + idx < n {
        let ops = &splitter.cur.ops[start..];
        let first = search_op(&order, ops[idx].hash);
        let (len, prev_layer) = longest_layer(&splitter.prev.ops, &order[first..], &ops[idx..]);
        if len == 0 {
            idx += 1;
            continue;
        }
        if idx > 0 {
            splitter.split(start..start + idx, None);
            start += idx;
            idx = 0;
        }
        splitter.split(start..start + len, prev_layer);
        start += len;
    }
    if start < n {
        splitter.split(start..n, None);
    }
}

struct Splitter<'a, T> {
    cur: &'a mut FrameOps,
    prev: &'a FrameOps,
    tex_ops: &'a [TextureOp],
    atlases: &'a mut Atlases<T>,
    frame: u64,
}

impl<T> Splitter<'_, T> {
    /// Adds layers for `ops`, split wherever the ops would need a second
    /// materials atlas. The compute stages bind only one.
    fn split(&mut self, mut ops: Range<usize>, prev_layer: Option<usize>) {
        while !ops.is_empty() {
            let mut materials = None;
            let mut end = ops.start;
            while end < ops.end {
                let mat_alloc = self.cur.ops[end]
                    .tex_op
                    .and_then(|i| self.tex_ops[i].mat_alloc);
                if let Some(mat_alloc) = mat_alloc {
                    let atlas = self.atlases.allocation(mat_alloc.alloc).atlas;
                    if materials.is_some_and(|m| m != atlas) {
                        break;
                    }
                    materials = Some(atlas);
                }
                end += 1;
            }
            let mut layer = Layer {
                rect: IntRect::ZERO,
                alloc: None,
                ops: ops.start..end,
                materials,
            };
            if let Some(prev) = prev_layer.map(|i| &self.prev.layers[i]) {
                if let Some(alloc) = prev.alloc.filter(|&a| self.atlases.is_live(a)) {
                    if prev.ops.len() == layer.ops.len() {
                        layer.alloc = Some(alloc);
                        layer.materials = prev.materials;
                        self.atlases.touch(alloc, self.frame);
                    }
                }
            }
            let layer_idx = self.cur.layers.len();
            for op in &mut self.cur.ops[layer.ops.clone()] {
                layer.rect = layer.rect.union(&IntRect::round_out(&op.intersect));
                op.layer = layer_idx;
            }
            self.cur.layers.push(layer);
            ops.start = end;
        }
    }
}

/// Finds the longest run of `ops` equal to a run of `prev` within one of its
/// layers, starting at one of the candidates of `order`.
///
/// Returns the run length and the layer of the previous frame.
fn longest_layer(
    prev: &[PaintOp],
    order: &[HashIndex],
    ops: &[PaintOp],
) -> (usize, Option<usize>) {
    let mut longest = 0;
    let mut longest_layer = None;
    'candidates: for candidate in order {
        let matched = &prev[candidate.index..];
        let layer = matched[0].layer;
        let off = matched[0].offset.sub(ops[0].offset);
        let mut end = 0;
        while end < matched.len() && end < ops.len() {
            let (m, o) = (&matched[end], &ops[end]);
            if m.layer != layer {
                break;
            }
            if m.hash != o.hash {
                if end == 0 {
                    // Candidates are sorted by hash, so no later one matches.
                    break 'candidates;
                }
                break;
            }
            if !op_equal(off, m, o) {
                break;
            }
            end += 1;
        }
        if end > longest {
            longest = end;
            longest_layer = Some(layer);
        }
    }
    (longest, longest_layer)
}

/// Index of the first entry of `order` with a hash not below `hash`.
fn search_op(order: &[HashIndex], hash: u64) -> usize {
    order.partition_point(|h| h.hash < hash)
}

/// Reports whether two ops draw the same content, `off` pixels apart.
fn op_equal(off: IntPoint, o1: &PaintOp, o2: &PaintOp) -> bool {
    if o1.clip_stack.len() != o2.clip_stack.len() || o1.key != o2.key {
        return false;
    }
    if o1.offset.sub(o2.offset) != off {
        return false;
    }
    o1.clip_stack.iter().zip(&o2.clip_stack).all(|(c1, c2)| {
        c1.key == c2.key
            && match (&c1.path, &c2.path) {
                (None, None) => true,
                (Some(p1), Some(p2)) => p1.same_data(p2) || p1.data() == p2.data(),
                _ => false,
            }
    })
}

/// Encodes the ops of `layer` so that its top left corner lands at `pos`.
pub(crate) fn encode_layer<T>(
    layer: &Layer,
    ops: &[PaintOp],
    pos: IntPoint,
    viewport: IntSize,
    enc: &mut Encoding,
    tex_ops: &[TextureOp],
    atlases: &Atlases<T>,
) {
    let off = pos.sub(layer.rect.min);
    enc.transform(&Transform::translate(off.x as f32, off.y as f32));
    for op in &ops[layer.ops.clone()] {
        encode_op(viewport, off, enc, tex_ops, atlases, op);
    }
    enc.transform(&Transform::translate(-off.x as f32, -off.y as f32));
}

fn encode_op<T>(
    viewport: IntSize,
    abs_off: IntPoint,
    enc: &mut Encoding,
    tex_ops: &[TextureOp],
    atlases: &Atlases<T>,
    op: &PaintOp,
) {
    // The kernels expect clip bounds to cover everything clipped by them.
    let mut unions: SmallVec<[Rect; 4]> = SmallVec::new();
    let mut union = Rect::ZERO;
    for clip in &op.clip_stack {
        union = rect_union(&union, &clip.abs_bounds);
        unions.push(union);
    }

    let abs_offf = abs_off.to_vec2();
    let mut fill_mode = FillMode::NonZero;
    let mut inv = Affine::translate(op.offset.to_vec2());
    enc.transform(&Transform::from_kurbo(&inv));
    for (i, clip) in op.clip_stack.iter().enumerate().rev() {
        let width = clip.key.stroke_width;
        if width > 0.0 {
            enc.fill_mode(FillMode::Stroke);
            enc.line_width(width);
            fill_mode = FillMode::Stroke;
        } else if fill_mode != FillMode::NonZero {
            enc.fill_mode(FillMode::NonZero);
            fill_mode = FillMode::NonZero;
        }
        enc.transform(&Transform::from_kurbo(&clip.key.rel_trans));
        inv *= clip.key.rel_trans;
        match &clip.path {
            None => enc.rect(&clip.key.bounds),
            Some(path) => enc.encode_path(path, fill_mode),
        }
        if i != 0 {
            enc.begin_clip(&(unions[i] + abs_offf));
        }
    }
    if op.clip_stack.is_empty() {
        enc.rect(&IntRect::from_origin_size(IntPoint::ZERO, viewport).to_kurbo());
    }

    match &op.key.material {
        Material::Image(_) => {
            // Invariant: `render_materials` runs before layers are encoded and
            // gives every image op a material.
            let Some((tex, mat)) = op
                .tex_op
                .map(|i| &tex_ops[i])
                .and_then(|tex| Some((tex, tex.mat_alloc?)))
            else {
                panic!("image paint without a material allocation");
            };
            let rect = atlases.allocation(mat.alloc).rect;
            let off = rect.min.add(mat.offset).sub(tex.offset).sub(abs_off);
            enc.fill_image(0, off);
        }
        Material::Color(color) => enc.fill_color(premultiplied_srgb(*color)),
        // Gradients are approximated by their first stop.
        Material::LinearGradient { color1, .. } => enc.fill_color(premultiplied_srgb(*color1)),
    }
    enc.transform(&Transform::from_kurbo(&inv.inverse()));
    // The innermost clip is consumed by the fill.
    for union in unions.iter().skip(1) {
        enc.end_clip(&(*union + abs_offf));
    }
    if fill_mode != FillMode::NonZero {
        enc.fill_mode(FillMode::NonZero);
    }
}

/// Converts a straight alpha sRGB color to 8-bit premultiplied sRGB, with
/// the premultiplication done in linear space.
pub(crate) fn premultiplied_srgb(color: Color) -> [u8; 4] {
    let straight = color.to_rgba8();
    if straight.a == 255 {
        return [straight.r, straight.g, straight.b, 255];
    }
    let [r, g, b, _] = color.convert::<LinearSrgb>().premultiply().components;
    let srgb = AlphaColor::<LinearSrgb>::new([r, g, b, 1.0])
        .convert::<Srgb>()
        .to_rgba8();
    [srgb.r, srgb.g, srgb.b, straight.a]
}

#[cfg(test)]
mod tests {
    use peniko::kurbo::{Circle, Shape};
    use strata_encoding::command::{op, CommandOp};
    use strata_encoding::PathData;

    use super::*;
    use crate::atlas::AllocQuery;
    use crate::device::{BufferBinding, TextureFormat};
    use crate::Scene;

    const VIEWPORT: IntSize = IntSize::new(256, 256);

    struct Harness {
        collector: Collector,
        atlases: Atlases<()>,
        tex_ops: Vec<TextureOp>,
        frame: u64,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                collector: Collector::new(),
                atlases: Atlases::new(1024),
                tex_ops: Vec::new(),
                frame: 0,
            }
        }

        /// Collects and matches `scene`, then allocates every new layer as
        /// the renderer would.
        fn frame(&mut self, scene: &Scene) {
            self.frame += 1;
            self.collector.reset();
            self.tex_ops.clear();
            self.collector.collect(scene, VIEWPORT, &mut self.tex_ops);
            match_layers(&mut self.collector, &self.tex_ops, &mut self.atlases, self.frame);
            for layer in &mut self.collector.frame.layers {
                if layer.alloc.is_none() {
                    let query = AllocQuery::new(
                        layer.rect.size().pad(1, 1),
                        TextureFormat::Rgba8,
                        BufferBinding::TEXTURE,
                    );
                    layer.alloc = self.atlases.alloc(&query, self.frame, false);
                }
            }
        }

        fn layers(&self) -> &[Layer] {
            &self.collector.frame.layers
        }
    }

    fn rects(scene: &mut Scene, rects: &[(f64, f64, u8)]) {
        for &(x, y, shade) in rects {
            scene.push_transform(Affine::translate((x, y)));
            scene.fill_rect(
                Rect::new(0.0, 0.0, 20.0, 10.0),
                Color::from_rgba8(shade, 0, 0, 200),
            );
            scene.pop_transform();
        }
    }

    #[test]
    fn unchanged_frame_reuses_every_layer() {
        let mut scene = Scene::new();
        rects(&mut scene, &[(10.0, 10.0, 1), (40.0, 10.0, 2), (70.0, 10.0, 3)]);
        let mut h = Harness::new();
        h.frame(&scene);
        assert_eq!(h.layers().len(), 1);
        let alloc = h.layers()[0].alloc;

        h.frame(&scene);
        assert_eq!(h.layers().len(), 1);
        assert_eq!(h.layers()[0].alloc, alloc);
        assert_eq!(h.layers()[0].ops, 0..3);
    }

    #[test]
    fn moved_layer_keeps_allocation() {
        let mut h = Harness::new();
        let mut scene = Scene::new();
        rects(&mut scene, &[(10.0, 10.0, 1)]);
        h.frame(&scene);
        let first = h.layers()[0].clone();
        let alloc = first.alloc.unwrap();
        let rect = h.atlases.allocation(alloc).rect;

        let mut moved = Scene::new();
        rects(&mut moved, &[(13.0, 13.0, 1)]);
        h.frame(&moved);
        let second = &h.layers()[0];
        assert_eq!(second.alloc, Some(alloc));
        assert_eq!(second.rect, first.rect.translate(IntPoint::new(3, 3)));
        assert_eq!(h.atlases.allocation(alloc).rect, rect);
        assert_eq!(h.atlases.allocation(alloc).frame, 2);
    }

    #[test]
    fn changed_op_splits_runs() {
        let mut h = Harness::new();
        let mut scene = Scene::new();
        rects(&mut scene, &[(10.0, 10.0, 1), (40.0, 10.0, 2), (70.0, 10.0, 3)]);
        h.frame(&scene);
        let old = h.layers()[0].alloc;

        let mut changed = Scene::new();
        rects(&mut changed, &[(10.0, 10.0, 1), (40.0, 10.0, 9), (70.0, 10.0, 3)]);
        h.frame(&changed);
        let ranges: Vec<_> = h.layers().iter().map(|l| l.ops.clone()).collect();
        assert_eq!(ranges, [0..1, 1..2, 2..3]);
        // Partial runs can't reuse a layer of a different length.
        assert!(h.layers().iter().all(|l| l.alloc != old));
        assert_eq!(h.collector.ops()[2].layer(), 2);
    }

    #[test]
    fn unmatched_ops_form_one_layer() {
        let mut h = Harness::new();
        let mut scene = Scene::new();
        rects(&mut scene, &[(10.0, 10.0, 1)]);
        h.frame(&scene);

        let mut next = Scene::new();
        rects(&mut next, &[(10.0, 50.0, 5), (10.0, 80.0, 6), (10.0, 10.0, 1)]);
        h.frame(&next);
        let ranges: Vec<_> = h.layers().iter().map(|l| l.ops.clone()).collect();
        assert_eq!(ranges, [0..2, 2..3]);
        assert_eq!(h.layers()[0].rect, IntRect::new(10, 50, 30, 90));
    }

    #[test]
    fn search_finds_lower_bound() {
        let order: Vec<_> = [1, 3, 3, 7]
            .iter()
            .enumerate()
            .map(|(index, &hash)| HashIndex { index, hash })
            .collect();
        assert_eq!(search_op(&order, 0), 0);
        assert_eq!(search_op(&order, 3), 1);
        assert_eq!(search_op(&order, 4), 3);
        assert_eq!(search_op(&order, 8), 4);
    }

    #[test]
    fn encoded_op_restores_state() {
        let mut h = Harness::new();
        let mut scene = Scene::new();
        rects(&mut scene, &[(10.0, 20.0, 1)]);
        h.frame(&scene);
        let layer = h.layers()[0].clone();
        let mut enc = Encoding::new();
        encode_layer(
            &layer,
            h.collector.ops(),
            IntPoint::new(1, 1),
            VIEWPORT,
            &mut enc,
            &h.tex_ops,
            &h.atlases,
        );
        let ops: Vec<_> = enc.scene.iter().map(op).collect();
        use CommandOp::*;
        assert_eq!(
            ops,
            [
                Transform, Transform, Transform, Line, Line, Line, Line, FillColor, Transform,
                Transform
            ]
        );
        assert_eq!(enc.n_paths, 1);
        assert_eq!(enc.n_path_segments, 4);
    }

    #[test]
    fn nested_clips_emit_balanced_brackets() {
        let mut h = Harness::new();
        let mut scene = Scene::new();
        let path = PathData::from_path(Circle::new((50.0, 50.0), 20.0).path_elements(0.1));
        scene.push_clip_stroke(&path, 2.0);
        scene.push_clip(Rect::new(40.0, 40.0, 60.0, 60.0));
        scene.color(Color::from_rgba8(0, 0, 255, 255));
        scene.paint();
        h.frame(&scene);
        let mut enc = Encoding::new();
        encode_layer(
            &h.layers()[0],
            h.collector.ops(),
            IntPoint::ZERO,
            VIEWPORT,
            &mut enc,
            &h.tex_ops,
            &h.atlases,
        );
        let count = |wanted| enc.scene.iter().filter(|c| op(c) == wanted).count();
        assert_eq!(count(CommandOp::BeginClip), 1);
        assert_eq!(count(CommandOp::EndClip), 1);
        assert_eq!(count(CommandOp::SetFillMode), 2);
        assert_eq!(count(CommandOp::Gap), 0);
        // Stroking switched the mode back before the fill.
        let fill = enc.scene.iter().position(|c| op(c) == CommandOp::FillColor).unwrap();
        let last_mode = enc.scene[..fill]
            .iter()
            .rposition(|c| op(c) == CommandOp::SetFillMode)
            .unwrap();
        assert_eq!(enc.scene[last_mode][1], FillMode::NonZero as u32);
    }

    #[test]
    fn premultiplies_in_linear_space() {
        assert_eq!(premultiplied_srgb(Color::from_rgba8(1, 2, 3, 255)), [1, 2, 3, 255]);
        assert_eq!(premultiplied_srgb(Color::from_rgba8(255, 255, 255, 0)), [0, 0, 0, 0]);
        let [r, g, b, a] = premultiplied_srgb(Color::from_rgba8(255, 255, 255, 128));
        assert_eq!(a, 128);
        assert!(r == g && g == b);
        assert!((187..=189).contains(&r), "{r}");
    }
}
