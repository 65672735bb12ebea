// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use peniko::kurbo::{Affine, Point, Rect};
use peniko::{Color, Image};
use strata_encoding::{IntRect, PathData};

/// A single drawing operation.
///
/// Clips and transforms nest: every `Clip` must be matched by a `PopClip`
/// and every pushing `Transform` by a `PopTransform`.
#[derive(Clone, Debug)]
pub enum SceneOp {
    /// Requests timing information for this frame.
    Profile,
    /// Applies `transform` after the current transform. When `push` is set,
    /// the previous transform is saved for the matching `PopTransform`.
    Transform { transform: Affine, push: bool },
    PopTransform,
    /// Strokes the next clip path with the given width instead of filling it.
    Stroke { width: f32 },
    /// Sets the outline of the next clip.
    Path(PathSpec),
    /// Intersects the clip with `bounds`, and with the pending path if any.
    Clip { bounds: Rect },
    PopClip,
    Color(Color),
    LinearGradient {
        stop1: Point,
        stop2: Point,
        color1: Color,
        color2: Color,
    },
    Image(Image),
    /// Fills the current clip with the current material.
    Paint,
    /// Saves the current transform under `id`.
    Save { id: usize },
    /// Restores the transform saved under `id` and resets the clip.
    Load { id: usize },
}

/// An encoded clip outline.
#[derive(Clone, Debug)]
pub struct PathSpec {
    pub data: PathData,
}

/// An owned recording of [`SceneOp`]s.
#[derive(Clone, Debug, Default)]
pub struct Scene {
    ops: Vec<SceneOp>,
}

static_assertions::assert_impl_all!(Scene: Send, Sync);

impl Scene {
    /// Creates a new scene.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes all content from the scene.
    pub fn reset(&mut self) {
        self.ops.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns the recorded operations.
    pub fn ops(&self) -> &[SceneOp] {
        &self.ops
    }

    /// Appends a raw operation.
    pub fn push(&mut self, op: SceneOp) {
        self.ops.push(op);
    }

    pub fn profile(&mut self) {
        self.push(SceneOp::Profile);
    }

    /// Pushes `transform` onto the transform stack.
    pub fn push_transform(&mut self, transform: Affine) {
        self.push(SceneOp::Transform {
            transform,
            push: true,
        });
    }

    /// Applies `transform` without saving the previous transform.
    pub fn transform(&mut self, transform: Affine) {
        self.push(SceneOp::Transform {
            transform,
            push: false,
        });
    }

    pub fn pop_transform(&mut self) {
        self.push(SceneOp::PopTransform);
    }

    /// Pushes a rectangular clip.
    pub fn push_clip(&mut self, bounds: Rect) {
        self.push(SceneOp::Clip { bounds });
    }

    /// Pushes a clip filling `path`.
    pub fn push_clip_path(&mut self, path: &PathData) {
        let bounds = IntRect::round_out(&path.bounds()).to_kurbo();
        self.push(SceneOp::Path(PathSpec { data: path.clone() }));
        self.push(SceneOp::Clip { bounds });
    }

    /// Pushes a clip covering the outline of `path` stroked with `width`.
    pub fn push_clip_stroke(&mut self, path: &PathData, width: f32) {
        let bounds = path.bounds().inflate(width as f64 * 0.5, width as f64 * 0.5);
        self.push(SceneOp::Stroke { width });
        self.push(SceneOp::Path(PathSpec { data: path.clone() }));
        self.push(SceneOp::Clip {
            bounds: IntRect::round_out(&bounds).to_kurbo(),
        });
    }

    pub fn pop_clip(&mut self) {
        self.push(SceneOp::PopClip);
    }

    /// Sets a solid color material.
    pub fn color(&mut self, color: Color) {
        self.push(SceneOp::Color(color));
    }

    /// Sets a two-stop linear gradient material.
    pub fn linear_gradient(&mut self, stop1: Point, color1: Color, stop2: Point, color2: Color) {
        self.push(SceneOp::LinearGradient {
            stop1,
            stop2,
            color1,
            color2,
        });
    }

    /// Sets an image material, drawn with its top left corner at the origin.
    pub fn image(&mut self, image: &Image) {
        self.push(SceneOp::Image(image.clone()));
    }

    pub fn paint(&mut self) {
        self.push(SceneOp::Paint);
    }

    /// Fills `rect` with `color`.
    pub fn fill_rect(&mut self, rect: Rect, color: Color) {
        self.push_clip(rect);
        self.color(color);
        self.paint();
        self.pop_clip();
    }

    pub fn save(&mut self, id: usize) {
        self.push(SceneOp::Save { id });
    }

    pub fn load(&mut self, id: usize) {
        self.push(SceneOp::Load { id });
    }
}

impl<'a> IntoIterator for &'a Scene {
    type Item = &'a SceneOp;
    type IntoIter = std::slice::Iter<'a, SceneOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}

impl Extend<SceneOp> for Scene {
    fn extend<I: IntoIterator<Item = SceneOp>>(&mut self, iter: I) {
        self.ops.extend(iter);
    }
}
