// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use peniko::kurbo::{Point, Rect};

use crate::command::{self, op, Command, CommandOp, FillMode};
use crate::math::{IntPoint, Transform};
use crate::path::PathData;

/// Encoded scene command stream for one compute pass.
///
/// The counters size the static regions of the memory buffer, so they must
/// only be read after a complete encode pass.
#[derive(Clone, Debug, Default)]
pub struct Encoding {
    /// The command stream.
    pub scene: Vec<Command>,
    /// Number of encoded paths, counting fills and clip begin/end markers.
    pub n_paths: u32,
    /// Number of encoded path segments.
    pub n_path_segments: u32,
    /// Number of encoded transforms.
    pub n_transforms: u32,
}

impl Encoding {
    /// Creates a new encoding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the encoding is empty.
    pub fn is_empty(&self) -> bool {
        self.scene.is_empty()
    }

    /// Number of encoded elements.
    pub fn n_elements(&self) -> u32 {
        self.scene.len() as u32
    }

    #[doc(alias = "clear")]
    // This is not called "clear" because "clear" has other implications
    // in graphics contexts.
    /// Clears the encoding, keeping its allocation.
    pub fn reset(&mut self) {
        self.scene.clear();
        self.n_paths = 0;
        self.n_path_segments = 0;
        self.n_transforms = 0;
    }

    /// Multiplies the current transform by `t`.
    pub fn transform(&mut self, t: &Transform) {
        self.scene.push(command::transform(t));
        self.n_transforms += 1;
    }

    pub fn line_width(&mut self, width: f32) {
        self.scene.push(command::line_width(width));
    }

    pub fn fill_mode(&mut self, mode: FillMode) {
        self.scene.push(command::fill_mode(mode));
    }

    pub fn begin_clip(&mut self, bbox: &Rect) {
        self.scene.push(command::begin_clip(bbox));
        self.n_paths += 1;
    }

    pub fn end_clip(&mut self, bbox: &Rect) {
        self.scene.push(command::end_clip(bbox));
        self.n_paths += 1;
    }

    /// Encodes the outline of `r` as four lines, clockwise from its origin.
    pub fn rect(&mut self, r: &Rect) {
        let c0 = Point::new(r.x0, r.y0);
        let c1 = Point::new(r.x0, r.y1);
        let c2 = Point::new(r.x1, r.y1);
        let c3 = Point::new(r.x1, r.y0);
        self.line(c0, c1);
        self.line(c1, c2);
        self.line(c2, c3);
        self.line(c3, c0);
    }

    /// Fills the current path with a premultiplied sRGB color.
    pub fn fill_color(&mut self, rgba: [u8; 4]) {
        self.scene.push(command::fill_color(rgba));
        self.n_paths += 1;
    }

    /// Fills the current path from the materials image.
    pub fn fill_image(&mut self, index: u32, offset: IntPoint) {
        self.scene.push(command::fill_image(index, offset));
        self.n_paths += 1;
    }

    pub fn line(&mut self, from: Point, to: Point) {
        self.scene.push(command::line(from, to));
        self.n_path_segments += 1;
    }

    /// Copies pre-encoded path segments.
    ///
    /// Gaps between contours are dropped from strokes and closed with a
    /// straight line in fills.
    pub fn encode_path(&mut self, path: &PathData, mode: FillMode) {
        for mut cmd in path.commands() {
            if op(&cmd) == CommandOp::Gap {
                if mode != FillMode::NonZero {
                    continue;
                }
                let (from, to) = command::decode_gap(&cmd);
                cmd = command::line(from, to);
            }
            self.scene.push(cmd);
            self.n_path_segments += 1;
        }
    }

    /// Pads the stream with no-op commands to the next multiple of
    /// `partition_size`, so the element stage never reads past the end.
    ///
    /// A stream that is already aligned still gets one full partition of
    /// padding.
    pub fn pad_to_partition(&mut self, partition_size: usize) {
        let padding = partition_size - self.scene.len() % partition_size;
        self.scene.resize(self.scene.len() + padding, [0; 9]);
    }

    /// The command stream as bytes, ready for upload.
    pub fn scene_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.scene)
    }
}
