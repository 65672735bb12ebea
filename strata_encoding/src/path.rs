// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::hash::{DefaultHasher, Hasher};
use std::sync::Arc;

use peniko::kurbo::{self, PathEl, Point, Rect};

use crate::command::{self, Command, COMMAND_SIZE};

/// Size of one encoded path segment: a contour index followed by a command.
pub const SEGMENT_SIZE: usize = 4 + COMMAND_SIZE;

/// Raw encoded path segments, ready for [`Encoding::encode_path`](crate::Encoding::encode_path).
#[derive(Clone, Debug)]
pub struct PathData {
    data: Arc<[u8]>,
    bounds: Rect,
    hash: u64,
}

impl PathData {
    /// Encodes a kurbo path.
    pub fn from_path(path: impl IntoIterator<Item = PathEl>) -> Self {
        let mut encoder = PathEncoder::new();
        for el in path {
            match el {
                PathEl::MoveTo(p) => encoder.move_to(p),
                PathEl::LineTo(p) => encoder.line_to(p),
                PathEl::QuadTo(p1, p2) => encoder.quad_to(p1, p2),
                PathEl::CurveTo(p1, p2, p3) => encoder.cubic_to(p1, p2, p3),
                PathEl::ClosePath => encoder.close(),
            }
        }
        encoder.finish()
    }

    /// The encoded segment records.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bounds of all segment end and control points.
    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    /// Content hash of the encoded records.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Cheap identity check: whether both values share the same encoded buffer.
    pub fn same_data(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterates over the encoded commands, skipping contour indices.
    pub fn commands(&self) -> impl Iterator<Item = Command> + '_ {
        self.data.chunks_exact(SEGMENT_SIZE).map(|chunk| {
            let mut cmd: Command = [0; 9];
            bytemuck::cast_slice_mut(&mut cmd).copy_from_slice(&chunk[4..]);
            cmd
        })
    }
}

/// Encoder for path segments.
///
/// Moving the pen away from an open contour records a gap back to the contour
/// start, so fills can close the outline while strokes skip it.
#[derive(Debug)]
pub struct PathEncoder {
    data: Vec<u8>,
    hasher: DefaultHasher,
    contour: u32,
    pen: Point,
    start: Point,
    bounds: Option<Rect>,
}

impl Default for PathEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PathEncoder {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            hasher: DefaultHasher::new(),
            contour: 1,
            pen: Point::ZERO,
            start: Point::ZERO,
            bounds: None,
        }
    }

    pub fn move_to(&mut self, to: Point) {
        if self.pen == to {
            return;
        }
        self.gap();
        self.contour += 1;
        self.pen = to;
        self.start = to;
    }

    pub fn line_to(&mut self, to: Point) {
        self.push(command::line(self.pen, to));
        self.pen = to;
        self.expand(to);
    }

    pub fn quad_to(&mut self, ctrl: Point, to: Point) {
        self.push(command::quad(self.pen, ctrl, to));
        self.pen = to;
        self.expand(ctrl);
        self.expand(to);
    }

    pub fn cubic_to(&mut self, ctrl0: Point, ctrl1: Point, to: Point) {
        if ctrl0 == self.pen && ctrl1 == self.pen && to == self.pen {
            return;
        }
        self.push(command::cubic(self.pen, ctrl0, ctrl1, to));
        self.pen = to;
        self.expand(ctrl0);
        self.expand(ctrl1);
        self.expand(to);
    }

    pub fn close(&mut self) {
        if self.pen != self.start {
            self.line_to(self.start);
        }
        self.contour += 1;
    }

    pub fn finish(mut self) -> PathData {
        self.gap();
        PathData {
            hash: self.hasher.finish(),
            bounds: self.bounds.unwrap_or(Rect::ZERO),
            data: self.data.into(),
        }
    }

    fn gap(&mut self) {
        if self.pen != self.start {
            self.push(command::gap(self.pen, self.start));
        }
    }

    fn push(&mut self, cmd: Command) {
        let start = self.data.len();
        self.data.extend_from_slice(&self.contour.to_le_bytes());
        self.data.extend_from_slice(bytemuck::bytes_of(&cmd));
        self.hasher.write(&self.data[start..]);
    }

    fn expand(&mut self, p: Point) {
        self.bounds = Some(match self.bounds {
            None => Rect::from_points(p, p),
            Some(b) => b.union_pt(p),
        });
    }
}

impl From<&kurbo::BezPath> for PathData {
    fn from(path: &kurbo::BezPath) -> Self {
        Self::from_path(path.elements().iter().copied())
    }
}
