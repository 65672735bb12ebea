// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytemuck::{Pod, Zeroable};
use peniko::kurbo;

/// Affine transformation matrix in the layout of the `Transform` scene command.
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Transform {
    /// 2x2 matrix, column major: `[sx, hy, hx, sy]`.
    pub matrix: [f32; 4],
    /// Translation.
    pub translation: [f32; 2],
}

impl Transform {
    /// Identity transform.
    pub const IDENTITY: Self = Self {
        matrix: [1.0, 0.0, 0.0, 1.0],
        translation: [0.0; 2],
    };

    /// Creates a pure translation.
    pub fn translate(x: f32, y: f32) -> Self {
        Self {
            translation: [x, y],
            ..Self::IDENTITY
        }
    }

    /// Creates a transform from a kurbo affine matrix.
    pub fn from_kurbo(transform: &kurbo::Affine) -> Self {
        let c = transform.as_coeffs().map(|x| x as f32);
        Self {
            matrix: [c[0], c[1], c[2], c[3]],
            translation: [c[4], c[5]],
        }
    }

    /// Converts the transform to a kurbo affine matrix.
    pub fn to_kurbo(&self) -> kurbo::Affine {
        kurbo::Affine::new(
            [
                self.matrix[0],
                self.matrix[1],
                self.matrix[2],
                self.matrix[3],
                self.translation[0],
                self.translation[1],
            ]
            .map(|x| x as f64),
        )
    }
}

pub fn point_to_f32(point: kurbo::Point) -> [f32; 2] {
    [point.x as f32, point.y as f32]
}

/// Reports whether a float rectangle covers no area.
pub fn rect_is_empty(r: &kurbo::Rect) -> bool {
    r.x0 >= r.x1 || r.y0 >= r.y1
}

/// Intersection of two rectangles, collapsing to the zero rectangle when they
/// don't overlap.
pub fn rect_intersect(a: &kurbo::Rect, b: &kurbo::Rect) -> kurbo::Rect {
    let r = kurbo::Rect::new(a.x0.max(b.x0), a.y0.max(b.y0), a.x1.min(b.x1), a.y1.min(b.y1));
    if rect_is_empty(&r) {
        kurbo::Rect::ZERO
    } else {
        r
    }
}

/// Union of two rectangles, where empty rectangles are ignored.
pub fn rect_union(a: &kurbo::Rect, b: &kurbo::Rect) -> kurbo::Rect {
    if rect_is_empty(a) {
        return *b;
    }
    if rect_is_empty(b) {
        return *a;
    }
    kurbo::Rect::new(a.x0.min(b.x0), a.y0.min(b.y0), a.x1.max(b.x1), a.y1.max(b.y1))
}

/// Integer point, used for pixel positions in atlases and layers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct IntPoint {
    pub x: i32,
    pub y: i32,
}

impl IntPoint {
    pub const ZERO: Self = Self { x: 0, y: 0 };

    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn add(self, other: Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y)
    }

    pub fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y)
    }

    pub fn to_vec2(self) -> kurbo::Vec2 {
        kurbo::Vec2::new(self.x as f64, self.y as f64)
    }
}

/// Integer size in pixels.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct IntSize {
    pub width: i32,
    pub height: i32,
}

impl IntSize {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Area in pixels, computed in 64 bits so huge packer pages don't overflow.
    pub fn area(self) -> i64 {
        self.width as i64 * self.height as i64
    }

    /// Grows the size by `dx` and `dy` pixels.
    pub fn pad(self, dx: i32, dy: i32) -> Self {
        Self::new(self.width + dx, self.height + dy)
    }
}

/// Integer rectangle with exclusive max corner.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct IntRect {
    pub min: IntPoint,
    pub max: IntPoint,
}

impl IntRect {
    pub const ZERO: Self = Self {
        min: IntPoint::ZERO,
        max: IntPoint::ZERO,
    };

    pub const fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self {
            min: IntPoint::new(x0, y0),
            max: IntPoint::new(x1, y1),
        }
    }

    pub fn from_origin_size(origin: IntPoint, size: IntSize) -> Self {
        Self {
            min: origin,
            max: IntPoint::new(origin.x + size.width, origin.y + size.height),
        }
    }

    /// Smallest integer rectangle containing `r`.
    pub fn round_out(r: &kurbo::Rect) -> Self {
        Self::new(
            r.x0.floor() as i32,
            r.y0.floor() as i32,
            r.x1.ceil() as i32,
            r.y1.ceil() as i32,
        )
    }

    pub fn width(&self) -> i32 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> i32 {
        self.max.y - self.min.y
    }

    pub fn size(&self) -> IntSize {
        IntSize::new(self.width(), self.height())
    }

    pub fn is_empty(&self) -> bool {
        self.min.x >= self.max.x || self.min.y >= self.max.y
    }

    /// Offsets the rectangle by `p`.
    pub fn translate(&self, p: IntPoint) -> Self {
        Self {
            min: self.min.add(p),
            max: self.max.add(p),
        }
    }

    /// Intersection, collapsing to [`IntRect::ZERO`] when empty.
    pub fn intersect(&self, other: &Self) -> Self {
        let r = Self::new(
            self.min.x.max(other.min.x),
            self.min.y.max(other.min.y),
            self.max.x.min(other.max.x),
            self.max.y.min(other.max.y),
        );
        if r.is_empty() {
            Self::ZERO
        } else {
            r
        }
    }

    /// Union, ignoring empty rectangles.
    pub fn union(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self::new(
            self.min.x.min(other.min.x),
            self.min.y.min(other.min.y),
            self.max.x.max(other.max.x),
            self.max.y.max(other.max.y),
        )
    }

    /// Reports whether the two rectangles share any pixel.
    pub fn overlaps(&self, other: &Self) -> bool {
        !self.intersect(other).is_empty()
    }

    pub fn to_kurbo(&self) -> kurbo::Rect {
        kurbo::Rect::new(
            self.min.x as f64,
            self.min.y as f64,
            self.max.x as f64,
            self.max.y as f64,
        )
    }
}
