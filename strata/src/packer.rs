// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Rectangle packing for texture atlases.

use strata_encoding::{IntPoint, IntRect, IntSize};

/// Side length of the free space of a fresh page. The real limit is
/// [`Packer::max_dims`].
const PAGE_EXTENT: i32 = 1_000_000;

/// Packs many small rectangles into a few large pages.
///
/// Each placement takes the top left corner of a free space and splits the
/// rest into (at most) a bottom and a right space. Among the candidate
/// spaces, the one that grows the current page the least is chosen.
#[derive(Clone, Debug, Default)]
pub struct Packer {
    /// Largest page size the packer may grow to.
    pub max_dims: IntSize,
    spaces: Vec<IntRect>,
    sizes: Vec<IntSize>,
}

/// Position of a packed rectangle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    /// Index of the page.
    pub page: usize,
    pub pos: IntPoint,
}

impl Packer {
    pub fn new(max_dims: IntSize) -> Self {
        Self {
            max_dims,
            ..Default::default()
        }
    }

    /// Sizes of the pages, grown to cover every placement.
    pub fn sizes(&self) -> &[IntSize] {
        &self.sizes
    }

    /// Removes every page.
    pub fn clear(&mut self) {
        self.sizes.clear();
        self.spaces.clear();
    }

    /// Starts a new, empty page.
    pub fn new_page(&mut self) {
        self.sizes.push(IntSize::default());
        self.spaces.clear();
        self.spaces.push(IntRect::new(0, 0, PAGE_EXTENT, PAGE_EXTENT));
    }

    /// Adds `size` to the current page without starting a new one.
    pub fn try_add(&mut self, size: IntSize) -> Option<Placement> {
        let last_size = *self.sizes.last()?;
        let mut best: Option<(usize, IntSize)> = None;
        for (i, space) in self.spaces.iter().enumerate() {
            if space.width() < size.width || space.height() < size.height {
                continue;
            }
            let mut page = last_size;
            let x = space.min.x + size.width;
            if x > page.width {
                if x > self.max_dims.width {
                    continue;
                }
                page.width = x;
            }
            let y = space.min.y + size.height;
            if y > page.height {
                if y > self.max_dims.height {
                    continue;
                }
                page.height = y;
            }
            if best.map_or(true, |(_, best_size)| page.area() < best_size.area()) {
                best = Some((i, page));
            }
        }
        let (idx, page_size) = best?;
        let space = self.spaces.swap_remove(idx);
        let pos = space.min;
        if space.height() > size.height {
            self.spaces.push(IntRect::new(
                pos.x,
                pos.y + size.height,
                space.max.x,
                space.max.y,
            ));
        }
        if space.width() > size.width {
            self.spaces.push(IntRect::new(
                pos.x + size.width,
                pos.y,
                space.max.x,
                pos.y + size.height,
            ));
        }
        let page = self.sizes.len() - 1;
        self.sizes[page] = page_size;
        Some(Placement { page, pos })
    }
}
