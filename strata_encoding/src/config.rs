// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytemuck::{Pod, Zeroable};

use crate::Encoding;

/// Width of a fine rasterization tile in pixels.
pub const TILE_WIDTH: u32 = 32;
/// Height of a fine rasterization tile in pixels.
pub const TILE_HEIGHT: u32 = 32;

/// Initial per-tile command list allocation in bytes.
pub const PTCL_INITIAL_ALLOC: u32 = 1024;

// Record sizes of the static regions, in bytes. These must be kept in sync
// with the structs in the kernels.
pub const PATH_SIZE: u32 = 12;
pub const BIN_SIZE: u32 = 8;
pub const PATHSEG_SIZE: u32 = 52;
pub const ANNO_SIZE: u32 = 32;
pub const TRANS_SIZE: u32 = 24;

/// Size of a single partition state of the element stage.
pub const STATE_SIZE: u32 = 60;
/// Size of the per-partition state: a flag followed by two states.
pub const STATE_STRIDE: u32 = 4 + 2 * STATE_SIZE;

/// The largest and most common workgroup size.
pub const WG_SIZE: u32 = 128;
/// Number of scene commands consumed by one element workgroup.
pub const PARTITION_SIZE: u32 = 32 * 4;

/// Extra space for dynamic allocations added when the memory buffer grows.
pub const MEMORY_SIZE_BUMP: u32 = 4 * 1024 * 1024;

/// Memory header error code: success.
pub const MEM_NO_ERROR: u32 = 0;
/// Memory header error code: a dynamic allocation ran out of space.
pub const MEM_MALLOC_FAILED: u32 = 1;

/// Offset of a static allocation in the memory buffer.
///
/// This must be kept in sync with `Alloc` in `mem.h`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct MemAlloc {
    pub offset: u32,
}

/// Pipeline configuration, read by every stage.
///
/// This must be kept in sync with the struct in `setup.h`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct Config {
    /// Number of paths.
    pub n_elements: u32,
    pub n_pathseg: u32,
    pub width_in_tiles: u32,
    pub height_in_tiles: u32,
    pub tile_alloc: MemAlloc,
    pub bin_alloc: MemAlloc,
    pub ptcl_alloc: MemAlloc,
    pub pathseg_alloc: MemAlloc,
    pub anno_alloc: MemAlloc,
    pub trans_alloc: MemAlloc,
}

/// Header at the start of the memory buffer.
///
/// `mem_offset` is the bump pointer of the GPU allocator. The kernels set
/// `mem_error` when an allocation overflows the buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct MemoryHeader {
    pub mem_offset: u32,
    pub mem_error: u32,
}

/// Size of [`MemoryHeader`] in bytes.
pub const MEMORY_HEADER_SIZE: u32 = size_of::<MemoryHeader>() as u32;

/// Errors from computing a [`Layout`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    /// The output needs more bins than a coarse workgroup can handle.
    #[error("output too large ({width}x{height})")]
    OutputTooLarge { width: u32, height: u32 },
}

/// Type alias for a workgroup grid.
pub type WorkgroupSize = (u32, u32, u32);

/// Computed sizes for all dispatches.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkgroupCounts {
    pub elements: WorkgroupSize,
    pub tile_alloc: WorkgroupSize,
    pub path_coarse: WorkgroupSize,
    pub backdrop: WorkgroupSize,
    pub binning: WorkgroupSize,
    pub coarse: WorkgroupSize,
    pub kernel4: WorkgroupSize,
}

/// Static layout of the memory buffer for one compute pass.
#[derive(Copy, Clone, Debug, Default)]
pub struct Layout {
    pub config: Config,
    /// Bytes taken by the static allocations, following the header.
    pub static_size: u32,
    /// Number of element partitions.
    pub n_partitions: u32,
    pub workgroup_counts: WorkgroupCounts,
}

impl Layout {
    /// Computes the layout for a padded encoding rendered to an output of
    /// `width_in_tiles` by `height_in_tiles` tiles.
    pub fn new(
        encoding: &Encoding,
        width_in_tiles: u32,
        height_in_tiles: u32,
    ) -> Result<Self, LayoutError> {
        let width_in_bins = width_in_tiles.div_ceil(16);
        let height_in_bins = height_in_tiles.div_ceil(8);
        if width_in_bins * height_in_bins > WG_SIZE {
            return Err(LayoutError::OutputTooLarge {
                width: width_in_tiles * TILE_WIDTH,
                height: height_in_tiles * TILE_HEIGHT,
            });
        }
        let n_paths = encoding.n_paths;
        let n_pathseg = encoding.n_path_segments;

        let mut static_size = 0;
        let mut malloc = |size: u32| {
            let offset = static_size;
            static_size += align_up(size, 4);
            MemAlloc { offset }
        };
        let config = Config {
            n_elements: n_paths,
            n_pathseg,
            width_in_tiles,
            height_in_tiles,
            tile_alloc: malloc(n_paths * PATH_SIZE),
            bin_alloc: malloc(align_up(n_paths, WG_SIZE) * BIN_SIZE),
            ptcl_alloc: malloc(width_in_tiles * height_in_tiles * PTCL_INITIAL_ALLOC),
            pathseg_alloc: malloc(n_pathseg * PATHSEG_SIZE),
            anno_alloc: malloc(n_paths * ANNO_SIZE),
            trans_alloc: malloc(encoding.n_transforms * TRANS_SIZE),
        };

        let n_partitions = encoding.n_elements().div_ceil(PARTITION_SIZE);
        let path_wgs = n_paths.div_ceil(WG_SIZE);
        let workgroup_counts = WorkgroupCounts {
            elements: (n_partitions, 1, 1),
            tile_alloc: (path_wgs, 1, 1),
            path_coarse: (n_pathseg.div_ceil(32), 1, 1),
            backdrop: (path_wgs, 1, 1),
            binning: (path_wgs, 1, 1),
            coarse: (width_in_bins, height_in_bins, 1),
            kernel4: (width_in_tiles, height_in_tiles, 1),
        };
        Ok(Self {
            config,
            static_size,
            n_partitions,
            workgroup_counts,
        })
    }

    /// Bytes of element state to clear before each attempt: the atomic
    /// partition counter followed by one state record per partition.
    pub fn state_size(&self) -> u32 {
        4 + self.n_partitions * STATE_STRIDE
    }

    /// Smallest memory buffer that holds the header and static allocations.
    pub fn memory_min_size(&self) -> u32 {
        MEMORY_HEADER_SIZE + self.static_size
    }

    /// The header to write before each attempt.
    pub fn memory_header(&self) -> MemoryHeader {
        MemoryHeader {
            mem_offset: self.static_size,
            mem_error: MEM_NO_ERROR,
        }
    }
}

/// Rounds `len` up to a multiple of `alignment`, which must be a power of two.
pub const fn align_up(len: u32, alignment: u32) -> u32 {
    len + (len.wrapping_neg() & (alignment - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use peniko::kurbo::Rect;

    #[test]
    fn record_sizes() {
        assert_eq!(STATE_STRIDE, 124);
        assert_eq!(MEMORY_HEADER_SIZE, 8);
        assert_eq!(size_of::<Config>(), 40);
    }

    #[test]
    fn allocations_are_sequential() {
        let mut enc = Encoding::new();
        enc.rect(&Rect::new(0.0, 0.0, 8.0, 8.0));
        enc.fill_color([255, 0, 0, 255]);
        enc.transform(&crate::Transform::IDENTITY);
        enc.pad_to_partition(PARTITION_SIZE as usize);

        let layout = Layout::new(&enc, 2, 1).unwrap();
        let c = layout.config;
        assert_eq!(c.n_elements, 1);
        assert_eq!(c.n_pathseg, 4);
        assert_eq!(c.tile_alloc.offset, 0);
        assert_eq!(c.bin_alloc.offset, 12);
        assert_eq!(c.ptcl_alloc.offset, 12 + 128 * 8);
        assert_eq!(c.pathseg_alloc.offset, 12 + 128 * 8 + 2 * 1024);
        assert_eq!(c.anno_alloc.offset, c.pathseg_alloc.offset + 4 * 52);
        assert_eq!(c.trans_alloc.offset, c.anno_alloc.offset + 32);
        assert_eq!(layout.static_size, c.trans_alloc.offset + 24);
        assert_eq!(layout.memory_min_size(), 8 + layout.static_size);
        assert_eq!(layout.memory_header().mem_offset, layout.static_size);

        assert_eq!(layout.n_partitions, 1);
        assert_eq!(layout.state_size(), 4 + 124);
        let wg = layout.workgroup_counts;
        assert_eq!(wg.elements, (1, 1, 1));
        assert_eq!(wg.path_coarse, (1, 1, 1));
        assert_eq!(wg.coarse, (1, 1, 1));
        assert_eq!(wg.kernel4, (2, 1, 1));
    }

    #[test]
    fn bin_limit() {
        let enc = Encoding::new();
        // 16x8 bins of 16x8 tiles each is the largest accepted output.
        assert!(Layout::new(&enc, 256, 64).is_ok());
        assert_eq!(
            Layout::new(&enc, 257, 64).unwrap_err(),
            LayoutError::OutputTooLarge {
                width: 257 * 32,
                height: 64 * 32
            }
        );
    }

    #[test]
    fn align() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(5, 4), 8);
        assert_eq!(align_up(129, 128), 256);
    }
}
