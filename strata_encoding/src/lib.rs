// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Raw scene encoding for the strata compute pipeline.
//!
//! This crate holds the formats shared between the CPU and the compute
//! kernels: the fixed-size scene [`Command`]s, the [`Encoding`] that collects
//! them for one pass, pre-encoded [`PathData`], and the static [`Layout`] of
//! the kernels' memory buffer.

// LINEBENDER LINT SET - lib.rs - v2
// See https://linebender.org/wiki/canonical-lints/
// These lints aren't included in Cargo.toml because they
// shouldn't apply to examples and tests
#![warn(unused_crate_dependencies)]
#![warn(clippy::print_stdout, clippy::print_stderr)]
// Targeting e.g. 32-bit means structs containing usize can give false positives for 64-bit.
#![cfg_attr(target_pointer_width = "64", warn(clippy::trivially_copy_pass_by_ref))]
// END LINEBENDER LINT SET
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![allow(missing_docs, reason = "We have many as-yet undocumented items.")]
#![allow(
    clippy::cast_possible_truncation,
    clippy::missing_panics_doc,
    reason = "Deferred"
)]

pub mod command;
mod config;
mod encoding;
pub mod math;
mod path;

pub use command::{Command, CommandOp, FillMode, COMMAND_SIZE};
pub use config::{
    align_up, Config, Layout, LayoutError, MemAlloc, MemoryHeader, WorkgroupCounts,
    WorkgroupSize, ANNO_SIZE, BIN_SIZE, MEMORY_HEADER_SIZE, MEMORY_SIZE_BUMP, MEM_MALLOC_FAILED,
    MEM_NO_ERROR, PARTITION_SIZE, PATHSEG_SIZE, PATH_SIZE, PTCL_INITIAL_ALLOC, STATE_SIZE,
    STATE_STRIDE, TILE_HEIGHT, TILE_WIDTH, TRANS_SIZE, WG_SIZE,
};
pub use encoding::Encoding;
pub use math::{IntPoint, IntRect, IntSize, Transform};
pub use path::{PathData, PathEncoder, SEGMENT_SIZE};
