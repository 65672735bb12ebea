// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The retry loop of the compute stages.

use std::collections::HashSet;
use std::num::NonZeroU32;

use strata::encoding::{MEMORY_SIZE_BUMP, MEM_MALLOC_FAILED};
use strata::kurbo::Rect;
use strata::peniko::Color;
use strata::{BufferBinding, Error, IntSize, Renderer, RendererOptions, Scene};
use strata_tests::{shaders, Call, Download, MockDevice};

const VIEWPORT: IntSize = IntSize::new(128, 128);

const STORAGE_RW: BufferBinding =
    BufferBinding::SHADER_STORAGE_READ.union(BufferBinding::SHADER_STORAGE_WRITE);

fn scene() -> Scene {
    let mut scene = Scene::new();
    scene.fill_rect(
        Rect::new(8.0, 8.0, 40.0, 24.0),
        Color::from_rgba8(0, 128, 0, 160),
    );
    scene
}

fn renderer(options: RendererOptions, downloads: &[Download]) -> Renderer<MockDevice> {
    let device = MockDevice::gpu();
    device.script_downloads(downloads.iter().copied());
    Renderer::new(device, &shaders(false), options).expect("create renderer")
}

fn count(calls: &[Call], f: impl Fn(&Call) -> bool) -> usize {
    calls.iter().filter(|c| f(c)).count()
}

/// Sizes of the memory buffers, in creation order.
fn memory_buffers(calls: &[Call]) -> Vec<(u32, usize)> {
    calls
        .iter()
        .filter_map(|c| match *c {
            Call::NewBuffer { id, binding, size }
                if binding == STORAGE_RW && size >= MEMORY_SIZE_BUMP as usize =>
            {
                Some((id, size))
            }
            _ => None,
        })
        .collect()
}

/// The read-write buffer that isn't a memory buffer.
fn state_buffer(calls: &[Call]) -> u32 {
    calls
        .iter()
        .find_map(|c| match *c {
            Call::NewBuffer { id, binding, size }
                if binding == STORAGE_RW && size < MEMORY_SIZE_BUMP as usize =>
            {
                Some(id)
            }
            _ => None,
        })
        .expect("state buffer")
}

#[test]
fn malloc_failures_grow_memory_and_retry() {
    let failures = [Download::Error(MEM_MALLOC_FAILED); 2];
    let mut r = renderer(RendererOptions::default(), &failures);
    r.render(&scene(), &(), VIEWPORT).expect("render frame");
    let calls = r.device().calls();

    // One attempt per failure, plus the one that succeeds.
    assert_eq!(count(&calls, |c| *c == Call::BeginCompute), 3);
    assert_eq!(count(&calls, |c| matches!(c, Call::Dispatch(_))), 21);
    assert_eq!(count(&calls, |c| matches!(c, Call::DownloadBuffer { .. })), 3);

    let memory = memory_buffers(&calls);
    assert_eq!(memory.len(), 3);
    assert_eq!(memory[1].1, memory[0].1 * 15 / 10);
    assert_eq!(memory[2].1, memory[1].1 * 15 / 10);
    assert_eq!(r.memory_size(), memory[2].1);

    // Every attempt starts from a fresh header and zeroed state.
    let ids: HashSet<u32> = memory.iter().map(|&(id, _)| id).collect();
    assert_eq!(
        count(&calls, |c| matches!(c, Call::UploadBuffer { id, .. } if ids.contains(id))),
        3
    );
    let state = state_buffer(&calls);
    assert_eq!(
        count(&calls, |c| matches!(
            c,
            Call::UploadBuffer { id, zeroed: true, .. } if *id == state
        )),
        3
    );
}

#[test]
fn grown_memory_is_kept_for_later_frames() {
    let failures = [Download::Error(MEM_MALLOC_FAILED)];
    let mut r = renderer(RendererOptions::default(), &failures);
    r.render(&scene(), &(), VIEWPORT).expect("render frame");
    let size = r.memory_size();

    let mut moved = Scene::new();
    moved.fill_rect(
        Rect::new(60.0, 60.0, 100.0, 90.0),
        Color::from_rgba8(0, 0, 128, 160),
    );
    r.device().take_calls();
    r.render(&moved, &(), VIEWPORT).expect("render frame");
    let calls = r.device().take_calls();
    assert_eq!(count(&calls, |c| *c == Call::BeginCompute), 1);
    assert!(memory_buffers(&calls).is_empty());
    assert_eq!(r.memory_size(), size);
}

#[test]
fn lost_content_retries_without_growing() {
    let mut r = renderer(RendererOptions::default(), &[Download::ContentLost]);
    r.render(&scene(), &(), VIEWPORT).expect("render frame");
    let calls = r.device().calls();
    assert_eq!(count(&calls, |c| *c == Call::BeginCompute), 2);
    assert_eq!(memory_buffers(&calls).len(), 1);
}

#[test]
fn retries_stop_at_the_limit() {
    let options = RendererOptions {
        max_memory_retries: NonZeroU32::new(2),
        ..Default::default()
    };
    let failures = [Download::Error(MEM_MALLOC_FAILED); 5];
    let mut r = renderer(options, &failures);
    let err = r.render(&scene(), &(), VIEWPORT).unwrap_err();
    assert!(matches!(err, Error::MemoryRetriesExhausted(2)), "{err}");

    let calls = r.device().calls();
    assert_eq!(count(&calls, |c| *c == Call::BeginCompute), 3);
    // The frame is closed even though it failed.
    assert_eq!(calls.last(), Some(&Call::EndFrame));
}

#[test]
fn unknown_error_code_fails_the_frame() {
    let mut r = renderer(RendererOptions::default(), &[Download::Error(7)]);
    let err = r.render(&scene(), &(), VIEWPORT).unwrap_err();
    assert!(matches!(err, Error::ShaderFailed(7)), "{err}");
    assert_eq!(r.device().calls().last(), Some(&Call::EndFrame));
}

#[test]
fn stages_bind_every_buffer() {
    let mut r = renderer(RendererOptions::default(), &[]);
    r.render(&scene(), &(), VIEWPORT).expect("render frame");
    let calls = r.device().calls();
    let slots: HashSet<u32> = calls
        .iter()
        .filter_map(|c| match c {
            Call::BindStorageBuffer { binding, .. } => Some(*binding),
            _ => None,
        })
        .collect();
    assert_eq!(slots, HashSet::from([0, 1, 2, 3]));
    // Output and materials images.
    for unit in [2, 3] {
        assert_eq!(
            count(&calls, |c| matches!(c, Call::BindImageTexture { unit: u, .. } if *u == unit)),
            1
        );
    }
}
