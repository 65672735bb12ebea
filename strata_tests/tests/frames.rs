// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Frame orchestration against the recording device.

use strata::kurbo::{Affine, Rect};
use strata::peniko::Color;
use strata::{
    IntPoint, IntSize, LoadAction, LoadDesc, Renderer, RendererOptions, Scene, MAX_ALLOC_AGE,
};
use strata_tests::{shaders, Call, MockDevice};

const VIEWPORT: IntSize = IntSize::new(256, 256);

fn renderer() -> Renderer<MockDevice> {
    Renderer::new(MockDevice::gpu(), &shaders(false), RendererOptions::default())
        .expect("create renderer")
}

fn translucent(shade: u8) -> Color {
    Color::from_rgba8(shade, 40, 80, 200)
}

/// Translucent rectangles at the given offsets.
fn rects(offsets: &[(f64, f64)]) -> Scene {
    let mut scene = Scene::new();
    for (i, &(x, y)) in offsets.iter().enumerate() {
        scene.push_transform(Affine::translate((x, y)));
        scene.fill_rect(Rect::new(0.0, 0.0, 20.0, 10.0), translucent(i as u8));
        scene.pop_transform();
    }
    scene
}

fn render(r: &mut Renderer<MockDevice>, scene: &Scene) -> Vec<Call> {
    r.device().take_calls();
    r.render(scene, &(), VIEWPORT).expect("render frame");
    r.device().take_calls()
}

fn count(calls: &[Call], f: impl Fn(&Call) -> bool) -> usize {
    calls.iter().filter(|c| f(c)).count()
}

fn dispatches(calls: &[Call]) -> usize {
    count(calls, |c| matches!(c, Call::Dispatch(_)))
}

/// The load action of the render pass that targets the framebuffer.
fn framebuffer_load(calls: &[Call]) -> LoadDesc {
    let fb = calls
        .iter()
        .find_map(|c| match c {
            Call::BeginFrame { framebuffer, .. } => Some(*framebuffer),
            _ => None,
        })
        .expect("frame started");
    calls
        .iter()
        .find_map(|c| match c {
            Call::BeginRenderPass { target, load } if *target == fb => Some(*load),
            _ => None,
        })
        .expect("framebuffer pass")
}

#[test]
fn first_frame_rasterizes_and_blits() {
    let mut r = renderer();
    let calls = render(&mut r, &rects(&[(10.0, 10.0), (40.0, 10.0), (70.0, 10.0)]));

    assert_eq!(r.collector().ops().len(), 3);
    assert_eq!(r.collector().layers().len(), 1);
    assert_eq!(count(&calls, |c| *c == Call::BeginCompute), 1);
    assert_eq!(dispatches(&calls), 7);
    // One quad for the single layer.
    assert_eq!(
        count(&calls, |c| *c == Call::DrawArrays { offset: 0, count: 6 }),
        1
    );
    assert!(matches!(calls.first(), Some(Call::BeginFrame { .. })));
    assert_eq!(calls.last(), Some(&Call::EndFrame));
    assert_eq!(r.frame_count(), 1);
}

#[test]
fn unchanged_frame_skips_compute() {
    let mut r = renderer();
    let scene = rects(&[(10.0, 10.0), (40.0, 10.0)]);
    render(&mut r, &scene);
    let alloc = r.collector().layers()[0].alloc();

    let calls = render(&mut r, &scene);
    assert_eq!(dispatches(&calls), 0);
    assert_eq!(count(&calls, |c| *c == Call::BeginCompute), 0);
    assert_eq!(r.collector().layers()[0].alloc(), alloc);
    assert_eq!(count(&calls, |c| matches!(c, Call::DrawArrays { .. })), 1);
}

#[test]
fn moved_content_keeps_its_layer() {
    let mut r = renderer();
    render(&mut r, &rects(&[(10.0, 10.0)]));
    let first = r.collector().layers()[0].clone();

    let calls = render(&mut r, &rects(&[(13.0, 13.0)]));
    let moved = &r.collector().layers()[0];
    assert_eq!(dispatches(&calls), 0);
    assert_eq!(moved.alloc(), first.alloc());
    assert_eq!(moved.rect(), first.rect().translate(IntPoint::new(3, 3)));
}

#[test]
fn new_content_rasterizes_only_new_layers() {
    let mut r = renderer();
    render(&mut r, &rects(&[(10.0, 10.0)]));
    let calls = render(&mut r, &rects(&[(10.0, 10.0), (100.0, 100.0)]));
    assert_eq!(r.collector().layers().len(), 2);
    assert_eq!(count(&calls, |c| *c == Call::BeginCompute), 1);
    assert_eq!(dispatches(&calls), 7);
}

#[test]
fn opaque_background_becomes_a_clear() {
    let mut r = renderer();
    let mut scene = Scene::new();
    scene.fill_rect(
        Rect::new(0.0, 0.0, 256.0, 256.0),
        Color::from_rgba8(0, 0, 255, 255),
    );
    scene.fill_rect(Rect::new(10.0, 10.0, 30.0, 30.0), translucent(1));
    let calls = render(&mut r, &scene);

    assert_eq!(r.collector().ops().len(), 1);
    assert!(matches!(calls[0], Call::BeginFrame { clear: true, .. }));
    let load = framebuffer_load(&calls);
    assert_eq!(load.action, LoadAction::Clear);
    let expected = [0.0, 0.0, 1.0, 1.0];
    for (a, b) in load.clear_color.iter().zip(expected) {
        assert!((a - b).abs() < 1e-4, "{:?}", load.clear_color);
    }

    let calls = render(&mut r, &rects(&[(10.0, 10.0)]));
    assert_eq!(framebuffer_load(&calls).action, LoadAction::Keep);
}

#[test]
fn explicit_clear_applies_once() {
    let mut r = renderer();
    let scene = rects(&[(10.0, 10.0)]);
    r.clear(Color::from_rgba8(255, 255, 255, 255));
    let calls = render(&mut r, &scene);
    assert_eq!(framebuffer_load(&calls).action, LoadAction::Clear);
    let calls = render(&mut r, &scene);
    assert_eq!(framebuffer_load(&calls).action, LoadAction::Keep);
}

#[test]
fn empty_scene_still_opens_the_framebuffer() {
    let mut r = renderer();
    let calls = render(&mut r, &Scene::new());
    assert_eq!(dispatches(&calls), 0);
    assert_eq!(count(&calls, |c| *c == Call::EndRenderPass), 1);
    assert_eq!(count(&calls, |c| matches!(c, Call::DrawArrays { .. })), 0);
}

#[test]
fn unused_layers_are_evicted() {
    let mut r = renderer();
    render(&mut r, &rects(&[(10.0, 10.0)]));
    let alloc = r.collector().layers()[0].alloc().unwrap();

    let empty = Scene::new();
    for _ in 0..MAX_ALLOC_AGE {
        render(&mut r, &empty);
        assert!(r.atlases().is_live(alloc));
    }
    render(&mut r, &empty);
    assert!(!r.atlases().is_live(alloc));

    for _ in 0..20 {
        render(&mut r, &empty);
    }
    assert!(r.atlases().is_empty());
}

#[test]
fn profiled_frame_reports_stage_timings() {
    let mut r = renderer();
    let mut scene = rects(&[(10.0, 10.0)]);
    scene.profile();
    render(&mut r, &scene);
    assert!(r.collector().profile_requested());
    assert_eq!(
        r.profile(),
        "ft:  300µs com:   100µs ren:  100µs blit:  100µs"
    );
}

#[test]
fn unprofiled_frames_report_nothing() {
    let mut r = renderer();
    render(&mut r, &rects(&[(10.0, 10.0)]));
    assert_eq!(r.profile(), "");
}
