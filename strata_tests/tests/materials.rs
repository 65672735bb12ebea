// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Image materials.

use strata::kurbo::Affine;
use strata::peniko::{Blob, Image, ImageFormat};
use strata::{
    BufferBinding, IntPoint, IntSize, LoadAction, Renderer, RendererOptions, Scene,
    TextureFormat, COMBINED_BINDINGS,
};
use strata_tests::{shaders, Call, MockDevice};

const VIEWPORT: IntSize = IntSize::new(128, 128);

fn image(width: u32, height: u32) -> Image {
    let data = vec![255_u8; (width * height * 4) as usize];
    Image::new(Blob::from(data), ImageFormat::Rgba8, width, height)
}

fn scene(image: &Image, transform: Affine) -> Scene {
    let mut scene = Scene::new();
    scene.push_transform(transform);
    scene.image(image);
    scene.paint();
    scene.pop_transform();
    scene
}

fn new_textures(calls: &[Call]) -> Vec<(u32, TextureFormat, IntSize, BufferBinding)> {
    calls
        .iter()
        .filter_map(|c| match *c {
            Call::NewTexture {
                id,
                format,
                size,
                bindings,
            } => Some((id, format, size, bindings)),
            _ => None,
        })
        .collect()
}

fn render(r: &mut Renderer<MockDevice>, scene: &Scene) -> Vec<Call> {
    r.device().take_calls();
    r.render(scene, &(), VIEWPORT).expect("render frame");
    r.device().take_calls()
}

#[test]
fn images_are_uploaded_and_transformed_once() {
    let mut r = Renderer::new(MockDevice::gpu(), &shaders(false), RendererOptions::default())
        .expect("create renderer");
    let img = image(8, 4);
    let scene = scene(&img, Affine::translate((20.5, 30.0)));
    let calls = render(&mut r, &scene);

    let textures = new_textures(&calls);
    let (img_atlas, ..) = *textures
        .iter()
        .find(|t| t.1 == TextureFormat::Srgba)
        .expect("image atlas");
    let (mat_atlas, ..) = *textures
        .iter()
        .find(|t| t.1 == TextureFormat::Rgba8 && t.3 == COMBINED_BINDINGS)
        .expect("materials atlas");

    // The image, then its right and bottom padding.
    assert!(calls.contains(&Call::UploadTexture {
        id: img_atlas,
        offset: IntPoint::ZERO,
        size: IntSize::new(8, 4),
    }));
    assert!(calls.contains(&Call::UploadTexture {
        id: img_atlas,
        offset: IntPoint::new(8, 0),
        size: IntSize::new(1, 4),
    }));

    let pass = calls
        .iter()
        .position(|c| matches!(c, Call::BeginRenderPass { target, .. } if *target == mat_atlas))
        .expect("materials pass");
    let Call::BeginRenderPass { load, .. } = calls[pass] else {
        unreachable!();
    };
    assert_eq!(load.action, LoadAction::Clear);
    assert!(calls[pass..].contains(&Call::BindTexture {
        unit: 0,
        texture: img_atlas,
    }));
    assert!(calls[pass..].contains(&Call::DrawArrays { offset: 0, count: 6 }));

    // The layer samples the materials atlas.
    assert!(calls.contains(&Call::BindImageTexture {
        unit: 3,
        texture: mat_atlas,
    }));

    let calls = render(&mut r, &scene);
    assert!(!calls.iter().any(|c| matches!(c, Call::UploadTexture { .. })));
    assert!(!calls.iter().any(|c| matches!(c, Call::Dispatch(_))));
    assert_eq!(
        calls
            .iter()
            .filter(|c| matches!(c, Call::DrawArrays { .. }))
            .count(),
        1
    );
}

#[test]
fn new_transform_renders_a_new_material() {
    let mut r = Renderer::new(MockDevice::gpu(), &shaders(false), RendererOptions::default())
        .expect("create renderer");
    let img = image(16, 16);
    render(&mut r, &scene(&img, Affine::translate((10.0, 10.0))));

    let calls = render(
        &mut r,
        &scene(&img, Affine::scale(2.0).then_translate((10.0, 10.0).into())),
    );
    // The source image stays in its atlas.
    assert!(!calls.iter().any(|c| matches!(c, Call::UploadTexture { .. })));
    // The material, then the blit.
    assert_eq!(
        calls
            .iter()
            .filter(|c| matches!(c, Call::DrawArrays { .. }))
            .count(),
        2
    );
    assert_eq!(
        calls.iter().filter(|c| **c == Call::BeginCompute).count(),
        1
    );
}
