// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::path::Path;

use strata_encoding::IntRect;

use crate::atlas::Atlases;
use crate::device::Texture;
use crate::Result;

/// Writes the contents of every realized atlas to `dump-{i}.png` in `dir`.
pub(crate) fn dump_atlases<T: Texture>(
    atlases: &Atlases<T>,
    bottom_left_origin: bool,
    dir: &Path,
) -> Result<()> {
    for (i, (_, atlas)) in atlases.iter().enumerate() {
        let Some(texture) = atlas.texture() else {
            continue;
        };
        let size = atlas.size();
        let stride = size.width as usize * 4;
        let mut pixels = vec![0; stride * size.height as usize];
        texture.read_pixels(IntRect::new(0, 0, size.width, size.height), &mut pixels, stride)?;
        if bottom_left_origin {
            flip_rows(&mut pixels, stride);
        }
        unpremultiply(&mut pixels);
        let path = dir.join(format!("dump-{i}.png"));
        image::save_buffer(
            &path,
            &pixels,
            size.width as u32,
            size.height as u32,
            image::ExtendedColorType::Rgba8,
        )?;
        log::debug!("wrote {}", path.display());
    }
    Ok(())
}

/// Converts premultiplied RGBA pixels to straight alpha.
fn unpremultiply(pixels: &mut [u8]) {
    for px in pixels.chunks_exact_mut(4) {
        let a = px[3] as u32;
        if a == 0 || a == 255 {
            continue;
        }
        for c in &mut px[..3] {
            *c = ((*c as u32 * 255 + a / 2) / a).min(255) as u8;
        }
    }
}

fn flip_rows(pixels: &mut [u8], stride: usize) {
    let rows = pixels.len() / stride;
    for y in 0..rows / 2 {
        let (top, bottom) = pixels.split_at_mut((rows - 1 - y) * stride);
        top[y * stride..(y + 1) * stride].swap_with_slice(&mut bottom[..stride]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpremultiply_restores_straight_alpha() {
        let mut px = [64, 32, 0, 128, 10, 20, 30, 255, 5, 5, 5, 0];
        unpremultiply(&mut px);
        assert_eq!(px, [128, 64, 0, 128, 10, 20, 30, 255, 5, 5, 5, 0]);
    }

    #[test]
    fn flip() {
        let mut px = [1, 1, 2, 2, 3, 3];
        flip_rows(&mut px, 2);
        assert_eq!(px, [3, 3, 2, 2, 1, 1]);
    }
}
