use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

/// Top-down "aerial" scene: dark ground, a few bright roofs, a diagonal road.
/// Deterministic for a given size.
pub fn aerial_rgb(width: u32, height: u32) -> RgbImage {
    let roofs = [(0.2, 0.25, 0.12), (0.7, 0.3, 0.09), (0.45, 0.75, 0.15)];
    RgbImage::from_fn(width, height, |x, y| {
        let (u, v) = (x as f32 / width as f32, y as f32 / height as f32);
        let mut level = 40.0 + 30.0 * u;
        if ((u - v).abs()) < 0.04 {
            level = 90.0;
        }
        for (cx, cy, r) in roofs {
            if (u - cx).abs() < r && (v - cy).abs() < r {
                level = 215.0;
            }
        }
        let l = level as u8;
        Rgb([l, l.saturating_add(10), l.saturating_sub(10)])
    })
}

/// Uniform gray with the top-left `corner` x `corner` block painted red
pub fn corner_marked(width: u32, height: u32, corner: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        if x < corner && y < corner { Rgb([255, 0, 0]) } else { Rgb([128, 128, 128]) }
    })
}

pub fn png_bytes(img: RgbImage) -> Vec<u8> {
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .expect("png encode");
    out
}
