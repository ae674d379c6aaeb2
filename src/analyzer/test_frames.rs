use crate::frame::FrameData;
use image::{Rgb, RgbImage};
use std::time::SystemTime;

const DARK: [u8; 3] = [35, 30, 60];
const LIGHT: [u8; 3] = [200, 190, 170];

/// Two-colour carpet-like tile pattern
pub(crate) fn checkerboard(id: u64, width: u32, height: u32, tile: u32) -> FrameData {
    let tile = tile.max(1);
    let image = RgbImage::from_fn(width, height, |x, y| {
        if (x / tile + y / tile) % 2 == 0 {
            Rgb(DARK)
        } else {
            Rgb(LIGHT)
        }
    });
    FrameData::from_rgb_image(id, SystemTime::now(), image)
}

/// The same pattern shifted by one tile, so every tile flips colour
pub(crate) fn shifted_checkerboard(id: u64, width: u32, height: u32, tile: u32) -> FrameData {
    let tile = tile.max(1);
    let image = RgbImage::from_fn(width, height, |x, y| {
        if (x / tile + y / tile) % 2 == 1 {
            Rgb(DARK)
        } else {
            Rgb(LIGHT)
        }
    });
    FrameData::from_rgb_image(id, SystemTime::now(), image)
}

pub(crate) fn flat(id: u64, width: u32, height: u32, rgb: [u8; 3]) -> FrameData {
    FrameData::from_rgb_image(id, SystemTime::now(), RgbImage::from_pixel(width, height, Rgb(rgb)))
}

/// Deterministic per-pixel noise (xorshift)
pub(crate) fn noise(id: u64, width: u32, height: u32, seed: u64) -> FrameData {
    let mut state = seed.max(1);
    let image = RgbImage::from_fn(width, height, |_, _| {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let v = (state & 0xff) as u8;
        Rgb([v, v, v])
    });
    FrameData::from_rgb_image(id, SystemTime::now(), image)
}
