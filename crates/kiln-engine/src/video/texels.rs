use std::borrow::Cow;

use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::device::MipLevel;

/// Smallest power of two `>= n`, capped at `max` (itself rounded down to a
/// power of two). Zero maps to 1.
pub fn power_of_two_at_least(n: u32, max: u32) -> u32 {
    let cap = if max == 0 { u32::MAX } else { prev_power_of_two(max) };
    n.max(1).checked_next_power_of_two().unwrap_or(cap).min(cap)
}

fn prev_power_of_two(n: u32) -> u32 {
    1 << (31 - n.leading_zeros())
}

/// Returns `image` unchanged when both sides already fit, otherwise a copy
/// rescaled to the fitting size.
pub fn fit_texture_size(image: &RgbaImage, pow2: bool, max: u32) -> Cow<'_, RgbaImage> {
    let (w, h) = image.dimensions();
    let (tw, th) = if pow2 {
        (power_of_two_at_least(w, max), power_of_two_at_least(h, max))
    } else {
        let cap = if max == 0 { u32::MAX } else { max };
        (w.min(cap), h.min(cap))
    };

    if (tw, th) == (w, h) {
        Cow::Borrowed(image)
    } else {
        log::debug!("rescaling {w}x{h} texture to {tw}x{th}");
        Cow::Owned(imageops::resize(image, tw, th, FilterType::Triangle))
    }
}

/// Builds the mip chain for `image`.
///
/// Level `i` measures `max(1, w >> i)` by `max(1, h >> i)`; the chain stops
/// after the 1x1 level. Without `mipmap` only the base level is produced.
pub fn mip_chain(image: &RgbaImage, mipmap: bool) -> Vec<MipLevel> {
    let (w, h) = image.dimensions();
    let mut levels = vec![MipLevel {
        width: w,
        height: h,
        rgba: image.as_raw().clone(),
    }];
    if !mipmap || w == 0 || h == 0 || (w, h) == (1, 1) {
        return levels;
    }

    let mut i = 1;
    loop {
        let (lw, lh) = ((w >> i).max(1), (h >> i).max(1));
        let level = imageops::resize(image, lw, lh, FilterType::Triangle);
        levels.push(MipLevel {
            width: lw,
            height: lh,
            rgba: level.into_raw(),
        });
        if lw == 1 && lh == 1 {
            break;
        }
        i += 1;
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([10, 20, 30, 255]))
    }

    #[test]
    fn power_of_two_rounding() {
        assert_eq!(power_of_two_at_least(0, 0), 1);
        assert_eq!(power_of_two_at_least(1, 0), 1);
        assert_eq!(power_of_two_at_least(100, 0), 128);
        assert_eq!(power_of_two_at_least(128, 0), 128);
        assert_eq!(power_of_two_at_least(3000, 2048), 2048);
        assert_eq!(power_of_two_at_least(3000, 3000), 2048);
    }

    #[test]
    fn fitting_image_is_borrowed() {
        let img = solid(64, 32);
        assert!(matches!(fit_texture_size(&img, true, 4096), Cow::Borrowed(_)));
        assert!(matches!(fit_texture_size(&img, false, 4096), Cow::Borrowed(_)));
    }

    #[test]
    fn non_power_of_two_is_scaled_up() {
        let img = solid(100, 60);
        let fitted = fit_texture_size(&img, true, 4096);
        assert_eq!(fitted.dimensions(), (128, 64));
        assert_eq!(fit_texture_size(&img, false, 4096).dimensions(), (100, 60));
    }

    #[test]
    fn oversized_image_is_capped() {
        let img = solid(300, 20);
        assert_eq!(fit_texture_size(&img, false, 256).dimensions(), (256, 20));
        assert_eq!(fit_texture_size(&img, true, 256).dimensions(), (256, 32));
    }

    #[test]
    fn mip_chain_halves_down_to_one() {
        let levels = mip_chain(&solid(8, 2), true);
        let sizes: Vec<_> = levels.iter().map(|l| (l.width, l.height)).collect();
        assert_eq!(sizes, vec![(8, 2), (4, 1), (2, 1), (1, 1)]);
        for l in &levels {
            assert_eq!(l.rgba.len(), (l.width * l.height * 4) as usize);
        }
    }

    #[test]
    fn mip_chain_without_mipmapping_is_base_only() {
        let levels = mip_chain(&solid(8, 8), false);
        assert_eq!(levels.len(), 1);
    }

    #[test]
    fn single_pixel_image_has_one_level() {
        let levels = mip_chain(&solid(1, 1), true);
        assert_eq!(levels.len(), 1);
        assert_eq!((levels[0].width, levels[0].height), (1, 1));
    }

    #[test]
    fn mip_levels_keep_solid_color() {
        let levels = mip_chain(&solid(4, 4), true);
        assert_eq!(&levels[2].rgba[..], &[10, 20, 30, 255]);
    }
}
