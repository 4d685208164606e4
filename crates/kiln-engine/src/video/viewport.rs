use crate::coords::{PixelRect, Rect};

/// Computes the pixel viewport for a 2D view of `virtual_window` inside `window`.
///
/// With `fix_aspect_ratio`, the largest rectangle with the virtual window's
/// aspect ratio is inscribed in `window` and centered, leaving bars on the
/// long axis. Otherwise, or when the virtual window is degenerate, the whole
/// window is used.
pub fn calculate_viewport(virtual_window: Rect, window: PixelRect, fix_aspect_ratio: bool) -> PixelRect {
    if !fix_aspect_ratio {
        return window;
    }
    match virtual_window.aspect_ratio() {
        Some(aspect) => fit_aspect_ratio(aspect.abs(), window),
        None => window,
    }
}

/// Inscribes a centered rectangle of the given width/height ratio in `window`.
pub fn fit_aspect_ratio(aspect: f32, window: PixelRect) -> PixelRect {
    let (width, height) = (window.width(), window.height());
    if width <= 0 || height <= 0 || !aspect.is_finite() || aspect <= 0.0 {
        return window;
    }

    let aspect = f64::from(aspect);
    let given = f64::from(width) / f64::from(height);
    let mut viewport = window;

    if given > aspect {
        let new_width = (f64::from(width) * aspect / given).round() as i32;
        let cut = (width - new_width) / 2;
        viewport.min.x += cut;
        viewport.max.x -= cut;
    } else if aspect > given {
        let new_height = (f64::from(height) * given / aspect).round() as i32;
        let cut = (height - new_height) / 2;
        viewport.min.y += cut;
        viewport.max.y -= cut;
    }

    viewport
}
