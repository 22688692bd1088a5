/// Size and position of the scaled image on the output canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
}

/// Fits a `src_width` x `src_height` image into the canvas, preserving its
/// aspect ratio, and centers it.
///
/// Images wider than the canvas aspect ratio are scaled to the canvas width,
/// all others to the canvas height. Sizes and offsets are even so the result
/// maps cleanly onto YUV420P chroma planes.
///
/// Returns `None` when any dimension is zero.
pub fn fit(
    src_width: u32,
    src_height: u32,
    canvas_width: u32,
    canvas_height: u32,
) -> Option<Placement> {
    if src_width == 0 || src_height == 0 || canvas_width == 0 || canvas_height == 0 {
        return None;
    }

    let (sw, sh) = (u64::from(src_width), u64::from(src_height));
    let (cw, ch) = (u64::from(canvas_width), u64::from(canvas_height));

    let (width, height) = if sw * ch > sh * cw {
        (cw, scale_rounded(sh, cw, sw).min(ch))
    } else {
        (scale_rounded(sw, ch, sh).min(cw), ch)
    };

    let width = even_floor(width).min(cw);
    let height = even_floor(height).min(ch);

    Some(Placement {
        width: width as u32,
        height: height as u32,
        x: (((cw - width) / 2) & !1) as u32,
        y: (((ch - height) / 2) & !1) as u32,
    })
}

/// `value * numerator / denominator`, rounded half up.
fn scale_rounded(value: u64, numerator: u64, denominator: u64) -> u64 {
    (value * numerator * 2 + denominator) / (denominator * 2)
}

fn even_floor(value: u64) -> u64 {
    (value & !1).max(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_image_is_letterboxed() {
        // 32:9, twice as wide as the canvas
        let placement = fit(3840, 1080, 1920, 1080).unwrap();
        assert_eq!(
            placement,
            Placement {
                width: 1920,
                height: 540,
                x: 0,
                y: 270,
            }
        );
    }

    #[test]
    fn test_portrait_image_is_pillarboxed() {
        let placement = fit(1080, 1920, 1920, 1080).unwrap();
        // 1080 * 1080 / 1920 = 607.5, rounded up to 608
        assert_eq!(placement.height, 1080);
        assert_eq!(placement.width, 608);
        assert_eq!(placement.x, 656);
        assert_eq!(placement.y, 0);
    }

    #[test]
    fn test_exact_aspect_fills_canvas() {
        for (w, h) in [(1920, 1080), (3840, 2160), (16, 9), (1280, 720)] {
            let placement = fit(w, h, 1920, 1080).unwrap();
            assert_eq!(
                placement,
                Placement {
                    width: 1920,
                    height: 1080,
                    x: 0,
                    y: 0,
                },
                "{w}x{h}"
            );
        }
    }

    #[test]
    fn test_square_image() {
        let placement = fit(500, 500, 1920, 1080).unwrap();
        assert_eq!(placement.width, 1080);
        assert_eq!(placement.height, 1080);
        assert_eq!(placement.x, 420);
    }

    #[test]
    fn test_odd_sizes_are_made_even() {
        // 1920 * 1081 / 2000 = 1037.76 -> 1038 is already even
        let placement = fit(2000, 1081, 1920, 1080).unwrap();
        assert_eq!(placement.width, 1920);
        assert_eq!(placement.height, 1038);
        assert_eq!(placement.y, 20);

        // 1080 * 1001 / 1000 = 1081.08 -> 1081 -> 1080
        let placement = fit(1001, 1000, 1920, 1080).unwrap();
        assert_eq!(placement.width, 1080);
        assert_eq!(placement.x % 2, 0);
    }

    #[test]
    fn test_extreme_aspect_keeps_minimum_size() {
        let placement = fit(100_000, 1, 1920, 1080).unwrap();
        assert_eq!(placement.width, 1920);
        assert_eq!(placement.height, 2);
        assert_eq!(placement.y, 538);

        let placement = fit(1, 100_000, 1920, 1080).unwrap();
        assert_eq!(placement.width, 2);
        assert_eq!(placement.height, 1080);
    }

    #[test]
    fn test_placement_stays_inside_canvas() {
        for (w, h) in [(1, 1), (7, 3), (3, 7), (4097, 2161), (641, 479), (1919, 1081)] {
            let p = fit(w, h, 1920, 1080).unwrap();
            assert!(p.x + p.width <= 1920, "{w}x{h}: {p:?}");
            assert!(p.y + p.height <= 1080, "{w}x{h}: {p:?}");
            assert!(p.width == 1920 || p.height == 1080, "{w}x{h}: {p:?}");
        }
    }

    #[test]
    fn test_zero_dimensions() {
        assert_eq!(fit(0, 100, 1920, 1080), None);
        assert_eq!(fit(100, 0, 1920, 1080), None);
    }
}
