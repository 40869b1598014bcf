//! Bilinear plane resampling shared by scale alignment and segmentation
//! reconstruction.

/// Bilinearly resample a 2D plane from `(src_h, src_w)` to `(dst_h, dst_w)`.
///
/// Uses half-pixel-centered sampling (no corner snapping): destination pixel
/// centers map to `(d + 0.5) * src / dst - 0.5` in source coordinates, and
/// source coordinates are clamped at the borders. Resampling to the same size
/// is the identity.
///
/// # Panics
///
/// Panics if a buffer does not match its stated dimensions or any dimension
/// is zero.
pub fn resample_bilinear(
    src: &[f32],
    src_h: usize,
    src_w: usize,
    dst: &mut [f32],
    dst_h: usize,
    dst_w: usize,
) {
    assert!(src_h > 0 && src_w > 0 && dst_h > 0 && dst_w > 0, "empty plane");
    assert_eq!(src.len(), src_h * src_w, "source plane size mismatch");
    assert_eq!(dst.len(), dst_h * dst_w, "destination plane size mismatch");

    let scale_y = src_h as f32 / dst_h as f32;
    let scale_x = src_w as f32 / dst_w as f32;

    for dy in 0..dst_h {
        let sy = (dy as f32 + 0.5) * scale_y - 0.5;
        let y0 = sy.floor();
        let wy = sy - y0;
        let y0c = (y0 as isize).clamp(0, src_h as isize - 1) as usize;
        let y1c = (y0 as isize + 1).clamp(0, src_h as isize - 1) as usize;

        for dx in 0..dst_w {
            let sx = (dx as f32 + 0.5) * scale_x - 0.5;
            let x0 = sx.floor();
            let wx = sx - x0;
            let x0c = (x0 as isize).clamp(0, src_w as isize - 1) as usize;
            let x1c = (x0 as isize + 1).clamp(0, src_w as isize - 1) as usize;

            let top = src[y0c * src_w + x0c] * (1.0 - wx) + src[y0c * src_w + x1c] * wx;
            let bottom = src[y1c * src_w + x0c] * (1.0 - wx) + src[y1c * src_w + x1c] * wx;
            dst[dy * dst_w + dx] = top * (1.0 - wy) + bottom * wy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identity_when_same_size() {
        let src = vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let mut dst = vec![0.0f32; 9];
        resample_bilinear(&src, 3, 3, &mut dst, 3, 3);
        for (a, b) in src.iter().zip(&dst) {
            assert!((a - b).abs() < 1e-5, "identity resample changed values");
        }
    }

    #[test]
    fn test_constant_plane_preserved() {
        let src = vec![7.5f32; 4];
        let mut dst = vec![0.0f32; 25];
        resample_bilinear(&src, 2, 2, &mut dst, 5, 5);
        for &v in &dst {
            assert!((v - 7.5).abs() < 1e-5);
        }
    }

    #[test]
    fn test_upsample_midpoint() {
        // 1x2 plane [0, 1] upsampled to 1x4: centers at src x = -0.25, 0.25, 0.75, 1.25
        let src = vec![0.0f32, 1.0];
        let mut dst = vec![0.0f32; 4];
        resample_bilinear(&src, 1, 2, &mut dst, 1, 4);
        assert_relative_eq!(dst[0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(dst[1], 0.25, epsilon = 1e-6);
        assert_relative_eq!(dst[2], 0.75, epsilon = 1e-6);
        assert_relative_eq!(dst[3], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_downsample_average() {
        // 1x4 plane downsampled to 1x2: each output lands between two inputs
        let src = vec![0.0f32, 2.0, 4.0, 6.0];
        let mut dst = vec![0.0f32; 2];
        resample_bilinear(&src, 1, 4, &mut dst, 1, 2);
        assert_relative_eq!(dst[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(dst[1], 5.0, epsilon = 1e-6);
    }
}
