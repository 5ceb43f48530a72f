//! Frame type and pixel conversion: YUYV/GREY/Y16 to RGB, dark detection.

/// A captured RGB8 camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.len() < 3 {
            return 0.0;
        }
        let pixels = self.data.len() / 3;
        let sum: u64 = self
            .data
            .chunks_exact(3)
            .map(|px| luma(px[0], px[1], px[2]) as u64)
            .sum();
        sum as f32 / pixels as f32
    }
}

/// BT.601 luma of one RGB pixel.
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8) as u8
}

/// Convert packed YUYV (4:2:2) to RGB8 using integer BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = chunk[1] as i32 - 128;
        let v = chunk[3] as i32 - 128;
        for y in [chunk[0], chunk[2]] {
            let c = y as i32 - 16;
            let r = (298 * c + 409 * v + 128) >> 8;
            let g = (298 * c - 100 * u - 208 * v + 128) >> 8;
            let b = (298 * c + 516 * u + 128) >> 8;
            rgb.extend([clamp(r), clamp(g), clamp(b)]);
        }
    }
    Ok(rgb)
}

/// Replicate 8-bit grayscale into RGB8.
pub fn grey_to_rgb(gray: &[u8]) -> Vec<u8> {
    gray.iter().flat_map(|&p| [p, p, p]).collect()
}

/// Downscale 16-bit little-endian grayscale to 8 bits (high byte).
pub fn y16_to_grey(y16: &[u8], pixels: usize) -> Result<Vec<u8>, FrameError> {
    let expected = pixels * 2;
    if y16.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: y16.len(),
        });
    }
    Ok(y16[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

/// Check if an RGB frame is dark: more than `threshold_pct` of pixels have luma below 32.
pub fn is_dark_frame(rgb: &[u8], threshold_pct: f32) -> bool {
    let pixels = rgb.len() / 3;
    if pixels == 0 {
        return true;
    }
    let dark = rgb
        .chunks_exact(3)
        .filter(|px| luma(px[0], px[1], px[2]) < 32)
        .count();
    (dark as f32 / pixels as f32) > threshold_pct
}

fn clamp(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_rgb_gray_levels() {
        // Neutral chroma: black (Y=16) and white (Y=235).
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_yuyv_to_rgb_red_dominant() {
        // High V pushes red up and green down.
        let yuyv = vec![81, 90, 81, 240];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert!(rgb[0] > 200, "red {}", rgb[0]);
        assert!(rgb[1] < 60, "green {}", rgb[1]);
        assert_eq!(rgb[..3], rgb[3..]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        assert!(yuyv_to_rgb(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_grey_to_rgb() {
        assert_eq!(grey_to_rgb(&[7, 200]), vec![7, 7, 7, 200, 200, 200]);
    }

    #[test]
    fn test_y16_takes_high_byte() {
        let y16 = vec![0xff, 0x12, 0x00, 0xab];
        assert_eq!(y16_to_grey(&y16, 2).unwrap(), vec![0x12, 0xab]);
        assert!(y16_to_grey(&y16, 3).is_err());
    }

    #[test]
    fn test_dark_frame_all_black() {
        assert!(is_dark_frame(&vec![0u8; 3000], 0.95));
    }

    #[test]
    fn test_dark_frame_normal() {
        assert!(!is_dark_frame(&vec![128u8; 3000], 0.95));
    }

    #[test]
    fn test_dark_frame_empty() {
        assert!(is_dark_frame(&[], 0.95));
    }

    #[test]
    fn test_dark_frame_borderline_bright() {
        // 94% dark, 6% bright → should NOT be dark
        let mut rgb = grey_to_rgb(&vec![10u8; 940]);
        rgb.extend(grey_to_rgb(&vec![128u8; 60]));
        assert!(!is_dark_frame(&rgb, 0.95));
    }

    #[test]
    fn test_avg_brightness() {
        let frame = Frame {
            data: grey_to_rgb(&[100, 200]),
            width: 2,
            height: 1,
            timestamp: std::time::Instant::now(),
            sequence: 0,
            is_dark: false,
        };
        assert!((frame.avg_brightness() - 150.0).abs() < 1.0);
    }
}
