//! Frame type and image processing: YUYV conversion, black-frame sampling, JPEG encoding.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

/// Pixel stride used when sampling a frame for content.
pub const BLACK_SAMPLE_STRIDE: usize = 10;

/// A channel value above this counts as real content.
pub const BLACK_CHANNEL_THRESHOLD: u8 = 10;

/// A decoded RGB24 camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

impl Frame {
    /// Wrap an already-decoded RGB24 buffer.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            sequence,
        }
    }

    /// True when the stream reported a degenerate size.
    pub fn has_zero_dimensions(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Sparse-sample the frame with the default stride and threshold.
    pub fn is_black(&self) -> bool {
        is_black_frame(&self.data, BLACK_SAMPLE_STRIDE, BLACK_CHANNEL_THRESHOLD)
    }
}

/// Convert packed YUYV (4:2:2) to RGB24 using BT.601 studio-swing coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U and V.
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
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        push_rgb(&mut rgb, y0, u, v);
        push_rgb(&mut rgb, y1, u, v);
    }
    Ok(rgb)
}

fn push_rgb(out: &mut Vec<u8>, y: u8, u: u8, v: u8) {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    out.push(clamp((298 * c + 409 * e + 128) >> 8));
    out.push(clamp((298 * c - 100 * d - 208 * e + 128) >> 8));
    out.push(clamp((298 * c + 516 * d + 128) >> 8));
}

/// Check whether an RGB24 buffer is effectively black.
///
/// Looks at every `stride`-th pixel and returns false as soon as any channel
/// of a sampled pixel exceeds `threshold`. An empty buffer is black.
pub fn is_black_frame(rgb: &[u8], stride: usize, threshold: u8) -> bool {
    rgb.chunks_exact(3)
        .step_by(stride.max(1))
        .all(|px| px.iter().all(|&c| c <= threshold))
}

/// Encode an RGB24 frame as JPEG at the given quality (1–100).
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, FrameError> {
    let expected = (frame.width * frame.height * 3) as usize;
    if frame.has_zero_dimensions() || frame.data.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: frame.data.len(),
        });
    }

    let mut out = Vec::with_capacity(expected / 8);
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
        encoder
            .encode(
                &frame.data[..expected],
                frame.width,
                frame.height,
                ExtendedColorType::Rgb8,
            )
            .map_err(|e| FrameError::Encode(e.to_string()))?;
    }
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("jpeg encoding failed: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise_frame(width: u32, height: u32) -> Frame {
        let mut state = 0x2545_f491u32;
        let data = (0..width * height * 3)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state >> 24) as u8
            })
            .collect();
        Frame::from_rgb(data, width, height, 1)
    }

    #[test]
    fn test_yuyv_to_rgb_black_and_white() {
        // Two pixels: studio black (Y=16) and studio white (Y=235), neutral chroma.
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128];
        assert!(yuyv_to_rgb(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_black_frame_all_zero() {
        assert!(is_black_frame(&vec![0u8; 300], 10, 10));
    }

    #[test]
    fn test_black_frame_empty() {
        assert!(is_black_frame(&[], 10, 10));
    }

    #[test]
    fn test_black_frame_single_bright_channel_on_stride() {
        let mut rgb = vec![3u8; 30 * 3];
        // Pixel 20 is sampled with stride 10; only its blue channel is bright.
        rgb[20 * 3 + 2] = 40;
        assert!(!is_black_frame(&rgb, 10, 10));
    }

    #[test]
    fn test_black_frame_ignores_unsampled_pixels() {
        let mut rgb = vec![0u8; 30 * 3];
        // Pixel 5 falls between samples.
        rgb[5 * 3] = 255;
        assert!(is_black_frame(&rgb, 10, 10));
    }

    #[test]
    fn test_black_frame_threshold_is_exclusive() {
        assert!(is_black_frame(&vec![10u8; 60], 10, 10));
        assert!(!is_black_frame(&vec![11u8; 60], 10, 10));
    }

    #[test]
    fn test_encode_jpeg_header_and_size() {
        let frame = noise_frame(64, 48);
        let jpeg = encode_jpeg(&frame, 90).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8], "missing SOI marker");
        assert!(jpeg.len() > 1024);
    }

    #[test]
    fn test_encode_jpeg_black_frame_is_tiny() {
        let frame = Frame::from_rgb(vec![0u8; 160 * 120 * 3], 160, 120, 1);
        let jpeg = encode_jpeg(&frame, 90).unwrap();
        assert!(jpeg.len() < 5 * 1024, "black frame encoded to {} bytes", jpeg.len());
    }

    #[test]
    fn test_encode_jpeg_rejects_zero_dimensions() {
        let frame = Frame::from_rgb(Vec::new(), 0, 0, 1);
        assert!(matches!(
            encode_jpeg(&frame, 90),
            Err(FrameError::InvalidLength { .. })
        ));
    }
}
