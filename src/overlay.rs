//! On-screen label for display frames.
//!
//! Draws `CAMERA #<id>(FPS:<n>)` in green with a 5x7 bitmap font. Only the
//! display copy is ever annotated; recorded frames never pass through here.

use image::{Rgb, RgbImage};

use crate::frame::{CameraId, Frame, PixelLayout};

pub const LABEL_COLOR: [u8; 3] = [0, 255, 0];
pub const LABEL_ORIGIN: (i32, i32) = (10, 10);

const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const GLYPH_ADVANCE: i32 = 6;

pub fn label_text(camera_id: CameraId, fps: u32) -> String {
    format!("Camera #{}(fps:{})", camera_id, fps)
}

/// Pick an integer glyph scale so the label stays readable on large frames.
pub fn label_scale(height: u32) -> i32 {
    ((height / 240) as i32).clamp(1, 4)
}

/// Convert to RGB and draw the label. Consumes the frame so the raw copy
/// cannot be annotated by accident.
pub fn annotate(frame: Frame, camera_id: CameraId, fps: u32) -> Frame {
    let mut display = match frame.layout {
        PixelLayout::Rgb24 => frame,
        PixelLayout::Bgr24 => frame.to_rgb(),
    };
    let (width, height) = (display.width, display.height);
    let Some(mut image) = RgbImage::from_raw(width, height, display.pixels().to_vec()) else {
        return display;
    };
    draw_label(
        &mut image,
        LABEL_ORIGIN.0,
        LABEL_ORIGIN.1,
        &label_text(camera_id, fps),
        label_scale(height),
        Rgb(LABEL_COLOR),
    );
    display.replace_pixels(image.into_raw());
    display
}

pub fn draw_label(image: &mut RgbImage, mut x: i32, y: i32, text: &str, scale: i32, color: Rgb<u8>) {
    let (width, height) = (image.width() as i32, image.height() as i32);
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                        continue;
                    }
                    for dy in 0..scale {
                        for dx in 0..scale {
                            let px = x + col * scale + dx;
                            let py = y + row as i32 * scale + dy;
                            if px >= 0 && px < width && py >= 0 && py < height {
                                image.put_pixel(px as u32, py as u32, color);
                            }
                        }
                    }
                }
            }
        }
        x += GLYPH_ADVANCE * scale;
    }
}

/// Height in pixels of a rendered label line.
pub fn label_height(scale: i32) -> i32 {
    GLYPH_HEIGHT * scale
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let bits = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'E' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '#' => [0b01010, 0b01010, 0b11111, 0b01010, 0b11111, 0b01010, 0b01010],
        '(' => [0b00010, 0b00100, 0b01000, 0b01000, 0b01000, 0b00100, 0b00010],
        ')' => [0b01000, 0b00100, 0b00010, 0b00010, 0b00010, 0b00100, 0b01000],
        ':' => [0b00000, 0b01100, 0b01100, 0b00000, 0b01100, 0b01100, 0b00000],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_frame(width: u32, height: u32) -> Frame {
        Frame::new(
            CameraId(0),
            width,
            height,
            PixelLayout::Bgr24,
            1,
            vec![40; (width * height * 3) as usize],
        )
        .expect("frame")
    }

    fn green_pixels(frame: &Frame) -> usize {
        frame
            .pixels()
            .chunks_exact(3)
            .filter(|px| *px == LABEL_COLOR)
            .count()
    }

    #[test]
    fn label_matches_status_format() {
        assert_eq!(label_text(CameraId(2), 29), "Camera #2(fps:29)");
    }

    #[test]
    fn annotate_draws_green_label_in_rgb() {
        let frame = gray_frame(200, 40);
        let annotated = annotate(frame, CameraId(0), 30);
        assert_eq!(annotated.layout, PixelLayout::Rgb24);
        assert!(green_pixels(&annotated) > 0);
        assert_eq!(annotated.rgb_at(0, 0), Some([40, 40, 40]));
    }

    #[test]
    fn annotate_clips_to_tiny_frames() {
        let annotated = annotate(gray_frame(4, 4), CameraId(6), 120);
        assert_eq!(annotated.byte_len(), 4 * 4 * 3);
    }

    #[test]
    fn scale_grows_with_frame_height() {
        assert_eq!(label_scale(120), 1);
        assert_eq!(label_scale(480), 2);
        assert_eq!(label_scale(2160), 4);
        assert_eq!(label_height(2), 14);
    }
}
