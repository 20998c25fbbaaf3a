//! Still-image capture.

use image::{ImageFormat, RgbImage};
use std::path::Path;

use crate::error::RecordingError;
use crate::frame::Frame;

/// Write the frame as an RGB PNG, creating parent directories as needed.
pub fn save_png(frame: &Frame, path: &Path) -> Result<(), RecordingError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| RecordingError::CreateDirectory {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let rgb = frame.to_rgb();
    let image = RgbImage::from_raw(rgb.width, rgb.height, rgb.into_pixels()).ok_or_else(|| {
        RecordingError::WriteFailure {
            path: path.to_path_buf(),
            reason: "frame buffer does not match its dimensions".to_string(),
        }
    })?;
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|err| RecordingError::WriteFailure {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CameraId, PixelLayout};

    #[test]
    fn png_round_trips_rgb_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("cam_2.png");
        let frame = Frame::new(CameraId(2), 1, 1, PixelLayout::Bgr24, 1, vec![1, 2, 3])
            .expect("frame");

        save_png(&frame, &path).expect("save");

        let decoded = image::open(&path).expect("decode").to_rgb8();
        assert_eq!(decoded.get_pixel(0, 0).0, [3, 2, 1]);
    }
}
