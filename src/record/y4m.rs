//! YUV4MPEG2 writer.
//!
//! Uncompressed 4:4:4 planar output with full-range BT.601 conversion.
//! Every build can write it, and `ffmpeg -i cam_0.y4m` reads it back.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::RecordingError;
use crate::frame::Frame;

pub const FRAME_MARKER: &[u8] = b"FRAME\n";

pub fn header(width: u32, height: u32, fps: u32) -> String {
    format!(
        "YUV4MPEG2 W{} H{} F{}:1 Ip A1:1 C444 XCOLORRANGE=FULL\n",
        width, height, fps
    )
}

/// Y, Cb and Cr planes for one frame, in that order.
pub fn encode_planes(frame: &Frame) -> Vec<u8> {
    let plane = (frame.width as usize) * (frame.height as usize);
    let mut out = vec![0u8; plane * 3];
    let (luma, chroma) = out.split_at_mut(plane);
    let (cb_plane, cr_plane) = chroma.split_at_mut(plane);

    let swap = matches!(frame.layout, crate::frame::PixelLayout::Bgr24);
    for (i, px) in frame.pixels().chunks_exact(3).enumerate() {
        let (r, g, b) = if swap {
            (px[2] as f32, px[1] as f32, px[0] as f32)
        } else {
            (px[0] as f32, px[1] as f32, px[2] as f32)
        };
        luma[i] = to_u8(0.299 * r + 0.587 * g + 0.114 * b);
        cb_plane[i] = to_u8(128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b);
        cr_plane[i] = to_u8(128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b);
    }
    out
}

fn to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

pub struct Y4mWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl Y4mWriter {
    pub fn create(path: &Path, width: u32, height: u32, fps: u32) -> Result<Self, RecordingError> {
        let file = File::create(path).map_err(|err| RecordingError::CreateFile {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        let mut out = BufWriter::new(file);
        out.write_all(header(width, height, fps).as_bytes())
            .map_err(|err| RecordingError::CreateFile {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            out,
        })
    }

    pub fn write(&mut self, frame: &Frame) -> Result<(), RecordingError> {
        let planes = encode_planes(frame);
        self.out
            .write_all(FRAME_MARKER)
            .and_then(|_| self.out.write_all(&planes))
            .map_err(|err| RecordingError::WriteFailure {
                path: self.path.clone(),
                reason: err.to_string(),
            })
    }

    pub fn finish(mut self) -> Result<(), RecordingError> {
        self.out
            .flush()
            .and_then(|_| self.out.get_ref().sync_all())
            .map_err(|err| RecordingError::Finish {
                path: self.path.clone(),
                reason: err.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CameraId, PixelLayout};

    #[test]
    fn gray_pixels_have_neutral_chroma() {
        let frame = Frame::new(CameraId(0), 2, 1, PixelLayout::Bgr24, 1, vec![90; 6])
            .expect("frame");
        let planes = encode_planes(&frame);
        assert_eq!(planes, vec![90, 90, 128, 128, 128, 128]);
    }

    #[test]
    fn layout_does_not_change_encoding() {
        let bgr = Frame::new(CameraId(0), 1, 1, PixelLayout::Bgr24, 1, vec![10, 20, 200])
            .expect("frame");
        assert_eq!(encode_planes(&bgr), encode_planes(&bgr.to_rgb()));
    }

    #[test]
    fn writer_emits_header_and_frames() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cam_0.y4m");
        let frame = Frame::new(CameraId(0), 2, 2, PixelLayout::Bgr24, 1, vec![7; 12])
            .expect("frame");

        let mut writer = Y4mWriter::create(&path, 2, 2, 30).expect("create");
        writer.write(&frame).expect("write");
        writer.write(&frame).expect("write");
        writer.finish().expect("finish");

        let bytes = std::fs::read(&path).expect("read");
        let head = header(2, 2, 30);
        assert!(bytes.starts_with(head.as_bytes()));
        assert_eq!(bytes.len(), head.len() + 2 * (FRAME_MARKER.len() + 12));
    }
}
