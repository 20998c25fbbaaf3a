//! FFmpeg-backed container writer (mp4v/.mp4 and mjpeg/.avi).

use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};

use super::Codec;
use crate::error::RecordingError;
use crate::frame::{Frame, PixelLayout};

pub(crate) struct FfmpegWriter {
    path: PathBuf,
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::Video,
    stream_index: usize,
    encoder_time_base: ffmpeg::Rational,
    stream_time_base: ffmpeg::Rational,
    target_format: ffmpeg::format::Pixel,
    scaler: Option<(PixelLayout, ffmpeg::software::scaling::Context)>,
    width: u32,
    height: u32,
    next_pts: i64,
}

impl FfmpegWriter {
    pub(crate) fn create(
        path: &Path,
        codec: Codec,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Self, RecordingError> {
        let create_err = |reason: String| RecordingError::CreateFile {
            path: path.to_path_buf(),
            reason,
        };
        ffmpeg::init().map_err(|e| create_err(format!("initialize ffmpeg: {}", e)))?;

        let (codec_id, target_format) = match codec {
            Codec::Mp4v => (ffmpeg::codec::Id::MPEG4, ffmpeg::format::Pixel::YUV420P),
            Codec::Mjpeg => (ffmpeg::codec::Id::MJPEG, ffmpeg::format::Pixel::YUVJ420P),
            Codec::Y4m => return Err(RecordingError::UnsupportedCodec(codec.name().to_string())),
        };
        let encoder_codec = ffmpeg::encoder::find(codec_id)
            .ok_or_else(|| create_err(format!("no {} encoder in this ffmpeg", codec)))?;

        let mut output =
            ffmpeg::format::output(&path).map_err(|e| create_err(format!("open output: {}", e)))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let fps = fps.max(1) as i32;
        let encoder_time_base = ffmpeg::Rational::new(1, fps);

        let mut context = ffmpeg::codec::context::Context::new_with_codec(encoder_codec)
            .encoder()
            .video()
            .map_err(|e| create_err(format!("create encoder: {}", e)))?;
        context.set_width(width);
        context.set_height(height);
        context.set_format(target_format);
        context.set_time_base(encoder_time_base);
        context.set_frame_rate(Some(ffmpeg::Rational::new(fps, 1)));
        context.set_bit_rate((width as usize) * (height as usize) * (fps as usize) / 4);
        if global_header {
            context.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = context
            .open_as(encoder_codec)
            .map_err(|e| create_err(format!("open encoder: {}", e)))?;

        let stream_index = {
            let mut stream = output
                .add_stream(encoder_codec)
                .map_err(|e| create_err(format!("add stream: {}", e)))?;
            stream.set_parameters(&encoder);
            stream.set_time_base(encoder_time_base);
            stream.index()
        };
        output
            .write_header()
            .map_err(|e| create_err(format!("write header: {}", e)))?;
        let stream_time_base = output
            .stream(stream_index)
            .map(|stream| stream.time_base())
            .unwrap_or(encoder_time_base);

        Ok(Self {
            path: path.to_path_buf(),
            output,
            encoder,
            stream_index,
            encoder_time_base,
            stream_time_base,
            target_format,
            scaler: None,
            width,
            height,
            next_pts: 0,
        })
    }

    pub(crate) fn write(&mut self, frame: &Frame) -> Result<(), RecordingError> {
        let source_format = match frame.layout {
            PixelLayout::Rgb24 => ffmpeg::format::Pixel::RGB24,
            PixelLayout::Bgr24 => ffmpeg::format::Pixel::BGR24,
        };
        let mut source = ffmpeg::frame::Video::new(source_format, self.width, self.height);
        let row_bytes = (self.width as usize) * 3;
        let stride = source.stride(0);
        {
            let plane = source.data_mut(0);
            for (row, pixels) in frame.pixels().chunks_exact(row_bytes).enumerate() {
                let start = row * stride;
                plane[start..start + row_bytes].copy_from_slice(pixels);
            }
        }

        let mut converted = ffmpeg::frame::Video::empty();
        let path = self.path.clone();
        self.scaler_for(frame.layout, source_format)?
            .run(&source, &mut converted)
            .map_err(|e| RecordingError::WriteFailure {
                path,
                reason: format!("convert frame: {}", e),
            })?;
        converted.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder
            .send_frame(&converted)
            .map_err(|e| self.write_err(format!("encode frame: {}", e)))?;
        self.drain_packets()
    }

    pub(crate) fn finish(mut self) -> Result<(), RecordingError> {
        let finish_err = |path: &Path, reason: String| RecordingError::Finish {
            path: path.to_path_buf(),
            reason,
        };
        self.encoder
            .send_eof()
            .map_err(|e| finish_err(&self.path, format!("flush encoder: {}", e)))?;
        self.drain_packets()?;
        self.output
            .write_trailer()
            .map_err(|e| finish_err(&self.path, format!("write trailer: {}", e)))
    }

    fn scaler_for(
        &mut self,
        layout: PixelLayout,
        source_format: ffmpeg::format::Pixel,
    ) -> Result<&mut ffmpeg::software::scaling::Context, RecordingError> {
        let stale = !matches!(&self.scaler, Some((current, _)) if *current == layout);
        if stale {
            let scaler = ffmpeg::software::scaling::Context::get(
                source_format,
                self.width,
                self.height,
                self.target_format,
                self.width,
                self.height,
                ffmpeg::software::scaling::flag::Flags::BILINEAR,
            )
            .map_err(|e| self.write_err(format!("create scaler: {}", e)))?;
            self.scaler = Some((layout, scaler));
        }
        match self.scaler.as_mut() {
            Some((_, scaler)) => Ok(scaler),
            None => Err(self.write_err("scaler unavailable".to_string())),
        }
    }

    fn drain_packets(&mut self) -> Result<(), RecordingError> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .map_err(|e| self.write_err(format!("write packet: {}", e)))?;
        }
        Ok(())
    }

    fn write_err(&self, reason: String) -> RecordingError {
        RecordingError::WriteFailure {
            path: self.path.clone(),
            reason,
        }
    }
}
