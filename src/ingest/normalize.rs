use anyhow::{anyhow, Result};

/// Pixel formats a V4L2 device may hand back when RGB24 is refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
    Nv12,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"YUYV" => Some(Self::Yuyv),
            b"NV12" => Some(Self::Nv12),
            _ => None,
        }
    }
}

pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let plane = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    match format {
        PixelFormat::Rgb24 => {
            let expected = plane * 3;
            let data = pixels
                .get(..expected)
                .ok_or_else(|| length_mismatch("RGB", expected, pixels.len()))?;
            Ok(data.to_vec())
        }
        PixelFormat::Yuyv => yuyv_to_rgb(pixels, w, h),
        PixelFormat::Nv12 => nv12_to_rgb(pixels, w, h),
    }
}

fn yuyv_to_rgb(pixels: &[u8], w: usize, h: usize) -> Result<Vec<u8>> {
    let expected = w * h * 2;
    let data = pixels
        .get(..expected)
        .ok_or_else(|| length_mismatch("YUYV", expected, pixels.len()))?;

    let mut rgb = Vec::with_capacity(w * h * 3);
    for quad in data.chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for y in [quad[0], quad[2]] {
            push_rgb(&mut rgb, y as f32, u, v);
        }
    }
    Ok(rgb)
}

fn nv12_to_rgb(pixels: &[u8], w: usize, h: usize) -> Result<Vec<u8>> {
    let y_plane = w * h;
    let expected = y_plane + y_plane / 2;
    if pixels.len() < expected {
        return Err(length_mismatch("NV12", expected, pixels.len()));
    }

    let mut rgb = Vec::with_capacity(y_plane * 3);
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;
            push_rgb(&mut rgb, y, u, v);
        }
    }
    Ok(rgb)
}

fn push_rgb(out: &mut Vec<u8>, y: f32, u: f32, v: f32) {
    out.push(clamp_to_u8(y + 1.402 * v));
    out.push(clamp_to_u8(y - 0.344_136 * u - 0.714_136 * v));
    out.push(clamp_to_u8(y + 1.772 * u));
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

fn length_mismatch(kind: &str, expected: usize, actual: usize) -> anyhow::Error {
    anyhow!(
        "{} frame too short: expected {} bytes, got {}",
        kind,
        expected,
        actual
    )
}
