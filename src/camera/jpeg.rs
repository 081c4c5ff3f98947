use bytes::Bytes;
use image::{ImageResult, RgbImage, codecs::jpeg::JpegEncoder};

use crate::core::errors::StreamError;

use super::frame::Frame;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
const MAX_PENDING_BYTES: usize = 8 * 1024 * 1024;

/// Splits an ffmpeg `image2pipe` byte stream into whole JPEG images.
pub struct JpegFrameAccumulator {
    pending: Vec<u8>,
}

impl JpegFrameAccumulator {
    pub fn new() -> Self {
        Self {
            pending: Vec::with_capacity(256 * 1024),
        }
    }

    /// Appends `chunk` and returns the newest complete image, dropping any
    /// older complete images found in the same pass.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        self.pending.extend_from_slice(chunk);
        if self.pending.len() > MAX_PENDING_BYTES {
            let overflow = self.pending.len() - MAX_PENDING_BYTES;
            self.pending.drain(..overflow);
        }

        let mut newest = None;
        while let Some(start) = find_marker(&self.pending, &JPEG_SOI) {
            let Some(end_rel) = find_marker(&self.pending[start + 2..], &JPEG_EOI) else {
                self.pending.drain(..start);
                return newest;
            };
            let end = start + 2 + end_rel + 2;
            newest = Some(self.pending[start..end].to_vec());
            self.pending.drain(..end);
        }

        // No start marker left: nothing in the buffer can become an image,
        // except a trailing 0xFF that may begin the next SOI.
        let keep_tail = self.pending.last() == Some(&JPEG_SOI[0]);
        self.pending.clear();
        if keep_tail {
            self.pending.push(JPEG_SOI[0]);
        }
        newest
    }
}

impl Default for JpegFrameAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

fn find_marker(buffer: &[u8], marker: &[u8; 2]) -> Option<usize> {
    buffer.windows(2).position(|w| w == marker)
}

pub fn decode_jpeg(data: &[u8]) -> ImageResult<RgbImage> {
    let image = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?;
    Ok(image.into_rgb8())
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Bytes, StreamError> {
    let mut out = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|err| StreamError::EncodeFailure(err.to_string()))?;
    Ok(Bytes::from(out))
}

/// Encodes on the blocking pool so request tasks never stall a runtime worker.
pub async fn encode_frame(frame: Frame, quality: u8) -> Result<Bytes, StreamError> {
    tokio::task::spawn_blocking(move || encode_jpeg(frame.image(), quality))
        .await
        .map_err(|err| StreamError::EncodeFailure(format!("encoder task failed: {err}")))?
}
