use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::RgbImage;
use tokio::{
    io::AsyncReadExt,
    process::{Child, ChildStdout, Command},
};
use tracing::{debug, warn};

use super::{
    descriptor::ConnectionDescriptor,
    jpeg::{JpegFrameAccumulator, decode_jpeg},
    traits::{FrameError, FrameReader, FrameSource},
};

const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Decodes a network stream by running ffmpeg and reading an MJPEG image pipe.
#[derive(Debug, Clone)]
pub struct FfmpegSource {
    binary: String,
    rtsp_transport: String,
    fps: u32,
}

impl FfmpegSource {
    pub fn new(binary: String, rtsp_transport: String, fps: u32) -> Self {
        Self {
            binary,
            rtsp_transport,
            fps,
        }
    }

    fn command(&self, descriptor: &ConnectionDescriptor) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(["-hide_banner", "-loglevel", "error", "-nostdin"]);
        if descriptor.is_rtsp() {
            command.args(["-rtsp_transport", &self.rtsp_transport]);
        }
        command
            .args(["-i", descriptor.url(), "-an"])
            .args(["-r", &self.fps.to_string()])
            .args(["-f", "image2pipe", "-vcodec", "mjpeg", "-q:v", "3", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl FrameSource for FfmpegSource {
    async fn open(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn FrameReader>> {
        let mut child = self
            .command(descriptor)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.binary))?;
        let stdout = child
            .stdout
            .take()
            .context("missing ffmpeg stdout pipe for decoder")?;
        debug!(source = %descriptor.redacted(), "ffmpeg decoder spawned");

        Ok(Box::new(FfmpegReader {
            child,
            stdout,
            accumulator: JpegFrameAccumulator::new(),
            buffer: vec![0_u8; READ_CHUNK_BYTES],
        }))
    }
}

struct FfmpegReader {
    child: Child,
    stdout: ChildStdout,
    accumulator: JpegFrameAccumulator,
    buffer: Vec<u8>,
}

impl FfmpegReader {
    fn exit_reason(&mut self) -> String {
        match self.child.try_wait() {
            Ok(Some(status)) => format!("ffmpeg exited with {status}"),
            Ok(None) => "ffmpeg closed its output".to_owned(),
            Err(err) => format!("ffmpeg status unavailable: {err}"),
        }
    }
}

#[async_trait]
impl FrameReader for FfmpegReader {
    async fn next_frame(&mut self) -> Result<RgbImage, FrameError> {
        let jpeg = loop {
            let read = self
                .stdout
                .read(&mut self.buffer)
                .await
                .map_err(|err| FrameError::Ended(format!("ffmpeg pipe read failed: {err}")))?;
            if read == 0 {
                return Err(FrameError::Ended(self.exit_reason()));
            }
            if let Some(jpeg) = self.accumulator.push_chunk(&self.buffer[..read]) {
                break jpeg;
            }
        };

        tokio::task::spawn_blocking(move || decode_jpeg(&jpeg))
            .await
            .map_err(|err| FrameError::Transient(format!("decoder task failed: {err}")))?
            .map_err(|err| FrameError::Transient(format!("undecodable jpeg: {err}")))
    }

    async fn close(&mut self) {
        if let Err(err) = self.child.kill().await {
            warn!("failed to kill ffmpeg decoder: {err}");
        }
        if let Err(err) = self.child.wait().await {
            warn!("failed to wait ffmpeg decoder: {err}");
        }
    }
}
