//! Scripted in-process frame sources for exercising the stream lifecycle.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, bail};
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use tokio::time::sleep;

use super::{
    descriptor::ConnectionDescriptor,
    traits::{FrameError, FrameReader, FrameSource},
};

pub const STUB_WIDTH: u32 = 64;
pub const STUB_HEIGHT: u32 = 48;

#[derive(Debug, Clone, Copy)]
enum Script {
    Solid { color: [u8; 3], fps: u32 },
    FailOpen,
    Silent,
    EndAfter { frames: usize, fps: u32 },
    StallAfter { frames: usize, fps: u32 },
    FlakyEvery { nth: usize, fps: u32 },
}

#[derive(Debug, Clone)]
pub struct StubSource {
    script: Script,
    open_delay: Duration,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl StubSource {
    fn new(script: Script) -> Self {
        Self {
            script,
            open_delay: Duration::ZERO,
            opens: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// One solid-color frame per call at `fps`.
    pub fn solid(color: [u8; 3], fps: u32) -> Self {
        Self::new(Script::Solid { color, fps })
    }

    pub fn failing() -> Self {
        Self::new(Script::FailOpen)
    }

    /// Opens fine and then never produces a frame.
    pub fn silent() -> Self {
        Self::new(Script::Silent)
    }

    pub fn ending_after(frames: usize, fps: u32) -> Self {
        Self::new(Script::EndAfter { frames, fps })
    }

    /// Delivers `frames` frames and then blocks without ending.
    pub fn stalling_after(frames: usize, fps: u32) -> Self {
        Self::new(Script::StallAfter { frames, fps })
    }

    /// Every `nth` read is a transient failure.
    pub fn flaky(nth: usize, fps: u32) -> Self {
        Self::new(Script::FlakyEvery { nth, fps })
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSource for StubSource {
    async fn open(&self, _descriptor: &ConnectionDescriptor) -> Result<Box<dyn FrameReader>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if !self.open_delay.is_zero() {
            sleep(self.open_delay).await;
        }
        if matches!(self.script, Script::FailOpen) {
            bail!("connection refused");
        }
        Ok(Box::new(StubReader {
            script: self.script,
            reads: 0,
            closes: self.closes.clone(),
        }))
    }
}

struct StubReader {
    script: Script,
    reads: usize,
    closes: Arc<AtomicUsize>,
}

fn frame_delay(fps: u32) -> Duration {
    Duration::from_secs(1) / fps.max(1)
}

#[async_trait]
impl FrameReader for StubReader {
    async fn next_frame(&mut self) -> Result<RgbImage, FrameError> {
        self.reads += 1;
        match self.script {
            Script::Solid { color, fps } => {
                sleep(frame_delay(fps)).await;
                Ok(RgbImage::from_pixel(STUB_WIDTH, STUB_HEIGHT, Rgb(color)))
            }
            Script::EndAfter { frames, fps } => {
                sleep(frame_delay(fps)).await;
                if self.reads > frames {
                    return Err(FrameError::Ended("stub exhausted".to_owned()));
                }
                Ok(RgbImage::from_pixel(STUB_WIDTH, STUB_HEIGHT, Rgb([0, 0, 255])))
            }
            Script::StallAfter { frames, fps } => {
                if self.reads > frames {
                    std::future::pending::<()>().await;
                }
                sleep(frame_delay(fps)).await;
                Ok(RgbImage::from_pixel(STUB_WIDTH, STUB_HEIGHT, Rgb([255, 255, 0])))
            }
            Script::FlakyEvery { nth, fps } => {
                sleep(frame_delay(fps)).await;
                if self.reads % nth.max(1) == 0 {
                    return Err(FrameError::Transient("stub dropped a frame".to_owned()));
                }
                Ok(RgbImage::from_pixel(STUB_WIDTH, STUB_HEIGHT, Rgb([0, 255, 0])))
            }
            Script::Silent => std::future::pending().await,
            Script::FailOpen => Err(FrameError::Ended("never opened".to_owned())),
        }
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
