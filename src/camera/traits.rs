use anyhow::Result;
use async_trait::async_trait;
use image::RgbImage;
use thiserror::Error;

use super::descriptor::ConnectionDescriptor;

#[derive(Debug, Error)]
pub enum FrameError {
    /// A single frame was lost; the connection is still usable.
    #[error("transient read failure: {0}")]
    Transient(String),
    /// The connection is gone and will not yield further frames.
    #[error("source ended: {0}")]
    Ended(String),
}

#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn open(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn FrameReader>>;
}

/// An open connection, exclusively owned by the producer task.
///
/// `next_frame` must be cancel safe: the producer drops it mid-flight when a
/// stop is requested and then calls `close`.
#[async_trait]
pub trait FrameReader: Send {
    async fn next_frame(&mut self) -> Result<RgbImage, FrameError>;
    async fn close(&mut self);
}
