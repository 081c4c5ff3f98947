use std::{sync::Arc, time::Instant};

use image::RgbImage;

/// One decoded raster frame. Cloning shares the pixel buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<RgbImage>,
    captured_at: Instant,
    sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image: Arc::new(image),
            captured_at: Instant::now(),
            sequence,
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Position of this frame within its stream session, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}
