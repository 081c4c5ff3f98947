use std::{sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    time::{MissedTickBehavior, interval, sleep},
};
use tracing::{debug, info};

use crate::{
    camera::{
        descriptor::ConnectionDescriptor,
        frame::Frame,
        traits::{FrameError, FrameSource},
    },
    core::errors::StreamError,
};

use super::slot::SharedStream;

/// The background task that pulls frames from the source into shared state.
///
/// It never changes phase on shutdown; the supervisor owns that transition.
pub struct Producer {
    pub source: Arc<dyn FrameSource>,
    pub descriptor: ConnectionDescriptor,
    pub shared: Arc<SharedStream>,
    pub session: u64,
    pub frame_interval: Duration,
    pub retry_backoff: Duration,
    pub stop_rx: watch::Receiver<bool>,
}

impl Producer {
    pub async fn run(mut self) {
        let opened = tokio::select! {
            biased;
            _ = self.stop_rx.changed() => return,
            opened = self.source.open(&self.descriptor) => opened,
        };
        let mut reader = match opened {
            Ok(reader) => reader,
            Err(err) => {
                self.shared
                    .fail(self.session, StreamError::source_unreachable(format!("{err:#}")))
                    .await;
                return;
            }
        };

        let mut pace = interval(self.frame_interval);
        pace.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sequence = 0_u64;

        loop {
            tokio::select! {
                biased;
                _ = self.stop_rx.changed() => break,
                _ = pace.tick() => {}
            }

            let read = tokio::select! {
                biased;
                _ = self.stop_rx.changed() => break,
                read = reader.next_frame() => read,
            };

            match read {
                Ok(image) => {
                    sequence += 1;
                    if !self.shared.publish(self.session, Frame::new(image, sequence)).await {
                        break;
                    }
                }
                Err(FrameError::Transient(reason)) => {
                    debug!(session = self.session, "skipping frame: {reason}");
                    tokio::select! {
                        biased;
                        _ = self.stop_rx.changed() => break,
                        _ = sleep(self.retry_backoff) => {}
                    }
                }
                Err(FrameError::Ended(reason)) => {
                    let cause = if sequence == 0 {
                        StreamError::source_unreachable(reason)
                    } else {
                        StreamError::source_ended(reason)
                    };
                    self.shared.fail(self.session, cause).await;
                    break;
                }
            }
        }

        reader.close().await;
        info!(session = self.session, frames = sequence, "stream producer exited");
    }
}
