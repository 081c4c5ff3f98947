use std::time::{Duration, Instant};

use tokio::time::timeout_at;

use crate::{
    camera::frame::Frame,
    core::{errors::StreamError, state::StreamPhase},
};

use super::slot::SharedStream;

/// Asks the producer for its next frame and waits for it.
///
/// Concurrent callers share the single pending flag: whoever locks first after
/// the producer fills the slot gets the frame, the others keep waiting until
/// their own deadline.
pub async fn capture_frame(shared: &SharedStream, wait: Duration) -> Result<Frame, StreamError> {
    let requested_at = Instant::now();
    let deadline = tokio::time::Instant::now() + wait;
    let mut phase_rx = {
        let mut state = shared.lock().await;
        if state.phase() != StreamPhase::Running {
            return Err(StreamError::StreamNotRunning);
        }
        state.capture_mut().request();
        state.subscribe_phase()
    };

    loop {
        let notified = shared.capture_ready().notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        {
            let mut state = shared.lock().await;
            if let Some(frame) = state.capture_mut().take_since(requested_at) {
                return Ok(frame);
            }
            if state.phase() != StreamPhase::Running {
                return Err(StreamError::StreamNotRunning);
            }
        }

        let woken = timeout_at(deadline, async {
            tokio::select! {
                _ = &mut notified => {}
                _ = phase_rx.changed() => {}
            }
        })
        .await;

        if woken.is_err() {
            let mut state = shared.lock().await;
            if let Some(frame) = state.capture_mut().take_since(requested_at) {
                return Ok(frame);
            }
            state.capture_mut().cancel();
            return Err(StreamError::CaptureTimeout);
        }
    }
}
