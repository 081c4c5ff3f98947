use std::time::Instant;

use tokio::sync::{Mutex, MutexGuard, Notify, watch};
use tracing::{error, info};

use crate::{
    camera::{descriptor::ConnectionDescriptor, frame::Frame},
    core::{
        errors::StreamError,
        state::{StreamPhase, StreamStatus},
    },
};

/// Latest decoded frame of the current session.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    current: Option<Frame>,
    received: u64,
}

impl FrameBuffer {
    fn store(&mut self, frame: Frame) {
        self.current = Some(frame);
        self.received += 1;
    }

    pub fn current(&self) -> Option<&Frame> {
        self.current.as_ref()
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    fn clear(&mut self) {
        self.current = None;
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Single-slot snapshot handshake between capture callers and the producer.
#[derive(Debug, Default)]
pub struct CaptureRequest {
    requested: bool,
    result: Option<Frame>,
}

impl CaptureRequest {
    pub fn request(&mut self) {
        self.requested = true;
    }

    #[cfg(test)]
    pub fn is_pending(&self) -> bool {
        self.requested
    }

    /// Hands `frame` to a waiting caller. Returns whether a request was pending.
    fn fulfil(&mut self, frame: &Frame) -> bool {
        if !self.requested {
            return false;
        }
        self.result = Some(frame.clone());
        self.requested = false;
        true
    }

    /// Takes the buffered result if it was captured no earlier than `since`.
    /// An older result is left for an earlier caller; the next `fulfil`
    /// overwrites it if nobody claims it.
    pub fn take_since(&mut self, since: Instant) -> Option<Frame> {
        if self.result.as_ref()?.captured_at() < since {
            return None;
        }
        self.result.take()
    }

    pub fn cancel(&mut self) {
        self.requested = false;
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Everything guarded by the stream lock.
#[derive(Debug)]
pub struct StreamState {
    phase: StreamPhase,
    last_error: Option<StreamError>,
    descriptor: ConnectionDescriptor,
    session: u64,
    frames: FrameBuffer,
    capture: CaptureRequest,
    phase_tx: watch::Sender<StreamPhase>,
}

impl StreamState {
    fn new(descriptor: ConnectionDescriptor) -> Self {
        let (phase_tx, _) = watch::channel(StreamPhase::Idle);
        Self {
            phase: StreamPhase::Idle,
            last_error: None,
            descriptor,
            session: 0,
            frames: FrameBuffer::default(),
            capture: CaptureRequest::default(),
            phase_tx,
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    fn set_phase(&mut self, phase: StreamPhase) {
        self.phase = phase;
        self.phase_tx.send_replace(phase);
    }

    /// Receiver that wakes on every phase transition made after this call.
    pub fn subscribe_phase(&self) -> watch::Receiver<StreamPhase> {
        self.phase_tx.subscribe()
    }

    pub fn last_error(&self) -> Option<&StreamError> {
        self.last_error.as_ref()
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    pub fn set_descriptor(&mut self, descriptor: ConnectionDescriptor) -> Result<(), StreamError> {
        if !self.phase.can_start() {
            return Err(StreamError::SourceLocked);
        }
        self.descriptor = descriptor;
        Ok(())
    }

    pub fn frames(&self) -> &FrameBuffer {
        &self.frames
    }

    pub fn capture_mut(&mut self) -> &mut CaptureRequest {
        &mut self.capture
    }

    /// Enters Starting for a fresh session and returns its id.
    pub fn begin_session(&mut self) -> u64 {
        self.session += 1;
        self.last_error = None;
        self.frames.reset();
        self.capture.clear();
        self.set_phase(StreamPhase::Starting);
        self.session
    }

    /// Enters Stopping. Bumping the session makes late writes from the
    /// outgoing producer no-ops.
    pub fn begin_stop(&mut self) {
        self.session += 1;
        self.set_phase(StreamPhase::Stopping);
    }

    pub fn finish_stop(&mut self) {
        self.frames.clear();
        self.capture.clear();
        self.last_error = None;
        self.set_phase(StreamPhase::Idle);
    }

    fn is_live_session(&self, session: u64) -> bool {
        self.session == session && self.phase.accepts_frames()
    }

    pub fn status(&self) -> StreamStatus {
        StreamStatus {
            phase: self.phase,
            error: self.last_error.as_ref().map(ToString::to_string),
            source_url: self.descriptor.redacted(),
            frame_available: self.frames.current().is_some(),
            frames_received: self.frames.received(),
        }
    }
}

/// State shared between the supervisor, the producer and every reader.
pub struct SharedStream {
    state: Mutex<StreamState>,
    capture_ready: Notify,
}

impl SharedStream {
    pub fn new(descriptor: ConnectionDescriptor) -> Self {
        Self {
            state: Mutex::new(StreamState::new(descriptor)),
            capture_ready: Notify::new(),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().await
    }

    pub fn capture_ready(&self) -> &Notify {
        &self.capture_ready
    }

    /// Stores a freshly decoded frame for `session`. Returns false once the
    /// session is no longer current, telling the producer to exit.
    pub async fn publish(&self, session: u64, frame: Frame) -> bool {
        let fulfilled = {
            let mut state = self.state.lock().await;
            if !state.is_live_session(session) {
                return false;
            }
            let fulfilled = state.capture.fulfil(&frame);
            state.frames.store(frame);
            if state.phase == StreamPhase::Starting {
                state.set_phase(StreamPhase::Running);
                info!(
                    source = %state.descriptor.redacted(),
                    "first frame received, stream running"
                );
            }
            fulfilled
        };
        if fulfilled {
            self.capture_ready.notify_waiters();
        }
        true
    }

    /// Moves a live session into Error. Ignored for stale sessions.
    pub async fn fail(&self, session: u64, cause: StreamError) {
        let mut state = self.state.lock().await;
        if !state.is_live_session(session) {
            return;
        }
        match &cause {
            StreamError::SourceUnreachable { detail } | StreamError::SourceEnded { detail } => {
                error!(source = %state.descriptor.redacted(), %detail, "stream failed: {cause}");
            }
            _ => error!(source = %state.descriptor.redacted(), "stream failed: {cause}"),
        }
        state.frames.clear();
        state.capture.clear();
        state.last_error = Some(cause);
        state.set_phase(StreamPhase::Error);
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use image::{Rgb, RgbImage};

    use crate::{
        camera::{descriptor::ConnectionDescriptor, frame::Frame},
        core::{errors::StreamError, state::StreamPhase},
    };

    use super::SharedStream;

    fn frame(sequence: u64) -> Frame {
        Frame::new(RgbImage::from_pixel(4, 4, Rgb([1, 2, 3])), sequence)
    }

    fn shared() -> SharedStream {
        SharedStream::new(ConnectionDescriptor::from_url("rtsp://cam/stream"))
    }

    #[tokio::test]
    async fn first_published_frame_moves_starting_to_running() {
        let shared = shared();
        let session = shared.lock().await.begin_session();

        assert!(shared.publish(session, frame(1)).await);

        let state = shared.lock().await;
        assert_eq!(state.phase(), StreamPhase::Running);
        assert_eq!(state.frames().received(), 1);
    }

    #[tokio::test]
    async fn stale_session_cannot_write() {
        let shared = shared();
        let session = shared.lock().await.begin_session();
        shared.lock().await.begin_stop();

        assert!(!shared.publish(session, frame(1)).await);
        shared
            .fail(session, StreamError::source_ended("late"))
            .await;

        let state = shared.lock().await;
        assert_eq!(state.phase(), StreamPhase::Stopping);
        assert!(state.frames().current().is_none());
        assert!(state.last_error().is_none());
    }

    #[tokio::test]
    async fn pending_capture_is_fulfilled_once() {
        let shared = shared();
        let session = shared.lock().await.begin_session();
        let asked_at = Instant::now();
        shared.lock().await.capture_mut().request();

        shared.publish(session, frame(1)).await;
        shared.publish(session, frame(2)).await;

        let mut state = shared.lock().await;
        assert!(!state.capture_mut().is_pending());
        let taken = state
            .capture_mut()
            .take_since(asked_at)
            .expect("result should be buffered");
        assert_eq!(taken.sequence(), 1);
        assert!(state.capture_mut().take_since(asked_at).is_none());
    }

    #[tokio::test]
    async fn results_older_than_the_request_are_not_handed_out() {
        let shared = shared();
        let session = shared.lock().await.begin_session();
        shared.lock().await.capture_mut().request();
        shared.publish(session, frame(1)).await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        let later = Instant::now();
        let mut state = shared.lock().await;
        assert!(state.capture_mut().take_since(later).is_none());
    }

    #[tokio::test]
    async fn late_caller_leaves_an_earlier_callers_result_in_place() {
        let shared = shared();
        let session = shared.lock().await.begin_session();

        let first_asked = Instant::now();
        shared.lock().await.capture_mut().request();
        let decoded = frame(1);
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second_asked = Instant::now();
        shared.lock().await.capture_mut().request();
        shared.publish(session, decoded).await;

        let mut state = shared.lock().await;
        assert!(state.capture_mut().take_since(second_asked).is_none());
        let taken = state
            .capture_mut()
            .take_since(first_asked)
            .expect("earlier caller still gets the frame");
        assert_eq!(taken.sequence(), 1);
    }

    #[tokio::test]
    async fn reconfiguration_is_refused_while_running() {
        let shared = shared();
        let session = shared.lock().await.begin_session();
        shared.publish(session, frame(1)).await;

        let mut state = shared.lock().await;
        let err = state
            .set_descriptor(ConnectionDescriptor::from_url("rtsp://other/stream"))
            .expect_err("running stream must keep its source");
        assert_eq!(err, StreamError::SourceLocked);
    }
}
