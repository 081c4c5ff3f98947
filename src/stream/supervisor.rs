use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
    time::timeout,
};
use tracing::{info, warn};

use crate::{
    camera::{
        descriptor::ConnectionDescriptor, frame::Frame, jpeg::encode_frame, traits::FrameSource,
    },
    core::{
        errors::StreamError,
        state::{StreamPhase, StreamStatus},
    },
};

use super::{capture, mjpeg, producer::Producer, slot::SharedStream};

#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Upper bound on how long `start` waits for the first frame.
    pub start_timeout: Duration,
    /// How long `stop` waits for the producer before aborting it.
    pub stop_grace: Duration,
    pub capture_timeout: Duration,
    /// Producer pacing; one read per interval at most.
    pub frame_interval: Duration,
    pub retry_backoff: Duration,
    /// How often an idle live client re-checks the frame buffer.
    pub live_poll_interval: Duration,
    pub jpeg_quality: u8,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(10),
            stop_grace: Duration::from_secs(2),
            capture_timeout: Duration::from_secs(2),
            frame_interval: Duration::from_millis(40),
            retry_backoff: Duration::from_millis(100),
            live_poll_interval: Duration::from_millis(40),
            jpeg_quality: 80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub phase: StreamPhase,
    pub error: Option<StreamError>,
}

impl StartOutcome {
    pub fn started(&self) -> bool {
        self.phase == StreamPhase::Running
    }
}

#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub jpeg: Bytes,
    pub frame: Frame,
}

struct ProducerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ProducerHandle {
    async fn shutdown(self, grace: Duration) {
        let _ = self.stop_tx.send(true);
        let mut task = self.task;
        match timeout(grace, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("stream producer ended abnormally: {err}"),
            Err(_) => {
                // A read blocked outside the runtime cannot be interrupted; the
                // task is detached and its writes are ignored from here on.
                warn!("stream producer did not stop within {grace:?}, aborting");
                task.abort();
            }
        }
    }
}

/// Owns the lifecycle of one camera stream and is the entry point for every
/// client operation against it.
pub struct StreamSupervisor {
    source: Arc<dyn FrameSource>,
    settings: StreamSettings,
    shared: Arc<SharedStream>,
    /// Serializes start, stop and reconfiguration.
    producer: Mutex<Option<ProducerHandle>>,
}

impl StreamSupervisor {
    pub fn new(
        source: Arc<dyn FrameSource>,
        descriptor: ConnectionDescriptor,
        settings: StreamSettings,
    ) -> Self {
        Self {
            source,
            settings,
            shared: Arc::new(SharedStream::new(descriptor)),
            producer: Mutex::new(None),
        }
    }

    /// Starts the producer and waits, bounded by `start_timeout`, until the
    /// first frame arrives or the source fails. Idempotent while Running.
    pub async fn start(&self) -> StartOutcome {
        let mut producer = self.producer.lock().await;

        {
            let state = self.shared.lock().await;
            if !state.phase().can_start() {
                return StartOutcome {
                    phase: state.phase(),
                    error: state.last_error().cloned(),
                };
            }
        }

        // Left behind by a session that failed on its own.
        if let Some(previous) = producer.take() {
            previous.shutdown(self.settings.stop_grace).await;
        }

        let (session, descriptor, mut phase_rx) = {
            let mut state = self.shared.lock().await;
            let session = state.begin_session();
            (session, state.descriptor().clone(), state.subscribe_phase())
        };
        info!(session, source = %descriptor.redacted(), "starting stream");

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(
            Producer {
                source: self.source.clone(),
                descriptor,
                shared: self.shared.clone(),
                session,
                frame_interval: self.settings.frame_interval,
                retry_backoff: self.settings.retry_backoff,
                stop_rx,
            }
            .run(),
        );
        *producer = Some(ProducerHandle { stop_tx, task });

        let settled = matches!(
            timeout(
                self.settings.start_timeout,
                phase_rx.wait_for(|phase| *phase != StreamPhase::Starting),
            )
            .await,
            Ok(Ok(_))
        );
        if !settled {
            self.shared
                .fail(
                    session,
                    StreamError::source_unreachable(format!(
                        "no frame within {:?}",
                        self.settings.start_timeout
                    )),
                )
                .await;
        }

        let outcome = {
            let state = self.shared.lock().await;
            StartOutcome {
                phase: state.phase(),
                error: state.last_error().cloned(),
            }
        };
        if !outcome.started() {
            if let Some(handle) = producer.take() {
                handle.shutdown(self.settings.stop_grace).await;
            }
        }
        outcome
    }

    /// Stops the producer and clears all frame state. Always ends in Idle.
    pub async fn stop(&self) {
        let mut producer = self.producer.lock().await;

        {
            let mut state = self.shared.lock().await;
            if state.phase() == StreamPhase::Idle {
                return;
            }
            state.begin_stop();
        }

        if let Some(handle) = producer.take() {
            handle.shutdown(self.settings.stop_grace).await;
        }

        self.shared.lock().await.finish_stop();
        info!("stream stopped");
    }

    pub async fn status(&self) -> StreamStatus {
        self.shared.lock().await.status()
    }

    pub async fn phase(&self) -> StreamPhase {
        self.shared.lock().await.phase()
    }

    /// Replaces the connection descriptor. Only allowed while Idle or Error.
    pub async fn reconfigure(&self, descriptor: ConnectionDescriptor) -> Result<(), StreamError> {
        let _lifecycle = self.producer.lock().await;
        let mut state = self.shared.lock().await;
        state.set_descriptor(descriptor)?;
        info!(source = %state.descriptor().redacted(), "stream source reconfigured");
        Ok(())
    }

    /// Waits for the producer's next frame without disturbing live clients.
    pub async fn capture_frame(&self) -> Result<Frame, StreamError> {
        capture::capture_frame(&self.shared, self.settings.capture_timeout).await
    }

    /// Like `capture_frame`, JPEG-encoded.
    pub async fn capture(&self) -> Result<CapturedImage, StreamError> {
        let frame = self.capture_frame().await?;
        let jpeg = encode_frame(frame.clone(), self.settings.jpeg_quality).await?;
        Ok(CapturedImage { jpeg, frame })
    }

    /// Opens a live multipart stream for one client.
    pub async fn open_live(&self) -> Result<BoxStream<'static, Bytes>, StreamError> {
        let phase_rx = {
            let state = self.shared.lock().await;
            if state.phase() != StreamPhase::Running {
                return Err(StreamError::StreamNotRunning);
            }
            state.subscribe_phase()
        };
        Ok(mjpeg::live_stream(
            self.shared.clone(),
            phase_rx,
            self.settings.live_poll_interval,
            self.settings.jpeg_quality,
        ))
    }
}
