//! Multipart (`multipart/x-mixed-replace`) live output.
//!
//! Each client gets its own lazy stream reading the shared frame buffer. Frames
//! are never consumed, so any number of clients can watch at once; a slow
//! client simply skips the frames it was too slow to see.

use std::{sync::Arc, time::Duration};

use bytes::{BufMut, Bytes, BytesMut};
use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use tokio::{sync::watch, time::sleep};
use tracing::warn;

use crate::{camera::jpeg::encode_frame, core::state::StreamPhase};

use super::slot::SharedStream;

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Wraps one JPEG image as a multipart part.
pub fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let header = format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

struct LiveCursor {
    shared: Arc<SharedStream>,
    phase_rx: watch::Receiver<StreamPhase>,
    poll_interval: Duration,
    quality: u8,
    last_sequence: Option<u64>,
}

impl LiveCursor {
    /// Waits for the next frame this client has not seen yet. `None` once the
    /// stream has left Running.
    async fn next_chunk(&mut self) -> Option<Bytes> {
        loop {
            let (phase, frame) = {
                let state = self.shared.lock().await;
                (state.phase(), state.frames().current().cloned())
            };
            if phase != StreamPhase::Running {
                return None;
            }

            if let Some(frame) = frame.filter(|f| Some(f.sequence()) != self.last_sequence) {
                self.last_sequence = Some(frame.sequence());
                match encode_frame(frame, self.quality).await {
                    Ok(jpeg) => return Some(multipart_chunk(&jpeg)),
                    Err(err) => warn!("dropping live frame: {err}"),
                }
            }

            tokio::select! {
                _ = self.phase_rx.changed() => {}
                _ = sleep(self.poll_interval) => {}
            }
        }
    }
}

/// Lazily produces multipart chunks until the stream stops or the stream
/// value is dropped by a disconnecting client.
pub fn live_stream(
    shared: Arc<SharedStream>,
    phase_rx: watch::Receiver<StreamPhase>,
    poll_interval: Duration,
    quality: u8,
) -> BoxStream<'static, Bytes> {
    let cursor = LiveCursor {
        shared,
        phase_rx,
        poll_interval,
        quality,
        last_sequence: None,
    };
    stream::unfold(cursor, |mut cursor| async move {
        let chunk = cursor.next_chunk().await?;
        Some((chunk, cursor))
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use futures::StreamExt;
    use image::{Rgb, RgbImage};
    use tokio::time::timeout;

    use crate::{
        camera::{descriptor::ConnectionDescriptor, frame::Frame},
        stream::slot::SharedStream,
    };

    use super::{live_stream, multipart_chunk};

    const POLL: Duration = Duration::from_millis(20);

    fn frame(sequence: u64) -> Frame {
        Frame::new(RgbImage::from_pixel(8, 8, Rgb([10, 20, 30])), sequence)
    }

    #[test]
    fn chunk_is_framed_with_boundary_and_content_type() {
        let chunk = multipart_chunk(b"JPEG");
        assert_eq!(
            &chunk[..],
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEG\r\n".as_slice()
        );
    }

    #[tokio::test]
    async fn ends_immediately_when_not_running() {
        let shared = Arc::new(SharedStream::new(ConnectionDescriptor::from_url("rtsp://cam")));
        let phase_rx = shared.lock().await.subscribe_phase();
        let mut live = live_stream(shared, phase_rx, POLL, 80);

        let next = timeout(Duration::from_secs(1), live.next())
            .await
            .expect("stream should resolve");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn yields_each_new_frame_once_and_stops_on_stop() {
        let shared = Arc::new(SharedStream::new(ConnectionDescriptor::from_url("rtsp://cam")));
        let session = shared.lock().await.begin_session();
        shared.publish(session, frame(1)).await;
        let phase_rx = shared.lock().await.subscribe_phase();
        let mut live = live_stream(shared.clone(), phase_rx, POLL, 80);

        let first = timeout(Duration::from_secs(1), live.next())
            .await
            .expect("first chunk")
            .expect("stream open");
        assert!(first.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8"));

        // Same frame is not repeated.
        assert!(timeout(POLL * 3, live.next()).await.is_err());

        shared.publish(session, frame(2)).await;
        let second = timeout(Duration::from_secs(1), live.next()).await.expect("second chunk");
        assert!(second.is_some());

        {
            let mut state = shared.lock().await;
            state.begin_stop();
            state.finish_stop();
        }
        let end = timeout(POLL * 2, live.next())
            .await
            .expect("stream should end within one poll interval");
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn several_clients_see_the_same_frame() {
        let shared = Arc::new(SharedStream::new(ConnectionDescriptor::from_url("rtsp://cam")));
        let session = shared.lock().await.begin_session();
        shared.publish(session, frame(1)).await;

        let mut clients = Vec::new();
        for _ in 0..3 {
            let phase_rx = shared.lock().await.subscribe_phase();
            clients.push(live_stream(shared.clone(), phase_rx, POLL, 80));
        }
        for client in &mut clients {
            let chunk = timeout(Duration::from_secs(1), client.next())
                .await
                .expect("chunk in time");
            assert!(chunk.is_some());
        }
    }
}
