use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamPhase {
    Idle,
    Starting,
    Running,
    Stopping,
    Error,
}

impl StreamPhase {
    /// Phases in which a producer task is allowed to write frames.
    pub fn accepts_frames(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    pub fn can_start(self) -> bool {
        matches!(self, Self::Idle | Self::Error)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub phase: StreamPhase,
    pub error: Option<String>,
    pub source_url: String,
    pub frame_available: bool,
    pub frames_received: u64,
}

impl StreamStatus {
    pub fn is_streaming(&self) -> bool {
        self.phase == StreamPhase::Running
    }
}
