use std::time::Instant;

use tokio::sync::Mutex;

use crate::{config::AppConfig, stream::supervisor::StreamSupervisor};

pub const LIVE_PATH: &str = "/stream/live";

pub struct AppState {
    pub config: AppConfig,
    pub stream: StreamSupervisor,
    last_activity: Mutex<Instant>,
}

impl AppState {
    pub fn new(config: AppConfig, stream: StreamSupervisor) -> Self {
        Self {
            config,
            stream,
            last_activity: Mutex::new(Instant::now()),
        }
    }

    pub async fn update_activity(&self) {
        let mut last_activity = self.last_activity.lock().await;
        *last_activity = Instant::now();
    }

    pub async fn idle_seconds(&self) -> u64 {
        let last_activity = self.last_activity.lock().await;
        last_activity.elapsed().as_secs()
    }
}
