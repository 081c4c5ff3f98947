use std::{
    env,
    net::{SocketAddr, ToSocketAddrs},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use anyhow::{Context, bail};

use crate::{
    camera::descriptor::{ConnectionDescriptor, DEFAULT_RTSP_PORT, DEFAULT_STREAM_PATH},
    stream::supervisor::StreamSettings,
};

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub rtsp_url: Option<String>,
    pub camera_ip: Option<String>,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub stream_path: String,
}

impl SourceConfig {
    pub fn descriptor(&self) -> anyhow::Result<ConnectionDescriptor> {
        if let Some(url) = &self.rtsp_url {
            return Ok(ConnectionDescriptor::from_url(url.clone()));
        }
        let Some(host) = &self.camera_ip else {
            bail!("set RTSP_URL or CAMERA_IP to point the gateway at a camera");
        };
        Ok(ConnectionDescriptor::from_parts(
            host,
            self.port,
            &self.user,
            &self.password,
            &self.stream_path,
        ))
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub source: SourceConfig,
    pub start_timeout: Duration,
    pub stop_grace: Duration,
    pub capture_timeout: Duration,
    pub stream_fps: u32,
    pub jpeg_quality: u8,
    pub ffmpeg_bin: String,
    pub rtsp_transport: String,
    pub auto_stop_seconds: u64,
    pub log_dir: PathBuf,
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let host = env::var("HTTP_SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_owned());
        let port = parsed_or("HTTP_SERVER_PORT", 8080_u16);
        let bind_addr = (host.as_str(), port)
            .to_socket_addrs()
            .with_context(|| format!("invalid listen address {host}:{port}"))?
            .next()
            .with_context(|| format!("listen address {host}:{port} did not resolve"))?;

        let source = SourceConfig {
            rtsp_url: non_empty("RTSP_URL"),
            camera_ip: non_empty("CAMERA_IP"),
            port: parsed_or("CAMERA_RTSP_PORT", DEFAULT_RTSP_PORT),
            user: env::var("CAMERA_USER").unwrap_or_default(),
            password: env::var("CAMERA_PASS").unwrap_or_default(),
            stream_path: env::var("CAMERA_STREAM_PATH")
                .unwrap_or_else(|_| DEFAULT_STREAM_PATH.to_owned()),
        };
        source.descriptor()?;

        let rtsp_transport = match env::var("RTSP_TRANSPORT").as_deref() {
            Ok("udp") => "udp".to_owned(),
            _ => "tcp".to_owned(),
        };

        Ok(Self {
            bind_addr,
            source,
            start_timeout: Duration::from_secs(
                parsed_or("STREAM_START_TIMEOUT_SECS", 10_u64).max(1),
            ),
            stop_grace: Duration::from_secs(parsed_or("STREAM_STOP_GRACE_SECS", 2)),
            capture_timeout: Duration::from_millis(
                parsed_or("CAPTURE_TIMEOUT_MS", 2000_u64).max(1),
            ),
            stream_fps: parsed_or("STREAM_FPS", 25_u32).clamp(1, 60),
            jpeg_quality: parsed_or("JPEG_QUALITY", 80_u8).clamp(1, 100),
            ffmpeg_bin: non_empty("FFMPEG_BIN").unwrap_or_else(|| "ffmpeg".to_owned()),
            rtsp_transport,
            auto_stop_seconds: parsed_or("AUTO_STOP_SECONDS", 0),
            log_dir: non_empty("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logs")),
        })
    }

    pub fn stream_settings(&self) -> StreamSettings {
        let frame_interval = Duration::from_secs(1) / self.stream_fps;
        StreamSettings {
            start_timeout: self.start_timeout,
            stop_grace: self.stop_grace,
            capture_timeout: self.capture_timeout,
            frame_interval,
            live_poll_interval: frame_interval,
            jpeg_quality: self.jpeg_quality,
            ..StreamSettings::default()
        }
    }
}
