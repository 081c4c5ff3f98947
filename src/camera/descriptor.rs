use urlencoding::encode;

use crate::core::errors::StreamError;

pub const DEFAULT_RTSP_PORT: u16 = 554;
pub const DEFAULT_STREAM_PATH: &str = "Streaming/Channels/101";

/// Where the producer connects to. Fixed for the lifetime of a stream session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    url: String,
}

impl ConnectionDescriptor {
    /// Uses a full source URL verbatim.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Builds `rtsp://[user:pass@]host:port/path`. Credentials are only
    /// embedded when both user and password are non-empty, percent-encoded.
    pub fn from_parts(host: &str, port: u16, user: &str, password: &str, path: &str) -> Self {
        let credentials = if !user.is_empty() && !password.is_empty() {
            format!("{}:{}@", encode(user), encode(password))
        } else {
            String::new()
        };
        let path = path.trim_start_matches('/');
        Self {
            url: format!("rtsp://{credentials}{host}:{port}/{path}"),
        }
    }

    /// Accepts a client supplied URL for reconfiguration.
    pub fn parse_source(url: &str) -> Result<Self, StreamError> {
        let url = url.trim();
        let Some((scheme, rest)) = url.split_once("://") else {
            return Err(StreamError::InvalidSource(format!("missing scheme in {url:?}")));
        };
        if !matches!(scheme, "rtsp" | "rtsps") {
            return Err(StreamError::InvalidSource(format!(
                "unsupported scheme {scheme:?}, expected rtsp or rtsps"
            )));
        }
        let host = split_userinfo(rest).map_or(rest, |(_, host)| host);
        if host.split(['/', '?', '#']).next().unwrap_or_default().is_empty() {
            return Err(StreamError::InvalidSource("missing host".to_owned()));
        }
        Ok(Self::from_url(url))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_rtsp(&self) -> bool {
        self.url.starts_with("rtsp://") || self.url.starts_with("rtsps://")
    }

    /// The URL with any password replaced by `***`, safe to log or return.
    pub fn redacted(&self) -> String {
        let Some((scheme, rest)) = self.url.split_once("://") else {
            return self.url.clone();
        };
        let Some((userinfo, host)) = split_userinfo(rest) else {
            return self.url.clone();
        };
        let user = match userinfo.split_once(':') {
            Some((user, _)) => format!("{user}:***"),
            None => userinfo.to_owned(),
        };
        format!("{scheme}://{user}@{host}")
    }
}

/// Splits `userinfo@host...` at the last `@`. Raw passwords may contain `/`,
/// `?` or `@`, so an `@` in the path is treated as userinfo too: the
/// redacted form can be wrong but never leaks.
fn split_userinfo(rest: &str) -> Option<(&str, &str)> {
    rest.rsplit_once('@')
}
