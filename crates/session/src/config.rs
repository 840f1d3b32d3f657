use std::time::Duration;

use fshare_protocol::constants::{
    DATA_CHANNEL_LABEL, DEFAULT_CHUNK_SIZE, DEFAULT_EXPIRE_TIME, DEFAULT_REQUEST_MAX,
    DEFAULT_REQUEST_THRESHOLD,
};
use fshare_transfer::WindowConfig;

use crate::SessionError;

/// Largest chunk count accepted from an incoming offer by default.
pub const DEFAULT_MAX_CHUNKS: usize = 200_000;

/// Tunables shared by every session of a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Size of each file chunk in bytes.
    pub chunk_size: usize,
    /// Maximum chunks requested but not yet received.
    pub request_max: usize,
    /// Outstanding level below which the receiver requests more.
    pub request_threshold: usize,
    /// Delay after which an unanswered request round is retried.
    pub expire_time: Duration,
    /// Label of the data channel opened by the initiator.
    pub channel_label: String,
    /// Raise the bandwidth cap token in outgoing descriptions.
    pub patch_bandwidth: bool,
    /// Offers announcing more chunks than this are rejected.
    pub max_chunks: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            request_max: DEFAULT_REQUEST_MAX,
            request_threshold: DEFAULT_REQUEST_THRESHOLD,
            expire_time: DEFAULT_EXPIRE_TIME,
            channel_label: DATA_CHANNEL_LABEL.to_string(),
            patch_bandwidth: true,
            max_chunks: DEFAULT_MAX_CHUNKS,
        }
    }
}

impl SessionConfig {
    /// Checks the invariants the window and codec rely on.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.chunk_size == 0 {
            return Err(SessionError::InvalidConfig(
                "chunk_size must be greater than zero".into(),
            ));
        }
        if self.request_max == 0 {
            return Err(SessionError::InvalidConfig(
                "request_max must be greater than zero".into(),
            ));
        }
        if self.request_threshold > self.request_max {
            return Err(SessionError::InvalidConfig(format!(
                "request_threshold ({}) exceeds request_max ({})",
                self.request_threshold, self.request_max
            )));
        }
        if self.max_chunks == 0 || u32::try_from(self.max_chunks).is_err() {
            return Err(SessionError::InvalidConfig(format!(
                "max_chunks must be between 1 and {}",
                u32::MAX
            )));
        }
        if self.channel_label.is_empty() {
            return Err(SessionError::InvalidConfig(
                "channel_label must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn window(&self) -> WindowConfig {
        WindowConfig {
            request_max: self.request_max,
            request_threshold: self.request_threshold,
        }
    }
}
