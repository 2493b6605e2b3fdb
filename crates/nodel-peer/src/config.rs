use std::time::Duration;

use nodel_frame::{FrameConfig, DEFAULT_MAX_MESSAGE};

/// Runtime configuration for a Nodel host, its channels and registries.
#[derive(Debug, Clone)]
pub struct NodelConfig {
    /// How often a client channel checks and refreshes its wiring. Default: 45 s.
    pub wiring_check_interval: Duration,
    /// Delay before a node that failed to resolve is tried again. Default: 30 s.
    pub retry_delay: Duration,
    /// Pause between TCP connect attempts of one channel. Default: 15 s.
    pub connect_backoff: Duration,
    /// Upper bound on a single TCP connect attempt. Default: 10 s.
    pub connect_timeout: Option<Duration>,
    /// Worker threads for handler dispatch and maintenance. Default: 8.
    pub worker_threads: usize,
    /// Largest accepted message in bytes. Default: 10 MiB.
    pub max_message_size: usize,
    /// Interface the channel listener binds. Default: `0.0.0.0`.
    pub bind_host: String,
    /// Port the channel listener binds, `0` for ephemeral. Default: 0.
    pub listen_port: u16,
}

impl Default for NodelConfig {
    fn default() -> Self {
        Self {
            wiring_check_interval: Duration::from_secs(45),
            retry_delay: Duration::from_secs(30),
            connect_backoff: Duration::from_secs(15),
            connect_timeout: Some(Duration::from_secs(10)),
            worker_threads: 8,
            max_message_size: DEFAULT_MAX_MESSAGE,
            bind_host: "0.0.0.0".to_string(),
            listen_port: 0,
        }
    }
}

impl NodelConfig {
    pub fn with_wiring_check_interval(mut self, interval: Duration) -> Self {
        self.wiring_check_interval = interval;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_connect_backoff(mut self, backoff: Duration) -> Self {
        self.connect_backoff = backoff;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    pub fn with_listen(mut self, host: impl Into<String>, port: u16) -> Self {
        self.bind_host = host.into();
        self.listen_port = port;
        self
    }

    /// Framing settings for channel streams.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_message_size: self.max_message_size,
            ..FrameConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_timings() {
        let config = NodelConfig::default();
        assert_eq!(config.wiring_check_interval, Duration::from_secs(45));
        assert_eq!(config.retry_delay, Duration::from_secs(30));
        assert_eq!(config.connect_backoff, Duration::from_secs(15));
        assert_eq!(config.frame_config().max_message_size, 10 * 1024 * 1024);
    }

    #[test]
    fn worker_threads_never_zero() {
        assert_eq!(NodelConfig::default().with_worker_threads(0).worker_threads, 1);
    }

    #[test]
    fn message_cap_flows_into_frame_config() {
        let config = NodelConfig::default().with_max_message_size(4096);
        assert_eq!(config.frame_config().max_message_size, 4096);
    }
}
