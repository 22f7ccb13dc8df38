//! VM configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use enclosure_worker::WorkerConfig;

/// Configuration for one enclosure VM.
///
/// Durations are written as milliseconds when serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// How long the worker may take to announce boot completion.
    #[serde(with = "millis")]
    pub boot_timeout: Duration,

    /// Interval between liveness pings.
    #[serde(with = "millis")]
    pub ping_interval: Duration,

    /// Silence after which the worker is considered unresponsive and the VM
    /// is shut down.
    #[serde(with = "millis")]
    pub unresponsive_after: Duration,

    /// Shut the VM down when the worker reports a fatal error.
    pub stop_on_worker_error: bool,

    /// Limits for the worker's script engine.
    pub worker: WorkerConfig,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            boot_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(1),
            unresponsive_after: Duration::from_secs(5),
            stop_on_worker_error: true,
            worker: WorkerConfig::default(),
        }
    }
}

impl VmConfig {
    pub fn with_boot_timeout(mut self, timeout: Duration) -> Self {
        self.boot_timeout = timeout;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_unresponsive_after(mut self, threshold: Duration) -> Self {
        self.unresponsive_after = threshold;
        self
    }

    pub fn with_stop_on_worker_error(mut self, stop: bool) -> Self {
        self.stop_on_worker_error = stop;
        self
    }

    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_are_milliseconds() {
        let config = VmConfig::default().with_ping_interval(Duration::from_millis(250));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["ping_interval"], 250);
        assert_eq!(json["boot_timeout"], 5000);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config: VmConfig = serde_json::from_str(
            r#"{ "unresponsive_after": 1500, "worker": { "recursion_limit": 32 } }"#,
        )
        .unwrap();
        assert_eq!(config.unresponsive_after, Duration::from_millis(1500));
        assert_eq!(config.boot_timeout, Duration::from_secs(5));
        assert_eq!(config.worker.recursion_limit, 32);
        assert!(config.stop_on_worker_error);
    }
}
