//! Configuration - デフォルト + 設定ファイル + 環境変数の 3 層
//!
//! 1. `BatonConfig::default()`
//! 2. 設定ファイル（TOML / YAML / JSON、拡張子で判別）
//! 3. 環境変数 `BATON__<SECTION>__<KEY>`（例: `BATON__LEASE__DURATION_MS=45000`）
//!
//! 時間はすべてミリ秒の整数で持ち、`Duration` のアクセサを用意しています。

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::app::retry::RetryPolicy;
use crate::domain::{AuditGranularity, CoordinationError, NodeId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "node-local".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    pub duration_ms: u64,
    pub renew_interval_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            duration_ms: 30_000,
            renew_interval_ms: 10_000,
        }
    }
}

impl LeaseConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_millis(self.renew_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub scan_interval_ms: u64,
    /// Reclamations a task survives; the next one fails it.
    pub max_retries: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 5_000,
            max_retries: 3,
        }
    }
}

impl WatchdogConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoverConfig {
    pub response_timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
    pub idempotency_window_ms: u64,
}

impl Default for HandoverConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 5_000,
            max_attempts: 3,
            backoff_base_ms: 200,
            backoff_multiplier: 2.0,
            idempotency_window_ms: 600_000,
        }
    }
}

impl HandoverConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn idempotency_window(&self) -> Duration {
        Duration::from_millis(self.idempotency_window_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.backoff_base_ms),
            multiplier: self.backoff_multiplier,
        }
    }

    /// Upper bound on how long a full send (every attempt plus backoff) can take.
    pub fn worst_case_send(&self) -> Duration {
        let policy = self.retry_policy();
        let waits: Duration = (1..self.max_attempts).map(|attempt| policy.next_delay(attempt)).sum();
        self.response_timeout() * self.max_attempts + waits
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub granularity: AuditGranularity,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            granularity: AuditGranularity::Standard,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub per_participant: usize,
    /// Pause between polls of an empty participant queue.
    pub idle_poll_ms: u64,
    pub flush_interval_ms: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            per_participant: 2,
            idle_poll_ms: 100,
            flush_interval_ms: 1_000,
        }
    }
}

impl WorkersConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatonConfig {
    pub node: NodeConfig,
    pub lease: LeaseConfig,
    pub watchdog: WatchdogConfig,
    pub handover: HandoverConfig,
    pub audit: AuditConfig,
    pub workers: WorkersConfig,
}

impl BatonConfig {
    /// Layer defaults, an optional file and `BATON__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, CoordinationError> {
        let defaults = serde_json::to_string(&Self::default())?;
        let mut builder =
            config::Config::builder().add_source(config::File::from_str(&defaults, config::FileFormat::Json));

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("BATON")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: Self = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), CoordinationError> {
        if self.lease.duration_ms == 0 {
            return Err(CoordinationError::Config("lease.duration_ms must be positive".into()));
        }
        if self.lease.renew_interval_ms == 0 || self.lease.renew_interval_ms >= self.lease.duration_ms {
            return Err(CoordinationError::Config(
                "lease.renew_interval_ms must be positive and shorter than lease.duration_ms".into(),
            ));
        }
        if self.watchdog.scan_interval_ms == 0 {
            return Err(CoordinationError::Config("watchdog.scan_interval_ms must be positive".into()));
        }
        if self.handover.max_attempts == 0 {
            return Err(CoordinationError::Config("handover.max_attempts must be at least 1".into()));
        }
        if self.handover.response_timeout_ms == 0 {
            return Err(CoordinationError::Config("handover.response_timeout_ms must be positive".into()));
        }
        if self.handover.backoff_multiplier < 1.0 {
            return Err(CoordinationError::Config("handover.backoff_multiplier must be >= 1.0".into()));
        }
        if self.node.node_id.is_empty() {
            return Err(CoordinationError::Config("node.node_id must not be empty".into()));
        }
        Ok(())
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.node.node_id.clone())
    }
}
