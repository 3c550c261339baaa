//! Session configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```
//! use altcom_rpc::config::{AltcomConfig, ResultPolicy};
//!
//! let config = AltcomConfig::from_json(r#"{
//!     "request_timeout_ms": 2000,
//!     "result_policy": "lenient",
//!     "pool": { "max_buffers": 16 }
//! }"#).unwrap();
//!
//! assert_eq!(config.result_policy, ResultPolicy::Lenient);
//! assert_eq!(config.pool.max_buffers, 16);
//! assert_eq!(config.max_concurrent_jobs, 32);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::buffer::PoolConfig;
use crate::error::Result;
use crate::gateway::{Timeout, DEFAULT_LATE_WINDOW};
use crate::handler::DEFAULT_MAX_CONCURRENT_JOBS;
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::writer::WriterConfig;

/// How an operation that can only log its failure reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultPolicy {
    /// Every failure is returned to the caller.
    #[default]
    Strict,
    /// Failures after the initialized check are logged and the call
    /// returns `Ok`. Resource ids are stored before the request is sent.
    Lenient,
}

/// Configuration for an [`Altcom`](crate::Altcom) session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AltcomConfig {
    /// Largest payload accepted from the link.
    pub max_payload_size: u16,
    /// Buffer pool limits.
    pub pool: PoolConfig,
    /// Notification jobs allowed to run at once.
    pub max_concurrent_jobs: usize,
    /// Outbound writer settings.
    pub writer: WriterConfig,
    /// Response deadline for calls without an explicit timeout; absent
    /// means wait forever.
    pub request_timeout_ms: Option<u64>,
    /// Failure reporting for lenient-capable operations.
    pub result_policy: ResultPolicy,
    /// Abandoned transaction ids remembered for late-response discard;
    /// zero is treated as one.
    pub late_window: usize,
}

impl Default for AltcomConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            pool: PoolConfig::default(),
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            writer: WriterConfig::default(),
            request_timeout_ms: None,
            result_policy: ResultPolicy::default(),
            late_window: DEFAULT_LATE_WINDOW,
        }
    }
}

impl AltcomConfig {
    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Default deadline for calls.
    pub fn request_timeout(&self) -> Timeout {
        Timeout::from_millis(self.request_timeout_ms)
    }
}
