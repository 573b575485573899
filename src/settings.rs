//! Bridge Settings
//!
//! [`BridgeSettings`] is handed to [`Bridge::load`](crate::bridge::Bridge::load)
//! once, before any host call is accepted. It controls the acquisition
//! timeout, the size of the dedicated acquisition worker pool, the options
//! forwarded to the native adapter request, and the optional cap on live
//! resource wrappers.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use exdawn::settings::BridgeSettings;
//!
//! let settings = BridgeSettings::default()
//!     .with_request_timeout(Duration::from_millis(500))
//!     .with_max_live_handles(1024);
//! ```

use std::time::Duration;

/// Power preference forwarded to the native adapter request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerPreference {
    /// Let the native API decide.
    None,
    /// Prefer an integrated or otherwise low-power adapter.
    LowPower,
    /// Prefer a discrete or otherwise high-performance adapter.
    #[default]
    HighPerformance,
}

/// Options forwarded verbatim to the native "request adapter" primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdapterOptions {
    pub power_preference: PowerPreference,
    pub force_fallback_adapter: bool,
}

/// Configuration for a loaded bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    /// Upper bound for a single adapter or device acquisition.
    pub request_timeout: Duration,
    /// Number of permanent worker threads that run blocking acquisitions.
    pub dirty_workers: usize,
    /// Cap on worker threads, permanent plus overflow, when every worker is busy.
    pub max_dirty_workers: usize,
    /// Options forwarded to the native adapter request.
    pub adapter_options: AdapterOptions,
    /// Cap on simultaneously live wrappers. `None` means unbounded.
    pub max_live_handles: Option<usize>,
    /// Prefix for debug labels attached to native devices and buffers.
    pub label_prefix: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            dirty_workers: 2,
            max_dirty_workers: 64,
            adapter_options: AdapterOptions::default(),
            max_live_handles: None,
            label_prefix: "exdawn".to_string(),
        }
    }
}

impl BridgeSettings {
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Values below one are clamped to one worker.
    #[must_use]
    pub fn with_dirty_workers(mut self, workers: usize) -> Self {
        self.dirty_workers = workers.max(1);
        self
    }

    /// Values below `dirty_workers` are raised to it when the pool starts.
    #[must_use]
    pub fn with_max_dirty_workers(mut self, workers: usize) -> Self {
        self.max_dirty_workers = workers;
        self
    }

    #[must_use]
    pub fn with_adapter_options(mut self, options: AdapterOptions) -> Self {
        self.adapter_options = options;
        self
    }

    #[must_use]
    pub fn with_max_live_handles(mut self, limit: usize) -> Self {
        self.max_live_handles = Some(limit);
        self
    }

    #[must_use]
    pub fn with_label_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.label_prefix = prefix.into();
        self
    }

    /// Builds a debug label such as `exdawn.buffer`.
    #[must_use]
    pub fn label(&self, kind: &str) -> String {
        format!("{}.{kind}", self.label_prefix)
    }
}
