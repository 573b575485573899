//! Error Types
//!
//! This module defines the error types returned across the bridge boundary.
//!
//! # Overview
//!
//! The main error type [`BridgeError`] covers every failure a host caller can
//! observe:
//! - Handle errors (wrong resource kind, stale registry, unresolved native reference)
//! - Input errors (size and usage decoding)
//! - Allocation errors (host-side wrapper capacity exhausted)
//! - Protocol errors (native request failed or timed out)
//! - Write errors (oversized or rejected uploads)
//!
//! Nothing here is fatal to the process except [`BridgeError::Registration`],
//! which can only occur while the bridge is being loaded.
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, BridgeError>`.
//!
//! ```rust,ignore
//! use exdawn::errors::{BridgeError, Result};
//!
//! fn check(len: u64, size: u64) -> Result<()> {
//!     if len > size {
//!         return Err(BridgeError::SizeMismatch { len, size });
//!     }
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use thiserror::Error;

/// The error type for every bridge operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    // ========================================================================
    // Handle Errors
    // ========================================================================
    /// The argument is not a live, resolved instance handle.
    #[error("invalid instance handle")]
    InvalidInstance,

    /// The argument is not a live, resolved adapter handle.
    #[error("invalid adapter handle")]
    InvalidAdapter,

    /// The argument is not a live, resolved device handle.
    #[error("invalid device handle")]
    InvalidDevice,

    /// The argument is not a live, resolved buffer handle.
    #[error("invalid buffer handle")]
    InvalidBuffer,

    /// A handle of one resource kind was passed where another was expected,
    /// outside any call that knows which argument it was.
    #[error("expected a {expected} handle, got a {found} handle")]
    InvalidHandle {
        /// Resource type the caller asked for
        expected: &'static str,
        /// Resource type the handle carries
        found: &'static str,
    },

    // ========================================================================
    // Input Errors
    // ========================================================================
    /// The requested buffer size is not representable as a native size.
    #[error("invalid buffer size")]
    InvalidSize,

    /// A usage token was not recognised.
    #[error("invalid buffer usage: {0}")]
    InvalidUsage(String),

    // ========================================================================
    // Allocation Errors
    // ========================================================================
    /// The host-side wrapper could not be allocated.
    #[error("resource wrapper allocation failed")]
    AllocFailed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// The native API reported that the request could not complete.
    #[error("native request failed: {0}")]
    RequestFailed(String),

    /// The native API did not answer within the configured bound.
    #[error("native request timed out after {0:?}")]
    RequestTimedOut(Duration),

    // ========================================================================
    // Write Errors
    // ========================================================================
    /// The data is larger than the buffer's recorded size.
    #[error("write of {len} bytes exceeds buffer size {size}")]
    SizeMismatch {
        /// Length of the rejected data
        len: u64,
        /// Recorded size of the target buffer
        size: u64,
    },

    /// The native upload primitive rejected the write.
    #[error("buffer write failed: {0}")]
    WriteFailed(String),

    // ========================================================================
    // Load & Boundary Errors
    // ========================================================================
    /// A resource type could not be registered. Fatal at load time.
    #[error("resource type registration failed: {0}")]
    Registration(String),

    /// A host call named a function that is not exported.
    #[error("unknown function {name}/{arity}")]
    UnknownFunction {
        /// Requested function name
        name: String,
        /// Requested arity
        arity: usize,
    },

    /// The bridge has not been loaded, or was loaded twice.
    #[error("bridge load state error: {0}")]
    NotLoaded(String),
}

impl BridgeError {
    /// The stable reason atom reported to the host runtime.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            BridgeError::InvalidInstance => "invalid_instance",
            BridgeError::InvalidAdapter => "invalid_adapter",
            BridgeError::InvalidDevice => "invalid_device",
            BridgeError::InvalidBuffer => "invalid_buffer",
            BridgeError::InvalidHandle { .. } => "invalid_handle",
            BridgeError::InvalidSize => "invalid_size",
            BridgeError::InvalidUsage(_) => "invalid_usage",
            BridgeError::AllocFailed => "alloc_failed",
            BridgeError::RequestFailed(_) => "request_failed",
            BridgeError::RequestTimedOut(_) => "request_timed_out",
            BridgeError::SizeMismatch { .. } => "size_mismatch",
            BridgeError::WriteFailed(_) => "write_failed",
            BridgeError::Registration(_) => "registration_failed",
            BridgeError::UnknownFunction { .. } => "undef",
            BridgeError::NotLoaded(_) => "not_loaded",
        }
    }

    /// Whether the error belongs to the handle class (wrong kind or unresolved).
    #[must_use]
    pub fn is_handle_error(&self) -> bool {
        matches!(
            self,
            BridgeError::InvalidInstance
                | BridgeError::InvalidAdapter
                | BridgeError::InvalidDevice
                | BridgeError::InvalidBuffer
                | BridgeError::InvalidHandle { .. }
        )
    }
}

/// Alias for `Result<T, BridgeError>`.
pub type Result<T> = std::result::Result<T, BridgeError>;
