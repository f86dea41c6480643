//! Unified error handling for offloadforge
//!
//! This module provides a centralized error type for every fallible operation
//! in the crate. Errors are categorized as:
//! - User errors (bad geometry, duplicate accessors, bad configuration)
//! - Device errors (no suitable device, missing aspects, asynchronous faults)
//! - Lifecycle errors (released buffers, queue shutdown)
//! - Internal errors (bugs, poisoned locks)
//!
//! Synchronous errors are returned from the offending call. Asynchronous
//! faults are never returned from `submit`; they are queued on the owning
//! queue and handed out by `Queue::drain_async_errors`.

use std::fmt;

use crate::kernel::TaskId;

/// Unified error type for offloadforge
#[derive(Debug, Clone, thiserror::Error)]
pub enum OffloadError {
    // ========== Device Errors ==========
    /// The selector rejected every candidate device
    #[error("No suitable device: {0}")]
    NoSuitableDevice(String),

    /// The selected device lacks a capability the operation needs
    #[error("Device '{device}' does not support {aspect}")]
    UnsupportedAspect { device: String, aspect: String },

    /// Fault reported after dispatch, drained through the async channel
    #[error("Asynchronous device fault in task {task} ({label}): {message}")]
    AsynchronousDeviceFault {
        task: TaskId,
        label: String,
        message: String,
    },

    // ========== User Errors ==========
    /// Bad buffer or access geometry
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// More than one access request for the same buffer in one task
    #[error("Duplicate access request for buffer {0} in a single task")]
    DuplicateAccess(u64),

    /// Invalid queue configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ========== Lifecycle Errors ==========
    /// Use of a buffer or device allocation that has been released
    #[error("Dangling buffer reference: buffer {0} has been released")]
    DanglingBufferReference(u64),

    /// Submission after the queue began shutting down
    #[error("Queue shutdown in progress")]
    ShutdownInProgress,

    // ========== Internal Errors ==========
    /// Internal error (indicates a bug)
    #[error("Internal error: {0}")]
    InternalError(String),

    /// Lock poisoned (a worker panicked while holding queue state)
    #[error("Internal lock poisoned: {0}")]
    LockPoisoned(String),
}

impl OffloadError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            OffloadError::InvalidRange(_)
            | OffloadError::DuplicateAccess(_)
            | OffloadError::InvalidConfiguration(_) => ErrorCategory::User,

            OffloadError::NoSuitableDevice(_)
            | OffloadError::UnsupportedAspect { .. }
            | OffloadError::AsynchronousDeviceFault { .. } => ErrorCategory::Device,

            OffloadError::DanglingBufferReference(_) | OffloadError::ShutdownInProgress => {
                ErrorCategory::Lifecycle
            }

            OffloadError::InternalError(_) | OffloadError::LockPoisoned(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// Check if this is a user-facing error (fix the call, not the system)
    pub fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User)
    }

    /// Check if this is an internal error (indicates a bug)
    pub fn is_internal_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }

    /// Check if this error was delivered through the asynchronous channel
    pub fn is_async(&self) -> bool {
        matches!(self, OffloadError::AsynchronousDeviceFault { .. })
    }

    /// Task that raised an asynchronous fault, if any
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            OffloadError::AsynchronousDeviceFault { task, .. } => Some(*task),
            _ => None,
        }
    }
}

/// Error category for handling decisions
///
/// - User: invalid input, the caller should fix the request
/// - Device: the device (or device selection) failed
/// - Lifecycle: an object was used outside its lifetime
/// - Internal: log and report as bug
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    User,
    Device,
    Lifecycle,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "User"),
            ErrorCategory::Device => write!(f, "Device"),
            ErrorCategory::Lifecycle => write!(f, "Lifecycle"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for OffloadError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        OffloadError::LockPoisoned(err.to_string())
    }
}

/// Result alias using [`OffloadError`]
pub type OffloadResult<T> = std::result::Result<T, OffloadError>;

/// Create an invalid-range error with context
///
/// # Examples
/// ```ignore
/// return Err(range_error!("offset {} past end {}", offset, len));
/// ```
#[macro_export]
macro_rules! range_error {
    ($msg:expr) => {
        $crate::error::OffloadError::InvalidRange($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::OffloadError::InvalidRange(format!($fmt, $($arg)*))
    };
}

/// Create an internal error with context
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::error::OffloadError::InternalError($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::OffloadError::InternalError(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            OffloadError::InvalidRange("x".to_string()).category(),
            ErrorCategory::User
        );
        assert_eq!(OffloadError::DuplicateAccess(3).category(), ErrorCategory::User);
        assert_eq!(
            OffloadError::NoSuitableDevice("none".to_string()).category(),
            ErrorCategory::Device
        );
        assert_eq!(
            OffloadError::DanglingBufferReference(1).category(),
            ErrorCategory::Lifecycle
        );
        assert_eq!(
            OffloadError::ShutdownInProgress.category(),
            ErrorCategory::Lifecycle
        );
        assert_eq!(
            OffloadError::LockPoisoned("x".to_string()).category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_async_fault_helpers() {
        let err = OffloadError::AsynchronousDeviceFault {
            task: TaskId(7),
            label: "vector_add".to_string(),
            message: "index out of bounds".to_string(),
        };
        assert!(err.is_async());
        assert_eq!(err.task_id(), Some(TaskId(7)));
        assert_eq!(err.category(), ErrorCategory::Device);
        assert!(err.to_string().contains("vector_add"));

        assert!(!OffloadError::ShutdownInProgress.is_async());
        assert_eq!(OffloadError::ShutdownInProgress.task_id(), None);
    }

    #[test]
    fn test_error_display() {
        let err = OffloadError::DanglingBufferReference(12);
        assert_eq!(
            err.to_string(),
            "Dangling buffer reference: buffer 12 has been released"
        );

        let err = OffloadError::UnsupportedAspect {
            device: "host".to_string(),
            aspect: "usm_device_allocations".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Device 'host' does not support usm_device_allocations"
        );
    }

    #[test]
    fn test_macros() {
        let err = range_error!("offset {} past end {}", 10, 4);
        assert_eq!(err.to_string(), "Invalid range: offset 10 past end 4");
        assert!(err.is_user_error());

        let err = internal_error!("missing task record");
        assert!(err.is_internal_error());
    }

    #[test]
    fn test_poison_error_conversion() {
        use std::sync::{Arc, Mutex};

        let lock = Arc::new(Mutex::new(0));
        let poisoner = Arc::clone(&lock);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        let err: OffloadError = lock.lock().unwrap_err().into();
        assert!(matches!(err, OffloadError::LockPoisoned(_)));
    }

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::User.to_string(), "User");
        assert_eq!(ErrorCategory::Device.to_string(), "Device");
        assert_eq!(ErrorCategory::Lifecycle.to_string(), "Lifecycle");
        assert_eq!(ErrorCategory::Internal.to_string(), "Internal");
    }
}
