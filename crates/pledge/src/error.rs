//! Error types.
//!
//! Construction and usage errors are returned or raised to the caller.
//! Asynchronous failures travel through promise chains as [`Rejection`] data.

use std::backtrace::Backtrace;
use std::fmt;
use std::sync::Arc;

use crate::config::CheckMode;

/// Failure while populating a pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("pool factory failed to construct an instance")]
    Construction {
        #[source]
        source: anyhow::Error,
    },
}

/// Invalid use of the API, detected at runtime.
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("invalid argument: {message}\n{call_path}")]
    InvalidArgument {
        message: String,
        /// Rendered backtrace captured where the misuse was detected.
        call_path: String,
    },

    #[error("assertion failed: {message}\n{call_path}")]
    AssertionFailure {
        message: String,
        call_path: String,
    },
}

impl UsageError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
            call_path: Backtrace::force_capture().to_string(),
        }
    }

    pub fn assertion(message: impl Into<String>) -> Self {
        Self::AssertionFailure {
            message: message.into(),
            call_path: Backtrace::force_capture().to_string(),
        }
    }

    /// Call path captured when the error was built.
    pub fn call_path(&self) -> &str {
        match self {
            Self::InvalidArgument { call_path, .. } | Self::AssertionFailure { call_path, .. } => {
                call_path
            }
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::InvalidArgument { message, .. } | Self::AssertionFailure { message, .. } => {
                message
            }
        }
    }

    /// Apply the check mode: panic in `Fatal`, log and carry on in `Silent`.
    pub(crate) fn raise(self, mode: CheckMode) {
        match mode {
            CheckMode::Fatal => {
                tracing::error!(error = %self.message(), "usage error");
                panic!("{self}");
            }
            CheckMode::Silent => {
                tracing::debug!(error = %self.message(), "usage error ignored");
            }
        }
    }
}

/// Failures of the timer helpers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimerError {
    #[error("no tokio runtime is available to drive the timer")]
    NoRuntime,

    #[error("timed out after {0:?}")]
    TimedOut(std::time::Duration),
}

/// The error half of a settled promise. Clones share the same error.
#[derive(Clone)]
pub struct Rejection(Arc<anyhow::Error>);

impl Rejection {
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Arc::new(anyhow::Error::new(error)))
    }

    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self(Arc::new(anyhow::Error::msg(message)))
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }

    pub fn as_error(&self) -> &anyhow::Error {
        &self.0
    }
}

impl From<anyhow::Error> for Rejection {
    fn from(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl fmt::Debug for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Rejection").field(&format_args!("{}", self.0)).finish()
    }
}
