//! Cancellation propagation for a generation run
//!
//! One controller per run. Every stream and task receives a token derived from
//! it, so a single `cancel()` reaches all in-flight work.

use std::future::Future;

pub use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::CourseError;

/// Owner of the root cancellation signal for one run
#[derive(Debug, Clone, Default)]
pub struct CancellationController {
    root: CancellationToken,
}

impl CancellationController {
    pub fn new() -> Self {
        debug!("CancellationController::new: called");
        Self::default()
    }

    /// Token observing this controller
    pub fn token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Token that fires with this controller but can also be cancelled alone
    pub fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Request cancellation; repeated calls are no-ops
    pub fn cancel(&self) {
        if self.root.is_cancelled() {
            debug!("CancellationController::cancel: already cancelled");
            return;
        }
        info!("cancellation requested");
        self.root.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Fail with [`CourseError::Cancelled`] once cancellation was requested
    pub fn ensure_active(&self) -> Result<(), CourseError> {
        ensure_active(&self.root)
    }
}

/// Fail with [`CourseError::Cancelled`] if `token` has fired
pub fn ensure_active(token: &CancellationToken) -> Result<(), CourseError> {
    if token.is_cancelled() {
        Err(CourseError::Cancelled)
    } else {
        Ok(())
    }
}

/// Drive `fut` unless `token` fires first; dropping `fut` aborts its I/O
pub async fn run_until_cancelled<F: Future>(token: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        output = fut => Some(output),
    }
}
