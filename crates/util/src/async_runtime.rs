//! Async runtime helpers for blocking callers.
//!
//! The deployment executor is synchronous; actions that spawn child processes
//! use these helpers to drive Tokio futures to completion from that code.

use std::{future::Future, time::Duration};

use anyhow::anyhow;
use tokio::{runtime::Handle, task};

/// Execute an async future from synchronous code.
///
/// Reuses the current runtime when available and falls back to a
/// single-threaded runtime for call sites outside Tokio.
pub fn block_on_future<F, T>(future: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    if let Ok(handle) = Handle::try_current() {
        task::block_in_place(|| handle.block_on(future))
    } else {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| anyhow!(error))?
            .block_on(future)
    }
}

/// Await `future`, failing with a descriptive error once `limit` elapses.
///
/// Dropping the timed-out future cancels it; callers that own child processes
/// should spawn them with `kill_on_drop` so the process does not outlive the call.
pub async fn run_with_timeout<F, T>(future: F, limit: Duration, what: &str) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("{} timed out after {}s", what, limit.as_secs())),
    }
}
