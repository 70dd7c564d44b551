//! Scoped ownership of a sandbox handle.

use nm_types::NmResult;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::collaborators::{ExecutionSandbox, SandboxHandle, SandboxSpec};

/// A created sandbox that must be cleaned up exactly once.
///
/// Normal exits call [`SandboxLease::release`]. If the lease is dropped
/// without being released (the owning future was cancelled or panicked),
/// cleanup is spawned on the current runtime instead. Either path marks the
/// lease released before any cleanup starts.
pub(crate) struct SandboxLease {
    sandbox: Arc<dyn ExecutionSandbox>,
    handle: SandboxHandle,
    released: bool,
}

impl SandboxLease {
    pub(crate) async fn acquire(sandbox: Arc<dyn ExecutionSandbox>, spec: &SandboxSpec) -> NmResult<Self> {
        let handle = sandbox.create(spec).await?;
        debug!(sandbox = %handle, "sandbox created");
        Ok(Self {
            sandbox,
            handle,
            released: false,
        })
    }

    pub(crate) fn handle(&self) -> &SandboxHandle {
        &self.handle
    }

    pub(crate) fn sandbox(&self) -> &Arc<dyn ExecutionSandbox> {
        &self.sandbox
    }

    /// Clean up now. Failures are logged, never returned.
    ///
    /// Cleanup runs as its own task, so it completes even if the caller is
    /// dropped while waiting for it.
    pub(crate) async fn release(mut self) {
        self.released = true;
        let cleanup = tokio::spawn(cleanup(Arc::clone(&self.sandbox), self.handle.clone()));
        if let Err(e) = cleanup.await {
            warn!(sandbox = %self.handle, error = %e, "sandbox cleanup task aborted");
        }
    }
}

async fn cleanup(sandbox: Arc<dyn ExecutionSandbox>, handle: SandboxHandle) {
    match sandbox.cleanup(&handle).await {
        Ok(()) => debug!(sandbox = %handle, "sandbox cleaned up"),
        Err(e) => warn!(sandbox = %handle, error = %e, "sandbox cleanup failed"),
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match Handle::try_current() {
            Ok(runtime) => {
                debug!(sandbox = %self.handle, "cycle interrupted, scheduling sandbox cleanup");
                runtime.spawn(cleanup(Arc::clone(&self.sandbox), self.handle.clone()));
            }
            Err(_) => {
                warn!(sandbox = %self.handle, "no runtime available, sandbox left behind");
            }
        }
    }
}
