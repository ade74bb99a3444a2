use std::time::Duration;
use tracing::debug;

use super::child::ChildHandle;
use super::error::TeardownFailure;

/// Entry-ordered registry of live handles, released in reverse.
///
/// Only handles that reached `Running` are pushed. Names are unique because
/// the config they come from rejects duplicates.
#[derive(Debug, Default)]
pub struct ReleaseStack {
    handles: Vec<ChildHandle>,
}

/// Outcome of unwinding a [`ReleaseStack`].
#[derive(Debug, Default, Clone)]
pub struct TeardownReport {
    /// Names in the order they were released.
    pub released: Vec<String>,
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl ReleaseStack {
    pub fn push(&mut self, handle: ChildHandle) {
        self.handles.push(handle);
    }

    pub fn get(&self, name: &str) -> Option<&ChildHandle> {
        self.handles.iter().find(|h| h.name() == name)
    }

    /// Handles in entry order.
    pub fn iter(&self) -> impl Iterator<Item = &ChildHandle> {
        self.handles.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.handles.iter().map(|h| h.name().to_string()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Shut down every handle, last entered first.
    ///
    /// Every handle is visited even when earlier ones fail. The stack is empty
    /// afterwards, so a second unwind releases nothing.
    pub async fn unwind(&mut self, grace: Duration) -> TeardownReport {
        let mut report = TeardownReport::default();
        while let Some(mut handle) = self.handles.pop() {
            debug!(server = %handle.name(), "Releasing MCP server");
            if let Some(failure) = handle.shutdown(grace).await {
                report.failures.push(failure);
            }
            report.released.push(handle.name().to_string());
        }
        report
    }

    /// Synchronous last-resort release, last entered first.
    pub(crate) fn abort_all(&mut self) {
        while let Some(mut handle) = self.handles.pop() {
            handle.abort();
        }
    }
}
