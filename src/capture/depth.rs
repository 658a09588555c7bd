//! Call-depth guard for nested instrumentation
//!
//! Wrapping streams routinely delegate to another instrumented stream. The
//! depth counter belongs to the logical operation (not to a thread), and
//! only the outermost call does the capture work.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Depth counter scoped to one logical operation.
#[derive(Debug, Default)]
pub struct CallDepth {
    depth: AtomicUsize,
}

impl CallDepth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a call. Returns the depth before entering, so `0` marks the
    /// outermost call.
    pub fn enter(&self) -> usize {
        self.depth.fetch_add(1, Ordering::AcqRel)
    }

    /// Leave a call. Returns the depth after leaving; never underflows.
    pub fn exit(&self) -> usize {
        let previous = self
            .depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| Some(d.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    /// Current depth
    pub fn current(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Enter a call for the lifetime of the returned scope.
    pub fn scope(&self) -> DepthScope<'_> {
        let entered_at = self.enter();
        DepthScope {
            depth: self,
            entered_at,
        }
    }
}

/// RAII handle for one level of [`CallDepth`]; leaves on drop.
#[derive(Debug)]
pub struct DepthScope<'a> {
    depth: &'a CallDepth,
    entered_at: usize,
}

impl DepthScope<'_> {
    /// Whether this scope wraps the outermost call
    pub fn is_outermost(&self) -> bool {
        self.entered_at == 0
    }
}

impl Drop for DepthScope<'_> {
    fn drop(&mut self) {
        self.depth.exit();
    }
}
