//! Cancellation and deadline context attached to a request.
//!
//! A [`Context`] is a cheap, cloneable handle. Derived contexts inherit the cancellation and
//! deadline of their parent, so cancelling a parent stops every exchange running under any of
//! its children.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::CancelReason;

#[derive(Debug)]
struct ContextNode {
    parent: Option<Arc<ContextNode>>,
    cancelled: AtomicBool,
    deadline: Option<Instant>,
}

impl ContextNode {
    fn cancel_reason(&self, now: Instant) -> Option<CancelReason> {
        let mut node = Some(self);
        let mut reason = None;
        while let Some(current) = node {
            if current.cancelled.load(Ordering::Acquire) {
                return Some(CancelReason::Cancelled);
            }
            if current.deadline.is_some_and(|deadline| now >= deadline) {
                reason = Some(CancelReason::DeadlineExceeded);
            }
            node = current.parent.as_deref();
        }
        reason
    }
}

#[derive(Clone, Debug, Default)]
pub struct Context {
    node: Option<Arc<ContextNode>>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derives a context that is cancelled when the returned handle is triggered.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let node = Arc::new(ContextNode {
            parent: self.node.clone(),
            cancelled: AtomicBool::new(false),
            deadline: None,
        });
        let handle = CancelHandle {
            node: Arc::clone(&node),
        };
        (Self { node: Some(node) }, handle)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            node: Some(Arc::new(ContextNode {
                parent: self.node.clone(),
                cancelled: AtomicBool::new(false),
                deadline: Some(deadline),
            })),
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// The earliest deadline along the parent chain.
    pub fn deadline(&self) -> Option<Instant> {
        let mut node = self.node.as_deref();
        let mut earliest: Option<Instant> = None;
        while let Some(current) = node {
            if let Some(deadline) = current.deadline {
                earliest = Some(earliest.map_or(deadline, |value| value.min(deadline)));
            }
            node = current.parent.as_deref();
        }
        earliest
    }

    /// Why this context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<CancelReason> {
        self.node
            .as_deref()
            .and_then(|node| node.cancel_reason(Instant::now()))
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Whether this context can ever become done.
    pub fn is_background(&self) -> bool {
        self.node.is_none()
    }
}

/// Cancels the [`Context`] it was created with. Dropping the handle does not cancel.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    node: Arc<ContextNode>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.node.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.node.cancelled.load(Ordering::Acquire)
    }
}
