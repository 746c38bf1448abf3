//! Waiters — pending, cancellable capacity requests.
//!
//! The caller keeps the receiving half of a oneshot channel and the grower
//! owns the [`Waiter`]. A caller that stops waiting drops its receiver,
//! which is how the grower learns the waiter was cancelled.

use tokio::sync::oneshot;

use fleet_core::Requirements;

#[derive(Debug)]
pub(crate) struct Waiter {
    pub req: Requirements,
    notify: oneshot::Sender<()>,
}

impl Waiter {
    pub fn new(req: Requirements) -> (Self, oneshot::Receiver<()>) {
        let (notify, signal) = oneshot::channel();
        (Self { req, notify }, signal)
    }

    /// The caller is no longer waiting.
    pub fn is_cancelled(&self) -> bool {
        self.notify.is_closed()
    }

    /// Wake the caller. Returns false if it already stopped waiting.
    pub fn signal(self) -> bool {
        self.notify.send(()).is_ok()
    }
}
