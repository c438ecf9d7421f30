//! Cooperative cancellation tokens.
//!
//! A [`CancelToken`] is handed to every session operation. Backends observe it
//! either by polling [`CancelToken::is_cancelled`] between steps or by racing
//! their I/O against [`CancelToken::cancelled`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
	cancelled: AtomicBool,
	notify: Notify,
}

/// Cloneable cancellation signal shared between a connection and the
/// operation it is running.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
	inner: Arc<Inner>,
}

impl CancelToken {
	pub fn new() -> Self {
		Self::default()
	}

	/// Signals cancellation. Idempotent.
	pub fn cancel(&self) {
		if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
			self.inner.notify.notify_waiters();
		}
	}

	pub fn is_cancelled(&self) -> bool {
		self.inner.cancelled.load(Ordering::SeqCst)
	}

	/// Resolves once [`cancel`](Self::cancel) has been called.
	///
	/// Registers the waiter before checking the flag to prevent lost wakeups.
	pub async fn cancelled(&self) {
		loop {
			let notified = self.inner.notify.notified();
			tokio::pin!(notified);
			notified.as_mut().enable();
			if self.is_cancelled() {
				return;
			}
			notified.await;
		}
	}
}
