//! Registry of the operation currently running on a connection, and the
//! hand-off of a proxied operation's outcome back to its caller.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::task::JoinError;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::Error;

struct InFlight {
	id: u64,
	token: CancelToken,
}

/// Holds at most one registered operation.
#[derive(Default)]
pub(super) struct InFlightSlot {
	current: RwLock<Option<InFlight>>,
	next_id: AtomicU64,
}

impl InFlightSlot {
	/// Registers `token` as the in-flight operation until the guard drops.
	pub(super) fn register(&self, token: CancelToken) -> Registration<'_> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		*self.current.write() = Some(InFlight { id, token });
		Registration { slot: self, id }
	}

	/// Fires the registered token, if there is one.
	pub(super) fn cancel(&self) -> bool {
		match self.current.read().as_ref() {
			Some(op) => {
				debug!(target = "rdflink.connection", id = op.id, "cancelling in-flight operation");
				op.token.cancel();
				true
			}
			None => false,
		}
	}

	#[cfg(test)]
	pub(super) fn is_empty(&self) -> bool {
		self.current.read().is_none()
	}
}

/// Clears the slot on drop, on success, error, panic or cancellation alike.
pub(super) struct Registration<'a> {
	slot: &'a InFlightSlot,
	id: u64,
}

impl Drop for Registration<'_> {
	fn drop(&mut self) {
		let mut current = self.slot.current.write();
		if current.as_ref().is_some_and(|op| op.id == self.id) {
			*current = None;
		}
	}
}

/// Outcome of an operation run on a proxy task.
pub(super) enum Delivery<T, E> {
	Value(T),
	Failed(E),
	Panicked(Box<dyn Any + Send + 'static>),
	Lost(String),
}

impl<T, E> From<Result<Result<T, E>, JoinError>> for Delivery<T, E> {
	fn from(joined: Result<Result<T, E>, JoinError>) -> Self {
		match joined {
			Ok(Ok(value)) => Self::Value(value),
			Ok(Err(err)) => Self::Failed(err),
			Err(err) => match err.try_into_panic() {
				Ok(payload) => Self::Panicked(payload),
				Err(err) => Self::Lost(err.to_string()),
			},
		}
	}
}

impl<T, E: From<Error>> Delivery<T, E> {
	/// Surfaces the outcome in the caller: values and errors as-is, panics
	/// resumed, and a task that never completed as [`Error::ProxyFault`].
	pub(super) fn into_result(self) -> Result<T, E> {
		match self {
			Self::Value(value) => Ok(value),
			Self::Failed(err) => Err(err),
			Self::Panicked(payload) => std::panic::resume_unwind(payload),
			Self::Lost(reason) => {
				warn!(target = "rdflink.connection", %reason, "proxy task did not deliver a result");
				Err(Error::ProxyFault(reason).into())
			}
		}
	}
}
