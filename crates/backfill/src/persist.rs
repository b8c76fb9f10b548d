use std::{fmt, time::Duration};

use tokio::time::Instant;
use tracing::trace;

use super::{request::Responder, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistType {
	Add,
	Set,
	Del,
}

impl fmt::Display for PersistType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Add => f.write_str("Add"),
			Self::Set => f.write_str("Set"),
			Self::Del => f.write_str("Del"),
		}
	}
}

/// Coalesces `Add` and `Set` writes of a backfill spec.
///
/// Any number of requests between two flushes produce a single write, and the
/// result of that write is answered to every request that asked for it. After
/// a flush, the next one waits for the cooldown interval to elapse.
#[derive(Debug)]
pub(crate) struct PersistBatcher {
	needed: Option<PersistType>,
	queued: Vec<Responder>,
	flush_requested: bool,
	cooldown_until: Option<Instant>,
	interval: Duration,
}

impl PersistBatcher {
	pub(crate) const fn new(interval: Duration) -> Self {
		Self {
			needed: None,
			queued: Vec::new(),
			flush_requested: false,
			cooldown_until: None,
			interval,
		}
	}

	/// Marks the spec dirty and queues the caller for the next flush.
	///
	/// A pending `Add` is never downgraded to a `Set`.
	pub(crate) fn queue(&mut self, op: PersistType, responder: Responder) {
		debug_assert_ne!(op, PersistType::Del, "deletions are never batched");

		self.needed = match (self.needed, op) {
			(Some(PersistType::Add), _) | (_, PersistType::Add) => Some(PersistType::Add),
			_ => Some(PersistType::Set),
		};
		self.queued.push(responder);
	}

	/// A synchronous delete supersedes every pending write, the queued callers
	/// are answered as if their write succeeded.
	pub(crate) fn supersede_with_delete(&mut self) {
		self.needed = None;
		self.flush_requested = false;

		for responder in self.queued.drain(..) {
			if responder.send(Ok(())).is_err() {
				trace!("Persistence waiter went away before the delete superseded it;");
			}
		}
	}

	pub(crate) fn request_flush(&mut self) {
		self.flush_requested = true;
	}

	pub(crate) fn cancel_flush(&mut self) {
		self.flush_requested = false;
	}

	/// When the loop should flush, `None` if nothing asked for it.
	pub(crate) fn flush_deadline(&self) -> Option<Instant> {
		self.flush_requested.then(|| {
			let now = Instant::now();
			self.cooldown_until.map_or(now, |cooldown| cooldown.max(now))
		})
	}

	pub(crate) fn take_pending(&mut self) -> Option<PersistType> {
		self.flush_requested = false;
		self.needed.take()
	}

	/// Fans the flush result out to every queued caller and starts the cooldown.
	pub(crate) fn finish_flush(&mut self, result: &Result<(), Error>) {
		self.cooldown_until = Some(Instant::now() + self.interval);

		for responder in self.queued.drain(..) {
			if responder.send(result.clone()).is_err() {
				trace!("Persistence waiter went away before the flush finished;");
			}
		}
	}

	#[cfg(test)]
	pub(crate) fn queued_len(&self) -> usize {
		self.queued.len()
	}
}
