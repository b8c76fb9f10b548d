use std::{
	future::{Future, IntoFuture},
	pin::Pin,
	task::{Context, Poll},
	time::Duration,
};

use async_channel as chan;
use tokio::{task::JoinHandle, time::timeout};
use tracing::error;

const ONE_MINUTE: Duration = Duration::from_secs(60);

/// Shutdown signal shared by every task of a component.
///
/// Nothing is ever sent on the channel: closing the sender side wakes every
/// clone of the receiver at once.
#[derive(Debug, Clone)]
pub struct Stopper(chan::Receiver<()>);

impl Stopper {
	#[must_use]
	pub fn new() -> (chan::Sender<()>, Self) {
		let (tx, rx) = chan::bounded(1);
		(tx, Self(rx))
	}

	#[must_use]
	pub fn is_stopped(&self) -> bool {
		self.0.is_closed()
	}
}

pin_project_lite::pin_project! {
	pub struct StopFuture<'recv> {
		#[pin]
		fut: chan::Recv<'recv, ()>,
	}
}

impl Future for StopFuture<'_> {
	type Output = ();

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match self.project().fut.poll(cx) {
			Poll::Ready(_) => Poll::Ready(()),
			Poll::Pending => Poll::Pending,
		}
	}
}

impl<'recv> IntoFuture for &'recv Stopper {
	type Output = ();
	type IntoFuture = StopFuture<'recv>;

	fn into_future(self) -> Self::IntoFuture {
		Self::IntoFuture { fut: self.0.recv() }
	}
}

/// Waits for a stopped task to wind down, aborting it if it takes too long.
pub async fn wait_stop_or_abort(maybe_handle: Option<JoinHandle<()>>) {
	if let Some(handle) = maybe_handle {
		let abort_handle = handle.abort_handle();

		match timeout(ONE_MINUTE, handle).await {
			Ok(Ok(())) => {}
			Ok(Err(e)) => {
				if e.is_panic() {
					error!(?e, "Task panicked while stopping;");
				}
			}
			Err(_) => {
				error!("Task failed to gracefully stop in the allotted time, will force abortion;");
				abort_handle.abort();
			}
		}
	}
}
