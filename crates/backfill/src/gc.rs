use std::{
	collections::{HashMap, HashSet},
	future::IntoFuture,
	time::Duration,
};

use tokio::{
	sync::Mutex,
	time::{interval, Instant, MissedTickBehavior},
};
use tracing::{debug, instrument, warn};

use super::{Error, GcFn, SourceNotification, Stopper};

struct GcEntry {
	fire_at: Instant,
	registered_at: Instant,
	gc: GcFn,
}

#[derive(Default)]
struct Registry {
	/// spec id -> vb -> request id -> pending cleanup
	specs: HashMap<String, HashMap<u16, HashMap<String, GcEntry>>>,
	running: HashSet<String>,
}

/// Delayed, ownership aware cleanup of per-vbucket state.
///
/// Cleanups only fire for vbuckets this node does not own at scan time. A
/// vbucket that came back keeps its pending cleanups until they are older than
/// the prune window, so a short ownership flap does not lose them.
pub struct GcScheduler {
	registry: Mutex<Registry>,
	prune_window: Duration,
}

impl GcScheduler {
	#[must_use]
	pub fn new(prune_window: Duration) -> Self {
		Self {
			registry: Mutex::default(),
			prune_window,
		}
	}

	pub async fn register(
		&self,
		spec_id: &str,
		vb: u16,
		request_id: &str,
		gc: GcFn,
		delay: Duration,
	) -> Result<(), Error> {
		let mut registry = self.registry.lock().await;
		if registry.running.contains(spec_id) {
			return Err(Error::UndergoingGc(spec_id.to_string()));
		}

		let now = Instant::now();
		registry
			.specs
			.entry(spec_id.to_string())
			.or_default()
			.entry(vb)
			.or_default()
			.insert(
				request_id.to_string(),
				GcEntry {
					fire_at: now + delay,
					registered_at: now,
					gc,
				},
			);

		Ok(())
	}

	pub async fn remove_spec(&self, spec_id: &str) {
		self.registry.lock().await.specs.remove(spec_id);
	}

	/// Number of cleanups waiting for `spec_id`.
	pub async fn pending(&self, spec_id: &str) -> usize {
		self.registry
			.lock()
			.await
			.specs
			.get(spec_id)
			.map_or(0, |vbs| vbs.values().map(HashMap::len).sum())
	}

	/// Fires every due cleanup of `spec_id` for vbuckets not in `owned`,
	/// returning how many were fired.
	#[instrument(skip(self, owned))]
	pub async fn run_once(&self, spec_id: &str, owned: &SourceNotification) -> usize {
		let due = {
			let mut registry = self.registry.lock().await;
			let Some(vbs) = registry.specs.get_mut(spec_id) else {
				return 0;
			};

			let now = Instant::now();
			let prune_window = self.prune_window;
			let mut due = Vec::new();

			vbs.retain(|&vb, requests| {
				if owned.owns(vb) {
					requests.retain(|_, entry| now.duration_since(entry.registered_at) < prune_window);
				} else {
					let ready = requests
						.iter()
						.filter(|(_, entry)| entry.fire_at <= now)
						.map(|(request_id, _)| request_id.clone())
						.collect::<Vec<_>>();

					due.extend(ready.into_iter().filter_map(|request_id| {
						requests
							.remove(&request_id)
							.map(|entry| (vb, request_id, entry.gc))
					}));
				}

				!requests.is_empty()
			});

			if vbs.is_empty() {
				registry.specs.remove(spec_id);
			}

			if due.is_empty() {
				return 0;
			}

			registry.running.insert(spec_id.to_string());
			due
		};

		let fired = due.len();
		for (vb, request_id, gc) in due {
			debug!(vb, %request_id, "Running garbage collection;");
			if let Err(e) = gc().await {
				warn!(vb, %request_id, ?e, "Garbage collection failed;");
			}
		}

		self.registry.lock().await.running.remove(spec_id);

		fired
	}

	/// Scans every `scan_interval` until stopped, `owned` yields the current
	/// vbucket ownership of each replication.
	pub async fn run_periodically<F>(&self, scan_interval: Duration, owned: F, stop: &Stopper)
	where
		F: Fn() -> HashMap<String, SourceNotification> + Send + Sync,
	{
		let mut ticker = interval(scan_interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				() = stop.into_future() => break,
				_ = ticker.tick() => {
					for (spec_id, notification) in owned() {
						self.run_once(&spec_id, &notification).await;
					}
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	};

	use futures::FutureExt;
	use pretty_assertions::assert_eq;

	use super::*;

	fn counting_gc(counter: &Arc<AtomicUsize>) -> GcFn {
		let counter = Arc::clone(counter);
		Box::new(move || {
			async move {
				counter.fetch_add(1, Ordering::SeqCst);
				Ok(())
			}
			.boxed()
		})
	}

	#[tokio::test(start_paused = true)]
	async fn fires_only_for_vbs_no_longer_owned() {
		let scheduler = GcScheduler::new(Duration::from_secs(300));
		let fired = Arc::new(AtomicUsize::new(0));

		for vb in [1, 2] {
			scheduler
				.register("spec", vb, "cleanup", counting_gc(&fired), Duration::from_secs(30))
				.await
				.expect("registered");
		}

		let owns_two = SourceNotification::new(vec![2]);
		assert_eq!(scheduler.run_once("spec", &owns_two).await, 0);

		tokio::time::advance(Duration::from_secs(31)).await;

		assert_eq!(scheduler.run_once("spec", &owns_two).await, 1);
		assert_eq!(fired.load(Ordering::SeqCst), 1);
		assert_eq!(scheduler.pending("spec").await, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn reacquired_vbs_are_pruned_after_the_window() {
		let scheduler = GcScheduler::new(Duration::from_secs(60));
		let fired = Arc::new(AtomicUsize::new(0));

		scheduler
			.register("spec", 7, "cleanup", counting_gc(&fired), Duration::from_secs(1))
			.await
			.expect("registered");

		tokio::time::advance(Duration::from_secs(61)).await;
		assert_eq!(
			scheduler
				.run_once("spec", &SourceNotification::new(vec![7]))
				.await,
			0
		);

		assert_eq!(scheduler.pending("spec").await, 0);
		assert_eq!(fired.load(Ordering::SeqCst), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn reregistering_replaces_the_pending_cleanup() {
		let scheduler = GcScheduler::new(Duration::from_secs(300));
		let first = Arc::new(AtomicUsize::new(0));
		let second = Arc::new(AtomicUsize::new(0));

		scheduler
			.register("spec", 3, "node", counting_gc(&first), Duration::ZERO)
			.await
			.expect("registered");
		scheduler
			.register("spec", 3, "node", counting_gc(&second), Duration::ZERO)
			.await
			.expect("registered");

		assert_eq!(scheduler.pending("spec").await, 1);
		scheduler.run_once("spec", &SourceNotification::default()).await;

		assert_eq!(first.load(Ordering::SeqCst), 0);
		assert_eq!(second.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn registering_during_a_scan_is_refused() {
		let scheduler = Arc::new(GcScheduler::new(Duration::from_secs(300)));
		let (entered_tx, entered_rx) = tokio::sync::oneshot::channel::<()>();
		let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

		scheduler
			.register(
				"spec",
				0,
				"slow",
				Box::new(move || {
					async move {
						entered_tx.send(()).ok();
						release_rx.await.ok();
						Ok(())
					}
					.boxed()
				}),
				Duration::ZERO,
			)
			.await
			.expect("registered");

		let scan = tokio::spawn({
			let scheduler = Arc::clone(&scheduler);
			async move {
				scheduler
					.run_once("spec", &SourceNotification::default())
					.await
			}
		});

		entered_rx.await.expect("gc started");
		assert_eq!(
			scheduler
				.register(
					"spec",
					1,
					"other",
					counting_gc(&Arc::new(AtomicUsize::new(0))),
					Duration::ZERO
				)
				.await,
			Err(Error::UndergoingGc("spec".to_string()))
		);

		release_tx.send(()).expect("gc waiting");
		assert_eq!(scan.await.expect("no panic"), 1);
	}
}
