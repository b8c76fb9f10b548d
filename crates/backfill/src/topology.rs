use std::time::Duration;

use async_channel as chan;
use async_trait::async_trait;
use futures::future::BoxFuture;
use xdcr_metadata::ReplicationSpec;

use super::Error;

/// Deferred cleanup run by the garbage collector once its delay elapsed.
pub type GcFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), Error>> + Send>;

/// Latest view of the source bucket vbuckets owned by this node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceNotification {
	vbs: Vec<u16>,
}

impl SourceNotification {
	#[must_use]
	pub fn new(mut vbs: Vec<u16>) -> Self {
		vbs.sort_unstable();
		vbs.dedup();
		Self { vbs }
	}

	/// Owned vbuckets, sorted.
	#[must_use]
	pub fn vbs(&self) -> &[u16] {
		&self.vbs
	}

	#[must_use]
	pub fn owns(&self, vb: u16) -> bool {
		self.vbs.binary_search(&vb).is_ok()
	}

	#[must_use]
	pub fn into_vbs(self) -> Vec<u16> {
		self.vbs
	}
}

#[async_trait]
pub trait BucketTopologyService: Send + Sync + 'static {
	async fn subscribe_local_bucket_feed(
		&self,
		spec: &ReplicationSpec,
		subscriber_id: &str,
	) -> Result<chan::Receiver<SourceNotification>, Error>;

	async fn unsubscribe_local_bucket_feed(
		&self,
		spec: &ReplicationSpec,
		subscriber_id: &str,
	) -> Result<(), Error>;

	/// Runs `gc` after `delay` unless `vb` is owned by this node by then.
	///
	/// Registering the same `request_id` for the same vbucket again replaces
	/// the pending cleanup.
	async fn register_garbage_collect(
		&self,
		spec_id: &str,
		vb: u16,
		request_id: &str,
		gc: GcFn,
		delay: Duration,
	) -> Result<(), Error>;
}

/// Splits the change between two sorted vbucket lists into (added, removed).
pub(crate) fn diff_vbs(old: &[u16], new: &[u16]) -> (Vec<u16>, Vec<u16>) {
	let added = new
		.iter()
		.filter(|vb| old.binary_search(vb).is_err())
		.copied()
		.collect();
	let removed = old
		.iter()
		.filter(|vb| new.binary_search(vb).is_err())
		.copied()
		.collect();

	(added, removed)
}
