use std::cmp::Ordering;

use xdcr_metadata::CollectionNamespaceMappingsDiffPair;

/// A diff pair that could not be handed to a request handler and is retried
/// in the background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillRetryRequest {
	pub replication_id: String,
	pub diff_pair: CollectionNamespaceMappingsDiffPair,
	pub force: bool,
	/// Source manifest the diff pair was computed against
	pub source_manifest_id: u64,
}

impl BackfillRetryRequest {
	/// Same replication and the same change to apply.
	pub(crate) fn same_change(&self, other: &Self) -> bool {
		self.replication_id == other.replication_id
			&& self.force == other.force
			&& self.diff_pair == other.diff_pair
	}
}

/// Retry order: grouped by replication, newest source manifest first.
pub(crate) fn retry_order(a: &BackfillRetryRequest, b: &BackfillRetryRequest) -> Ordering {
	a.replication_id
		.cmp(&b.replication_id)
		.then_with(|| b.source_manifest_id.cmp(&a.source_manifest_id))
}
