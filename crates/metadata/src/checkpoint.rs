use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
	pub seqno: u64,
	pub failover_uuid: u64,
	pub dcp_snapshot_seqno: u64,
	pub dcp_snapshot_end_seqno: u64,
	pub target_seqno: u64,
	pub source_manifest_for_dcp: u64,
	pub source_manifest_for_backfill_mgr: u64,
	pub target_manifest: u64,
	pub creation_time: DateTime<Utc>,
}

/// Checkpoints of one vbucket, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointsDoc {
	pub checkpoint_records: Vec<CheckpointRecord>,
	pub spec_internal_id: String,
}

impl CheckpointsDoc {
	#[must_use]
	pub fn latest(&self) -> Option<&CheckpointRecord> {
		self.checkpoint_records.first()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.checkpoint_records.is_empty()
	}
}
