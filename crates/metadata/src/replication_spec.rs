use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use super::VbTasksMap;

const BACKFILL_TOPIC_PREFIX: &str = "backfill_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineType {
	Main,
	Backfill,
}

impl fmt::Display for PipelineType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Main => f.write_str("Main"),
			Self::Backfill => f.write_str("Backfill"),
		}
	}
}

/// Topic used for checkpoints and pipeline naming.
#[must_use]
pub fn compose_full_topic(replication_id: &str, pipeline_type: PipelineType) -> String {
	match pipeline_type {
		PipelineType::Main => replication_id.to_string(),
		PipelineType::Backfill => format!("{BACKFILL_TOPIC_PREFIX}{replication_id}"),
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationSpec {
	pub id: String,
	/// Changes every time a replication with the same id is re-created.
	pub internal_id: String,
	pub source_bucket_name: String,
	pub target_bucket_name: String,
	pub target_cluster_uuid: String,
}

/// Durable backfill state of one replication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillReplicationSpec {
	pub id: String,
	pub internal_id: String,
	pub vb_tasks_map: VbTasksMap,
	#[serde(skip)]
	pub replication_spec: Option<Arc<ReplicationSpec>>,
}

impl BackfillReplicationSpec {
	#[must_use]
	pub fn new(
		id: impl Into<String>,
		internal_id: impl Into<String>,
		vb_tasks_map: VbTasksMap,
		replication_spec: Option<Arc<ReplicationSpec>>,
	) -> Self {
		Self {
			id: id.into(),
			internal_id: internal_id.into(),
			vb_tasks_map,
			replication_spec,
		}
	}

	#[must_use]
	pub fn contains(&self, vb_tasks_map: &VbTasksMap) -> bool {
		self.vb_tasks_map.contains(vb_tasks_map)
	}

	pub fn merge_new_tasks(&mut self, vb_tasks_map: &VbTasksMap, skip_first: bool) {
		self.vb_tasks_map.merge(vb_tasks_map, skip_first);
	}

	#[must_use]
	pub fn source_bucket_name(&self) -> Option<&str> {
		self.replication_spec
			.as_deref()
			.map(|spec| spec.source_bucket_name.as_str())
	}
}
