use serde::{Deserialize, Serialize};

use super::{ReplicationPayload, RequestCommon, ResponseCommon};

/// State of one replication pushed by a vbucket master to its peers, for
/// both the main and the backfill pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VbPeriodicReplicateReq {
	pub main_replication: ReplicationPayload,
	pub backfill_replication: ReplicationPayload,
}

impl VbPeriodicReplicateReq {
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.main_replication.is_empty() && self.backfill_replication.is_empty()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerVbPeriodicPushReq {
	#[serde(flatten)]
	pub common: RequestCommon,
	#[serde(default)]
	pub push_reqs: Vec<VbPeriodicReplicateReq>,
}

impl PeerVbPeriodicPushReq {
	#[must_use]
	pub fn same_as(&self, other: &Self) -> bool {
		self.common.same_as(&other.common) && self.push_reqs == other.push_reqs
	}

	#[must_use]
	pub fn generate_response(&self) -> PeerVbPeriodicPushResp {
		PeerVbPeriodicPushResp {
			common: self.common.generate_response_common(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerVbPeriodicPushResp {
	#[serde(flatten)]
	pub common: ResponseCommon,
}
