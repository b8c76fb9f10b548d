use serde::{Deserialize, Serialize};

use super::{OpCode, REQ_MAGIC, RESP_MAGIC};

/// Framing shared by every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCommon {
	pub magic: u32,
	pub req_type: OpCode,
	pub sender: String,
	pub target_addr: String,
	pub opaque: u32,
	/// Lifecycle id of the sending process.
	pub local_lifecycle_id: String,
	/// Lifecycle id the sender last knew the target by.
	pub remote_lifecycle_id: String,
}

impl RequestCommon {
	pub fn new(
		req_type: OpCode,
		sender: impl Into<String>,
		target_addr: impl Into<String>,
		opaque: u32,
	) -> Self {
		Self {
			magic: REQ_MAGIC,
			req_type,
			sender: sender.into(),
			target_addr: target_addr.into(),
			opaque,
			local_lifecycle_id: String::new(),
			remote_lifecycle_id: String::new(),
		}
	}

	#[must_use]
	pub fn with_lifecycle_ids(
		mut self,
		local_lifecycle_id: impl Into<String>,
		remote_lifecycle_id: impl Into<String>,
	) -> Self {
		self.local_lifecycle_id = local_lifecycle_id.into();
		self.remote_lifecycle_id = remote_lifecycle_id.into();
		self
	}

	#[must_use]
	pub fn same_as(&self, other: &Self) -> bool {
		self == other
	}

	/// Response framing; the lifecycle ids swap sides so the requester can tell
	/// whether the response belongs to its current incarnation.
	#[must_use]
	pub fn generate_response_common(&self) -> ResponseCommon {
		ResponseCommon {
			magic: RESP_MAGIC,
			sender: self.target_addr.clone(),
			resp_type: self.req_type,
			opaque: self.opaque,
			local_lifecycle_id: self.remote_lifecycle_id.clone(),
			remote_lifecycle_id: self.local_lifecycle_id.clone(),
			error_string: String::new(),
		}
	}
}

/// Framing shared by every response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseCommon {
	pub magic: u32,
	pub sender: String,
	pub resp_type: OpCode,
	pub opaque: u32,
	pub local_lifecycle_id: String,
	pub remote_lifecycle_id: String,
	#[serde(default)]
	pub error_string: String,
}

impl ResponseCommon {
	#[must_use]
	pub fn same_as(&self, other: &Self) -> bool {
		self == other
	}

	/// True if this response was not meant for the process running with
	/// `my_lifecycle_id`. Empty ids are not yet assigned and always match.
	#[must_use]
	pub fn is_stale_for(&self, my_lifecycle_id: &str) -> bool {
		!self.remote_lifecycle_id.is_empty()
			&& !my_lifecycle_id.is_empty()
			&& self.remote_lifecycle_id != my_lifecycle_id
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn response_swaps_lifecycle_ids() {
		let req = RequestCommon::new(OpCode::Discovery, "node1:8091", "node2:8091", 7)
			.with_lifecycle_ids("mine", "theirs");

		let resp = req.generate_response_common();

		assert_eq!(resp.magic, RESP_MAGIC);
		assert_eq!(resp.sender, "node2:8091");
		assert_eq!(resp.opaque, 7);
		assert_eq!(resp.local_lifecycle_id, "theirs");
		assert_eq!(resp.remote_lifecycle_id, "mine");
		assert!(!resp.is_stale_for("mine"));
		assert!(resp.is_stale_for("restarted"));
		assert!(!resp.is_stale_for(""));
	}
}
