use serde::{Deserialize, Serialize};

use super::{RequestCommon, ResponseCommon};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRequest {
	#[serde(flatten)]
	pub common: RequestCommon,
}

impl DiscoveryRequest {
	#[must_use]
	pub fn generate_response(&self) -> DiscoveryResponse {
		DiscoveryResponse {
			common: self.common.generate_response_common(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResponse {
	#[serde(flatten)]
	pub common: ResponseCommon,
}
