use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};
use xdcr_p2p_proto::{Request, Response, VbPeriodicReplicateReq};

use super::{Error, RequestResponder, Responder};

/// Takes in the replication state a vbucket master pushes to this node.
#[async_trait]
pub trait PushReqMerger: Send + Sync + 'static {
	async fn merge_push_req(&self, sender: &str, push_req: &VbPeriodicReplicateReq)
		-> Result<(), Error>;
}

pub(crate) struct PeriodicPushHandler {
	pub(crate) merger: Arc<dyn PushReqMerger>,
}

#[async_trait]
impl RequestResponder for PeriodicPushHandler {
	async fn handle_request(&self, req: Request, respond: Responder) {
		let req = match req {
			Request::PeriodicPush(req) => req,
			other => {
				error!(opcode = %other.opcode(), "Periodic push handler received a foreign request;");
				return;
			}
		};

		let sender = &req.common.sender;
		let mut errors = Vec::new();
		for push_req in req.push_reqs.iter().filter(|push_req| !push_req.is_empty()) {
			if let Err(e) = self.merger.merge_push_req(sender, push_req).await {
				warn!(
					%sender,
					replication_id = %push_req.main_replication.replication_spec_id,
					?e,
					"Failed to merge pushed replication state;"
				);
				errors.push(e.to_string());
			}
		}
		debug!(%sender, pushed = req.push_reqs.len(), failed = errors.len(), "Merged periodic push;");

		let mut resp = req.generate_response();
		resp.common.error_string = errors.join(", ");

		if let Err(e) = respond(Response::PeriodicPush(resp)).await {
			warn!(%sender, ?e, "Failed to answer periodic push;");
		}
	}
}
