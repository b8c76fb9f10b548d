use async_trait::async_trait;
use tracing::{error, trace, warn};
use xdcr_p2p_proto::{Request, Response};

use super::{RequestResponder, Responder};

/// Answers discovery requests, letting peers learn our lifecycle id.
pub(crate) struct DiscoveryHandler;

#[async_trait]
impl RequestResponder for DiscoveryHandler {
	async fn handle_request(&self, req: Request, respond: Responder) {
		let req = match req {
			Request::Discovery(req) => req,
			other => {
				error!(opcode = %other.opcode(), "Discovery handler received a foreign request;");
				return;
			}
		};

		trace!(sender = %req.common.sender, "Answering discovery;");
		if let Err(e) = respond(Response::Discovery(req.generate_response())).await {
			warn!(sender = %req.common.sender, ?e, "Failed to answer discovery;");
		}
	}
}
