use std::{future::IntoFuture, sync::Arc};

use async_trait::async_trait;
use tokio::{spawn, sync::mpsc};
use tracing::{debug, instrument, warn};
use xdcr_backfill::Stopper;
use xdcr_p2p_proto::{OpCode, Request};

use super::{correlator::Correlator, Inbound, Responder};

/// Per opcode behaviour of a receiver: answering requests from peers.
#[async_trait]
pub trait RequestResponder: Send + Sync + 'static {
	async fn handle_request(&self, req: Request, respond: Responder);
}

/// Drains the receive channel of one opcode.
///
/// Responses are paired with the requests this process sent, requests are
/// answered concurrently by the opcode's responder.
pub(crate) struct Receiver {
	pub(crate) opcode: OpCode,
	pub(crate) correlator: Arc<Correlator>,
	pub(crate) responder: Arc<dyn RequestResponder>,
}

impl Receiver {
	/// Responses carry the lifecycle id we actually run with, whatever the
	/// requester believed it to be.
	fn stamped(&self, respond: Responder) -> Responder {
		let lifecycle_id = self.correlator.lifecycle_id().to_string();
		Box::new(move |mut resp| {
			resp.common_mut().local_lifecycle_id = lifecycle_id;
			respond(resp)
		})
	}

	#[instrument(skip_all, fields(opcode = %self.opcode))]
	pub(crate) async fn run(self, mut receive_rx: mpsc::Receiver<Inbound>, stop: Stopper) {
		loop {
			let inbound = tokio::select! {
				() = (&stop).into_future() => break,
				maybe_inbound = receive_rx.recv() => match maybe_inbound {
					Some(inbound) => inbound,
					None => break,
				},
			};

			match inbound {
				Inbound::Request { req, respond } => {
					let responder = Arc::clone(&self.responder);
					let respond = self.stamped(respond);
					spawn(async move { responder.handle_request(req, respond).await });
				}
				Inbound::Response(resp) => {
					if let Err(e) = self.correlator.handle_response(resp).await {
						warn!(?e, "Dropped response;");
					}
				}
			}
		}

		debug!("Receiver stopped;");
	}
}
