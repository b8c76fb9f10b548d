use std::{collections::HashMap, sync::Arc};

use futures::{future::BoxFuture, FutureExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::trace;
use xdcr_p2p_proto::{Envelope, OpCode, P2pCodec, Request, Response};

use super::{Error, Transport};

/// Sends the response of one inbound request back to whoever asked.
pub type Responder = Box<dyn FnOnce(Response) -> BoxFuture<'static, Result<(), Error>> + Send>;

/// A message waiting in the receive channel of its opcode.
pub enum Inbound {
	Request { req: Request, respond: Responder },
	Response(Response),
}

impl Inbound {
	#[must_use]
	pub const fn opcode(&self) -> OpCode {
		match self {
			Self::Request { req, .. } => req.opcode(),
			Self::Response(resp) => resp.opcode(),
		}
	}
}

/// Entry and exit point of every peer-to-peer message of this process.
pub struct CommApi {
	codec: Arc<P2pCodec>,
	transport: Arc<dyn Transport>,
	receive_chs: HashMap<OpCode, mpsc::Sender<Inbound>>,
}

impl CommApi {
	#[must_use]
	pub fn new(
		codec: Arc<P2pCodec>,
		transport: Arc<dyn Transport>,
		receive_chs: HashMap<OpCode, mpsc::Sender<Inbound>>,
	) -> Self {
		Self {
			codec,
			transport,
			receive_chs,
		}
	}

	/// Hands `inbound` to the receiver of its opcode without waiting.
	pub fn p2p_receive(&self, inbound: Inbound) -> Result<(), Error> {
		let opcode = inbound.opcode();

		let receive_ch = self
			.receive_chs
			.get(&opcode)
			.ok_or(Error::InvalidOpcode(opcode))?;

		receive_ch.try_send(inbound).map_err(|e| match e {
			TrySendError::Full(_) => Error::ReceiveChanFull(opcode),
			TrySendError::Closed(_) => Error::Stopped,
		})
	}

	pub async fn p2p_send(&self, req: &Request) -> Result<(), Error> {
		let body = self.codec.encode_request(req)?;
		trace!(
			target = %req.common().target_addr,
			opaque = req.common().opaque,
			opcode = %req.opcode(),
			"Sending request;"
		);
		self.transport.post(&req.common().target_addr, body).await
	}

	async fn send_response(&self, requester: &str, resp: &Response) -> Result<(), Error> {
		let body = self.codec.encode_response(resp)?;
		self.transport.post(requester, body).await
	}

	/// Decodes a raw message body and routes it. Requests get a responder
	/// that posts the response back to their sender.
	pub fn receive_bytes(self: &Arc<Self>, body: &[u8]) -> Result<(), Error> {
		match self.codec.decode(body)? {
			Envelope::Request(req) => {
				let requester = req.common().sender.clone();
				let comm = Arc::clone(self);
				let respond: Responder = Box::new(move |resp| {
					async move { comm.send_response(&requester, &resp).await }.boxed()
				});

				self.p2p_receive(Inbound::Request { req, respond })
			}
			Envelope::Response(resp) => self.p2p_receive(Inbound::Response(resp)),
		}
	}
}
