use std::sync::atomic::{AtomicU32, Ordering};

use serde::Deserialize;

use super::{
	DiscoveryRequest, DiscoveryResponse, Error, OpCode, PeerVbPeriodicPushReq,
	PeerVbPeriodicPushResp, RequestCommon, ResponseCommon, VbMasterCheckReq, VbMasterCheckResp,
	REQ_MAGIC, RESP_MAGIC,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
	Discovery(DiscoveryRequest),
	VbMasterCheck(VbMasterCheckReq),
	PeriodicPush(PeerVbPeriodicPushReq),
}

impl Request {
	#[must_use]
	pub const fn common(&self) -> &RequestCommon {
		match self {
			Self::Discovery(req) => &req.common,
			Self::VbMasterCheck(req) => &req.common,
			Self::PeriodicPush(req) => &req.common,
		}
	}

	#[must_use]
	pub const fn opcode(&self) -> OpCode {
		match self {
			Self::Discovery(_) => OpCode::Discovery,
			Self::VbMasterCheck(_) => OpCode::VbMasterCheck,
			Self::PeriodicPush(_) => OpCode::PeriodicPush,
		}
	}

	#[must_use]
	pub fn same_as(&self, other: &Self) -> bool {
		match (self, other) {
			(Self::Discovery(a), Self::Discovery(b)) => a.common.same_as(&b.common),
			(Self::VbMasterCheck(a), Self::VbMasterCheck(b)) => a.same_as(b),
			(Self::PeriodicPush(a), Self::PeriodicPush(b)) => a.same_as(b),
			_ => false,
		}
	}

	#[must_use]
	pub fn generate_response(&self) -> Response {
		match self {
			Self::Discovery(req) => Response::Discovery(req.generate_response()),
			Self::VbMasterCheck(req) => Response::VbMasterCheck(req.generate_response()),
			Self::PeriodicPush(req) => Response::PeriodicPush(req.generate_response()),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
	Discovery(DiscoveryResponse),
	VbMasterCheck(VbMasterCheckResp),
	PeriodicPush(PeerVbPeriodicPushResp),
}

impl Response {
	#[must_use]
	pub const fn common(&self) -> &ResponseCommon {
		match self {
			Self::Discovery(resp) => &resp.common,
			Self::VbMasterCheck(resp) => &resp.common,
			Self::PeriodicPush(resp) => &resp.common,
		}
	}

	pub fn common_mut(&mut self) -> &mut ResponseCommon {
		match self {
			Self::Discovery(resp) => &mut resp.common,
			Self::VbMasterCheck(resp) => &mut resp.common,
			Self::PeriodicPush(resp) => &mut resp.common,
		}
	}

	#[must_use]
	pub const fn opcode(&self) -> OpCode {
		match self {
			Self::Discovery(_) => OpCode::Discovery,
			Self::VbMasterCheck(_) => OpCode::VbMasterCheck,
			Self::PeriodicPush(_) => OpCode::PeriodicPush,
		}
	}
}

/// A decoded message, direction told apart by its magic number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
	Request(Request),
	Response(Response),
}

impl Envelope {
	#[must_use]
	pub const fn opcode(&self) -> OpCode {
		match self {
			Self::Request(req) => req.opcode(),
			Self::Response(resp) => resp.opcode(),
		}
	}
}

#[derive(Deserialize)]
struct Sniff {
	magic: u32,
	#[serde(default)]
	req_type: Option<u8>,
	#[serde(default)]
	resp_type: Option<u8>,
}

/// Encoder/decoder for peer messages, also hands out request opaques.
///
/// One codec is created per process and shared by everything that talks to
/// peers, so opaques stay unique among outstanding requests.
#[derive(Debug)]
pub struct P2pCodec {
	opaque: AtomicU32,
}

impl Default for P2pCodec {
	fn default() -> Self {
		Self::new()
	}
}

impl P2pCodec {
	#[must_use]
	pub fn new() -> Self {
		Self {
			opaque: AtomicU32::new(rand::random()),
		}
	}

	pub fn next_opaque(&self) -> u32 {
		self.opaque.fetch_add(1, Ordering::Relaxed)
	}

	pub fn encode_request(&self, req: &Request) -> Result<Vec<u8>, Error> {
		match req {
			Request::Discovery(req) => serde_json::to_vec(req),
			Request::VbMasterCheck(req) => serde_json::to_vec(req),
			Request::PeriodicPush(req) => serde_json::to_vec(req),
		}
		.map_err(Into::into)
	}

	pub fn encode_response(&self, resp: &Response) -> Result<Vec<u8>, Error> {
		match resp {
			Response::Discovery(resp) => serde_json::to_vec(resp),
			Response::VbMasterCheck(resp) => serde_json::to_vec(resp),
			Response::PeriodicPush(resp) => serde_json::to_vec(resp),
		}
		.map_err(Into::into)
	}

	pub fn decode(&self, body: &[u8]) -> Result<Envelope, Error> {
		let Sniff {
			magic,
			req_type,
			resp_type,
		} = serde_json::from_slice(body)?;

		match magic {
			REQ_MAGIC => {
				let opcode = OpCode::try_from(req_type.ok_or(Error::MissingOpcode(magic))?)?;
				let req = match opcode {
					OpCode::Discovery => Request::Discovery(serde_json::from_slice(body)?),
					OpCode::VbMasterCheck => Request::VbMasterCheck(serde_json::from_slice(body)?),
					OpCode::PeriodicPush => Request::PeriodicPush(serde_json::from_slice(body)?),
				};
				Ok(Envelope::Request(req))
			}
			RESP_MAGIC => {
				let opcode = OpCode::try_from(resp_type.ok_or(Error::MissingOpcode(magic))?)?;
				let resp = match opcode {
					OpCode::Discovery => Response::Discovery(serde_json::from_slice(body)?),
					OpCode::VbMasterCheck => {
						Response::VbMasterCheck(serde_json::from_slice(body)?)
					}
					OpCode::PeriodicPush => Response::PeriodicPush(serde_json::from_slice(body)?),
				};
				Ok(Envelope::Response(resp))
			}
			other => Err(Error::InvalidMagic(other)),
		}
	}
}
