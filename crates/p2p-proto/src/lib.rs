#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! Wire envelopes exchanged between the XDCR processes of a cluster.
//!
//! Every message is a JSON document carrying a magic number (requests and
//! responses use different ones) and an opcode. Large nested maps travel as
//! Snappy compressed JSON inside the envelope.

mod codec;
mod common;
mod discovery;
mod error;
mod opcode;
mod periodic_push;
mod vb_master_check;

pub use codec::{Envelope, P2pCodec, Request, Response};
pub use common::{RequestCommon, ResponseCommon};
pub use discovery::{DiscoveryRequest, DiscoveryResponse};
pub use error::Error;
pub use opcode::{OpCode, REQ_MAGIC, RESP_MAGIC};
pub use periodic_push::{PeerVbPeriodicPushReq, PeerVbPeriodicPushResp, VbPeriodicReplicateReq};
pub use vb_master_check::{
	BucketVbMap, Payload, ReplicationPayload, VbMasterCheckReq, VbMasterCheckResp,
	VbMasterPayload,
};
