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

//! Peer-to-peer communication between the XDCR processes of a cluster.
//!
//! Messages travel as HTTP POSTs of [`xdcr_p2p_proto`] envelopes. Incoming
//! messages are routed by opcode into bounded receive channels, each drained
//! by its own receiver task. The [`P2pManager`] fans requests out to every
//! peer node and collects the answers through [`SendOpts`].

mod comm;
mod config;
mod correlator;
mod discovery;
mod error;
mod manager;
mod periodic_push;
mod receiver;
mod send_opts;
mod transport;
mod vb_master_check;

pub use comm::{CommApi, Inbound, Responder};
pub use config::P2pConfig;
pub use error::Error;
pub use manager::{P2pManager, P2pServices, VbMasterCheckResults, XdcrTopologyService};
pub use periodic_push::PushReqMerger;
pub use receiver::RequestResponder;
pub use send_opts::{ReqRespPair, SendOpts};
pub use transport::{router, HttpTransport, Transport};
pub use vb_master_check::{
	VbMasterCheckHandler, VbMasterCheckServices, VB_MASTER_CHECK_SUBSCRIBER_PREFIX,
};
