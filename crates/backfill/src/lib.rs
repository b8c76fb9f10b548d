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

//! Backfill coordination for one XDCR process.
//!
//! Every replication gets a [`RequestHandler`]: a single task that owns the
//! replication's backfill tasks, serializes every mutation requested by
//! routers, pipelines, peers and topology changes, and batches the resulting
//! writes to the metadata store. The [`BackfillManager`] owns the handlers and
//! turns collection manifest changes and peer responses into handler requests.

mod config;
mod error;
mod gc;
mod handler;
mod manager;
mod persist;
mod pipeline;
mod request;
mod retry;
mod stopper;
mod topology;

pub use config::BackfillConfig;
pub use error::Error;
pub use gc::GcScheduler;
pub use handler::{
	CompleteRequestGetter, HandlerCollaborators, RequestHandler, SeqnosGetter, SpecCheck,
	VbsTasksDoneNotifier, BACKFILL_HANDLER_PREFIX,
};
pub use manager::{BackfillManager, ManagerServices, ManifestPair, PipelineHooks};
pub use persist::PersistType;
pub use pipeline::{Pipeline, PipelineState};
pub use request::{CompleteRequest, PeerMergeRequest, Request, RoutingUpdate, VbDiffRequest};
pub use retry::BackfillRetryRequest;
pub use stopper::{wait_stop_or_abort, Stopper};
pub use topology::{BucketTopologyService, GcFn, SourceNotification};
