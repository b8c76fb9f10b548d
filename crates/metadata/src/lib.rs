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

//! Replication metadata shared by the backfill and peer-to-peer crates.
//!
//! The central type is [`VbTasksMap`], the durable description of which seqno
//! ranges of which collections have to be re-streamed for every vbucket.

mod backfill_task;
mod checkpoint;
mod compress;
mod error;
mod manifest;
mod mapping_doc;
mod namespace;
mod replication_spec;
mod service;
mod vb_tasks_map;

pub use backfill_task::{BackfillTask, BackfillTasks, ManifestIds, VbTimestamp};
pub use checkpoint::{CheckpointRecord, CheckpointsDoc};
pub use compress::{compress_json, decompress_json};
pub use error::Error;
pub use manifest::{CollectionsManifest, ManifestDiff, ManifestsCache, Scope};
pub use mapping_doc::{CollectionNsMappingsDoc, CompressedMappingRecord};
pub use namespace::{
	CollectionNamespace, CollectionNamespaceMapping, CollectionNamespaceMappingsDiffPair,
};
pub use replication_spec::{
	compose_full_topic, BackfillReplicationSpec, PipelineType, ReplicationSpec,
};
pub use service::{
	BackfillReplService, CheckpointsService, CollectionsManifestService, ReplicationSpecService,
};
pub use vb_tasks_map::VbTasksMap;

/// Number of vbuckets in a bucket.
pub const NUMBER_OF_VBS: usize = 1024;
