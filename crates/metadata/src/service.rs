//! Contracts of the metadata backends the replication core talks to.
//!
//! The backends themselves (metakv, checkpoint storage, manifest polling) live
//! outside of this workspace.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use super::{
	BackfillReplicationSpec, CheckpointsDoc, CollectionNsMappingsDoc, Error, ManifestsCache,
	ReplicationSpec,
};

/// Durable store of backfill replication specs keyed by replication id.
#[async_trait]
pub trait BackfillReplService: Send + Sync + 'static {
	async fn backfill_repl_spec(
		&self,
		replication_id: &str,
	) -> Result<Option<BackfillReplicationSpec>, Error>;

	async fn add_backfill_repl_spec(&self, spec: &BackfillReplicationSpec) -> Result<(), Error>;

	async fn set_backfill_repl_spec(&self, spec: &BackfillReplicationSpec) -> Result<(), Error>;

	async fn del_backfill_repl_spec(&self, replication_id: &str) -> Result<(), Error>;
}

#[async_trait]
pub trait CheckpointsService: Send + Sync + 'static {
	async fn checkpoints_exist(&self, topic: &str) -> Result<bool, Error>;

	async fn del_single_vb_checkpoint(&self, topic: &str, vb: u16) -> Result<(), Error>;

	async fn checkpoints_docs(&self, topic: &str) -> Result<HashMap<u16, CheckpointsDoc>, Error>;

	async fn load_broken_mappings(
		&self,
		replication_id: &str,
	) -> Result<CollectionNsMappingsDoc, Error>;
}

#[async_trait]
pub trait ReplicationSpecService: Send + Sync + 'static {
	/// Fails with [`Error::NotFound`] once the replication is deleted.
	async fn replication_spec(&self, replication_id: &str) -> Result<Arc<ReplicationSpec>, Error>;

	async fn all_replication_specs(&self) -> Result<Vec<Arc<ReplicationSpec>>, Error>;
}

#[async_trait]
pub trait CollectionsManifestService: Send + Sync + 'static {
	/// Cached source and target manifests, in that order.
	async fn all_cached_manifests(
		&self,
		spec: &ReplicationSpec,
	) -> Result<(ManifestsCache, ManifestsCache), Error>;
}
