use std::{collections::HashMap, future::IntoFuture, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
	spawn,
	sync::{watch, Mutex},
	task::JoinHandle,
	time::timeout,
};
use tracing::{debug, error, info, instrument, warn};
use xdcr_backfill::{BucketTopologyService, SourceNotification, Stopper};
use xdcr_metadata::{
	compose_full_topic, BackfillReplService, CheckpointsService, CollectionsManifestService,
	ReplicationSpec, ReplicationSpecService,
};
use xdcr_p2p_proto::{ReplicationPayload, Request, Response, VbMasterCheckReq, VbMasterCheckResp};

use super::{Error, RequestResponder, Responder};

pub const VB_MASTER_CHECK_SUBSCRIBER_PREFIX: &str = "vbMasterCheck";

/// Metadata the responder reads to describe its vbuckets to a peer.
#[derive(Clone)]
pub struct VbMasterCheckServices {
	pub replication_spec_svc: Arc<dyn ReplicationSpecService>,
	pub checkpoints_svc: Arc<dyn CheckpointsService>,
	pub collections_manifest_svc: Arc<dyn CollectionsManifestService>,
	pub backfill_repl_svc: Arc<dyn BackfillReplService>,
	pub bucket_topology_svc: Arc<dyn BucketTopologyService>,
}

struct TopologyFeed {
	spec: Arc<ReplicationSpec>,
	latest: watch::Receiver<Option<SourceNotification>>,
	handle: JoinHandle<()>,
}

/// Answers peers asking which of their vbuckets this node also believes to
/// own.
///
/// Keeps the latest local bucket topology of every replication so requests
/// never wait on the topology service.
pub struct VbMasterCheckHandler {
	services: VbMasterCheckServices,
	feeds: Mutex<HashMap<String, TopologyFeed>>,
	topology_wait: Duration,
	stop: Stopper,
}

impl VbMasterCheckHandler {
	#[must_use]
	pub fn new(services: VbMasterCheckServices, topology_wait: Duration, stop: Stopper) -> Self {
		Self {
			services,
			feeds: Mutex::default(),
			topology_wait,
			stop,
		}
	}

	fn subscriber_id(replication_id: &str) -> String {
		format!("{VB_MASTER_CHECK_SUBSCRIBER_PREFIX}_{replication_id}")
	}

	/// Subscribes to the local topology of the spec's source bucket ahead of
	/// the first request about it.
	pub async fn handle_spec_creation(&self, spec: Arc<ReplicationSpec>) -> Result<(), Error> {
		let mut feeds = self.feeds.lock().await;
		if feeds.contains_key(&spec.id) {
			return Ok(());
		}

		let notifications = self
			.services
			.bucket_topology_svc
			.subscribe_local_bucket_feed(&spec, &Self::subscriber_id(&spec.id))
			.await?;

		let (latest_tx, latest) = watch::channel(None);
		let stop = self.stop.clone();
		let replication_id = spec.id.clone();
		let handle = spawn(async move {
			loop {
				tokio::select! {
					() = (&stop).into_future() => break,
					maybe_notification = notifications.recv() => match maybe_notification {
						Ok(notification) => {
							latest_tx.send_replace(Some(notification));
						}
						Err(_) => {
							debug!(%replication_id, "Local bucket feed closed;");
							break;
						}
					}
				}
			}
		});

		info!(replication_id = %spec.id, "Watching local bucket topology;");
		feeds.insert(
			spec.id.clone(),
			TopologyFeed {
				spec,
				latest,
				handle,
			},
		);

		Ok(())
	}

	pub async fn handle_spec_deletion(&self, replication_id: &str) {
		let Some(feed) = self.feeds.lock().await.remove(replication_id) else {
			return;
		};

		feed.handle.abort();
		if let Err(e) = self
			.services
			.bucket_topology_svc
			.unsubscribe_local_bucket_feed(&feed.spec, &Self::subscriber_id(replication_id))
			.await
		{
			warn!(%replication_id, ?e, "Failed to unsubscribe from local bucket feed;");
		}
	}

	/// Stops every topology feed.
	pub async fn shutdown(&self) {
		let ids = self.feeds.lock().await.keys().cloned().collect::<Vec<_>>();
		for replication_id in ids {
			self.handle_spec_deletion(&replication_id).await;
		}
	}

	async fn owned_vbs(&self, spec: &Arc<ReplicationSpec>) -> Result<SourceNotification, Error> {
		let maybe_latest = self
			.feeds
			.lock()
			.await
			.get(&spec.id)
			.map(|feed| feed.latest.clone());

		let mut latest = if let Some(latest) = maybe_latest {
			latest
		} else {
			self.handle_spec_creation(Arc::clone(spec)).await?;
			self.feeds
				.lock()
				.await
				.get(&spec.id)
				.map(|feed| feed.latest.clone())
				.ok_or(Error::Stopped)?
		};

		let notification = timeout(self.topology_wait, latest.wait_for(Option::is_some))
			.await
			.map_err(|_| Error::TopologyUnknown(spec.id.clone()))?
			.map_err(|_| Error::Stopped)?
			.clone();

		notification.ok_or(Error::Stopped)
	}

	async fn populate(
		&self,
		req: &VbMasterCheckReq,
		payload: &mut ReplicationPayload,
	) -> Result<(), Error> {
		let spec = match self
			.services
			.replication_spec_svc
			.replication_spec(&req.replication_id)
			.await
		{
			Ok(spec) => spec,
			Err(xdcr_metadata::Error::NotFound(_)) => {
				return Err(Error::OrphanedRequest(req.replication_id.clone()));
			}
			Err(e) => return Err(e.into()),
		};

		// Peers merge what we report under our incarnation of the replication
		payload.internal_spec_id.clone_from(&spec.internal_id);
		if !req.internal_spec_id.is_empty()
			&& !spec.internal_id.is_empty()
			&& req.internal_spec_id != spec.internal_id
		{
			return Err(Error::InternalIdMismatch {
				ours: spec.internal_id.clone(),
				theirs: req.internal_spec_id.clone(),
			});
		}

		let owned = self.owned_vbs(&spec).await?;

		for (bucket, vbs) in &req.bucket_vb_map {
			let bucket_payload = payload.bucket_payload_mut(bucket);
			if *bucket != spec.source_bucket_name {
				bucket_payload.overall_payload_err = format!(
					"bucket {bucket} is not the source bucket of replication {}",
					spec.id
				);
				continue;
			}

			let (conflicting, not_mine): (Vec<u16>, Vec<u16>) =
				vbs.iter().partition(|&&vb| owned.owns(vb));
			bucket_payload.register_not_my_vbs(&not_mine)?;
			bucket_payload.register_conflicting_vbs(&conflicting)?;
		}

		let topic = compose_full_topic(&req.replication_id, req.pipeline_type);
		let ckpts = self.services.checkpoints_svc.checkpoints_docs(&topic).await?;
		let backfill_spec = self
			.services
			.backfill_repl_svc
			.backfill_repl_spec(&req.replication_id)
			.await?;
		let (src_manifests, tgt_manifests) = self
			.services
			.collections_manifest_svc
			.all_cached_manifests(&spec)
			.await?;
		let broken_mapping_doc = self
			.services
			.checkpoints_svc
			.load_broken_mappings(&req.replication_id)
			.await?;

		for bucket_payload in payload
			.payload
			.values_mut()
			.filter(|bucket_payload| bucket_payload.overall_payload_err.is_empty())
		{
			bucket_payload.load_pipeline_ckpts(&ckpts);
			if let Some(backfill_spec) = &backfill_spec {
				bucket_payload
					.load_backfill_tasks(&backfill_spec.vb_tasks_map, &backfill_spec.internal_id)?;
			}
			bucket_payload.load_manifests(src_manifests.clone(), tgt_manifests.clone());
			bucket_payload.load_broken_mapping_doc(broken_mapping_doc.clone());
		}

		Ok(())
	}

	/// Builds the answer to `req`; failures travel inside the response.
	#[instrument(
		skip_all,
		fields(replication_id = %req.replication_id, sender = %req.common.sender, opaque = req.common.opaque)
	)]
	pub async fn answer(&self, req: &VbMasterCheckReq) -> VbMasterCheckResp {
		let mut resp = req.generate_response();

		if let Err(e) = self.populate(req, &mut resp.replication_payload).await {
			warn!(?e, "Unable to fully answer vb master check;");
			resp.replication_payload.error_msg = e.to_string();
		}

		resp
	}
}

#[async_trait]
impl RequestResponder for VbMasterCheckHandler {
	async fn handle_request(&self, req: Request, respond: Responder) {
		let req = match req {
			Request::VbMasterCheck(req) => req,
			other => {
				error!(opcode = %other.opcode(), "Vb master check handler received a foreign request;");
				return;
			}
		};

		let resp = self.answer(&req).await;

		if let Err(e) = respond(Response::VbMasterCheck(resp)).await {
			warn!(
				replication_id = %req.replication_id,
				sender = %req.common.sender,
				?e,
				"Failed to deliver vb master check response;"
			);
		}
	}
}
