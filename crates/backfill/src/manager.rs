use std::{
	collections::HashMap,
	future::IntoFuture,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use async_channel as chan;
use tokio::{
	spawn,
	sync::{Mutex, RwLock},
	task::JoinHandle,
	time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info, instrument, warn};
use xdcr_metadata::{
	BackfillReplService, BackfillReplicationSpec, CollectionNamespaceMapping,
	CollectionNamespaceMappingsDiffPair, CollectionsManifest, ReplicationSpecService,
};
use xdcr_p2p_proto::VbMasterCheckResp;

use super::{
	retry::retry_order, stopper::wait_stop_or_abort, BackfillConfig, BackfillRetryRequest,
	BucketTopologyService, CompleteRequestGetter, Error, HandlerCollaborators, PeerMergeRequest,
	Request, RequestHandler, SeqnosGetter, Stopper, VbsTasksDoneNotifier,
};

/// Source and target collections manifests of a replication at one point in
/// time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestPair {
	pub source: CollectionsManifest,
	pub target: CollectionsManifest,
}

/// Hooks into the pipelines of a replication, handed to its request handler.
pub trait PipelineHooks: Send + Sync + 'static {
	fn through_seqnos(&self, replication_id: &str) -> SeqnosGetter;

	fn main_ckpt_seqnos(&self, replication_id: &str) -> SeqnosGetter;

	fn vbs_done_notifier(&self, replication_id: &str) -> VbsTasksDoneNotifier;

	fn complete_request(&self, replication_id: &str) -> CompleteRequestGetter;
}

#[derive(Clone)]
pub struct ManagerServices {
	pub replication_spec_svc: Arc<dyn ReplicationSpecService>,
	pub backfill_repl_svc: Arc<dyn BackfillReplService>,
	pub bucket_topology_svc: Arc<dyn BucketTopologyService>,
	pub pipeline_hooks: Arc<dyn PipelineHooks>,
}

struct HandlerEntry {
	handler: Arc<RequestHandler>,
	spec_exists: Arc<AtomicBool>,
}

/// Keeps one backfill request handler per replication and feeds them
/// collection changes, retrying the ones that failed.
pub struct BackfillManager {
	config: BackfillConfig,
	services: ManagerServices,
	handlers: RwLock<HashMap<String, HandlerEntry>>,
	retry_queue: Mutex<Vec<BackfillRetryRequest>>,
	stop_tx: chan::Sender<()>,
	stop: Stopper,
	retry_handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackfillManager {
	#[must_use]
	pub fn new(config: BackfillConfig, services: ManagerServices) -> Arc<Self> {
		let (stop_tx, stop) = Stopper::new();

		Arc::new(Self {
			config,
			services,
			handlers: RwLock::default(),
			retry_queue: Mutex::default(),
			stop_tx,
			stop,
			retry_handle: Mutex::default(),
		})
	}

	/// Starts a handler for every existing replication and the retry ticker.
	pub async fn start(self: &Arc<Self>) -> Result<(), Error> {
		let specs = self
			.services
			.replication_spec_svc
			.all_replication_specs()
			.await?;

		for spec in specs {
			if let Err(e) = self.create_handler(&spec.id).await {
				error!(replication_id = %spec.id, ?e, "Unable to start backfill request handler;");
			}
		}

		let this = Arc::clone(self);
		*self.retry_handle.lock().await = Some(spawn(async move { this.run_retry_loop().await }));

		info!("Backfill manager started;");
		Ok(())
	}

	pub async fn stop(&self) {
		self.stop_tx.close();
		wait_stop_or_abort(self.retry_handle.lock().await.take()).await;

		let entries = self
			.handlers
			.write()
			.await
			.drain()
			.map(|(_, entry)| entry)
			.collect::<Vec<_>>();

		for entry in entries {
			entry.handler.stop().await;
		}

		info!("Backfill manager stopped;");
	}

	pub async fn replication_spec_created(&self, replication_id: &str) -> Result<(), Error> {
		self.create_handler(replication_id).await
	}

	/// Drops every backfill of the replication and stops its handler.
	pub async fn replication_spec_deleted(&self, replication_id: &str) -> Result<(), Error> {
		let entry = self
			.handlers
			.write()
			.await
			.remove(replication_id)
			.ok_or_else(|| Error::HandlerNotFound(replication_id.to_string()))?;

		entry.spec_exists.store(false, Ordering::Release);

		match entry.handler.del_all_backfills().await {
			Ok(()) | Err(Error::Stopped) => {}
			Err(e) => warn!(%replication_id, ?e, "Unable to delete backfills of deleted replication;"),
		}
		entry.handler.stop().await;

		self.retry_queue
			.lock()
			.await
			.retain(|req| req.replication_id != replication_id);

		Ok(())
	}

	pub async fn handler(&self, replication_id: &str) -> Option<Arc<RequestHandler>> {
		self.handlers
			.read()
			.await
			.get(replication_id)
			.map(|entry| Arc::clone(&entry.handler))
	}

	async fn create_handler(&self, replication_id: &str) -> Result<(), Error> {
		let mut handlers = self.handlers.write().await;
		if handlers.contains_key(replication_id) {
			debug!(%replication_id, "Backfill request handler already exists;");
			return Ok(());
		}

		let hooks = &self.services.pipeline_hooks;
		let spec_exists = Arc::new(AtomicBool::new(true));
		let collaborators = HandlerCollaborators {
			backfill_repl_svc: Arc::clone(&self.services.backfill_repl_svc),
			replication_spec_svc: Arc::clone(&self.services.replication_spec_svc),
			bucket_topology_svc: Arc::clone(&self.services.bucket_topology_svc),
			through_seqnos: hooks.through_seqnos(replication_id),
			main_ckpt_seqnos: hooks.main_ckpt_seqnos(replication_id),
			vbs_done_notifier: hooks.vbs_done_notifier(replication_id),
			complete_request: hooks.complete_request(replication_id),
			spec_still_exists: {
				let spec_exists = Arc::clone(&spec_exists);
				Arc::new(move || spec_exists.load(Ordering::Acquire))
			},
		};

		let handler = RequestHandler::start(replication_id, &self.config, collaborators).await?;

		handlers.insert(
			replication_id.to_string(),
			HandlerEntry {
				handler: Arc::new(handler),
				spec_exists,
			},
		);

		info!(%replication_id, "Backfill request handler started;");
		Ok(())
	}

	/// Raises backfill for collections that showed up on the target and drops
	/// the tasks of collections removed from the source.
	///
	/// Failures to reach the handler are retried in the background.
	#[instrument(skip(self, old, new), fields(old_source = old.source.uid, new_source = new.source.uid))]
	pub async fn collections_manifest_change_cb(
		&self,
		replication_id: &str,
		old: &ManifestPair,
		new: &ManifestPair,
	) -> Result<(), Error> {
		let diff_pair = manifests_diff_pair(old, new);
		if diff_pair.is_empty() {
			return Ok(());
		}

		let handler = self
			.handler(replication_id)
			.await
			.ok_or_else(|| Error::HandlerNotFound(replication_id.to_string()))?;

		if let Err(e) = handler
			.handle_backfill_request(Request::DiffPair(diff_pair.clone()))
			.await
		{
			warn!(?e, "Manifest change could not be handled, will retry;");
			self.retry_backfill_request(BackfillRetryRequest {
				replication_id: replication_id.to_string(),
				diff_pair,
				force: false,
				source_manifest_id: new.source.uid,
			})
			.await;
		}

		Ok(())
	}

	pub async fn retry_backfill_request(&self, request: BackfillRetryRequest) {
		self.retry_queue.lock().await.push(request);
	}

	pub async fn retry_queue_len(&self) -> usize {
		self.retry_queue.lock().await.len()
	}

	async fn run_retry_loop(&self) {
		let mut ticker = interval(self.config.retry_interval());
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				() = (&self.stop).into_future() => break,
				_ = ticker.tick() => self.retry_pass().await,
			}
		}
	}

	/// Submits every queued retry once. Failed entries stay queued.
	pub async fn retry_pass(&self) {
		let mut pending = self.retry_queue.lock().await.clone();
		if pending.is_empty() {
			return;
		}
		pending.sort_by(retry_order);

		let mut succeeded = Vec::<BackfillRetryRequest>::new();
		let mut resolved = Vec::new();

		for request in pending {
			if succeeded.iter().any(|done| done.same_change(&request)) {
				debug!(
					replication_id = %request.replication_id,
					source_manifest_id = request.source_manifest_id,
					"Retry superseded;"
				);
				resolved.push(request);
				continue;
			}

			let Some(handler) = self.handler(&request.replication_id).await else {
				debug!(replication_id = %request.replication_id, "Dropping retry of removed replication;");
				resolved.push(request);
				continue;
			};

			let backfill_request = Request::DiffPair(request.diff_pair.clone());
			let res = if request.force {
				handler
					.handle_backfill_request_forced(backfill_request)
					.await
			} else {
				handler.handle_backfill_request(backfill_request).await
			};

			match res {
				Ok(()) => succeeded.push(request),
				Err(e) => warn!(replication_id = %request.replication_id, ?e, "Backfill retry failed;"),
			}
		}

		// Entries queued while this pass ran are left for the next one
		let mut queue = self.retry_queue.lock().await;
		for request in succeeded.iter().chain(&resolved) {
			if let Some(idx) = queue.iter().position(|queued| queued == request) {
				queue.remove(idx);
			}
		}
	}

	/// Merges the backfill tasks peers reported for `replication_id`,
	/// returning the errors per peer node.
	pub async fn merge_peer_responses(
		&self,
		replication_id: &str,
		responses: &HashMap<String, VbMasterCheckResp>,
	) -> Result<HashMap<String, Error>, Error> {
		let handler = self
			.handler(replication_id)
			.await
			.ok_or_else(|| Error::HandlerNotFound(replication_id.to_string()))?;

		let mut errors = HashMap::new();
		for (node_name, resp) in responses {
			let payload = &resp.replication_payload;

			if !payload.error_msg.is_empty() {
				errors.insert(
					node_name.clone(),
					Error::Peer {
						node: node_name.clone(),
						msg: payload.error_msg.clone(),
					},
				);
				continue;
			}

			let Some(tasks) = payload
				.bucket_payload(handler.source_bucket_name())
				.map(xdcr_p2p_proto::VbMasterPayload::get_backfill_vb_tasks)
				.filter(|tasks| !tasks.is_empty())
			else {
				continue;
			};

			let request = Request::PeerMerge(PeerMergeRequest {
				node_name: node_name.clone(),
				backfill_spec: BackfillReplicationSpec::new(
					replication_id,
					payload.internal_spec_id.clone(),
					tasks,
					None,
				),
			});

			if let Err(e) = handler.handle_backfill_request(request).await {
				warn!(%replication_id, %node_name, ?e, "Unable to merge peer backfill tasks;");
				errors.insert(node_name.clone(), e);
			}
		}

		Ok(errors)
	}
}

/// Collections removed from the source are dropped, collections new on the
/// target are backfilled if the source has them.
fn manifests_diff_pair(old: &ManifestPair, new: &ManifestPair) -> CollectionNamespaceMappingsDiffPair {
	let removed = new
		.source
		.diff(&old.source)
		.removed
		.into_iter()
		.filter(|namespace| !new.source.contains(namespace));

	let added = new
		.target
		.diff(&old.target)
		.added
		.into_iter()
		.filter(|namespace| new.source.contains(namespace));

	CollectionNamespaceMappingsDiffPair {
		added: CollectionNamespaceMapping::implicit(added),
		removed: CollectionNamespaceMapping::implicit(removed),
	}
}
