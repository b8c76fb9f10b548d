use std::{
	collections::HashMap,
	future::{pending, IntoFuture},
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::Duration,
};

use async_channel as chan;
use futures::{future::BoxFuture, FutureExt};
use tokio::{
	spawn,
	sync::{mpsc, watch, Mutex, RwLock},
	task::JoinHandle,
	time::{sleep_until, Instant},
};
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;
use xdcr_metadata::{
	compose_full_topic, BackfillReplService, BackfillReplicationSpec, CollectionNamespaceMapping,
	CollectionNamespaceMappingsDiffPair, PipelineType, ReplicationSpec, ReplicationSpecService,
	VbTasksMap, NUMBER_OF_VBS,
};

use super::{
	persist::{PersistBatcher, PersistType},
	pipeline::{AttachedPipelines, VbDone},
	request::{ReqAndResp, Responder},
	stopper::wait_stop_or_abort,
	topology::diff_vbs,
	BackfillConfig, BucketTopologyService, CompleteRequest, Error, GcFn, PeerMergeRequest, Pipeline,
	PipelineState, Request, RoutingUpdate, SourceNotification, Stopper, VbDiffRequest,
};

pub const BACKFILL_HANDLER_PREFIX: &str = "backfillHandler";

/// Latest vb -> seqno view of some part of the main pipeline.
pub type SeqnosGetter =
	Arc<dyn Fn() -> BoxFuture<'static, Result<HashMap<u16, u64>, Error>> + Send + Sync>;

/// Called once every vbucket of the backfill pipeline finished, with whether
/// any task is left to start a new backfill pipeline for.
pub type VbsTasksDoneNotifier = Arc<dyn Fn(bool) + Send + Sync>;

/// The router's current complete backfill request, `None` if nothing is broken.
pub type CompleteRequestGetter =
	Arc<dyn Fn() -> Result<Option<CompleteRequest>, Error> + Send + Sync>;

pub type SpecCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Services and pipeline hooks a request handler works with.
#[derive(Clone)]
pub struct HandlerCollaborators {
	pub backfill_repl_svc: Arc<dyn BackfillReplService>,
	pub replication_spec_svc: Arc<dyn ReplicationSpecService>,
	pub bucket_topology_svc: Arc<dyn BucketTopologyService>,
	/// Through seqnos of the running main pipeline
	pub through_seqnos: SeqnosGetter,
	/// Seqnos of the latest main pipeline checkpoints
	pub main_ckpt_seqnos: SeqnosGetter,
	pub vbs_done_notifier: VbsTasksDoneNotifier,
	pub complete_request: CompleteRequestGetter,
	pub spec_still_exists: SpecCheck,
}

#[derive(Clone)]
struct Submitter {
	incoming_tx: mpsc::Sender<ReqAndResp>,
	done_tx: mpsc::Sender<ReqAndResp>,
	stop: Stopper,
}

impl Submitter {
	/// Hands `request` to the loop and waits for its handling, then for its
	/// persistence.
	async fn submit(&self, request: Request, force: bool) -> Result<(), Error> {
		if self.stop.is_stopped() {
			return Err(Error::Stopped);
		}

		let tx = if matches!(request, Request::PartitionDone(_)) {
			&self.done_tx
		} else {
			&self.incoming_tx
		};

		let (req, handle_rx, persist_rx) = ReqAndResp::new(request, force);

		tokio::select! {
			() = (&self.stop).into_future() => return Err(Error::Stopped),
			res = tx.send(req) => if res.is_err() {
				return Err(Error::Stopped);
			},
		}

		// The loop may have stopped between the check above and now
		let handled = tokio::select! {
			() = (&self.stop).into_future() => Err(Error::Stopped),
			res = handle_rx => res.unwrap_or(Err(Error::Stopped)),
		};

		match handled {
			Ok(()) => persist_rx.await.unwrap_or(Err(Error::Stopped)),
			Err(Error::SyncDeleted | Error::PeerTasksAlreadyMerged) => Ok(()),
			Err(e) => Err(e),
		}
	}

	fn spawn_submit(&self, replication_id: String, request: Request) {
		let submitter = self.clone();
		spawn(async move {
			match submitter.submit(request, false).await {
				Ok(()) | Err(Error::Stopped) => {}
				Err(e) if e.is_already_cleaned_up() => {
					debug!(%replication_id, ?e, "Background backfill request had nothing left to do;");
				}
				Err(e) => error!(%replication_id, ?e, "Background backfill request failed;"),
			}
		});
	}
}

struct Shared {
	id: String,
	spec: Arc<ReplicationSpec>,
	services: HandlerCollaborators,
	submitter: Submitter,
	vb_gc_interval: Duration,
	latest_vbs: RwLock<Vec<u16>>,
	pipelines: Mutex<AttachedPipelines>,
	backfill_attached: AtomicBool,
	/// What each peer node handed over last, per vbucket
	last_merged: Mutex<HashMap<String, VbTasksMap>>,
}

impl Shared {
	fn gc_request_id(&self, suffix: &str) -> String {
		format!("{BACKFILL_HANDLER_PREFIX}_{}_{suffix}", self.id)
	}

	async fn register_gc(&self, vb: u16, request_id: &str, gc: GcFn) {
		if let Err(e) = self
			.services
			.bucket_topology_svc
			.register_garbage_collect(&self.spec.id, vb, request_id, gc, self.vb_gc_interval)
			.await
		{
			warn!(replication_id = %self.id, vb, %request_id, ?e, "Unable to register garbage collection;");
		}
	}

	async fn forget_last_merged(&self, node_name: &str, vb: u16, request_id: &str) -> Result<(), Error> {
		let mut last_merged = self.last_merged.lock().await;

		let Some(tasks) = last_merged
			.get_mut(node_name)
			.filter(|tasks| !tasks.is_empty())
		else {
			return Err(Error::NothingToCollect(request_id.to_string()));
		};

		tasks.remove_vb(vb);
		if tasks.is_empty() {
			last_merged.remove(node_name);
		}

		Ok(())
	}
}

/// Serializes every change to the backfill tasks of one replication.
///
/// All mutations run on a single task that owns the cached backfill spec;
/// callers get synchronous semantics by waiting on the answer channels of
/// their request.
pub struct RequestHandler {
	id: String,
	shared: Arc<Shared>,
	stop_tx: chan::Sender<()>,
	cached_rx: watch::Receiver<Option<BackfillReplicationSpec>>,
	handle: Mutex<Option<JoinHandle<()>>>,
}

impl RequestHandler {
	/// Loads the persisted backfill spec, subscribes to the local bucket feed
	/// and spawns the handler loop.
	pub async fn start(
		replication_id: impl Into<String>,
		config: &BackfillConfig,
		services: HandlerCollaborators,
	) -> Result<Self, Error> {
		let id = replication_id.into();

		let spec = services
			.replication_spec_svc
			.replication_spec(&id)
			.await
			.map_err(|e| {
				error!(replication_id = %id, ?e, "Error getting replication spec;");
				e
			})?;

		let cached = match services.backfill_repl_svc.backfill_repl_spec(&id).await {
			Ok(cached) => cached.map(|mut cached| {
				cached.replication_spec = Some(Arc::clone(&spec));
				cached
			}),
			Err(e) => {
				warn!(replication_id = %id, ?e, "Unable to load persisted backfill spec;");
				None
			}
		};

		let subscriber_id = format!(
			"{}_backfillReqHandler_{}",
			compose_full_topic(&id, PipelineType::Backfill),
			Uuid::new_v4()
		);
		let topology_rx = services
			.bucket_topology_svc
			.subscribe_local_bucket_feed(&spec, &subscriber_id)
			.await?;

		let (incoming_tx, incoming_rx) = mpsc::channel(1);
		let (done_tx, done_rx) = mpsc::channel(NUMBER_OF_VBS);
		let (stop_tx, stop) = Stopper::new();
		let (cached_tx, cached_rx) = watch::channel(cached.clone());

		let shared = Arc::new(Shared {
			id: id.clone(),
			spec,
			services,
			submitter: Submitter {
				incoming_tx,
				done_tx,
				stop: stop.clone(),
			},
			vb_gc_interval: config.vb_gc_interval(),
			latest_vbs: RwLock::default(),
			pipelines: Mutex::default(),
			backfill_attached: AtomicBool::new(false),
			last_merged: Mutex::default(),
		});

		let handler_loop = HandlerLoop {
			shared: Arc::clone(&shared),
			cached,
			cached_tx,
			batcher: PersistBatcher::new(config.persist_interval()),
			incoming_rx,
			done_rx,
			topology_rx,
			subscriber_id,
		};

		let handle = spawn(handler_loop.run(stop));

		Ok(Self {
			id,
			shared,
			stop_tx,
			cached_rx,
			handle: Mutex::new(Some(handle)),
		})
	}

	pub async fn stop(&self) {
		self.stop_tx.close();
		wait_stop_or_abort(self.handle.lock().await.take()).await;
		info!(replication_id = %self.id, "Backfill request handler stopped;");
	}

	#[must_use]
	pub fn id(&self) -> &str {
		&self.id
	}

	#[must_use]
	pub fn source_bucket_name(&self) -> &str {
		&self.shared.spec.source_bucket_name
	}

	#[must_use]
	pub fn is_stopped(&self) -> bool {
		self.shared.submitter.stop.is_stopped()
	}

	/// Snapshot of the in-memory backfill spec as of the last handled request.
	#[must_use]
	pub fn cached_backfill_spec(&self) -> Option<BackfillReplicationSpec> {
		self.cached_rx.borrow().clone()
	}

	pub async fn latest_vbs(&self) -> Vec<u16> {
		self.shared.latest_vbs.read().await.clone()
	}

	pub async fn handle_backfill_request(&self, request: Request) -> Result<(), Error> {
		self.shared.submitter.submit(request, false).await
	}

	/// Re-creates the backfill spec when the metadata store lost it and re-adds
	/// the requested namespaces from scratch.
	pub async fn handle_backfill_request_forced(&self, request: Request) -> Result<(), Error> {
		self.shared.submitter.submit(request, true).await
	}

	/// Redundant calls for the same vbucket answer [`Error::VbAlreadyDone`].
	pub async fn handle_vb_task_done(&self, vb: u16) -> Result<(), Error> {
		self.shared
			.submitter
			.submit(Request::PartitionDone(vb), false)
			.await
	}

	pub async fn del_all_backfills(&self) -> Result<(), Error> {
		self.handle_backfill_request(Request::DeleteAll).await
	}

	/// Callback for a stopped pipeline to drop the tasks of one vbucket.
	pub fn del_vb_specific_backfill_cb(
		&self,
		vb: u16,
	) -> impl FnOnce() -> BoxFuture<'static, Result<(), Error>> + Send + 'static {
		let submitter = self.shared.submitter.clone();
		let replication_id = self.id.clone();

		move || {
			async move {
				let res = submitter.submit(Request::DeleteOne(vb), false).await;
				if let Err(e) = &res {
					error!(
						%replication_id,
						vb,
						?e,
						"Unable to delete vb specific backfill, extraneous backfill may occur;"
					);
				}
				res
			}
			.boxed()
		}
	}

	pub async fn attach(&self, pipeline: Arc<dyn Pipeline>) {
		let mut attached = self.shared.pipelines.lock().await;

		if pipeline.pipeline_type() == PipelineType::Backfill {
			self.shared.backfill_attached.store(true, Ordering::Release);
		}
		attached.attach(Arc::clone(&pipeline));

		info!(
			replication_id = %self.id,
			topic = %pipeline.full_topic(),
			total_vbs = attached.backfill_vbs_count(),
			"Backfill request handler attached to pipeline;"
		);
	}

	pub async fn detach(&self, pipeline: &dyn Pipeline) -> Result<(), Error> {
		let full_topic = pipeline.full_topic();
		let detached = self
			.shared
			.pipelines
			.lock()
			.await
			.detach(&full_topic)
			.ok_or_else(|| Error::PipelineNotAttached(full_topic.clone()))?;

		if detached.pipeline_type() == PipelineType::Backfill {
			self.shared.backfill_attached.store(false, Ordering::Release);
		}

		info!(replication_id = %self.id, topic = %full_topic, "Detached from pipeline;");
		Ok(())
	}

	/// Broken or fixed mapping raised by a main pipeline router. On error the
	/// router rolls back its view and raises the update again.
	pub async fn process_routing_update(&self, update: RoutingUpdate) -> Result<(), Error> {
		let res = match update.into_request() {
			Ok(request) => self.handle_backfill_request(request).await,
			Err(e) => Err(e),
		};

		if let Err(e) = &res {
			if *e != Error::Stopped && (self.shared.services.spec_still_exists)() {
				error!(replication_id = %self.id, ?e, "Routing update failed;");
			}
		}

		res
	}

	/// A backfill pipeline finished streaming the current task of `vb`.
	pub async fn on_last_seen_seqno_done(&self, vb: u16) -> Result<(), Error> {
		let res = self.handle_vb_task_done(vb).await;

		match &res {
			// An unregistered vb was already raised by the loop
			Ok(()) | Err(Error::VbAlreadyDone(_) | Error::UnregisteredVb { .. }) => {}
			Err(e)
				if !self.is_stopped() && self.shared.backfill_attached.load(Ordering::Acquire) =>
			{
				error!(replication_id = %self.id, vb, ?e, "Last seen seqno done processing failed;");
				// The backfill of this vb needs to be redone
				let pipeline = self.shared.pipelines.lock().await.get(PipelineType::Backfill);
				if let Some(pipeline) = pipeline {
					pipeline.raise_error(e.clone());
				}
			}
			Err(_) => {}
		}

		res
	}
}

struct HandlerLoop {
	shared: Arc<Shared>,
	cached: Option<BackfillReplicationSpec>,
	cached_tx: watch::Sender<Option<BackfillReplicationSpec>>,
	batcher: PersistBatcher,
	incoming_rx: mpsc::Receiver<ReqAndResp>,
	done_rx: mpsc::Receiver<ReqAndResp>,
	topology_rx: chan::Receiver<SourceNotification>,
	subscriber_id: String,
}

async fn flush_timer(deadline: Option<Instant>) {
	match deadline {
		Some(deadline) => sleep_until(deadline).await,
		None => pending().await,
	}
}

/// An internal id not assigned yet on either side matches anything.
fn internal_ids_match(ours: &str, theirs: &str) -> bool {
	ours.is_empty() || theirs.is_empty() || ours == theirs
}

impl HandlerLoop {
	#[instrument(skip_all, fields(replication_id = %self.shared.id))]
	async fn run(mut self, stop: Stopper) {
		// Requests can only be served once the owned vbuckets are known
		tokio::select! {
			() = (&stop).into_future() => {
				self.unsubscribe().await;
				return;
			}
			notification = self.topology_rx.recv() => match notification {
				Ok(notification) => {
					*self.shared.latest_vbs.write().await = notification.into_vbs();
				}
				Err(_) => {
					warn!("Local bucket feed closed before the first notification;");
					(&stop).await;
					self.unsubscribe().await;
					return;
				}
			},
		}

		loop {
			tokio::select! {
				() = (&stop).into_future() => break,
				Some(req) = self.incoming_rx.recv() => self.dispatch(req).await,
				Some(req) = self.done_rx.recv() => self.dispatch(req).await,
				() = flush_timer(self.batcher.flush_deadline()) => self.flush().await,
				Ok(notification) = self.topology_rx.recv() => self.handle_topology(notification).await,
			}
		}

		self.unsubscribe().await;
	}

	async fn unsubscribe(&self) {
		if let Err(e) = self
			.shared
			.services
			.bucket_topology_svc
			.unsubscribe_local_bucket_feed(&self.shared.spec, &self.subscriber_id)
			.await
		{
			warn!(?e, "Unable to unsubscribe from local bucket feed;");
		}
	}

	async fn dispatch(&mut self, req: ReqAndResp) {
		let ReqAndResp {
			request,
			handle_tx,
			persist_tx,
			force,
		} = req;
		let mut persist_tx = Some(persist_tx);

		trace!(?request, force, "Handling backfill request;");

		let res = match request {
			Request::NewMapping(mapping) => {
				self.handle_new_mapping(&mapping, None, force, &mut persist_tx)
					.await
			}
			Request::DiffPair(pair) => {
				self.handle_diff_pair(&pair, None, force, &mut persist_tx)
					.await
			}
			Request::PartitionDone(vb) => self.handle_vb_done(vb, &mut persist_tx).await,
			Request::DeleteOne(vb) => self.handle_delete(Some(vb), &mut persist_tx).await,
			Request::DeleteAll => self.handle_delete(None, &mut persist_tx).await,
			Request::PeerMerge(req) => self.handle_peer_merge(req, &mut persist_tx).await,
			Request::VbDiff(req) => self.handle_vb_diff_request(req, force, &mut persist_tx).await,
		};

		self.cached_tx.send_replace(self.cached.clone());
		self.answer(handle_tx, persist_tx, res);
	}

	fn answer(
		&mut self,
		handle_tx: Responder,
		persist_tx: Option<Responder>,
		res: Result<(), Error>,
	) {
		if handle_tx.send(res.clone()).is_err() {
			trace!("Backfill requester went away before being answered;");
		}

		match res {
			Ok(()) => {
				if let Some(persist_tx) = persist_tx {
					// Nothing was queued for persistence
					persist_tx.send(Ok(())).ok();
				} else {
					self.batcher.request_flush();
				}
			}
			Err(Error::SyncDeleted) => self.batcher.cancel_flush(),
			Err(_) => {}
		}
	}

	async fn flush(&mut self) {
		let Some(op) = self.batcher.take_pending() else {
			return;
		};

		let res = self.metakv_op(op).await;
		if let Err(e) = &res {
			error!(persist_type = %op, ?e, "Failed to persist backfill spec;");
		} else {
			debug!(persist_type = %op, "Persisted backfill spec;");
		}

		self.batcher.finish_flush(&res);
	}

	async fn metakv_op(&self, op: PersistType) -> Result<(), Error> {
		let svc = &self.shared.services.backfill_repl_svc;

		match op {
			PersistType::Add | PersistType::Set => {
				let spec = self.cached.as_ref().ok_or(Error::NoBackfillSpec)?;
				if op == PersistType::Add {
					svc.add_backfill_repl_spec(spec).await?;
				} else {
					svc.set_backfill_repl_spec(spec).await?;
				}
			}
			PersistType::Del => svc.del_backfill_repl_spec(&self.shared.id).await?,
		}

		Ok(())
	}

	fn queue_persistence(&mut self, op: PersistType, persist_tx: &mut Option<Responder>) {
		if let Some(persist_tx) = persist_tx.take() {
			self.batcher.queue(op, persist_tx);
		}
	}

	/// Drops the whole spec from memory and synchronously from the store.
	///
	/// Answers [`Error::SyncDeleted`] on success, queued writers are answered
	/// with success as the delete supersedes them.
	async fn delete_spec(&mut self) -> Error {
		self.cached = None;
		self.batcher.supersede_with_delete();

		match self.metakv_op(PersistType::Del).await {
			Ok(()) => Error::SyncDeleted,
			Err(e) => {
				warn!(?e, "Failed to delete backfill spec;");
				e
			}
		}
	}

	/// Highest seqno known for each owned vbucket, from the main pipeline's
	/// through seqnos and its checkpoints. Vbuckets neither source knows about
	/// are left out so no task is raised for a vbucket this node does not own.
	async fn max_seqnos_to_backfill(&self, scope: Option<&[u16]>) -> (HashMap<u16, u64>, Vec<u16>) {
		let my_vbs = self.shared.latest_vbs.read().await.clone();

		let through_seqnos = (self.shared.services.through_seqnos)().await;
		let ckpt_seqnos = (self.shared.services.main_ckpt_seqnos)().await;
		if let Err(e) = &through_seqnos {
			debug!(?e, "Through seqnos unavailable;");
		}
		if let Err(e) = &ckpt_seqnos {
			debug!(?e, "Main pipeline checkpoint seqnos unavailable;");
		}

		let sources = [through_seqnos.ok(), ckpt_seqnos.ok()];

		let mut max_seqnos = HashMap::new();
		let mut vbs = Vec::new();
		for vb in my_vbs
			.into_iter()
			.filter(|vb| scope.map_or(true, |scope| scope.contains(vb)))
		{
			let mut found = false;
			for seqnos in sources.iter().flatten() {
				if let Some(&seqno) = seqnos.get(&vb) {
					let max = max_seqnos.entry(vb).or_insert(0);
					if seqno > *max {
						*max = seqno;
						found = true;
					}
				}
			}

			if found {
				vbs.push(vb);
			} else {
				max_seqnos.remove(&vb);
			}
		}

		(max_seqnos, vbs)
	}

	async fn handle_new_mapping(
		&mut self,
		mapping: &CollectionNamespaceMapping,
		scope: Option<&[u16]>,
		force: bool,
		persist_tx: &mut Option<Responder>,
	) -> Result<(), Error> {
		let (seqnos, vbs) = self.max_seqnos_to_backfill(scope).await;

		let tasks = VbTasksMap::new_from_mapping(mapping, &vbs, &seqnos).map_err(|e| {
			error!(?e, "Unable to create backfill tasks;");
			Error::from(e)
		})?;

		self.update_backfill_spec(tasks, Some((mapping, &seqnos)), force, persist_tx)
			.await;

		Ok(())
	}

	/// Explicit mapping edit: added namespaces are backfilled from scratch and
	/// removed ones are dropped from every pending task.
	async fn handle_diff_pair(
		&mut self,
		pair: &CollectionNamespaceMappingsDiffPair,
		scope: Option<&[u16]>,
		force: bool,
		persist_tx: &mut Option<Responder>,
	) -> Result<(), Error> {
		if !pair.removed.is_empty() {
			if let Some(cached) = self.cached.as_mut() {
				cached.vb_tasks_map.remove_namespace_mappings(&pair.removed);
			}
		}

		if !pair.added.is_empty() {
			return self
				.handle_new_mapping(&pair.added, scope, force, persist_tx)
				.await;
		}

		// Nothing was broken and a fixed mapping came in, or the removal emptied
		// the spec
		if self
			.cached
			.as_ref()
			.map_or(true, |cached| cached.vb_tasks_map.is_empty())
		{
			return Err(self.delete_spec().await);
		}

		self.queue_persistence(PersistType::Set, persist_tx);
		Ok(())
	}

	async fn handle_vb_diff_request(
		&mut self,
		req: VbDiffRequest,
		force: bool,
		persist_tx: &mut Option<Responder>,
	) -> Result<(), Error> {
		let VbDiffRequest {
			added_vbs,
			removed_vbs,
			request,
		} = req;

		let res = if added_vbs.is_empty() {
			Ok(())
		} else {
			match &request {
				CompleteRequest::Mapping(mapping) => {
					self.handle_new_mapping(mapping, Some(&added_vbs), force, persist_tx)
						.await
				}
				CompleteRequest::DiffPair(pair) => {
					self.handle_diff_pair(pair, Some(&added_vbs), force, persist_tx)
						.await
				}
			}
		};

		for vb in removed_vbs {
			self.shared
				.submitter
				.spawn_submit(self.shared.id.clone(), Request::DeleteOne(vb));
		}

		res
	}

	async fn update_backfill_spec(
		&mut self,
		tasks: VbTasksMap,
		requested: Option<(&CollectionNamespaceMapping, &HashMap<u16, u64>)>,
		force: bool,
		persist_tx: &mut Option<Responder>,
	) {
		let mut exists = self.cached.is_some();

		if force
			&& !matches!(
				self.shared
					.services
					.backfill_repl_svc
					.backfill_repl_spec(&self.shared.id)
					.await,
				Ok(Some(_))
			) {
			// The store lost the spec, it has to be added again
			exists = false;
		}

		if !exists {
			self.cached = Some(BackfillReplicationSpec::new(
				self.shared.spec.id.clone(),
				self.shared.spec.internal_id.clone(),
				tasks,
				Some(Arc::clone(&self.shared.spec)),
			));
			if let Some((mapping, seqnos)) = requested {
				self.log_new_backfill(mapping, seqnos);
			}
			self.queue_persistence(PersistType::Add, persist_tx);
			return;
		}

		if force {
			if let Some(cached) = self.cached.as_mut() {
				for mapping in tasks.all_collection_namespace_mappings() {
					cached.vb_tasks_map.remove_namespace_mappings(&mapping);
				}
			}
		} else if self
			.cached
			.as_ref()
			.is_some_and(|cached| cached.contains(&tasks))
		{
			// Redundant, persist anyway to stay in sync with the store
			self.queue_persistence(PersistType::Set, persist_tx);
			return;
		}

		let skip_first = self.should_skip_first(requested).await;
		if let Some(cached) = self.cached.as_mut() {
			cached.merge_new_tasks(&tasks, skip_first);
		}
		self.queue_persistence(PersistType::Set, persist_tx);
	}

	/// Whether incoming tasks must be queued behind the first task of each
	/// vbucket instead of widening it.
	///
	/// Widening is only safe when the backfill pipeline is not running and has
	/// no checkpoint yet, meaning the first task never streamed anything.
	async fn should_skip_first(
		&self,
		requested: Option<(&CollectionNamespaceMapping, &HashMap<u16, u64>)>,
	) -> bool {
		let my_vbs = self.shared.latest_vbs.read().await.clone();
		let has_tasks = self.cached.as_ref().is_some_and(|cached| {
			cached
				.vb_tasks_map
				.contains_at_least_one_task_for_vbs(&my_vbs)
		});

		if !has_tasks {
			if let Some((mapping, seqnos)) = requested {
				self.log_new_backfill(mapping, seqnos);
			}
			return true;
		}

		let mut skip_first = true;
		let pipeline = self
			.shared
			.pipelines
			.lock()
			.await
			.get(PipelineType::Backfill);

		if let Some(pipeline) = pipeline
			.filter(|pipeline| matches!(pipeline.state(), PipelineState::Initial | PipelineState::Stopped))
		{
			match pipeline
				.checkpoints_service()
				.checkpoints_exist(&pipeline.full_topic())
				.await
			{
				Ok(exists) => skip_first = exists,
				Err(e) => warn!(?e, "Unable to check for backfill checkpoints, tasks will be appended;"),
			}
		}

		if let Some((mapping, seqnos)) = requested {
			info!(
				complete_merge = !skip_first,
				%mapping,
				?seqnos,
				"These collections need to append backfill;"
			);
		}

		skip_first
	}

	fn log_new_backfill(&self, mapping: &CollectionNamespaceMapping, seqnos: &HashMap<u16, u64>) {
		info!(%mapping, ?seqnos, "These collections need to backfill;");
	}

	/// The backfill pipeline is done with the current task of `vb`.
	///
	/// Once every vbucket of the pipeline is done and no task is left, the
	/// spec is deleted synchronously so the next request creates a fresh one,
	/// which is what starts a new backfill pipeline.
	async fn handle_vb_done(&mut self, vb: u16, persist_tx: &mut Option<Responder>) -> Result<(), Error> {
		let (pipeline, backfill_done) = {
			let mut attached = self.shared.pipelines.lock().await;
			let Some(pipeline) = attached.get(PipelineType::Backfill) else {
				return Err(Error::BackfillPipelineNotAttached(self.shared.id.clone()));
			};

			match attached.mark_vb_done(vb) {
				VbDone::Marked { all_done } => (pipeline, all_done),
				VbDone::AlreadyDone => return Err(Error::VbAlreadyDone(vb)),
				VbDone::Unregistered => {
					drop(attached);
					let err = Error::UnregisteredVb {
						id: self.shared.id.clone(),
						topic: pipeline.full_topic(),
						vb,
					};
					pipeline.raise_error(err.clone());
					return Err(err);
				}
			}
		};

		let Some(cached) = self.cached.as_mut() else {
			return Err(Error::NoBackfillSpec);
		};
		cached.vb_tasks_map.mark_one_vb_task_done(vb);

		// Obsolete checkpoints must not be used by the vb's next task
		let topic = pipeline.full_topic();
		if let Err(e) = pipeline
			.checkpoints_service()
			.del_single_vb_checkpoint(&topic, vb)
			.await
		{
			error!(%topic, vb, ?e, "Unable to delete checkpoint doc;");
			return Err(e.into());
		}

		let has_more_tasks = backfill_done
			&& self
				.cached
				.as_ref()
				.is_some_and(|cached| cached.vb_tasks_map.contains_at_least_one_task());

		let res = if backfill_done && !has_more_tasks {
			Err(self.delete_spec().await)
		} else {
			self.queue_persistence(PersistType::Set, persist_tx);
			Ok(())
		};

		if backfill_done {
			// Kicks off the next pipeline, only after persistence was requested
			(self.shared.services.vbs_done_notifier)(has_more_tasks);
		}

		res
	}

	/// Deletes the tasks of one vbucket, or of all of them when `vb` is `None`
	/// or the last vbucket with tasks.
	async fn handle_delete(&mut self, vb: Option<u16>, persist_tx: &mut Option<Responder>) -> Result<(), Error> {
		let last_vb = match (vb, &self.cached) {
			(Some(vb), Some(cached)) => {
				cached.vb_tasks_map.len() == 1 && cached.vb_tasks_map.get(vb).is_some()
			}
			_ => false,
		};

		match vb {
			Some(vb) if !last_vb => {
				let cached = self.cached.as_mut().ok_or(Error::NoBackfillSpec)?;
				cached
					.vb_tasks_map
					.remove_vb(vb)
					.ok_or(Error::VbNotFound(vb))?;

				self.queue_persistence(PersistType::Set, persist_tx);
				Ok(())
			}
			_ => {
				info!(?vb, "Handling delete all backfill request;");
				Err(self.delete_spec().await)
			}
		}
	}

	async fn handle_peer_merge(
		&mut self,
		req: PeerMergeRequest,
		persist_tx: &mut Option<Responder>,
	) -> Result<(), Error> {
		let PeerMergeRequest {
			node_name,
			backfill_spec,
		} = req;

		if !internal_ids_match(&self.shared.spec.internal_id, &backfill_spec.internal_id) {
			return Err(Error::InternalIdMismatch {
				expected: self.shared.spec.internal_id.clone(),
				got: backfill_spec.internal_id,
			});
		}

		// A peer answers the same tasks until they are garbage collected on its
		// side, only merge what changed since the last time
		if self
			.shared
			.last_merged
			.lock()
			.await
			.get(&node_name)
			.is_some_and(|last| last.contains(&backfill_spec.vb_tasks_map))
		{
			return Err(Error::PeerTasksAlreadyMerged);
		}

		self.update_backfill_spec(backfill_spec.vb_tasks_map.clone(), None, false, persist_tx)
			.await;

		self.record_last_merged(&node_name, &backfill_spec.vb_tasks_map)
			.await;
		self.register_non_owned_vbs_for_gc(&backfill_spec.vb_tasks_map)
			.await;

		Ok(())
	}

	async fn record_last_merged(&self, node_name: &str, tasks: &VbTasksMap) {
		self.shared
			.last_merged
			.lock()
			.await
			.insert(node_name.to_string(), tasks.clone());

		let request_id = self.shared.gc_request_id(node_name);
		for vb in tasks.vbs() {
			let shared = Arc::clone(&self.shared);
			let node_name = node_name.to_string();
			let gc_request_id = request_id.clone();

			self.shared
				.register_gc(
					vb,
					&request_id,
					Box::new(move || {
						async move {
							shared
								.forget_last_merged(&node_name, vb, &gc_request_id)
								.await
						}
						.boxed()
					}),
				)
				.await;
		}
	}

	async fn register_non_owned_vbs_for_gc(&self, tasks: &VbTasksMap) {
		let my_vbs = self.shared.latest_vbs.read().await.clone();

		for vb in tasks.vbs() {
			if my_vbs.binary_search(&vb).is_err() {
				self.register_vb_for_gc(vb).await;
			}
		}
	}

	async fn register_vb_for_gc(&self, vb: u16) {
		let submitter = self.shared.submitter.clone();
		let replication_id = self.shared.id.clone();

		self.shared
			.register_gc(
				vb,
				&self.shared.gc_request_id("vbCleanup"),
				Box::new(move || {
					async move {
						submitter.spawn_submit(replication_id, Request::DeleteOne(vb));
						Ok(())
					}
					.boxed()
				}),
			)
			.await;
	}

	async fn handle_topology(&mut self, notification: SourceNotification) {
		let new_vbs = notification.into_vbs();
		let old_vbs = self.shared.latest_vbs.read().await.clone();

		// An empty list means this is the very first notification
		if !old_vbs.is_empty() {
			let (added, removed) = diff_vbs(&old_vbs, &new_vbs);
			if let Err(e) = self.handle_vbs_diff(added, removed).await {
				error!(?e, ?old_vbs, ?new_vbs, "Unable to handle vbs diff;");
			}
		}

		*self.shared.latest_vbs.write().await = new_vbs;
	}

	async fn handle_vbs_diff(&self, added: Vec<u16>, removed: Vec<u16>) -> Result<(), Error> {
		if !added.is_empty() {
			match (self.shared.services.complete_request)() {
				Ok(Some(request)) => self.shared.submitter.spawn_submit(
					self.shared.id.clone(),
					Request::VbDiff(VbDiffRequest {
						added_vbs: added,
						removed_vbs: Vec::new(),
						request,
					}),
				),
				Ok(None) | Err(Error::NoBackfillNeeded) => {}
				Err(e) => return Err(e),
			}
		}

		for vb in removed {
			self.register_vb_for_gc(vb).await;
		}

		Ok(())
	}
}
