#![allow(dead_code)]

use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicBool, AtomicUsize, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use async_channel as chan;
use async_trait::async_trait;
use futures::FutureExt;
use xdcr_backfill::{
	BackfillConfig, BucketTopologyService, CompleteRequest, CompleteRequestGetter, Error, GcFn,
	GcScheduler, HandlerCollaborators, ManagerServices, Pipeline, PipelineHooks, PipelineState,
	RequestHandler, SeqnosGetter, SourceNotification, VbsTasksDoneNotifier,
};
use xdcr_metadata::{
	compose_full_topic, BackfillReplService, BackfillReplicationSpec, CheckpointsDoc,
	CheckpointsService, CollectionNamespace, CollectionNamespaceMapping, CollectionNsMappingsDoc,
	PipelineType, ReplicationSpec, ReplicationSpecService,
};

pub const REPL_ID: &str = "repl1";
pub const INTERNAL_ID: &str = "internal1";

pub fn spec(id: &str) -> Arc<ReplicationSpec> {
	Arc::new(ReplicationSpec {
		id: id.to_string(),
		internal_id: INTERNAL_ID.to_string(),
		source_bucket_name: "B1".to_string(),
		target_bucket_name: "B2".to_string(),
		target_cluster_uuid: "cluster".to_string(),
	})
}

pub fn mapping(namespaces: &[(&str, &str)]) -> CollectionNamespaceMapping {
	CollectionNamespaceMapping::implicit(
		namespaces
			.iter()
			.map(|(scope, collection)| CollectionNamespace::new(*scope, *collection)),
	)
}

pub fn test_config() -> BackfillConfig {
	BackfillConfig {
		persist_interval_ms: 10,
		retry_interval_ms: 50,
		vb_gc_interval_ms: 0,
		..BackfillConfig::default()
	}
}

#[derive(Default)]
pub struct FakeBackfillStore {
	specs: Mutex<HashMap<String, BackfillReplicationSpec>>,
	pub adds: AtomicUsize,
	pub sets: AtomicUsize,
	pub dels: AtomicUsize,
	pub fail: AtomicBool,
}

impl FakeBackfillStore {
	pub fn stored(&self, replication_id: &str) -> Option<BackfillReplicationSpec> {
		self.specs.lock().unwrap().get(replication_id).cloned()
	}

	pub fn forget(&self, replication_id: &str) {
		self.specs.lock().unwrap().remove(replication_id);
	}

	pub fn counts(&self) -> (usize, usize, usize) {
		(
			self.adds.load(Ordering::SeqCst),
			self.sets.load(Ordering::SeqCst),
			self.dels.load(Ordering::SeqCst),
		)
	}

	fn check_fail(&self) -> Result<(), xdcr_metadata::Error> {
		if self.fail.load(Ordering::SeqCst) {
			Err(xdcr_metadata::Error::Unavailable("metakv down".to_string()))
		} else {
			Ok(())
		}
	}
}

#[async_trait]
impl BackfillReplService for FakeBackfillStore {
	async fn backfill_repl_spec(
		&self,
		replication_id: &str,
	) -> Result<Option<BackfillReplicationSpec>, xdcr_metadata::Error> {
		Ok(self.stored(replication_id))
	}

	async fn add_backfill_repl_spec(
		&self,
		spec: &BackfillReplicationSpec,
	) -> Result<(), xdcr_metadata::Error> {
		self.adds.fetch_add(1, Ordering::SeqCst);
		self.check_fail()?;
		self.specs
			.lock()
			.unwrap()
			.insert(spec.id.clone(), spec.clone());
		Ok(())
	}

	async fn set_backfill_repl_spec(
		&self,
		spec: &BackfillReplicationSpec,
	) -> Result<(), xdcr_metadata::Error> {
		self.sets.fetch_add(1, Ordering::SeqCst);
		self.check_fail()?;
		self.specs
			.lock()
			.unwrap()
			.insert(spec.id.clone(), spec.clone());
		Ok(())
	}

	async fn del_backfill_repl_spec(&self, replication_id: &str) -> Result<(), xdcr_metadata::Error> {
		self.dels.fetch_add(1, Ordering::SeqCst);
		self.check_fail()?;
		self.specs.lock().unwrap().remove(replication_id);
		Ok(())
	}
}

#[derive(Default)]
pub struct FakeSpecService {
	specs: Mutex<HashMap<String, Arc<ReplicationSpec>>>,
}

impl FakeSpecService {
	pub fn with_specs(ids: &[&str]) -> Self {
		let svc = Self::default();
		for id in ids {
			svc.specs.lock().unwrap().insert((*id).to_string(), spec(id));
		}
		svc
	}
}

#[async_trait]
impl ReplicationSpecService for FakeSpecService {
	async fn replication_spec(
		&self,
		replication_id: &str,
	) -> Result<Arc<ReplicationSpec>, xdcr_metadata::Error> {
		self.specs
			.lock()
			.unwrap()
			.get(replication_id)
			.cloned()
			.ok_or_else(|| xdcr_metadata::Error::NotFound(replication_id.to_string()))
	}

	async fn all_replication_specs(&self) -> Result<Vec<Arc<ReplicationSpec>>, xdcr_metadata::Error> {
		Ok(self.specs.lock().unwrap().values().cloned().collect())
	}
}

/// Local bucket feed driven by the test, garbage collection goes through a
/// real [`GcScheduler`].
pub struct FakeTopology {
	vbs: Mutex<Vec<u16>>,
	subscribers: Mutex<Vec<chan::Sender<SourceNotification>>>,
	pub unsubscribed: AtomicUsize,
	pub gc: GcScheduler,
	chan_len: usize,
}

impl FakeTopology {
	pub fn new(vbs: Vec<u16>) -> Self {
		let config = test_config();
		Self {
			vbs: Mutex::new(vbs),
			subscribers: Mutex::default(),
			unsubscribed: AtomicUsize::new(0),
			gc: GcScheduler::new(config.gc_prune_window()),
			chan_len: config.topology_chan_len,
		}
	}

	pub fn owned(&self) -> SourceNotification {
		SourceNotification::new(self.vbs.lock().unwrap().clone())
	}

	pub async fn set_vbs(&self, vbs: Vec<u16>) {
		*self.vbs.lock().unwrap() = vbs;
		let notification = self.owned();
		let subscribers = self.subscribers.lock().unwrap().clone();
		for tx in subscribers {
			tx.send(notification.clone()).await.ok();
		}
	}
}

#[async_trait]
impl BucketTopologyService for FakeTopology {
	async fn subscribe_local_bucket_feed(
		&self,
		_spec: &ReplicationSpec,
		_subscriber_id: &str,
	) -> Result<chan::Receiver<SourceNotification>, Error> {
		let (tx, rx) = chan::bounded(self.chan_len);
		tx.send(self.owned()).await.ok();
		self.subscribers.lock().unwrap().push(tx);
		Ok(rx)
	}

	async fn unsubscribe_local_bucket_feed(
		&self,
		_spec: &ReplicationSpec,
		_subscriber_id: &str,
	) -> Result<(), Error> {
		self.unsubscribed.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	async fn register_garbage_collect(
		&self,
		spec_id: &str,
		vb: u16,
		request_id: &str,
		gc: GcFn,
		delay: Duration,
	) -> Result<(), Error> {
		self.gc.register(spec_id, vb, request_id, gc, delay).await
	}
}

#[derive(Default)]
pub struct FakeCheckpoints {
	pub exists: AtomicBool,
	pub broken: AtomicBool,
	pub deleted: Mutex<Vec<(String, u16)>>,
}

#[async_trait]
impl CheckpointsService for FakeCheckpoints {
	async fn checkpoints_exist(&self, _topic: &str) -> Result<bool, xdcr_metadata::Error> {
		if self.broken.load(Ordering::SeqCst) {
			return Err(xdcr_metadata::Error::Unavailable("checkpoints".to_string()));
		}
		Ok(self.exists.load(Ordering::SeqCst))
	}

	async fn del_single_vb_checkpoint(&self, topic: &str, vb: u16) -> Result<(), xdcr_metadata::Error> {
		self.deleted.lock().unwrap().push((topic.to_string(), vb));
		Ok(())
	}

	async fn checkpoints_docs(
		&self,
		_topic: &str,
	) -> Result<HashMap<u16, CheckpointsDoc>, xdcr_metadata::Error> {
		Ok(HashMap::new())
	}

	async fn load_broken_mappings(
		&self,
		_replication_id: &str,
	) -> Result<CollectionNsMappingsDoc, xdcr_metadata::Error> {
		Ok(CollectionNsMappingsDoc::default())
	}
}

pub struct FakePipeline {
	pub pipeline_type: PipelineType,
	pub replication_id: String,
	pub vbs: Vec<u16>,
	pub state: Mutex<PipelineState>,
	pub checkpoints: Arc<FakeCheckpoints>,
	pub raised: Mutex<Vec<Error>>,
}

impl FakePipeline {
	pub fn backfill(vbs: Vec<u16>, checkpoints: Arc<FakeCheckpoints>) -> Arc<Self> {
		Arc::new(Self {
			pipeline_type: PipelineType::Backfill,
			replication_id: REPL_ID.to_string(),
			vbs,
			state: Mutex::new(PipelineState::Initial),
			checkpoints,
			raised: Mutex::default(),
		})
	}
}

impl Pipeline for FakePipeline {
	fn pipeline_type(&self) -> PipelineType {
		self.pipeline_type
	}

	fn full_topic(&self) -> String {
		compose_full_topic(&self.replication_id, self.pipeline_type)
	}

	fn responsible_vbs(&self) -> Vec<u16> {
		self.vbs.clone()
	}

	fn state(&self) -> PipelineState {
		*self.state.lock().unwrap()
	}

	fn checkpoints_service(&self) -> Arc<dyn CheckpointsService> {
		Arc::clone(&self.checkpoints) as Arc<dyn CheckpointsService>
	}

	fn raise_error(&self, err: Error) {
		self.raised.lock().unwrap().push(err);
	}
}

/// Seqnos, done notifications and the router's complete request, per test.
#[derive(Default)]
pub struct FakeHooks {
	pub through_seqnos: Arc<Mutex<HashMap<u16, u64>>>,
	pub done_notifications: Arc<Mutex<Vec<bool>>>,
	pub complete_request: Arc<Mutex<Option<CompleteRequest>>>,
}

impl FakeHooks {
	pub fn with_seqnos(seqnos: impl IntoIterator<Item = (u16, u64)>) -> Self {
		let hooks = Self::default();
		*hooks.through_seqnos.lock().unwrap() = seqnos.into_iter().collect();
		hooks
	}

	pub fn set_seqnos(&self, seqnos: impl IntoIterator<Item = (u16, u64)>) {
		*self.through_seqnos.lock().unwrap() = seqnos.into_iter().collect();
	}
}

impl PipelineHooks for FakeHooks {
	fn through_seqnos(&self, _replication_id: &str) -> SeqnosGetter {
		let through_seqnos = Arc::clone(&self.through_seqnos);
		Arc::new(move || {
			let seqnos = through_seqnos.lock().unwrap().clone();
			async move { Ok(seqnos) }.boxed()
		})
	}

	fn main_ckpt_seqnos(&self, _replication_id: &str) -> SeqnosGetter {
		Arc::new(|| async { Err(Error::InvalidInput("no checkpoints".to_string())) }.boxed())
	}

	fn vbs_done_notifier(&self, _replication_id: &str) -> VbsTasksDoneNotifier {
		let done = Arc::clone(&self.done_notifications);
		Arc::new(move |has_more| done.lock().unwrap().push(has_more))
	}

	fn complete_request(&self, _replication_id: &str) -> CompleteRequestGetter {
		let request = Arc::clone(&self.complete_request);
		Arc::new(move || Ok(request.lock().unwrap().clone()))
	}
}

pub struct Fixture {
	pub store: Arc<FakeBackfillStore>,
	pub specs: Arc<FakeSpecService>,
	pub topology: Arc<FakeTopology>,
	pub hooks: Arc<FakeHooks>,
}

impl Fixture {
	pub fn new(vbs: Vec<u16>, seqnos: impl IntoIterator<Item = (u16, u64)>) -> Self {
		Self {
			store: Arc::default(),
			specs: Arc::new(FakeSpecService::with_specs(&[REPL_ID])),
			topology: Arc::new(FakeTopology::new(vbs)),
			hooks: Arc::new(FakeHooks::with_seqnos(seqnos)),
		}
	}

	pub fn collaborators(&self) -> HandlerCollaborators {
		HandlerCollaborators {
			backfill_repl_svc: Arc::clone(&self.store) as Arc<dyn BackfillReplService>,
			replication_spec_svc: Arc::clone(&self.specs) as Arc<dyn ReplicationSpecService>,
			bucket_topology_svc: Arc::clone(&self.topology) as Arc<dyn BucketTopologyService>,
			through_seqnos: self.hooks.through_seqnos(REPL_ID),
			main_ckpt_seqnos: self.hooks.main_ckpt_seqnos(REPL_ID),
			vbs_done_notifier: self.hooks.vbs_done_notifier(REPL_ID),
			complete_request: self.hooks.complete_request(REPL_ID),
			spec_still_exists: Arc::new(|| true),
		}
	}

	pub fn manager_services(&self) -> ManagerServices {
		ManagerServices {
			replication_spec_svc: Arc::clone(&self.specs) as Arc<dyn ReplicationSpecService>,
			backfill_repl_svc: Arc::clone(&self.store) as Arc<dyn BackfillReplService>,
			bucket_topology_svc: Arc::clone(&self.topology) as Arc<dyn BucketTopologyService>,
			pipeline_hooks: Arc::clone(&self.hooks) as Arc<dyn PipelineHooks>,
		}
	}

	pub async fn start_handler(&self) -> RequestHandler {
		let handler = RequestHandler::start(REPL_ID, &test_config(), self.collaborators())
			.await
			.unwrap();
		wait_for_vbs(&handler).await;
		handler
	}
}

/// Requests are only served once the first topology notification went through.
pub async fn wait_for_vbs(handler: &RequestHandler) {
	for _ in 0..200 {
		if !handler.latest_vbs().await.is_empty() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	panic!("handler never received its vbuckets");
}

pub async fn eventually<F>(mut condition: F)
where
	F: FnMut() -> bool,
{
	for _ in 0..400 {
		if condition() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	panic!("condition never became true");
}
