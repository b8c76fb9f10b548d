#![allow(dead_code)]

use std::{
	collections::{BTreeMap, HashMap},
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use async_channel as chan;
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use xdcr_backfill::{
	BackfillConfig, BackfillManager, BucketTopologyService, CompleteRequestGetter, GcFn,
	ManagerServices, PipelineHooks, SeqnosGetter, SourceNotification, VbsTasksDoneNotifier,
};
use xdcr_metadata::{
	compose_full_topic, BackfillReplService, BackfillReplicationSpec, CheckpointRecord,
	CheckpointsDoc, CheckpointsService, CollectionNamespace, CollectionNamespaceMapping,
	CollectionNsMappingsDoc, CollectionsManifest, CollectionsManifestService, ManifestsCache,
	PipelineType, ReplicationSpec, ReplicationSpecService, VbTasksMap,
};
use xdcr_p2p::{
	CommApi, Error, P2pConfig, P2pManager, P2pServices, PushReqMerger, Transport,
	VbMasterCheckServices, XdcrTopologyService,
};
use xdcr_p2p_proto::VbPeriodicReplicateReq;

pub const REPL_ID: &str = "repl1";
pub const INTERNAL_ID: &str = "internal1";
pub const BUCKET: &str = "B1";

const V7: &[u8] = include_bytes!("../../../metadata/testdata/provisionedManifest.json");

pub fn spec(id: &str) -> Arc<ReplicationSpec> {
	spec_with_internal_id(id, INTERNAL_ID)
}

pub fn spec_with_internal_id(id: &str, internal_id: &str) -> Arc<ReplicationSpec> {
	Arc::new(ReplicationSpec {
		id: id.to_string(),
		internal_id: internal_id.to_string(),
		source_bucket_name: BUCKET.to_string(),
		target_bucket_name: "B2".to_string(),
		target_cluster_uuid: "cluster".to_string(),
	})
}

pub fn test_config() -> P2pConfig {
	P2pConfig {
		response_timeout_ms: 100,
		receive_chan_len: 10,
		peer_list_max_elapsed_ms: 100,
		..P2pConfig::default()
	}
}

pub fn checkpoint(seqno: u64) -> CheckpointsDoc {
	CheckpointsDoc {
		checkpoint_records: vec![CheckpointRecord {
			seqno,
			failover_uuid: 1,
			dcp_snapshot_seqno: seqno,
			dcp_snapshot_end_seqno: seqno,
			target_seqno: seqno,
			source_manifest_for_dcp: 7,
			source_manifest_for_backfill_mgr: 7,
			target_manifest: 7,
			creation_time: Utc::now(),
		}],
		spec_internal_id: INTERNAL_ID.to_string(),
	}
}

pub fn backfill_tasks(vbs: &[u16]) -> VbTasksMap {
	let mapping =
		CollectionNamespaceMapping::implicit([CollectionNamespace::new("S1", "col1")]);
	let end_seqnos = vbs.iter().map(|vb| (*vb, 1000)).collect::<HashMap<_, _>>();
	VbTasksMap::new_from_mapping(&mapping, vbs, &end_seqnos).unwrap()
}

pub struct FakeXdcrTopology {
	pub me: String,
	pub peers: Vec<String>,
	pub unavailable_for: AtomicUsize,
}

impl FakeXdcrTopology {
	pub fn new(me: &str, peers: &[&str]) -> Arc<Self> {
		Arc::new(Self {
			me: me.to_string(),
			peers: peers.iter().map(ToString::to_string).collect(),
			unavailable_for: AtomicUsize::new(0),
		})
	}
}

#[async_trait]
impl XdcrTopologyService for FakeXdcrTopology {
	async fn my_host_addr(&self) -> Result<String, Error> {
		Ok(self.me.clone())
	}

	async fn peer_nodes_admin_addrs(&self) -> Result<Vec<String>, Error> {
		if self.unavailable_for.load(Ordering::SeqCst) > 0 {
			self.unavailable_for.fetch_sub(1, Ordering::SeqCst);
			return Err(Error::PeerList("cluster is rebalancing".to_string()));
		}
		Ok(self.peers.clone())
	}
}

/// Records everything posted, delivers nothing.
#[derive(Default)]
pub struct RecordingTransport {
	sent: Mutex<Vec<(String, Vec<u8>)>>,
	pub unreachable: Mutex<Vec<String>>,
}

impl RecordingTransport {
	pub fn sent(&self) -> Vec<(String, Vec<u8>)> {
		self.sent.lock().unwrap().clone()
	}
}

#[async_trait]
impl Transport for RecordingTransport {
	async fn post(&self, target: &str, body: Vec<u8>) -> Result<(), Error> {
		if self.unreachable.lock().unwrap().iter().any(|t| t == target) {
			return Err(Error::Transport {
				target: target.to_string(),
				reason: "connection refused".to_string(),
			});
		}
		self.sent.lock().unwrap().push((target.to_string(), body));
		Ok(())
	}
}

/// In-process cluster, every post is received by the addressed node.
#[derive(Default)]
pub struct LoopbackNetwork {
	nodes: Mutex<HashMap<String, Arc<CommApi>>>,
}

impl LoopbackNetwork {
	pub fn join(&self, addr: &str, comm: Arc<CommApi>) {
		self.nodes.lock().unwrap().insert(addr.to_string(), comm);
	}
}

pub struct LoopbackTransport(pub Arc<LoopbackNetwork>);

#[async_trait]
impl Transport for LoopbackTransport {
	async fn post(&self, target: &str, body: Vec<u8>) -> Result<(), Error> {
		let maybe_comm = self.0.nodes.lock().unwrap().get(target).cloned();
		let comm = maybe_comm.ok_or_else(|| Error::Transport {
			target: target.to_string(),
			reason: "no such node".to_string(),
		})?;
		comm.receive_bytes(&body)
	}
}

#[derive(Default)]
pub struct FakeSpecService {
	specs: Mutex<HashMap<String, Arc<ReplicationSpec>>>,
}

impl FakeSpecService {
	pub fn with_specs(specs: impl IntoIterator<Item = Arc<ReplicationSpec>>) -> Arc<Self> {
		Arc::new(Self {
			specs: Mutex::new(
				specs
					.into_iter()
					.map(|spec| (spec.id.clone(), spec))
					.collect(),
			),
		})
	}

	pub fn remove(&self, replication_id: &str) {
		self.specs.lock().unwrap().remove(replication_id);
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

#[derive(Default)]
pub struct FakeCheckpoints {
	pub docs: Mutex<HashMap<String, HashMap<u16, CheckpointsDoc>>>,
}

impl FakeCheckpoints {
	pub fn put(&self, pipeline_type: PipelineType, docs: HashMap<u16, CheckpointsDoc>) {
		self.docs
			.lock()
			.unwrap()
			.insert(compose_full_topic(REPL_ID, pipeline_type), docs);
	}
}

#[async_trait]
impl CheckpointsService for FakeCheckpoints {
	async fn checkpoints_exist(&self, topic: &str) -> Result<bool, xdcr_metadata::Error> {
		Ok(self.docs.lock().unwrap().contains_key(topic))
	}

	async fn del_single_vb_checkpoint(
		&self,
		topic: &str,
		vb: u16,
	) -> Result<(), xdcr_metadata::Error> {
		if let Some(docs) = self.docs.lock().unwrap().get_mut(topic) {
			docs.remove(&vb);
		}
		Ok(())
	}

	async fn checkpoints_docs(
		&self,
		topic: &str,
	) -> Result<HashMap<u16, CheckpointsDoc>, xdcr_metadata::Error> {
		Ok(self
			.docs
			.lock()
			.unwrap()
			.get(topic)
			.cloned()
			.unwrap_or_default())
	}

	async fn load_broken_mappings(
		&self,
		_replication_id: &str,
	) -> Result<CollectionNsMappingsDoc, xdcr_metadata::Error> {
		Ok(CollectionNsMappingsDoc::default())
	}
}

pub struct FakeManifests;

#[async_trait]
impl CollectionsManifestService for FakeManifests {
	async fn all_cached_manifests(
		&self,
		_spec: &ReplicationSpec,
	) -> Result<(ManifestsCache, ManifestsCache), xdcr_metadata::Error> {
		let manifest = CollectionsManifest::from_server_json(V7)?;
		let cache = BTreeMap::from([(manifest.uid, manifest)]);
		Ok((cache.clone(), cache))
	}
}

#[derive(Default)]
pub struct FakeBackfillRepl {
	pub spec: Mutex<Option<BackfillReplicationSpec>>,
}

#[async_trait]
impl BackfillReplService for FakeBackfillRepl {
	async fn backfill_repl_spec(
		&self,
		_replication_id: &str,
	) -> Result<Option<BackfillReplicationSpec>, xdcr_metadata::Error> {
		Ok(self.spec.lock().unwrap().clone())
	}

	async fn add_backfill_repl_spec(
		&self,
		spec: &BackfillReplicationSpec,
	) -> Result<(), xdcr_metadata::Error> {
		*self.spec.lock().unwrap() = Some(spec.clone());
		Ok(())
	}

	async fn set_backfill_repl_spec(
		&self,
		spec: &BackfillReplicationSpec,
	) -> Result<(), xdcr_metadata::Error> {
		*self.spec.lock().unwrap() = Some(spec.clone());
		Ok(())
	}

	async fn del_backfill_repl_spec(&self, _replication_id: &str) -> Result<(), xdcr_metadata::Error> {
		*self.spec.lock().unwrap() = None;
		Ok(())
	}
}

/// Owns a fixed set of vbuckets, announced on every new subscription.
pub struct FakeBucketTopology {
	vbs: Mutex<Vec<u16>>,
	subscribers: Mutex<Vec<chan::Sender<SourceNotification>>>,
	pub subscriptions: AtomicUsize,
	pub unsubscriptions: AtomicUsize,
}

impl FakeBucketTopology {
	pub fn owning(vbs: &[u16]) -> Arc<Self> {
		Arc::new(Self {
			vbs: Mutex::new(vbs.to_vec()),
			subscribers: Mutex::default(),
			subscriptions: AtomicUsize::new(0),
			unsubscriptions: AtomicUsize::new(0),
		})
	}

	pub fn set_vbs(&self, vbs: &[u16]) {
		*self.vbs.lock().unwrap() = vbs.to_vec();
		for subscriber in self.subscribers.lock().unwrap().iter() {
			let _ = subscriber.try_send(SourceNotification::new(vbs.to_vec()));
		}
	}
}

#[async_trait]
impl BucketTopologyService for FakeBucketTopology {
	async fn subscribe_local_bucket_feed(
		&self,
		_spec: &ReplicationSpec,
		_subscriber_id: &str,
	) -> Result<chan::Receiver<SourceNotification>, xdcr_backfill::Error> {
		let (tx, rx) = chan::bounded(10);
		let current = self.vbs.lock().unwrap().clone();
		let _ = tx.try_send(SourceNotification::new(current));
		self.subscribers.lock().unwrap().push(tx);
		self.subscriptions.fetch_add(1, Ordering::SeqCst);
		Ok(rx)
	}

	async fn unsubscribe_local_bucket_feed(
		&self,
		_spec: &ReplicationSpec,
		_subscriber_id: &str,
	) -> Result<(), xdcr_backfill::Error> {
		self.unsubscriptions.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	async fn register_garbage_collect(
		&self,
		_spec_id: &str,
		_vb: u16,
		_request_id: &str,
		_gc: GcFn,
		_delay: Duration,
	) -> Result<(), xdcr_backfill::Error> {
		Ok(())
	}
}

#[derive(Default)]
pub struct RecordingMerger {
	pub merged: Mutex<Vec<(String, VbPeriodicReplicateReq)>>,
}

#[async_trait]
impl PushReqMerger for RecordingMerger {
	async fn merge_push_req(
		&self,
		sender: &str,
		push_req: &VbPeriodicReplicateReq,
	) -> Result<(), Error> {
		self.merged
			.lock()
			.unwrap()
			.push((sender.to_string(), push_req.clone()));
		Ok(())
	}
}

/// Pipelines that streamed every vbucket up to seqno 500.
pub struct SteadyPipelines;

impl PipelineHooks for SteadyPipelines {
	fn through_seqnos(&self, _replication_id: &str) -> SeqnosGetter {
		Arc::new(|| {
			let seqnos = (0..4_u16).map(|vb| (vb, 500_u64)).collect::<HashMap<_, _>>();
			async move { Ok::<_, xdcr_backfill::Error>(seqnos) }.boxed()
		})
	}

	fn main_ckpt_seqnos(&self, _replication_id: &str) -> SeqnosGetter {
		Arc::new(|| async { Ok::<_, xdcr_backfill::Error>(HashMap::new()) }.boxed())
	}

	fn vbs_done_notifier(&self, _replication_id: &str) -> VbsTasksDoneNotifier {
		Arc::new(|_: bool| {})
	}

	fn complete_request(&self, _replication_id: &str) -> CompleteRequestGetter {
		Arc::new(|| Ok(None))
	}
}

/// Metadata of one node.
pub struct Node {
	pub specs: Arc<FakeSpecService>,
	pub checkpoints: Arc<FakeCheckpoints>,
	pub backfill: Arc<FakeBackfillRepl>,
	pub bucket_topology: Arc<FakeBucketTopology>,
	pub merger: Arc<RecordingMerger>,
}

impl Node {
	pub fn owning(vbs: &[u16]) -> Self {
		Self::with_internal_id(vbs, INTERNAL_ID)
	}

	/// A node that knows the replication under its own incarnation.
	pub fn with_internal_id(vbs: &[u16], internal_id: &str) -> Self {
		Self {
			specs: FakeSpecService::with_specs([spec_with_internal_id(REPL_ID, internal_id)]),
			checkpoints: Arc::new(FakeCheckpoints::default()),
			backfill: Arc::new(FakeBackfillRepl::default()),
			bucket_topology: FakeBucketTopology::owning(vbs),
			merger: Arc::new(RecordingMerger::default()),
		}
	}

	pub fn vb_master_check_services(&self) -> VbMasterCheckServices {
		VbMasterCheckServices {
			replication_spec_svc: self.specs.clone(),
			checkpoints_svc: self.checkpoints.clone(),
			collections_manifest_svc: Arc::new(FakeManifests),
			backfill_repl_svc: self.backfill.clone(),
			bucket_topology_svc: self.bucket_topology.clone(),
		}
	}

	pub async fn backfill_manager(&self) -> Arc<BackfillManager> {
		let manager = BackfillManager::new(
			BackfillConfig::default(),
			ManagerServices {
				replication_spec_svc: self.specs.clone(),
				backfill_repl_svc: self.backfill.clone(),
				bucket_topology_svc: self.bucket_topology.clone(),
				pipeline_hooks: Arc::new(SteadyPipelines),
			},
		);
		manager.start().await.unwrap();
		manager
	}

	pub fn manager(
		&self,
		topology: Arc<FakeXdcrTopology>,
		transport: Arc<dyn Transport>,
	) -> Arc<P2pManager> {
		P2pManager::new(
			test_config(),
			P2pServices {
				xdcr_topology_svc: topology,
				vb_master_check: self.vb_master_check_services(),
				transport,
				push_merger: self.merger.clone(),
			},
		)
	}
}
