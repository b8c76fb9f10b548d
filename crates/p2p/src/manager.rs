use std::{collections::HashMap, sync::Arc};

use async_channel as chan;
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use futures::future::join_all;
use tokio::{
	spawn,
	sync::{mpsc, oneshot, Mutex, RwLock},
	task::JoinHandle,
};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use xdcr_backfill::{wait_stop_or_abort, Stopper};
use xdcr_metadata::{PipelineType, ReplicationSpec};
use xdcr_p2p_proto::{
	BucketVbMap, DiscoveryRequest, OpCode, P2pCodec, Request, RequestCommon, Response,
	VbMasterCheckReq, VbMasterCheckResp,
};

use super::{
	correlator::{Correlator, ResponseCallback},
	discovery::DiscoveryHandler,
	periodic_push::PeriodicPushHandler,
	receiver::Receiver,
	CommApi, Error, P2pConfig, PushReqMerger, ReqRespPair, RequestResponder, SendOpts, Transport,
	VbMasterCheckHandler, VbMasterCheckServices,
};

/// Where this node and its peers can be reached.
#[async_trait]
pub trait XdcrTopologyService: Send + Sync + 'static {
	async fn my_host_addr(&self) -> Result<String, Error>;

	async fn peer_nodes_admin_addrs(&self) -> Result<Vec<String>, Error>;
}

#[derive(Clone)]
pub struct P2pServices {
	pub xdcr_topology_svc: Arc<dyn XdcrTopologyService>,
	pub vb_master_check: VbMasterCheckServices,
	pub transport: Arc<dyn Transport>,
	pub push_merger: Arc<dyn PushReqMerger>,
}

/// Answers of one vb master check fan-out, and the peers that gave none.
pub type VbMasterCheckResults = (HashMap<String, VbMasterCheckResp>, HashMap<String, Error>);

/// Talks to the XDCR processes of the other nodes of the cluster.
///
/// Every opcode has a receiver task draining its receive channel. Requests
/// sent by this process are tracked per opcode until their response arrives
/// or their timeout elapsed.
pub struct P2pManager {
	config: P2pConfig,
	services: P2pServices,
	lifecycle_id: String,
	codec: Arc<P2pCodec>,
	correlators: HashMap<OpCode, Arc<Correlator>>,
	vb_master_check: Arc<VbMasterCheckHandler>,
	peer_lifecycles: RwLock<HashMap<String, String>>,
	comm: Mutex<Option<Arc<CommApi>>>,
	handles: Mutex<Vec<JoinHandle<()>>>,
	stop_tx: chan::Sender<()>,
	stop: Stopper,
}

impl P2pManager {
	#[must_use]
	pub fn new(config: P2pConfig, services: P2pServices) -> Arc<Self> {
		let lifecycle_id = Uuid::new_v4().to_string();
		let (stop_tx, stop) = Stopper::new();

		let correlators = OpCode::ALL
			.into_iter()
			.map(|opcode| {
				(
					opcode,
					Arc::new(Correlator::new(
						lifecycle_id.as_str(),
						config.response_timeout(),
					)),
				)
			})
			.collect();

		let vb_master_check = Arc::new(VbMasterCheckHandler::new(
			services.vb_master_check.clone(),
			config.response_timeout(),
			stop.clone(),
		));

		Arc::new(Self {
			config,
			services,
			lifecycle_id,
			codec: Arc::new(P2pCodec::new()),
			correlators,
			vb_master_check,
			peer_lifecycles: RwLock::default(),
			comm: Mutex::default(),
			handles: Mutex::default(),
			stop_tx,
			stop,
		})
	}

	/// Unique to this incarnation of the process.
	#[must_use]
	pub fn lifecycle_id(&self) -> &str {
		&self.lifecycle_id
	}

	#[must_use]
	pub const fn config(&self) -> &P2pConfig {
		&self.config
	}

	#[must_use]
	pub fn vb_master_check_handler(&self) -> &Arc<VbMasterCheckHandler> {
		&self.vb_master_check
	}

	fn responder(&self, opcode: OpCode) -> Arc<dyn RequestResponder> {
		match opcode {
			OpCode::Discovery => Arc::new(DiscoveryHandler),
			OpCode::VbMasterCheck => Arc::clone(&self.vb_master_check) as Arc<dyn RequestResponder>,
			OpCode::PeriodicPush => Arc::new(PeriodicPushHandler {
				merger: Arc::clone(&self.services.push_merger),
			}),
		}
	}

	/// Spawns one receiver per opcode and primes the vb master check
	/// responder with every existing replication.
	pub async fn start(&self) -> Result<Arc<CommApi>, Error> {
		if self.stop.is_stopped() {
			return Err(Error::Stopped);
		}

		let mut maybe_comm = self.comm.lock().await;
		if let Some(comm) = &*maybe_comm {
			return Ok(Arc::clone(comm));
		}

		let mut receive_chs = HashMap::with_capacity(self.correlators.len());
		let mut handles = self.handles.lock().await;
		for (opcode, correlator) in &self.correlators {
			let (receive_tx, receive_rx) = mpsc::channel(self.config.receive_chan_len);
			receive_chs.insert(*opcode, receive_tx);

			let receiver = Receiver {
				opcode: *opcode,
				correlator: Arc::clone(correlator),
				responder: self.responder(*opcode),
			};
			handles.push(spawn(receiver.run(receive_rx, self.stop.clone())));
		}
		drop(handles);

		let comm = Arc::new(CommApi::new(
			Arc::clone(&self.codec),
			Arc::clone(&self.services.transport),
			receive_chs,
		));
		*maybe_comm = Some(Arc::clone(&comm));
		drop(maybe_comm);

		for spec in self
			.services
			.vb_master_check
			.replication_spec_svc
			.all_replication_specs()
			.await?
		{
			self.handle_spec_creation(spec).await;
		}

		info!(lifecycle_id = %self.lifecycle_id, "Peer-to-peer manager started;");

		Ok(comm)
	}

	pub async fn stop(&self) {
		self.stop_tx.close();
		self.vb_master_check.shutdown().await;

		let handles = std::mem::take(&mut *self.handles.lock().await);
		for handle in handles {
			wait_stop_or_abort(Some(handle)).await;
		}

		info!("Peer-to-peer manager stopped;");
	}

	pub async fn handle_spec_creation(&self, spec: Arc<ReplicationSpec>) {
		let replication_id = spec.id.clone();
		if let Err(e) = self.vb_master_check.handle_spec_creation(spec).await {
			error!(%replication_id, ?e, "Failed to prepare vb master check responder;");
		}
	}

	pub async fn handle_spec_deletion(&self, replication_id: &str) {
		self.vb_master_check.handle_spec_deletion(replication_id).await;
	}

	/// Lifecycle id `peer` answered the last discovery with.
	pub async fn peer_lifecycle_id(&self, peer: &str) -> Option<String> {
		self.peer_lifecycles.read().await.get(peer).cloned()
	}

	/// Requests of `opcode` still waiting for their response.
	pub async fn pending_requests(&self, opcode: OpCode) -> usize {
		match self.correlators.get(&opcode) {
			Some(correlator) => correlator.pending_len().await,
			None => 0,
		}
	}

	async fn comm(&self) -> Result<Arc<CommApi>, Error> {
		if self.stop.is_stopped() {
			return Err(Error::Stopped);
		}

		self.comm.lock().await.as_ref().map(Arc::clone).ok_or(Error::Stopped)
	}

	async fn peer_nodes(&self) -> Result<Vec<String>, Error> {
		let backoff = ExponentialBackoff {
			max_elapsed_time: Some(self.config.peer_list_max_elapsed()),
			..ExponentialBackoff::default()
		};

		let topology = &self.services.xdcr_topology_svc;
		backoff::future::retry(backoff, || async move {
			topology.peer_nodes_admin_addrs().await.map_err(|e| {
				debug!(?e, "Peer node list is not available yet;");
				backoff::Error::transient(e)
			})
		})
		.await
		.map_err(|e| Error::PeerList(e.to_string()))
	}

	fn response_callback(maybe_result_tx: Option<oneshot::Sender<ReqRespPair>>) -> ResponseCallback {
		Box::new(move |req, resp| {
			if let Some(result_tx) = maybe_result_tx {
				if result_tx.send(ReqRespPair { req, resp }).is_err() {
					debug!("Response arrived after the results were collected;");
				}
			}
		})
	}

	/// Sends one request, built by `build` from its framing, to every peer
	/// node.
	///
	/// Peers that could not be reached are reported through `opts` like
	/// peers that never answer.
	#[instrument(skip(self, build, opts))]
	pub async fn send_to_each_peer_once<F>(
		&self,
		opcode: OpCode,
		build: F,
		opts: &SendOpts,
	) -> Result<(), Error>
	where
		F: Fn(RequestCommon) -> Request + Send,
	{
		let comm = self.comm().await?;
		let correlator = self
			.correlators
			.get(&opcode)
			.ok_or(Error::InvalidOpcode(opcode))?;

		let my_addr = self.services.xdcr_topology_svc.my_host_addr().await?;
		let peers = self.peer_nodes().await?;
		let peer_lifecycles = self.peer_lifecycles.read().await.clone();

		let mut reqs = Vec::with_capacity(peers.len());
		for peer in &peers {
			let common = RequestCommon::new(opcode, &my_addr, peer, self.codec.next_opaque())
				.with_lifecycle_ids(
					self.lifecycle_id.as_str(),
					peer_lifecycles.get(peer).cloned().unwrap_or_default(),
				);

			let req = build(common);
			if req.opcode() != opcode {
				return Err(Error::UnexpectedMessage(req.opcode()));
			}
			reqs.push(req);
		}

		// Nothing is tracked until every request was built
		for req in &reqs {
			let maybe_result_tx = if opts.is_synchronous() {
				Some(opts.register_target(req.common().target_addr.as_str()).await)
			} else {
				None
			};
			correlator
				.register(req.clone(), Self::response_callback(maybe_result_tx))
				.await;
		}

		let sent = join_all(reqs.iter().map(|req| comm.p2p_send(req))).await;
		for (req, res) in reqs.iter().zip(sent) {
			if let Err(e) = res {
				let target = &req.common().target_addr;
				warn!(%target, ?e, "Failed to send request to peer;");
				correlator.deregister(req.common().opaque).await;
				if opts.is_synchronous() {
					opts.record_send_error(target.as_str(), e).await;
				}
			}
		}

		Ok(())
	}

	/// Learns the lifecycle id of every reachable peer, returns the peers
	/// that could not be discovered.
	pub async fn discover_peers(&self) -> Result<HashMap<String, Error>, Error> {
		let opts = SendOpts::new(true).with_timeout(self.config.response_timeout());
		self.send_to_each_peer_once(
			OpCode::Discovery,
			|common| Request::Discovery(DiscoveryRequest { common }),
			&opts,
		)
		.await?;

		let (results, errors) = opts.get_results().await;

		let mut peer_lifecycles = self.peer_lifecycles.write().await;
		for (peer, ReqRespPair { resp, .. }) in results {
			let lifecycle_id = &resp.common().local_lifecycle_id;
			if !lifecycle_id.is_empty() {
				peer_lifecycles.insert(peer, lifecycle_id.clone());
			}
		}

		Ok(errors)
	}

	/// Asks every peer which of `bucket_vb_map` it owns too, along with the
	/// checkpoints and backfill tasks it holds for them.
	#[instrument(skip(self, bucket_vb_map))]
	pub async fn check_vb_master(
		&self,
		replication_id: &str,
		bucket_vb_map: BucketVbMap,
		pipeline_type: PipelineType,
	) -> Result<VbMasterCheckResults, Error> {
		let spec = self
			.services
			.vb_master_check
			.replication_spec_svc
			.replication_spec(replication_id)
			.await?;

		let opts = SendOpts::new(true).with_timeout(self.config.response_timeout());
		self.send_to_each_peer_once(
			OpCode::VbMasterCheck,
			|common| {
				let mut req = VbMasterCheckReq::new(
					common,
					spec.id.as_str(),
					spec.source_bucket_name.as_str(),
					pipeline_type,
					spec.internal_id.as_str(),
				);
				req.set_bucket_vb_map(bucket_vb_map.clone());
				Request::VbMasterCheck(req)
			},
			&opts,
		)
		.await?;

		let (results, mut errors) = opts.get_results().await;

		let mut responses = HashMap::with_capacity(results.len());
		for (peer, ReqRespPair { resp, .. }) in results {
			match resp {
				Response::VbMasterCheck(resp) => {
					responses.insert(peer, resp);
				}
				other => {
					errors.insert(peer, Error::UnexpectedMessage(other.opcode()));
				}
			}
		}

		Ok((responses, errors))
	}
}
