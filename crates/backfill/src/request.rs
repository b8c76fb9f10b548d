use tokio::sync::oneshot;
use xdcr_metadata::{
	BackfillReplicationSpec, CollectionNamespaceMapping, CollectionNamespaceMappingsDiffPair,
};

use super::Error;

/// Everything a backfill request handler can be asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
	/// Backfill these namespaces for every owned vbucket.
	NewMapping(CollectionNamespaceMapping),
	/// Explicit mapping edit: backfill what was added, forget what was removed.
	DiffPair(CollectionNamespaceMappingsDiffPair),
	/// The backfill pipeline finished streaming the current task of a vbucket.
	PartitionDone(u16),
	DeleteOne(u16),
	DeleteAll,
	PeerMerge(PeerMergeRequest),
	VbDiff(VbDiffRequest),
}

/// The latest complete backfill request known to the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompleteRequest {
	Mapping(CollectionNamespaceMapping),
	DiffPair(CollectionNamespaceMappingsDiffPair),
}

/// Backfill tasks a peer node handed over for vbuckets this node now owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerMergeRequest {
	pub node_name: String,
	pub backfill_spec: BackfillReplicationSpec,
}

/// Raised by the handler itself when the set of owned vbuckets changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VbDiffRequest {
	pub added_vbs: Vec<u16>,
	pub removed_vbs: Vec<u16>,
	pub request: CompleteRequest,
}

/// Routing information a main pipeline router sends on a broken or fixed mapping.
///
/// Either the implicit backfill map or the explicit diff pair is expected to be set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingUpdate {
	pub backfill_map: CollectionNamespaceMapping,
	pub explicit_map: CollectionNamespaceMappingsDiffPair,
}

impl RoutingUpdate {
	pub(crate) fn into_request(self) -> Result<Request, Error> {
		if !self.backfill_map.is_empty() {
			Ok(Request::NewMapping(self.backfill_map))
		} else if !self.explicit_map.is_empty() {
			Ok(Request::DiffPair(self.explicit_map))
		} else {
			Err(Error::InvalidInput(
				"routing update carries no backfill mapping".to_string(),
			))
		}
	}
}

pub(crate) type Responder = oneshot::Sender<Result<(), Error>>;

/// A request travelling to the handler loop along with the two channels its
/// caller waits on: first the handling result, then the persistence result.
#[derive(Debug)]
pub(crate) struct ReqAndResp {
	pub(crate) request: Request,
	pub(crate) handle_tx: Responder,
	pub(crate) persist_tx: Responder,
	pub(crate) force: bool,
}

impl ReqAndResp {
	pub(crate) fn new(
		request: Request,
		force: bool,
	) -> (
		Self,
		oneshot::Receiver<Result<(), Error>>,
		oneshot::Receiver<Result<(), Error>>,
	) {
		let (handle_tx, handle_rx) = oneshot::channel();
		let (persist_tx, persist_rx) = oneshot::channel();

		(
			Self {
				request,
				handle_tx,
				persist_tx,
				force,
			},
			handle_rx,
			persist_rx,
		)
	}
}
