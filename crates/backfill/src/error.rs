/// Errors answered by backfill request handlers.
///
/// Handlers fan one persistence result out to every coalesced caller, hence
/// `Clone`. A few variants are internal sentinels that the public request
/// APIs translate to success.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
	#[error("backfill request handler is stopping")]
	Stopped,
	#[error("synchronous deletion took place")]
	SyncDeleted,
	#[error("vb {0} was already marked done")]
	VbAlreadyDone(u16),
	#[error("peer node backfill tasks are already merged")]
	PeerTasksAlreadyMerged,
	#[error("unable to merge peer backfill tasks, internal id mismatch: expected {expected} got {got}")]
	InternalIdMismatch { expected: String, got: String },
	#[error("no backfill spec")]
	NoBackfillSpec,
	#[error("vb {0} does not exist")]
	VbNotFound(u16),
	#[error("{0} backfill pipeline cannot be found")]
	BackfillPipelineNotAttached(String),
	#[error("pipeline {0} is not attached")]
	PipelineNotAttached(String),
	#[error("handler {id} attached to {topic} received unregistered vb {vb}")]
	UnregisteredVb { id: String, topic: String, vb: u16 },
	#[error("no backfill is needed")]
	NoBackfillNeeded,
	#[error("replication {0} has no backfill request handler")]
	HandlerNotFound(String),
	#[error("garbage collection is running for {0}")]
	UndergoingGc(String),
	#[error("garbage collection found nothing to remove for {0}")]
	NothingToCollect(String),
	#[error("peer {node} answered with an error: {msg}")]
	Peer { node: String, msg: String },
	#[error("invalid input: {0}")]
	InvalidInput(String),
	#[error("config error: {0}")]
	Config(String),
	#[error(transparent)]
	Metadata(#[from] xdcr_metadata::Error),
}

impl Error {
	/// Outcomes of a background cleanup that only mean someone got there first.
	pub(crate) const fn is_already_cleaned_up(&self) -> bool {
		matches!(self, Self::VbNotFound(_) | Self::SyncDeleted | Self::NoBackfillSpec)
	}
}
