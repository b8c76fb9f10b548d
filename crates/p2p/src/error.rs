use xdcr_p2p_proto::OpCode;

/// Errors of the peer-to-peer layer.
///
/// Per peer failures of a fan-out are reported in a map next to the
/// successful results, never as a single failure of the whole operation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
	#[error("no receiver is registered for opcode {0}")]
	InvalidOpcode(OpCode),
	#[error("receive channel of opcode {0} is full")]
	ReceiveChanFull(OpCode),
	#[error("peer-to-peer manager is stopping")]
	Stopped,
	#[error("peer {0} did not answer in time")]
	Timeout(String),
	#[error("request for replication {0} is orphaned, the replication no longer exists")]
	OrphanedRequest(String),
	#[error("response from {sender} with opaque {opaque} is stale")]
	StaleResponse { sender: String, opaque: u32 },
	#[error("replication internal id mismatch: ours is {ours}, requester has {theirs}")]
	InternalIdMismatch { ours: String, theirs: String },
	#[error("local bucket topology of replication {0} is not known yet")]
	TopologyUnknown(String),
	#[error("peer node list is unavailable: {0}")]
	PeerList(String),
	#[error("sending to {target} failed: {reason}")]
	Transport { target: String, reason: String },
	#[error("peer {target} answered with http status {status}")]
	HttpStatus { target: String, status: u16 },
	#[error("unexpected {0} message")]
	UnexpectedMessage(OpCode),
	#[error("config error: {0}")]
	Config(String),
	#[error(transparent)]
	Proto(#[from] xdcr_p2p_proto::Error),
	#[error(transparent)]
	Metadata(#[from] xdcr_metadata::Error),
	#[error(transparent)]
	Backfill(#[from] xdcr_backfill::Error),
}
