use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::Error;

/// Tunables of the peer-to-peer manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pConfig {
	/// How long a sent request waits for its response before it is forgotten
	pub response_timeout_ms: u64,

	/// Capacity of the receive channel of every opcode
	pub receive_chan_len: usize,

	/// HTTP path peers post their messages to
	pub peer_path: String,

	/// Budget for resolving the peer node list before giving up
	pub peer_list_max_elapsed_ms: u64,
}

impl Default for P2pConfig {
	fn default() -> Self {
		Self {
			response_timeout_ms: 30_000,
			receive_chan_len: 1000,
			peer_path: "/xdcr/p2p".to_string(),
			peer_list_max_elapsed_ms: 10_000,
		}
	}
}

impl P2pConfig {
	/// Loads the config at `path`, falling back to defaults when there is none.
	pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Error> {
		let path = path.as_ref();

		if !path.exists() {
			warn!(?path, "No p2p config found, using defaults;");
			return Ok(Self::default());
		}

		info!(?path, "Loading p2p config;");
		let json = fs::read_to_string(path).map_err(|e| Error::Config(e.to_string()))?;
		serde_json::from_str(&json).map_err(|e| Error::Config(e.to_string()))
	}

	#[must_use]
	pub const fn response_timeout(&self) -> Duration {
		Duration::from_millis(self.response_timeout_ms)
	}

	#[must_use]
	pub const fn peer_list_max_elapsed(&self) -> Duration {
		Duration::from_millis(self.peer_list_max_elapsed_ms)
	}
}
