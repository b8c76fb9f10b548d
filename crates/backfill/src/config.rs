use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::Error;

/// Tunables of the backfill manager and its request handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
	/// Minimum time between two batched writes of a backfill spec
	pub persist_interval_ms: u64,

	/// Period of the background retry of failed backfill requests
	pub retry_interval_ms: u64,

	/// Delay before tasks of a vbucket this node lost are garbage collected
	pub vb_gc_interval_ms: u64,

	/// Period of the garbage collection scan
	pub gc_scan_interval_ms: u64,

	/// Pending collections of vbuckets that are owned again are dropped after this long
	pub gc_prune_window_ms: u64,

	/// Capacity of the local bucket topology feed
	pub topology_chan_len: usize,
}

impl Default for BackfillConfig {
	fn default() -> Self {
		Self {
			persist_interval_ms: 1000,
			retry_interval_ms: 1000,
			vb_gc_interval_ms: 30_000,
			gc_scan_interval_ms: 1000,
			gc_prune_window_ms: 5 * 60 * 1000,
			topology_chan_len: 10,
		}
	}
}

impl BackfillConfig {
	/// Loads the config at `path`, falling back to defaults when there is none.
	pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Error> {
		let path = path.as_ref();

		if !path.exists() {
			warn!(?path, "No backfill config found, using defaults;");
			return Ok(Self::default());
		}

		info!(?path, "Loading backfill config;");
		let json = fs::read_to_string(path).map_err(|e| Error::Config(e.to_string()))?;
		serde_json::from_str(&json).map_err(|e| Error::Config(e.to_string()))
	}

	#[must_use]
	pub const fn persist_interval(&self) -> Duration {
		Duration::from_millis(self.persist_interval_ms)
	}

	#[must_use]
	pub const fn retry_interval(&self) -> Duration {
		Duration::from_millis(self.retry_interval_ms)
	}

	#[must_use]
	pub const fn vb_gc_interval(&self) -> Duration {
		Duration::from_millis(self.vb_gc_interval_ms)
	}

	#[must_use]
	pub const fn gc_scan_interval(&self) -> Duration {
		Duration::from_millis(self.gc_scan_interval_ms)
	}

	#[must_use]
	pub const fn gc_prune_window(&self) -> Duration {
		Duration::from_millis(self.gc_prune_window_ms)
	}
}
