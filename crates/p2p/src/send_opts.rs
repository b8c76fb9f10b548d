use std::{collections::HashMap, time::Duration};

use futures::future::join_all;
use tokio::{
	sync::{oneshot, Mutex},
	time::{timeout_at, Instant},
};
use xdcr_p2p_proto::{Request, Response};

use super::Error;

const DEFAULT_RESULTS_TIMEOUT: Duration = Duration::from_secs(30);

/// A request and the response a peer gave to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReqRespPair {
	pub req: Request,
	pub resp: Response,
}

/// Options of one fan-out, and the place its responses are collected in.
///
/// The map of per target channels has its own lock, independent of the
/// pending request bookkeeping of the receivers.
#[derive(Debug)]
pub struct SendOpts {
	synchronous: bool,
	timeout: Duration,
	resp_map: Mutex<HashMap<String, oneshot::Receiver<ReqRespPair>>>,
	send_errors: Mutex<HashMap<String, Error>>,
}

impl SendOpts {
	/// Asynchronous fan-outs do not collect responses at all.
	#[must_use]
	pub fn new(synchronous: bool) -> Self {
		Self {
			synchronous,
			timeout: DEFAULT_RESULTS_TIMEOUT,
			resp_map: Mutex::default(),
			send_errors: Mutex::default(),
		}
	}

	#[must_use]
	pub const fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	#[must_use]
	pub const fn is_synchronous(&self) -> bool {
		self.synchronous
	}

	/// Opens the channel the response of `target` is delivered on.
	pub async fn register_target(&self, target: impl Into<String>) -> oneshot::Sender<ReqRespPair> {
		let (tx, rx) = oneshot::channel();
		self.resp_map.lock().await.insert(target.into(), rx);
		tx
	}

	pub(crate) async fn record_send_error(&self, target: impl Into<String>, e: Error) {
		self.send_errors.lock().await.insert(target.into(), e);
	}

	/// Waits for every registered target, at most until the timeout elapsed.
	///
	/// Every target ends up in exactly one of the two maps; targets that did
	/// not answer in time are reported as [`Error::Timeout`].
	pub async fn get_results(&self) -> (HashMap<String, ReqRespPair>, HashMap<String, Error>) {
		let deadline = Instant::now() + self.timeout;
		let receivers = self.resp_map.lock().await.drain().collect::<Vec<_>>();
		let mut errors = std::mem::take(&mut *self.send_errors.lock().await);

		let outcomes = join_all(
			receivers
				.into_iter()
				.map(|(target, rx)| async move { (target, timeout_at(deadline, rx).await) }),
		)
		.await;

		let mut results = HashMap::with_capacity(outcomes.len());
		for (target, outcome) in outcomes {
			match outcome {
				Ok(Ok(pair)) => {
					errors.remove(&target);
					results.insert(target, pair);
				}
				// Closed channels belong to expired or failed sends
				Ok(Err(_)) | Err(_) => {
					errors
						.entry(target.clone())
						.or_insert(Error::Timeout(target));
				}
			}
		}

		(results, errors)
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use xdcr_p2p_proto::{DiscoveryRequest, OpCode, RequestCommon};

	use super::*;

	fn pair(target: &str) -> ReqRespPair {
		let req = Request::Discovery(DiscoveryRequest {
			common: RequestCommon::new(OpCode::Discovery, "me", target, 0),
		});
		let resp = req.generate_response();
		ReqRespPair { req, resp }
	}

	#[tokio::test]
	async fn silent_targets_time_out_every_time() {
		for _ in 0..50 {
			let opts = SendOpts::new(true).with_timeout(Duration::from_millis(25));
			let _senders = [
				opts.register_target("testhost1").await,
				opts.register_target("testhost2").await,
				opts.register_target("testhost3").await,
			];

			let (results, errors) = opts.get_results().await;

			assert!(results.is_empty());
			assert_eq!(errors.len(), 3);
			assert_eq!(
				errors.get("testhost2"),
				Some(&Error::Timeout("testhost2".to_string()))
			);
		}
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn answers_race_with_aggregation() {
		for _ in 0..50 {
			let opts = SendOpts::new(true).with_timeout(Duration::from_millis(25));
			let answering = opts.register_target("testhost1").await;
			let _silent = [
				opts.register_target("testhost2").await,
				opts.register_target("testhost3").await,
			];

			let answer = tokio::spawn(async move {
				let _ = answering.send(pair("testhost1"));
			});
			let (results, errors) = opts.get_results().await;
			answer.await.expect("no panic");

			assert_eq!(results.len() + errors.len(), 3);
			assert_eq!(results.get("testhost1"), Some(&pair("testhost1")));
			assert_eq!(errors.len(), 2);
		}
	}

	#[tokio::test]
	async fn send_failures_keep_their_cause() {
		let opts = SendOpts::new(true).with_timeout(Duration::from_millis(25));
		drop(opts.register_target("down").await);
		let failure = Error::HttpStatus {
			target: "down".to_string(),
			status: 503,
		};
		opts.record_send_error("down", failure.clone()).await;

		let (results, errors) = opts.get_results().await;

		assert!(results.is_empty());
		assert_eq!(errors, HashMap::from([("down".to_string(), failure)]));
	}
}
