use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{
	spawn,
	sync::Mutex,
	task::AbortHandle,
	time::sleep,
};
use tracing::{debug, warn};
use xdcr_p2p_proto::{Request, Response};

use super::Error;

/// Invoked with the request and its response once the response arrives.
pub type ResponseCallback = Box<dyn FnOnce(Request, Response) + Send>;

struct PendingRequest {
	req: Request,
	callback: ResponseCallback,
	expiry: AbortHandle,
}

/// Requests sent by this process that still wait for their response, keyed
/// by opaque.
///
/// Every entry is dropped either when its response arrives or once the
/// response timeout elapsed, whichever comes first.
pub(crate) struct Correlator {
	lifecycle_id: String,
	timeout: Duration,
	pending: Arc<Mutex<HashMap<u32, PendingRequest>>>,
}

impl Correlator {
	pub(crate) fn new(lifecycle_id: impl Into<String>, timeout: Duration) -> Self {
		Self {
			lifecycle_id: lifecycle_id.into(),
			timeout,
			pending: Arc::default(),
		}
	}

	pub(crate) fn lifecycle_id(&self) -> &str {
		&self.lifecycle_id
	}

	/// Must be called before `req` leaves the process, a fast peer could
	/// answer before a late registration.
	pub(crate) async fn register(&self, req: Request, callback: ResponseCallback) {
		let opaque = req.common().opaque;
		let mut pending = self.pending.lock().await;

		let expiry = spawn({
			let pending = Arc::clone(&self.pending);
			let timeout = self.timeout;
			async move {
				sleep(timeout).await;
				if let Some(expired) = pending.lock().await.remove(&opaque) {
					debug!(
						opaque,
						target = %expired.req.common().target_addr,
						"Request expired without a response;"
					);
				}
			}
		})
		.abort_handle();

		if let Some(replaced) = pending.insert(
			opaque,
			PendingRequest {
				req,
				callback,
				expiry,
			},
		) {
			replaced.expiry.abort();
			warn!(opaque, "Opaque reused while its request was still pending;");
		}
	}

	pub(crate) async fn deregister(&self, opaque: u32) {
		if let Some(removed) = self.pending.lock().await.remove(&opaque) {
			removed.expiry.abort();
		}
	}

	/// Pairs `resp` with its pending request and runs the request callback.
	///
	/// Responses addressed to an earlier incarnation of this process are
	/// refused, responses arriving after expiry are dropped silently.
	pub(crate) async fn handle_response(&self, resp: Response) -> Result<(), Error> {
		let common = resp.common();
		if common.is_stale_for(&self.lifecycle_id) {
			return Err(Error::StaleResponse {
				sender: common.sender.clone(),
				opaque: common.opaque,
			});
		}

		let opaque = common.opaque;
		let Some(PendingRequest {
			req,
			callback,
			expiry,
		}) = self.pending.lock().await.remove(&opaque)
		else {
			debug!(opaque, sender = %common.sender, "Response arrived after its request expired;");
			return Ok(());
		};

		expiry.abort();
		callback(req, resp);

		Ok(())
	}

	pub(crate) async fn pending_len(&self) -> usize {
		self.pending.lock().await.len()
	}
}
