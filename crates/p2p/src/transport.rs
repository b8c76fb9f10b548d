use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
	body::Bytes,
	extract::State,
	http::StatusCode,
	routing::post,
	Router,
};
use reqwest::header::CONTENT_TYPE;
use tracing::warn;

use super::{CommApi, Error};

/// Delivers an encoded message to a peer node.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
	async fn post(&self, target: &str, body: Vec<u8>) -> Result<(), Error>;
}

/// Plain HTTP POST of the JSON envelope to the peer path of the target.
#[derive(Debug, Clone)]
pub struct HttpTransport {
	client: reqwest::Client,
	peer_path: String,
}

impl HttpTransport {
	pub fn new(peer_path: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| Error::Config(e.to_string()))?;

		Ok(Self {
			client,
			peer_path: peer_path.into(),
		})
	}
}

#[async_trait]
impl Transport for HttpTransport {
	async fn post(&self, target: &str, body: Vec<u8>) -> Result<(), Error> {
		let url = format!("http://{target}{}", self.peer_path);

		let resp = self
			.client
			.post(url)
			.header(CONTENT_TYPE, "application/json")
			.body(body)
			.send()
			.await
			.map_err(|e| Error::Transport {
				target: target.to_string(),
				reason: e.to_string(),
			})?;

		let status = resp.status();
		if status.is_success() {
			Ok(())
		} else {
			Err(Error::HttpStatus {
				target: target.to_string(),
				status: status.as_u16(),
			})
		}
	}
}

/// Route accepting messages posted by peers at `peer_path`.
pub fn router(comm: Arc<CommApi>, peer_path: &str) -> Router {
	Router::new()
		.route(peer_path, post(receive))
		.with_state(comm)
}

async fn receive(State(comm): State<Arc<CommApi>>, body: Bytes) -> (StatusCode, String) {
	match comm.receive_bytes(&body) {
		Ok(()) => (StatusCode::OK, String::new()),
		Err(e) => {
			warn!(?e, "Failed to receive peer message;");
			let status = match e {
				Error::Proto(_) | Error::InvalidOpcode(_) => StatusCode::BAD_REQUEST,
				Error::ReceiveChanFull(_) | Error::Stopped => StatusCode::SERVICE_UNAVAILABLE,
				_ => StatusCode::INTERNAL_SERVER_ERROR,
			};
			(status, e.to_string())
		}
	}
}
