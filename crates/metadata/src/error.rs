#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
	#[error("metadata not found: {0}")]
	NotFound(String),
	#[error("metadata already exists: {0}")]
	AlreadyExists(String),
	#[error("metadata store unavailable: {0}")]
	Unavailable(String),
	#[error("invalid input: {0}")]
	InvalidInput(String),
	#[error("serialization error: {0}")]
	Serialization(String),
	#[error("compression error: {0}")]
	Compression(String),
}

impl From<serde_json::Error> for Error {
	fn from(e: serde_json::Error) -> Self {
		Self::Serialization(e.to_string())
	}
}

impl From<snap::Error> for Error {
	fn from(e: snap::Error) -> Self {
		Self::Compression(e.to_string())
	}
}
