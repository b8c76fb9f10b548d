#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
	#[error("invalid magic number {0:#x}")]
	InvalidMagic(u32),
	#[error("invalid opcode {0}")]
	InvalidOpcode(u8),
	#[error("message has no opcode for magic {0:#x}")]
	MissingOpcode(u32),
	#[error("compressed payload of {0} bytes decompressed to an empty map")]
	EmptyPayload(usize),
	#[error("vb {vb} is already registered as {existing}")]
	VbAlreadyRegistered { vb: u16, existing: &'static str },
	#[error("serialization error: {0}")]
	Serialization(String),
	#[error(transparent)]
	Metadata(#[from] xdcr_metadata::Error),
}

impl From<serde_json::Error> for Error {
	fn from(e: serde_json::Error) -> Self {
		Self::Serialization(e.to_string())
	}
}
