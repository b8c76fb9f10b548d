use serde::{de::DeserializeOwned, Serialize};

use super::Error;

/// Encodes `value` as JSON and compresses it with the raw Snappy block format.
pub fn compress_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, Error> {
	let json = serde_json::to_vec(value)?;
	snap::raw::Encoder::new()
		.compress_vec(&json)
		.map_err(Into::into)
}

pub fn decompress_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
	let json = snap::raw::Decoder::new().decompress_vec(bytes)?;
	serde_json::from_slice(&json).map_err(Into::into)
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use super::*;

	#[test]
	fn corrupted_input_is_a_compression_error() {
		let res = decompress_json::<BTreeMap<String, u16>>(&[0xff, 0xff, 0xff, 0x01]);
		assert!(matches!(res, Err(Error::Compression(_))));
	}
}
