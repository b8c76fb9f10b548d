use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::{compress_json, decompress_json, CollectionNamespaceMapping, Error};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedMappingRecord {
	pub sha256: String,
	pub compressed_mapping: Vec<u8>,
}

/// Namespace mappings stored once and referenced by their sha256.
///
/// Used both for broken mappings and for the mappings backfill tasks refer to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionNsMappingsDoc {
	pub ns_mapping_records: Vec<CompressedMappingRecord>,
	pub spec_internal_id: String,
}

impl CollectionNsMappingsDoc {
	pub fn from_mappings<'a>(
		mappings: impl IntoIterator<Item = &'a CollectionNamespaceMapping>,
		spec_internal_id: impl Into<String>,
	) -> Result<Self, Error> {
		let mut by_sha = BTreeMap::new();
		for mapping in mappings {
			let sha = mapping.sha256()?;
			if !by_sha.contains_key(&sha) {
				let compressed_mapping = compress_json(mapping)?;
				by_sha.insert(sha, compressed_mapping);
			}
		}

		Ok(Self {
			ns_mapping_records: by_sha
				.into_iter()
				.map(|(sha256, compressed_mapping)| CompressedMappingRecord {
					sha256,
					compressed_mapping,
				})
				.collect(),
			spec_internal_id: spec_internal_id.into(),
		})
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.ns_mapping_records.is_empty()
	}

	pub fn to_sha_map(&self) -> Result<HashMap<String, CollectionNamespaceMapping>, Error> {
		self.ns_mapping_records
			.iter()
			.map(|record| {
				decompress_json(&record.compressed_mapping).map(|mapping| (record.sha256.clone(), mapping))
			})
			.collect()
	}

	/// Same internal id and the same set of sha indexed records.
	#[must_use]
	pub fn same_as(&self, other: &Self) -> bool {
		if self.spec_internal_id != other.spec_internal_id
			|| self.ns_mapping_records.len() != other.ns_mapping_records.len()
		{
			return false;
		}

		let ours = self
			.ns_mapping_records
			.iter()
			.map(|record| record.sha256.as_str())
			.collect::<BTreeSet<_>>();

		other
			.ns_mapping_records
			.iter()
			.all(|record| ours.contains(record.sha256.as_str()))
	}
}
