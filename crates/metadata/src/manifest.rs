use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{CollectionNamespace, Error};

/// Collection manifests of a bucket keyed by manifest uid.
pub type ManifestsCache = BTreeMap<u64, CollectionsManifest>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
	pub uid: u64,
	/// Collection name to collection uid.
	pub collections: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionsManifest {
	pub uid: u64,
	pub scopes: BTreeMap<String, Scope>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDiff {
	pub added: Vec<CollectionNamespace>,
	pub removed: Vec<CollectionNamespace>,
}

impl ManifestDiff {
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.added.is_empty() && self.removed.is_empty()
	}
}

// Shape returned by the server's collections manifest endpoint, uids are hex.
#[derive(Deserialize)]
struct ServerManifest {
	uid: String,
	scopes: Vec<ServerScope>,
}

#[derive(Deserialize)]
struct ServerScope {
	name: String,
	uid: String,
	collections: Vec<ServerCollection>,
}

#[derive(Deserialize)]
struct ServerCollection {
	name: String,
	uid: String,
}

fn parse_hex_uid(uid: &str) -> Result<u64, Error> {
	u64::from_str_radix(uid, 16)
		.map_err(|e| Error::InvalidInput(format!("invalid manifest uid \"{uid}\": {e}")))
}

impl Default for CollectionsManifest {
	/// Manifest of a bucket that never had collections created.
	fn default() -> Self {
		Self {
			uid: 0,
			scopes: BTreeMap::from([(
				"_default".to_string(),
				Scope {
					uid: 0,
					collections: BTreeMap::from([("_default".to_string(), 0)]),
				},
			)]),
		}
	}
}

impl CollectionsManifest {
	pub fn from_server_json(bytes: &[u8]) -> Result<Self, Error> {
		let raw: ServerManifest = serde_json::from_slice(bytes)?;

		let mut scopes = BTreeMap::new();
		for scope in raw.scopes {
			let mut collections = BTreeMap::new();
			for collection in scope.collections {
				collections.insert(collection.name, parse_hex_uid(&collection.uid)?);
			}
			scopes.insert(
				scope.name,
				Scope {
					uid: parse_hex_uid(&scope.uid)?,
					collections,
				},
			);
		}

		Ok(Self {
			uid: parse_hex_uid(&raw.uid)?,
			scopes,
		})
	}

	fn namespaces(&self) -> BTreeMap<CollectionNamespace, u64> {
		self.scopes
			.iter()
			.flat_map(|(scope_name, scope)| {
				scope.collections.iter().map(move |(name, uid)| {
					(CollectionNamespace::new(scope_name.clone(), name.clone()), *uid)
				})
			})
			.collect()
	}

	#[must_use]
	pub fn namespace_set(&self) -> BTreeSet<CollectionNamespace> {
		self.namespaces().into_keys().collect()
	}

	#[must_use]
	pub fn contains(&self, namespace: &CollectionNamespace) -> bool {
		self.scopes
			.get(&namespace.scope)
			.is_some_and(|scope| scope.collections.contains_key(&namespace.collection))
	}

	/// Collections added and removed going from `older` to `self`.
	///
	/// A collection that was dropped and re-created under the same name shows
	/// up in both lists.
	#[must_use]
	pub fn diff(&self, older: &Self) -> ManifestDiff {
		let ours = self.namespaces();
		let theirs = older.namespaces();

		let added = ours
			.iter()
			.filter(|(namespace, uid)| theirs.get(*namespace) != Some(*uid))
			.map(|(namespace, _)| namespace.clone())
			.collect();

		let removed = theirs
			.iter()
			.filter(|(namespace, uid)| ours.get(*namespace) != Some(*uid))
			.map(|(namespace, _)| namespace.clone())
			.collect();

		ManifestDiff { added, removed }
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	const V7: &[u8] = include_bytes!("../testdata/provisionedManifest.json");
	const V9A: &[u8] = include_bytes!("../testdata/provisionedManifestv9a.json");

	#[test]
	fn parse_server_manifest() {
		let manifest = CollectionsManifest::from_server_json(V7).expect("manifest");

		assert_eq!(manifest.uid, 7);
		assert!(manifest.contains(&CollectionNamespace::new("S2", "col2")));
		assert!(manifest.contains(&CollectionNamespace::new("_default", "_default")));
	}

	#[test]
	fn diff_reports_removed_collection() {
		let v7 = CollectionsManifest::from_server_json(V7).expect("manifest");
		let v9a = CollectionsManifest::from_server_json(V9A).expect("manifest");

		let diff = v9a.diff(&v7);

		assert_eq!(diff.removed, vec![CollectionNamespace::new("S2", "col2")]);
		assert!(diff.added.is_empty());
		assert!(v7.diff(&v7).is_empty());
	}

	#[test]
	fn default_manifest_only_has_default_collection() {
		let default = CollectionsManifest::default();
		let v7 = CollectionsManifest::from_server_json(V7).expect("manifest");

		let diff = v7.diff(&default);
		assert!(diff.removed.is_empty());
		assert!(diff.added.contains(&CollectionNamespace::new("S1", "col1")));
	}
}
