use std::{
	collections::{BTreeMap, BTreeSet},
	fmt,
	str::FromStr,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::Error;

const SCOPE_COLLECTION_DELIMITER: char = '.';

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollectionNamespace {
	pub scope: String,
	pub collection: String,
}

impl CollectionNamespace {
	pub fn new(scope: impl Into<String>, collection: impl Into<String>) -> Self {
		Self {
			scope: scope.into(),
			collection: collection.into(),
		}
	}
}

impl fmt::Display for CollectionNamespace {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{}{SCOPE_COLLECTION_DELIMITER}{}",
			self.scope, self.collection
		)
	}
}

impl FromStr for CollectionNamespace {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.split_once(SCOPE_COLLECTION_DELIMITER) {
			Some((scope, collection)) if !scope.is_empty() && !collection.is_empty() => {
				Ok(Self::new(scope, collection))
			}
			_ => Err(Error::InvalidInput(format!(
				"\"{s}\" is not a scope{SCOPE_COLLECTION_DELIMITER}collection namespace"
			))),
		}
	}
}

#[derive(Serialize, Deserialize)]
pub struct MappingEntry {
	source: CollectionNamespace,
	targets: Vec<CollectionNamespace>,
}

/// Source collection to the set of target collections it replicates into.
///
/// Sources never map to an empty target set; removing the last target of a
/// source removes the source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<MappingEntry>", into = "Vec<MappingEntry>")]
pub struct CollectionNamespaceMapping(BTreeMap<CollectionNamespace, BTreeSet<CollectionNamespace>>);

impl CollectionNamespaceMapping {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Every namespace maps onto the namespace with the same name on the target.
	pub fn implicit(namespaces: impl IntoIterator<Item = CollectionNamespace>) -> Self {
		let mut mapping = Self::new();
		for namespace in namespaces {
			mapping.add(namespace.clone(), namespace);
		}
		mapping
	}

	pub fn add(&mut self, source: CollectionNamespace, target: CollectionNamespace) {
		self.0.entry(source).or_default().insert(target);
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.0.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn sources(&self) -> impl Iterator<Item = &CollectionNamespace> {
		self.0.keys()
	}

	pub fn iter(
		&self,
	) -> impl Iterator<Item = (&CollectionNamespace, &BTreeSet<CollectionNamespace>)> {
		self.0.iter()
	}

	#[must_use]
	pub fn contains_source(&self, source: &CollectionNamespace) -> bool {
		self.0.contains_key(source)
	}

	/// True if every source -> target pair of `other` is present here.
	#[must_use]
	pub fn contains(&self, other: &Self) -> bool {
		other.0.iter().all(|(source, targets)| {
			self.0
				.get(source)
				.is_some_and(|ours| targets.is_subset(ours))
		})
	}

	pub fn merge_from(&mut self, other: &Self) {
		for (source, targets) in &other.0 {
			self.0
				.entry(source.clone())
				.or_default()
				.extend(targets.iter().cloned());
		}
	}

	/// Removes every source -> target pair of `other`.
	pub fn remove(&mut self, other: &Self) {
		for (source, targets) in &other.0 {
			if let Some(ours) = self.0.get_mut(source) {
				ours.retain(|target| !targets.contains(target));
				if ours.is_empty() {
					self.0.remove(source);
				}
			}
		}
	}

	pub fn remove_source(&mut self, source: &CollectionNamespace) -> bool {
		self.0.remove(source).is_some()
	}

	/// Hex encoded sha256 of the canonical JSON encoding.
	pub fn sha256(&self) -> Result<String, Error> {
		let json = serde_json::to_vec(self)?;
		Ok(hex::encode(Sha256::digest(&json)))
	}
}

impl fmt::Display for CollectionNamespaceMapping {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("{")?;
		for (i, (source, targets)) in self.0.iter().enumerate() {
			if i > 0 {
				f.write_str(", ")?;
			}
			write!(f, "{source} -> [")?;
			for (j, target) in targets.iter().enumerate() {
				if j > 0 {
					f.write_str(", ")?;
				}
				write!(f, "{target}")?;
			}
			f.write_str("]")?;
		}
		f.write_str("}")
	}
}

impl From<Vec<MappingEntry>> for CollectionNamespaceMapping {
	fn from(entries: Vec<MappingEntry>) -> Self {
		let mut mapping = Self::new();
		for MappingEntry { source, targets } in entries {
			for target in targets {
				mapping.add(source.clone(), target);
			}
		}
		mapping
	}
}

impl From<CollectionNamespaceMapping> for Vec<MappingEntry> {
	fn from(mapping: CollectionNamespaceMapping) -> Self {
		mapping
			.0
			.into_iter()
			.map(|(source, targets)| MappingEntry {
				source,
				targets: targets.into_iter().collect(),
			})
			.collect()
	}
}

/// Mapping changes raised when explicit mapping rules are edited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionNamespaceMappingsDiffPair {
	pub added: CollectionNamespaceMapping,
	pub removed: CollectionNamespaceMapping,
}

impl CollectionNamespaceMappingsDiffPair {
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.added.is_empty() && self.removed.is_empty()
	}
}
