use serde::{Deserialize, Serialize};

use super::{CollectionNamespace, CollectionNamespaceMapping, Error};

/// Source and target collection manifest ids a timestamp was taken under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestIds {
	pub source: u64,
	pub target: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VbTimestamp {
	pub vb: u16,
	pub seqno: u64,
	pub vbuuid: u64,
	pub manifest_ids: ManifestIds,
}

impl VbTimestamp {
	#[must_use]
	pub const fn at_seqno(vb: u16, seqno: u64) -> Self {
		Self {
			vb,
			seqno,
			vbuuid: 0,
			manifest_ids: ManifestIds {
				source: 0,
				target: 0,
			},
		}
	}
}

#[derive(Deserialize)]
struct RawBackfillTask {
	start: VbTimestamp,
	end: VbTimestamp,
	mappings: CollectionNamespaceMapping,
}

/// A seqno range of one vbucket that has to be re-streamed for `mappings`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawBackfillTask")]
pub struct BackfillTask {
	start: VbTimestamp,
	end: VbTimestamp,
	mappings: CollectionNamespaceMapping,
}

impl TryFrom<RawBackfillTask> for BackfillTask {
	type Error = Error;

	fn try_from(
		RawBackfillTask {
			start,
			end,
			mappings,
		}: RawBackfillTask,
	) -> Result<Self, Self::Error> {
		Self::new(start, end, mappings)
	}
}

impl BackfillTask {
	pub fn new(
		start: VbTimestamp,
		end: VbTimestamp,
		mappings: CollectionNamespaceMapping,
	) -> Result<Self, Error> {
		if start.vb != end.vb {
			return Err(Error::InvalidInput(format!(
				"backfill task spans two vbuckets: {} and {}",
				start.vb, end.vb
			)));
		}

		if end.seqno < start.seqno {
			return Err(Error::InvalidInput(format!(
				"backfill task for vb {} ends at {} before it starts at {}",
				start.vb, end.seqno, start.seqno
			)));
		}

		Ok(Self {
			start,
			end,
			mappings,
		})
	}

	#[must_use]
	pub const fn vb(&self) -> u16 {
		self.start.vb
	}

	#[must_use]
	pub const fn start(&self) -> &VbTimestamp {
		&self.start
	}

	#[must_use]
	pub const fn end(&self) -> &VbTimestamp {
		&self.end
	}

	#[must_use]
	pub const fn mappings(&self) -> &CollectionNamespaceMapping {
		&self.mappings
	}

	fn same_range(&self, other: &Self) -> bool {
		self.start.seqno == other.start.seqno && self.end.seqno == other.end.seqno
	}

	fn covers_range(&self, other: &Self) -> bool {
		self.start.seqno <= other.start.seqno && self.end.seqno >= other.end.seqno
	}

	/// This task already re-streams everything `other` asks for.
	#[must_use]
	pub fn contains(&self, other: &Self) -> bool {
		self.covers_range(other) && self.mappings.contains(&other.mappings)
	}

	fn widen(&mut self, other: &Self) {
		if other.start.seqno < self.start.seqno {
			self.start = other.start;
		}
		if other.end.seqno > self.end.seqno {
			self.end = other.end;
		}
		self.mappings.merge_from(&other.mappings);
	}
}

/// Ordered tasks of one vbucket. Only the first one is being streamed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackfillTasks(Vec<BackfillTask>);

impl BackfillTasks {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.0.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	#[must_use]
	pub fn first(&self) -> Option<&BackfillTask> {
		self.0.first()
	}

	pub fn iter(&self) -> impl Iterator<Item = &BackfillTask> {
		self.0.iter()
	}

	pub fn push(&mut self, task: BackfillTask) {
		self.0.push(task);
	}

	/// Merges one incoming task.
	///
	/// When `skip_first` is false the first task has not started streaming yet,
	/// so it absorbs the incoming range and mappings. Otherwise the first task is
	/// left alone and the incoming one joins a later task with the same range or
	/// is queued at the end.
	pub fn merge_task(&mut self, task: &BackfillTask, skip_first: bool) {
		if self.0.is_empty() {
			self.0.push(task.clone());
			return;
		}

		if !skip_first {
			self.0[0].widen(task);
			return;
		}

		if let Some(existing) = self
			.0
			.iter_mut()
			.skip(1)
			.find(|existing| existing.same_range(task))
		{
			existing.mappings.merge_from(&task.mappings);
			return;
		}

		self.0.push(task.clone());
	}

	pub fn merge(&mut self, incoming: &Self, skip_first: bool) {
		for task in &incoming.0 {
			self.merge_task(task, skip_first);
		}
	}

	#[must_use]
	pub fn contains(&self, other: &Self) -> bool {
		other
			.0
			.iter()
			.all(|theirs| self.0.iter().any(|ours| ours.contains(theirs)))
	}

	/// Drops `mappings` from every task, removing tasks left with nothing to do.
	pub fn remove_namespace_mappings(&mut self, mappings: &CollectionNamespaceMapping) {
		for task in &mut self.0 {
			task.mappings.remove(mappings);
		}
		self.0.retain(|task| !task.mappings.is_empty());
	}

	pub fn remove_source_namespace(&mut self, source: &CollectionNamespace) {
		for task in &mut self.0 {
			task.mappings.remove_source(source);
		}
		self.0.retain(|task| !task.mappings.is_empty());
	}

	pub fn pop_first(&mut self) -> Option<BackfillTask> {
		if self.0.is_empty() {
			None
		} else {
			Some(self.0.remove(0))
		}
	}
}
