use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::{
	BackfillTask, BackfillTasks, CollectionNamespace, CollectionNamespaceMapping, Error,
	VbTimestamp,
};

/// Backfill tasks of every vbucket that still has work to do.
///
/// An entry with an empty task list is never kept around.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
	from = "BTreeMap<u16, BackfillTasks>",
	into = "BTreeMap<u16, BackfillTasks>"
)]
pub struct VbTasksMap(BTreeMap<u16, BackfillTasks>);

impl From<BTreeMap<u16, BackfillTasks>> for VbTasksMap {
	fn from(mut map: BTreeMap<u16, BackfillTasks>) -> Self {
		map.retain(|_, tasks| !tasks.is_empty());
		Self(map)
	}
}

impl From<VbTasksMap> for BTreeMap<u16, BackfillTasks> {
	fn from(map: VbTasksMap) -> Self {
		map.0
	}
}

impl VbTasksMap {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// One task per vbucket in `vbs`, from seqno 0 up to the vbucket's entry in
	/// `end_seqnos`. Vbuckets without an end seqno are left out.
	pub fn new_from_mapping(
		mapping: &CollectionNamespaceMapping,
		vbs: &[u16],
		end_seqnos: &HashMap<u16, u64>,
	) -> Result<Self, Error> {
		if mapping.is_empty() {
			return Err(Error::InvalidInput(
				"cannot create backfill tasks for an empty namespace mapping".to_string(),
			));
		}

		let mut map = Self::new();
		for &vb in vbs {
			let Some(&end) = end_seqnos.get(&vb) else {
				continue;
			};

			let task = BackfillTask::new(
				VbTimestamp::at_seqno(vb, 0),
				VbTimestamp::at_seqno(vb, end),
				mapping.clone(),
			)?;

			map.0.entry(vb).or_default().push(task);
		}

		Ok(map)
	}

	/// Number of vbuckets with at least one task.
	#[must_use]
	pub fn len(&self) -> usize {
		self.0.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	#[must_use]
	pub fn get(&self, vb: u16) -> Option<&BackfillTasks> {
		self.0.get(&vb)
	}

	pub fn iter(&self) -> impl Iterator<Item = (u16, &BackfillTasks)> {
		self.0.iter().map(|(vb, tasks)| (*vb, tasks))
	}

	#[must_use]
	pub fn vbs(&self) -> Vec<u16> {
		self.0.keys().copied().collect()
	}

	pub fn insert(&mut self, vb: u16, tasks: BackfillTasks) {
		if tasks.is_empty() {
			self.0.remove(&vb);
		} else {
			self.0.insert(vb, tasks);
		}
	}

	pub fn remove_vb(&mut self, vb: u16) -> Option<BackfillTasks> {
		self.0.remove(&vb)
	}

	#[must_use]
	pub fn contains_at_least_one_task(&self) -> bool {
		self.0.values().any(|tasks| !tasks.is_empty())
	}

	#[must_use]
	pub fn contains_at_least_one_task_for_vbs(&self, vbs: &[u16]) -> bool {
		vbs.iter()
			.any(|vb| self.0.get(vb).is_some_and(|tasks| !tasks.is_empty()))
	}

	/// Every task of `other` is already covered by a task here.
	#[must_use]
	pub fn contains(&self, other: &Self) -> bool {
		other.0.iter().all(|(vb, theirs)| {
			self.0
				.get(vb)
				.is_some_and(|ours| ours.contains(theirs))
		})
	}

	pub fn merge(&mut self, other: &Self, skip_first: bool) {
		for (vb, theirs) in &other.0 {
			self.0.entry(*vb).or_default().merge(theirs, skip_first);
		}
		self.prune();
	}

	pub fn remove_namespace_mappings(&mut self, mappings: &CollectionNamespaceMapping) {
		for tasks in self.0.values_mut() {
			tasks.remove_namespace_mappings(mappings);
		}
		self.prune();
	}

	pub fn remove_source_namespace(&mut self, source: &CollectionNamespace) {
		for tasks in self.0.values_mut() {
			tasks.remove_source_namespace(source);
		}
		self.prune();
	}

	/// Drops the task currently being streamed for `vb`.
	pub fn mark_one_vb_task_done(&mut self, vb: u16) -> Option<BackfillTask> {
		let tasks = self.0.get_mut(&vb)?;
		let done = tasks.pop_first();
		if tasks.is_empty() {
			self.0.remove(&vb);
		}
		done
	}

	/// Distinct namespace mappings referenced by any task.
	#[must_use]
	pub fn all_collection_namespace_mappings(&self) -> Vec<CollectionNamespaceMapping> {
		let mut mappings: Vec<CollectionNamespaceMapping> = Vec::new();
		for task in self.0.values().flat_map(BackfillTasks::iter) {
			if !mappings.contains(task.mappings()) {
				mappings.push(task.mappings().clone());
			}
		}
		mappings
	}

	#[must_use]
	pub fn subset(&self, vbs: &[u16]) -> Self {
		Self(
			vbs.iter()
				.filter_map(|vb| self.0.get(vb).map(|tasks| (*vb, tasks.clone())))
				.collect(),
		)
	}

	fn prune(&mut self) {
		self.0.retain(|_, tasks| !tasks.is_empty());
	}
}
