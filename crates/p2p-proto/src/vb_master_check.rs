use std::collections::{BTreeMap, HashMap};

use serde::{de::Error as _, ser::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use xdcr_metadata::{
	compress_json, decompress_json, BackfillTasks, CheckpointsDoc, CollectionNsMappingsDoc,
	ManifestsCache, PipelineType, VbTasksMap,
};

use super::{Error, RequestCommon, ResponseCommon};

/// Bucket name to the vbuckets asked about.
pub type BucketVbMap = BTreeMap<String, Vec<u16>>;

const NOT_MY_VBS: &str = "NotMyVBs";
const CONFLICTING_VBS: &str = "ConflictingVBs";
const PUSH_VBS: &str = "PushVBs";

fn decompress_non_empty<T>(compressed: &[u8]) -> Result<BTreeMap<String, T>, Error>
where
	T: for<'de> Deserialize<'de>,
{
	if compressed.is_empty() {
		return Ok(BTreeMap::new());
	}

	let map: BTreeMap<String, T> = decompress_json(compressed)?;
	if map.is_empty() {
		return Err(Error::EmptyPayload(compressed.len()));
	}

	Ok(map)
}

/// Asks a peer which of our vbuckets it believes it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VbMasterCheckReq {
	pub common: RequestCommon,
	pub bucket_vb_map: BucketVbMap,
	pub replication_id: String,
	pub source_bucket_name: String,
	pub pipeline_type: PipelineType,
	pub internal_spec_id: String,
}

#[derive(Serialize, Deserialize)]
struct VbMasterCheckReqWire {
	#[serde(flatten)]
	common: RequestCommon,
	#[serde(default)]
	bucket_vb_map_compressed: Vec<u8>,
	replication_id: String,
	source_bucket_name: String,
	pipeline_type: PipelineType,
	#[serde(default)]
	internal_spec_id: String,
}

impl VbMasterCheckReq {
	pub fn new(
		common: RequestCommon,
		replication_id: impl Into<String>,
		source_bucket_name: impl Into<String>,
		pipeline_type: PipelineType,
		internal_spec_id: impl Into<String>,
	) -> Self {
		Self {
			common,
			bucket_vb_map: BucketVbMap::new(),
			replication_id: replication_id.into(),
			source_bucket_name: source_bucket_name.into(),
			pipeline_type,
			internal_spec_id: internal_spec_id.into(),
		}
	}

	pub fn set_bucket_vb_map(&mut self, bucket_vb_map: BucketVbMap) {
		self.bucket_vb_map = bucket_vb_map;
	}

	/// Same framing and replication, vbucket lists compared as sets.
	#[must_use]
	pub fn same_as(&self, other: &Self) -> bool {
		fn sorted(map: &BucketVbMap) -> BucketVbMap {
			map.iter()
				.map(|(bucket, vbs)| {
					let mut vbs = vbs.clone();
					vbs.sort_unstable();
					vbs.dedup();
					(bucket.clone(), vbs)
				})
				.collect()
		}

		self.common.same_as(&other.common)
			&& self.replication_id == other.replication_id
			&& self.source_bucket_name == other.source_bucket_name
			&& self.pipeline_type == other.pipeline_type
			&& self.internal_spec_id == other.internal_spec_id
			&& sorted(&self.bucket_vb_map) == sorted(&other.bucket_vb_map)
	}

	#[must_use]
	pub fn generate_response(&self) -> VbMasterCheckResp {
		VbMasterCheckResp {
			common: self.common.generate_response_common(),
			replication_payload: ReplicationPayload::new(
				self.replication_id.clone(),
				self.source_bucket_name.clone(),
				self.pipeline_type,
				self.internal_spec_id.clone(),
			),
		}
	}
}

impl Serialize for VbMasterCheckReq {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let bucket_vb_map_compressed = if self.bucket_vb_map.is_empty() {
			Vec::new()
		} else {
			compress_json(&self.bucket_vb_map).map_err(S::Error::custom)?
		};

		VbMasterCheckReqWire {
			common: self.common.clone(),
			bucket_vb_map_compressed,
			replication_id: self.replication_id.clone(),
			source_bucket_name: self.source_bucket_name.clone(),
			pipeline_type: self.pipeline_type,
			internal_spec_id: self.internal_spec_id.clone(),
		}
		.serialize(serializer)
	}
}

impl<'de> Deserialize<'de> for VbMasterCheckReq {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let wire = VbMasterCheckReqWire::deserialize(deserializer)?;

		Ok(Self {
			bucket_vb_map: decompress_non_empty(&wire.bucket_vb_map_compressed)
				.map_err(D::Error::custom)?,
			common: wire.common,
			replication_id: wire.replication_id,
			source_bucket_name: wire.source_bucket_name,
			pipeline_type: wire.pipeline_type,
			internal_spec_id: wire.internal_spec_id,
		})
	}
}

/// What the responder knows about one vbucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
	#[serde(default)]
	pub checkpoints_doc: Option<CheckpointsDoc>,
	#[serde(default)]
	pub backfill_tasks: Option<BackfillTasks>,
}

/// Per source bucket answer of one peer.
///
/// A vbucket is placed in at most one of the three vbucket maps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VbMasterPayload {
	#[serde(default)]
	pub overall_payload_err: String,
	#[serde(default)]
	pub not_my_vbs: BTreeMap<u16, Payload>,
	#[serde(default)]
	pub conflicting_vbs: BTreeMap<u16, Payload>,
	#[serde(default)]
	pub push_vbs: BTreeMap<u16, Payload>,
	#[serde(default)]
	pub src_manifests: Option<ManifestsCache>,
	#[serde(default)]
	pub tgt_manifests: Option<ManifestsCache>,
	#[serde(default)]
	pub broken_mapping_doc: Option<CollectionNsMappingsDoc>,
	#[serde(default)]
	pub backfill_mapping_doc: Option<CollectionNsMappingsDoc>,
}

impl VbMasterPayload {
	fn placement(&self, vb: u16) -> Option<&'static str> {
		if self.not_my_vbs.contains_key(&vb) {
			Some(NOT_MY_VBS)
		} else if self.conflicting_vbs.contains_key(&vb) {
			Some(CONFLICTING_VBS)
		} else if self.push_vbs.contains_key(&vb) {
			Some(PUSH_VBS)
		} else {
			None
		}
	}

	fn register(&mut self, kind: &'static str, vbs: &[u16]) -> Result<(), Error> {
		if let Some((vb, existing)) = vbs
			.iter()
			.find_map(|vb| self.placement(*vb).map(|existing| (*vb, existing)))
		{
			return Err(Error::VbAlreadyRegistered { vb, existing });
		}

		let map = match kind {
			NOT_MY_VBS => &mut self.not_my_vbs,
			CONFLICTING_VBS => &mut self.conflicting_vbs,
			_ => &mut self.push_vbs,
		};
		for vb in vbs {
			map.insert(*vb, Payload::default());
		}

		Ok(())
	}

	pub fn register_not_my_vbs(&mut self, vbs: &[u16]) -> Result<(), Error> {
		self.register(NOT_MY_VBS, vbs)
	}

	pub fn register_conflicting_vbs(&mut self, vbs: &[u16]) -> Result<(), Error> {
		self.register(CONFLICTING_VBS, vbs)
	}

	pub fn register_push_vbs(&mut self, vbs: &[u16]) -> Result<(), Error> {
		self.register(PUSH_VBS, vbs)
	}

	fn all_vb_payloads_mut(&mut self) -> impl Iterator<Item = (&u16, &mut Payload)> {
		self.not_my_vbs
			.iter_mut()
			.chain(self.conflicting_vbs.iter_mut())
			.chain(self.push_vbs.iter_mut())
	}

	fn all_vb_payloads(&self) -> impl Iterator<Item = (&u16, &Payload)> {
		self.not_my_vbs
			.iter()
			.chain(self.conflicting_vbs.iter())
			.chain(self.push_vbs.iter())
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.not_my_vbs.is_empty() && self.conflicting_vbs.is_empty() && self.push_vbs.is_empty()
	}

	/// Attaches checkpoints of every registered vbucket that has one.
	pub fn load_pipeline_ckpts(&mut self, docs: &HashMap<u16, CheckpointsDoc>) {
		for (vb, payload) in self.all_vb_payloads_mut() {
			if let Some(doc) = docs.get(vb).filter(|doc| !doc.is_empty()) {
				payload.checkpoints_doc = Some(doc.clone());
			}
		}
	}

	/// Attaches backfill tasks of every registered vbucket and indexes the
	/// namespace mappings they refer to.
	pub fn load_backfill_tasks(
		&mut self,
		tasks_map: &VbTasksMap,
		spec_internal_id: &str,
	) -> Result<(), Error> {
		let mut mappings = Vec::new();
		for (vb, payload) in self.all_vb_payloads_mut() {
			if let Some(tasks) = tasks_map.get(*vb) {
				for task in tasks.iter() {
					mappings.push(task.mappings().clone());
				}
				payload.backfill_tasks = Some(tasks.clone());
			}
		}

		if !mappings.is_empty() {
			self.backfill_mapping_doc = Some(CollectionNsMappingsDoc::from_mappings(
				&mappings,
				spec_internal_id,
			)?);
		}

		Ok(())
	}

	pub fn load_manifests(&mut self, source: ManifestsCache, target: ManifestsCache) {
		self.src_manifests = Some(source);
		self.tgt_manifests = Some(target);
	}

	pub fn load_broken_mapping_doc(&mut self, doc: CollectionNsMappingsDoc) {
		self.broken_mapping_doc = Some(doc);
	}

	/// Copy restricted to `vbs`; bucket level documents are kept as they are.
	#[must_use]
	pub fn get_subset_based_on_vbs(&self, vbs: &[u16]) -> Self {
		fn filter(map: &BTreeMap<u16, Payload>, vbs: &[u16]) -> BTreeMap<u16, Payload> {
			map.iter()
				.filter(|(vb, _)| vbs.contains(vb))
				.map(|(vb, payload)| (*vb, payload.clone()))
				.collect()
		}

		Self {
			overall_payload_err: self.overall_payload_err.clone(),
			not_my_vbs: filter(&self.not_my_vbs, vbs),
			conflicting_vbs: filter(&self.conflicting_vbs, vbs),
			push_vbs: filter(&self.push_vbs, vbs),
			src_manifests: self.src_manifests.clone(),
			tgt_manifests: self.tgt_manifests.clone(),
			broken_mapping_doc: self.broken_mapping_doc.clone(),
			backfill_mapping_doc: self.backfill_mapping_doc.clone(),
		}
	}

	#[must_use]
	pub fn get_all_checkpoints(&self) -> HashMap<u16, CheckpointsDoc> {
		self.all_vb_payloads()
			.filter_map(|(vb, payload)| payload.checkpoints_doc.clone().map(|doc| (*vb, doc)))
			.collect()
	}

	#[must_use]
	pub fn get_backfill_vb_tasks(&self) -> VbTasksMap {
		let mut tasks_map = VbTasksMap::new();
		for (vb, payload) in self.all_vb_payloads() {
			if let Some(tasks) = &payload.backfill_tasks {
				tasks_map.insert(*vb, tasks.clone());
			}
		}
		tasks_map
	}
}

/// Everything a peer reports about one replication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationPayload {
	pub replication_spec_id: String,
	pub source_bucket_name: String,
	pub pipeline_type: PipelineType,
	pub internal_spec_id: String,
	pub payload: BTreeMap<String, VbMasterPayload>,
	pub error_msg: String,
}

#[derive(Serialize, Deserialize)]
struct ReplicationPayloadWire {
	replication_spec_id: String,
	source_bucket_name: String,
	pipeline_type: PipelineType,
	#[serde(default)]
	internal_spec_id: String,
	#[serde(default)]
	payload_compressed: Vec<u8>,
	#[serde(default)]
	error_msg: String,
}

impl ReplicationPayload {
	pub fn new(
		replication_spec_id: impl Into<String>,
		source_bucket_name: impl Into<String>,
		pipeline_type: PipelineType,
		internal_spec_id: impl Into<String>,
	) -> Self {
		Self {
			replication_spec_id: replication_spec_id.into(),
			source_bucket_name: source_bucket_name.into(),
			pipeline_type,
			internal_spec_id: internal_spec_id.into(),
			payload: BTreeMap::new(),
			error_msg: String::new(),
		}
	}

	pub fn bucket_payload_mut(&mut self, bucket: &str) -> &mut VbMasterPayload {
		self.payload.entry(bucket.to_string()).or_default()
	}

	#[must_use]
	pub fn bucket_payload(&self, bucket: &str) -> Option<&VbMasterPayload> {
		self.payload.get(bucket)
	}

	/// Copy restricted to `vbs`. Buckets left with nothing are dropped, unless
	/// they carry an error.
	#[must_use]
	pub fn get_subset_based_on_vbs(&self, vbs: &[u16]) -> Self {
		Self {
			payload: self
				.payload
				.iter()
				.map(|(bucket, payload)| (bucket.clone(), payload.get_subset_based_on_vbs(vbs)))
				.filter(|(_, payload)| {
					!payload.is_empty() || !payload.overall_payload_err.is_empty()
				})
				.collect(),
			replication_spec_id: self.replication_spec_id.clone(),
			source_bucket_name: self.source_bucket_name.clone(),
			pipeline_type: self.pipeline_type,
			internal_spec_id: self.internal_spec_id.clone(),
			error_msg: self.error_msg.clone(),
		}
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.payload.values().all(VbMasterPayload::is_empty)
	}
}

impl Serialize for ReplicationPayload {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let payload_compressed = if self.payload.is_empty() {
			Vec::new()
		} else {
			compress_json(&self.payload).map_err(S::Error::custom)?
		};

		ReplicationPayloadWire {
			replication_spec_id: self.replication_spec_id.clone(),
			source_bucket_name: self.source_bucket_name.clone(),
			pipeline_type: self.pipeline_type,
			internal_spec_id: self.internal_spec_id.clone(),
			payload_compressed,
			error_msg: self.error_msg.clone(),
		}
		.serialize(serializer)
	}
}

impl<'de> Deserialize<'de> for ReplicationPayload {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let wire = ReplicationPayloadWire::deserialize(deserializer)?;

		Ok(Self {
			payload: decompress_non_empty(&wire.payload_compressed).map_err(D::Error::custom)?,
			replication_spec_id: wire.replication_spec_id,
			source_bucket_name: wire.source_bucket_name,
			pipeline_type: wire.pipeline_type,
			internal_spec_id: wire.internal_spec_id,
			error_msg: wire.error_msg,
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VbMasterCheckResp {
	#[serde(flatten)]
	pub common: ResponseCommon,
	pub replication_payload: ReplicationPayload,
}

impl VbMasterCheckResp {
	#[must_use]
	pub fn same_as(&self, other: &Self) -> bool {
		self.common.same_as(&other.common) && self.replication_payload == other.replication_payload
	}

	#[must_use]
	pub fn get_subset_based_on_vbs(&self, vbs: &[u16]) -> Self {
		Self {
			common: self.common.clone(),
			replication_payload: self.replication_payload.get_subset_based_on_vbs(vbs),
		}
	}
}
