use std::{collections::HashMap, sync::Arc};

use xdcr_metadata::{CheckpointsService, PipelineType};

use super::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
	Initial,
	Starting,
	Running,
	Stopping,
	Stopped,
	Error,
}

/// What a request handler needs from a running replication pipeline.
pub trait Pipeline: Send + Sync + 'static {
	fn pipeline_type(&self) -> PipelineType;

	fn full_topic(&self) -> String;

	/// Vbuckets streamed by the pipeline's source parts.
	fn responsible_vbs(&self) -> Vec<u16>;

	fn state(&self) -> PipelineState;

	fn checkpoints_service(&self) -> Arc<dyn CheckpointsService>;

	/// Escalates an error to the pipeline supervisor.
	fn raise_error(&self, err: Error);
}

/// Pipelines a handler is attached to, plus the completion bookkeeping of the
/// backfill pipeline's vbuckets.
#[derive(Default)]
pub(crate) struct AttachedPipelines {
	pipelines: Vec<Arc<dyn Pipeline>>,
	backfill_vbs_done: HashMap<u16, bool>,
	backfill_total_done: usize,
}

pub(crate) enum VbDone {
	Marked { all_done: bool },
	AlreadyDone,
	Unregistered,
}

impl AttachedPipelines {
	pub(crate) fn attach(&mut self, pipeline: Arc<dyn Pipeline>) {
		if pipeline.pipeline_type() == PipelineType::Backfill {
			self.backfill_vbs_done = pipeline
				.responsible_vbs()
				.into_iter()
				.map(|vb| (vb, false))
				.collect();
			self.backfill_total_done = 0;
		}

		self.pipelines.push(pipeline);
	}

	pub(crate) fn detach(&mut self, full_topic: &str) -> Option<Arc<dyn Pipeline>> {
		let idx = self
			.pipelines
			.iter()
			.position(|attached| attached.full_topic() == full_topic)?;

		Some(self.pipelines.remove(idx))
	}

	pub(crate) fn get(&self, pipeline_type: PipelineType) -> Option<Arc<dyn Pipeline>> {
		self.pipelines
			.iter()
			.find(|pipeline| pipeline.pipeline_type() == pipeline_type)
			.cloned()
	}

	pub(crate) fn backfill_vbs_count(&self) -> usize {
		self.backfill_vbs_done.len()
	}

	pub(crate) fn mark_vb_done(&mut self, vb: u16) -> VbDone {
		match self.backfill_vbs_done.get_mut(&vb) {
			None => VbDone::Unregistered,
			Some(true) => VbDone::AlreadyDone,
			Some(done) => {
				*done = true;
				self.backfill_total_done += 1;
				VbDone::Marked {
					all_done: self.backfill_total_done == self.backfill_vbs_done.len(),
				}
			}
		}
	}
}
