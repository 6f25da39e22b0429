use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use meshdrop_contracts::jobs::{
    build_receipt, write_receipt, ArtifactRecord, ReconstructionJob, SpawnRecord, UploadBatch,
};
use meshdrop_contracts::placement::PlacementInputs;
use meshdrop_contracts::status::StatusSink;
use serde_json::{Map, Value};

use crate::cancel::Sleeper;
use crate::client::JobClient;
use crate::handoff::{
    ArtifactHandoff, ArtifactRenderer, HandoffOutcome, HandoffResult, PlaceholderSpawner,
};
use crate::store::sha256_hex;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    pub job: ReconstructionJob,
    pub handoff: HandoffResult,
    pub receipt_path: PathBuf,
}

/// Upload, wait, download, place. One job at a time on the caller's thread.
pub struct ReconstructionPipeline<'a, T, S> {
    client: &'a JobClient<T, S>,
    handoff: &'a ArtifactHandoff,
    extra: Map<String, Value>,
}

impl<'a, T: Transport, S: Sleeper> ReconstructionPipeline<'a, T, S> {
    pub fn new(client: &'a JobClient<T, S>, handoff: &'a ArtifactHandoff) -> Self {
        Self {
            client,
            handoff,
            extra: Map::new(),
        }
    }

    /// Extra fields copied into every receipt.
    pub fn with_receipt_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = extra;
        self
    }

    pub fn run(
        &self,
        batch: UploadBatch,
        renderer: Option<&mut dyn ArtifactRenderer>,
        placeholder: &mut dyn PlaceholderSpawner,
        inputs: &PlacementInputs,
        sink: &dyn StatusSink,
    ) -> Result<PipelineOutcome> {
        let created = self.client.create_job(batch, sink)?;
        let job = self.client.track(created, sink)?;
        self.deliver(job, renderer, placeholder, inputs, sink)
    }

    /// Downloads and places a job that already completed.
    pub fn deliver(
        &self,
        job: ReconstructionJob,
        renderer: Option<&mut dyn ArtifactRenderer>,
        placeholder: &mut dyn PlaceholderSpawner,
        inputs: &PlacementInputs,
        sink: &dyn StatusSink,
    ) -> Result<PipelineOutcome> {
        let bytes = self.client.download_artifact(&job.job_id, sink)?;

        let mut inputs = inputs.clone();
        if let Some(server_pose) = job.placement.clone() {
            inputs.server_pose = Some(server_pose);
        }
        let handoff = self.handoff.handoff(
            &bytes,
            &job.job_id,
            renderer,
            placeholder,
            &inputs,
            sink,
        )?;

        let artifact = ArtifactRecord {
            path: handoff.artifact_path.display().to_string(),
            bytes: bytes.len() as u64,
            sha256: sha256_hex(&bytes),
        };
        let spawn = match &handoff.outcome {
            HandoffOutcome::Rendered => SpawnRecord::Rendered,
            HandoffOutcome::Placeholder { reason } => SpawnRecord::Placeholder {
                reason: reason.clone(),
            },
        };
        let extra = (!self.extra.is_empty()).then_some(&self.extra);
        let receipt = build_receipt(&job, &artifact, &handoff.pose, &spawn, extra);
        let receipt_path = receipt_path_for(&handoff.artifact_path);
        write_receipt(&receipt_path, &receipt)
            .with_context(|| format!("failed writing receipt {}", receipt_path.display()))?;

        Ok(PipelineOutcome {
            job,
            handoff,
            receipt_path,
        })
    }
}

pub fn receipt_path_for(artifact: &Path) -> PathBuf {
    artifact.with_extension("receipt.json")
}
