use std::path::{Path, PathBuf};

use meshdrop_contracts::jobs::JobError;
use meshdrop_contracts::placement::{ModelMetadata, PlacementInputs, SpawnPose};
use meshdrop_contracts::status::{StatusSink, StatusUpdate};
use thiserror::Error;

use crate::cancel::CancellationToken;
use crate::client::fail;
use crate::store::ArtifactStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RendererError {
    #[error("no renderer is available")]
    Unavailable,
    #[error("artifact could not be decoded: {0}")]
    MalformedArtifact(String),
    #[error("model could not be instantiated: {0}")]
    Instantiation(String),
}

/// Whatever turns a persisted artifact into a visible model.
pub trait ArtifactRenderer {
    fn load(&mut self, artifact: &Path) -> Result<ModelMetadata, RendererError>;
    fn instantiate(&mut self, pose: &SpawnPose) -> Result<(), RendererError>;
}

/// Fallback visual used whenever the real model cannot be shown.
pub trait PlaceholderSpawner {
    fn spawn_placeholder(&mut self, pose: &SpawnPose, reason: &str);
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandoffOutcome {
    Rendered,
    Placeholder { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandoffResult {
    pub artifact_path: PathBuf,
    pub pose: SpawnPose,
    pub outcome: HandoffOutcome,
}

impl HandoffResult {
    pub fn is_placeholder(&self) -> bool {
        matches!(self.outcome, HandoffOutcome::Placeholder { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactHandoff {
    store: ArtifactStore,
    cancel: CancellationToken,
}

impl ArtifactHandoff {
    pub fn new(store: ArtifactStore) -> Self {
        Self {
            store,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Persists the artifact and places it in the scene.
    ///
    /// Only persistence can fail. Renderer problems end in a placeholder at the resolved pose.
    pub fn handoff(
        &self,
        bytes: &[u8],
        job_id: &str,
        renderer: Option<&mut dyn ArtifactRenderer>,
        placeholder: &mut dyn PlaceholderSpawner,
        inputs: &PlacementInputs,
        sink: &dyn StatusSink,
    ) -> Result<HandoffResult, JobError> {
        let artifact_path = match self.store.persist(job_id, bytes, &self.cancel) {
            Ok(path) => path,
            Err(err) => return fail(sink, err),
        };
        sink.report(StatusUpdate::ArtifactPersisted {
            job_id: job_id.to_string(),
            path: artifact_path.display().to_string(),
        });

        let base = inputs.resolve();
        let rendered = match renderer {
            Some(renderer) => render(renderer, &artifact_path, base),
            None => Err(RendererError::Unavailable),
        };
        match rendered {
            Ok(pose) => {
                sink.report(StatusUpdate::Spawned {
                    job_id: job_id.to_string(),
                    source: pose.source,
                });
                Ok(HandoffResult {
                    artifact_path,
                    pose,
                    outcome: HandoffOutcome::Rendered,
                })
            }
            Err(err) => {
                let reason = err.to_string();
                placeholder.spawn_placeholder(&base, &reason);
                sink.report(StatusUpdate::PlaceholderSpawned {
                    job_id: job_id.to_string(),
                    reason: reason.clone(),
                });
                Ok(HandoffResult {
                    artifact_path,
                    pose: base,
                    outcome: HandoffOutcome::Placeholder { reason },
                })
            }
        }
    }
}

fn render(
    renderer: &mut dyn ArtifactRenderer,
    artifact: &Path,
    base: SpawnPose,
) -> Result<SpawnPose, RendererError> {
    let metadata = renderer.load(artifact)?;
    let pose = base.with_metadata(&metadata);
    renderer.instantiate(&pose)?;
    Ok(pose)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use glam::{Quat, Vec3};
    use meshdrop_contracts::jobs::ErrorKind;
    use meshdrop_contracts::placement::{
        CameraPose, PlacementBounds, PoseSource, RotationSource, ServerPose,
    };
    use meshdrop_contracts::status::RecordingSink;

    use super::*;

    #[derive(Default)]
    struct ScriptedRenderer {
        load_error: Option<RendererError>,
        instantiate_error: Option<RendererError>,
        metadata: ModelMetadata,
        loaded: Vec<PathBuf>,
        instantiated: Vec<SpawnPose>,
    }

    impl ArtifactRenderer for ScriptedRenderer {
        fn load(&mut self, artifact: &Path) -> Result<ModelMetadata, RendererError> {
            self.loaded.push(artifact.to_path_buf());
            match self.load_error.clone() {
                Some(err) => Err(err),
                None => Ok(self.metadata),
            }
        }

        fn instantiate(&mut self, pose: &SpawnPose) -> Result<(), RendererError> {
            self.instantiated.push(*pose);
            match self.instantiate_error.clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    #[derive(Default)]
    struct RecordingPlaceholder {
        spawned: Vec<(SpawnPose, String)>,
    }

    impl PlaceholderSpawner for RecordingPlaceholder {
        fn spawn_placeholder(&mut self, pose: &SpawnPose, reason: &str) {
            self.spawned.push((*pose, reason.to_string()));
        }
    }

    fn inputs() -> anyhow::Result<PlacementInputs> {
        Ok(PlacementInputs {
            server_pose: None,
            surface: None,
            camera: CameraPose::new(Vec3::new(0.0, 1.6, 0.0), Vec3::NEG_Z),
            bounds: PlacementBounds::new(1.5, 0.5, 5.0)?,
        })
    }

    #[test]
    fn rendered_handoff_applies_metadata_after_placement() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let handoff = ArtifactHandoff::new(ArtifactStore::new(temp.path(), "glb"));
        let mut renderer = ScriptedRenderer {
            metadata: ModelMetadata {
                scale: Some(0.25),
                rotation: Some(Quat::from_rotation_y(1.0)),
            },
            ..ScriptedRenderer::default()
        };
        let mut placeholder = RecordingPlaceholder::default();
        let sink = RecordingSink::new();
        let inputs = inputs()?;

        let result = handoff.handoff(
            b"glTF-bytes",
            "job-42",
            Some(&mut renderer),
            &mut placeholder,
            &inputs,
            &sink,
        )?;

        assert_eq!(result.outcome, HandoffOutcome::Rendered);
        assert_eq!(fs::read(&result.artifact_path)?, b"glTF-bytes".to_vec());
        assert_eq!(renderer.loaded, vec![result.artifact_path.clone()]);
        assert_eq!(result.pose.position, inputs.resolve().position);
        assert_eq!(result.pose.scale, Some(0.25));
        assert_eq!(result.pose.rotation_source, RotationSource::Metadata);
        assert_eq!(renderer.instantiated, vec![result.pose]);
        assert!(placeholder.spawned.is_empty());
        assert!(sink.updates().contains(&StatusUpdate::Spawned {
            job_id: "job-42".to_string(),
            source: PoseSource::CameraRelativeFallback,
        }));
        Ok(())
    }

    #[test]
    fn every_renderer_failure_falls_back_to_a_placeholder() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let handoff = ArtifactHandoff::new(ArtifactStore::new(temp.path(), "glb"));
        let mut inputs = inputs()?;
        inputs.server_pose = Some(ServerPose::at(Vec3::new(2.0, 0.0, -3.0)));
        let expected = inputs.resolve();

        let cases: Vec<Option<ScriptedRenderer>> = vec![
            None,
            Some(ScriptedRenderer {
                load_error: Some(RendererError::MalformedArtifact("bad magic".to_string())),
                ..ScriptedRenderer::default()
            }),
            Some(ScriptedRenderer {
                instantiate_error: Some(RendererError::Instantiation("no gpu".to_string())),
                metadata: ModelMetadata {
                    scale: Some(3.0),
                    rotation: None,
                },
                ..ScriptedRenderer::default()
            }),
        ];
        for mut renderer in cases {
            let mut placeholder = RecordingPlaceholder::default();
            let sink = RecordingSink::new();
            let result = handoff.handoff(
                b"bytes",
                "job-42",
                renderer.as_mut().map(|r| r as &mut dyn ArtifactRenderer),
                &mut placeholder,
                &inputs,
                &sink,
            )?;

            assert!(result.is_placeholder());
            assert_eq!(result.pose, expected);
            assert_eq!(placeholder.spawned.len(), 1);
            assert_eq!(placeholder.spawned[0].0, expected);
            assert!(sink.failures().is_empty());
            assert!(sink
                .updates()
                .iter()
                .any(|update| matches!(update, StatusUpdate::PlaceholderSpawned { .. })));
        }
        Ok(())
    }

    #[test]
    fn placeholder_reason_names_the_failure() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let handoff = ArtifactHandoff::new(ArtifactStore::new(temp.path(), "glb"));
        let mut placeholder = RecordingPlaceholder::default();
        let result = handoff.handoff(
            b"bytes",
            "job-42",
            None,
            &mut placeholder,
            &inputs()?,
            &RecordingSink::new(),
        )?;
        assert_eq!(
            result.outcome,
            HandoffOutcome::Placeholder {
                reason: "no renderer is available".to_string()
            }
        );
        Ok(())
    }

    #[test]
    fn storage_failure_is_fatal_and_reported() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let blocker = temp.path().join("models");
        fs::write(&blocker, b"file")?;
        let handoff = ArtifactHandoff::new(ArtifactStore::new(&blocker, "glb"));
        let mut renderer = ScriptedRenderer::default();
        let mut placeholder = RecordingPlaceholder::default();
        let sink = RecordingSink::new();

        let err = handoff
            .handoff(
                b"bytes",
                "job-42",
                Some(&mut renderer),
                &mut placeholder,
                &inputs()?,
                &sink,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(renderer.loaded.is_empty());
        assert!(placeholder.spawned.is_empty());
        assert_eq!(sink.failures().len(), 1);
        Ok(())
    }
}
