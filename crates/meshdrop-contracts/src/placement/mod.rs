//! Spawn pose resolution for a reconstructed model.
//!
//! The resolver owns no state. It weighs a server override, an optional detected surface and
//! the camera, then yields a pose whose `source` records which branch fired.

mod resolver;

pub use resolver::{
    facing_rotation, resolve, PlacementBounds, PlacementError, PlacementInputs,
    HORIZONTAL_SURFACE_MIN_UP,
};

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseSource {
    ServerOverride,
    DetectedSurface,
    CameraRelativeFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationSource {
    Facing,
    Server,
    Metadata,
}

/// Pose supplied by the service alongside a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerPose {
    pub position: Vec3,
    pub rotation: Option<Quat>,
    pub scale: Option<f32>,
}

impl ServerPose {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            rotation: None,
            scale: None,
        }
    }
}

/// Result of environment sensing: a plane the model could rest on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectedSurface {
    pub center: Vec3,
    pub normal: Vec3,
}

impl DetectedSurface {
    pub fn horizontal(center: Vec3) -> Self {
        Self {
            center,
            normal: Vec3::Y,
        }
    }

    pub fn is_horizontal_up(&self) -> bool {
        let normal = self.normal.normalize_or_zero();
        normal.y >= HORIZONTAL_SURFACE_MIN_UP
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
}

impl CameraPose {
    pub fn new(position: Vec3, forward: Vec3) -> Self {
        Self {
            position,
            forward,
            up: Vec3::Y,
        }
    }
}

/// Overrides carried by a decoded model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub scale: Option<f32>,
    pub rotation: Option<Quat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnPose {
    pub position: Vec3,
    /// Horizontal unit direction from the model toward the viewer.
    pub facing: Vec3,
    pub rotation: Quat,
    pub scale: Option<f32>,
    pub source: PoseSource,
    pub rotation_source: RotationSource,
}

impl SpawnPose {
    /// Applies model metadata after positioning. Position never changes; a server rotation wins.
    pub fn with_metadata(mut self, metadata: &ModelMetadata) -> Self {
        if let Some(scale) = metadata.scale.filter(|value| value.is_finite() && *value > 0.0) {
            self.scale = Some(scale);
        }
        if let Some(rotation) = metadata.rotation {
            if self.rotation_source != RotationSource::Server {
                self.rotation = rotation.normalize();
                self.rotation_source = RotationSource::Metadata;
            }
        }
        self
    }
}
