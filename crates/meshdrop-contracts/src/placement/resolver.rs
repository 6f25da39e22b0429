use glam::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    CameraPose, DetectedSurface, PoseSource, RotationSource, ServerPose, SpawnPose,
};

/// Minimum `y` of a normalized surface normal for the surface to count as a floor or tabletop.
pub const HORIZONTAL_SURFACE_MIN_UP: f32 = 0.7;

const EPSILON: f32 = 1e-4;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlacementError {
    #[error("spawn distance bounds must be finite and non-negative (min {min}, max {max})")]
    InvalidDistance { min: f32, max: f32 },
    #[error("min spawn distance {min} exceeds max spawn distance {max}")]
    InvertedBounds { min: f32, max: f32 },
    #[error("default spawn offset must be finite, got {0}")]
    InvalidOffset(f32),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementBounds {
    offset: f32,
    min_distance: f32,
    max_distance: f32,
}

impl PlacementBounds {
    pub fn new(offset: f32, min_distance: f32, max_distance: f32) -> Result<Self, PlacementError> {
        if !min_distance.is_finite()
            || !max_distance.is_finite()
            || min_distance < 0.0
            || max_distance < 0.0
        {
            return Err(PlacementError::InvalidDistance {
                min: min_distance,
                max: max_distance,
            });
        }
        if min_distance > max_distance {
            return Err(PlacementError::InvertedBounds {
                min: min_distance,
                max: max_distance,
            });
        }
        if !offset.is_finite() {
            return Err(PlacementError::InvalidOffset(offset));
        }
        Ok(Self {
            offset,
            min_distance,
            max_distance,
        })
    }

    pub fn spawn_distance(&self) -> f32 {
        self.offset.clamp(self.min_distance, self.max_distance)
    }
}

/// Everything sensed at spawn time.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementInputs {
    pub server_pose: Option<ServerPose>,
    pub surface: Option<DetectedSurface>,
    pub camera: CameraPose,
    pub bounds: PlacementBounds,
}

impl PlacementInputs {
    pub fn resolve(&self) -> SpawnPose {
        resolve(
            self.server_pose.as_ref(),
            self.surface.as_ref(),
            &self.camera,
            &self.bounds,
        )
    }
}

pub fn resolve(
    server_pose: Option<&ServerPose>,
    surface: Option<&DetectedSurface>,
    camera: &CameraPose,
    bounds: &PlacementBounds,
) -> SpawnPose {
    if let Some(server) = server_pose {
        let facing = facing_toward_camera(server.position, camera);
        let (rotation, rotation_source) = match server.rotation {
            Some(rotation) => (rotation.normalize(), RotationSource::Server),
            None => (facing_rotation(facing, Vec3::Y), RotationSource::Facing),
        };
        return SpawnPose {
            position: server.position,
            facing,
            rotation,
            scale: server.scale.filter(|value| value.is_finite() && *value > 0.0),
            source: PoseSource::ServerOverride,
            rotation_source,
        };
    }

    if let Some(surface) = surface.filter(|surface| surface.is_horizontal_up()) {
        let facing = facing_toward_camera(surface.center, camera);
        return SpawnPose {
            position: surface.center,
            facing,
            rotation: facing_rotation(facing, surface.normal.normalize_or_zero()),
            scale: None,
            source: PoseSource::DetectedSurface,
            rotation_source: RotationSource::Facing,
        };
    }

    let forward = horizontal_forward(camera);
    let distance = bounds.spawn_distance();
    let position = Vec3::new(
        camera.position.x + forward.x * distance,
        camera.position.y,
        camera.position.z + forward.z * distance,
    );
    let facing = facing_toward_camera(position, camera);
    SpawnPose {
        position,
        facing,
        rotation: facing_rotation(facing, Vec3::Y),
        scale: None,
        source: PoseSource::CameraRelativeFallback,
        rotation_source: RotationSource::Facing,
    }
}

/// Rotation whose local +Z points along `facing` and whose local +Y leans toward `up`.
pub fn facing_rotation(facing: Vec3, up: Vec3) -> Quat {
    let up = if up.length_squared() < EPSILON {
        Vec3::Y
    } else {
        up.normalize()
    };
    let forward = facing.normalize_or_zero();
    let right = up.cross(forward);
    if forward == Vec3::ZERO || right.length_squared() < EPSILON {
        return Quat::IDENTITY;
    }
    let right = right.normalize();
    let true_up = forward.cross(right);
    Quat::from_mat3(&Mat3::from_cols(right, true_up, forward)).normalize()
}

fn flatten(vector: Vec3) -> Option<Vec3> {
    let flat = Vec3::new(vector.x, 0.0, vector.z);
    if flat.length_squared() < EPSILON {
        None
    } else {
        Some(flat.normalize())
    }
}

fn horizontal_forward(camera: &CameraPose) -> Vec3 {
    // Looking straight down: the camera's up vector points where the forward vector would.
    flatten(camera.forward)
        .or_else(|| flatten(camera.up))
        .unwrap_or(Vec3::NEG_Z)
}

fn facing_toward_camera(position: Vec3, camera: &CameraPose) -> Vec3 {
    flatten(camera.position - position).unwrap_or_else(|| -horizontal_forward(camera))
}
