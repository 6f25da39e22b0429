use glam::{Quat, Vec3};
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::DecodeError;
use super::model::{JobStatus, JobStatusUpdate, ReconstructionJob, UploadOptions};
use crate::placement::ServerPose;

const CREATION_SHAPE: &str = "job creation";
const STATUS_SHAPE: &str = "job status";

#[derive(Debug, Deserialize)]
struct JobCreationPayload {
    job_id: Option<Value>,
    task_id: Option<Value>,
    status: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobStatusPayload {
    job_id: Option<Value>,
    status: Option<String>,
    progress: Option<f64>,
    stage: Option<String>,
    message: Option<String>,
    error: Option<String>,
    placement: Option<PlacementPayload>,
}

#[derive(Debug, Deserialize)]
struct PlacementPayload {
    position: Option<Vec<f32>>,
    rotation: Option<Vec<f32>>,
    scale: Option<f32>,
}

/// Text part sent next to the images: `{"resolution_level": n}`.
pub fn encode_upload_options(options: &UploadOptions) -> String {
    json!({ "resolution_level": options.resolution_level }).to_string()
}

pub fn decode_job_creation(body: &[u8]) -> Result<ReconstructionJob, DecodeError> {
    let value = parse_object(CREATION_SHAPE, body)?;
    let payload: JobCreationPayload = serde_json::from_value(value)
        .map_err(|err| DecodeError::malformed(CREATION_SHAPE, err.to_string(), body))?;

    let job_id = payload
        .job_id
        .as_ref()
        .and_then(id_text)
        .ok_or_else(|| DecodeError::malformed(CREATION_SHAPE, "missing job_id", body))?;
    let status = match payload.status.as_deref() {
        Some(raw) => parse_status(raw, body)?,
        None => JobStatus::Pending,
    };

    let mut job = ReconstructionJob::new(job_id, status);
    job.task_id = payload.task_id.as_ref().and_then(id_text);
    job.message = payload.message.and_then(non_empty);
    Ok(job)
}

pub fn decode_job_status(body: &[u8]) -> Result<JobStatusUpdate, DecodeError> {
    let value = parse_object(STATUS_SHAPE, body)?;
    let payload: JobStatusPayload = serde_json::from_value(value)
        .map_err(|err| DecodeError::malformed(STATUS_SHAPE, err.to_string(), body))?;

    let raw_status = payload
        .status
        .as_deref()
        .ok_or_else(|| DecodeError::malformed(STATUS_SHAPE, "missing status", body))?;
    let status = parse_status(raw_status, body)?;
    let placement = payload
        .placement
        .map(|placement| decode_placement(placement, body))
        .transpose()?;

    Ok(JobStatusUpdate {
        job_id: payload.job_id.as_ref().and_then(id_text),
        status,
        progress: payload
            .progress
            .filter(|value| value.is_finite())
            .map(|value| value.clamp(0.0, 1.0)),
        stage: payload.stage.and_then(non_empty),
        message: payload.message.and_then(non_empty),
        error: payload.error.and_then(non_empty),
        placement,
    })
}

fn parse_object(shape: &'static str, body: &[u8]) -> Result<Value, DecodeError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|err| DecodeError::malformed(shape, format!("invalid JSON: {err}"), body))?;
    if !value.is_object() {
        return Err(DecodeError::malformed(shape, "expected a JSON object", body));
    }
    Ok(value)
}

fn parse_status(raw: &str, body: &[u8]) -> Result<JobStatus, DecodeError> {
    JobStatus::from_wire(raw).ok_or_else(|| DecodeError::unknown_status(raw, body))
}

fn decode_placement(payload: PlacementPayload, body: &[u8]) -> Result<ServerPose, DecodeError> {
    let position = match payload.position.as_deref() {
        Some([x, y, z]) if [x, y, z].iter().all(|value| value.is_finite()) => {
            Vec3::new(*x, *y, *z)
        }
        _ => {
            return Err(DecodeError::malformed(
                STATUS_SHAPE,
                "placement.position must be three finite numbers",
                body,
            ))
        }
    };
    let rotation = match payload.rotation.as_deref() {
        None => None,
        Some([x, y, z, w]) => {
            let quat = Quat::from_xyzw(*x, *y, *z, *w);
            if !quat.is_finite() || quat.length_squared() < 1e-6 {
                return Err(DecodeError::malformed(
                    STATUS_SHAPE,
                    "placement.rotation must be a non-zero quaternion",
                    body,
                ));
            }
            Some(quat.normalize())
        }
        Some(_) => {
            return Err(DecodeError::malformed(
                STATUS_SHAPE,
                "placement.rotation must be four numbers [x, y, z, w]",
                body,
            ))
        }
    };
    Ok(ServerPose {
        position,
        rotation,
        scale: payload.scale.filter(|value| value.is_finite() && *value > 0.0),
    })
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => non_empty(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn bytes(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn creation_payload_yields_job() {
        let body = bytes(json!({
            "job_id": "job-42",
            "task_id": "task-7",
            "status": "pending",
            "message": "queued for processing"
        }));
        let job = decode_job_creation(&body).unwrap();
        assert_eq!(job.job_id, "job-42");
        assert_eq!(job.task_id.as_deref(), Some("task-7"));
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.message.as_deref(), Some("queued for processing"));
    }

    #[test]
    fn creation_without_job_id_is_malformed() {
        for body in [json!({"status": "pending"}), json!({"job_id": "  "})] {
            let err = decode_job_creation(&bytes(body)).unwrap_err();
            assert!(matches!(err, DecodeError::Malformed { .. }), "{err}");
        }
    }

    #[test]
    fn creation_defaults_missing_status_to_pending() {
        let job = decode_job_creation(&bytes(json!({"job_id": 17}))).unwrap();
        assert_eq!(job.job_id, "17");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.task_id, None);
    }

    #[test]
    fn status_payload_optional_fields_may_be_absent() {
        let update = decode_job_status(&bytes(json!({"status": "processing"}))).unwrap();
        assert_eq!(update.status, JobStatus::Processing);
        assert_eq!(update.progress, None);
        assert_eq!(update.stage, None);
        assert_eq!(update.placement, None);
    }

    #[test]
    fn status_payload_decodes_all_fields() {
        let update = decode_job_status(&bytes(json!({
            "job_id": "job-42",
            "status": "Failed",
            "progress": 0.4,
            "stage": "alignment",
            "message": "",
            "error": "too few features"
        })))
        .unwrap();
        assert_eq!(update.job_id.as_deref(), Some("job-42"));
        assert_eq!(update.status, JobStatus::Failed);
        assert_eq!(update.progress, Some(0.4));
        assert_eq!(update.stage.as_deref(), Some("alignment"));
        assert_eq!(update.message, None);
        assert_eq!(update.error.as_deref(), Some("too few features"));
    }

    #[test]
    fn progress_is_clamped_to_unit_range() {
        let update =
            decode_job_status(&bytes(json!({"status": "processing", "progress": 1.7}))).unwrap();
        assert_eq!(update.progress, Some(1.0));
    }

    #[test]
    fn unknown_status_is_not_coerced() {
        let body = bytes(json!({"job_id": "job-1", "status": "queued", "progress": 0.3}));
        let err = decode_job_status(&body).unwrap_err();
        match &err {
            DecodeError::UnknownStatus { status, body } => {
                assert_eq!(status, "queued");
                assert!(body.contains("\"job_id\":\"job-1\""), "{body}");
                assert!(body.contains("\"progress\":0.3"), "{body}");
            }
            other => panic!("expected UnknownStatus, got {other:?}"),
        }
        assert!(err.to_string().contains("job-1"));
    }

    #[test]
    fn missing_status_or_non_object_is_malformed() {
        for body in [
            bytes(json!({"progress": 0.5})),
            bytes(json!(["processing"])),
            b"<html>bad gateway</html>".to_vec(),
        ] {
            let err = decode_job_status(&body).unwrap_err();
            assert!(matches!(err, DecodeError::Malformed { .. }), "{err}");
        }
    }

    #[test]
    fn wrong_field_type_is_malformed() {
        let err = decode_job_status(&bytes(json!({"status": "processing", "progress": "half"})))
            .unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn placement_override_is_decoded() {
        let update = decode_job_status(&bytes(json!({
            "status": "completed",
            "placement": {"position": [1.0, 0.0, -2.0], "rotation": [0.0, 0.0, 0.0, 2.0], "scale": 0.5}
        })))
        .unwrap();
        let placement = update.placement.unwrap();
        assert_eq!(placement.position, Vec3::new(1.0, 0.0, -2.0));
        assert_eq!(placement.rotation, Some(Quat::IDENTITY));
        assert_eq!(placement.scale, Some(0.5));
    }

    #[test]
    fn placement_without_position_is_malformed() {
        let err = decode_job_status(&bytes(json!({
            "status": "completed",
            "placement": {"rotation": [0.0, 0.0, 0.0, 1.0]}
        })))
        .unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn options_part_uses_wire_field_name() {
        let text = encode_upload_options(&UploadOptions {
            resolution_level: 3,
        });
        assert_eq!(text, r#"{"resolution_level":3}"#);
    }
}
