use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::model::ReconstructionJob;
use crate::placement::SpawnPose;

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub path: String,
    pub bytes: u64,
    pub sha256: String,
}

/// How the artifact ended up in the scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpawnRecord {
    Rendered,
    Placeholder { reason: String },
}

pub fn build_receipt(
    job: &ReconstructionJob,
    artifact: &ArtifactRecord,
    pose: &SpawnPose,
    spawn: &SpawnRecord,
    extra: Option<&Map<String, Value>>,
) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    root.insert(
        "job".to_string(),
        sanitize_payload(&serde_json::to_value(job).unwrap_or(Value::Null)),
    );
    root.insert(
        "artifact".to_string(),
        serde_json::to_value(artifact).unwrap_or(Value::Null),
    );
    root.insert(
        "pose".to_string(),
        serde_json::to_value(pose).unwrap_or(Value::Null),
    );
    root.insert(
        "spawn".to_string(),
        serde_json::to_value(spawn).unwrap_or(Value::Null),
    );
    if let Some(extra) = extra {
        root.insert(
            "extra".to_string(),
            sanitize_payload(&Value::Object(extra.clone())),
        );
    }
    root.insert("ts".to_string(), Value::String(now_utc_iso()));
    Value::Object(root)
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}

fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(
                    lowered.as_str(),
                    "api_key" | "authorization" | "token" | "bytes_b64"
                ) {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use glam::Vec3;
    use serde_json::{json, Map, Value};

    use super::*;
    use crate::jobs::model::JobStatus;
    use crate::placement::{resolve, CameraPose, PlacementBounds};

    #[test]
    fn receipt_builder_writes_expected_shape() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let receipt_path = temp.path().join("receipts").join("job-1.json");

        let mut job = ReconstructionJob::new("job-1", JobStatus::Completed);
        job.stage = Some("done".to_string());
        let pose = resolve(
            None,
            None,
            &CameraPose::new(Vec3::ZERO, Vec3::NEG_Z),
            &PlacementBounds::new(1.0, 0.5, 2.0)?,
        );
        let artifact = ArtifactRecord {
            path: "/tmp/job-1.glb".to_string(),
            bytes: 12,
            sha256: "ab".repeat(32),
        };
        let mut extra = Map::new();
        extra.insert("api_key".to_string(), json!("secret"));
        extra.insert("resolution_level".to_string(), json!(2));

        let payload = build_receipt(
            &job,
            &artifact,
            &pose,
            &SpawnRecord::Placeholder {
                reason: "no renderer".to_string(),
            },
            Some(&extra),
        );
        write_receipt(&receipt_path, &payload)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&receipt_path)?)?;
        assert_eq!(parsed["schema_version"], json!(RECEIPT_SCHEMA_VERSION));
        assert_eq!(parsed["job"]["job_id"], json!("job-1"));
        assert_eq!(parsed["job"]["status"], json!("completed"));
        assert_eq!(parsed["artifact"]["bytes"], json!(12));
        assert_eq!(parsed["pose"]["source"], json!("camera_relative_fallback"));
        assert_eq!(parsed["spawn"]["kind"], json!("placeholder"));
        assert_eq!(parsed["spawn"]["reason"], json!("no renderer"));
        assert_eq!(parsed["extra"]["api_key"], json!("<omitted>"));
        assert_eq!(parsed["extra"]["resolution_level"], json!(2));
        assert!(parsed.get("ts").and_then(Value::as_str).is_some());
        Ok(())
    }
}
