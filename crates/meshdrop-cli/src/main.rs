use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use glam::Vec3;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader};
use meshdrop_contracts::events::JobEventLog;
use meshdrop_contracts::jobs::{
    ImageUpload, JobError, JobStatus, JobStatusUpdate, PollFailure, ReconstructionJob, UploadBatch,
};
use meshdrop_contracts::placement::{
    CameraPose, DetectedSurface, ModelMetadata, PlacementInputs, SpawnPose,
};
use meshdrop_contracts::status::{EventSink, FanoutSink, StatusSink, StatusUpdate};
use meshdrop_engine::{
    new_session_id, ArtifactHandoff, ArtifactRenderer, ArtifactStore, HttpTransport, JobClient,
    MeshdropConfig, PipelineOutcome, PlaceholderSpawner, ReconstructionPipeline, RendererError,
};
use serde_json::{json, Value};

const GLB_MAGIC: &[u8; 4] = b"glTF";
const GLB_HEADER_LEN: usize = 12;
const DEFAULT_CAMERA_HEIGHT: f32 = 1.6;
const JPEG_QUALITY: u8 = 90;

#[derive(Debug, Parser)]
#[command(name = "meshdrop-rs", version, about = "Photo batch to placed 3D model")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload photos, wait for the reconstruction and place the model.
    Submit(SubmitArgs),
    /// Poll a job once and print its state.
    Status(StatusArgs),
    /// Download and place the model of a completed job.
    Fetch(FetchArgs),
}

#[derive(Debug, Clone, Args)]
struct ServiceArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    api_base: Option<String>,
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    resolution_level: Option<i64>,
    #[arg(long)]
    poll_interval: Option<f64>,
    #[arg(long)]
    max_wait: Option<f64>,
}

#[derive(Debug, Clone, Args)]
struct PlacementArgs {
    #[arg(long, value_parser = parse_vec3)]
    camera: Option<Vec3>,
    #[arg(long, value_parser = parse_vec3)]
    forward: Option<Vec3>,
    #[arg(long, value_parser = parse_vec3)]
    surface: Option<Vec3>,
    #[arg(long, value_parser = parse_vec3)]
    surface_normal: Option<Vec3>,
    /// Skip the model loader and always spawn the placeholder.
    #[arg(long)]
    no_render: bool,
}

#[derive(Debug, Parser)]
struct SubmitArgs {
    #[arg(long = "image", required = true)]
    images: Vec<PathBuf>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    max_dimension: Option<u32>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    service: ServiceArgs,
    #[command(flatten)]
    placement: PlacementArgs,
}

#[derive(Debug, Parser)]
struct StatusArgs {
    #[arg(long)]
    job: String,
    #[command(flatten)]
    service: ServiceArgs,
}

#[derive(Debug, Parser)]
struct FetchArgs {
    #[arg(long)]
    job: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    service: ServiceArgs,
    #[command(flatten)]
    placement: PlacementArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("meshdrop-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Submit(args) => run_submit(args),
        Command::Status(args) => run_status(args),
        Command::Fetch(args) => run_fetch(args),
    }
}

fn run_submit(args: SubmitArgs) -> Result<i32> {
    let mut config = load_config(&args.service)?;
    config.artifact_dir = args.out.clone();
    config.validate()?;

    let images = load_images(&args.images, args.max_dimension)?;
    let batch = UploadBatch::new(images, config.service.upload_options())?;
    let inputs = placement_inputs(&config, &args.placement)?;

    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let client = JobClient::new(HttpTransport::new(), config.service.clone())?;
    let handoff = ArtifactHandoff::new(ArtifactStore::new(
        &config.artifact_dir,
        config.artifact_extension.clone(),
    ))
    .with_cancellation(client.cancellation().clone());
    let pipeline = ReconstructionPipeline::new(&client, &handoff).with_receipt_extra(
        json_object(json!({
            "images": args.images.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
            "resolution_level": config.service.resolution_level,
            "max_dimension": args.max_dimension,
        })),
    );

    let events = EventSink::new(JobEventLog::new(&events_path, new_session_id()));
    let console = ConsoleSink;
    let sinks: Vec<&dyn StatusSink> = vec![&console, &events];
    let sink = FanoutSink::new(sinks);
    let mut renderer = GlbFileRenderer::default();
    let mut placeholder = ScenePlaceholder::default();
    let outcome = pipeline.run(
        batch,
        renderer_for(&mut renderer, &args.placement),
        &mut placeholder,
        &inputs,
        &sink,
    )?;
    finish(&args.out, &outcome, &renderer, &placeholder)
}

fn run_status(args: StatusArgs) -> Result<i32> {
    let config = load_config(&args.service)?;
    let client = JobClient::new(HttpTransport::new(), config.service.clone())?;
    let job = status_snapshot(&args.job, client.poll_once(&args.job), &ConsoleSink)?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(0)
}

fn run_fetch(args: FetchArgs) -> Result<i32> {
    let mut config = load_config(&args.service)?;
    config.artifact_dir = args.out.clone();
    config.validate()?;
    let inputs = placement_inputs(&config, &args.placement)?;

    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let client = JobClient::new(HttpTransport::new(), config.service.clone())?;
    let handoff = ArtifactHandoff::new(ArtifactStore::new(
        &config.artifact_dir,
        config.artifact_extension.clone(),
    ))
    .with_cancellation(client.cancellation().clone());
    let pipeline = ReconstructionPipeline::new(&client, &handoff);

    let events = EventSink::new(JobEventLog::new(&events_path, new_session_id()));
    let console = ConsoleSink;
    let sinks: Vec<&dyn StatusSink> = vec![&console, &events];
    let sink = FanoutSink::new(sinks);
    let mut renderer = GlbFileRenderer::default();
    let mut placeholder = ScenePlaceholder::default();
    let job = ReconstructionJob::new(args.job.clone(), JobStatus::Completed);
    let outcome = pipeline.deliver(
        job,
        renderer_for(&mut renderer, &args.placement),
        &mut placeholder,
        &inputs,
        &sink,
    )?;
    finish(&args.out, &outcome, &renderer, &placeholder)
}

fn finish(
    out_dir: &Path,
    outcome: &PipelineOutcome,
    renderer: &GlbFileRenderer,
    placeholder: &ScenePlaceholder,
) -> Result<i32> {
    let scene_path = out_dir.join("scene.json");
    let objects: Vec<Value> = scene_object(
        &outcome.job.job_id,
        &outcome.handoff.artifact_path,
        renderer,
        placeholder,
    )
    .into_iter()
    .collect();
    write_scene_manifest(&scene_path, objects)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "job_id": outcome.job.job_id,
            "artifact": outcome.handoff.artifact_path.display().to_string(),
            "receipt": outcome.receipt_path.display().to_string(),
            "scene": scene_path.display().to_string(),
            "placeholder": outcome.handoff.is_placeholder(),
        }))?
    );
    Ok(0)
}

/// File, then `MESHDROP_*` environment, then flags.
fn load_config(args: &ServiceArgs) -> Result<MeshdropConfig> {
    let mut config = match &args.config {
        Some(path) => MeshdropConfig::from_json_file(path)?,
        None => MeshdropConfig::default(),
    };
    config.apply_env()?;
    apply_service_flags(&mut config, args);
    config.validate()?;
    Ok(config)
}

fn apply_service_flags(config: &mut MeshdropConfig, args: &ServiceArgs) {
    if let Some(value) = &args.api_base {
        config.service.api_base_url = value.clone();
    }
    if let Some(value) = &args.api_key {
        config.service.api_key = value.clone();
    }
    if let Some(value) = args.resolution_level {
        config.service.resolution_level = value;
    }
    if let Some(value) = args.poll_interval {
        config.service.poll_interval = value;
    }
    if let Some(value) = args.max_wait {
        config.service.max_wait_time = value;
    }
}

fn placement_inputs(config: &MeshdropConfig, args: &PlacementArgs) -> Result<PlacementInputs> {
    let position = args
        .camera
        .unwrap_or(Vec3::new(0.0, DEFAULT_CAMERA_HEIGHT, 0.0));
    let forward = args.forward.unwrap_or(Vec3::NEG_Z);
    let surface = args.surface.map(|center| DetectedSurface {
        center,
        normal: args.surface_normal.unwrap_or(Vec3::Y),
    });
    if surface.is_none() && args.surface_normal.is_some() {
        bail!("--surface-normal requires --surface");
    }
    Ok(PlacementInputs {
        server_pose: None,
        surface,
        camera: CameraPose::new(position, forward),
        bounds: config.placement.bounds()?,
    })
}

fn renderer_for<'a>(
    renderer: &'a mut GlbFileRenderer,
    args: &PlacementArgs,
) -> Option<&'a mut dyn ArtifactRenderer> {
    if args.no_render {
        None
    } else {
        Some(renderer)
    }
}

fn parse_vec3(raw: &str) -> Result<Vec3, String> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(format!("expected x,y,z but got '{raw}'"));
    }
    let mut out = [0.0f32; 3];
    for (slot, part) in out.iter_mut().zip(parts) {
        let value: f32 = part
            .parse()
            .map_err(|_| format!("'{part}' is not a number"))?;
        if !value.is_finite() {
            return Err(format!("'{part}' is not finite"));
        }
        *slot = value;
    }
    Ok(Vec3::from_array(out))
}

fn load_images(paths: &[PathBuf], max_dimension: Option<u32>) -> Result<Vec<ImageUpload>> {
    let mut uploads = Vec::with_capacity(paths.len());
    for path in paths {
        let upload = match max_dimension {
            Some(max_dim) => downscaled_jpeg(path, max_dim)?,
            None => {
                let bytes =
                    fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
                ImageUpload::new(bytes, guess_image_mime(path), file_name(path))
            }
        };
        uploads.push(upload);
    }
    Ok(uploads)
}

fn downscaled_jpeg(path: &Path, max_dim: u32) -> Result<ImageUpload> {
    if max_dim == 0 {
        bail!("--max-dimension must be positive");
    }
    let image = ImageReader::open(path)
        .with_context(|| format!("failed opening {}", path.display()))?
        .with_guessed_format()?
        .decode()
        .with_context(|| format!("failed decoding {}", path.display()))?;
    let (width, height) = image.dimensions();
    let image = if width.max(height) > max_dim {
        image.resize(max_dim, max_dim, FilterType::Triangle)
    } else {
        image
    };
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY)
        .encode_image(&DynamicImage::ImageRgb8(image.to_rgb8()))
        .with_context(|| format!("failed encoding {} as JPEG", path.display()))?;
    let stem = path
        .file_stem()
        .and_then(|value| value.to_str())
        .filter(|value| !value.is_empty())
        .unwrap_or("image");
    Ok(ImageUpload::jpeg(bytes, format!("{stem}.jpg")))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("image")
        .to_string()
}

fn guess_image_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "heic" | "heif" => "image/heic",
        _ => "image/png",
    }
}

/// Folds one poll into a fresh job record. A failed poll is reported to `sink` before it is returned.
fn status_snapshot(
    job_id: &str,
    polled: Result<JobStatusUpdate, PollFailure>,
    sink: &dyn StatusSink,
) -> Result<ReconstructionJob> {
    let update = match polled {
        Ok(update) => update,
        Err(source) => {
            let err = JobError::Poll {
                job_id: job_id.to_string(),
                source,
            };
            sink.report(StatusUpdate::Failed {
                kind: err.kind(),
                message: err.to_string(),
            });
            return Err(err.into());
        }
    };
    let mut job = ReconstructionJob::new(job_id.to_string(), JobStatus::Pending);
    job.apply(&update)?;
    Ok(job)
}

/// Prints human-readable status lines to stderr.
struct ConsoleSink;

impl StatusSink for ConsoleSink {
    fn report(&self, update: StatusUpdate) {
        eprintln!("{}", update.message());
    }
}

/// Accepts binary glTF files and remembers where the model was placed.
#[derive(Debug, Default)]
struct GlbFileRenderer {
    loaded: Option<PathBuf>,
    placed: Option<SpawnPose>,
}

impl ArtifactRenderer for GlbFileRenderer {
    fn load(&mut self, artifact: &Path) -> Result<ModelMetadata, RendererError> {
        let bytes = fs::read(artifact)
            .map_err(|err| RendererError::MalformedArtifact(format!("unreadable: {err}")))?;
        if bytes.len() < GLB_HEADER_LEN || &bytes[..4] != GLB_MAGIC {
            return Err(RendererError::MalformedArtifact(
                "missing binary glTF header".to_string(),
            ));
        }
        let declared = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        if declared != bytes.len() {
            return Err(RendererError::MalformedArtifact(format!(
                "header declares {declared} bytes but file has {}",
                bytes.len()
            )));
        }
        self.loaded = Some(artifact.to_path_buf());
        Ok(ModelMetadata::default())
    }

    fn instantiate(&mut self, pose: &SpawnPose) -> Result<(), RendererError> {
        if self.loaded.is_none() {
            return Err(RendererError::Instantiation("no model loaded".to_string()));
        }
        self.placed = Some(*pose);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ScenePlaceholder {
    spawned: Option<(SpawnPose, String)>,
}

impl PlaceholderSpawner for ScenePlaceholder {
    fn spawn_placeholder(&mut self, pose: &SpawnPose, reason: &str) {
        self.spawned = Some((*pose, reason.to_string()));
    }
}

/// What ended up in the scene: the loaded model, else the placeholder.
fn scene_object(
    job_id: &str,
    artifact: &Path,
    renderer: &GlbFileRenderer,
    placeholder: &ScenePlaceholder,
) -> Option<Value> {
    let (kind, pose, reason) = match (&renderer.placed, &placeholder.spawned) {
        (Some(pose), _) => ("model", pose, Value::Null),
        (None, Some((pose, reason))) => ("placeholder", pose, json!(reason)),
        (None, None) => return None,
    };
    Some(json!({
        "job_id": job_id,
        "kind": kind,
        "artifact": artifact.display().to_string(),
        "position": pose.position.to_array(),
        "rotation": pose.rotation.to_array(),
        "facing": pose.facing.to_array(),
        "scale": pose.scale,
        "source": pose.source,
        "rotation_source": pose.rotation_source,
        "reason": reason,
    }))
}

fn write_scene_manifest(path: &Path, objects: Vec<Value>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let manifest = json!({ "objects": objects });
    fs::write(path, serde_json::to_string_pretty(&manifest)?)
        .with_context(|| format!("failed writing {}", path.display()))?;
    Ok(())
}

fn json_object(value: Value) -> serde_json::Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
