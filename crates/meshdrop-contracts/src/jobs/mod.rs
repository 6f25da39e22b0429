pub mod codec;
pub mod error;
pub mod model;
pub mod receipt;

pub use codec::{decode_job_creation, decode_job_status, encode_upload_options};
pub use error::{
    diagnostic_body, DecodeError, ErrorKind, JobError, PollFailure, TransportError,
    TransportErrorKind,
};
pub use model::{
    EmptyBatch, ImageUpload, JobStatus, JobStatusUpdate, ReconstructionJob, TransitionRejected,
    UploadBatch, UploadOptions,
};
pub use receipt::{build_receipt, write_receipt, ArtifactRecord, SpawnRecord};
