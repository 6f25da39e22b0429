pub mod events;
pub mod jobs;
pub mod placement;
pub mod status;
