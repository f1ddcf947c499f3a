//! Upload and processing
//!
//! Takes ownership of recorded chunks, transfers them to a remote store and
//! follows server-side processing until the artifact is ready or failed.

pub mod http;
pub mod memory;
pub mod pipeline;
pub mod retry;
pub mod store;
pub mod types;

pub use http::HttpStore;
pub use memory::MemoryStore;
pub use pipeline::{PipelineError, UploadPipeline};
pub use retry::{RetryError, RetryPolicy};
pub use store::{ProcessingOutcome, ProcessingStatus, RemoteStore, StoreError};
pub use types::{Artifact, ArtifactEvent, ArtifactMeta, ArtifactStatus};
