pub mod registry;
pub mod tokens;

pub use registry::{ArtifactRegistry, IngestDescriptor, IngestOutcome};
pub use tokens::DownloadTokenService;
