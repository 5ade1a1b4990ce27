//! Release operations run by the pipeline stages

pub mod changelog;
pub mod dispatch;
pub mod fanout;
pub mod manifest;
pub mod propagator;
pub mod publisher;

pub use changelog::{Changelog, ChangelogError, ChangelogGenerator, ChangelogSection};
pub use dispatch::{DispatchOutcome, SiblingDispatcher};
pub use fanout::{FanOutJob, FanOutOutcome, JobError, JobOutput, JobSink, PlatformFanOut};
pub use manifest::{
    DigestCollector, DigestScope, DigestSink, ManifestMerger, MergeError, MergeReport,
};
pub use propagator::{PropagationError, PropagationOutcome, PropagationReport, VersionPropagator};
pub use publisher::{PublishError, ReleasePublisher, ReleaseSink};
