pub mod application;
pub mod challenge;
pub mod field;
pub mod job;
pub mod loaders;
pub mod profile;

pub use application::{Application, ApplicationId, ApplicationStatus, SubmissionMethod};
pub use challenge::{
    Challenge, ChallengeAttempt, ChallengeKind, ResolutionOutcome, ResolutionTier,
};
pub use field::{FieldDescriptor, FieldInput, FieldKind, FillResult, SemanticFieldType};
pub use job::{Job, JobId, JobStatus, NewJob, Platform, QueueStats};
pub use loaders::{load_job_seeds, load_profile};
pub use profile::UserProfile;
