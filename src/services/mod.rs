pub mod challenge_detector;
pub mod challenge_resolver;
pub mod evidence_writer;
pub mod field_classifier;
pub mod form_filler;
pub mod queue_manager;

pub use challenge_resolver::{ChallengeResolver, ResolveContext, ResolverSettings};
pub use evidence_writer::EvidenceWriter;
pub use form_filler::{FormFiller, TypingPace};
pub use queue_manager::QueueManager;
