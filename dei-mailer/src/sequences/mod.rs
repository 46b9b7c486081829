//! Nurture sequences: catalog, templates and orchestration

pub mod orchestrator;
pub mod registry;
pub mod template;

pub use orchestrator::{SequenceOrchestrator, SequenceStatusView, StartSequence};
pub use registry::{CatalogError, SequenceDefinition, SequenceRegistry, SequenceStep};
pub use template::TemplateData;
