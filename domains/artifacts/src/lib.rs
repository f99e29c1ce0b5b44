//! Artifacts domain: provenance lineage of derived data artifacts

pub mod domain;
pub mod error;
pub mod repository;
pub mod service;

// Re-export domain types at the crate root for convenience
pub use domain::entities::{
    Artifact, ArtifactId, CommandId, Filepath, FilepathId, NewArtifact, NewFilepath,
    ParameterSetId, PrepTemplate, PrepTemplateId, ProcessingParameters, Provenance, StudyId,
    Visibility,
};
pub use domain::submission::{
    Capability, EbiEvent, EbiRunAccessions, EbiState, EbiStateMachine, EbiSubmission,
    VampsSubmission,
};
pub use domain::vocabulary::{Vocabulary, VocabularyId, VocabularyResolver};
pub use error::{ArtifactError, Result};

// Re-export repository types
pub use repository::{InMemoryLineageStore, LineageStore, LineageTx, PgLineageStore, RowLock};

// Re-export the engines
pub use service::creation::create_artifact_tx;
pub use service::deletion::delete_artifact_tx;
pub use service::ArtifactService;
