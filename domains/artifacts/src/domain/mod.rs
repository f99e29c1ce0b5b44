//! Artifact domain model: entities, vocabularies, and submission state

pub mod entities;
pub mod submission;
pub mod vocabulary;
