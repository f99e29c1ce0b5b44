//! Repository layer for the Artifacts domain
//!
//! The lineage store is reached through an explicit unit of work: callers
//! `begin()` a [`LineageTx`], pass it to every step of an operation, and
//! `commit()` it at the end. Dropping an uncommitted transaction discards
//! all of its writes.

pub mod memory;
pub mod postgres;

use std::collections::BTreeMap;

use crate::domain::entities::{
    Artifact, ArtifactId, ArtifactInsert, Filepath, FilepathId, PrepTemplate, PrepTemplateId,
    StudyId,
};
use crate::domain::vocabulary::{VocabularyId, VocabularyResolver};
use crate::error::Result;

pub use memory::InMemoryLineageStore;
pub use postgres::PgLineageStore;

/// Row lock taken when reading an artifact inside a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowLock {
    #[default]
    None,
    /// Blocks concurrent deletion of the row (parents of a new artifact)
    Share,
    /// Exclusive lock for rows about to be mutated or deleted
    Update,
}

/// A file to persist, with its type already resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilepathInsert {
    pub path: String,
    pub filepath_type_id: VocabularyId,
}

/// Factory for units of work against the lineage store
#[async_trait::async_trait]
pub trait LineageStore: Send + Sync {
    /// Open a new isolated transaction
    async fn begin(&self) -> Result<Box<dyn LineageTx>>;
}

/// One atomic unit of work against the lineage store
///
/// Every method observes the writes made earlier in the same transaction
/// and nothing else that was not committed before it began.
#[async_trait::async_trait]
pub trait LineageTx: VocabularyResolver {
    // --- artifact records ---

    async fn insert_artifact(&mut self, record: &ArtifactInsert) -> Result<ArtifactId>;

    async fn fetch_artifact(&mut self, id: ArtifactId, lock: RowLock) -> Result<Option<Artifact>>;

    async fn update_visibility(&mut self, id: ArtifactId, visibility_id: VocabularyId)
        -> Result<()>;

    async fn update_submitted_to_vamps(&mut self, id: ArtifactId, submitted: bool) -> Result<()>;

    async fn delete_artifact(&mut self, id: ArtifactId) -> Result<()>;

    // --- lineage edges ---

    async fn insert_parent_edges(&mut self, child: ArtifactId, parents: &[ArtifactId])
        -> Result<()>;

    /// Direct parents, ascending by id
    async fn parent_ids(&mut self, id: ArtifactId) -> Result<Vec<ArtifactId>>;

    /// Direct children, ascending by id
    async fn child_ids(&mut self, id: ArtifactId) -> Result<Vec<ArtifactId>>;

    async fn delete_parent_edges(&mut self, child: ArtifactId) -> Result<()>;

    // --- study association ---

    async fn insert_study_artifact(&mut self, study: StudyId, artifact: ArtifactId) -> Result<()>;

    async fn delete_study_artifact(&mut self, artifact: ArtifactId) -> Result<()>;

    // --- prep templates ---

    async fn fetch_prep_template(&mut self, id: PrepTemplateId) -> Result<Option<PrepTemplate>>;

    async fn link_prep_template(
        &mut self,
        template: PrepTemplateId,
        artifact: ArtifactId,
    ) -> Result<()>;

    /// Templates whose back-reference points at any of `artifacts`
    async fn prep_templates_linked_to(
        &mut self,
        artifacts: &[ArtifactId],
    ) -> Result<Vec<PrepTemplateId>>;

    async fn unlink_prep_templates(&mut self, templates: &[PrepTemplateId]) -> Result<()>;

    // --- filepaths ---

    async fn insert_filepaths(
        &mut self,
        filepaths: &[FilepathInsert],
        storage_category: &str,
    ) -> Result<Vec<FilepathId>>;

    async fn link_filepaths(&mut self, artifact: ArtifactId, filepaths: &[FilepathId])
        -> Result<()>;

    /// Files attached to `artifact`, in insertion order
    async fn filepaths(&mut self, artifact: ArtifactId) -> Result<Vec<Filepath>>;

    async fn unlink_filepaths(&mut self, artifact: ArtifactId) -> Result<()>;

    /// Hand `filepaths` back to the pending-upload area of `study`.
    ///
    /// The records disappear with the transaction; physical files move only
    /// once it commits.
    async fn move_filepaths_to_upload_area(
        &mut self,
        study: StudyId,
        filepaths: &[Filepath],
    ) -> Result<()>;

    // --- downstream usage and submissions ---

    /// Whether any analysis consumes `artifact`
    async fn is_analyzed(&mut self, artifact: ArtifactId) -> Result<bool>;

    async fn insert_ebi_run_accessions(
        &mut self,
        artifact: ArtifactId,
        accessions: &BTreeMap<String, String>,
    ) -> Result<()>;

    // --- unit of work ---

    /// Make every write of this transaction visible atomically.
    ///
    /// Any further call on a committed transaction fails with
    /// `RepositoryError::TransactionClosed`.
    async fn commit(&mut self) -> Result<()>;
}
