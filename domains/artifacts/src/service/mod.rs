//! Artifact operations
//!
//! Each engine is a set of free functions taking an open [`LineageTx`], so
//! several steps (or several engines) can share one atomic unit of work.
//! [`ArtifactService`] wraps them for callers that want one transaction per
//! operation.

pub mod creation;
pub mod deletion;
pub mod graph;
pub mod submission;

use std::sync::Arc;

use crate::domain::entities::{
    Artifact, ArtifactId, Filepath, NewArtifact, PrepTemplateId, StudyId, Visibility,
};
use crate::domain::submission::EbiRunAccessions;
use crate::error::{ArtifactError, Result};
use crate::repository::{LineageStore, LineageTx, RowLock};

/// Load an artifact or fail with `NotFound`
pub(crate) async fn load_artifact(
    tx: &mut dyn LineageTx,
    id: ArtifactId,
    lock: RowLock,
) -> Result<Artifact> {
    tx.fetch_artifact(id, lock)
        .await?
        .ok_or_else(|| ArtifactError::artifact_not_found(id))
}

/// One-transaction-per-call entry point to the artifact engines
#[derive(Clone)]
pub struct ArtifactService {
    store: Arc<dyn LineageStore>,
}

impl ArtifactService {
    pub fn new(store: Arc<dyn LineageStore>) -> Self {
        Self { store }
    }

    // --- creation / deletion ---

    pub async fn create(&self, new: &NewArtifact) -> Result<Artifact> {
        let mut tx = self.store.begin().await?;
        let artifact = creation::create_artifact_tx(tx.as_mut(), new).await?;
        tx.commit().await?;
        Ok(artifact)
    }

    pub async fn delete(&self, id: ArtifactId) -> Result<()> {
        let mut tx = self.store.begin().await?;
        deletion::delete_artifact_tx(tx.as_mut(), id).await?;
        tx.commit().await
    }

    // --- accessors ---

    pub async fn artifact(&self, id: ArtifactId) -> Result<Artifact> {
        let mut tx = self.store.begin().await?;
        load_artifact(tx.as_mut(), id, RowLock::None).await
    }

    pub async fn study(&self, id: ArtifactId) -> Result<StudyId> {
        Ok(self.artifact(id).await?.study_id)
    }

    pub async fn filepaths(&self, id: ArtifactId) -> Result<Vec<Filepath>> {
        let mut tx = self.store.begin().await?;
        load_artifact(tx.as_mut(), id, RowLock::None).await?;
        tx.filepaths(id).await
    }

    pub async fn set_visibility(&self, id: ArtifactId, visibility: Visibility) -> Result<()> {
        let mut tx = self.store.begin().await?;
        submission::set_visibility_tx(tx.as_mut(), id, visibility).await?;
        tx.commit().await
    }

    // --- lineage graph ---

    pub async fn parents(&self, id: ArtifactId) -> Result<Vec<ArtifactId>> {
        let mut tx = self.store.begin().await?;
        graph::parents_tx(tx.as_mut(), id).await
    }

    pub async fn children(&self, id: ArtifactId) -> Result<Vec<ArtifactId>> {
        let mut tx = self.store.begin().await?;
        graph::children_tx(tx.as_mut(), id).await
    }

    pub async fn roots(&self, id: ArtifactId) -> Result<Vec<ArtifactId>> {
        let mut tx = self.store.begin().await?;
        graph::roots_tx(tx.as_mut(), id).await
    }

    pub async fn ancestors(&self, id: ArtifactId) -> Result<Vec<ArtifactId>> {
        let mut tx = self.store.begin().await?;
        graph::ancestors_tx(tx.as_mut(), id).await
    }

    pub async fn descendants(&self, id: ArtifactId) -> Result<Vec<ArtifactId>> {
        let mut tx = self.store.begin().await?;
        graph::descendants_tx(tx.as_mut(), id).await
    }

    pub async fn prep_templates(&self, id: ArtifactId) -> Result<Vec<PrepTemplateId>> {
        let mut tx = self.store.begin().await?;
        graph::prep_templates_tx(tx.as_mut(), id).await
    }

    // --- external submissions ---

    pub async fn ebi_run_accessions(&self, id: ArtifactId) -> Result<EbiRunAccessions> {
        let mut tx = self.store.begin().await?;
        submission::ebi_run_accessions_tx(tx.as_mut(), id).await
    }

    pub async fn set_ebi_run_accessions(
        &self,
        id: ArtifactId,
        accessions: &EbiRunAccessions,
    ) -> Result<()> {
        let mut tx = self.store.begin().await?;
        submission::set_ebi_run_accessions_tx(tx.as_mut(), id, accessions).await?;
        tx.commit().await
    }

    pub async fn is_submitted_to_vamps(&self, id: ArtifactId) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        submission::is_submitted_to_vamps_tx(tx.as_mut(), id).await
    }

    pub async fn set_submitted_to_vamps(&self, id: ArtifactId, submitted: bool) -> Result<()> {
        let mut tx = self.store.begin().await?;
        submission::set_submitted_to_vamps_tx(tx.as_mut(), id, submitted).await?;
        tx.commit().await
    }
}
