//! Visibility and external submission state
//!
//! Writes lock the artifact row; capability and write-once checks go
//! through the submission sub-machines before anything is persisted.

use super::load_artifact;
use crate::domain::entities::{ArtifactId, Visibility};
use crate::domain::submission::EbiRunAccessions;
use crate::domain::vocabulary::Vocabulary;
use crate::error::{ArtifactError, Result};
use crate::repository::{LineageTx, RowLock};

const EBI: &str = "EBI";
const VAMPS: &str = "VAMPS";

/// Set the visibility of `id`; any level may follow any other.
pub async fn set_visibility_tx(
    tx: &mut dyn LineageTx,
    id: ArtifactId,
    visibility: Visibility,
) -> Result<()> {
    let artifact = load_artifact(tx, id, RowLock::Update).await?;
    let visibility_id = tx
        .resolve(Vocabulary::Visibility, visibility.as_str())
        .await?;
    tx.update_visibility(id, visibility_id).await?;
    tracing::info!(
        artifact_id = %id,
        from = %artifact.visibility,
        to = %visibility,
        "Artifact visibility changed"
    );
    Ok(())
}

pub async fn ebi_run_accessions_tx(
    tx: &mut dyn LineageTx,
    id: ArtifactId,
) -> Result<EbiRunAccessions> {
    let artifact = load_artifact(tx, id, RowLock::None).await?;
    artifact
        .ebi
        .run_accessions()
        .cloned()
        .map_err(|e| ArtifactError::not_permitted(id, EBI, e))
}

/// Record the EBI run accessions of `id`, once.
pub async fn set_ebi_run_accessions_tx(
    tx: &mut dyn LineageTx,
    id: ArtifactId,
    accessions: &EbiRunAccessions,
) -> Result<()> {
    let artifact = load_artifact(tx, id, RowLock::Update).await?;
    let state = artifact.ebi.record(accessions).map_err(|e| {
        tracing::warn!(artifact_id = %id, error = %e, "EBI submission rejected");
        ArtifactError::not_permitted(id, EBI, e)
    })?;

    tx.insert_ebi_run_accessions(id, accessions).await?;
    tracing::info!(
        artifact_id = %id,
        accessions = accessions.len(),
        state = %state,
        "EBI run accessions recorded"
    );
    Ok(())
}

pub async fn is_submitted_to_vamps_tx(tx: &mut dyn LineageTx, id: ArtifactId) -> Result<bool> {
    let artifact = load_artifact(tx, id, RowLock::None).await?;
    artifact
        .vamps
        .is_submitted()
        .map_err(|e| ArtifactError::not_permitted(id, VAMPS, e))
}

pub async fn set_submitted_to_vamps_tx(
    tx: &mut dyn LineageTx,
    id: ArtifactId,
    submitted: bool,
) -> Result<()> {
    let mut artifact = load_artifact(tx, id, RowLock::Update).await?;
    artifact.vamps.set_submitted(submitted).map_err(|e| {
        tracing::warn!(artifact_id = %id, error = %e, "VAMPS submission rejected");
        ArtifactError::not_permitted(id, VAMPS, e)
    })?;

    tx.update_submitted_to_vamps(id, submitted).await?;
    tracing::info!(artifact_id = %id, submitted, "VAMPS submission flag changed");
    Ok(())
}
