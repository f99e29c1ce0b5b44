//! Artifact deletion engine

use super::{graph, load_artifact};
use crate::domain::entities::{Artifact, ArtifactId};
use crate::error::{ArtifactError, Result};
use crate::repository::{LineageTx, RowLock};

/// First deletability rule `artifact` violates, if any.
///
/// Rules are checked in a fixed order and only the first failure is
/// reported.
async fn deletion_blocker(tx: &mut dyn LineageTx, artifact: &Artifact) -> Result<Option<String>> {
    if artifact.is_public() {
        return Ok(Some("it is public".to_string()));
    }

    let children = graph::children_tx(tx, artifact.id).await?;
    if !children.is_empty() {
        let ids: Vec<String> = children.iter().map(|c| c.to_string()).collect();
        return Ok(Some(format!("it has children: {}", ids.join(", "))));
    }

    if tx.is_analyzed(artifact.id).await? {
        return Ok(Some("it has been analyzed".to_string()));
    }
    if artifact.ebi.blocks_deletion() {
        return Ok(Some("it has been submitted to EBI".to_string()));
    }
    if artifact.vamps.blocks_deletion() {
        return Ok(Some("it has been submitted to VAMPS".to_string()));
    }
    Ok(None)
}

/// Delete an artifact within an existing transaction.
///
/// The artifact row is locked before the checks run, so no child can be
/// attached to it between the check and the delete.
pub async fn delete_artifact_tx(tx: &mut dyn LineageTx, id: ArtifactId) -> Result<()> {
    let artifact = load_artifact(tx, id, RowLock::Update).await?;

    if let Some(reason) = deletion_blocker(tx, &artifact).await? {
        tracing::debug!(artifact_id = %id, reason = %reason, "Artifact deletion rejected");
        return Err(ArtifactError::deletion(id, reason));
    }

    let filepaths = tx.filepaths(id).await?;
    tx.unlink_filepaths(id).await?;

    let parents = tx.parent_ids(id).await?;
    if parents.is_empty() {
        tx.move_filepaths_to_upload_area(artifact.study_id, &filepaths)
            .await?;
        let templates = tx.prep_templates_linked_to(&[id]).await?;
        tx.unlink_prep_templates(&templates).await?;
    } else {
        tx.delete_parent_edges(id).await?;
    }

    tx.delete_study_artifact(id).await?;
    tx.delete_artifact(id).await?;

    tracing::info!(
        artifact_id = %id,
        study_id = %artifact.study_id,
        root = parents.is_empty(),
        files = filepaths.len(),
        "Artifact deleted"
    );
    Ok(())
}
