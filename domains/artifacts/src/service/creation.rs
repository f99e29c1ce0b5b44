//! Artifact creation engine
//!
//! Argument combinations are validated first, then every vocabulary term is
//! resolved, and only then is anything written. A failure at any step leaves
//! the transaction to be dropped with no record of the artifact.

use std::collections::BTreeSet;

use chrono::Utc;

use super::load_artifact;
use crate::domain::entities::{
    Artifact, ArtifactId, ArtifactInsert, NewArtifact, Provenance, StudyId, Visibility,
};
use crate::domain::vocabulary::Vocabulary;
use crate::error::{ArtifactError, Result};
use crate::repository::{FilepathInsert, LineageTx, RowLock};

fn join<T: std::fmt::Display>(values: impl IntoIterator<Item = T>) -> String {
    values
        .into_iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Study and data type shared by every parent of a derived artifact.
///
/// Parents are read with a share lock so none of them can be deleted
/// before the new lineage edges commit.
async fn shared_parent_lineage(
    tx: &mut dyn LineageTx,
    parents: &[ArtifactId],
) -> Result<(StudyId, String)> {
    let mut studies = BTreeSet::new();
    let mut data_types = BTreeSet::new();
    for parent in parents {
        let artifact = load_artifact(tx, *parent, RowLock::Share).await?;
        studies.insert(artifact.study_id);
        data_types.insert(artifact.data_type);
    }

    if studies.len() > 1 {
        return Err(ArtifactError::Creation(format!(
            "parents from multiple studies provided: {}",
            join(&studies)
        )));
    }
    if data_types.len() > 1 {
        return Err(ArtifactError::Creation(format!(
            "parents have multiple data types: {}",
            join(&data_types)
        )));
    }

    match (studies.pop_first(), data_types.pop_first()) {
        (Some(study), Some(data_type)) => Ok((study, data_type)),
        _ => Err(ArtifactError::Creation(
            "at least parents or prep_template must be provided".to_string(),
        )),
    }
}

/// Create an artifact within an existing transaction.
///
/// The caller commits; the returned record reflects the uncommitted state.
pub async fn create_artifact_tx(tx: &mut dyn LineageTx, new: &NewArtifact) -> Result<Artifact> {
    let provenance = new.provenance()?;

    let visibility_id = tx
        .resolve(Vocabulary::Visibility, Visibility::Sandbox.as_str())
        .await?;
    let artifact_type_id = tx
        .resolve(Vocabulary::ArtifactType, &new.artifact_type)
        .await?;

    let mut filepaths = Vec::with_capacity(new.filepaths.len());
    for fp in &new.filepaths {
        let filepath_type_id = tx
            .resolve(Vocabulary::FilepathType, &fp.filepath_type)
            .await?;
        filepaths.push(FilepathInsert {
            path: fp.path.clone(),
            filepath_type_id,
        });
    }

    let mut record = ArtifactInsert {
        timestamp: Utc::now(),
        visibility_id,
        artifact_type_id,
        data_type_id: 0,
        processing_parameters: None,
        can_submit_to_ebi: new.can_submit_to_ebi,
        can_submit_to_vamps: new.can_submit_to_vamps,
    };

    let (id, study_id) = match provenance {
        Provenance::Processed {
            parents,
            parameters,
        } => {
            let (study_id, data_type) = shared_parent_lineage(tx, &parents).await?;
            record.data_type_id = tx.resolve(Vocabulary::DataType, &data_type).await?;
            record.processing_parameters = Some(parameters);

            let id = tx.insert_artifact(&record).await?;
            tx.insert_parent_edges(id, &parents).await?;
            (id, study_id)
        }
        Provenance::Uploaded { prep_template } => {
            let template = tx
                .fetch_prep_template(prep_template)
                .await?
                .ok_or(ArtifactError::NotFound {
                    entity: "Prep template",
                    id: prep_template.0,
                })?;
            if let Some(existing) = template.artifact_id {
                return Err(ArtifactError::Creation(format!(
                    "prep template {} already has artifact {existing}",
                    template.id
                )));
            }
            record.data_type_id = tx
                .resolve(Vocabulary::DataType, &template.data_type)
                .await?;

            let id = tx.insert_artifact(&record).await?;
            tx.link_prep_template(template.id, id).await?;
            (id, template.study_id)
        }
    };

    tx.insert_study_artifact(study_id, id).await?;

    let filepath_ids = tx.insert_filepaths(&filepaths, &new.artifact_type).await?;
    tx.link_filepaths(id, &filepath_ids).await?;

    let artifact = load_artifact(tx, id, RowLock::None).await?;
    tracing::info!(
        artifact_id = %id,
        study_id = %study_id,
        artifact_type = %artifact.artifact_type,
        data_type = %artifact.data_type,
        derived = artifact.is_derived(),
        "Artifact created"
    );
    Ok(artifact)
}
