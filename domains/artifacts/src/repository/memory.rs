//! In-memory lineage store
//!
//! Transactions take the store lock for their whole lifetime and work on a
//! private copy of the state, which replaces the shared state on commit.
//! This gives serializable isolation and all-or-nothing commits, which is
//! what the engines rely on. Used by tests and by embedders that do not
//! need durability.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lineage_common::RepositoryError;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{FilepathInsert, LineageStore, LineageTx, RowLock};
use crate::domain::entities::{
    Artifact, ArtifactId, ArtifactInsert, Filepath, FilepathId, PrepTemplate, PrepTemplateId,
    ProcessingParameters, StudyId,
};
use crate::domain::submission::Capability;
use crate::domain::vocabulary::{Vocabulary, VocabularyId, VocabularyResolver};
use crate::error::{ArtifactError, Result};

#[derive(Debug, Clone)]
struct StoredArtifact {
    timestamp: DateTime<Utc>,
    visibility_id: VocabularyId,
    artifact_type_id: VocabularyId,
    data_type_id: VocabularyId,
    processing_parameters: Option<ProcessingParameters>,
    can_submit_to_ebi: bool,
    can_submit_to_vamps: bool,
    submitted_to_vamps: bool,
}

#[derive(Debug, Clone)]
struct StoredTemplate {
    study_id: StudyId,
    data_type_id: VocabularyId,
    artifact_id: Option<ArtifactId>,
}

#[derive(Debug, Clone)]
struct StoredFilepath {
    path: String,
    filepath_type_id: VocabularyId,
    storage_category: String,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    vocabularies: BTreeMap<Vocabulary, Vec<String>>,
    studies: BTreeSet<StudyId>,
    prep_templates: BTreeMap<PrepTemplateId, StoredTemplate>,
    artifacts: BTreeMap<ArtifactId, StoredArtifact>,
    /// (child, parent)
    parent_edges: BTreeSet<(ArtifactId, ArtifactId)>,
    study_artifacts: BTreeMap<ArtifactId, StudyId>,
    filepaths: BTreeMap<FilepathId, StoredFilepath>,
    artifact_filepaths: BTreeSet<(ArtifactId, FilepathId)>,
    analyzed: BTreeSet<ArtifactId>,
    ebi_run_accessions: BTreeMap<ArtifactId, BTreeMap<String, String>>,
    uploads: BTreeMap<StudyId, Vec<Filepath>>,
    last_study_id: i64,
    last_template_id: i64,
    last_artifact_id: i64,
    last_filepath_id: i64,
}

impl MemoryState {
    fn seeded() -> Self {
        let vocabularies: BTreeMap<Vocabulary, Vec<String>> = Vocabulary::ALL
            .iter()
            .map(|category| {
                let values: Vec<String> =
                    category.defaults().iter().map(|v| v.to_string()).collect();
                (*category, values)
            })
            .collect();
        Self {
            vocabularies,
            ..Default::default()
        }
    }

    fn resolve(&self, category: Vocabulary, value: &str) -> Option<VocabularyId> {
        self.vocabularies
            .get(&category)?
            .iter()
            .position(|v| v == value)
            .map(|idx| idx as VocabularyId + 1)
    }

    fn term(&self, category: Vocabulary, id: VocabularyId) -> Result<String> {
        usize::try_from(id - 1)
            .ok()
            .and_then(|idx| self.vocabularies.get(&category)?.get(idx))
            .cloned()
            .ok_or_else(|| {
                RepositoryError::InvalidData(format!("{category} id {id} does not exist")).into()
            })
    }

    fn require_artifact(&self, id: ArtifactId) -> Result<()> {
        if self.artifacts.contains_key(&id) {
            Ok(())
        } else {
            Err(RepositoryError::NotFound.into())
        }
    }

    fn artifact(&self, id: ArtifactId) -> Result<Option<Artifact>> {
        let Some(stored) = self.artifacts.get(&id) else {
            return Ok(None);
        };
        let study_id = *self.study_artifacts.get(&id).ok_or_else(|| {
            RepositoryError::InvalidData(format!("artifact {id} has no owning study"))
        })?;

        Ok(Some(Artifact {
            id,
            timestamp: stored.timestamp,
            visibility: self
                .term(Vocabulary::Visibility, stored.visibility_id)?
                .parse()?,
            artifact_type: self.term(Vocabulary::ArtifactType, stored.artifact_type_id)?,
            data_type: self.term(Vocabulary::DataType, stored.data_type_id)?,
            processing_parameters: stored.processing_parameters,
            study_id,
            ebi: Capability::from_flag(stored.can_submit_to_ebi, || {
                self.ebi_run_accessions
                    .get(&id)
                    .cloned()
                    .unwrap_or_default()
            }),
            vamps: Capability::from_flag(stored.can_submit_to_vamps, || {
                stored.submitted_to_vamps
            }),
        }))
    }

    fn filepath(&self, id: FilepathId) -> Result<Filepath> {
        let stored = self
            .filepaths
            .get(&id)
            .ok_or(RepositoryError::NotFound)?;
        Ok(Filepath {
            id,
            path: stored.path.clone(),
            filepath_type: self.term(Vocabulary::FilepathType, stored.filepath_type_id)?,
        })
    }
}

/// Lineage store kept entirely in process memory
///
/// The setup and inspection helpers share the lock an open transaction
/// holds, so calling them while a transaction is alive on the same task
/// waits forever. Commit or drop the transaction first.
#[derive(Debug, Clone)]
pub struct InMemoryLineageStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryLineageStore {
    /// Create an empty store with the default vocabularies
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::seeded())),
        }
    }

    /// Add a vocabulary entry, returning its id (existing entries are reused)
    pub async fn add_vocabulary_entry(&self, category: Vocabulary, value: &str) -> VocabularyId {
        let mut state = self.state.lock().await;
        if let Some(id) = state.resolve(category, value) {
            return id;
        }
        let values = state.vocabularies.entry(category).or_default();
        values.push(value.to_string());
        values.len() as VocabularyId
    }

    pub async fn add_study(&self) -> StudyId {
        let mut state = self.state.lock().await;
        state.last_study_id += 1;
        let id = StudyId(state.last_study_id);
        state.studies.insert(id);
        id
    }

    /// Register an upload template for `study` carrying `data_type`
    pub async fn add_prep_template(&self, study: StudyId, data_type: &str) -> Result<PrepTemplateId> {
        let mut state = self.state.lock().await;
        if !state.studies.contains(&study) {
            return Err(ArtifactError::NotFound {
                entity: "Study",
                id: study.0,
            });
        }
        let data_type_id = state.resolve(Vocabulary::DataType, data_type).ok_or_else(|| {
            ArtifactError::UnknownVocabulary {
                category: Vocabulary::DataType,
                value: data_type.to_string(),
            }
        })?;
        state.last_template_id += 1;
        let id = PrepTemplateId(state.last_template_id);
        state.prep_templates.insert(
            id,
            StoredTemplate {
                study_id: study,
                data_type_id,
                artifact_id: None,
            },
        );
        Ok(id)
    }

    /// Mark `artifact` as consumed by an analysis
    pub async fn record_analysis(&self, artifact: ArtifactId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.require_artifact(artifact)?;
        state.analyzed.insert(artifact);
        Ok(())
    }

    /// Committed view of a prep template
    pub async fn prep_template(&self, id: PrepTemplateId) -> Result<Option<PrepTemplate>> {
        let state = self.state.lock().await;
        template_view(&state, id)
    }

    /// Files handed back to the pending-upload area of `study`
    pub async fn uploads(&self, study: StudyId) -> Vec<Filepath> {
        let state = self.state.lock().await;
        state.uploads.get(&study).cloned().unwrap_or_default()
    }

    /// Storage category a committed filepath was tagged with
    pub async fn storage_category(&self, id: FilepathId) -> Option<String> {
        let state = self.state.lock().await;
        state
            .filepaths
            .get(&id)
            .map(|fp| fp.storage_category.clone())
    }

    pub async fn artifact_count(&self) -> usize {
        self.state.lock().await.artifacts.len()
    }

    pub async fn edge_count(&self) -> usize {
        self.state.lock().await.parent_edges.len()
    }
}

impl Default for InMemoryLineageStore {
    fn default() -> Self {
        Self::new()
    }
}

fn template_view(state: &MemoryState, id: PrepTemplateId) -> Result<Option<PrepTemplate>> {
    let Some(stored) = state.prep_templates.get(&id) else {
        return Ok(None);
    };
    Ok(Some(PrepTemplate {
        id,
        study_id: stored.study_id,
        data_type: state.term(Vocabulary::DataType, stored.data_type_id)?,
        artifact_id: stored.artifact_id,
    }))
}

#[async_trait::async_trait]
impl LineageStore for InMemoryLineageStore {
    async fn begin(&self) -> Result<Box<dyn LineageTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTx {
            guard: Some(guard),
            working,
        }))
    }
}

/// Transaction over [`InMemoryLineageStore`]
pub struct InMemoryTx {
    guard: Option<OwnedMutexGuard<MemoryState>>,
    working: MemoryState,
}

impl InMemoryTx {
    fn state(&mut self) -> Result<&mut MemoryState> {
        if self.guard.is_none() {
            return Err(RepositoryError::TransactionClosed.into());
        }
        Ok(&mut self.working)
    }
}

#[async_trait::async_trait]
impl VocabularyResolver for InMemoryTx {
    async fn resolve(&mut self, category: Vocabulary, value: &str) -> Result<VocabularyId> {
        self.state()?
            .resolve(category, value)
            .ok_or_else(|| ArtifactError::UnknownVocabulary {
                category,
                value: value.to_string(),
            })
    }
}

#[async_trait::async_trait]
impl LineageTx for InMemoryTx {
    async fn insert_artifact(&mut self, record: &ArtifactInsert) -> Result<ArtifactId> {
        let state = self.state()?;
        state.last_artifact_id += 1;
        let id = ArtifactId(state.last_artifact_id);
        state.artifacts.insert(
            id,
            StoredArtifact {
                timestamp: record.timestamp,
                visibility_id: record.visibility_id,
                artifact_type_id: record.artifact_type_id,
                data_type_id: record.data_type_id,
                processing_parameters: record.processing_parameters,
                can_submit_to_ebi: record.can_submit_to_ebi,
                can_submit_to_vamps: record.can_submit_to_vamps,
                submitted_to_vamps: false,
            },
        );
        Ok(id)
    }

    async fn fetch_artifact(&mut self, id: ArtifactId, _lock: RowLock) -> Result<Option<Artifact>> {
        self.state()?.artifact(id)
    }

    async fn update_visibility(
        &mut self,
        id: ArtifactId,
        visibility_id: VocabularyId,
    ) -> Result<()> {
        let stored = self
            .state()?
            .artifacts
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        stored.visibility_id = visibility_id;
        Ok(())
    }

    async fn update_submitted_to_vamps(&mut self, id: ArtifactId, submitted: bool) -> Result<()> {
        let stored = self
            .state()?
            .artifacts
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        stored.submitted_to_vamps = submitted;
        Ok(())
    }

    async fn delete_artifact(&mut self, id: ArtifactId) -> Result<()> {
        let state = self.state()?;
        let referenced = state.parent_edges.iter().any(|(c, p)| *c == id || *p == id)
            || state.study_artifacts.contains_key(&id)
            || state.artifact_filepaths.iter().any(|(a, _)| *a == id)
            || state
                .prep_templates
                .values()
                .any(|t| t.artifact_id == Some(id));
        if referenced {
            return Err(RepositoryError::InvalidData(format!(
                "artifact {id} is still referenced"
            ))
            .into());
        }
        state
            .artifacts
            .remove(&id)
            .ok_or(RepositoryError::NotFound)?;
        state.ebi_run_accessions.remove(&id);
        Ok(())
    }

    async fn insert_parent_edges(
        &mut self,
        child: ArtifactId,
        parents: &[ArtifactId],
    ) -> Result<()> {
        let state = self.state()?;
        state.require_artifact(child)?;
        for parent in parents {
            state.require_artifact(*parent)?;
            if *parent == child || !state.parent_edges.insert((child, *parent)) {
                return Err(RepositoryError::AlreadyExists.into());
            }
        }
        Ok(())
    }

    async fn parent_ids(&mut self, id: ArtifactId) -> Result<Vec<ArtifactId>> {
        let mut parents: Vec<ArtifactId> = self
            .state()?
            .parent_edges
            .iter()
            .filter(|(child, _)| *child == id)
            .map(|(_, parent)| *parent)
            .collect();
        parents.sort();
        Ok(parents)
    }

    async fn child_ids(&mut self, id: ArtifactId) -> Result<Vec<ArtifactId>> {
        let mut children: Vec<ArtifactId> = self
            .state()?
            .parent_edges
            .iter()
            .filter(|(_, parent)| *parent == id)
            .map(|(child, _)| *child)
            .collect();
        children.sort();
        Ok(children)
    }

    async fn delete_parent_edges(&mut self, child: ArtifactId) -> Result<()> {
        self.state()?.parent_edges.retain(|(c, _)| *c != child);
        Ok(())
    }

    async fn insert_study_artifact(&mut self, study: StudyId, artifact: ArtifactId) -> Result<()> {
        let state = self.state()?;
        if !state.studies.contains(&study) {
            return Err(ArtifactError::NotFound {
                entity: "Study",
                id: study.0,
            });
        }
        state.require_artifact(artifact)?;
        if state.study_artifacts.insert(artifact, study).is_some() {
            return Err(RepositoryError::AlreadyExists.into());
        }
        Ok(())
    }

    async fn delete_study_artifact(&mut self, artifact: ArtifactId) -> Result<()> {
        self.state()?.study_artifacts.remove(&artifact);
        Ok(())
    }

    async fn fetch_prep_template(&mut self, id: PrepTemplateId) -> Result<Option<PrepTemplate>> {
        template_view(self.state()?, id)
    }

    async fn link_prep_template(
        &mut self,
        template: PrepTemplateId,
        artifact: ArtifactId,
    ) -> Result<()> {
        let state = self.state()?;
        state.require_artifact(artifact)?;
        let stored = state
            .prep_templates
            .get_mut(&template)
            .ok_or(RepositoryError::NotFound)?;
        stored.artifact_id = Some(artifact);
        Ok(())
    }

    async fn prep_templates_linked_to(
        &mut self,
        artifacts: &[ArtifactId],
    ) -> Result<Vec<PrepTemplateId>> {
        Ok(self
            .state()?
            .prep_templates
            .iter()
            .filter(|(_, t)| t.artifact_id.is_some_and(|a| artifacts.contains(&a)))
            .map(|(id, _)| *id)
            .collect())
    }

    async fn unlink_prep_templates(&mut self, templates: &[PrepTemplateId]) -> Result<()> {
        let state = self.state()?;
        for id in templates {
            if let Some(stored) = state.prep_templates.get_mut(id) {
                stored.artifact_id = None;
            }
        }
        Ok(())
    }

    async fn insert_filepaths(
        &mut self,
        filepaths: &[FilepathInsert],
        storage_category: &str,
    ) -> Result<Vec<FilepathId>> {
        let state = self.state()?;
        let mut ids = Vec::with_capacity(filepaths.len());
        for fp in filepaths {
            state.last_filepath_id += 1;
            let id = FilepathId(state.last_filepath_id);
            state.filepaths.insert(
                id,
                StoredFilepath {
                    path: fp.path.clone(),
                    filepath_type_id: fp.filepath_type_id,
                    storage_category: storage_category.to_string(),
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    async fn link_filepaths(
        &mut self,
        artifact: ArtifactId,
        filepaths: &[FilepathId],
    ) -> Result<()> {
        let state = self.state()?;
        state.require_artifact(artifact)?;
        for id in filepaths {
            if !state.filepaths.contains_key(id) {
                return Err(RepositoryError::NotFound.into());
            }
            state.artifact_filepaths.insert((artifact, *id));
        }
        Ok(())
    }

    async fn filepaths(&mut self, artifact: ArtifactId) -> Result<Vec<Filepath>> {
        let state = self.state()?;
        state
            .artifact_filepaths
            .iter()
            .filter(|(a, _)| *a == artifact)
            .map(|(_, fp)| state.filepath(*fp))
            .collect()
    }

    async fn unlink_filepaths(&mut self, artifact: ArtifactId) -> Result<()> {
        self.state()?
            .artifact_filepaths
            .retain(|(a, _)| *a != artifact);
        Ok(())
    }

    async fn move_filepaths_to_upload_area(
        &mut self,
        study: StudyId,
        filepaths: &[Filepath],
    ) -> Result<()> {
        let state = self.state()?;
        for fp in filepaths {
            state.filepaths.remove(&fp.id);
        }
        state
            .uploads
            .entry(study)
            .or_default()
            .extend(filepaths.iter().cloned());
        Ok(())
    }

    async fn is_analyzed(&mut self, artifact: ArtifactId) -> Result<bool> {
        Ok(self.state()?.analyzed.contains(&artifact))
    }

    async fn insert_ebi_run_accessions(
        &mut self,
        artifact: ArtifactId,
        accessions: &BTreeMap<String, String>,
    ) -> Result<()> {
        let state = self.state()?;
        state.require_artifact(artifact)?;
        let stored = state.ebi_run_accessions.entry(artifact).or_default();
        for (sample, accession) in accessions {
            if stored.insert(sample.clone(), accession.clone()).is_some() {
                return Err(RepositoryError::AlreadyExists.into());
            }
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let mut guard = self
            .guard
            .take()
            .ok_or(RepositoryError::TransactionClosed)?;
        *guard = std::mem::take(&mut self.working);
        Ok(())
    }
}
