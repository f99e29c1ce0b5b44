//! Postgres lineage store
//!
//! Every unit of work runs at SERIALIZABLE isolation. Rows that gate a
//! mutation are additionally locked (`FOR SHARE` on parents of a new
//! artifact, `FOR UPDATE` on an artifact being deleted or submitted) so a
//! child insert and a parent delete racing each other cannot both commit.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use lineage_common::{Config, RepositoryError};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};

use super::{FilepathInsert, LineageStore, LineageTx, RowLock};
use crate::domain::entities::{
    Artifact, ArtifactId, ArtifactInsert, CommandId, Filepath, FilepathId, ParameterSetId,
    PrepTemplate, PrepTemplateId, ProcessingParameters, StudyId,
};
use crate::domain::submission::Capability;
use crate::domain::vocabulary::{Vocabulary, VocabularyId, VocabularyResolver};
use crate::error::{ArtifactError, Result};

/// Artifact record joined with its vocabulary terms and owning study
const ARTIFACT_SELECT: &str = "\
    SELECT a.artifact_id, a.generated_timestamp, v.visibility, t.artifact_type, d.data_type, \
           a.command_id, a.command_parameters_id, a.can_be_submitted_to_ebi, \
           a.can_be_submitted_to_vamps, a.submitted_to_vamps, sa.study_id \
    FROM artifact a \
    JOIN visibility v ON v.visibility_id = a.visibility_id \
    JOIN artifact_type t ON t.artifact_type_id = a.artifact_type_id \
    JOIN data_type d ON d.data_type_id = a.data_type_id \
    JOIN study_artifact sa ON sa.artifact_id = a.artifact_id \
    WHERE a.artifact_id = $1";

#[derive(Debug, sqlx::FromRow)]
struct ArtifactRow {
    artifact_id: i64,
    generated_timestamp: DateTime<Utc>,
    visibility: String,
    artifact_type: String,
    data_type: String,
    command_id: Option<i64>,
    command_parameters_id: Option<i64>,
    can_be_submitted_to_ebi: bool,
    can_be_submitted_to_vamps: bool,
    submitted_to_vamps: bool,
    study_id: i64,
}

impl ArtifactRow {
    fn into_artifact(self, accessions: BTreeMap<String, String>) -> Result<Artifact> {
        let processing_parameters = match (self.command_id, self.command_parameters_id) {
            (Some(command), Some(parameters)) => Some(ProcessingParameters::new(
                CommandId(command),
                ParameterSetId(parameters),
            )),
            (None, None) => None,
            _ => {
                return Err(RepositoryError::InvalidData(format!(
                    "artifact {} has a partial processing reference",
                    self.artifact_id
                ))
                .into())
            }
        };

        Ok(Artifact {
            id: ArtifactId(self.artifact_id),
            timestamp: self.generated_timestamp,
            visibility: self.visibility.parse()?,
            artifact_type: self.artifact_type,
            data_type: self.data_type,
            processing_parameters,
            study_id: StudyId(self.study_id),
            ebi: Capability::from_flag(self.can_be_submitted_to_ebi, || accessions),
            vamps: Capability::from_flag(self.can_be_submitted_to_vamps, || {
                self.submitted_to_vamps
            }),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PrepTemplateRow {
    prep_template_id: i64,
    study_id: i64,
    data_type: String,
    artifact_id: Option<i64>,
}

impl From<PrepTemplateRow> for PrepTemplate {
    fn from(row: PrepTemplateRow) -> Self {
        Self {
            id: PrepTemplateId(row.prep_template_id),
            study_id: StudyId(row.study_id),
            data_type: row.data_type,
            artifact_id: row.artifact_id.map(ArtifactId),
        }
    }
}

fn ids<T: Copy>(values: &[T], raw: impl Fn(T) -> i64) -> Vec<i64> {
    values.iter().copied().map(raw).collect()
}

/// Where a file lands in the pending-upload area of `study`
pub fn upload_destination(upload_dir: &Path, study: StudyId, path: &str) -> PathBuf {
    let source = Path::new(path);
    let name = source.file_name().unwrap_or(source.as_os_str());
    upload_dir.join(study.to_string()).join(name)
}

/// File relocation queued until the transaction commits
#[derive(Debug)]
struct PendingMove {
    filepath: FilepathId,
    source: PathBuf,
    destination: PathBuf,
}

impl PendingMove {
    /// First candidate destination not already taken by another file.
    ///
    /// A name clash falls back to `<filepath id>_<file name>` in the same
    /// directory; if that is taken as well the move is refused.
    async fn free_destination(&self) -> std::io::Result<PathBuf> {
        if !tokio::fs::try_exists(&self.destination).await? {
            return Ok(self.destination.clone());
        }
        let name = self.destination.file_name().unwrap_or_default();
        let renamed = self
            .destination
            .with_file_name(format!("{}_{}", self.filepath, name.to_string_lossy()));
        if tokio::fs::try_exists(&renamed).await? {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", renamed.display()),
            ));
        }
        Ok(renamed)
    }

    async fn run(&self) -> std::io::Result<PathBuf> {
        if let Some(parent) = self.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let destination = self.free_destination().await?;
        tokio::fs::rename(&self.source, &destination).await?;
        Ok(destination)
    }
}

/// Lineage store backed by PostgreSQL
#[derive(Clone)]
pub struct PgLineageStore {
    pool: PgPool,
    upload_dir: PathBuf,
}

impl PgLineageStore {
    pub fn new(pool: PgPool, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            upload_dir: upload_dir.into(),
        }
    }

    /// Connect using the database settings from `config`
    #[mutants::skip] // Needs a live database
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(&config.database_url)
            .await?;
        tracing::info!(
            max_connections = config.database_max_connections,
            "Lineage store connected"
        );
        Ok(Self::new(pool, config.upload_dir.clone()))
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(sqlx::Error::from)?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl LineageStore for PgLineageStore {
    async fn begin(&self) -> Result<Box<dyn LineageTx>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgLineageTx {
            tx: Some(tx),
            upload_dir: self.upload_dir.clone(),
            pending_moves: Vec::new(),
        }))
    }
}

/// Transaction over [`PgLineageStore`]
///
/// File relocations requested during the transaction run after a
/// successful commit. A relocation that fails is logged and left for an
/// operator; it does not undo or fail the committed transaction.
pub struct PgLineageTx {
    tx: Option<Transaction<'static, Postgres>>,
    upload_dir: PathBuf,
    pending_moves: Vec<PendingMove>,
}

impl PgLineageTx {
    fn conn(&mut self) -> Result<&mut PgConnection> {
        let tx = self
            .tx
            .as_mut()
            .ok_or(RepositoryError::TransactionClosed)?;
        Ok(&mut **tx)
    }

    /// Attempt every queued move, returning how many failed
    async fn run_pending_moves(&mut self) -> usize {
        let mut failed = 0;
        for pending in std::mem::take(&mut self.pending_moves) {
            match pending.run().await {
                Ok(destination) => tracing::debug!(
                    filepath_id = %pending.filepath,
                    destination = %destination.display(),
                    "File moved to upload area"
                ),
                Err(e) => {
                    failed += 1;
                    tracing::error!(
                        error = %e,
                        filepath_id = %pending.filepath,
                        source = %pending.source.display(),
                        destination = %pending.destination.display(),
                        "Failed to move file to upload area"
                    );
                }
            }
        }
        failed
    }
}

#[async_trait::async_trait]
impl VocabularyResolver for PgLineageTx {
    async fn resolve(&mut self, category: Vocabulary, value: &str) -> Result<VocabularyId> {
        let query = format!(
            "SELECT {} FROM {} WHERE {} = $1",
            category.id_column(),
            category.table(),
            category.table()
        );
        sqlx::query_scalar::<_, i64>(&query)
            .bind(value)
            .fetch_optional(self.conn()?)
            .await?
            .ok_or_else(|| ArtifactError::UnknownVocabulary {
                category,
                value: value.to_string(),
            })
    }
}

#[async_trait::async_trait]
impl LineageTx for PgLineageTx {
    async fn insert_artifact(&mut self, record: &ArtifactInsert) -> Result<ArtifactId> {
        let id = sqlx::query_scalar::<_, ArtifactId>(
            r#"
            INSERT INTO artifact (
                generated_timestamp, command_id, command_parameters_id,
                visibility_id, artifact_type_id, data_type_id,
                can_be_submitted_to_ebi, can_be_submitted_to_vamps, submitted_to_vamps
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE)
            RETURNING artifact_id
            "#,
        )
        .bind(record.timestamp)
        .bind(record.processing_parameters.map(|p| p.command_id))
        .bind(record.processing_parameters.map(|p| p.parameter_set_id))
        .bind(record.visibility_id)
        .bind(record.artifact_type_id)
        .bind(record.data_type_id)
        .bind(record.can_submit_to_ebi)
        .bind(record.can_submit_to_vamps)
        .fetch_one(self.conn()?)
        .await?;
        Ok(id)
    }

    async fn fetch_artifact(&mut self, id: ArtifactId, lock: RowLock) -> Result<Option<Artifact>> {
        let query = match lock {
            RowLock::None => ARTIFACT_SELECT.to_string(),
            RowLock::Share => format!("{ARTIFACT_SELECT} FOR SHARE OF a"),
            RowLock::Update => format!("{ARTIFACT_SELECT} FOR UPDATE OF a"),
        };
        let Some(row) = sqlx::query_as::<_, ArtifactRow>(&query)
            .bind(id)
            .fetch_optional(self.conn()?)
            .await?
        else {
            return Ok(None);
        };

        let accessions = if row.can_be_submitted_to_ebi {
            sqlx::query_as::<_, (String, String)>(
                "SELECT sample_id, ebi_run_accession FROM ebi_run_accession \
                 WHERE artifact_id = $1 ORDER BY sample_id",
            )
            .bind(id)
            .fetch_all(self.conn()?)
            .await?
            .into_iter()
            .collect()
        } else {
            BTreeMap::new()
        };

        row.into_artifact(accessions).map(Some)
    }

    async fn update_visibility(
        &mut self,
        id: ArtifactId,
        visibility_id: VocabularyId,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE artifact SET visibility_id = $2 WHERE artifact_id = $1")
            .bind(id)
            .bind(visibility_id)
            .execute(self.conn()?)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound.into());
        }
        Ok(())
    }

    async fn update_submitted_to_vamps(&mut self, id: ArtifactId, submitted: bool) -> Result<()> {
        let result =
            sqlx::query("UPDATE artifact SET submitted_to_vamps = $2 WHERE artifact_id = $1")
                .bind(id)
                .bind(submitted)
                .execute(self.conn()?)
                .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound.into());
        }
        Ok(())
    }

    async fn delete_artifact(&mut self, id: ArtifactId) -> Result<()> {
        let result = sqlx::query("DELETE FROM artifact WHERE artifact_id = $1")
            .bind(id)
            .execute(self.conn()?)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound.into());
        }
        Ok(())
    }

    async fn insert_parent_edges(
        &mut self,
        child: ArtifactId,
        parents: &[ArtifactId],
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO parent_artifact (artifact_id, parent_id) \
             SELECT $1, UNNEST($2::bigint[])",
        )
        .bind(child)
        .bind(ids(parents, |p| p.0))
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn parent_ids(&mut self, id: ArtifactId) -> Result<Vec<ArtifactId>> {
        let parents = sqlx::query_scalar::<_, ArtifactId>(
            "SELECT parent_id FROM parent_artifact WHERE artifact_id = $1 ORDER BY parent_id",
        )
        .bind(id)
        .fetch_all(self.conn()?)
        .await?;
        Ok(parents)
    }

    async fn child_ids(&mut self, id: ArtifactId) -> Result<Vec<ArtifactId>> {
        let children = sqlx::query_scalar::<_, ArtifactId>(
            "SELECT artifact_id FROM parent_artifact WHERE parent_id = $1 ORDER BY artifact_id",
        )
        .bind(id)
        .fetch_all(self.conn()?)
        .await?;
        Ok(children)
    }

    async fn delete_parent_edges(&mut self, child: ArtifactId) -> Result<()> {
        sqlx::query("DELETE FROM parent_artifact WHERE artifact_id = $1")
            .bind(child)
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn insert_study_artifact(&mut self, study: StudyId, artifact: ArtifactId) -> Result<()> {
        sqlx::query("INSERT INTO study_artifact (study_id, artifact_id) VALUES ($1, $2)")
            .bind(study)
            .bind(artifact)
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn delete_study_artifact(&mut self, artifact: ArtifactId) -> Result<()> {
        sqlx::query("DELETE FROM study_artifact WHERE artifact_id = $1")
            .bind(artifact)
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn fetch_prep_template(&mut self, id: PrepTemplateId) -> Result<Option<PrepTemplate>> {
        let row = sqlx::query_as::<_, PrepTemplateRow>(
            "SELECT p.prep_template_id, p.study_id, d.data_type, p.artifact_id \
             FROM prep_template p \
             JOIN data_type d ON d.data_type_id = p.data_type_id \
             WHERE p.prep_template_id = $1 \
             FOR UPDATE OF p",
        )
        .bind(id)
        .fetch_optional(self.conn()?)
        .await?;
        Ok(row.map(PrepTemplate::from))
    }

    async fn link_prep_template(
        &mut self,
        template: PrepTemplateId,
        artifact: ArtifactId,
    ) -> Result<()> {
        let result =
            sqlx::query("UPDATE prep_template SET artifact_id = $2 WHERE prep_template_id = $1")
                .bind(template)
                .bind(artifact)
                .execute(self.conn()?)
                .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound.into());
        }
        Ok(())
    }

    async fn prep_templates_linked_to(
        &mut self,
        artifacts: &[ArtifactId],
    ) -> Result<Vec<PrepTemplateId>> {
        let templates = sqlx::query_scalar::<_, PrepTemplateId>(
            "SELECT prep_template_id FROM prep_template \
             WHERE artifact_id = ANY($1) ORDER BY prep_template_id",
        )
        .bind(ids(artifacts, |a| a.0))
        .fetch_all(self.conn()?)
        .await?;
        Ok(templates)
    }

    async fn unlink_prep_templates(&mut self, templates: &[PrepTemplateId]) -> Result<()> {
        sqlx::query("UPDATE prep_template SET artifact_id = NULL WHERE prep_template_id = ANY($1)")
            .bind(ids(templates, |t| t.0))
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn insert_filepaths(
        &mut self,
        filepaths: &[FilepathInsert],
        storage_category: &str,
    ) -> Result<Vec<FilepathId>> {
        let mut inserted = Vec::with_capacity(filepaths.len());
        for fp in filepaths {
            let id = sqlx::query_scalar::<_, FilepathId>(
                "INSERT INTO filepath (filepath, filepath_type_id, data_directory) \
                 VALUES ($1, $2, $3) RETURNING filepath_id",
            )
            .bind(&fp.path)
            .bind(fp.filepath_type_id)
            .bind(storage_category)
            .fetch_one(self.conn()?)
            .await?;
            inserted.push(id);
        }
        Ok(inserted)
    }

    async fn link_filepaths(
        &mut self,
        artifact: ArtifactId,
        filepaths: &[FilepathId],
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO artifact_filepath (artifact_id, filepath_id) \
             SELECT $1, UNNEST($2::bigint[])",
        )
        .bind(artifact)
        .bind(ids(filepaths, |f| f.0))
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn filepaths(&mut self, artifact: ArtifactId) -> Result<Vec<Filepath>> {
        let rows = sqlx::query_as::<_, (i64, String, String)>(
            "SELECT f.filepath_id, f.filepath, t.filepath_type \
             FROM artifact_filepath af \
             JOIN filepath f ON f.filepath_id = af.filepath_id \
             JOIN filepath_type t ON t.filepath_type_id = f.filepath_type_id \
             WHERE af.artifact_id = $1 \
             ORDER BY f.filepath_id",
        )
        .bind(artifact)
        .fetch_all(self.conn()?)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, path, filepath_type)| Filepath {
                id: FilepathId(id),
                path,
                filepath_type,
            })
            .collect())
    }

    async fn unlink_filepaths(&mut self, artifact: ArtifactId) -> Result<()> {
        sqlx::query("DELETE FROM artifact_filepath WHERE artifact_id = $1")
            .bind(artifact)
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn move_filepaths_to_upload_area(
        &mut self,
        study: StudyId,
        filepaths: &[Filepath],
    ) -> Result<()> {
        let filepath_ids: Vec<i64> = filepaths.iter().map(|fp| fp.id.0).collect();
        sqlx::query("DELETE FROM filepath WHERE filepath_id = ANY($1)")
            .bind(filepath_ids)
            .execute(self.conn()?)
            .await?;

        for fp in filepaths {
            self.pending_moves.push(PendingMove {
                filepath: fp.id,
                source: PathBuf::from(&fp.path),
                destination: upload_destination(&self.upload_dir, study, &fp.path),
            });
        }
        Ok(())
    }

    async fn is_analyzed(&mut self, artifact: ArtifactId) -> Result<bool> {
        let analyzed = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM analysis_sample WHERE artifact_id = $1)",
        )
        .bind(artifact)
        .fetch_one(self.conn()?)
        .await?;
        Ok(analyzed)
    }

    async fn insert_ebi_run_accessions(
        &mut self,
        artifact: ArtifactId,
        accessions: &BTreeMap<String, String>,
    ) -> Result<()> {
        let (samples, runs): (Vec<String>, Vec<String>) = accessions
            .iter()
            .map(|(s, a)| (s.clone(), a.clone()))
            .unzip();
        sqlx::query(
            "INSERT INTO ebi_run_accession (sample_id, artifact_id, ebi_run_accession) \
             SELECT s, $2, a FROM UNNEST($1::text[], $3::text[]) AS t(s, a)",
        )
        .bind(samples)
        .bind(artifact)
        .bind(runs)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let tx = self.tx.take().ok_or(RepositoryError::TransactionClosed)?;
        tx.commit().await?;
        let failed = self.run_pending_moves().await;
        if failed > 0 {
            tracing::warn!(failed, "Committed with files left outside the upload area");
        }
        Ok(())
    }
}
