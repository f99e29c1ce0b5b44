//! Postgres lineage store tests
//!
//! Require a database: set TEST_DATABASE_URL (or DATABASE_URL) and run
//! with `--ignored`.

mod common;

use lineage_artifacts::{
    ArtifactError, EbiRunAccessions, NewArtifact, NewFilepath, RowLock, Visibility,
};
use lineage_artifacts::{LineageStore, PrepTemplateId};

use crate::common::PgApp;

async fn template_artifact(app: &PgApp, template: PrepTemplateId) -> Option<i64> {
    sqlx::query_scalar::<_, Option<i64>>(
        "SELECT artifact_id FROM prep_template WHERE prep_template_id = $1",
    )
    .bind(template)
    .fetch_one(&app.pool)
    .await
    .unwrap()
}

mod test_creation {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires a PostgreSQL database
    async fn test_root_artifact_persisted() {
        let app = PgApp::new().await.unwrap();
        let new = app.uploaded(app.study, "16S").await.unwrap().submittable_to_vamps();
        let template = new.prep_template.unwrap();

        let artifact = app.service.create(&new).await.unwrap();

        let stored = app.service.artifact(artifact.id).await.unwrap();
        assert_eq!(stored, artifact);
        assert_eq!(stored.visibility, Visibility::Sandbox);
        assert_eq!(stored.study_id, app.study);
        assert!(stored.can_submit_to_vamps());
        assert!(!stored.can_submit_to_ebi());
        assert_eq!(template_artifact(&app, template).await, Some(artifact.id.0));

        let filepaths = app.service.filepaths(artifact.id).await.unwrap();
        assert_eq!(filepaths.len(), 2);
        assert_eq!(filepaths[0].filepath_type, "raw_forward_seqs");
        let category: String = sqlx::query_scalar(
            "SELECT data_directory FROM filepath WHERE filepath_id = $1",
        )
        .bind(filepaths[0].id)
        .fetch_one(&app.pool)
        .await
        .unwrap();
        assert_eq!(category, "FASTQ");
    }

    #[tokio::test]
    #[ignore] // Requires a PostgreSQL database
    async fn test_processing_parameters_round_trip() {
        let app = PgApp::new().await.unwrap();
        let new = app.uploaded(app.study, "16S").await.unwrap();
        let root = app.service.create(&new).await.unwrap();
        let parameters = app.processing_parameters().await.unwrap();

        let child = app
            .service
            .create(&common::demultiplexed(&[root.id], parameters))
            .await
            .unwrap();

        let stored = app.service.artifact(child.id).await.unwrap();
        assert_eq!(stored.processing_parameters, Some(parameters));
        assert_eq!(stored.data_type, "16S");
        assert_eq!(app.service.parents(child.id).await.unwrap(), vec![root.id]);
        assert_eq!(app.service.roots(child.id).await.unwrap(), vec![root.id]);
    }

    #[tokio::test]
    #[ignore] // Requires a PostgreSQL database
    async fn test_parents_from_multiple_studies_rejected() {
        let app = PgApp::new().await.unwrap();
        let other = app.create_study("Second study").await.unwrap();
        let a = app
            .service
            .create(&app.uploaded(app.study, "16S").await.unwrap())
            .await
            .unwrap();
        let b = app
            .service
            .create(&app.uploaded(other, "16S").await.unwrap())
            .await
            .unwrap();
        let parameters = app.processing_parameters().await.unwrap();

        let err = app
            .service
            .create(&common::demultiplexed(&[a.id, b.id], parameters))
            .await
            .unwrap_err();

        assert!(err
            .to_string()
            .contains(&format!("parents from multiple studies provided: {}, {}", app.study, other)));
    }

    #[tokio::test]
    #[ignore] // Requires a PostgreSQL database
    async fn test_failed_creation_rolls_back() {
        let app = PgApp::new().await.unwrap();
        let mut new = app.uploaded(app.study, "16S").await.unwrap();
        let template = new.prep_template.unwrap();
        new.filepaths
            .push(NewFilepath::new("/raw/readme.txt", "not_a_filepath_type"));

        let err = app.service.create(&new).await.unwrap_err();
        assert!(matches!(err, ArtifactError::UnknownVocabulary { .. }));

        assert_eq!(template_artifact(&app, template).await, None);
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM study_artifact WHERE study_id = $1")
                .bind(app.study)
                .fetch_one(&app.pool)
                .await
                .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    #[ignore] // Requires a PostgreSQL database
    async fn test_uncommitted_transaction_is_invisible() {
        let app = PgApp::new().await.unwrap();
        let new = app.uploaded(app.study, "16S").await.unwrap();

        let id = {
            let mut tx = app.store.begin().await.unwrap();
            lineage_artifacts::create_artifact_tx(tx.as_mut(), &new)
                .await
                .unwrap()
                .id
        };

        let mut tx = app.store.begin().await.unwrap();
        assert!(tx.fetch_artifact(id, RowLock::None).await.unwrap().is_none());
    }
}

mod test_deletion {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires a PostgreSQL database
    async fn test_root_deletion_moves_files_after_commit() {
        let app = PgApp::new().await.unwrap();
        let new = app.uploaded(app.study, "16S").await.unwrap();
        let template = new.prep_template.unwrap();
        let root = app.service.create(&new).await.unwrap();
        let filepaths = app.service.filepaths(root.id).await.unwrap();

        app.service.delete(root.id).await.unwrap();

        assert!(matches!(
            app.service.artifact(root.id).await,
            Err(ArtifactError::NotFound { .. })
        ));
        assert_eq!(template_artifact(&app, template).await, None);
        for fp in &filepaths {
            let source = std::path::Path::new(&fp.path);
            let name = source.file_name().unwrap().to_string_lossy();
            assert!(!source.exists());
            assert!(app.upload_path(app.study, &name).exists());
        }
        let remaining: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM filepath WHERE filepath_id = ANY($1)")
                .bind(filepaths.iter().map(|fp| fp.id.0).collect::<Vec<_>>())
                .fetch_one(&app.pool)
                .await
                .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    #[ignore] // Requires a PostgreSQL database
    async fn test_missing_file_does_not_fail_committed_deletion() {
        let app = PgApp::new().await.unwrap();
        let root = app
            .service
            .create(&app.uploaded(app.study, "16S").await.unwrap())
            .await
            .unwrap();
        let filepaths = app.service.filepaths(root.id).await.unwrap();
        std::fs::remove_file(&filepaths[0].path).unwrap();

        app.service.delete(root.id).await.unwrap();

        assert!(matches!(
            app.service.artifact(root.id).await,
            Err(ArtifactError::NotFound { .. })
        ));
        let moved = std::path::Path::new(&filepaths[1].path);
        let name = moved.file_name().unwrap().to_string_lossy();
        assert!(!moved.exists());
        assert!(app.upload_path(app.study, &name).exists());
    }

    #[tokio::test]
    #[ignore] // Requires a PostgreSQL database
    async fn test_rejected_deletion_moves_nothing() {
        let app = PgApp::new().await.unwrap();
        let root = app
            .service
            .create(&app.uploaded(app.study, "16S").await.unwrap())
            .await
            .unwrap();
        app.record_analysis(root.id).await.unwrap();

        let err = app.service.delete(root.id).await.unwrap_err();

        assert_eq!(
            err.to_string(),
            format!("Cannot delete artifact {}: it has been analyzed", root.id)
        );
        for fp in app.service.filepaths(root.id).await.unwrap() {
            assert!(std::path::Path::new(&fp.path).exists());
        }
    }

    #[tokio::test]
    #[ignore] // Requires a PostgreSQL database
    async fn test_derived_deletion_keeps_parent() {
        let app = PgApp::new().await.unwrap();
        let a = app
            .service
            .create(&app.uploaded(app.study, "16S").await.unwrap())
            .await
            .unwrap();
        let parameters = app.processing_parameters().await.unwrap();
        let b = app
            .service
            .create(&common::demultiplexed(&[a.id], parameters))
            .await
            .unwrap();
        let c = app
            .service
            .create(&common::demultiplexed(&[a.id], parameters))
            .await
            .unwrap();

        app.service.delete(b.id).await.unwrap();

        assert_eq!(app.service.children(a.id).await.unwrap(), vec![c.id]);
        assert!(app.service.artifact(a.id).await.is_ok());
    }

    #[tokio::test]
    #[ignore] // Requires a PostgreSQL database
    async fn test_concurrent_delete_and_child_creation() {
        let app = PgApp::new().await.unwrap();
        let root = app
            .service
            .create(&app.uploaded(app.study, "16S").await.unwrap())
            .await
            .unwrap();
        let parameters = app.processing_parameters().await.unwrap();

        let deleter = {
            let service = app.service.clone();
            tokio::spawn(async move { service.delete(root.id).await })
        };
        let creator = {
            let service = app.service.clone();
            let new = common::demultiplexed(&[root.id], parameters);
            tokio::spawn(async move { service.create(&new).await })
        };

        let deleted = deleter.await.unwrap();
        let created = creator.await.unwrap();
        assert!(
            !(deleted.is_ok() && created.is_ok()),
            "a parent was deleted while gaining a child"
        );

        if let Ok(child) = created {
            assert_eq!(app.service.parents(child.id).await.unwrap(), vec![root.id]);
        }
    }
}

mod test_submission {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires a PostgreSQL database
    async fn test_ebi_accessions_written_once() {
        let app = PgApp::new().await.unwrap();
        let new = app.uploaded(app.study, "16S").await.unwrap().submittable_to_ebi();
        let id = app.service.create(&new).await.unwrap().id;

        let first: EbiRunAccessions = [
            ("1.SKB1".to_string(), "ERR0001".to_string()),
            ("1.SKB2".to_string(), "ERR0002".to_string()),
        ]
        .into_iter()
        .collect();
        app.service.set_ebi_run_accessions(id, &first).await.unwrap();

        let again: EbiRunAccessions = [("1.SKB3".to_string(), "ERR0003".to_string())]
            .into_iter()
            .collect();
        let err = app
            .service
            .set_ebi_run_accessions(id, &again)
            .await
            .unwrap_err();

        assert!(matches!(err, ArtifactError::OperationNotPermitted(_)));
        assert_eq!(app.service.ebi_run_accessions(id).await.unwrap(), first);
    }

    #[tokio::test]
    #[ignore] // Requires a PostgreSQL database
    async fn test_vamps_requires_capability() {
        let app = PgApp::new().await.unwrap();
        let plain = app
            .service
            .create(&app.uploaded(app.study, "16S").await.unwrap())
            .await
            .unwrap();
        assert!(matches!(
            app.service.set_submitted_to_vamps(plain.id, true).await,
            Err(ArtifactError::OperationNotPermitted(_))
        ));

        let capable = NewArtifact {
            can_submit_to_vamps: true,
            ..app.uploaded(app.study, "18S").await.unwrap()
        };
        let id = app.service.create(&capable).await.unwrap().id;
        app.service.set_submitted_to_vamps(id, true).await.unwrap();
        assert!(app.service.is_submitted_to_vamps(id).await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires a PostgreSQL database
    async fn test_visibility_round_trip() {
        let app = PgApp::new().await.unwrap();
        let id = app
            .service
            .create(&app.uploaded(app.study, "16S").await.unwrap())
            .await
            .unwrap()
            .id;

        app.service
            .set_visibility(id, Visibility::Public)
            .await
            .unwrap();
        app.service
            .set_visibility(id, Visibility::AwaitingApproval)
            .await
            .unwrap();
        assert_eq!(
            app.service.artifact(id).await.unwrap().visibility,
            Visibility::AwaitingApproval
        );
    }
}
