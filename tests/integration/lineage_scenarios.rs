//! Lineage scenarios against the in-memory store
//!
//! End-to-end flows through `ArtifactService`: building a processing
//! lineage, submitting it, tearing it down, and racing graph mutations.

mod common;

use lineage_artifacts::{ArtifactError, EbiRunAccessions, Visibility};

use crate::common::MemoryApp;

fn accessions(pairs: &[(&str, &str)]) -> EbiRunAccessions {
    pairs
        .iter()
        .map(|(s, a)| (s.to_string(), a.to_string()))
        .collect()
}

mod test_lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_root_with_two_children_scenario() {
        let app = MemoryApp::new().await;
        let a = app.root().await.unwrap();
        let b = app
            .service
            .create(&common::demultiplexed(&[a], app.parameters()).submittable_to_ebi())
            .await
            .unwrap()
            .id;
        let c = app
            .service
            .create(&common::demultiplexed(&[a], app.parameters()).submittable_to_ebi())
            .await
            .unwrap()
            .id;

        let err = app.service.delete(a).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Cannot delete artifact {a}: it has children: {b}, {c}")
        );

        app.service.delete(b).await.unwrap();
        assert_eq!(app.service.children(a).await.unwrap(), vec![c]);
        assert_eq!(app.service.parents(c).await.unwrap(), vec![a]);
        assert!(app.service.artifact(a).await.is_ok());
    }

    #[tokio::test]
    async fn test_processing_pipeline_teardown() {
        let app = MemoryApp::new().await;
        let raw = app.root().await.unwrap();
        let demux = app.child(&[raw]).await.unwrap();
        let otu = app
            .service
            .create(&lineage_artifacts::NewArtifact::processed(
                vec![lineage_artifacts::NewFilepath::new("/processed/otu.biom", "biom")],
                "BIOM",
                vec![demux],
                app.parameters(),
            ))
            .await
            .unwrap();

        assert_eq!(otu.artifact_type, "BIOM");
        assert_eq!(app.service.roots(otu.id).await.unwrap(), vec![raw]);
        assert_eq!(app.service.ancestors(otu.id).await.unwrap(), vec![demux, raw]);
        assert_eq!(
            app.service.descendants(raw).await.unwrap(),
            vec![demux, otu.id]
        );
        let templates = app.service.prep_templates(otu.id).await.unwrap();
        assert_eq!(templates, app.service.prep_templates(raw).await.unwrap());

        // leaves first
        app.service.delete(otu.id).await.unwrap();
        app.service.delete(demux).await.unwrap();
        app.service.delete(raw).await.unwrap();

        assert_eq!(app.store.artifact_count().await, 0);
        assert_eq!(app.store.edge_count().await, 0);
        assert_eq!(app.store.uploads(app.study).await.len(), 2);
        let template = app.store.prep_template(templates[0]).await.unwrap().unwrap();
        assert!(template.artifact_id.is_none());
    }

    #[tokio::test]
    async fn test_publication_locks_artifact() {
        let app = MemoryApp::new().await;
        let new = app.uploaded("16S").await.unwrap().submittable_to_ebi();
        let id = app.service.create(&new).await.unwrap().id;

        app.service
            .set_visibility(id, Visibility::Public)
            .await
            .unwrap();
        assert!(matches!(
            app.service.delete(id).await,
            Err(ArtifactError::Deletion { .. })
        ));

        // visibility is permissive; EBI submission still blocks deletion
        app.service
            .set_ebi_run_accessions(id, &accessions(&[("1.S1", "ERR1")]))
            .await
            .unwrap();
        app.service
            .set_visibility(id, Visibility::Sandbox)
            .await
            .unwrap();
        let err = app.service.delete(id).await.unwrap_err();
        assert!(err.to_string().contains("submitted to EBI"));
    }
}

mod test_concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_delete_and_child_creation_serialize() {
        for _ in 0..20 {
            let app = MemoryApp::new().await;
            let root = app.root().await.unwrap();

            let deleter = {
                let service = app.service.clone();
                tokio::spawn(async move { service.delete(root).await })
            };
            let creator = {
                let service = app.service.clone();
                let new = common::demultiplexed(&[root], app.parameters());
                tokio::spawn(async move { service.create(&new).await })
            };

            let deleted = deleter.await.unwrap();
            let created = creator.await.unwrap();

            match (deleted, created) {
                (Ok(()), Err(ArtifactError::NotFound { .. })) => {
                    assert_eq!(app.store.artifact_count().await, 0);
                }
                (Err(ArtifactError::Deletion { reason, .. }), Ok(child)) => {
                    assert!(reason.starts_with("it has children"));
                    assert_eq!(app.service.parents(child.id).await.unwrap(), vec![root]);
                }
                other => panic!("graph mutations interleaved: {other:?}"),
            }
            assert!(app.store.edge_count().await <= 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ebi_submissions_record_once() {
        let app = MemoryApp::new().await;
        let new = app.uploaded("16S").await.unwrap().submittable_to_ebi();
        let id = app.service.create(&new).await.unwrap().id;

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let service = app.service.clone();
                let run = format!("ERR{i}");
                let submitted = accessions(&[("1.S1", run.as_str())]);
                tokio::spawn(async move { service.set_ebi_run_accessions(id, &submitted).await })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => successes += 1,
                Err(ArtifactError::OperationNotPermitted(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(app.service.ebi_run_accessions(id).await.unwrap().len(), 1);
    }
}

#[test]
fn test_telemetry_init_is_idempotent() {
    let config = lineage_common::Config {
        database_url: "postgresql://localhost/lineage_test".to_string(),
        database_max_connections: 1,
        upload_dir: std::env::temp_dir(),
        rust_log: "lineage=debug".to_string(),
        log_format: lineage_common::config::LogFormat::Json,
    };
    lineage_common::telemetry::init(&config);
    lineage_common::telemetry::init(&config);
}
