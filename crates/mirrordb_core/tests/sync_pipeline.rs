//! End-to-end sync scenarios against real git working trees.

use mirrordb_core::{
    ArtifactSet, ArtifactStatus, DocumentationGenerator, GitConfig, MetadataStore, MockRemoteHost,
    Phase, ProgressLog, PublishOutcome, RemoteCall, SyncPipeline, METADATA_FILE,
};
use mirrordb_testkit::prelude::*;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn efs_buywatch_lands_at_canonical_path() {
    with_workspace(|ws| {
        let pipeline = ws.pipeline(Arc::new(ExportFetcher::new()));
        let log = ProgressLog::new();

        let outcome = pipeline.run_sync(&efs_target(), &log);
        assert!(outcome.is_success(), "{:?}", outcome.failure);

        let db_root = ws.base().join("EFS-Server/Dev/Buywatch");
        assert_eq!(outcome.database_dir.as_deref(), Some(db_root.as_path()));
        assert!(db_root
            .join("src/Objects/database_Buywatch/database.yaml")
            .is_file());

        let sidecar: serde_json::Value =
            serde_json::from_str(&read_file(&db_root, METADATA_FILE)).unwrap();
        assert_eq!(sidecar["database_id"], "jz79ok8wdsbd");
        assert_eq!(sidecar["database_name"], "Buywatch");

        assert!(db_root.join("ERD.md").is_file());
        assert!(db_root.join("SCRIPTS.md").is_file());
        assert_eq!(log.terminal().unwrap().phase, Phase::Done);
    });
}

#[test]
fn acme_publishes_on_first_sync_only() {
    with_workspace(|ws| {
        let fetcher = Arc::new(ExportFetcher::new());
        let host = Arc::new(MockRemoteHost::new());
        let pipeline = ws.pipeline(fetcher.clone()).with_host(host.clone());
        let target = acme_target("db1", "Shop");

        let first = ProgressLog::new();
        let outcome = pipeline.run_sync(&target, &first);
        assert!(outcome.is_success());
        assert!(matches!(outcome.publish, PublishOutcome::Published(_)));
        assert!(first.phases().contains(&Phase::Publishing));
        assert!(host.calls().contains(&RemoteCall::CreateRepo("Acme".into())));
        assert_eq!(host.push_count(), 1);

        fetcher.set(
            shop_export("db1", "Shop")
                .table(TableBuilder::new("C", "Invoice").field("C1", "Number", "number")),
        );
        let second = ProgressLog::new();
        let outcome = pipeline.run_sync(&target, &second);
        assert!(outcome.is_success());
        assert!(outcome.commit.is_some());
        assert_eq!(outcome.publish, PublishOutcome::NotAttempted);
        assert!(!second.phases().contains(&Phase::Publishing));
        assert_eq!(host.push_count(), 1);
    });
}

#[test]
fn missing_staging_changes_nothing() {
    with_workspace(|ws| {
        let target = acme_target("db1", "Shop");
        ws.pipeline(Arc::new(ExportFetcher::new()))
            .run_sync(&target, &ProgressLog::new());
        let server_dir = ws.base().join("Acme");
        let before = snapshot(&server_dir, &[".git"]);
        let commits = ws.commit_messages(&server_dir);

        let log = ProgressLog::new();
        let outcome = ws
            .pipeline(Arc::new(EmptyFetcher))
            .run_sync(&target, &log);

        assert_eq!(outcome.failure.unwrap().kind, "StagingMissing");
        let terminal = log.terminal().unwrap();
        assert_eq!(terminal.phase, Phase::Failed);
        assert_eq!(terminal.detail, "StagingMissing");
        assert!(!log.phases().contains(&Phase::Committing));
        assert_eq!(snapshot(&server_dir, &[".git"]), before);
        assert_eq!(ws.commit_messages(&server_dir), commits);
        assert_eq!(ws.staging_entries(), 0);
    });
}

#[test]
fn missing_staging_on_fresh_base_creates_nothing() {
    with_workspace(|ws| {
        let log = ProgressLog::new();
        ws.pipeline(Arc::new(EmptyFetcher))
            .run_sync(&efs_target(), &log);
        assert_eq!(log.terminal().unwrap().detail, "StagingMissing");
        assert!(!ws.base().join("EFS-Server").exists());
    });
}

#[test]
fn diagram_failure_is_isolated() {
    with_workspace(|ws| {
        let fetcher = Arc::new(ExportFetcher::new());
        let target = acme_target("db1", "Shop");
        let outcome = ws.pipeline(fetcher.clone()).run_sync(&target, &ProgressLog::new());
        let db_root = outcome.database_dir.unwrap();
        let erd_before = read_file(&db_root, "ERD.md");
        let scripts_before = read_file(&db_root, "SCRIPTS.md");

        fetcher.set(
            shop_export("db1", "Shop")
                .table(TableBuilder::new("C", "Invoice").trigger("afterCreate", "alert('new')")),
        );
        let artifacts = ArtifactSet::new()
            .with(FailingGenerator::new("diagram", "ERD.md"))
            .with(DocumentationGenerator::new());
        let pipeline = SyncPipeline::new(ws.config(), fetcher).with_artifacts(artifacts);
        let log = ProgressLog::new();
        let outcome = pipeline.run_sync(&target, &log);

        assert!(outcome.is_success());
        assert_eq!(log.terminal().unwrap().phase, Phase::Done);
        let failed: Vec<_> = log.events().into_iter().filter(|e| e.failed).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].phase, Phase::GeneratingArtifacts);
        assert_eq!(failed[0].detail, "diagram");

        assert!(matches!(outcome.artifacts[0].status, ArtifactStatus::Failed(_)));
        assert_eq!(outcome.artifacts[1].status, ArtifactStatus::Written);
        assert_eq!(read_file(&db_root, "ERD.md"), erd_before);
        let scripts_after = read_file(&db_root, "SCRIPTS.md");
        assert_ne!(scripts_after, scripts_before);
        assert!(scripts_after.contains("alert('new')"));
    });
}

#[cfg(unix)]
#[test]
fn commit_failure_still_generates_artifacts() {
    with_workspace(|ws| {
        let fetcher = Arc::new(ExportFetcher::new());
        let target = acme_target("db1", "Shop");
        let outcome = ws.pipeline(fetcher.clone()).run_sync(&target, &ProgressLog::new());
        assert!(outcome.is_success());
        let db_root = outcome.database_dir.unwrap();
        let server_dir = ws.base().join("Acme");
        let commits = ws.commit_messages(&server_dir);
        let erd_before = read_file(&db_root, "ERD.md");
        let scripts_before = read_file(&db_root, "SCRIPTS.md");

        fetcher.set(
            shop_export("db1", "Shop").table(
                TableBuilder::new("C", "Invoice")
                    .field("C1", "Number", "number")
                    .trigger("afterCreate", "alert('new')"),
            ),
        );
        let config = ws.config().with_git(GitConfig::default().with_binary("false"));
        let log = ProgressLog::new();
        let outcome = SyncPipeline::new(config, fetcher).run_sync(&target, &log);

        assert_eq!(outcome.failure.unwrap().kind, "RepositoryCommitError");
        assert!(outcome.commit.is_none());
        assert!(outcome.artifact_commit.is_none());
        let terminal = log.terminal().unwrap();
        assert_eq!(terminal.phase, Phase::Failed);
        assert_eq!(terminal.detail, "RepositoryCommitError");
        assert!(log.phases().contains(&Phase::GeneratingArtifacts));

        assert_ne!(read_file(&db_root, "ERD.md"), erd_before);
        let scripts_after = read_file(&db_root, "SCRIPTS.md");
        assert_ne!(scripts_after, scripts_before);
        assert!(scripts_after.contains("alert('new')"));
        assert_eq!(ws.commit_messages(&server_dir), commits);
        assert_eq!(ws.staging_entries(), 0);
    });
}

#[test]
fn concurrent_syncs_on_one_server_all_commit() {
    with_workspace(|ws| {
        const N: usize = 6;
        let fetcher = Arc::new(ExportFetcher::new().with_delay(Duration::from_millis(5)));
        let pipeline = ws.pipeline(fetcher.clone());

        thread::scope(|scope| {
            for i in 0..N {
                let pipeline = &pipeline;
                scope.spawn(move || {
                    let target = acme_target(&format!("db{i}"), &format!("Shop {i}"));
                    let outcome = pipeline.run_sync(&target, &ProgressLog::new());
                    assert!(outcome.is_success(), "{:?}", outcome.failure);
                });
            }
        });

        let messages = ws.commit_messages(&ws.base().join("Acme"));
        let syncs = messages.iter().filter(|m| m.starts_with("Sync: ")).count();
        assert_eq!(syncs, N);
        assert_eq!(fetcher.calls(), N);
        for i in 0..N {
            assert!(messages.contains(&format!("Sync: Shop {i}")));
        }
    });
}

#[test]
fn staging_is_removed_after_every_attempt() {
    with_workspace(|ws| {
        let target = acme_target("db1", "Shop");
        ws.pipeline(Arc::new(ExportFetcher::new()))
            .run_sync(&target, &ProgressLog::new());
        assert_eq!(ws.staging_entries(), 0);

        ws.pipeline(Arc::new(OfflineFetcher))
            .run_sync(&target, &ProgressLog::new());
        assert_eq!(ws.staging_entries(), 0);

        ws.pipeline(Arc::new(EmptyFetcher))
            .run_sync(&target, &ProgressLog::new());
        assert_eq!(ws.staging_entries(), 0);
    });
}

#[test]
fn resync_of_same_export_is_byte_identical() {
    with_workspace(|ws| {
        let pipeline = ws.pipeline(Arc::new(ExportFetcher::new()));
        let target = efs_target();

        let outcome = pipeline.run_sync(&target, &ProgressLog::new());
        let db_root = outcome.database_dir.unwrap();
        let first = snapshot(&db_root, &[METADATA_FILE]);
        let first_record = MetadataStore::new().read(&db_root).unwrap();

        let outcome = pipeline.run_sync(&target, &ProgressLog::new());
        assert!(outcome.is_success());
        assert_eq!(snapshot(&db_root, &[METADATA_FILE]), first);

        let second_record = MetadataStore::new().read(&db_root).unwrap();
        assert_eq!(second_record.database_id, first_record.database_id);
        assert!(second_record.last_sync >= first_record.last_sync);
    });
}

#[test]
fn removed_tables_do_not_linger() {
    with_workspace(|ws| {
        let fetcher = Arc::new(ExportFetcher::new());
        let pipeline = ws.pipeline(fetcher.clone());
        let target = acme_target("db1", "Shop");
        let db_root = pipeline
            .run_sync(&target, &ProgressLog::new())
            .database_dir
            .unwrap();
        let objects = db_root.join("src/Objects/database_Shop");
        assert!(objects.join("table_B").is_dir());

        fetcher.set(
            ExportBuilder::new("db1", "Shop")
                .table(TableBuilder::new("A", "Customer").field("A1", "Name", "string")),
        );
        let outcome = pipeline.run_sync(&target, &ProgressLog::new());
        assert!(outcome.is_success());
        assert!(!objects.join("table_B").exists());
        assert!(!fs::read_to_string(db_root.join("ERD.md"))
            .unwrap()
            .contains("ORDER"));
    });
}
