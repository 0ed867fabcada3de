//! Tests for the Synchronizer entry points

use loadout_core::model::{GameInstallMetadata, Loadout, ModKind};
use loadout_core::sync::{DiagnosticKind, Signature, SyncStatus};
use loadout_core::{Actions, EntityStore, Error, SyncDirection, SyncOptions};
use loadout_fs::Hash;
use loadout_test_utils::TestGame;
use pretty_assertions::assert_eq;
use tokio::sync::{mpsc, watch};

#[tokio::test]
async fn test_manage_game_records_initial_state() {
    let game = TestGame::new(&[("bin/game.exe", "exe"), ("Data/base.esm", "base")]).await;

    let meta = game.metadata();
    assert_eq!(meta.game_id, loadout_test_utils::TEST_GAME_ID);
    assert!(meta.initial_disk_state_tx.is_some());
    assert_eq!(meta.initial_disk_state_tx, meta.last_scanned_disk_state_tx);
    assert_eq!(meta.last_synced_loadout, None);

    let state = game.disk_state();
    assert_eq!(state.len(), 2);
    assert_eq!(state["bin/game.exe"], Hash::of(b"exe"));
}

#[tokio::test]
async fn test_manage_game_rejects_unknown_game() {
    let game = TestGame::new(&[]).await;

    let result = game
        .sync
        .manage_game("not-registered", Default::default())
        .await;
    assert!(matches!(result, Err(Error::UnknownGame(_))));
}

#[tokio::test]
async fn test_create_loadout_holds_game_files() {
    let game = TestGame::new(&[("bin/game.exe", "exe")]).await;
    let id = game.create_loadout("Default").await;

    let loadout = game.loadout(id);
    assert_eq!(loadout.name, "Default");
    assert_eq!(loadout.game_install, game.install);

    let game_files = loadout.mod_of_kind(ModKind::GameFiles).unwrap();
    assert_eq!(game_files.files.len(), 1);
    assert_eq!(game_files.files[0].hash, Hash::of(b"exe"));
    assert_eq!(
        Loadout::for_install(&game.store.snapshot(), game.install),
        vec![id]
    );
}

#[tokio::test]
async fn test_fresh_loadout_only_backs_up_game_files() {
    let game = TestGame::new(&[("bin/game.exe", "exe")]).await;
    let loadout = game.create_loadout("Default").await;

    // Disk, previous and loadout agree; the only thing left is archiving
    let preview = game.sync.preview(loadout).await.unwrap();
    assert_eq!(preview.total_paths, 1);
    assert_eq!(preview.actions.backup, 1);
    assert_eq!(preview.actions.total(), 1);

    game.sync
        .synchronize(loadout, SyncOptions::default())
        .await
        .unwrap();
    assert!(game.is_archived("exe"));
    assert!(!game.sync.should_synchronize(loadout).await.unwrap());
}

#[tokio::test]
async fn test_build_sync_tree_classifies_without_changes() {
    let game = TestGame::new(&[]).await;
    let loadout = game.create_loadout("Default").await;
    game.add_mod(loadout, "M1", &[("Data/plugin.esp", "plugin")]);

    let tree = game.sync.build_sync_tree(loadout).await.unwrap();
    let node = &tree[&game.path("Data/plugin.esp")];
    assert_eq!(
        node.signature,
        Signature::LOADOUT_EXISTS | Signature::LOADOUT_ARCHIVED
    );
    assert_eq!(node.actions, Actions::EXTRACT_TO_DISK);

    // Nothing was written
    game.assert_no_file("Data/plugin.esp");
    assert_eq!(game.metadata().last_synced_loadout, None);
}

#[tokio::test]
async fn test_preview_counts_actions() {
    let game = TestGame::new(&[]).await;
    let loadout = game.create_loadout("Default").await;
    game.add_mod(loadout, "M1", &[("a.txt", "a"), ("b.txt", "b")]);
    game.add_unarchived_mod(loadout, "M2", &[("c.txt", "c")]);
    game.write("untracked.txt", "u");

    let preview = game.sync.preview(loadout).await.unwrap();
    assert_eq!(preview.total_paths, 4);
    assert_eq!(preview.paths_with_actions, 4);
    assert_eq!(preview.actions.extract, 2);
    assert_eq!(preview.actions.unable_to_extract, 1);
    assert_eq!(preview.actions.ingest, 1);
    assert_eq!(preview.actions.backup, 1);
    assert!(!preview.is_in_sync());
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let game = TestGame::new(&[]).await;
    let loadout = game.create_loadout("Default").await;
    game.add_mod(loadout, "M1", &[("a.txt", "a")]);
    game.add_unarchived_mod(loadout, "M2", &[("b.txt", "b")]);
    let before = game.store.current_tx();

    let options = SyncOptions {
        dry_run: true,
        ..SyncOptions::default()
    };
    let report = game.sync.synchronize(loadout, options).await.unwrap();

    assert_eq!(report.committed_tx, None);
    assert_eq!(report.actions.extract, 1);
    assert_eq!(report.files_changed, 1);
    assert_eq!(report.files_warned, 1);
    assert_eq!(report.diagnostics[0].kind, DiagnosticKind::UnableToExtract);
    assert_eq!(game.store.current_tx(), before);
    game.assert_no_file("a.txt");
}

#[tokio::test]
async fn test_unarchived_content_is_reported() {
    let game = TestGame::new(&[]).await;
    let loadout = game.create_loadout("Default").await;
    game.add_unarchived_mod(loadout, "M1", &[("Data/missing.esp", "missing")]);

    let report = game
        .sync
        .synchronize(loadout, SyncOptions::default())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.files_warned, 1);
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].path, game.path("Data/missing.esp"));
    assert_eq!(report.diagnostics[0].kind, DiagnosticKind::UnableToExtract);
    game.assert_no_file("Data/missing.esp");
}

#[tokio::test]
async fn test_lost_archive_aborts_without_commit() {
    let game = TestGame::new(&[]).await;
    let loadout = game.create_loadout("Default").await;
    game.add_unarchived_mod(loadout, "M1", &[("ghost.esp", "ghost")]);
    // The store claims the bytes but cannot produce them
    game.content.lose(Hash::of(b"ghost"));
    let before = game.store.current_tx();

    let err = game
        .sync
        .synchronize(loadout, SyncOptions::default())
        .await
        .unwrap_err();

    match err {
        Error::ArchiveMissing { hash, path } => {
            assert_eq!(hash, Hash::of(b"ghost"));
            assert_eq!(path, game.path("ghost.esp"));
        }
        other => panic!("expected ArchiveMissing, got {other}"),
    }
    assert_eq!(game.store.current_tx(), before);
    assert_eq!(game.metadata().last_synced_loadout, None);
}

#[tokio::test]
async fn test_cancelled_sync_skips_commit() {
    let game = TestGame::new(&[("bin/game.exe", "exe")]).await;
    let loadout = game.create_loadout("Default").await;
    game.add_mod(loadout, "M1", &[("a.txt", "a")]);
    let before = game.store.current_tx();

    let (cancel_tx, cancel_rx) = watch::channel(false);
    cancel_tx.send(true).unwrap();
    let options = SyncOptions {
        cancel: Some(cancel_rx),
        ..SyncOptions::default()
    };

    let result = game.sync.synchronize(loadout, options).await;
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(game.store.current_tx(), before);
    game.assert_no_file("a.txt");
}

#[tokio::test]
async fn test_status_messages_follow_phases() {
    let game = TestGame::new(&[]).await;
    let loadout = game.create_loadout("Default").await;
    game.add_mod(loadout, "M1", &[("a.txt", "a")]);

    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let options = SyncOptions {
        status: Some(status_tx),
        ..SyncOptions::default()
    };
    game.sync.synchronize(loadout, options).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(status) = status_rx.try_recv() {
        seen.push(status);
    }
    assert_eq!(seen.first(), Some(&SyncStatus::Scanning));
    assert!(seen.contains(&SyncStatus::Extracting { files: 1 }));
    assert!(seen.contains(&SyncStatus::Committing));
    assert_eq!(seen.last(), Some(&SyncStatus::Done { files_changed: 1 }));
}

#[tokio::test]
async fn test_rescan_commits_only_changes() {
    let game = TestGame::new(&[("bin/game.exe", "exe")]).await;
    let scanned_before = game.metadata().last_scanned_disk_state_tx;

    assert!(!game.sync.rescan(game.install).await.unwrap());
    assert_eq!(game.metadata().last_scanned_disk_state_tx, scanned_before);

    game.write("bin/game.exe", "patched");
    game.write("notes.txt", "n");
    assert!(game.sync.rescan(game.install).await.unwrap());

    let state = game.disk_state();
    assert_eq!(state["bin/game.exe"], Hash::of(b"patched"));
    assert_eq!(state["notes.txt"], Hash::of(b"n"));
    assert_ne!(game.metadata().last_scanned_disk_state_tx, scanned_before);
}

#[tokio::test]
async fn test_rescan_does_not_move_sync_watermark() {
    let game = TestGame::new(&[("bin/game.exe", "exe")]).await;
    let loadout = game.create_loadout("Default").await;
    game.sync
        .synchronize(loadout, SyncOptions::default())
        .await
        .unwrap();

    game.write("bin/game.exe", "patched");
    game.sync.rescan(game.install).await.unwrap();

    // The change is still classified against the last applied state
    let tree = game.sync.build_sync_tree(loadout).await.unwrap();
    let node = &tree[&game.path("bin/game.exe")];
    assert_eq!(node.signature.shorthand(), "ABB_oXX");
    assert!(node.actions.contains(Actions::INGEST_FROM_DISK));
}

#[tokio::test]
async fn test_ingest_direction_never_writes_disk() {
    let game = TestGame::new(&[]).await;
    let loadout = game.create_loadout("Default").await;
    game.add_mod(loadout, "M1", &[("a.txt", "a")]);
    game.write("local.txt", "mine");

    let options = SyncOptions {
        direction: SyncDirection::Ingest,
        ..SyncOptions::default()
    };
    let report = game.sync.synchronize(loadout, options).await.unwrap();

    assert_eq!(report.actions.extract, 0);
    assert_eq!(report.actions.ingest, 1);
    game.assert_no_file("a.txt");
    assert_eq!(
        game.overrides(loadout).get("local.txt"),
        Some(&Some(Hash::of(b"mine")))
    );
    assert_eq!(
        GameInstallMetadata::load(&game.store.snapshot(), game.install)
            .unwrap()
            .last_synced_loadout,
        Some(loadout)
    );
}

#[tokio::test]
async fn test_apply_direction_never_writes_loadout() {
    let game = TestGame::new(&[]).await;
    let loadout = game.create_loadout("Default").await;
    game.add_mod(loadout, "M1", &[("a.txt", "a")]);
    game.write("local.txt", "mine");

    let options = SyncOptions {
        direction: SyncDirection::Apply,
        ..SyncOptions::default()
    };
    let report = game.sync.synchronize(loadout, options).await.unwrap();

    assert_eq!(report.actions.ingest, 0);
    game.assert_file("a.txt", "a");
    // Untracked content is backed up and removed
    game.assert_no_file("local.txt");
    assert!(game.is_archived("mine"));
    assert!(game.overrides(loadout).is_empty());
}

#[tokio::test]
async fn test_concurrent_synchronizes_run_one_at_a_time() {
    let game = TestGame::new(&[("bin/game.exe", "exe")]).await;
    let loadout = game.create_loadout("Default").await;
    game.add_mod(loadout, "M1", &[("a.txt", "a"), ("b.txt", "b")]);

    let (first, second) = tokio::join!(
        game.sync.synchronize(loadout, SyncOptions::default()),
        game.sync.synchronize(loadout, SyncOptions::default()),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    // The second run sees the first one's result
    assert_eq!(first.files_changed, 2);
    assert_eq!(second.actions.total(), 0);
    assert_eq!(second.files_changed, 0);
    assert!(second.is_success());
    game.assert_file("a.txt", "a");
    game.assert_file("b.txt", "b");
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreadable_directory_is_left_alone() {
    use std::os::unix::fs::PermissionsExt;

    let game = TestGame::new(&[("Data/base.esm", "base")]).await;
    let loadout = game.create_loadout("Default").await;
    game.sync
        .synchronize(loadout, SyncOptions::default())
        .await
        .unwrap();

    let data = game.game_root().join("Data");
    std::fs::set_permissions(&data, std::fs::Permissions::from_mode(0o000)).unwrap();
    if std::fs::read_dir(&data).is_ok() {
        // Permissions are not enforced for this user
        std::fs::set_permissions(&data, std::fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    game.add_mod(loadout, "M1", &[("readme.txt", "r")]);
    let report = game
        .sync
        .synchronize(loadout, SyncOptions::default())
        .await;
    std::fs::set_permissions(&data, std::fs::Permissions::from_mode(0o755)).unwrap();
    let report = report.unwrap();

    // The rest of the folder is still synchronized
    game.assert_file("readme.txt", "r");
    assert!(!report.is_success());
    assert!(report.failures.iter().any(|f| f.path == game.path("Data")));
    assert!(report.failures.iter().all(|f| f.action == Actions::DO_NOTHING));
    assert!(game.overrides(loadout).is_empty());
    assert_eq!(game.disk_state()["Data/base.esm"], Hash::of(b"base"));

    game.assert_file("Data/base.esm", "base");
    assert!(!game.sync.should_synchronize(loadout).await.unwrap());
}
