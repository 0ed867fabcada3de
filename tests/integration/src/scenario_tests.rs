//! End-to-end synchronizer scenarios
//!
//! Each test drives a real game folder and content store through
//! [`TestGame`] and checks disk, loadout and recorded state afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use loadout_core::model::{LoadoutId, ModKind, SortRule};
use loadout_core::sync::Signature;
use loadout_core::{
    Actions, DirectoryContentStore, FileEntityStore, GameRegistry, GenericGame, SyncConfig,
    SyncDirection, SyncOptions, Synchronizer,
};
use loadout_fs::{GamePath, Hash, LocationId};
use loadout_test_utils::{TEST_GAME_ID, TestGame};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

async fn sync(game: &TestGame, loadout: LoadoutId) -> loadout_core::SyncReport {
    game.sync
        .synchronize(loadout, SyncOptions::default())
        .await
        .unwrap()
}

async fn sync_in(
    game: &TestGame,
    loadout: LoadoutId,
    direction: SyncDirection,
) -> loadout_core::SyncReport {
    let options = SyncOptions {
        direction,
        ..SyncOptions::default()
    };
    game.sync.synchronize(loadout, options).await.unwrap()
}

// =============================================================================
// Apply
// =============================================================================

#[tokio::test]
async fn test_new_mod_file_is_extracted_then_deleted_with_mod() {
    let game = TestGame::new(&[]).await;
    let loadout = game.create_loadout("Default").await;
    let m1 = game.add_mod(loadout, "M1", &[("Data/plugin.esp", "plugin")]);
    let path = game.path("Data/plugin.esp");

    // Only the loadout knows the file
    let tree = game.sync.build_sync_tree(loadout).await.unwrap();
    assert_eq!(
        tree[&path].signature,
        Signature::LOADOUT_EXISTS | Signature::LOADOUT_ARCHIVED
    );
    assert_eq!(tree[&path].actions, Actions::EXTRACT_TO_DISK);

    let report = sync(&game, loadout).await;
    assert_eq!(report.files_changed, 1);
    game.assert_file("Data/plugin.esp", "plugin");
    assert_eq!(game.disk_state()["Data/plugin.esp"], Hash::of(b"plugin"));

    // Re-running finds disk and loadout in agreement
    let tree = game.sync.build_sync_tree(loadout).await.unwrap();
    let expected = Signature::DISK_EXISTS
        | Signature::LOADOUT_EXISTS
        | Signature::DISK_EQUALS_LOADOUT
        | Signature::LOADOUT_ARCHIVED;
    assert!(tree[&path].signature.contains(expected));
    assert_eq!(tree[&path].actions, Actions::DO_NOTHING);

    // Removing the mod leaves the file applied but unwanted
    game.remove_mod(loadout, m1);
    let tree = game.sync.build_sync_tree(loadout).await.unwrap();
    let sides = Signature::DISK_EXISTS
        | Signature::PREV_EXISTS
        | Signature::LOADOUT_EXISTS
        | Signature::DISK_EQUALS_PREV
        | Signature::PREV_EQUALS_LOADOUT
        | Signature::DISK_EQUALS_LOADOUT;
    assert_eq!(
        tree[&path].signature & sides,
        Signature::DISK_EXISTS | Signature::PREV_EXISTS | Signature::DISK_EQUALS_PREV
    );
    assert_eq!(tree[&path].actions, Actions::DELETE_FROM_DISK);

    sync(&game, loadout).await;
    game.assert_no_file("Data/plugin.esp");
    assert!(!game.exists("Data"), "emptied directory should be pruned");
    assert!(!game.disk_state().contains_key("Data/plugin.esp"));
}

#[tokio::test]
async fn test_disabled_mod_is_removed_from_disk() {
    let game = TestGame::new(&[("bin/game.exe", "exe")]).await;
    let loadout = game.create_loadout("Default").await;
    let textures = game.add_mod(loadout, "Textures", &[("Data/tex.dds", "tex")]);
    sync(&game, loadout).await;
    game.assert_file("Data/tex.dds", "tex");

    game.set_enabled(textures, false);
    sync(&game, loadout).await;
    game.assert_no_file("Data/tex.dds");
    game.assert_file("bin/game.exe", "exe");

    game.set_enabled(textures, true);
    sync(&game, loadout).await;
    game.assert_file("Data/tex.dds", "tex");
}

// =============================================================================
// Ingest
// =============================================================================

#[tokio::test]
async fn test_external_changes_are_ingested_into_overrides() {
    let game = TestGame::new(&[("bin/game.exe", "exe"), ("Data/base.esm", "base")]).await;
    let loadout = game.create_loadout("Default").await;
    sync(&game, loadout).await;

    game.write("Data/base.esm", "patched");
    game.write("Data/new.esp", "new");
    game.remove("bin/game.exe");

    let report = sync(&game, loadout).await;
    assert_eq!(report.actions.ingest, 2);
    assert_eq!(report.actions.reified_delete, 1);
    assert_eq!(report.actions.backup, 2);
    assert_eq!(report.files_changed, 3);

    let overrides = game.overrides(loadout);
    assert_eq!(
        overrides,
        BTreeMap::from([
            ("Data/base.esm".to_string(), Some(Hash::of(b"patched"))),
            ("Data/new.esp".to_string(), Some(Hash::of(b"new"))),
            ("bin/game.exe".to_string(), None),
        ])
    );
    let loadout_entity = game.loadout(loadout);
    assert_eq!(
        loadout_entity.mod_of_kind(ModKind::Overrides).unwrap().name,
        "Overrides"
    );

    // Disk is left as the user made it
    game.assert_file("Data/base.esm", "patched");
    game.assert_file("Data/new.esp", "new");
    game.assert_no_file("bin/game.exe");
    assert!(game.is_archived("patched"));
    assert!(!game.sync.should_synchronize(loadout).await.unwrap());
}

#[tokio::test]
async fn test_restoring_game_file_drops_override() {
    let game = TestGame::new(&[("Data/base.esm", "base")]).await;
    let loadout = game.create_loadout("Default").await;
    sync(&game, loadout).await;

    game.write("Data/base.esm", "patched");
    sync(&game, loadout).await;
    assert_eq!(game.overrides(loadout).len(), 1);

    game.write("Data/base.esm", "base");
    sync(&game, loadout).await;
    assert!(game.overrides(loadout).is_empty());
    game.assert_file("Data/base.esm", "base");
    assert!(!game.sync.should_synchronize(loadout).await.unwrap());
}

#[tokio::test]
async fn test_restoring_game_file_under_mod_keeps_override() {
    let game = TestGame::new(&[("Data/x.esp", "game")]).await;
    let loadout = game.create_loadout("Default").await;
    game.add_mod(loadout, "M", &[("Data/x.esp", "mod")]);
    sync(&game, loadout).await;
    game.assert_file("Data/x.esp", "mod");

    // The vanilla bytes only win through the override
    game.write("Data/x.esp", "game");
    let report = sync(&game, loadout).await;
    assert_eq!(report.actions.ingest, 1);
    assert_eq!(
        game.overrides(loadout),
        BTreeMap::from([("Data/x.esp".to_string(), Some(Hash::of(b"game")))])
    );

    let report = sync(&game, loadout).await;
    assert_eq!(report.actions.total(), 0);
    game.assert_file("Data/x.esp", "game");
    assert!(!game.sync.should_synchronize(loadout).await.unwrap());
}

#[tokio::test]
async fn test_overrides_win_over_mods() {
    let game = TestGame::new(&[]).await;
    let loadout = game.create_loadout("Default").await;
    game.add_mod(loadout, "M1", &[("Data/config.ini", "modded")]);
    sync(&game, loadout).await;

    game.write("Data/config.ini", "tweaked");
    sync(&game, loadout).await;

    let tree = game.sync.build_sync_tree(loadout).await.unwrap();
    let node = &tree[&game.path("Data/config.ini")];
    assert_eq!(node.loadout.unwrap().hash, Hash::of(b"tweaked"));
    assert_eq!(node.actions, Actions::DO_NOTHING);
}

// =============================================================================
// Conflicts
// =============================================================================

#[tokio::test]
async fn test_conflicting_mods_follow_rules_and_explicit_winner() {
    let game = TestGame::new(&[]).await;
    let loadout = game.create_loadout("Default").await;
    let m1 = game.add_mod(loadout, "M1", &[("Data/shared.esp", "one")]);
    let m2 = game.add_mod(loadout, "M2", &[("Data/shared.esp", "two")]);

    // Without rules the later mod wins
    sync(&game, loadout).await;
    game.assert_file("Data/shared.esp", "two");

    game.set_rules(m2, &[SortRule::Before(m1)]);
    sync(&game, loadout).await;
    game.assert_file("Data/shared.esp", "one");

    game.set_winner(loadout, "Data/shared.esp", m2);
    sync(&game, loadout).await;
    game.assert_file("Data/shared.esp", "two");
}

#[tokio::test]
async fn test_sort_cycle_is_fatal() {
    let game = TestGame::new(&[]).await;
    let loadout = game.create_loadout("Default").await;
    let m1 = game.add_mod(loadout, "M1", &[("a.esp", "a")]);
    let m2 = game.add_mod(loadout, "M2", &[("b.esp", "b")]);
    game.set_rules(m1, &[SortRule::Before(m2)]);
    game.set_rules(m2, &[SortRule::Before(m1)]);

    let err = game
        .sync
        .synchronize(loadout, SyncOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, loadout_core::Error::SortCycle { .. }));
    game.assert_no_file("a.esp");
}

// =============================================================================
// Partial failure
// =============================================================================

#[tokio::test]
async fn test_failed_extraction_is_isolated() {
    let game = TestGame::new(&[]).await;
    let loadout = game.create_loadout("Default").await;
    game.add_mod(loadout, "M1", &[("a.txt", "a"), ("b.txt", "b")]);
    game.content.fail_open(Hash::of(b"b"));

    let report = sync(&game, loadout).await;
    assert!(!report.is_success());
    assert!(report.committed_tx.is_some());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, game.path("b.txt"));
    assert_eq!(report.failures[0].action, Actions::EXTRACT_TO_DISK);
    game.assert_file("a.txt", "a");
    game.assert_no_file("b.txt");

    // The failed path is derived again on the next run
    game.content.heal();
    let report = sync(&game, loadout).await;
    assert!(report.is_success());
    assert_eq!(report.files_changed, 1);
    game.assert_file("b.txt", "b");
}

#[tokio::test]
async fn test_failed_backup_keeps_disk_content() {
    let game = TestGame::new(&[("bin/game.exe", "exe")]).await;
    let loadout = game.create_loadout("Default").await;
    sync(&game, loadout).await;

    game.write("bin/game.exe", "patched");
    game.content.fail_backup(Hash::of(b"patched"));

    let report = sync_in(&game, loadout, SyncDirection::Apply).await;
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].action, Actions::BACKUP_FILE);
    game.assert_file("bin/game.exe", "patched");

    game.content.heal();
    let report = sync_in(&game, loadout, SyncDirection::Apply).await;
    assert!(report.is_success());
    game.assert_file("bin/game.exe", "exe");
    assert!(game.is_archived("patched"));
}

// =============================================================================
// Loadouts and installations
// =============================================================================

#[tokio::test]
async fn test_switching_loadouts_ingests_previous_first() {
    let game = TestGame::new(&[("bin/game.exe", "exe")]).await;
    let first = game.create_loadout("First").await;
    let second = game.create_loadout("Second").await;
    game.add_mod(first, "A", &[("a.txt", "a")]);
    game.add_mod(second, "B", &[("b.txt", "b")]);

    sync(&game, first).await;
    game.write("extra.txt", "extra");

    sync(&game, second).await;
    assert_eq!(game.metadata().last_synced_loadout, Some(second));
    assert_eq!(
        game.overrides(first).get("extra.txt"),
        Some(&Some(Hash::of(b"extra")))
    );
    assert!(game.overrides(second).is_empty());
    assert_eq!(
        game.files(),
        BTreeMap::from([
            ("b.txt".to_string(), "b".to_string()),
            ("bin/game.exe".to_string(), "exe".to_string()),
        ])
    );

    // Switching back restores the first loadout, external edit included
    sync(&game, first).await;
    assert_eq!(
        game.files(),
        BTreeMap::from([
            ("a.txt".to_string(), "a".to_string()),
            ("bin/game.exe".to_string(), "exe".to_string()),
            ("extra.txt".to_string(), "extra".to_string()),
        ])
    );
}

#[tokio::test]
async fn test_ignored_paths_are_never_touched() {
    let definition = GenericGame::new(TEST_GAME_ID).ignore(GamePath::game("Logs").unwrap());
    let game = TestGame::with_game(
        &[("bin/game.exe", "exe"), ("Logs/old.log", "old")],
        definition,
        SyncConfig::default(),
    )
    .await;
    let loadout = game.create_loadout("Default").await;

    let game_files = game.loadout(loadout);
    let game_files = game_files.mod_of_kind(ModKind::GameFiles).unwrap();
    assert_eq!(game_files.files.len(), 1);

    game.add_mod(loadout, "M1", &[("Logs/mod.log", "m"), ("Data/a.esp", "a")]);
    sync(&game, loadout).await;
    game.write("Logs/new.log", "new");

    let report = sync(&game, loadout).await;
    assert_eq!(report.actions.total(), 0);
    game.assert_no_file("Logs/mod.log");
    game.assert_file("Logs/old.log", "old");
    game.assert_file("Logs/new.log", "new");
    game.assert_file("Data/a.esp", "a");
    assert!(game.overrides(loadout).is_empty());
    assert!(game.disk_state().contains_key("Logs/old.log"));
}

#[tokio::test]
async fn test_state_survives_reopening_transaction_log() {
    let dir = TempDir::new().unwrap();
    let game_root = dir.path().join("game");
    std::fs::create_dir_all(game_root.join("bin")).unwrap();
    std::fs::write(game_root.join("bin/game.exe"), "exe").unwrap();
    let log = dir.path().join("store.jsonl");
    let archive = dir.path().join("archive");

    let open = || {
        Synchronizer::new(
            Arc::new(FileEntityStore::open(&log).unwrap()),
            Arc::new(DirectoryContentStore::new(&archive)),
            GameRegistry::new().with(GenericGame::new(TEST_GAME_ID)),
            SyncConfig::default(),
        )
    };

    let (install, loadout) = {
        let sync = open();
        let locations = BTreeMap::from([(LocationId::Game, game_root.clone())]);
        let install = sync.manage_game(TEST_GAME_ID, locations).await.unwrap();
        let loadout = sync.create_loadout(install, "Default").await.unwrap();
        sync.synchronize(loadout, SyncOptions::default())
            .await
            .unwrap();
        (install, loadout)
    };

    let sync = open();
    assert!(!sync.should_synchronize(loadout).await.unwrap());
    assert!(!sync.rescan(install).await.unwrap());
}
