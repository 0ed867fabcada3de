//! Whole-run properties of the synchronizer
//!
//! - a second synchronize after a successful one changes nothing
//! - ingest followed by apply, or apply followed by ingest, settles
//! - the conflict winner depends only on the sort rules

use std::collections::BTreeMap;

use loadout_core::model::{LoadoutId, SortRule};
use loadout_core::{GenericGame, SyncConfig, SyncDirection, SyncOptions, SyncReport};
use loadout_fs::GamePath;
use loadout_test_utils::{TEST_GAME_ID, TestGame};
use pretty_assertions::assert_eq;
use rstest::rstest;

async fn sync_in(game: &TestGame, loadout: LoadoutId, direction: SyncDirection) -> SyncReport {
    let options = SyncOptions {
        direction,
        ..SyncOptions::default()
    };
    game.sync.synchronize(loadout, options).await.unwrap()
}

#[derive(Debug, Clone, Copy)]
enum Setup {
    GameFilesOnly,
    OverlappingMods,
    ExternalEdits,
    MissingContent,
    IgnoredLogs,
}

/// A game and loadout with work pending for the next synchronize.
async fn prepare(setup: Setup) -> (TestGame, LoadoutId) {
    let files = [("bin/game.exe", "exe"), ("Data/base.esm", "base")];
    let game = match setup {
        Setup::IgnoredLogs => {
            let definition =
                GenericGame::new(TEST_GAME_ID).ignore(GamePath::game("Logs").unwrap());
            TestGame::with_game(&files, definition, SyncConfig::default()).await
        }
        _ => TestGame::new(&files).await,
    };
    let loadout = game.create_loadout("Default").await;

    match setup {
        Setup::GameFilesOnly => {}
        Setup::OverlappingMods => {
            game.add_mod(loadout, "M1", &[("Data/a.esp", "a1"), ("Data/b.esp", "b")]);
            game.add_mod(loadout, "M2", &[("Data/a.esp", "a2"), ("Data/base.esm", "b2")]);
        }
        Setup::ExternalEdits => {
            game.add_mod(loadout, "M1", &[("Data/a.esp", "a")]);
            sync_in(&game, loadout, SyncDirection::Auto).await;
            game.write("Data/base.esm", "patched");
            game.write("Data/user.ini", "user");
            game.remove("Data/a.esp");
        }
        Setup::MissingContent => {
            game.add_mod(loadout, "M1", &[("Data/a.esp", "a")]);
            game.add_unarchived_mod(loadout, "M2", &[("Data/lost.esp", "lost")]);
        }
        Setup::IgnoredLogs => {
            game.add_mod(loadout, "M1", &[("Logs/mod.log", "m"), ("Data/a.esp", "a")]);
            game.write("Logs/today.log", "today");
        }
    }
    (game, loadout)
}

#[rstest]
#[case::game_files_only(Setup::GameFilesOnly)]
#[case::overlapping_mods(Setup::OverlappingMods)]
#[case::external_edits(Setup::ExternalEdits)]
#[case::missing_content(Setup::MissingContent)]
#[case::ignored_logs(Setup::IgnoredLogs)]
#[tokio::test]
async fn test_second_synchronize_changes_nothing(#[case] setup: Setup) {
    let (game, loadout) = prepare(setup).await;
    sync_in(&game, loadout, SyncDirection::Auto).await;

    let files = game.files();
    let disk_state = game.disk_state();
    let overrides = game.overrides(loadout);

    let report = sync_in(&game, loadout, SyncDirection::Auto).await;
    assert_eq!(report.files_changed, 0, "{setup:?}");
    assert!(report.is_success(), "{setup:?}");
    assert_eq!(game.files(), files, "{setup:?}");
    assert_eq!(game.disk_state(), disk_state, "{setup:?}");
    assert_eq!(game.overrides(loadout), overrides, "{setup:?}");
}

#[rstest]
#[case::game_files_only(Setup::GameFilesOnly)]
#[case::overlapping_mods(Setup::OverlappingMods)]
#[case::external_edits(Setup::ExternalEdits)]
#[tokio::test]
async fn test_ingest_then_apply_keeps_disk(#[case] setup: Setup) {
    let (game, loadout) = prepare(setup).await;
    // Settle the loadout on disk before editing
    sync_in(&game, loadout, SyncDirection::Auto).await;
    game.write("Data/base.esm", "edited");
    game.write("Data/extra.txt", "extra");

    sync_in(&game, loadout, SyncDirection::Ingest).await;
    let files = game.files();

    let report = sync_in(&game, loadout, SyncDirection::Apply).await;
    assert_eq!(report.actions.total(), 0, "{setup:?}");
    assert_eq!(game.files(), files, "{setup:?}");
}

#[rstest]
#[case::game_files_only(Setup::GameFilesOnly)]
#[case::overlapping_mods(Setup::OverlappingMods)]
#[case::external_edits(Setup::ExternalEdits)]
#[tokio::test]
async fn test_apply_then_ingest_keeps_loadout(#[case] setup: Setup) {
    let (game, loadout) = prepare(setup).await;
    let overrides = game.overrides(loadout);

    sync_in(&game, loadout, SyncDirection::Apply).await;
    let files = game.files();

    let report = sync_in(&game, loadout, SyncDirection::Ingest).await;
    assert_eq!(report.actions.total(), 0, "{setup:?}");
    assert_eq!(game.overrides(loadout), overrides, "{setup:?}");
    assert_eq!(game.files(), files, "{setup:?}");
}

#[rstest]
#[case(["M1", "M2", "M3"])]
#[case(["M3", "M2", "M1"])]
#[case(["M2", "M3", "M1"])]
#[case(["M1", "M3", "M2"])]
#[tokio::test]
async fn test_conflict_winner_ignores_creation_order(#[case] order: [&str; 3]) {
    let game = TestGame::new(&[]).await;
    let loadout = game.create_loadout("Default").await;

    let mut ids = BTreeMap::new();
    for name in order {
        ids.insert(name, game.add_mod(loadout, name, &[("Data/shared.esp", name)]));
    }
    // M3 < M1 < M2
    game.set_rules(ids["M1"], &[SortRule::After(ids["M3"])]);
    game.set_rules(ids["M2"], &[SortRule::After(ids["M1"])]);

    let tree = game.sync.build_sync_tree(loadout).await.unwrap();
    assert_eq!(tree[&game.path("Data/shared.esp")].mod_id, Some(ids["M2"]));

    sync_in(&game, loadout, SyncDirection::Auto).await;
    game.assert_file("Data/shared.esp", "M2");
}
