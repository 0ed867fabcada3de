//! [`TestGame`] fixture for synchronizer scenarios.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use loadout_core::model::{
    ConflictOverride, DiskStateEntry, GameInstallId, GameInstallMetadata, Loadout, LoadoutId, Mod,
    ModFile, ModId, ModKind, NewModFile, SortRule,
};
use loadout_core::{
    DirectoryContentStore, EntityStore, GameDefinition, GameRegistry, GenericGame,
    MemoryEntityStore, SyncConfig, Synchronizer,
};
use loadout_fs::{GamePath, Hash, LocationId};
use tempfile::TempDir;

use crate::content::FlakyContentStore;

/// Game id registered by [`TestGame::new`].
pub const TEST_GAME_ID: &str = "test-game";

/// A managed game install in a temporary directory.
///
/// Layout: `<tmp>/game` is the `Game` location root, `<tmp>/archive` the
/// content store. The install is managed on construction, so the files
/// passed in form the initial disk state.
///
/// # Example
///
/// ```rust,no_run
/// # async fn demo() {
/// use loadout_test_utils::TestGame;
///
/// let game = TestGame::new(&[("bin/game.exe", "exe")]).await;
/// let loadout = game.create_loadout("Default").await;
/// game.add_mod(loadout, "Textures", &[("data/tex.dds", "tex")]);
/// game.sync.synchronize(loadout, Default::default()).await.unwrap();
/// game.assert_file("data/tex.dds", "tex");
/// # }
/// ```
pub struct TestGame {
    dir: TempDir,
    pub store: Arc<MemoryEntityStore>,
    pub content: Arc<FlakyContentStore>,
    pub sync: Synchronizer,
    pub install: GameInstallId,
}

impl TestGame {
    /// Fixture for a game without ignore rules and default configuration.
    pub async fn new(files: &[(&str, &str)]) -> Self {
        Self::with_game(files, GenericGame::new(TEST_GAME_ID), SyncConfig::default()).await
    }

    pub async fn with_game(files: &[(&str, &str)], game: GenericGame, config: SyncConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let game_root = dir.path().join("game");
        fs::create_dir_all(&game_root).unwrap();
        for (path, content) in files {
            write_under(&game_root, path, content.as_bytes());
        }

        let game_id = game.game_id().to_string();
        let store = Arc::new(MemoryEntityStore::new());
        let content = Arc::new(FlakyContentStore::new(DirectoryContentStore::new(
            dir.path().join("archive"),
        )));
        let sync = Synchronizer::new(
            store.clone(),
            content.clone(),
            GameRegistry::new().with(game),
            config,
        );

        let locations = BTreeMap::from([(LocationId::Game, game_root)]);
        let install = sync
            .manage_game(&game_id, locations)
            .await
            .expect("TestGame: failed to manage game");

        Self {
            dir,
            store,
            content,
            sync,
            install,
        }
    }

    pub fn game_root(&self) -> PathBuf {
        self.dir.path().join("game")
    }

    pub fn path(&self, relative: &str) -> GamePath {
        GamePath::game(relative).unwrap()
    }

    pub fn write(&self, relative: &str, content: &str) {
        write_under(&self.game_root(), relative, content.as_bytes());
    }

    pub fn read(&self, relative: &str) -> Option<String> {
        fs::read_to_string(self.game_root().join(relative)).ok()
    }

    pub fn remove(&self, relative: &str) {
        fs::remove_file(self.game_root().join(relative)).unwrap();
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.game_root().join(relative).exists()
    }

    /// Every file under the game root, by forward-slash relative path.
    pub fn files(&self) -> BTreeMap<String, String> {
        let root = self.game_root();
        walkdir::WalkDir::new(&root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let relative = e
                    .path()
                    .strip_prefix(&root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/");
                (relative, fs::read_to_string(e.path()).unwrap_or_default())
            })
            .collect()
    }

    /// Store `content` in the content store.
    pub fn archive(&self, content: &str) -> Hash {
        self.content.inner().insert_bytes(content.as_bytes()).unwrap()
    }

    pub fn is_archived(&self, content: &str) -> bool {
        self.content
            .inner()
            .blob_path(Hash::of(content.as_bytes()))
            .exists()
    }

    pub async fn create_loadout(&self, name: &str) -> LoadoutId {
        self.sync.create_loadout(self.install, name).await.unwrap()
    }

    /// Add a mod whose files are archived.
    pub fn add_mod(&self, loadout: LoadoutId, name: &str, files: &[(&str, &str)]) -> ModId {
        for (_, content) in files {
            self.archive(content);
        }
        self.add_unarchived_mod(loadout, name, files)
    }

    /// Add a mod whose file contents are not in the content store.
    pub fn add_unarchived_mod(
        &self,
        loadout: LoadoutId,
        name: &str,
        files: &[(&str, &str)],
    ) -> ModId {
        let mut tx = self.store.begin();
        let id = Mod::create(&mut tx, loadout, name, ModKind::Normal).unwrap();
        for (path, content) in files {
            let file = NewModFile::new(
                self.path(path),
                Hash::of(content.as_bytes()),
                content.len() as u64,
            );
            ModFile::add(&mut tx, id, file).unwrap();
        }
        self.store.commit(tx).unwrap();
        id
    }

    pub fn remove_mod(&self, loadout: LoadoutId, id: ModId) {
        let loadout = self.loadout(loadout);
        let the_mod = loadout.get_mod(id).unwrap();
        let mut tx = self.store.begin();
        Mod::remove(&mut tx, the_mod);
        self.store.commit(tx).unwrap();
    }

    pub fn set_enabled(&self, id: ModId, enabled: bool) {
        let mut tx = self.store.begin();
        Mod::set_enabled(&mut tx, id, enabled).unwrap();
        self.store.commit(tx).unwrap();
    }

    pub fn set_rules(&self, id: ModId, rules: &[SortRule]) {
        let mut tx = self.store.begin();
        Mod::set_rules(&mut tx, id, rules).unwrap();
        self.store.commit(tx).unwrap();
    }

    pub fn set_winner(&self, loadout: LoadoutId, path: &str, winner: ModId) {
        let mut tx = self.store.begin();
        let overrides = [ConflictOverride {
            path: self.path(path),
            winner,
        }];
        Loadout::set_file_overrides(&mut tx, loadout, &overrides).unwrap();
        self.store.commit(tx).unwrap();
    }

    pub fn loadout(&self, id: LoadoutId) -> Loadout {
        Loadout::load(&self.store.snapshot(), id).unwrap()
    }

    pub fn metadata(&self) -> GameInstallMetadata {
        GameInstallMetadata::load(&self.store.snapshot(), self.install).unwrap()
    }

    /// Files of the loadout's overrides mod: path to hash, `None` for
    /// reified deletes.
    pub fn overrides(&self, loadout: LoadoutId) -> BTreeMap<String, Option<Hash>> {
        self.loadout(loadout)
            .mod_of_kind(ModKind::Overrides)
            .map(|m| {
                m.files
                    .iter()
                    .map(|f| (f.path.path.to_string(), (!f.deleted).then_some(f.hash)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Recorded disk state at the head of the store.
    pub fn disk_state(&self) -> BTreeMap<String, Hash> {
        DiskStateEntry::for_install(&self.store.snapshot(), self.install)
            .unwrap()
            .into_iter()
            .map(|e| (e.path.path.to_string(), e.hash))
            .collect()
    }

    /// Assert that `relative` exists on disk with `content`.
    ///
    /// # Panics
    /// Panics with a descriptive message otherwise.
    pub fn assert_file(&self, relative: &str, content: &str) {
        let full_path = self.game_root().join(relative);
        let actual = fs::read_to_string(&full_path)
            .unwrap_or_else(|_| panic!("Could not read file: {}", full_path.display()));
        assert_eq!(
            actual,
            content,
            "Unexpected content in {}",
            full_path.display()
        );
    }

    /// Assert that `relative` does not exist on disk.
    pub fn assert_no_file(&self, relative: &str) {
        let full_path = self.game_root().join(relative);
        assert!(
            !full_path.exists(),
            "Expected file NOT to exist: {}",
            full_path.display()
        );
    }
}

fn write_under(root: &Path, relative: &str, bytes: &[u8]) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, bytes).unwrap();
}
