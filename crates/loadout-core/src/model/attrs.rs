//! Attribute names, grouped by entity kind.

pub const GAME_ID: &str = "game/id";
pub const GAME_LOCATIONS: &str = "game/locations";
pub const GAME_LAST_SYNCED_LOADOUT: &str = "game/last_synced_loadout";
pub const GAME_LAST_SYNCED_LOADOUT_TX: &str = "game/last_synced_loadout_tx";
pub const GAME_INITIAL_DISK_STATE_TX: &str = "game/initial_disk_state_tx";
pub const GAME_LAST_SCANNED_DISK_STATE_TX: &str = "game/last_scanned_disk_state_tx";

pub const DISK_INSTALL: &str = "disk/install";
pub const DISK_PATH: &str = "disk/path";
pub const DISK_HASH: &str = "disk/hash";
pub const DISK_SIZE: &str = "disk/size";
pub const DISK_LAST_MODIFIED: &str = "disk/last_modified";

pub const LOADOUT_NAME: &str = "loadout/name";
pub const LOADOUT_INSTALL: &str = "loadout/install";
pub const LOADOUT_FILE_OVERRIDES: &str = "loadout/file_overrides";
pub const LOADOUT_LAST_APPLIED_AT: &str = "loadout/last_applied_at";

pub const MOD_LOADOUT: &str = "mod/loadout";
pub const MOD_NAME: &str = "mod/name";
pub const MOD_ENABLED: &str = "mod/enabled";
pub const MOD_KIND: &str = "mod/kind";
pub const MOD_RULES: &str = "mod/rules";

pub const FILE_MOD: &str = "file/mod";
pub const FILE_PATH: &str = "file/path";
pub const FILE_HASH: &str = "file/hash";
pub const FILE_SIZE: &str = "file/size";
pub const FILE_DELETED: &str = "file/deleted";
