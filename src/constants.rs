// Tuning defaults - adjust these to balance responsiveness vs. safety
// All default values used by the configuration layer live here

// === Presentation dispatch ===
// Upper bound for a synchronous hand-off to the presentation context before
// the action is left queued and the caller moves on
pub const DEFAULT_INVOCATION_TIMEOUT_MS: u64 = 5_000;

// === Change notifications ===
// Buffer of the broadcast channels carrying property changes and requery
// signals; slow receivers lag instead of blocking producers
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

// === Logging ===
pub const DEFAULT_LOG_FILTER: &str = "viewbus=debug";

// === Configuration file ===
pub const CONFIG_DIR_NAME: &str = "viewbus";
pub const CONFIG_FILE_NAME: &str = "config.toml";
