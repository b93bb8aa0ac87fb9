use std::path::PathBuf;

const APP_DIR: &str = "command-runner";

/// Directory holding local state (the SQLite database by default).
///
/// Debug builds keep state next to the workspace so development runs never
/// touch the user's data directory.
pub fn asset_dir() -> PathBuf {
    if cfg!(debug_assertions) {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../dev_assets")
    } else {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}
