//! Path utilities for the Scribe data directory.
//!
//! Layout:
//!
//! ```text
//! <data dir>/ClinicalScribe/
//! ├── bin/ollama
//! └── models/        # OLLAMA_MODELS
//! ```

use std::path::{Path, PathBuf};

/// Name of the application folder inside the platform data directory.
pub const APP_DIR_NAME: &str = "ClinicalScribe";

/// Get the default application data directory.
///
/// `~/Library/Application Support/ClinicalScribe` on macOS,
/// `$XDG_DATA_HOME/ClinicalScribe` on Linux.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// Get the models directory used as Ollama's model store.
pub fn models_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("models")
}

/// Get the bin directory.
pub fn bin_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("bin")
}

/// Get the default path to the ollama binary.
pub fn ollama_binary_path(data_dir: &Path) -> PathBuf {
    let binary_name = if cfg!(target_os = "windows") {
        "ollama.exe"
    } else {
        "ollama"
    };
    bin_dir(data_dir).join(binary_name)
}

/// Ensure the data directory and its model store exist.
pub fn ensure_dirs(data_dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(data_dir)?;
    std::fs::create_dir_all(models_dir(data_dir))?;
    Ok(())
}
