use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

use canteen_core::registry::StoreRegistry;

pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:4444";

pub struct Config {
    pub data_dir: PathBuf,
    pub weeks_dir: PathBuf,
}

impl Config {
    /// Resolve the data directory (platform default unless overridden) and
    /// make sure it exists.
    pub fn load(data_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => ProjectDirs::from("", "", "canteen")
                .context("Could not determine home directory")?
                .data_dir()
                .to_path_buf(),
        };
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let weeks_dir = data_dir.join("weeks");
        Ok(Config {
            data_dir,
            weeks_dir,
        })
    }

    /// One SQLite file per week-key under `<data_dir>/weeks`.
    pub fn registry(&self) -> Result<StoreRegistry> {
        StoreRegistry::open(&self.weeks_dir)
    }
}
