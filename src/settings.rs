use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "covid_supply.toml";
const ENV_PREFIX: &str = "COVID_SUPPLY";

const LANDING_PAGE_URL: &str = "https://moz.gov.ua/koronavirus-2019-ncov";
const SITE_BASE_URL: &str = "https://moz.gov.ua";
const SHEET_NAME: &str = "Дані по лікарням";
const DATA_DIR_NAME: &str = "COVID19_SUPPLY_MOZ";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Page listing the published reports.
    pub page_url: String,
    /// Prefix for relative report links found on that page.
    pub base_url: String,
    pub sheet_name: String,
    /// Which `<h5>` on the landing page (0-based) introduces the report link.
    pub heading_index: usize,
    pub data_dir: PathBuf,
    /// Wait for Enter before exiting. Turn off for scheduled runs.
    pub pause_on_exit: bool,
}

/// Defaults, then `covid_supply.toml` (or `config_file`) if present, then
/// `COVID_SUPPLY_*` environment variables.
pub fn load(config_file: Option<&Path>) -> Result<Settings> {
    let file = match config_file {
        Some(p) => File::from(p.to_path_buf()).required(true),
        None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
    };
    let settings = Config::builder()
        .set_default("page_url", LANDING_PAGE_URL)?
        .set_default("base_url", SITE_BASE_URL)?
        .set_default("sheet_name", SHEET_NAME)?
        .set_default("heading_index", 2)?
        .set_default("data_dir", default_data_dir().to_string_lossy().to_string())?
        .set_default("pause_on_exit", true)?
        .add_source(file)
        .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
        .build()
        .context("Failed to load settings")?;
    settings
        .try_deserialize()
        .context("Invalid settings")
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DATA_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_file_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "sheet_name = \"Лист1\"\npause_on_exit = false\ndata_dir = \"/srv/supply\"\n").unwrap();

        let s = load(Some(&path)).unwrap();
        assert_eq!(s.sheet_name, "Лист1");
        assert!(!s.pause_on_exit);
        assert_eq!(s.data_dir, PathBuf::from("/srv/supply"));
        assert_eq!(s.page_url, LANDING_PAGE_URL);
        assert_eq!(s.base_url, SITE_BASE_URL);
        assert_eq!(s.heading_index, 2);
    }

    #[test]
    fn named_config_file_must_exist() {
        assert!(load(Some(Path::new("/no/such/settings.toml"))).is_err());
    }

    #[test]
    fn default_data_dir_is_named() {
        assert!(default_data_dir().ends_with(DATA_DIR_NAME));
    }
}
