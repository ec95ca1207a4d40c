//! Application configuration for htc.
//!
//! User config lives at `~/.htc/htc.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{HtcError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "htc.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".htc";

/// Upper bound on concurrent detail fetches.
pub const MAX_CONCURRENCY: u32 = 1024;

// ---------------------------------------------------------------------------
// Config structs (matching htc.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Listing page and fan-out settings.
    #[serde(default)]
    pub scrape: ScrapeSection,

    /// CSS selectors for listing and detail pages.
    #[serde(default)]
    pub selectors: SelectorsConfig,

    /// Database location.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// `[scrape]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeSection {
    /// Listing page the restaurants are discovered from.
    #[serde(default = "default_listing_url")]
    pub listing_url: String,

    /// Area labels to keep (exact match after trimming).
    #[serde(default = "default_target_labels")]
    pub target_labels: Vec<String>,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum detail pages fetched at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
}

impl Default for ScrapeSection {
    fn default() -> Self {
        Self {
            listing_url: default_listing_url(),
            target_labels: default_target_labels(),
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_listing_url() -> String {
    "https://www.crous-montpellier.fr/se-restaurer/ou-manger/".into()
}
fn default_target_labels() -> Vec<String> {
    vec!["Montpellier".into()]
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_concurrency() -> u32 {
    8
}

/// `[selectors]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorsConfig {
    /// Repeated item block on the listing page (must carry the `href`).
    #[serde(default = "default_item_selector")]
    pub item: String,
    /// Display name, relative to the item block.
    #[serde(default = "default_name_selector")]
    pub name: String,
    /// Grouping label, relative to the item block.
    #[serde(default = "default_label_selector")]
    pub label: String,
    /// Attribute block on the detail page.
    #[serde(default = "default_coordinates_selector")]
    pub coordinates: String,
    #[serde(default = "default_latitude_attr")]
    pub latitude_attr: String,
    #[serde(default = "default_longitude_attr")]
    pub longitude_attr: String,
    /// Opening hours paragraph on the detail page.
    #[serde(default = "default_hours_selector")]
    pub hours: String,
    /// One day's menu on the detail page.
    #[serde(default = "default_menu_selector")]
    pub menu: String,
    /// Date heading, relative to the menu.
    #[serde(default = "default_menu_date_selector")]
    pub menu_date: String,
    /// One service (lunch, dinner), relative to the menu.
    #[serde(default = "default_meal_selector")]
    pub meal: String,
    /// Service title, relative to the meal.
    #[serde(default = "default_meal_title_selector")]
    pub meal_title: String,
    /// Course group, relative to the meal. Its own text is the course kind.
    #[serde(default = "default_course_selector")]
    pub course: String,
    /// Dish, relative to the course group.
    #[serde(default = "default_dish_selector")]
    pub dish: String,
}

impl Default for SelectorsConfig {
    fn default() -> Self {
        Self {
            item: default_item_selector(),
            name: default_name_selector(),
            label: default_label_selector(),
            coordinates: default_coordinates_selector(),
            latitude_attr: default_latitude_attr(),
            longitude_attr: default_longitude_attr(),
            hours: default_hours_selector(),
            menu: default_menu_selector(),
            menu_date: default_menu_date_selector(),
            meal: default_meal_selector(),
            meal_title: default_meal_title_selector(),
            course: default_course_selector(),
            dish: default_dish_selector(),
        }
    }
}

fn default_item_selector() -> String {
    "section.vc_restaurants ul li a".into()
}
fn default_name_selector() -> String {
    "div.restaurant_title".into()
}
fn default_label_selector() -> String {
    "span.restaurant_area".into()
}
fn default_coordinates_selector() -> String {
    "#map".into()
}
fn default_latitude_attr() -> String {
    "data-lat".into()
}
fn default_longitude_attr() -> String {
    "data-lon".into()
}
fn default_hours_selector() -> String {
    ".info p".into()
}
fn default_menu_selector() -> String {
    ".menu".into()
}
fn default_menu_date_selector() -> String {
    ".menu_date_title".into()
}
fn default_meal_selector() -> String {
    ".meal".into()
}
fn default_meal_title_selector() -> String {
    ".meal_title".into()
}
fn default_course_selector() -> String {
    "ul.meal_foodies > li".into()
}
fn default_dish_selector() -> String {
    "ul li".into()
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the libSQL database file. A leading `~/` is expanded.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.htc/htc.db".into()
}

// ---------------------------------------------------------------------------
// Scrape config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime scrape configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    /// Listing page URL.
    pub listing_url: Url,
    /// Area labels to keep.
    pub target_labels: Vec<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum concurrent detail fetches.
    pub concurrency: u32,
    /// Listing and detail selectors.
    pub selectors: SelectorsConfig,
}

impl TryFrom<&AppConfig> for ScrapeConfig {
    type Error = HtcError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        let listing_url = Url::parse(&config.scrape.listing_url).map_err(|e| {
            HtcError::config(format!(
                "invalid listing_url '{}': {e}",
                config.scrape.listing_url
            ))
        })?;

        let scrape = Self {
            listing_url,
            target_labels: config.scrape.target_labels.clone(),
            timeout_secs: config.scrape.timeout_secs,
            concurrency: config.scrape.concurrency,
            selectors: config.selectors.clone(),
        };
        scrape.validate()?;
        Ok(scrape)
    }
}

impl ScrapeConfig {
    /// Check the merged settings before any request is made.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(HtcError::validation("concurrency must be at least 1"));
        }
        if self.concurrency > MAX_CONCURRENCY {
            return Err(HtcError::validation(format!(
                "concurrency must be at most {MAX_CONCURRENCY}, got {}",
                self.concurrency
            )));
        }
        if self.timeout_secs == 0 {
            return Err(HtcError::validation("timeout_secs must be at least 1"));
        }
        if self.target_labels.iter().all(|l| l.trim().is_empty()) {
            return Err(HtcError::validation(
                "at least one non-empty target label is required",
            ));
        }
        match self.listing_url.scheme() {
            "http" | "https" => Ok(()),
            other => Err(HtcError::validation(format!(
                "listing url must be http(s), got '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.htc/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| HtcError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.htc/htc.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HtcError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| HtcError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HtcError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HtcError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HtcError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve the database path, expanding a leading `~/`.
pub fn resolve_db_path(raw: &str) -> Result<PathBuf> {
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| HtcError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("listing_url"));
        assert!(toml_str.contains("span.restaurant_area"));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[scrape]
target_labels = ["Montpellier", "Sète"]
concurrency = 2

[selectors]
coordinates = "div.map"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.scrape.target_labels.len(), 2);
        assert_eq!(config.scrape.concurrency, 2);
        assert_eq!(config.scrape.timeout_secs, 10);
        assert_eq!(config.selectors.coordinates, "div.map");
        assert_eq!(config.selectors.latitude_attr, "data-lat");
        assert_eq!(config.storage.db_path, "~/.htc/htc.db");
    }

    #[test]
    fn oversized_concurrency_in_file_is_rejected() {
        let toml_str = "[scrape]\nconcurrency = 18446744073709551615\n";
        assert!(toml::from_str::<AppConfig>(toml_str).is_err());

        let toml_str = "[scrape]\nconcurrency = 5000\n";
        let app: AppConfig = toml::from_str(toml_str).expect("fits in u32");
        assert!(ScrapeConfig::try_from(&app).is_err());
    }

    #[test]
    fn scrape_config_from_app_config() {
        let app = AppConfig::default();
        let scrape = ScrapeConfig::try_from(&app).expect("valid defaults");
        assert_eq!(scrape.concurrency, 8);
        assert_eq!(scrape.timeout_secs, 10);
        assert_eq!(scrape.target_labels, vec!["Montpellier".to_string()]);
        assert_eq!(scrape.listing_url.host_str(), Some("www.crous-montpellier.fr"));
    }

    #[test]
    fn scrape_config_rejects_bad_values() {
        let mut app = AppConfig::default();
        app.scrape.concurrency = 0;
        let err = ScrapeConfig::try_from(&app).unwrap_err();
        assert!(err.to_string().contains("concurrency"));

        let mut app = AppConfig::default();
        app.scrape.concurrency = u32::MAX;
        let err = ScrapeConfig::try_from(&app).unwrap_err();
        assert!(matches!(err, HtcError::Validation { .. }));
        assert!(err.to_string().contains("at most"));

        let mut app = AppConfig::default();
        app.scrape.concurrency = MAX_CONCURRENCY;
        assert!(ScrapeConfig::try_from(&app).is_ok());

        let mut app = AppConfig::default();
        app.scrape.listing_url = "not a url".into();
        assert!(matches!(
            ScrapeConfig::try_from(&app),
            Err(HtcError::Config { .. })
        ));

        let mut app = AppConfig::default();
        app.scrape.target_labels = vec!["  ".into()];
        assert!(ScrapeConfig::try_from(&app).is_err());
    }

    #[test]
    fn db_path_expansion() {
        assert_eq!(
            resolve_db_path("/tmp/htc.db").unwrap(),
            PathBuf::from("/tmp/htc.db")
        );
        if let Some(home) = dirs::home_dir() {
            assert_eq!(resolve_db_path("~/x/htc.db").unwrap(), home.join("x/htc.db"));
        }
    }
}
