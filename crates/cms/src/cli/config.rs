//! Configuration paths and database settings.
//!
//! Everything lives under `$CMS_HOME` (default `~/.cms_admin/`):
//! - `config.toml` - optional settings file
//! - `cms.sqlite3` - default database
//! - `logs/` - rolling log files

use std::path::{Path, PathBuf};

use anyhow::Context;
use cms_db::DbConfig;
use serde::{Deserialize, Serialize};

use super::error::HelpfulError;

/// Environment variable overriding the configured database URL.
pub const DATABASE_URL_ENV: &str = "CMS_DATABASE_URL";

const CONFIG_FILE: &str = "config.toml";
const DATABASE_FILE: &str = "cms.sqlite3";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Contents of `config.toml`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub database: DatabaseSection,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSection {
    pub url: Option<String>,
    pub max_connections: Option<u32>,
}

/// Where the database URL came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlSource {
    Environment,
    ConfigFile,
    Default,
}

impl UrlSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlSource::Environment => "environment",
            UrlSource::ConfigFile => "config file",
            UrlSource::Default => "default",
        }
    }
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub home: PathBuf,
    pub config_path: PathBuf,
    pub database_url: String,
    pub url_source: UrlSource,
    pub max_connections: u32,
}

impl AppConfig {
    /// Resolve from `$CMS_HOME`, its `config.toml`, and `CMS_DATABASE_URL`.
    pub fn load() -> anyhow::Result<Self> {
        let home = cms_logging::cms_home()?;
        let config_path = home.join(CONFIG_FILE);
        let contents = if config_path.exists() {
            Some(std::fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file {}", config_path.display())
            })?)
        } else {
            None
        };
        let env_url = std::env::var(DATABASE_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty());
        Self::resolve(home, contents.as_deref(), env_url)
    }

    /// Resolve from explicit inputs. Precedence: environment, file, default.
    pub fn resolve(
        home: PathBuf,
        file_contents: Option<&str>,
        env_url: Option<String>,
    ) -> anyhow::Result<Self> {
        let config_path = home.join(CONFIG_FILE);
        let file: FileConfig = match file_contents {
            Some(contents) => toml::from_str(contents).map_err(|e| {
                HelpfulError::new(format!("Invalid config file: {}", config_path.display()))
                    .with_context(e.to_string())
                    .with_suggestions([
                        "TRY: Supported keys: [database] url, max_connections".to_string(),
                        format!("TRY: Move the file aside to use defaults: mv {0} {0}.bak", config_path.display()),
                    ])
            })?,
            None => FileConfig::default(),
        };

        let (database_url, url_source) = match (env_url, file.database.url) {
            (Some(url), _) => (url, UrlSource::Environment),
            (None, Some(url)) => (url, UrlSource::ConfigFile),
            (None, None) => (default_database_url(&home), UrlSource::Default),
        };

        Ok(Self {
            config_path,
            database_url,
            url_source,
            max_connections: file
                .database
                .max_connections
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            home,
        })
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        sqlite_file_path(&self.database_url)
    }

    pub fn db_config(&self) -> anyhow::Result<DbConfig> {
        let config = DbConfig::from_url(&self.database_url).map_err(|e| {
            HelpfulError::new(format!("Unsupported database URL: {}", self.database_url))
                .with_context(e.to_string())
                .with_suggestion("TRY: Use a SQLite URL such as sqlite:/path/to/cms.sqlite3?mode=rwc")
        })?;
        Ok(config.with_max_connections(self.max_connections))
    }

    /// Create the home directory and the database file's parent directory.
    pub fn ensure_dirs(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.home)
            .with_context(|| format!("Failed to create home directory {}", self.home.display()))?;
        if let Some(parent) = self.database_path().as_deref().and_then(Path::parent) {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }
        Ok(())
    }
}

/// `sqlite:<home>/cms.sqlite3?mode=rwc`
pub fn default_database_url(home: &Path) -> String {
    format!("sqlite:{}?mode=rwc", home.join(DATABASE_FILE).display())
}

/// File path of a SQLite URL, or `None` for in-memory databases.
pub fn sqlite_file_path(url: &str) -> Option<PathBuf> {
    let rest = url.strip_prefix("sqlite:")?;
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Some(PathBuf::from(path))
}

/// Arguments for the config command
#[derive(Debug, clap::Args)]
pub struct ConfigArgs {
    /// Show resolved settings in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Run the config command - shows resolved settings
pub fn run(args: ConfigArgs) -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let database_path = config.database_path();
    let logs = config.home.join("logs");

    if args.json {
        let value = serde_json::json!({
            "home": config.home.to_string_lossy(),
            "config_file": {
                "path": config.config_path.to_string_lossy(),
                "exists": config.config_path.exists(),
            },
            "database": {
                "url": config.database_url,
                "source": config.url_source,
                "max_connections": config.max_connections,
                "exists": database_path.as_ref().map(|p| p.exists()),
            },
            "logs": {
                "path": logs.to_string_lossy(),
                "exists": logs.exists(),
            },
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("CMS CONFIGURATION");
        println!("=================");
        println!();
        println!("Home:        {}", config.home.display());
        println!(
            "Config file: {} ({})",
            config.config_path.display(),
            if config.config_path.exists() { "exists" } else { "not found" }
        );
        println!();
        println!("Database:    {}", config.database_url);
        println!("  Source:    {}", config.url_source.as_str());
        println!("  Pool size: {}", config.max_connections);
        if let Some(path) = &database_path {
            println!(
                "  File:      {} ({})",
                path.display(),
                if path.exists() { "exists" } else { "not found" }
            );
        }
        println!();
        println!("Logs:        {}", logs.display());
    }

    Ok(())
}
