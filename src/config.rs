//! Configuration for the exporter
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration resolved from the environment (and `.env`)

use crate::domains::export::types::{ExportKind, PaginationMode};
use crate::errors::{ConfigError, ConfigResult};
use clap::{Parser, ValueEnum};
use std::fmt;
use std::path::PathBuf;

/// Default number of rows fetched per page
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Default Postgres port used when composing the URL from parts
const DEFAULT_DATABASE_PORT: &str = "5432";

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_PAGE_SIZE: &str = "BEACH_PAGE_SIZE";
pub const ENV_PAGINATION: &str = "BEACH_PAGINATION";

/// Dump news items from the database into flat files
#[derive(Parser, Debug, Clone)]
#[command(
    name = "beach",
    version,
    about = "Dump news items from the database into flat files",
    long_about = "Pages through items ordered by id (newest first) and writes one or more \
                  payload files per item, plus an items.csv manifest for the kinds that have one.\n\n\
                  The database is taken from DATABASE_URL, or composed from DATABASE_USER, \
                  DATABASE_PASSWORD, DATABASE_HOST, DATABASE_PORT and DATABASE_DB.",
    after_help = "EXAMPLES:\n    \
        beach texts ./data/\n    \
        beach queries ./data/ --page-size 200\n    \
        beach passages ./data/passages --pagination offset\n\n\
        Running without a command is no longer supported; use `beach passages <OUTPUT_DIR>`."
)]
pub struct CliArgs {
    /// What to export
    #[arg(value_enum, value_name = "COMMAND")]
    pub command: ExportKind,

    /// Directory the files are written to (created if missing)
    #[arg(value_name = "OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Rows fetched per page [env: BEACH_PAGE_SIZE] [default: 50]
    #[arg(long, value_name = "N")]
    pub page_size: Option<usize>,

    /// How pages are addressed [env: BEACH_PAGINATION] [default: keyset]
    #[arg(long, value_enum, value_name = "MODE")]
    pub pagination: Option<PaginationMode>,
}

/// Resolved runtime configuration
#[derive(Clone, PartialEq, Eq)]
pub struct ExportConfig {
    pub database_url: String,
    pub page_size: usize,
    pub pagination: PaginationMode,
}

impl ExportConfig {
    /// Resolve from the process environment, with CLI flags taking precedence.
    pub fn resolve(args: &CliArgs) -> ConfigResult<Self> {
        Self::from_lookup(args, |key| std::env::var(key).ok())
    }

    /// Resolve using an arbitrary variable lookup.
    pub fn from_lookup<F>(args: &CliArgs, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = database_url(&lookup)?;

        let page_size = match args.page_size {
            Some(size) => size,
            None => match lookup(ENV_PAGE_SIZE) {
                Some(raw) => raw
                    .trim()
                    .parse::<usize>()
                    .map_err(|e| ConfigError::invalid_value(ENV_PAGE_SIZE, &e.to_string()))?,
                None => DEFAULT_PAGE_SIZE,
            },
        };
        if page_size == 0 {
            return Err(ConfigError::invalid_value("page_size", "must be at least 1"));
        }

        let pagination = match args.pagination {
            Some(mode) => mode,
            None => match lookup(ENV_PAGINATION) {
                Some(raw) => PaginationMode::from_str(raw.trim(), true)
                    .map_err(|e| ConfigError::invalid_value(ENV_PAGINATION, &e))?,
                None => PaginationMode::default(),
            },
        };

        Ok(Self {
            database_url,
            page_size,
            pagination,
        })
    }

    /// Connection string with the password masked, for logs.
    pub fn redacted_database_url(&self) -> String {
        redact_password(&self.database_url)
    }
}

impl fmt::Debug for ExportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportConfig")
            .field("database_url", &self.redacted_database_url())
            .field("page_size", &self.page_size)
            .field("pagination", &self.pagination)
            .finish()
    }
}

fn database_url<F>(lookup: &F) -> ConfigResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(ENV_DATABASE_URL).filter(|u| !u.trim().is_empty()) {
        return Ok(url);
    }

    let require = |key: &str| lookup(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()));
    let user = require("DATABASE_USER")
        // nothing set at all: point at DATABASE_URL
        .map_err(|_| ConfigError::MissingVar(ENV_DATABASE_URL.to_string()))?;
    let password = require("DATABASE_PASSWORD")?;
    let host = require("DATABASE_HOST")?;
    let port = lookup("DATABASE_PORT").unwrap_or_else(|| DEFAULT_DATABASE_PORT.to_string());
    let db = require("DATABASE_DB")?;

    Ok(format!("postgres://{}:{}@{}:{}/{}", user, password, host, port, db))
}

fn redact_password(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let Some(at) = rest.rfind('@') else {
        return url.to_string();
    };
    match rest[..at].find(':') {
        Some(colon) => format!(
            "{}://{}:***{}",
            &url[..scheme_end],
            &rest[..colon],
            &rest[at..]
        ),
        None => url.to_string(),
    }
}
