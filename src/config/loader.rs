//! Discovery, parsing and merging of rule sources.
//!
//! Sources are `*.logging.rules.json` / `*.logging.rules.toml` files plus the
//! legacy single `logging.rules.json` / `logging.rules.toml`. Within a
//! directory they are merged in file-name order so that the weaver and the
//! runtime, reading the same directory, build identical stores.

use super::model::RulesDocument;
use super::store::RuleStore;
use crate::error::{LogweaveError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const RULES_FILE_SUFFIXES: [&str; 2] = [".logging.rules.json", ".logging.rules.toml"];
pub const LEGACY_RULES_FILES: [&str; 2] = ["logging.rules.json", "logging.rules.toml"];
pub const RULES_DIR_ENV: &str = "LOGWEAVE_RULES_DIR";

/// Serialization format of a rule source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Json,
    Toml,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Some(SourceFormat::Json),
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Some(SourceFormat::Toml),
            _ => None,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Parse a single document from text.
    pub fn parse_str(text: &str, format: SourceFormat) -> Result<RulesDocument> {
        let document: RulesDocument = match format {
            SourceFormat::Json => serde_json::from_str(text)?,
            SourceFormat::Toml => toml::from_str(text)?,
        };
        Ok(document)
    }

    /// Load a store from a single text source.
    pub fn load_str(text: &str, format: SourceFormat) -> Result<RuleStore> {
        let store = RuleStore::from_documents([Self::parse_str(text, format)?]);
        ensure_not_empty(store, "inline source")
    }

    pub fn read_document(path: &Path) -> Result<RulesDocument> {
        let format = SourceFormat::from_path(path).ok_or_else(|| {
            LogweaveError::Config(format!("Unsupported rules file extension: {}", path.display()))
        })?;
        let text = fs::read_to_string(path)?;
        Self::parse_str(&text, format)
            .map_err(|e| LogweaveError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn load_file(path: &Path) -> Result<RuleStore> {
        let store = RuleStore::from_documents([Self::read_document(path)?]);
        ensure_not_empty(store, &path.display().to_string())
    }

    /// Find every rule source in `dir` (non-recursive), sorted by file name.
    pub fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(LogweaveError::Config(format!("Not a directory: {}", dir.display())));
        }

        let escaped = glob::Pattern::escape(&dir.to_string_lossy());
        let mut found = Vec::new();
        for suffix in RULES_FILE_SUFFIXES {
            let pattern = format!("{}/*{}", escaped, suffix);
            let entries = glob::glob(&pattern)
                .map_err(|e| LogweaveError::Config(format!("Bad discovery pattern: {}", e)))?;
            found.extend(entries.filter_map(|entry| entry.ok()));
        }
        for legacy in LEGACY_RULES_FILES {
            let path = dir.join(legacy);
            if path.is_file() && !found.contains(&path) {
                found.push(path);
            }
        }

        found.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        found.dedup();
        Ok(found)
    }

    /// Load and merge every rule source in `dir`.
    pub fn load_dir(dir: &Path) -> Result<RuleStore> {
        let sources = Self::discover(dir)?;
        debug!("Discovered {} rule sources in {}", sources.len(), dir.display());

        let mut documents = Vec::with_capacity(sources.len());
        for source in &sources {
            documents.push(Self::read_document(source)?);
        }

        let store = ensure_not_empty(RuleStore::from_documents(documents), &dir.display().to_string())?;
        info!(
            "Loaded {} sinks and {} rules from {}",
            store.sinks().len(),
            store.rules().len(),
            dir.display()
        );
        Ok(store)
    }

    /// Load from a file or a directory.
    pub fn load_path(path: &Path) -> Result<RuleStore> {
        if path.is_dir() {
            Self::load_dir(path)
        } else {
            Self::load_file(path)
        }
    }

    /// Load from `$LOGWEAVE_RULES_DIR`, falling back to the working directory.
    pub fn load_default() -> Result<RuleStore> {
        let dir = match std::env::var(RULES_DIR_ENV) {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => std::env::current_dir()?,
        };
        Self::load_path(&dir)
    }
}

fn ensure_not_empty(store: RuleStore, origin: &str) -> Result<RuleStore> {
    if store.is_empty() {
        return Err(LogweaveError::Config(format!(
            "No sinks or rules found in {} (*.logging.rules.json, *.logging.rules.toml or logging.rules.*)",
            origin
        )));
    }
    Ok(store)
}
