//! Resolved configuration for a run, merged from an optional
//! `.doctalk.toml` file in the current directory with CLI-flag overrides
//! taking precedence.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{DoctalkError, Result};

const CONFIG_FILE_NAME: &str = ".doctalk.toml";

/// Raw `.doctalk.toml` shape. Every field is optional; the file itself is
/// optional too — a project with none of this just uses CLI flags.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    code: Option<String>,
    docs: Option<String>,
    #[serde(default)]
    exclude: Vec<String>,
    cache_root: Option<String>,
    api_base_url: Option<String>,
    decision_model: Option<String>,
    generation_model: Option<String>,
}

/// Flags a caller collected from the command line; `None`/empty means
/// "not overridden here."
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub code: Option<String>,
    pub docs: Option<String>,
    pub exclude: Vec<String>,
    pub cache_root: Option<String>,
    pub api_base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub code_root: Option<PathBuf>,
    pub docs_root: Option<PathBuf>,
    pub exclude: Vec<String>,
    pub cache_root: PathBuf,
    pub api_base_url: String,
    pub decision_model: String,
    pub generation_model: String,
}

fn load_file_config(project_dir: &Path) -> Result<FileConfig> {
    let path = project_dir.join(CONFIG_FILE_NAME);
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let content = std::fs::read_to_string(&path)?;
    content.parse::<toml::Table>().map_err(|e| DoctalkError::ParseError { path, message: e.to_string() })?;
    toml::from_str(&content).map_err(|e| DoctalkError::ParseError { path: project_dir.join(CONFIG_FILE_NAME), message: e.to_string() })
}

fn default_cache_root() -> PathBuf {
    dirs::cache_dir().map(|d| d.join("doctalk")).unwrap_or_else(|| PathBuf::from(".doctalk-cache"))
}

/// Merge `.doctalk.toml` (if present in `project_dir`) with `overrides`,
/// CLI flags winning on every field they set.
pub fn resolve(project_dir: &Path, overrides: ConfigOverrides) -> Result<ResolvedConfig> {
    let file = load_file_config(project_dir)?;

    let exclude = if overrides.exclude.is_empty() { file.exclude } else { overrides.exclude };

    Ok(ResolvedConfig {
        code_root: overrides.code.or(file.code).map(PathBuf::from),
        docs_root: overrides.docs.or(file.docs).map(PathBuf::from),
        exclude,
        cache_root: overrides
            .cache_root
            .or(file.cache_root)
            .map(PathBuf::from)
            .unwrap_or_else(default_cache_root),
        api_base_url: overrides
            .api_base_url
            .or(file.api_base_url)
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        decision_model: file.decision_model.unwrap_or_else(|| "gpt-4o".to_string()),
        generation_model: file.generation_model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
    })
}
