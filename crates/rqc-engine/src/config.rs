use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use rqc_core::EntryStatus;
use rqc_template::TemplateDefaults;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub listing: ListingConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Relative paths resolve against the repo root; `~` is expanded.
    pub db_path: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub default_types: Vec<String>,
    /// Status given to new entries that name none.
    pub default_status: EntryStatus,
    pub placeholder_check: String,
    /// Extra YAML templates, registered over the built-in ones.
    #[serde(default)]
    pub templates_dir: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListingConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 500,
        }
    }
}

impl Config {
    pub fn default_for_repo() -> Self {
        let defaults = TemplateDefaults::default();
        Self {
            store: StoreConfig {
                db_path: ".rqc/rqc.db".to_string(),
            },
            workflow: WorkflowConfig {
                default_types: defaults.default_types,
                default_status: EntryStatus::Scheduled,
                placeholder_check: defaults.placeholder_check,
                templates_dir: None,
            },
            listing: ListingConfig::default(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Config = toml::from_str(&s).with_context(|| "parse rqc.toml")?;
        Ok(cfg)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let s = toml::to_string_pretty(self).with_context(|| "serialize toml")?;
        std::fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn config_path(repo_root: &Path) -> PathBuf {
        repo_root.join(".rqc").join("rqc.toml")
    }

    pub fn db_path(&self, repo_root: &Path) -> PathBuf {
        resolve_path(repo_root, &self.store.db_path)
    }

    pub fn templates_dir(&self, repo_root: &Path) -> Option<PathBuf> {
        self.workflow.templates_dir.as_deref().map(|d| resolve_path(repo_root, d))
    }

    pub fn template_defaults(&self) -> TemplateDefaults {
        TemplateDefaults {
            default_types: self.workflow.default_types.clone(),
            placeholder_check: self.workflow.placeholder_check.clone(),
        }
    }
}

fn resolve_path(repo_root: &Path, raw: &str) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(raw).to_string());
    if expanded.is_absolute() {
        expanded
    } else {
        repo_root.join(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_round_trips_through_toml() {
        let dir = tempdir().unwrap();
        let path = Config::config_path(dir.path());
        Config::default_for_repo().save_to(&path).unwrap();

        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg.workflow.default_status, EntryStatus::Scheduled);
        assert_eq!(cfg.workflow.default_types.len(), 3);
        assert_eq!(cfg.db_path(dir.path()), dir.path().join(".rqc/rqc.db"));
        assert!(cfg.templates_dir(dir.path()).is_none());
    }

    #[test]
    fn listing_section_is_optional() {
        let cfg: Config = toml::from_str(
            r#"
[store]
db_path = "/var/lib/rqc/rqc.db"

[workflow]
default_types = ["lab test"]
default_status = "PENDING"
placeholder_check = "Sign-off"
templates_dir = "templates"
"#,
        )
        .unwrap();
        assert_eq!(cfg.listing.max_page_size, 500);
        assert_eq!(cfg.workflow.default_status, EntryStatus::Pending);
        assert_eq!(cfg.db_path(Path::new("/repo")), PathBuf::from("/var/lib/rqc/rqc.db"));
        assert_eq!(cfg.templates_dir(Path::new("/repo")), Some(PathBuf::from("/repo/templates")));
        assert_eq!(cfg.template_defaults().default_types, vec!["lab test"]);
    }
}
