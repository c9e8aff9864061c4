use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rqc_core::LabelKey;

use crate::doc::TemplateDoc;

const BUILTIN_TEMPLATES: &str = include_str!("../builtin/templates.yaml");

/// Fallback templates keyed by phase-definition name (and aliases).
///
/// The registry is handed to the engine explicitly; there is no global table.
#[derive(Clone, Debug, Default)]
pub struct TemplateRegistry {
    templates: Vec<TemplateDoc>,
    by_name: BTreeMap<LabelKey, usize>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the templates shipped in `builtin/templates.yaml`.
    pub fn builtin() -> Result<Self> {
        let docs: Vec<TemplateDoc> = serde_yaml::from_str(BUILTIN_TEMPLATES).context("parse builtin templates")?;
        let mut reg = Self::new();
        for doc in docs {
            reg.register(doc)?;
        }
        Ok(reg)
    }

    /// Adds a template; a later registration under the same name wins.
    pub fn register(&mut self, doc: TemplateDoc) -> Result<()> {
        let name = doc
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| anyhow!("registry templates need a name"))?;
        let idx = self.templates.len();
        for label in std::iter::once(&name).chain(doc.aliases.iter()) {
            self.by_name.insert(LabelKey::new(label), idx);
        }
        self.templates.push(doc);
        Ok(())
    }

    /// Loads every `*.yaml` / `*.yml` file of `dir`; returns how many were added.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let mut paths = vec![];
        for entry in std::fs::read_dir(dir).with_context(|| format!("read template dir {}", dir.display()))? {
            let path = entry?.path();
            let is_yaml = matches!(path.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml"));
            if is_yaml {
                paths.push(path);
            }
        }
        paths.sort();
        for path in &paths {
            let doc = crate::doc::load_template_doc(path)?;
            self.register(doc).with_context(|| format!("register {}", path.display()))?;
            tracing::debug!(path = %path.display(), "registered template");
        }
        Ok(paths.len())
    }

    pub fn lookup(&self, definition_name: &str) -> Option<&TemplateDoc> {
        self.by_name.get(&LabelKey::new(definition_name)).map(|&i| &self.templates[i])
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.iter().filter_map(|t| t.name.as_deref()).collect()
    }
}
