use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Authoring and storage shape of a workflow template (YAML or JSON).
///
/// Documents are loose on purpose: ids, stages and per-check types may be
/// omitted and are filled in by [`TemplateDoc::normalize`](crate::TemplateDoc::normalize).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TemplateDoc {
    /// Phase-definition name this template applies to (registry lookups).
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub default_types: Vec<String>,
    #[serde(default)]
    pub layers: Vec<LayerDoc>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct LayerDoc {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub stage: Option<u32>,
    /// Layer ids or names.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub checks: Vec<CheckDoc>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckDoc {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub allowed_types: Vec<String>,
    /// When set, `allowed_types` replaces whatever the caller asks for.
    #[serde(default)]
    pub fixed_types: bool,
}

impl TemplateDoc {
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn check_count(&self) -> usize {
        self.layers.iter().map(|l| l.checks.len()).sum()
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        serde_yaml::from_str(s).context("parse template yaml")
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("parse template json")
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(self).context("serialize template json")
    }

    /// Hex SHA-256 over the canonical JSON form; stable across key order.
    pub fn fingerprint(&self) -> String {
        let v = canonical_json(self);
        let bytes = serde_json::to_vec(&v).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }
}

pub fn load_template_doc(path: &std::path::Path) -> Result<TemplateDoc> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read template: {}", path.display()))?;
    TemplateDoc::from_yaml_str(&s).with_context(|| format!("in {}", path.display()))
}

fn canonical_json(doc: &TemplateDoc) -> serde_json::Value {
    let v = serde_json::to_value(doc).unwrap_or_default();
    sort_json(v)
}

/// Recursively sort object keys for stable hashing.
fn sort_json(v: serde_json::Value) -> serde_json::Value {
    match v {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new_map = serde_json::Map::new();
            for k in keys {
                let child = map.get(&k).cloned().unwrap_or(serde_json::Value::Null);
                new_map.insert(k, sort_json(child));
            }
            serde_json::Value::Object(new_map)
        }
        serde_json::Value::Array(arr) => serde_json::Value::Array(arr.into_iter().map(sort_json).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIER: &str = r#"
name: Pier
default_types: [on-site inspection]
layers:
  - name: Formwork
    checks:
      - name: Installation
  - name: Rebar
    depends_on: [Formwork]
    checks:
      - name: Binding
        allowed_types: [on-site inspection, survey inspection]
        fixed_types: true
      - name: Inspection
"#;

    #[test]
    fn parses_loose_yaml() {
        let doc = TemplateDoc::from_yaml_str(PIER).unwrap();
        assert_eq!(doc.layer_count(), 2);
        assert_eq!(doc.check_count(), 3);
        assert!(doc.layers[1].checks[0].fixed_types);
        assert_eq!(doc.layers[1].depends_on, vec!["Formwork".to_string()]);
    }

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        let doc = TemplateDoc::from_yaml_str(PIER).unwrap();
        let json = doc.to_json_string().unwrap();
        let back = TemplateDoc::from_json_str(&json).unwrap();
        assert_eq!(doc.fingerprint(), back.fingerprint());
        assert_eq!(doc.fingerprint().len(), 64);

        let mut changed = doc.clone();
        changed.layers[0].checks[0].name = "Erection".into();
        assert_ne!(doc.fingerprint(), changed.fingerprint());
    }
}
