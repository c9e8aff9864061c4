use rqc_core::{PhaseDefinition, StoredTemplate};

use crate::{
    doc::TemplateDoc,
    registry::TemplateRegistry,
    synth::synthesize,
    template::{TemplateError, TemplateSource, WorkflowTemplate},
};

/// Fallback values applied when a template leaves them out.
#[derive(Clone, Debug)]
pub struct TemplateDefaults {
    pub default_types: Vec<String>,
    pub placeholder_check: String,
}

impl Default for TemplateDefaults {
    fn default() -> Self {
        Self {
            default_types: vec![
                "on-site inspection".to_string(),
                "survey inspection".to_string(),
                "lab test".to_string(),
            ],
            placeholder_check: "Sign-off".to_string(),
        }
    }
}

/// Stored configuration, else a name-matched registry template, else one
/// synthesized from the definition's layer and check names.
pub fn resolve_template(
    definition: &PhaseDefinition,
    stored: Option<&StoredTemplate>,
    registry: &TemplateRegistry,
    defaults: &TemplateDefaults,
) -> Result<WorkflowTemplate, TemplateError> {
    if let Some(stored) = stored {
        let doc = TemplateDoc::from_json_str(&stored.body_json)
            .map_err(|e| TemplateError::Unreadable(format!("{e:#}")))?;
        return doc.normalize(&definition.id, TemplateSource::Stored, &defaults.default_types);
    }
    if let Some(doc) = registry.lookup(&definition.name) {
        return doc.normalize(&definition.id, TemplateSource::Builtin, &defaults.default_types);
    }
    let doc = synthesize(definition, &defaults.placeholder_check, &defaults.default_types);
    doc.normalize(&definition.id, TemplateSource::Synthesized, &defaults.default_types)
}
