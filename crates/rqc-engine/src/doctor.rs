use anyhow::Result;
use rqc_core::PhaseDefinitionId;
use rqc_template::{assert_template_non_empty, TemplateDoc, TemplateSource};
use serde::Serialize;

use crate::Engine;

#[derive(Clone, Debug, Default, Serialize)]
pub struct DoctorReport {
    pub stored_templates: usize,
    pub registry_templates: usize,
    pub problems: Vec<String>,
}

impl DoctorReport {
    pub fn is_healthy(&self) -> bool {
        self.problems.is_empty()
    }
}

fn check_doc(doc: &TemplateDoc, id: &PhaseDefinitionId, source: TemplateSource, fallback: &[String]) -> Option<String> {
    let template = match doc.normalize(id, source, fallback) {
        Ok(t) => t,
        Err(e) => return Some(e.to_string()),
    };
    assert_template_non_empty(template.layers().len(), template.check_count())
        .and_then(|_| template.assert_acyclic())
        .err()
        .map(|e| e.to_string())
}

impl Engine {
    /// Opens a transaction and re-checks every stored and registered template.
    pub fn doctor(&self) -> Result<DoctorReport> {
        let mut report = DoctorReport::default();
        let fallback = &self.cfg.workflow.default_types;

        let tx = self.storage.begin()?;
        for stored in tx.list_stored_workflow_configs()? {
            report.stored_templates += 1;
            let id = &stored.phase_definition_id;
            let problem = match TemplateDoc::from_json_str(&stored.body_json) {
                Ok(doc) => {
                    let p = check_doc(&doc, id, TemplateSource::Stored, fallback);
                    if p.is_none() && doc.fingerprint() != stored.fingerprint {
                        Some("fingerprint does not match stored body".to_string())
                    } else {
                        p
                    }
                }
                Err(e) => Some(format!("{e:#}")),
            };
            if let Some(p) = problem {
                report.problems.push(format!("stored template {id}: {p}"));
            }
        }
        drop(tx);

        let registry_id = PhaseDefinitionId::from_str("registry");
        for name in self.registry.names() {
            report.registry_templates += 1;
            if let Some(doc) = self.registry.lookup(name) {
                if let Some(p) = check_doc(doc, &registry_id, TemplateSource::Builtin, fallback) {
                    report.problems.push(format!("registry template {name}: {p}"));
                }
            }
        }

        for p in &report.problems {
            tracing::warn!(problem = %p, "doctor");
        }
        Ok(report)
    }
}
