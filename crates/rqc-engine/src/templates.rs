use std::collections::HashMap;
use std::sync::{Arc, MutexGuard};

use anyhow::anyhow;
use rqc_core::{InspectionError, InspectionResult, PhaseDefinition, PhaseDefinitionId, StoredTemplate};
use rqc_storage::StoreTx;
use rqc_template::{assert_template_non_empty, resolve_template, TemplateDoc, TemplateSource, WorkflowTemplate};

use crate::{util::now_unix, Engine};

impl Engine {
    /// Resolved template for a phase definition, from the cache when possible.
    pub fn load_template(&self, phase_definition_id: &PhaseDefinitionId) -> InspectionResult<Arc<WorkflowTemplate>> {
        let tx = self.storage.begin()?;
        let def = tx
            .find_phase_definition(phase_definition_id)?
            .ok_or_else(|| InspectionError::input(format!("unknown phase definition: {phase_definition_id}")))?;
        self.template_in(tx.as_ref(), &def)
    }

    /// Normalizes `doc`, rejects empty or cyclic templates, and stores it as
    /// the definition's configuration.
    pub fn save_template(
        &self,
        phase_definition_id: &PhaseDefinitionId,
        doc: &TemplateDoc,
    ) -> InspectionResult<Arc<WorkflowTemplate>> {
        let mut tx = self.storage.begin()?;
        if tx.find_phase_definition(phase_definition_id)?.is_none() {
            return Err(InspectionError::input(format!("unknown phase definition: {phase_definition_id}")));
        }

        let template = doc.normalize(phase_definition_id, TemplateSource::Stored, &self.cfg.workflow.default_types)?;
        assert_template_non_empty(template.layers().len(), template.check_count())?;
        template.assert_acyclic()?;

        let body_json = doc.to_json_string()?;
        tx.save_workflow_config(StoredTemplate {
            phase_definition_id: phase_definition_id.clone(),
            body_json,
            fingerprint: template.fingerprint.clone(),
            updated_at_unix: now_unix(),
        })?;
        tx.commit()?;

        self.invalidate_template(phase_definition_id)?;
        tracing::info!(
            phase_definition_id = %phase_definition_id,
            fingerprint = %template.fingerprint,
            layers = template.layers().len(),
            "template saved"
        );
        Ok(Arc::new(template))
    }

    pub(crate) fn template_in(
        &self,
        tx: &dyn StoreTx,
        def: &PhaseDefinition,
    ) -> InspectionResult<Arc<WorkflowTemplate>> {
        if let Some(hit) = self.cache()?.get(&def.id) {
            tracing::debug!(phase_definition_id = %def.id, "template cache hit");
            return Ok(hit.clone());
        }
        let stored = tx.find_stored_workflow_config(&def.id)?;
        let template = Arc::new(resolve_template(
            def,
            stored.as_ref(),
            &self.registry,
            &self.cfg.template_defaults(),
        )?);
        tracing::debug!(phase_definition_id = %def.id, source = ?template.source, "template resolved");
        self.cache()?.insert(def.id.clone(), template.clone());
        Ok(template)
    }

    fn invalidate_template(&self, id: &PhaseDefinitionId) -> InspectionResult<()> {
        if self.cache()?.remove(id).is_some() {
            tracing::debug!(phase_definition_id = %id, "template cache invalidated");
        }
        Ok(())
    }

    fn cache(&self) -> InspectionResult<MutexGuard<'_, HashMap<PhaseDefinitionId, Arc<WorkflowTemplate>>>> {
        self.templates
            .lock()
            .map_err(|_| InspectionError::Storage(anyhow!("template cache lock poisoned")))
    }
}
