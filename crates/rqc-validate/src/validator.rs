use rqc_core::{InspectionEntry, InspectionError, InspectionResult, WorkflowValidationError};
use rqc_template::WorkflowTemplate;

use crate::coverage::{Coverage, LayerScope};
use crate::rule::Rule;
use crate::rules::{CheckOrderRule, DependencyRule, KnownChecksRule, KnownLayersRule, PointSideRule};
use crate::types::{Finding, PhaseContext, Severity, ValidateInput, ValidationRequest};

/// Runs the rule groups in order. Membership and side failures stop the run;
/// dependency and check-order failures are collected into one error.
pub struct WorkflowValidator {
    membership: Vec<Box<dyn Rule>>,
    sides: Vec<Box<dyn Rule>>,
    workflow: Vec<Box<dyn Rule>>,
}

impl Default for WorkflowValidator {
    fn default() -> Self {
        Self {
            membership: vec![Box::new(KnownLayersRule), Box::new(KnownChecksRule)],
            sides: vec![Box::new(PointSideRule)],
            workflow: vec![Box::new(DependencyRule), Box::new(CheckOrderRule)],
        }
    }
}

fn run_group(rules: &[Box<dyn Rule>], input: &ValidateInput<'_>) -> (Vec<Finding>, Vec<Finding>) {
    rules
        .iter()
        .flat_map(|r| r.eval(input))
        .partition(|f| f.severity == Severity::Fail)
}

fn joined(findings: &[Finding]) -> String {
    findings.iter().map(|f| f.message.as_str()).collect::<Vec<_>>().join("; ")
}

impl WorkflowValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks one (phase, side, range) group against the template and the
    /// history snapshot. Returns the warnings on success.
    pub fn validate(
        &self,
        template: &WorkflowTemplate,
        request: &ValidationRequest,
        phase: &PhaseContext,
        history: &[InspectionEntry],
    ) -> InspectionResult<Vec<Finding>> {
        if request.requested.is_empty() {
            return Ok(vec![]);
        }
        let scope = LayerScope::from_names(template, &phase.available_layers);
        let empty = Coverage::empty(request.range);
        let mut input = ValidateInput {
            template,
            request,
            phase,
            history,
            scope: &scope,
            coverage: &empty,
        };

        let (fails, mut warnings) = run_group(&self.membership, &input);
        if !fails.is_empty() {
            return Err(InspectionError::Input(joined(&fails)));
        }

        let (fails, w) = run_group(&self.sides, &input);
        warnings.extend(w);
        if !fails.is_empty() {
            return Err(InspectionError::SideConflict(joined(&fails)));
        }

        let coverage = Coverage::build(template, &request.phase_id, request.range, history, &scope);
        input.coverage = &coverage;
        let (fails, w) = run_group(&self.workflow, &input);
        warnings.extend(w);
        if !fails.is_empty() {
            let details: Vec<String> = fails.iter().map(|f| f.subject.clone()).collect();
            tracing::debug!(phase_id = %request.phase_id, side = request.side.as_str(), range = %request.range, ?details, "workflow prerequisites not met");
            let message = format!("workflow prerequisites not met: {}", details.join(", "));
            return Err(WorkflowValidationError::new(message, details).into());
        }

        for w in &warnings {
            tracing::warn!(rule = %w.rule_id, subject = %w.subject, "{}", w.message);
        }
        Ok(warnings)
    }
}
