use rqc_core::{InspectionEntry, Measure, PhaseId, PositionRange, Side};
use rqc_template::WorkflowTemplate;
use serde::{Deserialize, Serialize};

use crate::coverage::{Coverage, LayerScope};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ValidationCategory {
    Membership,
    SideConsistency,
    Dependency,
    CheckOrder,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Warn,
    Fail,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Finding {
    pub rule_id: String,
    pub category: ValidationCategory,
    pub severity: Severity,
    pub message: String,
    /// The offending layer or check, as shown to the operator.
    pub subject: String,
}

/// A (layer, check) pair as the caller labelled it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedCheck {
    pub layer: String,
    pub check: String,
}

impl RequestedCheck {
    pub fn new(layer: impl Into<String>, check: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            check: check.into(),
        }
    }
}

/// One validator call: every pair submitted for the same (phase, side, range).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub phase_id: PhaseId,
    pub side: Side,
    pub range: PositionRange,
    pub requested: Vec<RequestedCheck>,
}

/// Phase facts the rules need beyond the template.
#[derive(Clone, Debug, Default)]
pub struct PhaseContext {
    pub measure: Option<Measure>,
    pub point_has_sides: bool,
    /// Empty means every template layer is available.
    pub available_layers: Vec<String>,
}

impl PhaseContext {
    pub fn point_with_sides(&self) -> bool {
        self.measure == Some(Measure::Point) && self.point_has_sides
    }
}

/// Read-only view the rules evaluate against. Built by the validator from
/// the template and the history snapshot the caller loaded.
pub struct ValidateInput<'a> {
    pub template: &'a WorkflowTemplate,
    pub request: &'a ValidationRequest,
    pub phase: &'a PhaseContext,
    pub history: &'a [InspectionEntry],
    pub scope: &'a LayerScope,
    pub coverage: &'a Coverage,
}
