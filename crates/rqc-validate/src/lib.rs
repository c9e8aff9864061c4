//! Workflow admissibility: are the prerequisites of the requested
//! (layer, check) pairs already satisfied over the target range?

pub mod coverage;
pub mod rule;
pub mod rules;
pub mod types;
pub mod validator;

pub use coverage::{Coverage, LayerScope};
pub use rule::Rule;
pub use rules::{CheckOrderRule, DependencyRule, KnownChecksRule, KnownLayersRule, PointSideRule};
pub use types::{Finding, PhaseContext, RequestedCheck, Severity, ValidateInput, ValidationCategory, ValidationRequest};
pub use validator::WorkflowValidator;

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeSet;

    use rqc_core::{
        ActorId, EntryId, EntryStatus, InspectionEntry, PhaseDefinitionId, PhaseId, PositionRange, RoadId, Side,
        SubmissionId,
    };
    use rqc_template::{TemplateDoc, TemplateSource, WorkflowTemplate};

    use crate::types::{RequestedCheck, ValidationRequest};

    fn template(yaml: &str) -> WorkflowTemplate {
        TemplateDoc::from_yaml_str(yaml)
            .unwrap()
            .normalize(&PhaseDefinitionId::from_str("pd-1"), TemplateSource::Stored, &["on-site inspection".into()])
            .unwrap()
    }

    pub fn formwork_rebar() -> WorkflowTemplate {
        template(
            r#"
layers:
  - name: Formwork
    checks: [{ name: Installation }]
  - name: Rebar
    depends_on: [Formwork]
    checks: [{ name: Binding }, { name: Inspection }]
"#,
        )
    }

    pub fn chain_abc() -> WorkflowTemplate {
        template(
            r#"
layers:
  - { name: A, checks: [{ name: a1 }] }
  - { name: B, depends_on: [A], checks: [{ name: b1 }] }
  - { name: C, depends_on: [B], checks: [{ name: c1 }] }
"#,
        )
    }

    pub fn three_checks() -> WorkflowTemplate {
        template(
            r#"
layers:
  - name: Deck
    checks: [{ name: First }, { name: Second }, { name: Third }]
"#,
        )
    }

    /// Top depends on X; X and Y depend on each other.
    pub fn cyclic_pair() -> WorkflowTemplate {
        template(
            r#"
layers:
  - { name: X, depends_on: [Y], checks: [{ name: x1 }] }
  - { name: Y, depends_on: [X], checks: [{ name: y1 }] }
  - { name: Top, depends_on: [X], checks: [{ name: t1 }] }
"#,
        )
    }

    /// D depends on A and on B; B depends on A.
    pub fn shared_root() -> WorkflowTemplate {
        template(
            r#"
layers:
  - { name: A, checks: [{ name: a1 }] }
  - { name: B, depends_on: [A], checks: [{ name: b1 }] }
  - { name: D, depends_on: [A, B], checks: [{ name: d1 }] }
"#,
        )
    }

    /// Two independent layers sharing check names.
    pub fn twin_courses() -> WorkflowTemplate {
        template(
            r#"
layers:
  - name: Binder Course
    checks: [{ name: Paving }, { name: Rolling }]
  - name: Surface Course
    checks: [{ name: Paving }, { name: Rolling }]
  - name: Shoulder
    checks: [{ name: Trimming }, { name: Compaction }]
"#,
        )
    }

    pub fn phase() -> PhaseId {
        PhaseId::from_str("phase-1")
    }

    pub fn range(start: f64, end: f64) -> PositionRange {
        PositionRange::normalize(start, end)
    }

    pub fn request(side: Side, start: f64, end: f64, pairs: &[(&str, &str)]) -> ValidationRequest {
        ValidationRequest {
            phase_id: phase(),
            side,
            range: range(start, end),
            requested: pairs.iter().map(|(l, c)| RequestedCheck::new(*l, *c)).collect(),
        }
    }

    pub fn hist(layer: &str, check: &str, side: Side, start: f64, end: f64, status: EntryStatus) -> InspectionEntry {
        let actor = ActorId::from_str("tester");
        InspectionEntry {
            id: EntryId::new(),
            submission_id: SubmissionId::from_str("sub-0"),
            road_id: RoadId::from_str("road-1"),
            phase_id: phase(),
            side,
            range: range(start, end),
            layer_id: None,
            layer_name: layer.into(),
            check_id: None,
            check_name: check.into(),
            types: BTreeSet::from(["on-site inspection".to_string()]),
            status,
            appointment_date: None,
            remark: None,
            submission_order: None,
            submitted_at_unix: 0,
            submitted_by: actor.clone(),
            created_by: actor.clone(),
            updated_by: actor,
            created_at_unix: 0,
            updated_at_unix: 0,
        }
    }
}
