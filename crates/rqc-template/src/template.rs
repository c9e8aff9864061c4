use std::collections::{BTreeSet, HashMap, HashSet};

use rqc_core::{tidy_label, CheckId, InspectionError, LabelKey, LayerId, PhaseDefinitionId};
use serde::Serialize;
use thiserror::Error;

use crate::doc::TemplateDoc;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("layer #{0} has an empty name")]
    EmptyLayerName(usize),
    #[error("layer {0} has a check with an empty name")]
    EmptyCheckName(String),
    #[error("duplicate layer id: {0}")]
    DuplicateLayerId(String),
    #[error("duplicate layer name: {0}")]
    DuplicateLayerName(String),
    #[error("layer {layer} has duplicate check: {check}")]
    DuplicateCheck { layer: String, check: String },
    #[error("layer {layer} depends on unknown layer: {dependency}")]
    UnknownDependency { layer: String, dependency: String },
    #[error("layer {0} depends on itself")]
    SelfDependency(String),
    #[error("template has no inspection types")]
    NoInspectionTypes,
    #[error("template must have at least one layer and one check (layers={layers}, checks={checks})")]
    Empty { layers: usize, checks: usize },
    #[error("layer dependencies form a cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
    #[error("stored template is unreadable: {0}")]
    Unreadable(String),
}

impl From<TemplateError> for InspectionError {
    fn from(e: TemplateError) -> Self {
        InspectionError::TemplateIntegrity(e.to_string())
    }
}

/// Where a resolved template came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateSource {
    Stored,
    Builtin,
    Synthesized,
}

#[derive(Clone, Debug, Serialize)]
pub struct WorkflowCheck {
    pub id: CheckId,
    pub name: String,
    pub aliases: Vec<String>,
    pub allowed_types: BTreeSet<String>,
    pub fixed_types: bool,
}

impl WorkflowCheck {
    pub fn key(&self) -> LabelKey {
        LabelKey::new(&self.name)
    }

    fn answers_to(&self, key: &LabelKey) -> bool {
        self.key() == *key || self.aliases.iter().any(|a| LabelKey::new(a) == *key)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct WorkflowLayer {
    pub id: LayerId,
    pub name: String,
    pub aliases: Vec<String>,
    pub stage: u32,
    pub dependencies: BTreeSet<LayerId>,
    /// Required completion order.
    pub checks: Vec<WorkflowCheck>,
}

impl WorkflowLayer {
    pub fn key(&self) -> LabelKey {
        LabelKey::new(&self.name)
    }

    /// Position and definition of the check answering to `label`.
    pub fn check(&self, label: &str) -> Option<(usize, &WorkflowCheck)> {
        let key = LabelKey::new(label);
        self.checks.iter().enumerate().find(|(_, c)| c.answers_to(&key))
    }
}

/// Normalized, indexed workflow for one phase definition. Read-only once built.
#[derive(Clone, Debug, Serialize)]
pub struct WorkflowTemplate {
    pub phase_definition_id: PhaseDefinitionId,
    pub source: TemplateSource,
    pub fingerprint: String,
    pub default_types: BTreeSet<String>,
    layers: Vec<WorkflowLayer>,
    #[serde(skip)]
    by_label: HashMap<LabelKey, usize>,
    #[serde(skip)]
    by_id: HashMap<LayerId, usize>,
}

impl WorkflowTemplate {
    pub fn layers(&self) -> &[WorkflowLayer] {
        &self.layers
    }

    pub fn layer(&self, id: &LayerId) -> Option<&WorkflowLayer> {
        self.by_id.get(id).map(|&i| &self.layers[i])
    }

    /// Resolves a layer by name or alias, ignoring case and whitespace.
    pub fn layer_by_label(&self, label: &str) -> Option<&WorkflowLayer> {
        self.by_label.get(&LabelKey::new(label)).map(|&i| &self.layers[i])
    }

    pub fn has_check_label(&self, label: &str) -> bool {
        self.layers.iter().any(|l| l.check(label).is_some())
    }

    pub fn check_count(&self) -> usize {
        self.layers.iter().map(|l| l.checks.len()).sum()
    }

    /// Rejects dependency cycles, naming the layers on the first cycle found.
    pub fn assert_acyclic(&self) -> Result<(), TemplateError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Fresh,
            Active,
            Done,
        }

        fn visit(
            t: &WorkflowTemplate,
            idx: usize,
            marks: &mut [Mark],
            path: &mut Vec<usize>,
        ) -> Option<Vec<String>> {
            match marks[idx] {
                Mark::Done => return None,
                Mark::Active => {
                    let from = path.iter().position(|&p| p == idx).unwrap_or(0);
                    let mut cycle: Vec<String> = path[from..].iter().map(|&p| t.layers[p].name.clone()).collect();
                    cycle.push(t.layers[idx].name.clone());
                    return Some(cycle);
                }
                Mark::Fresh => {}
            }
            marks[idx] = Mark::Active;
            path.push(idx);
            for dep in &t.layers[idx].dependencies {
                if let Some(&d) = t.by_id.get(dep) {
                    if let Some(cycle) = visit(t, d, marks, path) {
                        return Some(cycle);
                    }
                }
            }
            path.pop();
            marks[idx] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::Fresh; self.layers.len()];
        for idx in 0..self.layers.len() {
            let mut path = Vec::new();
            if let Some(cycle) = visit(self, idx, &mut marks, &mut path) {
                return Err(TemplateError::Cycle(cycle));
            }
        }
        Ok(())
    }
}

/// A template that gates nothing is refused at save time.
pub fn assert_template_non_empty(layers: usize, checks: usize) -> Result<(), TemplateError> {
    if layers == 0 || checks == 0 {
        return Err(TemplateError::Empty { layers, checks });
    }
    Ok(())
}

fn tidy_set(values: &[String]) -> BTreeSet<String> {
    values.iter().map(|v| tidy_label(v)).filter(|v| !v.is_empty()).collect()
}

impl TemplateDoc {
    /// Builds the indexed template. Fills in ids, stages and per-check types;
    /// fails on empty names, id/name collisions and dangling dependencies.
    pub fn normalize(
        &self,
        phase_definition_id: &PhaseDefinitionId,
        source: TemplateSource,
        fallback_types: &[String],
    ) -> Result<WorkflowTemplate, TemplateError> {
        let mut default_types = tidy_set(&self.default_types);
        if default_types.is_empty() {
            default_types = tidy_set(fallback_types);
        }
        if default_types.is_empty() {
            return Err(TemplateError::NoInspectionTypes);
        }

        let mut layers = Vec::with_capacity(self.layers.len());
        let mut by_label: HashMap<LabelKey, usize> = HashMap::new();
        let mut by_id: HashMap<LayerId, usize> = HashMap::new();

        for (idx, doc) in self.layers.iter().enumerate() {
            let name = tidy_label(&doc.name);
            if name.is_empty() {
                return Err(TemplateError::EmptyLayerName(idx + 1));
            }
            let id = doc
                .id
                .as_deref()
                .map(tidy_label)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| LabelKey::new(&name).as_str().to_string());
            let id = LayerId::from_str(id);
            if by_id.insert(id.clone(), idx).is_some() {
                return Err(TemplateError::DuplicateLayerId(id.0));
            }
            for label in std::iter::once(&name).chain(doc.aliases.iter()) {
                let key = LabelKey::new(label);
                if key.is_empty() {
                    continue;
                }
                if by_label.insert(key, idx).is_some_and(|prev| prev != idx) {
                    return Err(TemplateError::DuplicateLayerName(tidy_label(label)));
                }
            }

            let mut checks = Vec::with_capacity(doc.checks.len());
            let mut seen_checks = HashSet::new();
            for check in &doc.checks {
                let check_name = tidy_label(&check.name);
                if check_name.is_empty() {
                    return Err(TemplateError::EmptyCheckName(name.clone()));
                }
                if !seen_checks.insert(LabelKey::new(&check_name)) {
                    return Err(TemplateError::DuplicateCheck {
                        layer: name.clone(),
                        check: check_name,
                    });
                }
                let check_id = check
                    .id
                    .as_deref()
                    .map(tidy_label)
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| format!("{}.{}", id.as_str(), LabelKey::new(&check_name)));
                let mut allowed_types = tidy_set(&check.allowed_types);
                if allowed_types.is_empty() {
                    allowed_types = default_types.clone();
                }
                checks.push(WorkflowCheck {
                    id: CheckId::from_str(check_id),
                    name: check_name,
                    aliases: check.aliases.iter().map(|a| tidy_label(a)).filter(|a| !a.is_empty()).collect(),
                    allowed_types,
                    fixed_types: check.fixed_types,
                });
            }

            layers.push(WorkflowLayer {
                id,
                name,
                aliases: doc.aliases.iter().map(|a| tidy_label(a)).filter(|a| !a.is_empty()).collect(),
                stage: doc.stage.unwrap_or(idx as u32 + 1).max(1),
                dependencies: BTreeSet::new(),
                checks,
            });
        }

        // Dependencies may name layers declared later, so resolve in a second pass.
        for (idx, doc) in self.layers.iter().enumerate() {
            let mut deps = BTreeSet::new();
            for reference in &doc.depends_on {
                let target = by_id
                    .get(&LayerId::from_str(tidy_label(reference)))
                    .or_else(|| by_label.get(&LabelKey::new(reference)))
                    .copied()
                    .ok_or_else(|| TemplateError::UnknownDependency {
                        layer: layers[idx].name.clone(),
                        dependency: reference.clone(),
                    })?;
                if target == idx {
                    return Err(TemplateError::SelfDependency(layers[idx].name.clone()));
                }
                deps.insert(layers[target].id.clone());
            }
            layers[idx].dependencies = deps;
        }

        Ok(WorkflowTemplate {
            phase_definition_id: phase_definition_id.clone(),
            source,
            fingerprint: self.fingerprint(),
            default_types,
            layers,
            by_label,
            by_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::{CheckDoc, LayerDoc};

    fn layer(name: &str, deps: &[&str], checks: &[&str]) -> LayerDoc {
        LayerDoc {
            name: name.into(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            checks: checks
                .iter()
                .map(|c| CheckDoc {
                    name: c.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn doc(layers: Vec<LayerDoc>) -> TemplateDoc {
        TemplateDoc {
            default_types: vec!["on-site inspection".into()],
            layers,
            ..Default::default()
        }
    }

    fn normalize(d: &TemplateDoc) -> Result<WorkflowTemplate, TemplateError> {
        d.normalize(&PhaseDefinitionId::from_str("pd-1"), TemplateSource::Stored, &[])
    }

    #[test]
    fn fills_ids_stages_and_types() {
        let t = normalize(&doc(vec![
            layer("Formwork", &[], &["Installation"]),
            layer(" Rebar ", &["formwork"], &["Binding", "Inspection"]),
        ]))
        .unwrap();

        let rebar = t.layer_by_label("REBAR").unwrap();
        assert_eq!(rebar.name, "Rebar");
        assert_eq!(rebar.stage, 2);
        assert_eq!(rebar.id.as_str(), "rebar");
        assert!(rebar.dependencies.contains(&LayerId::from_str("formwork")));
        let (pos, check) = rebar.check("inspection").unwrap();
        assert_eq!(pos, 1);
        assert_eq!(check.id.as_str(), "rebar.inspection");
        assert!(check.allowed_types.contains("on-site inspection"));
        assert_eq!(t.check_count(), 3);
        assert!(t.has_check_label("installation"));
        assert!(!t.has_check_label("pouring"));
    }

    #[test]
    fn stage_is_at_least_one() {
        let mut l = layer("Formwork", &[], &["Installation"]);
        l.stage = Some(0);
        let t = normalize(&doc(vec![l])).unwrap();
        assert_eq!(t.layers()[0].stage, 1);
    }

    #[test]
    fn falls_back_to_given_types() {
        let mut d = doc(vec![layer("Formwork", &[], &["Installation"])]);
        d.default_types.clear();
        let t = d
            .normalize(&PhaseDefinitionId::from_str("pd-1"), TemplateSource::Stored, &["lab test".to_string()])
            .unwrap();
        assert!(t.default_types.contains("lab test"));

        assert_eq!(
            d.normalize(&PhaseDefinitionId::from_str("pd-1"), TemplateSource::Stored, &[]).unwrap_err(),
            TemplateError::NoInspectionTypes
        );
    }

    #[test]
    fn rejects_structural_problems() {
        assert!(matches!(
            normalize(&doc(vec![layer("A", &[], &["x"]), layer("a", &[], &["y"])])),
            Err(TemplateError::DuplicateLayerId(_))
        ));
        assert!(matches!(
            normalize(&doc(vec![layer("A", &["Z"], &["x"])])),
            Err(TemplateError::UnknownDependency { .. })
        ));
        assert!(matches!(
            normalize(&doc(vec![layer("A", &["A"], &["x"])])),
            Err(TemplateError::SelfDependency(_))
        ));
        assert!(matches!(
            normalize(&doc(vec![layer("A", &[], &["x", " X "])])),
            Err(TemplateError::DuplicateCheck { .. })
        ));
        assert!(matches!(normalize(&doc(vec![layer("  ", &[], &["x"])])), Err(TemplateError::EmptyLayerName(1))));
    }

    #[test]
    fn cycles_are_detected() {
        let t = normalize(&doc(vec![
            layer("A", &["C"], &["x"]),
            layer("B", &["A"], &["x"]),
            layer("C", &["B"], &["x"]),
        ]))
        .unwrap();
        match t.assert_acyclic() {
            Err(TemplateError::Cycle(path)) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("expected cycle, got {other:?}"),
        }

        let t = normalize(&doc(vec![layer("A", &[], &["x"]), layer("B", &["A"], &["x"])])).unwrap();
        assert!(t.assert_acyclic().is_ok());
    }

    #[test]
    fn empty_templates_are_refused() {
        assert_eq!(assert_template_non_empty(0, 0), Err(TemplateError::Empty { layers: 0, checks: 0 }));
        assert_eq!(assert_template_non_empty(2, 0), Err(TemplateError::Empty { layers: 2, checks: 0 }));
        assert!(assert_template_non_empty(1, 1).is_ok());
    }
}
