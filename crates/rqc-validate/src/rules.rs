use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use rqc_core::{tidy_label, LabelKey, LayerId, Side};
use rqc_template::{WorkflowCheck, WorkflowLayer, WorkflowTemplate};

use crate::coverage::LayerScope;
use crate::rule::Rule;
use crate::types::{Finding, ValidateInput, ValidationCategory};

/// Requested pairs resolved against the template, in template order
/// (layer position, then check position). Unresolvable pairs are skipped.
fn resolved_pairs<'t>(input: &ValidateInput<'t>) -> Vec<(usize, &'t WorkflowLayer, usize, &'t WorkflowCheck)> {
    let template: &'t WorkflowTemplate = input.template;
    let mut out = vec![];
    let mut seen = HashSet::new();
    for req in &input.request.requested {
        let Some(layer) = template.layer_by_label(&req.layer) else {
            continue;
        };
        let Some((pos, check)) = layer.check(&req.check) else {
            continue;
        };
        let layer_pos = template.layers().iter().position(|l| l.id == layer.id).unwrap_or(usize::MAX);
        if seen.insert((layer_pos, pos)) {
            out.push((layer_pos, layer, pos, check));
        }
    }
    out.sort_by_key(|(lp, _, cp, _)| (*lp, *cp));
    out
}

/// Every requested layer exists in the template and is exposed by the phase.
pub struct KnownLayersRule;

impl Rule for KnownLayersRule {
    fn id(&self) -> &str {
        "known_layers"
    }

    fn category(&self) -> ValidationCategory {
        ValidationCategory::Membership
    }

    fn eval(&self, input: &ValidateInput<'_>) -> Vec<Finding> {
        let mut out = vec![];
        let mut seen = HashSet::new();
        for req in &input.request.requested {
            if !seen.insert(LabelKey::new(&req.layer)) {
                continue;
            }
            match input.template.layer_by_label(&req.layer) {
                None => {
                    let name = tidy_label(&req.layer);
                    out.push(self.fail(name.clone(), format!("unknown layer: {name}")));
                }
                Some(layer) if !input.scope.contains(&layer.id) => {
                    out.push(self.fail(
                        layer.name.clone(),
                        format!("layer {} is not enabled for this phase", layer.name),
                    ));
                }
                Some(_) => {}
            }
        }
        out
    }
}

/// Every requested check exists, under the layer it was submitted for.
pub struct KnownChecksRule;

impl Rule for KnownChecksRule {
    fn id(&self) -> &str {
        "known_checks"
    }

    fn category(&self) -> ValidationCategory {
        ValidationCategory::Membership
    }

    fn eval(&self, input: &ValidateInput<'_>) -> Vec<Finding> {
        let mut out = vec![];
        let mut seen = HashSet::new();
        for req in &input.request.requested {
            let Some(layer) = input.template.layer_by_label(&req.layer) else {
                continue;
            };
            if layer.check(&req.check).is_some() {
                continue;
            }
            let check = tidy_label(&req.check);
            if !seen.insert((layer.id.clone(), LabelKey::new(&check))) {
                continue;
            }
            if input.template.has_check_label(&check) {
                out.push(self.fail(
                    format!("{}/{}", layer.name, check),
                    format!("check {check} does not belong to layer {}", layer.name),
                ));
            } else {
                out.push(self.fail(check.clone(), format!("unknown check: {check}")));
            }
        }
        out
    }
}

/// Point phases with per-side semantics: no BOTH, and a point already
/// recorded on exactly one side keeps that side.
pub struct PointSideRule;

impl Rule for PointSideRule {
    fn id(&self) -> &str {
        "point_side"
    }

    fn category(&self) -> ValidationCategory {
        ValidationCategory::SideConsistency
    }

    fn eval(&self, input: &ValidateInput<'_>) -> Vec<Finding> {
        if !input.phase.point_with_sides() {
            return vec![];
        }
        let req = input.request;
        if req.side == Side::Both {
            return vec![self.fail(
                Side::Both.as_str(),
                format!("point {} cannot be reported for both sides at once", req.range.start),
            )];
        }

        let established: BTreeSet<Side> = input
            .history
            .iter()
            .filter(|e| e.phase_id == req.phase_id && e.side != Side::Both && e.range.intersects(&req.range))
            .map(|e| e.side)
            .collect();
        if established.len() == 1 && !established.contains(&req.side) {
            let side = established.iter().next().copied().unwrap_or(Side::Both);
            return vec![self.fail(
                req.side.as_str(),
                format!(
                    "point {} is already recorded on the {} side; {} does not match",
                    req.range.start,
                    side.as_str(),
                    req.side.as_str()
                ),
            )];
        }
        vec![]
    }
}

/// Dependencies of every selected layer are covered over the whole target
/// range, on every requested side.
pub struct DependencyRule;

impl DependencyRule {
    /// Nearest available layers standing in for `dep`. Unavailable layers
    /// are skipped through to their own dependencies.
    fn resolve_available(
        template: &WorkflowTemplate,
        scope: &LayerScope,
        dep: &LayerId,
        visited: &mut HashSet<LayerId>,
        out: &mut Vec<LayerId>,
    ) {
        if !visited.insert(dep.clone()) {
            return;
        }
        if scope.contains(dep) {
            out.push(dep.clone());
            return;
        }
        if let Some(layer) = template.layer(dep) {
            for next in &layer.dependencies {
                Self::resolve_available(template, scope, next, visited, out);
            }
        }
    }
}

impl Rule for DependencyRule {
    fn id(&self) -> &str {
        "layer_dependencies"
    }

    fn category(&self) -> ValidationCategory {
        ValidationCategory::Dependency
    }

    fn eval(&self, input: &ValidateInput<'_>) -> Vec<Finding> {
        let template = input.template;
        let side = input.request.side;
        let mut warnings = vec![];

        // layer id -> sides it is missing on, in first-seen order
        let mut order: Vec<LayerId> = vec![];
        let mut missing: BTreeMap<LayerId, BTreeSet<Side>> = BTreeMap::new();

        let mut selected: Vec<&WorkflowLayer> = vec![];
        for (_, layer, _, _) in resolved_pairs(input) {
            if !selected.iter().any(|l| l.id == layer.id) {
                selected.push(layer);
            }
        }

        for layer in selected {
            for dep in &layer.dependencies {
                let mut visited = HashSet::from([layer.id.clone()]);
                let mut required = vec![];
                Self::resolve_available(template, input.scope, dep, &mut visited, &mut required);
                if required.is_empty() && !input.scope.contains(dep) {
                    let dep_name = template.layer(dep).map(|l| l.name.as_str()).unwrap_or(dep.as_str());
                    warnings.push(self.warn(
                        dep_name,
                        format!("{}: dependency {dep_name} has no available layer in this phase", layer.name),
                    ));
                }
                for req in required {
                    for &s in side.expand() {
                        if input.coverage.has_coverage(&req, s) {
                            continue;
                        }
                        let sides = missing.entry(req.clone()).or_default();
                        if sides.is_empty() {
                            order.push(req.clone());
                        }
                        sides.insert(s);
                    }
                }
            }
        }

        let mut out = vec![];
        for id in order {
            let name = template.layer(&id).map(|l| l.name.clone()).unwrap_or_else(|| id.0.clone());
            let sides = &missing[&id];
            if side == Side::Both && sides.len() == 1 {
                for s in sides {
                    let subject = format!("{}：{}", s.as_str(), name);
                    out.push(self.fail(subject, format!("layer {name} is not complete on the {} side", s.as_str())));
                }
            } else {
                out.push(self.fail(name.clone(), format!("layer {name} is not complete over {}", input.coverage.target())));
            }
        }
        out.extend(warnings);
        out
    }
}

/// Earlier checks of a layer are either submitted alongside or already done
/// on every requested side.
pub struct CheckOrderRule;

impl Rule for CheckOrderRule {
    fn id(&self) -> &str {
        "check_order"
    }

    fn category(&self) -> ValidationCategory {
        ValidationCategory::CheckOrder
    }

    fn eval(&self, input: &ValidateInput<'_>) -> Vec<Finding> {
        let pairs = resolved_pairs(input);
        let requested: HashSet<(LayerId, LabelKey)> =
            pairs.iter().map(|(_, l, _, c)| (l.id.clone(), c.key())).collect();

        // (layer, missing check, requesting check) in template order
        let mut missing: Vec<(&WorkflowLayer, &WorkflowCheck, &WorkflowCheck)> = vec![];
        let mut reported = HashSet::new();
        for &(_, layer, pos, check) in &pairs {
            for earlier in &layer.checks[..pos] {
                let key = earlier.key();
                if requested.contains(&(layer.id.clone(), key.clone())) {
                    continue;
                }
                if input.coverage.has_completed_check(&layer.id, input.request.side, &key) {
                    continue;
                }
                if reported.insert((layer.id.clone(), key)) {
                    missing.push((layer, earlier, check));
                }
            }
        }

        let mut per_name: HashMap<LabelKey, usize> = HashMap::new();
        for (_, earlier, _) in &missing {
            *per_name.entry(earlier.key()).or_default() += 1;
        }
        missing
            .into_iter()
            .map(|(layer, earlier, check)| {
                let subject = if per_name[&earlier.key()] > 1 {
                    format!("{}/{}", layer.name, earlier.name)
                } else {
                    earlier.name.clone()
                };
                self.fail(
                    subject,
                    format!("{} requires {} of layer {} first", check.name, earlier.name, layer.name),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::Coverage;
    use crate::test_support::*;
    use crate::types::{PhaseContext, RequestedCheck, Severity, ValidationRequest};
    use rqc_core::{EntryStatus, InspectionEntry, Measure};

    fn run(
        rule: &dyn Rule,
        template: &WorkflowTemplate,
        request: &ValidationRequest,
        phase_ctx: &PhaseContext,
        history: &[InspectionEntry],
    ) -> Vec<Finding> {
        let scope = LayerScope::from_names(template, &phase_ctx.available_layers);
        let coverage = Coverage::build(template, &request.phase_id, request.range, history, &scope);
        let input = ValidateInput {
            template,
            request,
            phase: phase_ctx,
            history,
            scope: &scope,
            coverage: &coverage,
        };
        rule.eval(&input)
    }

    fn subjects(findings: &[Finding]) -> Vec<String> {
        findings
            .iter()
            .filter(|f| f.severity == Severity::Fail)
            .map(|f| f.subject.clone())
            .collect()
    }

    #[test]
    fn unknown_layers_are_all_listed() {
        let t = formwork_rebar();
        let req = request(Side::Left, 0.0, 10.0, &[("Scaffold", "x"), ("Rebar", "Binding"), ("Paint", "y")]);
        let f = run(&KnownLayersRule, &t, &req, &PhaseContext::default(), &[]);
        assert_eq!(subjects(&f), vec!["Scaffold", "Paint"]);
    }

    #[test]
    fn unavailable_layer_is_rejected() {
        let t = chain_abc();
        let ctx = PhaseContext {
            available_layers: vec!["A".into(), "C".into()],
            ..Default::default()
        };
        let req = request(Side::Left, 0.0, 10.0, &[("B", "b1")]);
        let f = run(&KnownLayersRule, &t, &req, &ctx, &[]);
        assert_eq!(subjects(&f), vec!["B"]);
    }

    #[test]
    fn checks_must_belong_to_their_layer() {
        let t = formwork_rebar();
        let req = request(Side::Left, 0.0, 10.0, &[("Rebar", "Installation"), ("Rebar", "Welding")]);
        let f = run(&KnownChecksRule, &t, &req, &PhaseContext::default(), &[]);
        assert_eq!(subjects(&f), vec!["Rebar/Installation", "Welding"]);
    }

    #[test]
    fn transitive_dependency_skips_unavailable_layer() {
        let t = chain_abc();
        let ctx = PhaseContext {
            available_layers: vec!["A".into(), "C".into()],
            ..Default::default()
        };
        let req = request(Side::Left, 0.0, 100.0, &[("C", "c1")]);

        let f = run(&DependencyRule, &t, &req, &ctx, &[]);
        assert_eq!(subjects(&f), vec!["A"]);

        // B's coverage is irrelevant; A's is what counts.
        let history = vec![hist("A", "a1", Side::Left, 0.0, 100.0, EntryStatus::Scheduled)];
        let f = run(&DependencyRule, &t, &req, &ctx, &history);
        assert!(subjects(&f).is_empty());
    }

    #[test]
    fn exhausted_chain_only_warns() {
        let t = chain_abc();
        let ctx = PhaseContext {
            available_layers: vec!["C".into()],
            ..Default::default()
        };
        let req = request(Side::Left, 0.0, 100.0, &[("C", "c1")]);
        let f = run(&DependencyRule, &t, &req, &ctx, &[]);
        assert!(subjects(&f).is_empty());
        assert!(f.iter().any(|x| x.severity == Severity::Warn));
    }

    #[test]
    fn both_side_needs_left_and_right() {
        let t = formwork_rebar();
        let req = request(Side::Both, 0.0, 100.0, &[("Rebar", "Binding")]);

        let f = run(&DependencyRule, &t, &req, &PhaseContext::default(), &[]);
        assert_eq!(subjects(&f), vec!["Formwork"]);

        let history = vec![hist("Formwork", "Installation", Side::Left, 0.0, 100.0, EntryStatus::Scheduled)];
        let f = run(&DependencyRule, &t, &req, &PhaseContext::default(), &history);
        assert_eq!(subjects(&f), vec!["RIGHT：Formwork"]);

        let history = vec![
            hist("Formwork", "Installation", Side::Left, 0.0, 100.0, EntryStatus::Scheduled),
            hist("Formwork", "Installation", Side::Right, 0.0, 100.0, EntryStatus::Scheduled),
        ];
        let f = run(&DependencyRule, &t, &req, &PhaseContext::default(), &history);
        assert!(subjects(&f).is_empty());
    }

    #[test]
    fn partial_coverage_is_missing() {
        let t = formwork_rebar();
        let req = request(Side::Right, 0.0, 100.0, &[("Rebar", "Binding")]);
        let history = vec![hist("Formwork", "Installation", Side::Right, 0.0, 60.0, EntryStatus::Scheduled)];
        let f = run(&DependencyRule, &t, &req, &PhaseContext::default(), &history);
        assert_eq!(subjects(&f), vec!["Formwork"]);
    }

    #[test]
    fn cyclic_dependencies_terminate() {
        let t = cyclic_pair();
        let ctx = PhaseContext {
            available_layers: vec!["Top".into()],
            ..Default::default()
        };
        let req = request(Side::Left, 0.0, 10.0, &[("Top", "t1")]);
        let f = run(&DependencyRule, &t, &req, &ctx, &[]);
        assert!(subjects(&f).is_empty());
    }

    #[test]
    fn unavailable_dependency_sharing_a_root_resolves_without_warning() {
        let t = shared_root();
        let ctx = PhaseContext {
            available_layers: vec!["A".into(), "D".into()],
            ..Default::default()
        };
        let req = request(Side::Left, 0.0, 100.0, &[("D", "d1")]);

        let f = run(&DependencyRule, &t, &req, &ctx, &[]);
        assert_eq!(subjects(&f), vec!["A"]);
        assert!(f.iter().all(|x| x.severity == Severity::Fail));

        let history = vec![hist("A", "a1", Side::Left, 0.0, 100.0, EntryStatus::Scheduled)];
        assert!(run(&DependencyRule, &t, &req, &ctx, &history).is_empty());
    }

    #[test]
    fn same_check_missing_in_two_layers_names_each_layer() {
        let t = twin_courses();
        let req = request(
            Side::Left,
            0.0,
            10.0,
            &[("Surface Course", "Rolling"), ("Binder Course", "Rolling"), ("Shoulder", "Compaction")],
        );
        let f = run(&CheckOrderRule, &t, &req, &PhaseContext::default(), &[]);
        assert_eq!(subjects(&f), vec!["Binder Course/Paving", "Surface Course/Paving", "Trimming"]);
    }

    #[test]
    fn earlier_checks_are_required() {
        let t = three_checks();
        let req = request(Side::Left, 0.0, 10.0, &[("Deck", "Third")]);
        let f = run(&CheckOrderRule, &t, &req, &PhaseContext::default(), &[]);
        assert_eq!(subjects(&f), vec!["First", "Second"]);

        let req = request(Side::Left, 0.0, 10.0, &[("Deck", "First"), ("Deck", "Second"), ("Deck", "Third")]);
        let f = run(&CheckOrderRule, &t, &req, &PhaseContext::default(), &[]);
        assert!(f.is_empty());
    }

    #[test]
    fn completed_checks_must_hold_on_every_side() {
        let t = three_checks();
        let history = vec![hist("Deck", "First", Side::Left, 0.0, 10.0, EntryStatus::Scheduled)];

        let req = request(Side::Left, 0.0, 10.0, &[("Deck", "Second")]);
        assert!(run(&CheckOrderRule, &t, &req, &PhaseContext::default(), &history).is_empty());

        let req = request(Side::Both, 0.0, 10.0, &[("Deck", "Second")]);
        let f = run(&CheckOrderRule, &t, &req, &PhaseContext::default(), &history);
        assert_eq!(subjects(&f), vec!["First"]);
    }

    #[test]
    fn point_with_sides_rejects_both_and_mismatch() {
        let t = formwork_rebar();
        let ctx = PhaseContext {
            measure: Some(Measure::Point),
            point_has_sides: true,
            available_layers: vec![],
        };
        let req = request(Side::Both, 5.0, 5.0, &[("Formwork", "Installation")]);
        assert_eq!(subjects(&run(&PointSideRule, &t, &req, &ctx, &[])), vec!["BOTH"]);

        let history = vec![hist("Formwork", "Installation", Side::Left, 5.0, 5.0, EntryStatus::Pending)];
        let req = request(Side::Right, 5.0, 5.0, &[("Rebar", "Binding")]);
        assert_eq!(subjects(&run(&PointSideRule, &t, &req, &ctx, &history)), vec!["RIGHT"]);

        let req = request(Side::Left, 5.0, 5.0, &[("Rebar", "Binding")]);
        assert!(run(&PointSideRule, &t, &req, &ctx, &history).is_empty());

        let linear = PhaseContext::default();
        let req = request(Side::Both, 5.0, 5.0, &[("Formwork", "Installation")]);
        assert!(run(&PointSideRule, &t, &req, &linear, &[]).is_empty());
    }

    #[test]
    fn requested_check_pairs_are_listed_in_template_order() {
        let t = formwork_rebar();
        let req = ValidationRequest {
            requested: vec![RequestedCheck::new("Rebar", "Inspection"), RequestedCheck::new("Formwork", "Installation")],
            ..request(Side::Left, 0.0, 1.0, &[])
        };
        let scope = LayerScope::all();
        let coverage = Coverage::empty(req.range);
        let ctx = PhaseContext::default();
        let input = ValidateInput {
            template: &t,
            request: &req,
            phase: &ctx,
            history: &[],
            scope: &scope,
            coverage: &coverage,
        };
        let names: Vec<&str> = resolved_pairs(&input).iter().map(|(_, l, _, _)| l.name.as_str()).collect();
        assert_eq!(names, vec!["Formwork", "Rebar"]);
    }
}
