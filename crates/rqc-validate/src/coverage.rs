use std::collections::{HashMap, HashSet};

use rqc_core::{is_fully_covered, merge_ranges, InspectionEntry, LabelKey, LayerId, PhaseId, PositionRange, Side};
use rqc_template::WorkflowTemplate;

/// Layers a phase instance exposes. Unrestricted scopes contain every layer.
#[derive(Clone, Debug)]
pub struct LayerScope {
    restricted: bool,
    ids: HashSet<LayerId>,
}

impl LayerScope {
    pub fn all() -> Self {
        Self {
            restricted: false,
            ids: HashSet::new(),
        }
    }

    /// Resolves `names` against the template. An empty list (or one naming
    /// nothing the template knows) leaves the scope unrestricted.
    pub fn from_names(template: &WorkflowTemplate, names: &[String]) -> Self {
        let mut ids = HashSet::new();
        for name in names {
            match template.layer_by_label(name) {
                Some(layer) => {
                    ids.insert(layer.id.clone());
                }
                None => tracing::debug!(layer = %name, "available layer not in template; ignored"),
            }
        }
        if ids.is_empty() {
            return Self::all();
        }
        Self { restricted: true, ids }
    }

    pub fn contains(&self, id: &LayerId) -> bool {
        !self.restricted || self.ids.contains(id)
    }

    pub fn is_restricted(&self) -> bool {
        self.restricted
    }
}

/// Whether a history range counts toward `target`. Ranges must overlap
/// strictly; shared endpoints count only when one side is a point.
fn reaches(range: &PositionRange, target: &PositionRange) -> bool {
    if target.is_point() || range.is_point() {
        range.intersects(target)
    } else {
        range.overlaps(target)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CoverageKey {
    layer: LayerId,
    side: Side,
}

impl CoverageKey {
    fn new(layer: &LayerId, side: Side) -> Self {
        Self {
            layer: layer.clone(),
            side,
        }
    }
}

/// Per (layer, side) coverage of one target range, built from history.
///
/// Only concrete sides are stored; a `Both` entry is recorded under `Left`
/// and `Right`, and a `Both` query requires both.
#[derive(Clone, Debug)]
pub struct Coverage {
    target: PositionRange,
    ranges: HashMap<CoverageKey, Vec<PositionRange>>,
    completed: HashMap<CoverageKey, HashSet<LabelKey>>,
}

impl Coverage {
    pub fn empty(target: PositionRange) -> Self {
        Self {
            target,
            ranges: HashMap::new(),
            completed: HashMap::new(),
        }
    }

    pub fn build(
        template: &WorkflowTemplate,
        phase_id: &PhaseId,
        target: PositionRange,
        history: &[InspectionEntry],
        scope: &LayerScope,
    ) -> Self {
        let mut cov = Self::empty(target);
        for entry in history {
            if entry.phase_id != *phase_id || !entry.status.is_workflow_satisfied() {
                continue;
            }
            let Some(layer) = template.layer_by_label(&entry.layer_name) else {
                tracing::debug!(entry_id = %entry.id, layer = %entry.layer_name, "history entry layer not in template");
                continue;
            };
            if !scope.contains(&layer.id) {
                continue;
            }
            if !reaches(&entry.range, &target) {
                continue;
            }
            let Some(clipped) = entry.range.clip(&target) else {
                continue;
            };
            let own_check = layer
                .check(&entry.check_name)
                .map(|(_, c)| c.key())
                .unwrap_or_else(|| LabelKey::new(&entry.check_name));

            for &side in entry.side.expand() {
                let key = CoverageKey::new(&layer.id, side);
                cov.ranges.entry(key.clone()).or_default().push(clipped);
                let done = cov.completed.entry(key).or_default();
                done.insert(own_check.clone());
                // Any satisfied entry counts as layer-level completion.
                done.extend(layer.checks.iter().map(|c| c.key()));
            }
        }
        cov
    }

    pub fn target(&self) -> &PositionRange {
        &self.target
    }

    pub fn has_coverage(&self, layer: &LayerId, side: Side) -> bool {
        side.expand().iter().all(|&s| {
            self.ranges
                .get(&CoverageKey::new(layer, s))
                .is_some_and(|ranges| is_fully_covered(&self.target, &merge_ranges(ranges)))
        })
    }

    pub fn has_completed_check(&self, layer: &LayerId, side: Side, check: &LabelKey) -> bool {
        side.expand().iter().all(|&s| {
            self.completed
                .get(&CoverageKey::new(layer, s))
                .is_some_and(|done| done.contains(check))
        })
    }

    /// Merged coverage for one concrete side; for display and diagnostics.
    pub fn merged(&self, layer: &LayerId, side: Side) -> Vec<PositionRange> {
        self.ranges
            .get(&CoverageKey::new(layer, side))
            .map(|r| merge_ranges(r))
            .unwrap_or_default()
    }
}
