use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use rqc_core::{
    tidy_label, ActorId, CheckId, DedupKey, EntryId, EntryPatch, EntryStatus, InspectionEntry, InspectionError,
    InspectionResult, LabelKey, LayerId, Measure, Phase, PhaseDefinition, PhaseId, PositionRange, ProposedEntry,
    RoadId, Side, Submission, SubmissionId,
};
use rqc_storage::StoreTx;
use rqc_template::WorkflowTemplate;
use rqc_validate::{Finding, PhaseContext, RequestedCheck, ValidationRequest};
use serde::Serialize;

use crate::{util::now_unix, Engine};

/// What one accepted batch did.
#[derive(Clone, Debug, Serialize)]
pub struct SubmitReport {
    /// The umbrella submission created for entries that named none.
    pub submission: Option<Submission>,
    /// Persisted entries, one per distinct dedup key, in submission order.
    pub entries: Vec<InspectionEntry>,
    pub created: usize,
    pub updated: usize,
    pub warnings: Vec<Finding>,
}

struct PhaseBundle {
    phase: Phase,
    template: Arc<WorkflowTemplate>,
    context: PhaseContext,
}

/// A proposed entry after reference checks and label canonicalization.
#[derive(Clone, Debug, PartialEq)]
struct NormalizedEntry {
    submission_id: Option<SubmissionId>,
    road_id: RoadId,
    phase_id: PhaseId,
    side: Side,
    range: PositionRange,
    layer_id: Option<LayerId>,
    layer_name: String,
    check_id: Option<CheckId>,
    check_name: String,
    types: BTreeSet<String>,
    status: Option<EntryStatus>,
    appointment_date: Option<String>,
    remark: Option<String>,
    submission_order: Option<i64>,
}

impl NormalizedEntry {
    fn dedup_key(&self) -> DedupKey {
        DedupKey::new(
            &self.road_id,
            &self.phase_id,
            self.side,
            &self.range,
            &self.layer_name,
            &self.check_name,
        )
    }

    /// Folds a later duplicate of the same key into `self`.
    fn absorb(&mut self, later: NormalizedEntry) {
        self.types.extend(later.types);
        if later.appointment_date.is_some() {
            self.appointment_date = later.appointment_date;
        }
        if later.remark.is_some() {
            self.remark = later.remark;
        }
        if later.submission_order.is_some() {
            self.submission_order = later.submission_order;
        }
        if later.submission_id.is_some() {
            self.submission_id = later.submission_id;
        }
        self.status = self.status.max(later.status);
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Side and range as the phase's measure dictates. Point phases collapse the
/// range to its start; point phases without sides always record `Both`.
fn place(def: &PhaseDefinition, p: &ProposedEntry, n: usize) -> InspectionResult<(Side, PositionRange)> {
    let mut range = PositionRange::normalize(p.start, p.end);
    if def.measure == Measure::Point {
        range = PositionRange::point(range.start);
        if !def.point_has_sides {
            return Ok((Side::Both, range));
        }
    }
    let side = p
        .side
        .ok_or_else(|| InspectionError::input(format!("entry {n}: side is required")))?;
    Ok((side, range))
}

/// Canonical labels and the inspection types the check accepts.
///
/// Labels the template does not know are passed through tidied; the
/// validator reports them together.
fn canonicalize(
    template: &WorkflowTemplate,
    p: &ProposedEntry,
    n: usize,
) -> InspectionResult<(Option<LayerId>, String, Option<CheckId>, String, BTreeSet<String>)> {
    let layer_label = tidy_label(&p.layer_name);
    if layer_label.is_empty() {
        return Err(InspectionError::input(format!("entry {n}: layer name is required")));
    }
    let check_label = tidy_label(&p.check_name);
    if check_label.is_empty() {
        return Err(InspectionError::input(format!("entry {n}: check name is required")));
    }
    let requested: BTreeSet<String> = p.types.iter().map(|t| tidy_label(t)).filter(|t| !t.is_empty()).collect();

    let resolved = template
        .layer_by_label(&layer_label)
        .and_then(|layer| layer.check(&check_label).map(|(_, check)| (layer, check)));
    let Some((layer, check)) = resolved else {
        return Ok((None, layer_label, None, check_label, requested));
    };

    let types: BTreeSet<String> = if check.fixed_types {
        check.allowed_types.clone()
    } else {
        let wanted: HashSet<LabelKey> = requested.iter().map(|t| LabelKey::new(t)).collect();
        check
            .allowed_types
            .iter()
            .filter(|t| wanted.contains(&LabelKey::new(t)))
            .cloned()
            .collect()
    };
    if types.is_empty() {
        let allowed: Vec<&str> = check.allowed_types.iter().map(String::as_str).collect();
        let msg = if requested.is_empty() {
            format!("entry {n}: at least one inspection type is required")
        } else {
            format!(
                "entry {n}: none of the inspection types are allowed for {}/{} (allowed: {})",
                layer.name,
                check.name,
                allowed.join(", ")
            )
        };
        return Err(InspectionError::input(msg));
    }
    Ok((
        Some(layer.id.clone()),
        layer.name.clone(),
        Some(check.id.clone()),
        check.name.clone(),
        types,
    ))
}

fn normalize_entry(
    bundle: &PhaseBundle,
    def: &PhaseDefinition,
    p: &ProposedEntry,
    n: usize,
) -> InspectionResult<NormalizedEntry> {
    let (side, range) = place(def, p, n)?;
    let (layer_id, layer_name, check_id, check_name, types) = canonicalize(&bundle.template, p, n)?;
    Ok(NormalizedEntry {
        submission_id: p.submission_id.clone(),
        road_id: p.road_id.clone(),
        phase_id: bundle.phase.id.clone(),
        side,
        range,
        layer_id,
        layer_name,
        check_id,
        check_name,
        types,
        status: p.status,
        appointment_date: non_empty(&p.appointment_date),
        remark: non_empty(&p.remark),
        submission_order: p.submission_order,
    })
}

/// Collapses entries sharing a dedup key, keeping first-seen order.
fn merge_batch(entries: Vec<NormalizedEntry>) -> Vec<NormalizedEntry> {
    let mut out: Vec<NormalizedEntry> = Vec::with_capacity(entries.len());
    let mut index: HashMap<DedupKey, usize> = HashMap::new();
    for entry in entries {
        let key = entry.dedup_key();
        match index.get(&key) {
            Some(&i) => out[i].absorb(entry),
            None => {
                index.insert(key, out.len());
                out.push(entry);
            }
        }
    }
    out
}

/// Entries validated together: same phase, side and range.
fn validation_groups(entries: &[NormalizedEntry]) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = vec![];
    let mut index: HashMap<(PhaseId, Side, (i64, i64)), usize> = HashMap::new();
    for (i, e) in entries.iter().enumerate() {
        let key = (e.phase_id.clone(), e.side, e.range.key());
        match index.get(&key) {
            Some(&g) => groups[g].push(i),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![i]);
            }
        }
    }
    groups
}

impl Engine {
    /// Validates and persists a batch of proposed entries as one unit.
    ///
    /// Nothing is written unless every entry passes; workflow failures carry
    /// every missing prerequisite in their details.
    pub fn submit_inspection_entries(
        &self,
        proposed: &[ProposedEntry],
        actor: &ActorId,
    ) -> InspectionResult<SubmitReport> {
        if proposed.is_empty() {
            return Err(InspectionError::input("no entries submitted"));
        }
        let mut tx = self.storage.begin()?;
        match self.submit_in(&mut *tx, proposed, actor, now_unix()) {
            Ok(report) => {
                tx.commit()?;
                tracing::info!(
                    actor = %actor,
                    entries = report.entries.len(),
                    created = report.created,
                    updated = report.updated,
                    submission = report.submission.as_ref().map(|s| s.code.as_str()).unwrap_or("-"),
                    "submission merged"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::warn!(actor = %actor, error = %e, details = ?e.details(), "submission rejected");
                Err(e)
            }
        }
    }

    fn load_bundle(
        &self,
        tx: &dyn StoreTx,
        phase_id: &PhaseId,
        n: usize,
    ) -> InspectionResult<(PhaseBundle, PhaseDefinition)> {
        let phase = tx
            .find_phase(phase_id)?
            .ok_or_else(|| InspectionError::input(format!("entry {n}: unknown phase {phase_id}")))?;
        let def = tx.find_phase_definition(&phase.phase_definition_id)?.ok_or_else(|| {
            InspectionError::input(format!(
                "entry {n}: phase {phase_id} references unknown phase definition {}",
                phase.phase_definition_id
            ))
        })?;
        let template = self.template_in(tx, &def)?;
        let context = PhaseContext {
            measure: Some(def.measure),
            point_has_sides: def.point_has_sides,
            available_layers: phase.available_layer_names.clone(),
        };
        Ok((
            PhaseBundle {
                phase,
                template,
                context,
            },
            def,
        ))
    }

    fn submit_in(
        &self,
        tx: &mut dyn StoreTx,
        proposed: &[ProposedEntry],
        actor: &ActorId,
        now: i64,
    ) -> InspectionResult<SubmitReport> {
        let mut bundles: HashMap<PhaseId, (PhaseBundle, PhaseDefinition)> = HashMap::new();
        let mut known_roads: HashSet<RoadId> = HashSet::new();
        let mut known_submissions: HashSet<SubmissionId> = HashSet::new();

        let mut normalized = Vec::with_capacity(proposed.len());
        for (idx, p) in proposed.iter().enumerate() {
            let n = idx + 1;
            if !known_roads.contains(&p.road_id) {
                if tx.find_road(&p.road_id)?.is_none() {
                    return Err(InspectionError::input(format!("entry {n}: unknown road {}", p.road_id)));
                }
                known_roads.insert(p.road_id.clone());
            }
            if !bundles.contains_key(&p.phase_id) {
                let loaded = self.load_bundle(&*tx, &p.phase_id, n)?;
                bundles.insert(p.phase_id.clone(), loaded);
            }
            let (bundle, def) = &bundles[&p.phase_id];
            if bundle.phase.road_id != p.road_id {
                return Err(InspectionError::input(format!(
                    "entry {n}: phase {} does not belong to road {}",
                    p.phase_id, p.road_id
                )));
            }
            if let Some(sub) = &p.submission_id {
                if !known_submissions.contains(sub) {
                    if tx.find_submission(sub)?.is_none() {
                        return Err(InspectionError::input(format!("entry {n}: unknown submission {sub}")));
                    }
                    known_submissions.insert(sub.clone());
                }
            }
            normalized.push(normalize_entry(bundle, def, p, n)?);
        }

        let mut warnings = vec![];
        for group in validation_groups(&normalized) {
            let first = &normalized[group[0]];
            let (bundle, _) = &bundles[&first.phase_id];
            let history = tx.find_overlapping_entries(&first.phase_id, &first.range)?;
            let request = ValidationRequest {
                phase_id: first.phase_id.clone(),
                side: first.side,
                range: first.range,
                requested: group
                    .iter()
                    .map(|&i| RequestedCheck::new(normalized[i].layer_name.clone(), normalized[i].check_name.clone()))
                    .collect(),
            };
            warnings.extend(self.validator.validate(&bundle.template, &request, &bundle.context, &history)?);
        }

        let mut submission: Option<Submission> = None;
        let mut report_entries = vec![];
        let (mut created, mut updated) = (0, 0);
        for entry in merge_batch(normalized) {
            let key = entry.dedup_key();
            if let Some(existing) = tx.find_entry_by_dedup_key(&key)? {
                let mut types = existing.types.clone();
                types.extend(entry.types);
                let patch = EntryPatch {
                    types: Some(types),
                    appointment_date: entry.appointment_date,
                    remark: entry.remark,
                    submission_order: entry.submission_order,
                    updated_by: actor.clone(),
                    updated_at_unix: now,
                };
                report_entries.push(tx.update_entry(&existing.id, &patch)?);
                updated += 1;
                continue;
            }

            let submission_id = match entry.submission_id {
                Some(id) => id,
                None => match &submission {
                    Some(s) => s.id.clone(),
                    None => {
                        let s = tx.create_submission(actor, now)?;
                        tracing::debug!(code = %s.code, "submission created");
                        let id = s.id.clone();
                        submission = Some(s);
                        id
                    }
                },
            };
            let inserted = tx.insert_entry(InspectionEntry {
                id: EntryId::new(),
                submission_id,
                road_id: entry.road_id,
                phase_id: entry.phase_id,
                side: entry.side,
                range: entry.range,
                layer_id: entry.layer_id,
                layer_name: entry.layer_name,
                check_id: entry.check_id,
                check_name: entry.check_name,
                types: entry.types,
                status: entry.status.unwrap_or(self.cfg.workflow.default_status),
                appointment_date: entry.appointment_date,
                remark: entry.remark,
                submission_order: entry.submission_order,
                submitted_at_unix: now,
                submitted_by: actor.clone(),
                created_by: actor.clone(),
                updated_by: actor.clone(),
                created_at_unix: now,
                updated_at_unix: now,
            })?;
            report_entries.push(inserted);
            created += 1;
        }

        Ok(SubmitReport {
            submission,
            entries: report_entries,
            created,
            updated,
            warnings,
        })
    }
}
