use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{ids::*, label::LabelKey, model::*, range::PositionRange};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Road {
    pub id: RoadId,
    pub name: String,
}

/// Catalogue entry describing a kind of construction activity.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PhaseDefinition {
    pub id: PhaseDefinitionId,
    pub name: String,
    pub measure: Measure,
    #[serde(default)]
    pub point_has_sides: bool,
    /// Layer names used when no template exists for this definition.
    #[serde(default)]
    pub layers: Vec<String>,
    /// Check names used when no template exists for this definition.
    #[serde(default)]
    pub checks: Vec<String>,
}

/// A phase definition instantiated on one road.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Phase {
    pub id: PhaseId,
    pub road_id: RoadId,
    pub phase_definition_id: PhaseDefinitionId,
    pub name: String,
    /// Subset of template layers this phase exposes. Empty means all.
    #[serde(default)]
    pub available_layer_names: Vec<String>,
}

/// Workflow configuration as persisted. The template document is kept as JSON
/// text so storage stays independent of the template crate.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StoredTemplate {
    pub phase_definition_id: PhaseDefinitionId,
    pub body_json: String,
    pub fingerprint: String,
    pub updated_at_unix: i64,
}

/// Umbrella record grouping the entries of one batch.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Submission {
    pub id: SubmissionId,
    pub seq: i64,
    pub code: String,
    pub created_by: ActorId,
    pub created_at_unix: i64,
}

pub fn submission_code(seq: i64) -> String {
    format!("SUB-{seq}")
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InspectionEntry {
    pub id: EntryId,
    pub submission_id: SubmissionId,
    pub road_id: RoadId,
    pub phase_id: PhaseId,
    pub side: Side,
    pub range: PositionRange,
    pub layer_id: Option<LayerId>,
    pub layer_name: String,
    pub check_id: Option<CheckId>,
    pub check_name: String,
    pub types: BTreeSet<String>,
    pub status: EntryStatus,
    pub appointment_date: Option<String>,
    pub remark: Option<String>,
    pub submission_order: Option<i64>,
    pub submitted_at_unix: i64,
    pub submitted_by: ActorId,
    pub created_by: ActorId,
    pub updated_by: ActorId,
    pub created_at_unix: i64,
    pub updated_at_unix: i64,
}

impl InspectionEntry {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(
            &self.road_id,
            &self.phase_id,
            self.side,
            &self.range,
            &self.layer_name,
            &self.check_name,
        )
    }
}

/// Identity of an inspection fact across resubmissions.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DedupKey {
    pub road_id: RoadId,
    pub phase_id: PhaseId,
    pub side: Side,
    pub start_key: i64,
    pub end_key: i64,
    pub layer_key: LabelKey,
    pub check_key: LabelKey,
}

impl DedupKey {
    pub fn new(
        road_id: &RoadId,
        phase_id: &PhaseId,
        side: Side,
        range: &PositionRange,
        layer_name: &str,
        check_name: &str,
    ) -> Self {
        let (start_key, end_key) = range.key();
        Self {
            road_id: road_id.clone(),
            phase_id: phase_id.clone(),
            side,
            start_key,
            end_key,
            layer_key: LabelKey::new(layer_name),
            check_key: LabelKey::new(check_name),
        }
    }
}

/// Changes applied to an existing entry on resubmission. `None` leaves a
/// field untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct EntryPatch {
    pub types: Option<BTreeSet<String>>,
    pub appointment_date: Option<String>,
    pub remark: Option<String>,
    pub submission_order: Option<i64>,
    pub updated_by: ActorId,
    pub updated_at_unix: i64,
}

impl EntryPatch {
    pub fn apply(&self, entry: &mut InspectionEntry) {
        if let Some(types) = &self.types {
            entry.types = types.clone();
        }
        if let Some(date) = &self.appointment_date {
            entry.appointment_date = Some(date.clone());
        }
        if let Some(remark) = &self.remark {
            entry.remark = Some(remark.clone());
        }
        if let Some(order) = self.submission_order {
            entry.submission_order = Some(order);
        }
        entry.updated_by = self.updated_by.clone();
        entry.updated_at_unix = self.updated_at_unix;
    }
}

/// One caller-proposed inspection entry, before normalization.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ProposedEntry {
    #[serde(default)]
    pub submission_id: Option<SubmissionId>,
    pub road_id: RoadId,
    pub phase_id: PhaseId,
    pub side: Option<Side>,
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub layer_name: String,
    #[serde(default)]
    pub check_name: String,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub status: Option<EntryStatus>,
    #[serde(default)]
    pub appointment_date: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
    #[serde(default)]
    pub submission_order: Option<i64>,
}

/// Read-side filter shared by every storage backend.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EntryFilter {
    pub road_id: Option<RoadId>,
    pub phase_id: Option<PhaseId>,
    pub submission_id: Option<SubmissionId>,
    pub side: Option<Side>,
    pub status: Option<EntryStatus>,
    pub min_status: Option<EntryStatus>,
    pub layer: Option<String>,
    pub range: Option<PositionRange>,
}

impl EntryFilter {
    pub fn matches(&self, entry: &InspectionEntry) -> bool {
        if self.road_id.as_ref().is_some_and(|id| *id != entry.road_id) {
            return false;
        }
        if self.phase_id.as_ref().is_some_and(|id| *id != entry.phase_id) {
            return false;
        }
        if self.submission_id.as_ref().is_some_and(|id| *id != entry.submission_id) {
            return false;
        }
        if self.side.is_some_and(|s| s != entry.side) {
            return false;
        }
        if self.status.is_some_and(|s| s != entry.status) {
            return false;
        }
        if self.min_status.is_some_and(|s| entry.status < s) {
            return false;
        }
        if let Some(layer) = &self.layer {
            if LabelKey::new(layer) != LabelKey::new(&entry.layer_name) {
                return false;
            }
        }
        if let Some(range) = &self.range {
            if !range.intersects(&entry.range) {
                return false;
            }
        }
        true
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntrySort {
    #[default]
    RangeStart,
    SubmittedAt,
    Status,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub filter: EntryFilter,
    #[serde(default)]
    pub sort: EntrySort,
    #[serde(default)]
    pub descending: bool,
    /// 1-based.
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
}
