use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail};
use rqc_core::{
    submission_code, ActorId, DedupKey, EntryFilter, EntryId, EntryPatch, InspectionEntry, Phase, PhaseDefinition,
    PhaseDefinitionId, PhaseId, PositionRange, Road, RoadId, StoredTemplate, Submission, SubmissionId,
};

use crate::traits::{Storage, StoreTx};

/// In-memory storage for tests and dry runs. Not durable.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

#[derive(Clone, Default)]
struct Inner {
    roads: HashMap<RoadId, Road>,
    definitions: HashMap<PhaseDefinitionId, PhaseDefinition>,
    phases: HashMap<PhaseId, Phase>,
    templates: HashMap<PhaseDefinitionId, StoredTemplate>,
    submissions: HashMap<SubmissionId, Submission>,
    next_submission_seq: i64,
    entries: Vec<InspectionEntry>,
    by_id: HashMap<EntryId, usize>,
    by_key: HashMap<DedupKey, usize>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for InMemoryStorage {
    fn begin(&self) -> anyhow::Result<Box<dyn StoreTx + '_>> {
        let guard = self.inner.lock().map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }
}

/// Holds the store lock for its lifetime and works on a copy; commit swaps
/// the copy in.
struct MemoryTx<'a> {
    guard: MutexGuard<'a, Inner>,
    work: Inner,
}

impl StoreTx for MemoryTx<'_> {
    fn find_road(&self, id: &RoadId) -> anyhow::Result<Option<Road>> {
        Ok(self.work.roads.get(id).cloned())
    }

    fn insert_road(&mut self, road: Road) -> anyhow::Result<()> {
        if self.work.roads.contains_key(&road.id) {
            bail!("road {} already exists", road.id);
        }
        self.work.roads.insert(road.id.clone(), road);
        Ok(())
    }

    fn find_phase_definition(&self, id: &PhaseDefinitionId) -> anyhow::Result<Option<PhaseDefinition>> {
        Ok(self.work.definitions.get(id).cloned())
    }

    fn insert_phase_definition(&mut self, def: PhaseDefinition) -> anyhow::Result<()> {
        if self.work.definitions.contains_key(&def.id) {
            bail!("phase definition {} already exists", def.id);
        }
        self.work.definitions.insert(def.id.clone(), def);
        Ok(())
    }

    fn find_phase(&self, id: &PhaseId) -> anyhow::Result<Option<Phase>> {
        Ok(self.work.phases.get(id).cloned())
    }

    fn insert_phase(&mut self, phase: Phase) -> anyhow::Result<()> {
        if self.work.phases.contains_key(&phase.id) {
            bail!("phase {} already exists", phase.id);
        }
        self.work.phases.insert(phase.id.clone(), phase);
        Ok(())
    }

    fn find_stored_workflow_config(&self, id: &PhaseDefinitionId) -> anyhow::Result<Option<StoredTemplate>> {
        Ok(self.work.templates.get(id).cloned())
    }

    fn list_stored_workflow_configs(&self) -> anyhow::Result<Vec<StoredTemplate>> {
        let mut all: Vec<StoredTemplate> = self.work.templates.values().cloned().collect();
        all.sort_by(|a, b| a.phase_definition_id.cmp(&b.phase_definition_id));
        Ok(all)
    }

    fn save_workflow_config(&mut self, stored: StoredTemplate) -> anyhow::Result<()> {
        self.work.templates.insert(stored.phase_definition_id.clone(), stored);
        Ok(())
    }

    fn find_overlapping_entries(
        &self,
        phase_id: &PhaseId,
        range: &PositionRange,
    ) -> anyhow::Result<Vec<InspectionEntry>> {
        Ok(self
            .work
            .entries
            .iter()
            .filter(|e| e.phase_id == *phase_id && e.range.intersects(range))
            .cloned()
            .collect())
    }

    fn find_entry_by_dedup_key(&self, key: &DedupKey) -> anyhow::Result<Option<InspectionEntry>> {
        Ok(self.work.by_key.get(key).map(|&idx| self.work.entries[idx].clone()))
    }

    fn insert_entry(&mut self, entry: InspectionEntry) -> anyhow::Result<InspectionEntry> {
        let key = entry.dedup_key();
        if self.work.by_key.contains_key(&key) {
            bail!("duplicate inspection entry for {}/{} on {}", entry.layer_name, entry.check_name, entry.range);
        }
        if self.work.by_id.contains_key(&entry.id) {
            bail!("entry {} already exists", entry.id);
        }
        let idx = self.work.entries.len();
        self.work.by_key.insert(key, idx);
        self.work.by_id.insert(entry.id.clone(), idx);
        self.work.entries.push(entry.clone());
        Ok(entry)
    }

    fn update_entry(&mut self, id: &EntryId, patch: &EntryPatch) -> anyhow::Result<InspectionEntry> {
        let idx = *self.work.by_id.get(id).ok_or_else(|| anyhow!("entry {id} not found"))?;
        let entry = &mut self.work.entries[idx];
        patch.apply(entry);
        Ok(entry.clone())
    }

    fn find_entries(&self, filter: &EntryFilter) -> anyhow::Result<Vec<InspectionEntry>> {
        Ok(self.work.entries.iter().filter(|e| filter.matches(e)).cloned().collect())
    }

    fn find_submission(&self, id: &SubmissionId) -> anyhow::Result<Option<Submission>> {
        Ok(self.work.submissions.get(id).cloned())
    }

    fn create_submission(&mut self, created_by: &ActorId, now_unix: i64) -> anyhow::Result<Submission> {
        self.work.next_submission_seq += 1;
        let seq = self.work.next_submission_seq;
        let submission = Submission {
            id: SubmissionId::new(),
            seq,
            code: submission_code(seq),
            created_by: created_by.clone(),
            created_at_unix: now_unix,
        };
        self.work.submissions.insert(submission.id.clone(), submission.clone());
        Ok(submission)
    }

    fn commit(self: Box<Self>) -> anyhow::Result<()> {
        let MemoryTx { mut guard, work } = *self;
        *guard = work;
        tracing::trace!("in-memory transaction committed");
        Ok(())
    }
}
