use rqc_core::{
    ActorId, DedupKey, EntryFilter, EntryId, EntryPatch, InspectionEntry, Phase, PhaseDefinition, PhaseDefinitionId,
    PhaseId, PositionRange, Road, RoadId, StoredTemplate, Submission, SubmissionId,
};

/// A persistence backend. All reads and writes go through a [`StoreTx`].
pub trait Storage: Send + Sync {
    /// Opens a transaction. Nothing it writes is visible to other callers
    /// until [`StoreTx::commit`]; dropping it rolls back.
    fn begin(&self) -> anyhow::Result<Box<dyn StoreTx + '_>>;
}

pub trait StoreTx {
    fn find_road(&self, id: &RoadId) -> anyhow::Result<Option<Road>>;
    fn insert_road(&mut self, road: Road) -> anyhow::Result<()>;

    fn find_phase_definition(&self, id: &PhaseDefinitionId) -> anyhow::Result<Option<PhaseDefinition>>;
    fn insert_phase_definition(&mut self, def: PhaseDefinition) -> anyhow::Result<()>;

    fn find_phase(&self, id: &PhaseId) -> anyhow::Result<Option<Phase>>;
    fn insert_phase(&mut self, phase: Phase) -> anyhow::Result<()>;

    fn find_stored_workflow_config(&self, id: &PhaseDefinitionId) -> anyhow::Result<Option<StoredTemplate>>;
    fn list_stored_workflow_configs(&self) -> anyhow::Result<Vec<StoredTemplate>>;
    /// Inserts or replaces the configuration for its phase definition.
    fn save_workflow_config(&mut self, stored: StoredTemplate) -> anyhow::Result<()>;

    /// Entries of `phase_id` whose range intersects `range` (shared
    /// endpoints included), any side, any status.
    fn find_overlapping_entries(&self, phase_id: &PhaseId, range: &PositionRange)
        -> anyhow::Result<Vec<InspectionEntry>>;
    fn find_entry_by_dedup_key(&self, key: &DedupKey) -> anyhow::Result<Option<InspectionEntry>>;
    fn insert_entry(&mut self, entry: InspectionEntry) -> anyhow::Result<InspectionEntry>;
    /// Applies `patch` and returns the updated entry; errors if `id` is unknown.
    fn update_entry(&mut self, id: &EntryId, patch: &EntryPatch) -> anyhow::Result<InspectionEntry>;
    fn find_entries(&self, filter: &EntryFilter) -> anyhow::Result<Vec<InspectionEntry>>;

    fn find_submission(&self, id: &SubmissionId) -> anyhow::Result<Option<Submission>>;
    /// Allocates the next sequence number and its `SUB-<n>` code.
    fn create_submission(&mut self, created_by: &ActorId, now_unix: i64) -> anyhow::Result<Submission>;

    fn commit(self: Box<Self>) -> anyhow::Result<()>;
}
