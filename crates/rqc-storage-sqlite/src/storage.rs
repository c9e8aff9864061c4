use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rqc_core::{
    submission_code, ActorId, CheckId, DedupKey, EntryFilter, EntryId, EntryPatch, EntryStatus, InspectionEntry,
    LayerId, Measure, Phase, PhaseDefinition, PhaseDefinitionId, PhaseId, PositionRange, Road, RoadId, Side,
    StoredTemplate, Submission, SubmissionId, EPSILON,
};
use rqc_storage::{Storage, StoreTx};

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path).with_context(|| format!("open sqlite db {}", db_path.display()))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        // init schema
        let init_sql = include_str!("../migrations/0001_init.sql");
        conn.execute_batch(init_sql).context("apply schema")?;
        tracing::debug!(db = %db_path.display(), "sqlite store opened");
        Ok(Self { conn: Mutex::new(conn) })
    }
}

impl Storage for SqliteStorage {
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>> {
        let conn = self.conn.lock().map_err(|_| anyhow!("sqlite connection lock poisoned"))?;
        // write lock held from the first dedup lookup to commit
        conn.execute_batch("BEGIN IMMEDIATE").context("begin transaction")?;
        Ok(Box::new(SqliteTx { conn, finished: false }))
    }
}

struct SqliteTx<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl Drop for SqliteTx<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "sqlite rollback failed");
            }
        }
    }
}

const ENTRY_COLUMNS: &str = "id, submission_id, road_id, phase_id, side, range_start, range_end, layer_id, layer_name,
    check_id, check_name, types_json, status, appointment_date, remark, submission_order, submitted_at, submitted_by,
    created_by, updated_by, created_at, updated_at";

fn bad_value(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, format!("unknown {what}: {value}").into())
}

fn json_column<T: serde::de::DeserializeOwned>(r: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = r.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_entry(r: &Row<'_>) -> rusqlite::Result<InspectionEntry> {
    let side: String = r.get(4)?;
    let status: String = r.get(12)?;
    Ok(InspectionEntry {
        id: EntryId::from_str(r.get::<_, String>(0)?),
        submission_id: SubmissionId::from_str(r.get::<_, String>(1)?),
        road_id: RoadId::from_str(r.get::<_, String>(2)?),
        phase_id: PhaseId::from_str(r.get::<_, String>(3)?),
        side: Side::parse(&side).ok_or_else(|| bad_value(4, "side", &side))?,
        range: PositionRange::normalize(r.get(5)?, r.get(6)?),
        layer_id: r.get::<_, Option<String>>(7)?.map(LayerId::from_str),
        layer_name: r.get(8)?,
        check_id: r.get::<_, Option<String>>(9)?.map(CheckId::from_str),
        check_name: r.get(10)?,
        types: json_column(r, 11)?,
        status: EntryStatus::parse(&status).ok_or_else(|| bad_value(12, "status", &status))?,
        appointment_date: r.get(13)?,
        remark: r.get(14)?,
        submission_order: r.get(15)?,
        submitted_at_unix: r.get(16)?,
        submitted_by: ActorId::from_str(r.get::<_, String>(17)?),
        created_by: ActorId::from_str(r.get::<_, String>(18)?),
        updated_by: ActorId::from_str(r.get::<_, String>(19)?),
        created_at_unix: r.get(20)?,
        updated_at_unix: r.get(21)?,
    })
}

impl SqliteTx<'_> {
    fn query_entries(&self, where_sql: &str, args: &[&dyn ToSql]) -> Result<Vec<InspectionEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE {where_sql} ORDER BY range_start, created_at, id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(args, row_to_entry)?;
        let mut out = vec![];
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn find_entry(&self, id: &EntryId) -> Result<Option<InspectionEntry>> {
        Ok(self.query_entries("id = ?1", &[&id.0])?.into_iter().next())
    }
}

impl StoreTx for SqliteTx<'_> {
    fn find_road(&self, id: &RoadId) -> Result<Option<Road>> {
        let road = self
            .conn
            .query_row("SELECT id, name FROM roads WHERE id = ?1", [&id.0], |r| {
                Ok(Road {
                    id: RoadId::from_str(r.get::<_, String>(0)?),
                    name: r.get(1)?,
                })
            })
            .optional()?;
        Ok(road)
    }

    fn insert_road(&mut self, road: Road) -> Result<()> {
        self.conn
            .execute("INSERT INTO roads(id, name) VALUES (?1, ?2)", params![road.id.0, road.name])
            .with_context(|| format!("insert road {}", road.id))?;
        Ok(())
    }

    fn find_phase_definition(&self, id: &PhaseDefinitionId) -> Result<Option<PhaseDefinition>> {
        let def = self
            .conn
            .query_row(
                "SELECT id, name, measure, point_has_sides, layers_json, checks_json FROM phase_definitions WHERE id = ?1",
                [&id.0],
                |r| {
                    let measure: String = r.get(2)?;
                    Ok(PhaseDefinition {
                        id: PhaseDefinitionId::from_str(r.get::<_, String>(0)?),
                        name: r.get(1)?,
                        measure: Measure::parse(&measure).ok_or_else(|| bad_value(2, "measure", &measure))?,
                        point_has_sides: r.get::<_, i64>(3)? != 0,
                        layers: json_column(r, 4)?,
                        checks: json_column(r, 5)?,
                    })
                },
            )
            .optional()?;
        Ok(def)
    }

    fn insert_phase_definition(&mut self, def: PhaseDefinition) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO phase_definitions(id, name, measure, point_has_sides, layers_json, checks_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    def.id.0,
                    def.name,
                    def.measure.as_str(),
                    def.point_has_sides as i64,
                    serde_json::to_string(&def.layers)?,
                    serde_json::to_string(&def.checks)?,
                ],
            )
            .with_context(|| format!("insert phase definition {}", def.id))?;
        Ok(())
    }

    fn find_phase(&self, id: &PhaseId) -> Result<Option<Phase>> {
        let phase = self
            .conn
            .query_row(
                "SELECT id, road_id, phase_definition_id, name, available_layers_json FROM phases WHERE id = ?1",
                [&id.0],
                |r| {
                    Ok(Phase {
                        id: PhaseId::from_str(r.get::<_, String>(0)?),
                        road_id: RoadId::from_str(r.get::<_, String>(1)?),
                        phase_definition_id: PhaseDefinitionId::from_str(r.get::<_, String>(2)?),
                        name: r.get(3)?,
                        available_layer_names: json_column(r, 4)?,
                    })
                },
            )
            .optional()?;
        Ok(phase)
    }

    fn insert_phase(&mut self, phase: Phase) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO phases(id, road_id, phase_definition_id, name, available_layers_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    phase.id.0,
                    phase.road_id.0,
                    phase.phase_definition_id.0,
                    phase.name,
                    serde_json::to_string(&phase.available_layer_names)?,
                ],
            )
            .with_context(|| format!("insert phase {}", phase.id))?;
        Ok(())
    }

    fn find_stored_workflow_config(&self, id: &PhaseDefinitionId) -> Result<Option<StoredTemplate>> {
        Ok(self.list_where("phase_definition_id = ?1", &[&id.0])?.into_iter().next())
    }

    fn list_stored_workflow_configs(&self) -> Result<Vec<StoredTemplate>> {
        self.list_where("1 = 1", &[])
    }

    fn save_workflow_config(&mut self, stored: StoredTemplate) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO workflow_configs(phase_definition_id, body_json, fingerprint, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(phase_definition_id) DO UPDATE SET
                   body_json = excluded.body_json,
                   fingerprint = excluded.fingerprint,
                   updated_at = excluded.updated_at",
                params![
                    stored.phase_definition_id.0,
                    stored.body_json,
                    stored.fingerprint,
                    stored.updated_at_unix
                ],
            )
            .with_context(|| format!("save workflow config for {}", stored.phase_definition_id))?;
        Ok(())
    }

    fn find_overlapping_entries(&self, phase_id: &PhaseId, range: &PositionRange) -> Result<Vec<InspectionEntry>> {
        self.query_entries(
            "phase_id = ?1 AND range_start <= ?3 + ?4 AND ?2 <= range_end + ?4",
            &[&phase_id.0, &range.start, &range.end, &EPSILON],
        )
    }

    fn find_entry_by_dedup_key(&self, key: &DedupKey) -> Result<Option<InspectionEntry>> {
        let found = self.query_entries(
            "road_id = ?1 AND phase_id = ?2 AND side = ?3 AND start_key = ?4 AND end_key = ?5
             AND layer_key = ?6 AND check_key = ?7",
            &[
                &key.road_id.0,
                &key.phase_id.0,
                &key.side.as_str(),
                &key.start_key,
                &key.end_key,
                &key.layer_key.as_str(),
                &key.check_key.as_str(),
            ],
        )?;
        Ok(found.into_iter().next())
    }

    fn insert_entry(&mut self, entry: InspectionEntry) -> Result<InspectionEntry> {
        let key = entry.dedup_key();
        self.conn
            .execute(
                "INSERT INTO entries(id, submission_id, road_id, phase_id, side, range_start, range_end, start_key,
                   end_key, layer_id, layer_name, layer_key, check_id, check_name, check_key, types_json, status,
                   appointment_date, remark, submission_order, submitted_at, submitted_by, created_by, updated_by,
                   created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20,
                   ?21, ?22, ?23, ?24, ?25, ?26)",
                params![
                    entry.id.0,
                    entry.submission_id.0,
                    entry.road_id.0,
                    entry.phase_id.0,
                    entry.side.as_str(),
                    entry.range.start,
                    entry.range.end,
                    key.start_key,
                    key.end_key,
                    entry.layer_id.as_ref().map(|l| l.0.clone()),
                    entry.layer_name,
                    key.layer_key.as_str(),
                    entry.check_id.as_ref().map(|c| c.0.clone()),
                    entry.check_name,
                    key.check_key.as_str(),
                    serde_json::to_string(&entry.types)?,
                    entry.status.as_str(),
                    entry.appointment_date,
                    entry.remark,
                    entry.submission_order,
                    entry.submitted_at_unix,
                    entry.submitted_by.0,
                    entry.created_by.0,
                    entry.updated_by.0,
                    entry.created_at_unix,
                    entry.updated_at_unix,
                ],
            )
            .with_context(|| format!("insert entry {}/{} on {}", entry.layer_name, entry.check_name, entry.range))?;
        Ok(entry)
    }

    fn update_entry(&mut self, id: &EntryId, patch: &EntryPatch) -> Result<InspectionEntry> {
        let mut entry = self.find_entry(id)?.ok_or_else(|| anyhow!("entry {id} not found"))?;
        patch.apply(&mut entry);
        self.conn
            .execute(
                "UPDATE entries SET types_json = ?2, appointment_date = ?3, remark = ?4, submission_order = ?5,
                   updated_by = ?6, updated_at = ?7
                 WHERE id = ?1",
                params![
                    entry.id.0,
                    serde_json::to_string(&entry.types)?,
                    entry.appointment_date,
                    entry.remark,
                    entry.submission_order,
                    entry.updated_by.0,
                    entry.updated_at_unix,
                ],
            )
            .with_context(|| format!("update entry {id}"))?;
        Ok(entry)
    }

    fn find_entries(&self, filter: &EntryFilter) -> Result<Vec<InspectionEntry>> {
        // Exact-match columns go to SQL; label and range predicates are
        // applied by the shared filter afterwards.
        let mut clauses = vec!["1 = 1".to_string()];
        let mut args: Vec<Box<dyn ToSql>> = vec![];
        let mut push = |column: &str, value: String| {
            args.push(Box::new(value));
            clauses.push(format!("{column} = ?{}", args.len()));
        };
        if let Some(v) = &filter.road_id {
            push("road_id", v.0.clone());
        }
        if let Some(v) = &filter.phase_id {
            push("phase_id", v.0.clone());
        }
        if let Some(v) = &filter.submission_id {
            push("submission_id", v.0.clone());
        }
        if let Some(v) = filter.side {
            push("side", v.as_str().to_string());
        }
        if let Some(v) = filter.status {
            push("status", v.as_str().to_string());
        }
        let refs: Vec<&dyn ToSql> = args.iter().map(|a| a.as_ref()).collect();
        let rows = self.query_entries(&clauses.join(" AND "), &refs)?;
        Ok(rows.into_iter().filter(|e| filter.matches(e)).collect())
    }

    fn find_submission(&self, id: &SubmissionId) -> Result<Option<Submission>> {
        let sub = self
            .conn
            .query_row(
                "SELECT id, seq, code, created_by, created_at FROM submissions WHERE id = ?1",
                [&id.0],
                |r| {
                    Ok(Submission {
                        id: SubmissionId::from_str(r.get::<_, String>(0)?),
                        seq: r.get(1)?,
                        code: r.get(2)?,
                        created_by: ActorId::from_str(r.get::<_, String>(3)?),
                        created_at_unix: r.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(sub)
    }

    fn create_submission(&mut self, created_by: &ActorId, now_unix: i64) -> Result<Submission> {
        let seq: i64 = self
            .conn
            .query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM submissions", [], |r| r.get(0))?;
        let submission = Submission {
            id: SubmissionId::new(),
            seq,
            code: submission_code(seq),
            created_by: created_by.clone(),
            created_at_unix: now_unix,
        };
        self.conn
            .execute(
                "INSERT INTO submissions(id, seq, code, created_by, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![submission.id.0, seq, submission.code, created_by.0, now_unix],
            )
            .context("create submission")?;
        Ok(submission)
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.conn.execute_batch("COMMIT").context("commit transaction")?;
        self.finished = true;
        Ok(())
    }
}

impl SqliteTx<'_> {
    fn list_where(&self, where_sql: &str, args: &[&dyn ToSql]) -> Result<Vec<StoredTemplate>> {
        let sql = format!(
            "SELECT phase_definition_id, body_json, fingerprint, updated_at FROM workflow_configs
             WHERE {where_sql} ORDER BY phase_definition_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(args, |r| {
            Ok(StoredTemplate {
                phase_definition_id: PhaseDefinitionId::from_str(r.get::<_, String>(0)?),
                body_json: r.get(1)?,
                fingerprint: r.get(2)?,
                updated_at_unix: r.get(3)?,
            })
        })?;
        let mut out = vec![];
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use tempfile::tempdir;

    fn seed(store: &SqliteStorage) -> Submission {
        let mut tx = store.begin().unwrap();
        tx.insert_road(Road {
            id: RoadId::from_str("road-1"),
            name: "G15".into(),
        })
        .unwrap();
        tx.insert_phase_definition(PhaseDefinition {
            id: PhaseDefinitionId::from_str("pd-1"),
            name: "Pier".into(),
            measure: Measure::Linear,
            point_has_sides: false,
            layers: vec!["Formwork".into()],
            checks: vec![],
        })
        .unwrap();
        tx.insert_phase(Phase {
            id: PhaseId::from_str("phase-1"),
            road_id: RoadId::from_str("road-1"),
            phase_definition_id: PhaseDefinitionId::from_str("pd-1"),
            name: "Pier K0-K1".into(),
            available_layer_names: vec!["Formwork".into(), "Rebar".into()],
        })
        .unwrap();
        let sub = tx.create_submission(&ActorId::from_str("tester"), 1).unwrap();
        tx.commit().unwrap();
        sub
    }

    fn entry(sub: &Submission, check: &str, side: Side, start: f64, end: f64) -> InspectionEntry {
        let actor = ActorId::from_str("tester");
        InspectionEntry {
            id: EntryId::new(),
            submission_id: sub.id.clone(),
            road_id: RoadId::from_str("road-1"),
            phase_id: PhaseId::from_str("phase-1"),
            side,
            range: PositionRange::normalize(start, end),
            layer_id: Some(LayerId::from_str("formwork")),
            layer_name: "Formwork".into(),
            check_id: None,
            check_name: check.into(),
            types: BTreeSet::from(["on-site inspection".to_string()]),
            status: EntryStatus::Scheduled,
            appointment_date: Some("2024-05-01".into()),
            remark: None,
            submission_order: Some(1),
            submitted_at_unix: 5,
            submitted_by: actor.clone(),
            created_by: actor.clone(),
            updated_by: actor,
            created_at_unix: 5,
            updated_at_unix: 5,
        }
    }

    #[test]
    fn sqlite_open_and_migrate() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("rqc.db");
        let _ = SqliteStorage::open(&db_path).unwrap();
        // Schema is idempotent.
        let _ = SqliteStorage::open(&db_path).unwrap();
    }

    #[test]
    fn reference_data_round_trips() {
        let dir = tempdir().unwrap();
        let store = SqliteStorage::open(&dir.path().join("rqc.db")).unwrap();
        seed(&store);

        let tx = store.begin().unwrap();
        let phase = tx.find_phase(&PhaseId::from_str("phase-1")).unwrap().unwrap();
        assert_eq!(phase.available_layer_names, vec!["Formwork", "Rebar"]);
        let def = tx.find_phase_definition(&PhaseDefinitionId::from_str("pd-1")).unwrap().unwrap();
        assert_eq!(def.measure, Measure::Linear);
        assert!(tx.find_road(&RoadId::from_str("road-9")).unwrap().is_none());
    }

    #[test]
    fn entries_are_unique_per_dedup_key_and_rollback_on_drop() {
        let dir = tempdir().unwrap();
        let store = SqliteStorage::open(&dir.path().join("rqc.db")).unwrap();
        let sub = seed(&store);

        let mut tx = store.begin().unwrap();
        let first = tx.insert_entry(entry(&sub, "Installation", Side::Left, 0.0, 50.0)).unwrap();
        assert!(tx.insert_entry(entry(&sub, " installation ", Side::Left, 0.0, 50.0)).is_err());
        tx.commit().unwrap();

        {
            let mut tx = store.begin().unwrap();
            tx.insert_entry(entry(&sub, "Installation", Side::Right, 0.0, 50.0)).unwrap();
        }

        let tx = store.begin().unwrap();
        let all = tx.find_entries(&EntryFilter::default()).unwrap();
        assert_eq!(all.len(), 1);
        let found = tx.find_entry_by_dedup_key(&first.dedup_key()).unwrap().unwrap();
        assert_eq!(found, first);
    }

    #[test]
    fn overlap_lookup_includes_touching_ranges() {
        let dir = tempdir().unwrap();
        let store = SqliteStorage::open(&dir.path().join("rqc.db")).unwrap();
        let sub = seed(&store);

        let mut tx = store.begin().unwrap();
        tx.insert_entry(entry(&sub, "Installation", Side::Left, 0.0, 50.0)).unwrap();
        tx.insert_entry(entry(&sub, "Installation", Side::Left, 60.0, 80.0)).unwrap();
        let phase = PhaseId::from_str("phase-1");
        assert_eq!(tx.find_overlapping_entries(&phase, &PositionRange::normalize(50.0, 55.0)).unwrap().len(), 1);
        assert_eq!(tx.find_overlapping_entries(&phase, &PositionRange::normalize(40.0, 70.0)).unwrap().len(), 2);
        assert!(tx.find_overlapping_entries(&phase, &PositionRange::normalize(51.0, 59.0)).unwrap().is_empty());
    }

    #[test]
    fn update_and_submission_sequence() {
        let dir = tempdir().unwrap();
        let store = SqliteStorage::open(&dir.path().join("rqc.db")).unwrap();
        let sub = seed(&store);
        assert_eq!(sub.code, "SUB-1");

        let mut tx = store.begin().unwrap();
        let e = tx.insert_entry(entry(&sub, "Installation", Side::Both, 0.0, 50.0)).unwrap();
        let patch = EntryPatch {
            types: Some(BTreeSet::from(["on-site inspection".to_string(), "lab test".to_string()])),
            appointment_date: None,
            remark: Some("second visit".into()),
            submission_order: None,
            updated_by: ActorId::from_str("other"),
            updated_at_unix: 9,
        };
        let updated = tx.update_entry(&e.id, &patch).unwrap();
        assert_eq!(updated.types.len(), 2);
        assert_eq!(updated.appointment_date.as_deref(), Some("2024-05-01"));
        assert_eq!(updated.status, EntryStatus::Scheduled);

        let next = tx.create_submission(&ActorId::from_str("tester"), 2).unwrap();
        assert_eq!(next.code, "SUB-2");
        tx.commit().unwrap();

        let tx = store.begin().unwrap();
        let filter = EntryFilter {
            layer: Some("formwork".into()),
            min_status: Some(EntryStatus::Scheduled),
            ..Default::default()
        };
        let rows = tx.find_entries(&filter).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].remark.as_deref(), Some("second visit"));
    }

    #[test]
    fn workflow_config_upserts() {
        let dir = tempdir().unwrap();
        let store = SqliteStorage::open(&dir.path().join("rqc.db")).unwrap();
        seed(&store);

        let mut tx = store.begin().unwrap();
        for (body, fp) in [("{}", "a"), ("{\"layers\":[]}", "b")] {
            tx.save_workflow_config(StoredTemplate {
                phase_definition_id: PhaseDefinitionId::from_str("pd-1"),
                body_json: body.into(),
                fingerprint: fp.into(),
                updated_at_unix: 3,
            })
            .unwrap();
        }
        tx.commit().unwrap();

        let tx = store.begin().unwrap();
        let stored = tx.find_stored_workflow_config(&PhaseDefinitionId::from_str("pd-1")).unwrap().unwrap();
        assert_eq!(stored.fingerprint, "b");
        assert_eq!(tx.list_stored_workflow_configs().unwrap().len(), 1);
    }
}
