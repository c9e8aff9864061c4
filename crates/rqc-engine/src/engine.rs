use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use rqc_core::{InspectionError, InspectionResult, Phase, PhaseDefinition, PhaseDefinitionId, Road};
use rqc_storage::Storage;
use rqc_storage_sqlite::SqliteStorage;
use rqc_template::{TemplateRegistry, WorkflowTemplate};
use rqc_validate::WorkflowValidator;

use crate::Config;

/// Entry point for submissions, listings and template authoring.
pub struct Engine {
    pub(crate) storage: Box<dyn Storage>,
    pub(crate) cfg: Config,
    pub(crate) registry: TemplateRegistry,
    pub(crate) validator: WorkflowValidator,
    pub(crate) templates: Mutex<HashMap<PhaseDefinitionId, Arc<WorkflowTemplate>>>,
}

impl Engine {
    pub fn new(storage: Box<dyn Storage>, cfg: Config, registry: TemplateRegistry) -> Self {
        Self {
            storage,
            cfg,
            registry,
            validator: WorkflowValidator::new(),
            templates: Mutex::new(HashMap::new()),
        }
    }

    /// Opens the repo's SQLite store, writing a default config first if none exists.
    pub fn open(repo_root: PathBuf) -> Result<Self> {
        let cfg_path = Config::config_path(&repo_root);
        let cfg = if cfg_path.exists() {
            Config::load_from(&cfg_path)?
        } else {
            let cfg = Config::default_for_repo();
            cfg.save_to(&cfg_path)?;
            cfg
        };

        let storage = SqliteStorage::open(&cfg.db_path(&repo_root))?;
        let mut registry = TemplateRegistry::builtin()?;
        if let Some(dir) = cfg.templates_dir(&repo_root) {
            let n = registry
                .load_dir(&dir)
                .with_context(|| format!("load templates from {}", dir.display()))?;
            tracing::info!(dir = %dir.display(), templates = n, "loaded extra templates");
        }
        Ok(Self::new(Box::new(storage), cfg, registry))
    }

    pub fn init_repo(repo_root: &Path) -> Result<()> {
        let cfg_path = Config::config_path(repo_root);
        let cfg = if cfg_path.exists() {
            Config::load_from(&cfg_path)?
        } else {
            let cfg = Config::default_for_repo();
            cfg.save_to(&cfg_path)?;
            cfg
        };
        // create db
        let _ = SqliteStorage::open(&cfg.db_path(repo_root))?;
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    pub fn add_road(&self, road: Road) -> InspectionResult<Road> {
        if road.name.trim().is_empty() {
            return Err(InspectionError::input("road name is required"));
        }
        let mut tx = self.storage.begin()?;
        if tx.find_road(&road.id)?.is_some() {
            return Err(InspectionError::input(format!("road {} already exists", road.id)));
        }
        tx.insert_road(road.clone())?;
        tx.commit()?;
        tracing::info!(road_id = %road.id, "road added");
        Ok(road)
    }

    pub fn add_phase_definition(&self, def: PhaseDefinition) -> InspectionResult<PhaseDefinition> {
        if def.name.trim().is_empty() {
            return Err(InspectionError::input("phase definition name is required"));
        }
        let mut tx = self.storage.begin()?;
        if tx.find_phase_definition(&def.id)?.is_some() {
            return Err(InspectionError::input(format!("phase definition {} already exists", def.id)));
        }
        tx.insert_phase_definition(def.clone())?;
        tx.commit()?;
        tracing::info!(phase_definition_id = %def.id, name = %def.name, "phase definition added");
        Ok(def)
    }

    pub fn add_phase(&self, phase: Phase) -> InspectionResult<Phase> {
        let mut tx = self.storage.begin()?;
        if tx.find_road(&phase.road_id)?.is_none() {
            return Err(InspectionError::input(format!("unknown road: {}", phase.road_id)));
        }
        if tx.find_phase_definition(&phase.phase_definition_id)?.is_none() {
            return Err(InspectionError::input(format!(
                "unknown phase definition: {}",
                phase.phase_definition_id
            )));
        }
        if tx.find_phase(&phase.id)?.is_some() {
            return Err(InspectionError::input(format!("phase {} already exists", phase.id)));
        }
        tx.insert_phase(phase.clone())?;
        tx.commit()?;
        tracing::info!(phase_id = %phase.id, road_id = %phase.road_id, "phase added");
        Ok(phase)
    }
}
