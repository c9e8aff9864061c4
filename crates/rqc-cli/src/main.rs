use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rqc_core::{
    ActorId, EntryFilter, EntrySort, EntryStatus, InspectionError, ListQuery, Measure, Phase, PhaseDefinition,
    PhaseDefinitionId, PhaseId, PositionRange, ProposedEntry, Road, RoadId, Side, SubmissionId,
};
use rqc_engine::Engine;
use rqc_template::load_template_doc;

#[derive(Parser)]
#[command(name = "rqc", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize rqc in the current directory (creates .rqc/, config, db)
    Init,

    /// Check the store and every stored and registered template
    Doctor,

    /// Register a road
    RoadAdd {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        name: String,
    },

    /// Register a phase definition (the template key)
    PhaseDefAdd {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        name: String,
        /// LINEAR or POINT
        #[arg(long, default_value = "LINEAR")]
        measure: String,
        #[arg(long)]
        point_has_sides: bool,
        /// Layer names, in workflow order (used when no template exists)
        #[arg(long = "layer")]
        layers: Vec<String>,
        #[arg(long = "check")]
        checks: Vec<String>,
    },

    /// Register a phase on a road
    PhaseAdd {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        road: String,
        #[arg(long)]
        definition: String,
        #[arg(long)]
        name: String,
        /// Restricts the template's layers this phase exposes
        #[arg(long = "available-layer")]
        available_layers: Vec<String>,
    },

    /// Store a YAML workflow template for a phase definition
    TemplateImport {
        #[arg(long)]
        definition: String,
        #[arg(long)]
        file: PathBuf,
    },

    /// Print the resolved template for a phase definition
    TemplateShow {
        #[arg(long)]
        definition: String,
    },

    /// Submit a JSON array of proposed entries
    Submit {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        actor: String,
    },

    /// List inspection entries
    List {
        #[arg(long)]
        road: Option<String>,
        #[arg(long)]
        phase: Option<String>,
        #[arg(long)]
        submission: Option<String>,
        #[arg(long)]
        side: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        min_status: Option<String>,
        #[arg(long)]
        layer: Option<String>,
        #[arg(long, num_args = 2, value_names = ["START", "END"])]
        range: Option<Vec<f64>>,
        /// range_start, submitted_at or status
        #[arg(long, default_value = "range_start")]
        sort: String,
        #[arg(long)]
        desc: bool,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        page_size: Option<u32>,
    },
}

fn parse_side(s: &str) -> anyhow::Result<Side> {
    Side::parse(s).ok_or_else(|| anyhow!("unknown side {s:?}; expected LEFT, RIGHT or BOTH"))
}

fn parse_status(s: &str) -> anyhow::Result<EntryStatus> {
    EntryStatus::parse(s).ok_or_else(|| anyhow!("unknown status {s:?}"))
}

fn parse_sort(s: &str) -> anyhow::Result<EntrySort> {
    match s {
        "range_start" => Ok(EntrySort::RangeStart),
        "submitted_at" => Ok(EntrySort::SubmittedAt),
        "status" => Ok(EntrySort::Status),
        other => bail!("unknown sort {other:?}"),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prints workflow details one per line before failing.
fn report(err: InspectionError) -> anyhow::Error {
    for detail in err.details() {
        eprintln!("  - {detail}");
    }
    anyhow::Error::new(err)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let repo_root = std::env::current_dir()?;
    tracing::debug!(root = %repo_root.display(), "rqc");

    match cli.cmd {
        Command::Init => {
            Engine::init_repo(&repo_root)?;
            println!("Initialized rqc in {}", repo_root.display());
        }
        Command::Doctor => {
            let engine = Engine::open(repo_root)?;
            let report = engine.doctor()?;
            print_json(&report)?;
            if !report.is_healthy() {
                bail!("{} problem(s) found", report.problems.len());
            }
        }
        Command::RoadAdd { id, name } => {
            let engine = Engine::open(repo_root)?;
            let road = engine
                .add_road(Road {
                    id: id.map(RoadId::from_str).unwrap_or_default(),
                    name,
                })
                .map_err(report)?;
            print_json(&road)?;
        }
        Command::PhaseDefAdd {
            id,
            name,
            measure,
            point_has_sides,
            layers,
            checks,
        } => {
            let engine = Engine::open(repo_root)?;
            let measure = Measure::parse(&measure).ok_or_else(|| anyhow!("unknown measure {measure:?}"))?;
            let def = engine
                .add_phase_definition(PhaseDefinition {
                    id: id.map(PhaseDefinitionId::from_str).unwrap_or_default(),
                    name,
                    measure,
                    point_has_sides,
                    layers,
                    checks,
                })
                .map_err(report)?;
            print_json(&def)?;
        }
        Command::PhaseAdd {
            id,
            road,
            definition,
            name,
            available_layers,
        } => {
            let engine = Engine::open(repo_root)?;
            let phase = engine
                .add_phase(Phase {
                    id: id.map(PhaseId::from_str).unwrap_or_default(),
                    road_id: RoadId::from_str(road),
                    phase_definition_id: PhaseDefinitionId::from_str(definition),
                    name,
                    available_layer_names: available_layers,
                })
                .map_err(report)?;
            print_json(&phase)?;
        }
        Command::TemplateImport { definition, file } => {
            let engine = Engine::open(repo_root)?;
            let doc = load_template_doc(&file)?;
            let template = engine
                .save_template(&PhaseDefinitionId::from_str(definition), &doc)
                .map_err(report)?;
            println!(
                "Stored template {} ({} layers, {} checks)",
                template.fingerprint,
                template.layers().len(),
                template.check_count()
            );
        }
        Command::TemplateShow { definition } => {
            let engine = Engine::open(repo_root)?;
            let template = engine
                .load_template(&PhaseDefinitionId::from_str(definition))
                .map_err(report)?;
            print_json(template.as_ref())?;
        }
        Command::Submit { file, actor } => {
            let engine = Engine::open(repo_root)?;
            let raw = std::fs::read_to_string(&file).with_context(|| format!("read {}", file.display()))?;
            let proposed: Vec<ProposedEntry> =
                serde_json::from_str(&raw).with_context(|| format!("parse {}", file.display()))?;
            let result = engine
                .submit_inspection_entries(&proposed, &ActorId::from_str(actor))
                .map_err(report)?;
            print_json(&result)?;
        }
        Command::List {
            road,
            phase,
            submission,
            side,
            status,
            min_status,
            layer,
            range,
            sort,
            desc,
            page,
            page_size,
        } => {
            let engine = Engine::open(repo_root)?;
            let filter = EntryFilter {
                road_id: road.map(RoadId::from_str),
                phase_id: phase.map(PhaseId::from_str),
                submission_id: submission.map(SubmissionId::from_str),
                side: side.as_deref().map(parse_side).transpose()?,
                status: status.as_deref().map(parse_status).transpose()?,
                min_status: min_status.as_deref().map(parse_status).transpose()?,
                layer,
                range: range.map(|r| PositionRange::normalize(r[0], r[1])),
            };
            let query = ListQuery {
                filter,
                sort: parse_sort(&sort)?,
                descending: desc,
                page,
                page_size,
            };
            let listing = engine.list_inspection_entries(&query).map_err(report)?;
            print_json(&listing)?;
        }
    }

    Ok(())
}
