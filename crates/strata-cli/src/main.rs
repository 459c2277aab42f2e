//! strata CLI: plan blueprints, inspect and commit them, and replay SQL
//! through a simulated front end.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use strata_core::config::StrataConfig;
use strata_core::engine::EngineBitmap;
use strata_frontend::{
    run_transition, ControlMailbox, DataSync, Epoch, FrontEnd, MemoryConnector, ReplanTriggers,
};
use strata_io::{
    build_store_from_config, load_blueprint, load_workload, BlueprintManager, BlueprintStore,
    JsonlMetricsSource, MemoryBlueprintStore,
};
use strata_planner::plan_next_blueprint;
use strata_router::{ForestModel, QueryRep, RouterFactory};
use strata_scoring::metrics::{MetricsSource, TimeSeries, SCAN_USD_PER_HOUR};
use strata_scoring::MetricsSnapshot;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Blueprint planner and query router for multi-engine deployments", long_about = None)]
struct Cli {
    /// Strata config YAML (planner, front end, storage sections)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Routing models: JSON object mapping model key to forest
    #[arg(long, global = true)]
    models: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Propose the next blueprint for a schema
    Plan {
        #[arg(short, long)]
        schema: String,

        /// Predicted workload (JSON or YAML)
        #[arg(short, long)]
        workload: PathBuf,

        /// Forecasted metrics, one JSON point per line
        #[arg(short, long)]
        metrics: PathBuf,

        /// Only points at or after this timestamp count as upcoming
        #[arg(long, default_value_t = 0)]
        anchor_ms: u64,

        /// How many upcoming points to average
        #[arg(long, default_value_t = 3)]
        upcoming: usize,

        /// Commit the result and start a transition
        #[arg(long)]
        commit: bool,
    },

    /// Check a blueprint file against the active-blueprint invariants
    Validate {
        #[arg(short, long)]
        blueprint: PathBuf,
    },

    /// Show where a blueprint would send each statement
    Route {
        #[arg(short, long)]
        blueprint: PathBuf,

        /// Statements to route
        #[arg(required = true)]
        sql: Vec<String>,
    },

    /// Inspect or change committed blueprints
    Blueprint {
        #[command(subcommand)]
        action: BlueprintAction,
    },

    /// Run a SQL script through a front end backed by in-memory engines
    Simulate {
        #[arg(short, long)]
        blueprint: PathBuf,

        /// Statements separated by `;`
        #[arg(short, long)]
        script: PathBuf,
    },

    /// Replay observed metrics through the replanning triggers
    Watch {
        #[arg(short, long)]
        schema: String,

        /// Observed metrics, one JSON point per epoch
        #[arg(short, long)]
        metrics: PathBuf,

        /// Hourly scan spend the serving blueprint was planned for
        #[arg(long)]
        expected_scan_usd: Option<f64>,
    },
}

#[derive(Subcommand)]
enum BlueprintAction {
    /// Print a committed blueprint (the serving version by default)
    Show {
        #[arg(short, long)]
        schema: String,

        #[arg(long)]
        version: Option<u64>,
    },

    /// Commit a blueprint file: version 1 for a new schema, otherwise the
    /// start of a transition
    Commit {
        #[arg(short, long)]
        blueprint: PathBuf,
    },

    /// Finish a pending transition
    Complete {
        #[arg(short, long)]
        schema: String,
    },
}

fn main() {
    let filter = EnvFilter::try_from_env("STRATA_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => StrataConfig::from_yaml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StrataConfig::from_env(),
    };
    let factory = router_factory(cli.models.as_deref())?;

    match cli.command {
        Commands::Plan {
            schema,
            workload,
            metrics,
            anchor_ms,
            upcoming,
            commit,
        } => plan(
            &config, &factory, &schema, &workload, &metrics, anchor_ms, upcoming, commit,
        ),
        Commands::Validate { blueprint } => {
            let bp = load_blueprint(&blueprint)?;
            bp.validate()
                .with_context(|| format!("{} is not a valid blueprint", blueprint.display()))?;
            factory.for_blueprint(&bp)?;
            println!("✓ Blueprint for '{}' is valid", bp.schema_name());
            Ok(())
        }
        Commands::Route { blueprint, sql } => {
            let bp = load_blueprint(&blueprint)?;
            let router = factory.for_blueprint(&bp)?;
            println!("router: {}", router.name());
            for stmt in sql {
                let query = QueryRep::new(&stmt);
                match router.engine_for(&query) {
                    Ok(engine) => println!("{:<9} {}", engine.to_string(), query.sql()),
                    Err(e) => println!("{:<9} {} ({e})", "-", query.sql()),
                }
            }
            Ok(())
        }
        Commands::Blueprint { action } => blueprint(&config, action),
        Commands::Simulate { blueprint, script } => simulate(&config, factory, &blueprint, &script),
        Commands::Watch {
            schema,
            metrics,
            expected_scan_usd,
        } => watch(&config, &schema, &metrics, expected_scan_usd),
    }
}

fn router_factory(models: Option<&Path>) -> Result<RouterFactory> {
    let mut factory = RouterFactory::default();
    if let Some(path) = models {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading models {}", path.display()))?;
        let parsed: BTreeMap<String, ForestModel> = serde_json::from_str(&text)
            .with_context(|| format!("parsing models {}", path.display()))?;
        for (key, model) in parsed {
            factory = factory.with_model(key, model);
        }
    }
    Ok(factory)
}

#[allow(clippy::too_many_arguments)]
fn plan(
    config: &StrataConfig,
    factory: &RouterFactory,
    schema: &str,
    workload_path: &Path,
    metrics_path: &Path,
    anchor_ms: u64,
    upcoming: usize,
    commit: bool,
) -> Result<()> {
    let store = build_store_from_config(&config.storage);
    let mut manager = BlueprintManager::load(store, schema)?;

    let mut workload = load_workload(workload_path)?;
    workload.fill_missing_tables(|sql| QueryRep::new(sql).tables().to_vec());

    let source = JsonlMetricsSource::open(metrics_path)?.with_anchor(anchor_ms);
    let snapshot = MetricsSnapshot::from_source(&source, upcoming)?;

    let outcome = plan_next_blueprint(
        manager.get_blueprint(),
        workload,
        snapshot,
        config.planner.clone(),
        factory,
    )?;
    println!("{}", outcome.score.to_json_pretty()?);
    println!("manifest: {}", serde_json::to_string(&outcome.manifest)?);

    if commit {
        let version = manager.start_transition(outcome.blueprint)?;
        println!("✓ Committed version {version}; transition pending");
    }
    Ok(())
}

/// Stands in for the ETL pipeline: reports each move without copying data.
struct LoggingSync;

#[async_trait]
impl DataSync for LoggingSync {
    async fn apply_placement_diff(
        &self,
        table: &str,
        old: EngineBitmap,
        new: EngineBitmap,
    ) -> std::result::Result<(), String> {
        println!("  {table}: {old} -> {new}");
        Ok(())
    }
}

fn blueprint(config: &StrataConfig, action: BlueprintAction) -> Result<()> {
    let store = build_store_from_config(&config.storage);
    match action {
        BlueprintAction::Show { schema, version } => {
            let bp = match version {
                Some(v) => store.read_version(&schema, v)?,
                None => {
                    let manager = BlueprintManager::load(store, &schema)?;
                    let md = manager.metadata();
                    println!(
                        "# active v{} next {:?} ({:?})",
                        md.active_version, md.next_version, md.transition_state
                    );
                    let bp = manager
                        .get_next_blueprint()
                        .unwrap_or_else(|| manager.get_blueprint());
                    bp.as_ref().clone()
                }
            };
            println!("{}", serde_json::to_string_pretty(&bp)?);
            Ok(())
        }
        BlueprintAction::Commit { blueprint } => {
            let bp = load_blueprint(&blueprint)?;
            let schema = bp.schema_name().to_string();
            if store.read_metadata(&schema)?.is_none() {
                let manager = BlueprintManager::bootstrap(store, bp)?;
                println!("✓ Bootstrapped '{schema}' at version {}", manager.get_version());
            } else {
                let mut manager = BlueprintManager::load(store, &schema)?;
                let version = manager.start_transition(bp)?;
                println!("✓ Committed version {version}; transition pending");
            }
            Ok(())
        }
        BlueprintAction::Complete { schema } => {
            let mut manager = BlueprintManager::load(store, &schema)?;
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let version = rt.block_on(run_transition(&mut manager, &LoggingSync))?;
            println!("✓ Version {version} is active");
            Ok(())
        }
    }
}

fn simulate(
    config: &StrataConfig,
    factory: RouterFactory,
    blueprint_path: &Path,
    script_path: &Path,
) -> Result<()> {
    let bp = load_blueprint(blueprint_path)?;
    let script = fs::read_to_string(script_path)
        .with_context(|| format!("reading script {}", script_path.display()))?;
    let statements: Vec<&str> = script
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if statements.is_empty() {
        bail!("{} contains no statements", script_path.display());
    }

    let store: Arc<dyn BlueprintStore> = Arc::new(MemoryBlueprintStore::new());
    let manager = BlueprintManager::bootstrap(store, bp)?;
    let connector = MemoryConnector::new();
    let front_end = FrontEnd::builder(
        config.front_end.clone(),
        manager,
        factory,
        Arc::new(connector.clone()),
    )
    .build()?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(async {
        let session = front_end.start_session().await?;
        for stmt in statements {
            let before = connector.executed().len();
            match front_end.run_query(session, stmt).await {
                Ok(rows) => {
                    let executed = connector.executed();
                    match executed.get(before) {
                        Some(e) => println!(
                            "{:<9} {:<10} {stmt}",
                            e.engine.to_string(),
                            e.role.to_string()
                        ),
                        None => {
                            println!("{:<9} {:<10} {stmt}", "strata", "internal");
                            for row in rows {
                                println!("    {}", row.join(" | "));
                            }
                        }
                    }
                }
                Err(e) => println!("{:<9} {:<10} {stmt} ({e})", "error", "-"),
            }
        }
        front_end.end_session(session)?;
        anyhow::Ok(())
    })?;

    let report = front_end.metrics_report();
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn watch(
    config: &StrataConfig,
    schema: &str,
    metrics_path: &Path,
    expected_scan_usd: Option<f64>,
) -> Result<()> {
    let mut triggers = ReplanTriggers::from_config(&config.planner.triggers);
    if triggers.is_empty() {
        println!("no replanning triggers are enabled");
        return Ok(());
    }
    let store = build_store_from_config(&config.storage);
    let manager = BlueprintManager::load(store, schema)
        .with_context(|| format!("loading blueprint for '{schema}'"))?;
    let series = JsonlMetricsSource::open(metrics_path)?.read_between_times(0, u64::MAX)?;
    let Some(first) = series.points.first() else {
        bail!("{} contains no metrics", metrics_path.display());
    };

    println!("triggers: {}", triggers.names().join(", "));
    triggers.update_blueprint(&manager.get_blueprint(), expected_scan_usd, first.timestamp_ms);

    let (mailbox, mut requests) = ControlMailbox::new();
    let mut replans = 0usize;
    for point in &series.points {
        let epoch = Epoch {
            at_ms: point.timestamp_ms,
            metrics: MetricsSnapshot::from_series(&TimeSeries {
                points: vec![point.clone()],
            }),
            scan_usd_per_hour: point.values.get(SCAN_USD_PER_HOUR).copied(),
        };
        if let Some(name) = triggers.check_and_notify(&epoch, &mailbox) {
            println!("{:>15}  replan ({name})", epoch.at_ms);
        }
        // Stand in for the control plane taking the request.
        if requests.try_recv().is_ok() {
            replans += 1;
        }
    }
    println!("{replans} replan request(s) over {} epoch(s)", series.points.len());
    Ok(())
}
