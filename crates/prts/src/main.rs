use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use prts_core::config::load_config;
use prts_core::mediawiki::{MediaWikiClient, MediaWikiClientConfig};
use prts_core::name_index::{IndexStatus, JsonFileStore};
use prts_core::query::{
    EnemyReport, OperatorReport, QueryEngine, QueryOutcome, StageEnemyReport, StageReport,
};
use prts_core::recruit::{RecruitMatch, RecruitReport};
use prts_core::roster::StageEnemyRow;
use prts_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, init_layout,
    normalize_for_display, resolve_paths,
};
use prts_core::schema::{EntityRecord, ROSTER_LABELS};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

type Engine = QueryEngine<MediaWikiClient, JsonFileStore>;

#[derive(Debug, Parser)]
#[command(
    name = "prts",
    version,
    about = "Look up enemies, stages, operators and items on the PRTS wiki"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(long, global = true, help = "Print results as JSON")]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
    json: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
            json: cli.json,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init(InitArgs),
    #[command(about = "Enemy name, stage code, or `<stage> <enemy>` in either order")]
    Query(QueryArgs),
    Enemy(NameArgs),
    Stage(NameArgs),
    Operator(OperatorArgs),
    Item(NameArgs),
    #[command(about = "Public recruitment tags, comma separated")]
    Recruit(RecruitArgs),
    Index(IndexArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct QueryArgs {
    #[arg(required = true, num_args = 1..)]
    text: Vec<String>,
}

#[derive(Debug, Args)]
struct NameArgs {
    name: String,
}

#[derive(Debug, Args)]
struct OperatorArgs {
    name: String,
    #[arg(long, help = "Portrait variant, e.g. 1, 2 or 时装1 (default 2)")]
    skin: Option<String>,
}

#[derive(Debug, Args)]
struct RecruitArgs {
    #[arg(required = true, num_args = 1..)]
    tags: Vec<String>,
}

#[derive(Debug, Args)]
struct IndexArgs {
    #[command(subcommand)]
    command: IndexSubcommand,
}

#[derive(Debug, Subcommand)]
enum IndexSubcommand {
    Refresh,
    Status,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Query(QueryArgs { text })) => run_query(&runtime, &text.join(" ")),
        Some(Commands::Enemy(NameArgs { name })) => {
            let engine = build_engine(&runtime)?;
            emit(&runtime, &engine.lookup_entity(&name)?, print_enemy)
        }
        Some(Commands::Stage(NameArgs { name })) => {
            let engine = build_engine(&runtime)?;
            emit(&runtime, &engine.lookup_roster(&name)?, print_stage)
        }
        Some(Commands::Operator(OperatorArgs { name, skin })) => {
            let engine = build_engine(&runtime)?;
            let report = engine.lookup_operator(&name, skin.as_deref())?;
            emit(&runtime, &report, print_operator)
        }
        Some(Commands::Item(NameArgs { name })) => {
            let engine = build_engine(&runtime)?;
            emit(&runtime, &engine.lookup_item(&name)?, print_record)
        }
        Some(Commands::Recruit(RecruitArgs { tags })) => {
            let engine = build_engine(&runtime)?;
            emit(&runtime, &engine.recruit(&tags.join(","))?, print_recruit)
        }
        Some(Commands::Index(IndexArgs { command })) => {
            let engine = build_engine(&runtime)?;
            match command {
                IndexSubcommand::Refresh => {
                    let report = engine.refresh_index()?;
                    emit(&runtime, &report, |report| {
                        println!("index refresh");
                        println!("names: {}", report.names);
                        println!("skipped: {}", report.skipped);
                        println!("refreshed_at: {}", report.refreshed_at);
                    })
                }
                IndexSubcommand::Status => emit(&runtime, &engine.index_status(), print_status),
            }
        }
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("PRTS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, &InitOptions { force: args.force })?;

    println!("Initialized prts runtime layout");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("state_dir: {}", normalize_for_display(&paths.state_dir));
    println!("data_dir: {}", normalize_for_display(&paths.data_dir));
    println!("index_path: {}", normalize_for_display(&paths.index_path));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_query(runtime: &RuntimeOptions, text: &str) -> Result<()> {
    let engine = build_engine(runtime)?;
    let outcome = engine.query_text(text)?;
    emit(runtime, &outcome, |outcome| match outcome {
        QueryOutcome::Enemy(report) => print_enemy(report),
        QueryOutcome::Stage(report) => print_stage(report),
        QueryOutcome::EnemyInStage(report) => print_enemy_in_stage(report),
    })
}

fn build_engine(runtime: &RuntimeOptions) -> Result<Engine> {
    let paths = resolve_runtime_paths(runtime)?;
    let settings = load_config(&paths.config_path)?.settings();
    if runtime.diagnostics {
        eprintln!("[diagnostics]\n{}\napi_url={}", paths.diagnostics(), settings.api_url);
    }
    let client = MediaWikiClient::new(MediaWikiClientConfig::from_settings(&settings))?;
    debug!(index = %normalize_for_display(&paths.index_path), "opening name index");
    let store = JsonFileStore::new(&paths.index_path);
    Ok(QueryEngine::new(client, store, &settings))
}

fn emit<T: Serialize>(runtime: &RuntimeOptions, value: &T, print: impl FnOnce(&T)) -> Result<()> {
    if runtime.json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print(value);
    }
    Ok(())
}

fn print_record(record: &EntityRecord) {
    println!("{}: {}", record.kind.as_str(), record.title);
    for (label, value) in record.present_fields() {
        if !value.is_empty() {
            println!("{label}: {value}");
        }
    }
    if record.skipped > 0 {
        println!("skipped_fragments: {}", record.skipped);
    }
}

fn print_enemy(report: &EnemyReport) {
    if let Some(url) = &report.avatar_url {
        println!("image: {url}");
    }
    print_record(&report.record);
}

fn print_stage(report: &StageReport) {
    if let Some(url) = &report.map_preview_url {
        println!("map_preview: {url}");
    }
    println!("stage: {}", report.record.title);
    println!("roster.count: {}", report.roster.len());
    for row in &report.roster {
        print_row(row);
    }
}

fn print_enemy_in_stage(report: &StageEnemyReport) {
    if let Some(url) = &report.map_preview_url {
        println!("map_preview: {url}");
    }
    println!("stage: {}", report.stage);
    print_row(&report.row);
}

fn print_row(row: &StageEnemyRow) {
    println!("{}", "-".repeat(10));
    println!("enemy: {}", row.name);
    for cell in row.labeled(&ROSTER_LABELS) {
        println!("  {cell}");
    }
}

fn print_operator(report: &OperatorReport) {
    if let Some(url) = &report.portrait_url {
        println!("image: {url}");
    }
    print_record(&report.record);
}

fn print_recruit(report: &RecruitReport) {
    println!("tags: {}", report.tags.join(", "));
    if report.full.is_empty() {
        println!("full_matches: <none>");
    } else {
        println!("full_matches: {}", report.full.len());
        report.full.iter().for_each(print_recruit_match);
    }
    for group in &report.partial {
        println!("\ntag '{}': {}", group.tag, group.operators.len());
        group.operators.iter().for_each(print_recruit_match);
    }
}

fn print_recruit_match(entry: &RecruitMatch) {
    println!("{}", "-".repeat(10));
    println!("operator: {}", entry.name);
    println!("rarity: {}", entry.stars.as_deref().unwrap_or("?"));
    println!("profession: {}", entry.profession);
    println!("position: {}", entry.position);
    println!("tags: {}", entry.tags);
}

fn print_status(status: &IndexStatus) {
    println!("index status");
    println!("names: {}", status.names);
    println!(
        "refreshed_at: {}",
        status
            .refreshed_at
            .map(|value| value.to_string())
            .unwrap_or_else(|| "never".to_string())
    );
    println!("fresh: {}", format_flag(status.fresh));
    println!("ttl_seconds: {}", status.ttl_seconds);
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
