//! passgate command-line tool.
//!
//! Provides subcommands for generating and validating configuration files,
//! hashing and checking content against the configured rules, tracking a
//! single pass between two files, and inspecting the recorded pass log and
//! snapshots.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use passgate_core::config::{AppConfig, StoreBackend};
use passgate_core::db::Database;
use passgate_core::models::{ContentSnapshot, Severity};
use passgate_core::rules::PatternRuleSet;
use passgate_core::snapshot::{self, MemorySnapshotStore, SnapshotStore, SqliteSnapshotStore};
use passgate_core::tracker::PassTracker;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// passgate command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "passgate",
    version,
    about = "Track content passes against quality rules and revert regressions"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "./passgate.toml")]
    config: PathBuf,

    /// Override the configured log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./passgate.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file and compile its rules.
    Validate,

    /// Print the content hash of a file.
    Hash {
        /// File to hash.
        file: PathBuf,
    },

    /// List the rule violations in a file.
    Check {
        /// File to check.
        file: PathBuf,
    },

    /// Track one pass: `--before` is the input, `--after` the pass output.
    Track {
        /// Pass number within the job.
        #[arg(short, long)]
        pass: u32,

        /// Content before the pass.
        #[arg(long)]
        before: PathBuf,

        /// Content produced by the pass.
        #[arg(long)]
        after: PathBuf,

        /// Job identifier (defaults to `tracker.job_id`).
        #[arg(long)]
        job: Option<String>,

        /// Keep the pass output even when the delta calls for a revert.
        #[arg(long)]
        no_auto_revert: bool,

        /// Write the resulting content (after any revert) to this file.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the most recent recorded pass outcomes, oldest first.
    History {
        /// Job identifier; all jobs when omitted.
        #[arg(long)]
        job: Option<String>,

        /// Number of most recent entries to show.
        #[arg(short, long, default_value = "50")]
        limit: u32,
    },

    /// Show the stored before/after snapshots of a pass.
    Snapshots {
        /// Pass number within the job.
        #[arg(short, long)]
        pass: u32,

        /// Job identifier (defaults to `tracker.job_id`).
        #[arg(long)]
        job: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = cli
        .log_level
        .clone()
        .or_else(|| {
            AppConfig::load_from_file(&cli.config)
                .ok()
                .map(|c| c.general.log_level)
        })
        .unwrap_or_else(|| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&level))
        .with_target(false)
        .without_time()
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&config_path),
        Commands::Hash { file } => cmd_hash(&file),
        Commands::Check { file } => cmd_check(&load_config(&config_path)?, &file),
        Commands::Track {
            pass,
            before,
            after,
            job,
            no_auto_revert,
            output,
            json,
        } => {
            let opts = TrackOptions {
                pass,
                before,
                after,
                job,
                auto_revert: !no_auto_revert,
                output,
                json,
            };
            cmd_track(&load_config(&config_path)?, opts).await
        }
        Commands::History { job, limit } => {
            cmd_history(&load_config(&config_path)?, job.as_deref(), limit)
        }
        Commands::Snapshots { pass, job } => {
            cmd_snapshots(&load_config(&config_path)?, job, pass)
        }
    }
}

// ---------------------------------------------------------------------------
// Config & store helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_and_validate(path).context("failed to load configuration file")
}

fn open_database(config: &AppConfig) -> Result<Arc<Database>> {
    let db_path = config.database_path();
    let db = Database::open_initialized(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    Ok(Arc::new(db))
}

/// Build the configured snapshot store. The database handle is returned
/// alongside when the backend is durable so the pass log can be written.
fn open_store(config: &AppConfig) -> Result<(Arc<dyn SnapshotStore>, Option<Arc<Database>>)> {
    match config.store.backend {
        StoreBackend::Memory => {
            let store: Arc<dyn SnapshotStore> = Arc::new(MemorySnapshotStore::new());
            Ok((store, None))
        }
        StoreBackend::Sqlite => {
            let db = open_database(config)?;
            let store: Arc<dyn SnapshotStore> = Arc::new(SqliteSnapshotStore::new(db.clone()));
            Ok((store, Some(db)))
        }
    }
}

fn require_sqlite(config: &AppConfig, what: &str) -> Result<()> {
    if config.store.backend != StoreBackend::Sqlite {
        anyhow::bail!(
            "{} requires the sqlite store backend; the memory backend keeps nothing between runs",
            what
        );
    }
    Ok(())
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"# passgate configuration

[general]
log_level = "info"
data_dir = ".passgate"

[tracker]
job_id = "default"
auto_revert = true

[store]
backend = "sqlite"
# database_path = ".passgate/passgate.db"

# Every match of `pattern` is one violation. Severity is one of
# info, warning, error; a pass that newly breaks an error rule is reverted.
[[rules]]
id = "todo-marker"
pattern = '\bTODO\b'
severity = "error"
message = "unresolved TODO marker"

[[rules]]
id = "filler-word"
pattern = '\b(very|really|basically)\b'
severity = "warning"
case_insensitive = true

[[rules]]
id = "double-space"
pattern = '[^ ]  +[^ ]'
severity = "info"
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the [[rules]] entries for your content");
    println!(
        "  2. Validate with: passgate validate --config {}",
        output.display()
    );
    println!(
        "  3. Track a pass: passgate track --config {} --pass 1 --before in.txt --after out.txt",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let config = AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    match PatternRuleSet::from_config(&config.rules) {
        Ok(rules) => println!("  [OK] {} rule pattern(s) compile", rules.len()),
        Err(e) => {
            println!("  [FAIL] Rule error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Job id        : {}", config.tracker.job_id);
    println!(
        "  Auto-revert   : {}",
        if config.tracker.auto_revert { "on" } else { "off" }
    );
    println!(
        "  Store backend : {}",
        match config.store.backend {
            StoreBackend::Memory => "memory",
            StoreBackend::Sqlite => "sqlite",
        }
    );
    if config.store.backend == StoreBackend::Sqlite {
        println!("  Database      : {}", config.database_path().display());
    }
    println!("  Log level     : {}", config.general.log_level);
    println!();
    println!("Configuration is valid.");

    Ok(())
}

fn cmd_hash(file: &Path) -> Result<()> {
    let content = read_file(file)?;
    println!("{}  {}", snapshot::hash(&content), file.display());
    Ok(())
}

fn cmd_check(config: &AppConfig, file: &Path) -> Result<()> {
    let rules = PatternRuleSet::from_config(&config.rules).context("failed to compile rules")?;
    let content = read_file(file)?;
    let violations = rules.scan(&content);

    if violations.is_empty() {
        println!("No violations found.");
        return Ok(());
    }

    println!("{:<24} {:<9} {:<8} MESSAGE", "RULE", "SEVERITY", "OFFSET");
    println!("{}", "-".repeat(80));
    for v in &violations {
        println!(
            "{:<24} {:<9} {:<8} {}",
            truncate(&v.rule_id, 24),
            v.severity.to_string(),
            v.offset.map(|o| o.to_string()).unwrap_or_else(|| "-".into()),
            truncate(v.message.as_deref().unwrap_or(""), 36),
        );
    }

    let statuses = snapshot::build_status_map(&violations);
    let critical = statuses
        .values()
        .filter(|s| s.severity == Severity::Error)
        .count();

    println!();
    println!(
        "{} violation(s) across {} rule(s), {} critical",
        violations.len(),
        statuses.len(),
        critical
    );

    if critical > 0 {
        anyhow::bail!("{} critical rule(s) failing in {}", critical, file.display());
    }
    Ok(())
}

struct TrackOptions {
    pass: u32,
    before: PathBuf,
    after: PathBuf,
    job: Option<String>,
    auto_revert: bool,
    output: Option<PathBuf>,
    json: bool,
}

async fn cmd_track(config: &AppConfig, opts: TrackOptions) -> Result<()> {
    let rules = PatternRuleSet::from_config(&config.rules).context("failed to compile rules")?;
    let (store, db) = open_store(config)?;
    let job_id = opts.job.unwrap_or_else(|| config.tracker.job_id.clone());

    let tracker = PassTracker::new(job_id.clone(), rules, store)
        .with_auto_revert(opts.auto_revert && config.tracker.auto_revert);

    let content_before = read_file(&opts.before)?;
    let after_path = opts.after.clone();
    let result = tracker
        .track_pass(opts.pass, &content_before, || async move {
            tokio::fs::read_to_string(&after_path)
                .await
                .with_context(|| format!("failed to read {}", after_path.display()))
        })
        .await
        .context("pass tracking failed")?;

    if let Some(db) = &db {
        db.insert_pass_log(&job_id, &result)
            .context("failed to record pass outcome")?;
    }

    if let Some(output) = &opts.output {
        std::fs::write(output, &result.content)
            .with_context(|| format!("failed to write {}", output.display()))?;
        info!(path = %output.display(), "wrote pass result");
    }

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let delta = &result.delta;
    println!("Pass {} of job '{}'", delta.pass_number, job_id);
    println!("  Fixed      : {}", join_or_dash(&delta.rules_fixed));
    println!("  Regressed  : {}", join_or_dash(&delta.rules_regressed));
    println!("  Unchanged  : {}", join_or_dash(&delta.rules_unchanged));
    println!("  Net change : {:+}", delta.net_change);
    println!("  Recommend  : {}", delta.recommendation);
    if result.was_reverted {
        println!("  Outcome    : REVERTED");
        println!(
            "  Reason     : {}",
            result.revert_reason.as_deref().unwrap_or("-")
        );
    } else {
        println!("  Outcome    : accepted");
    }

    Ok(())
}

fn cmd_history(config: &AppConfig, job: Option<&str>, limit: u32) -> Result<()> {
    require_sqlite(config, "history")?;
    let db = open_database(config)?;
    let entries = db
        .list_pass_log(job, limit)
        .context("failed to list pass log")?;

    if entries.is_empty() {
        println!("No passes recorded.");
        return Ok(());
    }

    println!(
        "{:<20} {:<20} {:<6} {:<6} {:<6} {:<9} REASON",
        "RECORDED", "JOB", "PASS", "NET", "FIXED", "OUTCOME"
    );
    println!("{}", "-".repeat(100));

    for entry in &entries {
        println!(
            "{:<20} {:<20} {:<6} {:<6} {:<6} {:<9} {}",
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            truncate(&entry.job_id, 20),
            entry.delta.pass_number,
            format!("{:+}", entry.delta.net_change),
            entry.delta.rules_fixed.len(),
            if entry.was_reverted { "reverted" } else { "accepted" },
            truncate(entry.revert_reason.as_deref().unwrap_or(""), 40),
        );
    }

    println!();
    println!("{} most recent entries shown (oldest first)", entries.len());

    Ok(())
}

fn cmd_snapshots(config: &AppConfig, job: Option<String>, pass: u32) -> Result<()> {
    require_sqlite(config, "snapshots")?;
    let job_id = job.unwrap_or_else(|| config.tracker.job_id.clone());
    let store = SqliteSnapshotStore::new(open_database(config)?);
    let pair = store
        .get_pair(&job_id, pass)
        .context("failed to read snapshots")?;

    if pair.before.is_none() && pair.after.is_none() {
        println!("No snapshots for job '{}' pass {}.", job_id, pass);
        return Ok(());
    }

    for (label, snap) in [("Before", &pair.before), ("After", &pair.after)] {
        match snap {
            Some(snap) => print_snapshot(label, snap),
            None => println!("{}: (missing)", label),
        }
        println!();
    }

    Ok(())
}

fn print_snapshot(label: &str, snap: &ContentSnapshot) {
    println!("{}: {}", label, snap.key());
    println!("  Hash    : {}", snap.content_hash);
    println!(
        "  Created : {}",
        snap.created_at
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    );
    if snap.rule_statuses.is_empty() {
        println!("  Rules   : all passing");
        return;
    }
    println!("  {:<24} {:<9} COUNT", "RULE", "SEVERITY");
    for (rule_id, status) in &snap.rule_statuses {
        println!(
            "  {:<24} {:<9} {}",
            truncate(rule_id, 24),
            status.severity.to_string(),
            status.violation_count
        );
    }
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn join_or_dash(ids: &[String]) -> String {
    if ids.is_empty() {
        "-".to_string()
    } else {
        ids.join(", ")
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
