//! TripVCS command-line administration tool.
//!
//! Operates directly on a local TripVCS store: creating and forking repos,
//! committing itinerary snapshots onto branches, inspecting history and
//! merge bases, and merging branches with interactive conflict resolution
//! through saved session files.

mod merge;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use tripvcs_core::config::AppConfig;
use tripvcs_core::models::{Commit, Visibility};
use tripvcs_core::{Snapshot, VersionEngine};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// TripVCS command-line administration tool.
#[derive(Parser, Debug)]
#[command(
    name = "tripvcs",
    version,
    about = "Version history, branches and merges for trip itineraries"
)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when it is absent.
    #[arg(short, long, global = true, default_value = "~/.config/tripvcs/config.toml")]
    config: String,

    /// Override the log level from the config file (trace, debug, info, warn, error).
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
        #[arg(short, long, default_value = "./tripvcs.toml")]
        output: PathBuf,
    },

    /// Validate the configuration file.
    Validate,

    /// Manage trip repositories.
    Repo {
        #[command(subcommand)]
        action: RepoAction,
    },

    /// Manage branches.
    Branch {
        #[command(subcommand)]
        action: BranchAction,
    },

    /// Commit a snapshot JSON file onto a branch.
    ///
    /// When the branch does not exist yet, a root commit is created and the
    /// branch is pointed at it.
    Commit {
        /// Repo ID.
        repo: String,
        /// Path to the snapshot JSON document.
        snapshot: PathBuf,
        /// Branch name (defaults to the current branch, then `main`).
        #[arg(short, long)]
        branch: Option<String>,
        #[arg(short, long, default_value = "cli")]
        author: String,
        #[arg(short, long, default_value = "")]
        message: String,
    },

    /// Show first-parent history of a branch.
    Log {
        repo: String,
        #[arg(short, long)]
        branch: Option<String>,
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Only list commits flagged as significant, across all branches.
        #[arg(long)]
        flagged: bool,
    },

    /// Print a commit and its snapshot.
    Show {
        commit: String,
    },

    /// Print the merge base of two commits.
    MergeBase {
        a: String,
        b: String,
    },

    /// Merge one branch into another.
    Merge {
        repo: String,
        /// Branch to merge from.
        source: String,
        /// Branch to merge into.
        #[arg(long)]
        into: String,
        #[arg(short, long, default_value = "cli")]
        author: String,
        #[arg(short, long, default_value = "")]
        message: String,
        /// Where to save the session when the merge has conflicts.
        #[arg(long, default_value = "./tripvcs-merge.json")]
        session: PathBuf,
        /// Print a diff for each conflict.
        #[arg(long)]
        diff: bool,
    },

    /// Resolve a conflicted merge saved by `merge`.
    Resolve {
        /// Session file written by `merge`.
        session: PathBuf,
        /// Side chosen for every conflict not listed in --pick.
        #[arg(long, default_value = "base")]
        all: String,
        /// Per-conflict choice as `N=ours|theirs|base` (1-based).
        #[arg(long)]
        pick: Vec<String>,
        #[arg(short, long, default_value = "cli")]
        author: String,
        #[arg(short, long, default_value = "")]
        message: String,
    },

    /// Set or clear the significant-change flag of a commit.
    Flag {
        commit: String,
        #[arg(long)]
        clear: bool,
    },

    /// Show recent audit log entries.
    Audit {
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
}

#[derive(Subcommand, Debug)]
enum RepoAction {
    /// Create an empty repo.
    Create {
        title: String,
        #[arg(long)]
        owner: Option<String>,
        /// private, unlisted or public.
        #[arg(long, default_value = "private")]
        visibility: String,
    },
    /// Fork a repo; the fork's branches start at the same heads.
    Fork {
        source: String,
        title: String,
        #[arg(long)]
        owner: Option<String>,
    },
    /// Show a repo and its branches.
    Show { repo: String },
}

#[derive(Subcommand, Debug)]
enum BranchAction {
    /// Create a branch from a commit or from another branch's head.
    Create {
        repo: String,
        name: String,
        /// Commit ID or branch name to start from.
        #[arg(long)]
        from: String,
    },
    /// List branches of a repo.
    List { repo: String },
    /// Remember a branch as the repo's current branch.
    Switch { repo: String, name: String },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = expand_tilde(&cli.config);

    if let Commands::Init { output } = &cli.command {
        init_tracing(cli.log_level.as_deref().unwrap_or("warn"));
        return cmd_init(output);
    }

    let config = load_config(&config_path)?;
    init_tracing(cli.log_level.as_deref().unwrap_or(&config.log.level));
    debug!(config = %config_path.display(), "configuration loaded");

    if let Commands::Validate = cli.command {
        return cmd_validate(&config_path, &config);
    }

    let engine = VersionEngine::open(config).context("failed to open store")?;

    match cli.command {
        Commands::Repo { action } => cmd_repo(&engine, action),
        Commands::Branch { action } => cmd_branch(&engine, action),
        Commands::Commit {
            repo,
            snapshot,
            branch,
            author,
            message,
        } => cmd_commit(&engine, &repo, &snapshot, branch, &author, &message),
        Commands::Log {
            repo,
            branch,
            limit,
            flagged,
        } => cmd_log(&engine, &repo, branch, limit, flagged),
        Commands::Show { commit } => cmd_show(&engine, &commit),
        Commands::MergeBase { a, b } => cmd_merge_base(&engine, &a, &b),
        Commands::Merge {
            repo,
            source,
            into,
            author,
            message,
            session,
            diff,
        } => merge::run_merge(
            &engine,
            merge::MergeArgs {
                repo: &repo,
                source: &source,
                target: &into,
                author: &author,
                message: &message,
                session_out: &session,
                show_diff: diff,
            },
        ),
        Commands::Resolve {
            session,
            all,
            pick,
            author,
            message,
        } => {
            let all = merge::parse_side(&all)?;
            merge::run_resolve(&engine, &session, all, &pick, &author, &message)
        }
        Commands::Flag { commit, clear } => cmd_flag(&engine, &commit, !clear),
        Commands::Audit { limit } => cmd_audit(&engine, limit),
        Commands::Init { .. } | Commands::Validate => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

/// Load and validate the config file, or fall back to defaults when the
/// file does not exist.
fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    AppConfig::load_and_validate(path).context("failed to load configuration file")
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    let toml = AppConfig::default_toml().context("failed to render default config")?;
    let contents = format!("# TripVCS configuration\n\n{toml}");
    std::fs::write(output, contents).context("failed to write config file")?;

    println!("{}", style::success(&format!("Default configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Set store.database_path to where the trip store should live");
    println!("  2. Validate with: tripvcs validate --config {}", output.display());
    Ok(())
}

fn cmd_validate(path: &Path, config: &AppConfig) -> Result<()> {
    if path.exists() {
        println!("  [OK] {} is valid", path.display());
    } else {
        println!("  [OK] {} not found, using defaults", path.display());
    }
    println!();
    println!("Configuration summary:");
    println!("  Database path        : {}", config.store.database_path.display());
    println!("  Whole-plan threshold : {}", config.merge.whole_plan_threshold);
    println!("  Coordinate precision : {}", config.merge.coordinate_precision);
    println!("  Stop churn trigger   : {}", config.classifier.stop_churn_threshold);
    println!("  Day delta trigger    : {}", config.classifier.day_delta_threshold);
    println!("  Stop count trigger   : {}%", config.classifier.stop_count_pct_threshold);
    println!("  Log level            : {}", config.log.level);
    Ok(())
}

fn cmd_repo(engine: &VersionEngine, action: RepoAction) -> Result<()> {
    match action {
        RepoAction::Create {
            title,
            owner,
            visibility,
        } => {
            let visibility = Visibility::from_str_val(&visibility);
            let repo = engine
                .create_repo(&title, owner.as_deref(), visibility)
                .context("failed to create repo")?;
            println!("{}", style::success(&format!("Created repo {} ({})", repo.title, repo.id)));
            Ok(())
        }
        RepoAction::Fork {
            source,
            title,
            owner,
        } => {
            let repo = engine
                .fork_repo(&source, &title, owner.as_deref())
                .context("failed to fork repo")?;
            println!("{}", style::success(&format!("Forked {} as {} ({})", source, repo.title, repo.id)));
            Ok(())
        }
        RepoAction::Show { repo } => {
            let registry = engine.branches();
            let info = registry.get_repo(&repo).context("failed to load repo")?;
            let current = registry.current_branch(&repo)?;

            println!("{}", style::header(&info.title));
            println!("  ID         : {}", info.id);
            println!("  Owner      : {}", info.owner_user_id.as_deref().unwrap_or("-"));
            println!("  Visibility : {}", info.visibility);
            println!("  Forked from: {}", info.forked_from_repo_id.as_deref().unwrap_or("-"));
            println!("  Created at : {}", info.created_at.to_rfc3339());
            println!("  Current    : {}", current.as_deref().unwrap_or("-"));
            println!();
            print_branches(engine, &repo)
        }
    }
}

fn cmd_branch(engine: &VersionEngine, action: BranchAction) -> Result<()> {
    let registry = engine.branches();
    match action {
        BranchAction::Create { repo, name, from } => {
            let start = match registry.get_by_name(&repo, &from)? {
                Some(branch) => branch.head_commit_id,
                None => from,
            };
            let branch = engine
                .create_branch(&repo, &name, &start)
                .context("failed to create branch")?;
            println!(
                "{}",
                style::success(&format!(
                    "Created branch {} at {}",
                    branch.name,
                    style::short_id(&branch.head_commit_id)
                ))
            );
            Ok(())
        }
        BranchAction::List { repo } => print_branches(engine, &repo),
        BranchAction::Switch { repo, name } => {
            registry
                .set_current_branch(&repo, &name)
                .context("failed to switch branch")?;
            println!("{}", style::success(&format!("Current branch is now {name}")));
            Ok(())
        }
    }
}

fn print_branches(engine: &VersionEngine, repo: &str) -> Result<()> {
    let registry = engine.branches();
    let branches = registry.list(repo).context("failed to list branches")?;
    if branches.is_empty() {
        println!("No branches.");
        return Ok(());
    }
    let current = registry.current_branch(repo)?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["", "Branch", "Head", "Message"]);
    for branch in &branches {
        let head = engine.get_commit(&branch.head_commit_id)?;
        let marker = if current.as_deref() == Some(branch.name.as_str()) {
            "*"
        } else {
            ""
        };
        table.add_row(vec![
            Cell::new(marker),
            Cell::new(&branch.name),
            Cell::new(style::short_id(&head.id)),
            Cell::new(&head.message),
        ]);
    }
    println!("{table}");
    Ok(())
}

/// Resolve the branch a command acts on: explicit, then current, then `main`.
fn branch_or_current(engine: &VersionEngine, repo: &str, branch: Option<String>) -> Result<String> {
    if let Some(name) = branch {
        return Ok(name);
    }
    Ok(engine
        .branches()
        .current_branch(repo)?
        .unwrap_or_else(|| "main".to_string()))
}

fn cmd_commit(
    engine: &VersionEngine,
    repo: &str,
    snapshot_path: &Path,
    branch: Option<String>,
    author: &str,
    message: &str,
) -> Result<()> {
    let text = std::fs::read_to_string(snapshot_path)
        .with_context(|| format!("failed to read {}", snapshot_path.display()))?;
    let snapshot = Snapshot::from_json(&text)
        .with_context(|| format!("{} is not valid JSON", snapshot_path.display()))?;
    let name = branch_or_current(engine, repo, branch)?;

    let created = match engine.branches().get_by_name(repo, &name)? {
        Some(branch) => engine
            .commit_on_branch(&branch.id, &branch.head_commit_id, snapshot, author, message)
            .context("failed to commit")?,
        None => {
            let created = engine
                .create_commit(repo, &[], snapshot, author, message)
                .context("failed to create root commit")?;
            engine
                .create_branch(repo, &name, &created.commit_id)
                .context("failed to create branch")?;
            created
        }
    };

    println!(
        "{}",
        style::success(&format!(
            "[{} {}] {}",
            name,
            style::short_id(&created.commit_id),
            message
        ))
    );
    if let Some(reason) = &created.key_change.reason {
        println!("  {} {}", style::flag(created.key_change.auto_flag, false), reason);
    }
    Ok(())
}

fn cmd_log(
    engine: &VersionEngine,
    repo: &str,
    branch: Option<String>,
    limit: usize,
    flagged: bool,
) -> Result<()> {
    let commits = if flagged {
        engine
            .commits()
            .list_flagged(repo, u32::try_from(limit).unwrap_or(u32::MAX))
            .context("failed to list flagged commits")?
    } else {
        let name = branch_or_current(engine, repo, branch)?;
        let tip = engine
            .branches()
            .require_by_name(repo, &name)
            .context("failed to resolve branch")?
            .head_commit_id;
        engine
            .commits()
            .history(&tip, limit)
            .context("failed to walk history")?
    };

    if commits.is_empty() {
        println!("No commits.");
        return Ok(());
    }
    for commit in &commits {
        print_log_line(commit);
    }
    Ok(())
}

fn print_log_line(commit: &Commit) {
    let kc = &commit.key_change;
    let merge = if commit.is_merge() { " (merge)" } else { "" };
    println!(
        "{} {}  {}  {}{}",
        style::flag(kc.auto_flag, kc.manual_flag),
        style::short_id(&commit.id),
        style::dim(&commit.created_at.format("%Y-%m-%d %H:%M").to_string()),
        commit.message,
        merge
    );
    if let Some(reason) = &kc.reason {
        println!("             {}", style::dim(reason));
    }
}

fn cmd_show(engine: &VersionEngine, commit_id: &str) -> Result<()> {
    let commit = engine.get_commit(commit_id).context("failed to load commit")?;
    println!("{}", style::header(&format!("commit {}", commit.id)));
    println!("Author : {}", commit.author);
    println!("Date   : {}", commit.created_at.to_rfc3339());
    if !commit.parents.is_empty() {
        println!("Parents: {}", commit.parents.join(" "));
    }
    println!(
        "Score  : {}{}",
        commit.key_change.score,
        if commit.key_change.is_flagged() { " (flagged)" } else { "" }
    );
    println!();
    println!("    {}", commit.message);
    println!();
    let json = serde_json::to_string_pretty(&commit.snapshot).context("failed to render snapshot")?;
    println!("{json}");
    Ok(())
}

fn cmd_merge_base(engine: &VersionEngine, a: &str, b: &str) -> Result<()> {
    match engine.merge_base(a, b).context("failed to compute merge base")? {
        Some(base) => println!("{base}"),
        None => println!("{}", style::warn("no common ancestor")),
    }
    Ok(())
}

fn cmd_flag(engine: &VersionEngine, commit_id: &str, flag: bool) -> Result<()> {
    engine
        .commits()
        .set_manual_flag(commit_id, flag)
        .context("failed to update flag")?;
    let verb = if flag { "Flagged" } else { "Unflagged" };
    println!("{}", style::success(&format!("{verb} {}", style::short_id(commit_id))));
    Ok(())
}

fn cmd_audit(engine: &VersionEngine, limit: u32) -> Result<()> {
    let entries = engine
        .db()
        .list_audit_log(limit)
        .context("failed to list audit entries")?;

    if entries.is_empty() {
        println!("No audit log entries found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Time", "Action", "Commit", "Author", "Details"]);
    for entry in &entries {
        table.add_row(vec![
            Cell::new(entry.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::new(&entry.action),
            Cell::new(entry.commit_id.as_deref().map(style::short_id).unwrap_or("-")),
            Cell::new(entry.author.as_deref().unwrap_or("-")),
            Cell::new(entry.details.as_deref().unwrap_or("")),
        ]);
    }
    println!("{table}");
    println!("{} entries shown", entries.len());
    Ok(())
}
