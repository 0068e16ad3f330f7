//! `merge` and `resolve` subcommands.
//!
//! A conflicted merge is saved as a session file (JSON) so that it can be
//! resolved in a later invocation.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use tripvcs_core::conflict::Conflict;
use tripvcs_core::{Decision, MergeOutcome, MergeSession, Side, VersionEngine};

use crate::style;

pub struct MergeArgs<'a> {
    pub repo: &'a str,
    pub source: &'a str,
    pub target: &'a str,
    pub author: &'a str,
    pub message: &'a str,
    pub session_out: &'a Path,
    pub show_diff: bool,
}

/// Merge `source` into `target`, committing when clean.
pub fn run_merge(engine: &VersionEngine, args: MergeArgs<'_>) -> Result<()> {
    let outcome = engine
        .open_merge(args.repo, args.source, args.target, args.author, args.message)
        .with_context(|| format!("failed to merge {} into {}", args.source, args.target))?;

    match outcome {
        MergeOutcome::UpToDate { head } => {
            println!(
                "{}",
                style::success(&format!(
                    "{} already contains {} (head {})",
                    args.target,
                    args.source,
                    style::short_id(&head)
                ))
            );
        }
        MergeOutcome::Committed {
            commit_id,
            key_change,
        } => {
            println!(
                "{}",
                style::success(&format!(
                    "Merged {} into {} as {}",
                    args.source,
                    args.target,
                    style::short_id(&commit_id)
                ))
            );
            if let Some(reason) = key_change.reason {
                println!("  {}", style::dim(&reason));
            }
        }
        MergeOutcome::Conflicted(session) => {
            println!(
                "{}",
                style::warn(&format!(
                    "{} conflict(s) merging {} into {}",
                    session.conflicts.len(),
                    args.source,
                    args.target
                ))
            );
            println!();
            print_conflicts(&session.conflicts, args.show_diff);

            let json = serde_json::to_string_pretty(&session)
                .context("failed to serialize merge session")?;
            std::fs::write(args.session_out, json).with_context(|| {
                format!("failed to write session file {}", args.session_out.display())
            })?;
            println!();
            println!("Session saved to {}", args.session_out.display());
            println!(
                "Resolve with: tripvcs resolve {} --all ours|theirs|base [--pick N=SIDE]",
                args.session_out.display()
            );
        }
    }
    Ok(())
}

/// Commit a resolution for a saved session.
pub fn run_resolve(
    engine: &VersionEngine,
    session_path: &Path,
    all: Side,
    picks: &[String],
    author: &str,
    message: &str,
) -> Result<()> {
    let text = std::fs::read_to_string(session_path)
        .with_context(|| format!("failed to read session file {}", session_path.display()))?;
    let session: MergeSession =
        serde_json::from_str(&text).context("session file is not a valid merge session")?;

    let decisions = build_decisions(&session.conflicts, all, picks)?;
    let created = engine
        .resolve_merge(&session, &decisions, author, message)
        .context("failed to commit resolution")?;

    std::fs::remove_file(session_path).with_context(|| {
        format!("failed to remove session file {}", session_path.display())
    })?;
    println!(
        "{}",
        style::success(&format!(
            "Resolved {} conflict(s); {} now at {}",
            decisions.len(),
            session.target_branch,
            style::short_id(&created.commit_id)
        ))
    );
    Ok(())
}

fn print_conflicts(conflicts: &[Conflict], show_diff: bool) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["#", "Type", "Location"]);
    for (i, conflict) in conflicts.iter().enumerate() {
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(style::conflict_kind(conflict.kind)),
            Cell::new(conflict.location.to_string()),
        ]);
    }
    println!("{table}");

    if show_diff {
        for (i, conflict) in conflicts.iter().enumerate() {
            println!();
            println!("{}", style::header(&format!("#{} {}", i + 1, conflict.location)));
            println!("{}", style::diff(&conflict.render_diff()));
        }
    }
}

/// One decision per conflict: `all` unless overridden by an `N=side` pick.
fn build_decisions(conflicts: &[Conflict], all: Side, picks: &[String]) -> Result<Vec<Decision>> {
    let mut choices = vec![all; conflicts.len()];
    for pick in picks {
        let (index, side) = pick
            .split_once('=')
            .with_context(|| format!("invalid pick '{pick}': expected N=ours|theirs|base"))?;
        let index: usize = index
            .trim()
            .parse()
            .with_context(|| format!("invalid conflict number in '{pick}'"))?;
        if index == 0 || index > conflicts.len() {
            anyhow::bail!(
                "conflict number {} out of range (1..={})",
                index,
                conflicts.len()
            );
        }
        choices[index - 1] = parse_side(side)?;
    }
    Ok(conflicts
        .iter()
        .zip(choices)
        .map(|(conflict, side)| Decision::for_conflict(conflict, side))
        .collect())
}

pub fn parse_side(s: &str) -> Result<Side> {
    match s.trim() {
        "ours" => Ok(Side::Ours),
        "theirs" => Ok(Side::Theirs),
        "base" => Ok(Side::Base),
        other => anyhow::bail!("invalid side '{other}': use ours, theirs or base"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripvcs_core::conflict::{ConflictKind, ConflictLocation};

    fn conflicts() -> Vec<Conflict> {
        vec![
            Conflict::new(ConflictKind::File, ConflictLocation::file("a.md"), None, None, None),
            Conflict::new(
                ConflictKind::PlanStopDelete,
                ConflictLocation::stop("d1", "s1"),
                None,
                None,
                None,
            ),
        ]
    }

    #[test]
    fn test_picks_override_default_side() {
        let decisions =
            build_decisions(&conflicts(), Side::Base, &["2=theirs".to_string()]).unwrap();
        assert_eq!(decisions[0].choice, Side::Base);
        assert_eq!(decisions[1].choice, Side::Theirs);
        assert_eq!(decisions[1].kind, "plan-stop-delete");
    }

    #[test]
    fn test_bad_picks_are_rejected() {
        assert!(build_decisions(&conflicts(), Side::Ours, &["3=ours".to_string()]).is_err());
        assert!(build_decisions(&conflicts(), Side::Ours, &["1:ours".to_string()]).is_err());
        assert!(build_decisions(&conflicts(), Side::Ours, &["1=mine".to_string()]).is_err());
    }
}
