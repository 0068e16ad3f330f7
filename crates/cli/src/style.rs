//! Shared styling utilities for terminal output.

use console::Style;

use tripvcs_core::ConflictKind;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold).
pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// Star marker for flagged commits.
pub fn flag(auto: bool, manual: bool) -> String {
    match (auto, manual) {
        (_, true) => Style::new().magenta().bold().apply_to("★").to_string(),
        (true, false) => Style::new().yellow().apply_to("★").to_string(),
        (false, false) => " ".to_string(),
    }
}

/// Coloured label for a conflict kind.
pub fn conflict_kind(kind: ConflictKind) -> String {
    let style = match kind {
        ConflictKind::File => Style::new().cyan(),
        ConflictKind::PlanWhole => Style::new().red().bold(),
        ConflictKind::PlanStopTime => Style::new().yellow(),
        ConflictKind::PlanStopDelete => Style::new().red(),
    };
    style.apply_to(kind.to_string()).to_string()
}

/// Colour each line of a unified diff.
pub fn diff(patch: &str) -> String {
    patch
        .lines()
        .map(|line| {
            if line.starts_with("+++") || line.starts_with("---") {
                Style::new().bold().apply_to(line).to_string()
            } else if line.starts_with('+') {
                Style::new().green().apply_to(line).to_string()
            } else if line.starts_with('-') {
                Style::new().red().apply_to(line).to_string()
            } else if line.starts_with("@@") {
                Style::new().cyan().apply_to(line).to_string()
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Shorten an id for display.
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
