//! Table output formatting for CLI commands
//!
//! Renders queue counts, lock tables, and orphan lists with comfy-table.
//! Colors are dropped when `NO_COLOR` is set or the terminal is dumb; state
//! then shows as a text marker instead.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::env;

use crate::cli::commands::status::{LockView, OrphanView, QueueCount};
use crate::domain::models::CircuitState;

/// Table formatter for CLI output
pub struct TableFormatter {
    /// Whether to use colors in output
    use_colors: bool,
    /// Maximum width for tables (None = auto)
    max_width: Option<usize>,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    pub fn with_config(use_colors: bool, max_width: Option<usize>) -> Self {
        Self {
            use_colors,
            max_width,
        }
    }

    /// Two-column key/value table.
    pub fn format_fields(&self, rows: &[(&str, String)]) -> String {
        let mut table = self.create_base_table();
        for (key, value) in rows {
            table.add_row(vec![
                Cell::new(*key).add_attribute(Attribute::Bold),
                Cell::new(value),
            ]);
        }
        table.to_string()
    }

    pub fn format_queue(&self, counts: &[QueueCount]) -> String {
        let mut table = self.create_base_table();
        table.set_header(
            counts
                .iter()
                .map(|c| Cell::new(c.location.as_str()).add_attribute(Attribute::Bold)),
        );
        table.add_row(counts.iter().map(|c| Cell::new(c.count)));
        table.to_string()
    }

    pub fn format_locks(&self, locks: &[LockView]) -> String {
        let mut table = self.create_base_table();
        table.set_header(vec![
            Cell::new("Task").add_attribute(Attribute::Bold),
            Cell::new("Holder").add_attribute(Attribute::Bold),
            Cell::new("PID").add_attribute(Attribute::Bold),
            Cell::new("Age").add_attribute(Attribute::Bold),
            Cell::new("State").add_attribute(Attribute::Bold),
        ]);

        for lock in locks {
            let state = match &lock.stale_reason {
                Some(reason) => format!("{} ({reason})", lock.state),
                None => lock.state.to_string(),
            };
            let state_cell = if self.use_colors {
                Cell::new(state).fg(lock_color(lock.state))
            } else {
                Cell::new(format!("{} {state}", lock_icon(lock.state)))
            };
            table.add_row(vec![
                Cell::new(&lock.task_id),
                Cell::new(lock.agent_id.as_deref().unwrap_or("-")),
                Cell::new(lock.pid.map_or_else(|| "-".to_string(), |p| p.to_string())),
                Cell::new(lock.age_secs.map_or_else(|| "-".to_string(), format_age)),
                state_cell,
            ]);
        }
        table.to_string()
    }

    pub fn format_orphans(&self, orphans: &[OrphanView]) -> String {
        let mut table = self.create_base_table();
        table.set_header(vec![
            Cell::new("Task").add_attribute(Attribute::Bold),
            Cell::new("Lock").add_attribute(Attribute::Bold),
        ]);
        for orphan in orphans {
            table.add_row(vec![Cell::new(&orphan.task_id), Cell::new(orphan.kind)]);
        }
        table.to_string()
    }

    /// Breaker state as a single, optionally colored, word.
    pub fn breaker_state(&self, state: CircuitState) -> String {
        let text = state.as_str();
        if !self.use_colors {
            return text.to_string();
        }
        let styled = match state {
            CircuitState::Closed => console::style(text).green(),
            CircuitState::HalfOpen => console::style(text).yellow(),
            CircuitState::Open => console::style(text).red().bold(),
        };
        styled.to_string()
    }

    fn create_base_table(&self) -> Table {
        let mut table = Table::new();

        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        if let Some(width) = self.max_width {
            table.set_width(u16::try_from(width).unwrap_or(u16::MAX));
        }

        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if color output is supported
fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    if let Ok(term) = env::var("TERM") {
        if term == "dumb" {
            return false;
        }
    }
    true
}

fn lock_color(state: &str) -> Color {
    match state {
        "own" => Color::Green,
        "peer" => Color::Cyan,
        _ => Color::Red,
    }
}

fn lock_icon(state: &str) -> &'static str {
    match state {
        "own" => "●",
        "peer" => "○",
        _ => "✗",
    }
}

fn format_age(secs: i64) -> String {
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m{:02}s", s / 60, s % 60),
        s => format!("{}h{:02}m", s / 3600, (s % 3600) / 60),
    }
}
