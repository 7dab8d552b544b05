//! Terminal sink for streamed step output
//!
//! Cells run concurrently, so lines from different cells interleave. Each
//! line carries a short prefix, and a header is printed whenever the source
//! (cell and step) changes.

use crate::execution::OutputSink;
use console::style;
use std::io::{self, Write};
use std::sync::Mutex;

/// Prints step output lines as they arrive
#[derive(Debug, Default)]
pub struct TerminalOutputSink {
    /// Source of the last printed line
    last_source: Mutex<Option<(String, String)>>,
}

impl TerminalOutputSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Print a separator line spanning the terminal width
    fn print_separator(&self) {
        let width = term_size::dimensions_stdout().map(|(w, _)| w).unwrap_or(80);
        println!("{}", style("─".repeat(width)).dim());
    }

    fn print_header(&self, cell: &str, step: &str) {
        self.print_separator();
        if cell.is_empty() {
            println!("{}", style(step).bold());
        } else {
            println!("{} {}", style(cell).cyan(), style(step).bold());
        }
    }

    /// Whether a header is due for this source; records it as the last one
    fn source_changed(&self, cell: &str, step: &str) -> bool {
        let Ok(mut last) = self.last_source.lock() else {
            return false;
        };
        let changed = last
            .as_ref()
            .map_or(true, |(c, s)| c != cell || s != step);
        if changed {
            *last = Some((cell.to_string(), step.to_string()));
        }
        changed
    }
}

impl OutputSink for TerminalOutputSink {
    fn on_line(&self, cell: &str, step: &str, line: &str) {
        if self.source_changed(cell, step) {
            self.print_header(cell, step);
        }
        println!("{} {}", style("│").dim(), line);
        let _ = io::stdout().flush();
    }
}
