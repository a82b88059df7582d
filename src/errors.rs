//! Fault reports for the command line.
//!
//! This module provides:
//! - ANSI color support
//! - "did you mean?" suggestions for unbound globals
//! - a disassembly snippet around the faulting instruction

use crate::disasm::{disassemble, format_line};
use crate::fault::VmError;

/// ANSI color codes for terminal output
#[derive(Debug, Clone)]
pub struct Colors {
    pub enabled: bool,
}

impl Colors {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn red(&self) -> &'static str {
        if self.enabled { "\x1b[31m" } else { "" }
    }

    pub fn cyan(&self) -> &'static str {
        if self.enabled { "\x1b[36m" } else { "" }
    }

    pub fn bold(&self) -> &'static str {
        if self.enabled { "\x1b[1m" } else { "" }
    }

    pub fn reset(&self) -> &'static str {
        if self.enabled { "\x1b[0m" } else { "" }
    }
}

impl Default for Colors {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Configuration for fault display
#[derive(Debug, Clone, Default)]
pub struct ErrorConfig {
    pub colors: Colors,
    pub filename: Option<String>,
}

impl ErrorConfig {
    pub fn new(use_color: bool) -> Self {
        Self {
            colors: Colors::new(use_color),
            filename: None,
        }
    }

    pub fn with_filename(mut self, name: impl Into<String>) -> Self {
        self.filename = Some(name.into());
        self
    }
}

// ============================================================================
// Suggestions
// ============================================================================

/// Levenshtein edit distance.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut row = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            row[j + 1] = (prev[j + 1] + 1).min(row[j] + 1).min(prev[j] + cost);
        }
        prev = row;
    }
    prev[b.len()]
}

/// Up to three candidates within `max_distance`, closest first.
pub fn find_similar<'a>(
    name: &str,
    candidates: impl IntoIterator<Item = &'a str>,
    max_distance: usize,
) -> Vec<String> {
    let mut found: Vec<(usize, &str)> = candidates
        .into_iter()
        .map(|c| (levenshtein_distance(name, c), c))
        .filter(|(d, _)| *d > 0 && *d <= max_distance)
        .collect();
    found.sort();
    found.into_iter().take(3).map(|(_, c)| c.to_string()).collect()
}

// ============================================================================
// Formatting
// ============================================================================

/// Example: "-- VM FAULT --------------------------------------------------"
pub fn format_header(kind: &str, colors: &Colors) -> String {
    let dashes = "-".repeat(60usize.saturating_sub(kind.len() + 4));
    format!("{}-- {} {}{}", colors.cyan(), kind, dashes, colors.reset())
}

/// Disassembly of the instructions leading up to `ip`, the faulting one
/// marked with `>`.
pub fn format_snippet(code: &[u8], ip: usize, colors: &Colors) -> String {
    let decoded = disassemble(code);
    let Some(pos) = decoded.iter().position(|d| d.at() == ip) else {
        return String::new();
    };
    let first = pos.saturating_sub(2);
    decoded[first..=pos]
        .iter()
        .map(|d| {
            let line = format_line(code, d);
            if d.at() == ip {
                format!("{}> {}{}", colors.red(), line, colors.reset())
            } else {
                format!("  {}", line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Full report for a fault at `ip`. `globals` feeds suggestions for
/// unbound symbols.
pub fn format_fault<'a>(
    err: &VmError,
    code: &[u8],
    ip: usize,
    globals: impl IntoIterator<Item = &'a str>,
    config: &ErrorConfig,
) -> String {
    let colors = &config.colors;
    let mut out = format_header("VM FAULT", colors);
    out.push('\n');
    out.push_str(&format!(
        "{}{}:{:04x}{}\n\n",
        colors.bold(),
        config.filename.as_deref().unwrap_or("<code>"),
        ip,
        colors.reset()
    ));
    out.push_str(&format!("{}\n", err));

    let snippet = format_snippet(code, ip, colors);
    if !snippet.is_empty() {
        out.push('\n');
        out.push_str(&snippet);
        out.push('\n');
    }

    if let VmError::UnboundSymbol(name) = err {
        let suggestions = find_similar(name, globals, 2);
        if !suggestions.is_empty() {
            let names: Vec<String> = suggestions
                .iter()
                .map(|s| format!("{}{}{}", colors.bold(), s, colors.reset()))
                .collect();
            out.push_str(&format!("\nDid you mean {}?\n", names.join(", ")));
        }
    }
    out
}
