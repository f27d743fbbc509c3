//! Module that contains the console output of the philosophers.
//!
//! Plain messages go through `tracing` so the binary's subscriber decides where they end
//! up. State transitions are printed as one colored line each, indented by rank, so that a
//! whole ring running in one terminal reads as columns.

use crate::philosopher::Phase;
use color_print::cformat;

/// Function that logs an informative message.
pub fn info(message: &str) {
    tracing::info!("{message}");
}

/// Function that logs a warning.
pub fn warn(message: &str) {
    tracing::warn!("{message}");
}

/// Function that logs an error.
pub fn error(message: &str) {
    tracing::error!("{message}");
}

/// Function that logs a debug message.
pub fn debug(message: &str) {
    tracing::debug!("{message}");
}

/// Function that returns the trace line of a philosopher entering `phase`.
pub fn state_line(rank: usize, phase: Phase) -> Option<String> {
    let indent = "\t".repeat(rank);
    let label = match phase {
        Phase::Thinking => cformat!("<blue>thinking</blue>"),
        Phase::Acquiring => cformat!("<yellow>looking for fork ({rank})</yellow>"),
        Phase::Eating => cformat!("<green, bold>eating</green, bold>"),
        Phase::Releasing | Phase::Finished => return None,
    };
    Some(format!("{indent}{label}"))
}

/// Function that prints the trace line of a philosopher entering `phase`.
pub fn state(rank: usize, phase: Phase) {
    if let Some(line) = state_line(rank, phase) {
        tracing::info!(target: "chandy_misra::trace", rank, "{line}");
    }
}
