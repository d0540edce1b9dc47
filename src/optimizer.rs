//! Pass driver.
//!
//! Runs the analyses in dependency order over one program and collects
//! their statistics:
//!
//! ```text
//! lookups -> join -> observation -> removal -> recursion -> history
//! ```
//!
//! History reads the storage decisions of observation and the lookup
//! categories, so it always runs last.

use crate::analysis::{
    AnalysisError, HistoryAnalysis, HistoryStats, JoinAnalysis, JoinStats, LookupAssignment,
    LookupStats, ObservationAnalysis, ObservationStats, RecursionAnalysis, RecursionStats,
    RemovalAnalysis, RemovalStats,
};
use crate::program::Program;
use std::fmt::Write;
use tracing::{info, instrument};

/// Which passes run, and the code-generation assumptions they may rely on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisConfig {
    pub lookups: bool,
    pub join: bool,
    pub observation: bool,
    pub removal: bool,
    pub recursion: bool,
    pub history: bool,
    /// Allow direct (array) access for binary heads over small domains.
    pub array_indexing: bool,
    /// Generated code never re-fires a rule on the tuple currently active.
    pub duplicate_elision: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            lookups: true,
            join: true,
            observation: true,
            removal: true,
            recursion: true,
            history: true,
            array_indexing: true,
            duplicate_elision: true,
        }
    }
}

impl AnalysisConfig {
    /// Only the passes code generation cannot do without. Every flag keeps
    /// its safe default: stored, history checked, recursive.
    pub fn conservative() -> Self {
        AnalysisConfig {
            lookups: true,
            join: false,
            observation: false,
            removal: true,
            recursion: false,
            history: false,
            array_indexing: false,
            duplicate_elision: false,
        }
    }
}

/// Statistics of one driver run. `None` for passes that did not run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisReport {
    pub lookups: Option<LookupStats>,
    pub join: Option<JoinStats>,
    pub observation: Option<ObservationStats>,
    pub removal: Option<RemovalStats>,
    pub recursion: Option<RecursionStats>,
    pub history: Option<HistoryStats>,
}

impl AnalysisReport {
    /// One line per pass that ran.
    pub fn report(&self) -> String {
        let mut out = String::new();
        if let Some(s) = &self.lookups {
            let _ = writeln!(
                out,
                "lookups: {} lookups in {} categories ({} keyed, {} direct, {} never stored)",
                s.lookups, s.categories, s.keyed, s.direct_access, s.never_stored
            );
        }
        if let Some(s) = &self.join {
            let _ = writeln!(
                out,
                "join: {} heads, {} cyclic, {} disconnected, {} cliques",
                s.rules, s.cyclic, s.disconnected, s.cliques
            );
        }
        if let Some(s) = &self.observation {
            let _ = writeln!(
                out,
                "observation: {} occurrences delayed, {} constraints never stored",
                s.unstored, s.never_stored
            );
        }
        if let Some(s) = &self.removal {
            let _ = writeln!(
                out,
                "removal: {} constraints remove {} constraints",
                s.removers, s.pairs
            );
        }
        if let Some(s) = &self.recursion {
            let _ = writeln!(
                out,
                "recursion: {} constraints not recursive, {} recursive",
                s.cleared, s.recursive
            );
        }
        if let Some(s) = &self.history {
            let _ = writeln!(
                out,
                "history: {} occurrences and {} rules optimized",
                s.occurrences_optimized, s.rules_optimized
            );
        }
        out
    }
}

/// Runs the configured passes over a program.
#[derive(Debug, Clone, Default)]
pub struct Optimizer {
    config: AnalysisConfig,
}

impl Optimizer {
    pub fn new(config: AnalysisConfig) -> Self {
        Optimizer { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    #[instrument(skip_all, name = "optimize")]
    pub fn run(&self, program: &mut Program) -> Result<AnalysisReport, AnalysisError> {
        let config = &self.config;
        let mut report = AnalysisReport::default();

        if config.lookups {
            report.lookups = Some(LookupAssignment::analyze(program, config.array_indexing)?);
        }
        if config.join {
            report.join = Some(JoinAnalysis::analyze(program));
        }
        if config.observation {
            let stats = ObservationAnalysis::analyze(program)?;
            info!(delayed = stats.unstored, "observation");
            report.observation = Some(stats);
        }
        if config.removal {
            report.removal = Some(RemovalAnalysis::analyze(program)?);
        }
        if config.recursion {
            let stats = RecursionAnalysis::analyze(program)?;
            info!(cleared = stats.cleared, "recursion");
            report.recursion = Some(stats);
        }
        if config.history {
            let stats = HistoryAnalysis::analyze(program, config.duplicate_elision)?;
            info!(
                occurrences = stats.occurrences_optimized,
                rules = stats.rules_optimized,
                "history"
            );
            report.history = Some(stats);
        }
        Ok(report)
    }
}
