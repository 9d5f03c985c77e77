use std::{collections::BTreeSet, fmt};

use super::FileAnalysis;

/// One executable line that never ran.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MissedLine {
    pub module: String,
    pub file: String,
    pub line: u32,
}

impl fmt::Display for MissedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.module, self.file, self.line)
    }
}

/// How the line counts of several modules are combined into the all-scope
/// summary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CountPolicy {
    /// Average over the modules; a test with one decoder reports exactly that
    /// decoder's numbers.
    #[default]
    Mean,
    Sum,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleCoverage {
    pub name: String,
    pub total_lines: usize,
    /// Missed lines as reported by the tool, duplicates included.
    pub missed: usize,
    pub missed_lines: BTreeSet<MissedLine>,
}

impl ModuleCoverage {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn add_file(&mut self, file: &str, analysis: &FileAnalysis) {
        self.total_lines += analysis.total_lines;
        self.missed += analysis.missed_lines.len();
        self.missed_lines
            .extend(analysis.missed_lines.iter().map(|&line| MissedLine {
                module: self.name.clone(),
                file: file.to_string(),
                line,
            }));
    }

    pub fn missed(&self) -> usize {
        self.missed
    }

    /// `None` if the module has no executable lines.
    pub fn percentage(&self) -> Option<f64> {
        percentage(self.total_lines, self.missed())
    }

    pub fn summary_line(&self) -> String {
        let missed: Vec<String> = self.missed_lines.iter().map(|m| m.to_string()).collect();
        format!(
            "coverage: scope={} coverage={} lines={} missed={} missed_lines={}",
            self.name,
            format_percentage(self.percentage()),
            self.total_lines,
            self.missed(),
            missed.join(",")
        )
    }
}

/// Coverage across all modules of a test.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregateCoverage {
    modules: Vec<ModuleCoverage>,
    missed_lines: BTreeSet<MissedLine>,
}

impl AggregateCoverage {
    /// Add a module. Modules listed twice count twice towards the line
    /// totals, but their missed lines are only kept once.
    pub fn add(&mut self, module: ModuleCoverage) {
        self.missed_lines
            .extend(module.missed_lines.iter().cloned());
        self.modules.push(module);
    }

    pub fn modules(&self) -> &[ModuleCoverage] {
        &self.modules
    }

    pub fn missed_lines(&self) -> &BTreeSet<MissedLine> {
        &self.missed_lines
    }

    /// `(lines, missed)` over all modules. The mean uses integer division.
    pub fn counts(&self, policy: CountPolicy) -> (usize, usize) {
        let lines: usize = self.modules.iter().map(|m| m.total_lines).sum();
        let missed: usize = self.modules.iter().map(|m| m.missed()).sum();
        match policy {
            CountPolicy::Sum => (lines, missed),
            CountPolicy::Mean => match self.modules.len() {
                0 => (0, 0),
                n => (lines / n, missed / n),
            },
        }
    }

    pub fn percentage(&self, policy: CountPolicy) -> Option<f64> {
        let (lines, missed) = self.counts(policy);
        percentage(lines, missed)
    }

    pub fn summary_line(&self, policy: CountPolicy) -> String {
        let (lines, missed) = self.counts(policy);
        format!(
            "coverage: scope=all coverage={} lines={} missed={}",
            format_percentage(percentage(lines, missed)),
            lines,
            missed
        )
    }
}

fn percentage(lines: usize, missed: usize) -> Option<f64> {
    if lines == 0 {
        return None;
    }
    Some(100.0 - (missed as f64 / lines as f64 * 100.0))
}

fn format_percentage(pct: Option<f64>) -> String {
    match pct {
        Some(pct) => format!("{pct:.0}%"),
        None => "n/a".to_string(),
    }
}
