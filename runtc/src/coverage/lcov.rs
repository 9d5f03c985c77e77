use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::{debug, warn};

use super::{CoverageTool, FileAnalysis, IncludePattern};
use crate::error::CoverageError;

/// Hit counts per line of one source file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct FileRecord {
    lines: BTreeMap<u32, u64>,
}

impl FileRecord {
    fn analysis(&self) -> FileAnalysis {
        FileAnalysis {
            total_lines: self.lines.len(),
            missed_lines: self
                .lines
                .iter()
                .filter(|(_, &hits)| hits == 0)
                .map(|(&line, _)| line)
                .collect(),
        }
    }
}

/// Reads line coverage from an LCOV tracefile produced outside this process,
/// typically by the instrumented run of the decoder sources.
///
/// The tracefile is only ever read. Starting fails if it is missing, so a run
/// without one goes on without coverage. Stopping parses it and keeps only
/// the files matching the include patterns.
#[derive(Debug)]
pub struct LcovTool {
    tracefile: PathBuf,
    include: Vec<IncludePattern>,
    records: Option<BTreeMap<PathBuf, FileRecord>>,
}

impl LcovTool {
    pub fn new(tracefile: impl Into<PathBuf>) -> Self {
        Self {
            tracefile: tracefile.into(),
            include: Vec::new(),
            records: None,
        }
    }

    pub fn tracefile(&self) -> &Path {
        &self.tracefile
    }

    fn record(&self, file: &Path) -> Option<&FileRecord> {
        let records = self.records.as_ref()?;
        if let Some(record) = records.get(file) {
            return Some(record);
        }
        // The tracefile may use another prefix; fall back to `<module>/<file>`.
        let mut components = file.components().rev();
        let (name, module) = (components.next()?, components.next()?);
        let tail: PathBuf = [module, name].iter().collect();
        records
            .iter()
            .find(|(path, _)| path.ends_with(&tail))
            .map(|(_, record)| record)
    }
}

impl CoverageTool for LcovTool {
    fn start(&mut self, include: &[IncludePattern]) -> Result<(), CoverageError> {
        match fs::metadata(&self.tracefile) {
            Ok(meta) if meta.is_file() => {
                debug!("Reading coverage from {}", self.tracefile.display())
            }
            Ok(_) => {
                return Err(CoverageError::Start(format!(
                    "{}: not a file",
                    self.tracefile.display()
                )))
            }
            Err(e) => {
                return Err(CoverageError::Start(format!(
                    "{}: {e}",
                    self.tracefile.display()
                )))
            }
        }
        for pattern in include {
            debug!("Coverage include: {pattern}");
        }
        self.include = include.to_vec();
        self.records = None;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CoverageError> {
        let file = File::open(&self.tracefile).map_err(|e| {
            CoverageError::Stop(format!("{}: {e}", self.tracefile.display()))
        })?;
        let records = parse_tracefile(BufReader::new(file))
            .map_err(|reason| CoverageError::Stop(format!("{}: {reason}", self.tracefile.display())))?;

        let total = records.len();
        let records: BTreeMap<PathBuf, FileRecord> = records
            .into_iter()
            .filter(|(path, _)| self.include.iter().any(|p| p.matches(path)))
            .collect();
        debug!("Tracefile has {} files, {} included.", total, records.len());
        self.records = Some(records);
        Ok(())
    }

    fn analyze(&mut self, file: &Path) -> Result<FileAnalysis, CoverageError> {
        if self.records.is_none() {
            return Err(CoverageError::Query {
                file: file.to_path_buf(),
                reason: "coverage has not been stopped".to_string(),
            });
        }
        match self.record(file) {
            Some(record) => Ok(record.analysis()),
            None => {
                debug!("{} was never loaded.", file.display());
                Ok(FileAnalysis::default())
            }
        }
    }

    fn write_report(&mut self, destination: &Path) -> Result<(), CoverageError> {
        let records = self
            .records
            .as_ref()
            .ok_or_else(|| CoverageError::Report("coverage has not been stopped".to_string()))?;
        let report = |e: std::io::Error| CoverageError::Report(format!("{}: {e}", destination.display()));

        let mut out = BufWriter::new(File::create(destination).map_err(report)?);
        write_table(&mut out, records).map_err(report)?;
        out.flush().map_err(report)
    }
}

fn write_table(out: &mut dyn Write, records: &BTreeMap<PathBuf, FileRecord>) -> std::io::Result<()> {
    let names: Vec<String> = records.keys().map(|p| p.display().to_string()).collect();
    let width = names.iter().map(|n| n.len()).max().unwrap_or(0).max("TOTAL".len());
    let rule = "-".repeat(width + 21);

    let row = |out: &mut dyn Write, name: &str, stmts: usize, miss: usize| {
        let cover = if stmts == 0 {
            "n/a".to_string()
        } else {
            format!("{:.0}%", 100.0 - miss as f64 / stmts as f64 * 100.0)
        };
        writeln!(out, "{name:<width$} {stmts:>6} {miss:>6} {cover:>6}")
    };

    writeln!(out, "{:<width$} {:>6} {:>6} {:>6}", "Name", "Stmts", "Miss", "Cover")?;
    writeln!(out, "{rule}")?;
    let (mut total, mut missed) = (0, 0);
    for (name, record) in names.iter().zip(records.values()) {
        let analysis = record.analysis();
        total += analysis.total_lines;
        missed += analysis.missed_lines.len();
        row(&mut *out, name, analysis.total_lines, analysis.missed_lines.len())?;
    }
    writeln!(out, "{rule}")?;
    row(out, "TOTAL", total, missed)
}

/// Parse the `SF`, `DA` and `end_of_record` lines of a tracefile. Other
/// records are skipped. Records for the same file are merged.
fn parse_tracefile(reader: impl BufRead) -> Result<BTreeMap<PathBuf, FileRecord>, String> {
    let mut records: BTreeMap<PathBuf, FileRecord> = BTreeMap::new();
    let mut current: Option<(PathBuf, FileRecord)> = None;

    for (number, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| e.to_string())?;
        let line = line.trim();
        let at = |msg: &str| format!("line {}: {msg}", number + 1);

        if let Some(path) = line.strip_prefix("SF:") {
            if current.is_some() {
                return Err(at("SF without end_of_record"));
            }
            current = Some((PathBuf::from(path), FileRecord::default()));
        } else if let Some(data) = line.strip_prefix("DA:") {
            let (_, record) = current.as_mut().ok_or_else(|| at("DA outside a record"))?;
            let mut fields = data.split(',');
            let (Some(line_no), Some(hits)) = (fields.next(), fields.next()) else {
                return Err(at("malformed DA"));
            };
            let line_no: u32 = line_no.parse().map_err(|_| at("bad line number"))?;
            // Some tools write negative counts on overflow.
            let hits: u64 = hits.parse::<i64>().map_err(|_| at("bad hit count"))?.max(0) as u64;
            *record.lines.entry(line_no).or_default() += hits;
        } else if line == "end_of_record" {
            let (path, record) = current.take().ok_or_else(|| at("end_of_record outside a record"))?;
            let merged = records.entry(path).or_default();
            for (line_no, hits) in record.lines {
                *merged.lines.entry(line_no).or_default() += hits;
            }
        }
    }

    if let Some((path, _)) = current {
        warn!("Tracefile ends inside the record for {}", path.display());
        return Err(format!("unterminated record for {}", path.display()));
    }
    Ok(records)
}
