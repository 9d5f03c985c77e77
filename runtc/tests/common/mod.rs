#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::Result;
use capture::{Capture, CaptureWriter, Header};
use runtc::{
    coverage::{CoverageTool, FileAnalysis, IncludePattern, ModuleSource},
    engine::{Decoder, DecoderDefinition, Output, Registry, Samples, Value},
    CoverageError,
};

/// A capture with one header, one logic block per chunk and an end marker.
pub fn capture_bytes(samplerate: u64, unit_size: u8, chunks: &[&[u8]]) -> Vec<u8> {
    let mut writer = CaptureWriter::new(Vec::new());
    writer
        .header(&Header {
            samplerate: Some(samplerate),
            unit_size,
            channels: (0..unit_size * 8).map(|i| format!("D{i}")).collect(),
        })
        .unwrap();
    for chunk in chunks {
        writer.logic(chunk).unwrap();
    }
    writer.end().unwrap();
    writer.into_inner()
}

pub fn capture(chunks: &[&[u8]]) -> Capture {
    Capture::from_reader(Cursor::new(capture_bytes(1_000_000, 1, chunks))).unwrap()
}

pub fn write_capture(dir: &Path, name: &str, chunks: &[&[u8]]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, capture_bytes(1_000_000, 1, chunks)).unwrap();
    path
}

/// Bottom decoder: one `bit` annotation per sample, an `edge` annotation on
/// every rising edge and a raw object per sample (0xab for high, 0x0c for
/// low).
struct Bits {
    last: Option<bool>,
}

impl Decoder for Bits {
    fn decode(&mut self, samples: &Samples<'_>, out: &mut Output<'_, '_>) -> Result<()> {
        for i in samples.start()..samples.end() {
            let level = samples.level(i, 0).unwrap_or(false);
            out.annotation(i, i + 1, 0, &[if level { "1" } else { "0" }])?;
            if level && self.last == Some(false) {
                out.annotation(i, i + 1, 1, &["rise"])?;
            }
            self.last = Some(level);
            out.raw_object(i, i + 1, &Value::Int(if level { 0xab } else { 0x0c }))?;
        }
        Ok(())
    }
}

/// Stacked decoder with two binary classes.
struct Bytes;

impl Decoder for Bytes {
    fn decode_stacked(
        &mut self,
        start_sample: u64,
        end_sample: u64,
        data: &Value,
        out: &mut Output<'_, '_>,
    ) -> Result<()> {
        let value = data.as_int().unwrap_or(0) as u8;
        out.binary(start_sample, end_sample, 0, &[value])?;
        out.binary(start_sample, end_sample, 1, &[value, 0xff])?;
        out.annotation(start_sample, end_sample, 0, &["byte"])
    }
}

pub fn registry() -> Registry {
    let mut registry = Registry::builtin();
    registry.register(
        DecoderDefinition::new("bits", |_| Ok(Box::new(Bits { last: None })))
            .outputs(&["bits"])
            .channel("data", "Data line")
            .annotation("bit", "Bit")
            .annotation("edge", "Rising edge"),
    );
    registry.register(
        DecoderDefinition::new("bytes", |_| Ok(Box::new(Bytes)))
            .inputs(&["bits"])
            .annotation("byte", "Byte")
            .binary("first", "Value")
            .binary("second", "Value and marker"),
    );
    registry
}

/// Coverage tool answering from a fixed table.
#[derive(Default)]
pub struct FakeCoverage {
    pub files: BTreeMap<PathBuf, FileAnalysis>,
    pub include: Vec<String>,
    pub stopped: bool,
    pub reports: Vec<PathBuf>,
    pub fail_start: bool,
}

impl CoverageTool for FakeCoverage {
    fn start(&mut self, include: &[IncludePattern]) -> Result<(), CoverageError> {
        if self.fail_start {
            return Err(CoverageError::Start("no tool".into()));
        }
        self.include = include.iter().map(|p| p.to_string()).collect();
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CoverageError> {
        self.stopped = true;
        Ok(())
    }

    fn analyze(&mut self, file: &Path) -> Result<FileAnalysis, CoverageError> {
        self.files.get(file).cloned().ok_or_else(|| CoverageError::Query {
            file: file.to_path_buf(),
            reason: "unknown".into(),
        })
    }

    fn write_report(&mut self, destination: &Path) -> Result<(), CoverageError> {
        self.reports.push(destination.to_path_buf());
        Ok(())
    }
}

/// Module sources at `/src/<module>/<file>`.
#[derive(Default)]
pub struct FakeModules {
    pub files: BTreeMap<String, Vec<PathBuf>>,
}

impl ModuleSource for FakeModules {
    fn include_pattern(&self, module: &str) -> IncludePattern {
        IncludePattern {
            module: module.to_string(),
            extension: "py".to_string(),
        }
    }

    fn module_files(&self, module: &str) -> Result<Vec<PathBuf>, CoverageError> {
        Ok(self.files.get(module).cloned().unwrap_or_default())
    }
}

impl FakeModules {
    pub fn add(&mut self, coverage: &mut FakeCoverage, module: &str, file: &str, analysis: FileAnalysis) {
        let path = PathBuf::from(format!("/src/{module}/{file}"));
        coverage.files.insert(path.clone(), analysis);
        self.files.entry(module.to_string()).or_default().push(path);
    }
}
