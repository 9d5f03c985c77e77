//! Line coverage of the decoders in a test case.
//!
//! A coverage tool is started before the pipeline runs, with one include
//! pattern per decoder module. Afterwards every source file of every module
//! is analyzed and the results are merged per module and across the stack.

mod aggregate;
mod lcov;

use std::{
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
};

use log::debug;

pub use aggregate::{AggregateCoverage, CountPolicy, MissedLine, ModuleCoverage};
pub use lcov::LcovTool;

use crate::{error::CoverageError, testcase::DecoderSpec};

/// Executable lines of one source file and the ones that never ran.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileAnalysis {
    pub total_lines: usize,
    pub missed_lines: Vec<u32>,
}

/// Limits measurement to the files of one decoder module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncludePattern {
    pub module: String,
    pub extension: String,
}

impl IncludePattern {
    /// True for `.../<module>/<anything>.<extension>`.
    pub fn matches(&self, path: &Path) -> bool {
        let in_module = path
            .parent()
            .and_then(|p| p.file_name())
            .is_some_and(|name| name == self.module.as_str());
        in_module
            && path
                .extension()
                .is_some_and(|ext| ext == self.extension.as_str())
    }
}

impl fmt::Display for IncludePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "*/{}/*.{}", self.module, self.extension)
    }
}

/// The external line-coverage tool.
pub trait CoverageTool {
    fn start(&mut self, include: &[IncludePattern]) -> Result<(), CoverageError>;
    fn stop(&mut self) -> Result<(), CoverageError>;
    fn analyze(&mut self, file: &Path) -> Result<FileAnalysis, CoverageError>;
    /// Write a human-readable per-file report.
    fn write_report(&mut self, destination: &Path) -> Result<(), CoverageError>;
}

/// Where the source files of a decoder module live.
pub trait ModuleSource {
    fn include_pattern(&self, module: &str) -> IncludePattern;
    /// Every source file of the module, in a stable order.
    fn module_files(&self, module: &str) -> Result<Vec<PathBuf>, CoverageError>;
}

/// Decoder sources laid out as `<root>/<module>/*.<extension>`.
#[derive(Clone, Debug)]
pub struct DecoderTree {
    root: PathBuf,
    extension: String,
}

impl DecoderTree {
    pub fn new(root: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            root: root.into(),
            extension: extension.to_string(),
        }
    }
}

impl ModuleSource for DecoderTree {
    fn include_pattern(&self, module: &str) -> IncludePattern {
        IncludePattern {
            module: module.to_string(),
            extension: self.extension.clone(),
        }
    }

    fn module_files(&self, module: &str) -> Result<Vec<PathBuf>, CoverageError> {
        let path = self.root.join(module);
        let pattern = self.include_pattern(module);
        let entries = fs::read_dir(&path).map_err(|source| CoverageError::ModulePath {
            path: path.clone(),
            source,
        })?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CoverageError::ModulePath {
                path: path.clone(),
                source,
            })?;
            let file = entry.path();
            if file.is_file() && pattern.matches(&file) {
                files.push(file);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Start the tool with one include pattern per decoder in the stack.
pub fn start(
    tool: &mut dyn CoverageTool,
    modules: &dyn ModuleSource,
    specs: &[DecoderSpec],
) -> Result<(), CoverageError> {
    debug!("Starting coverage.");
    let include: Vec<IncludePattern> = specs
        .iter()
        .map(|spec| modules.include_pattern(&spec.id))
        .collect();
    tool.start(&include)
}

/// Coverage of one module: the sum over its files, with every missed line
/// recorded as `<module>/<file>:<line>`.
pub fn collect_module(
    tool: &mut dyn CoverageTool,
    modules: &dyn ModuleSource,
    module: &str,
) -> Result<ModuleCoverage, CoverageError> {
    let mut coverage = ModuleCoverage::new(module);
    for file in modules.module_files(module)? {
        let analysis = tool.analyze(&file)?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!(
            "Coverage for {}/{}: {} lines, {} missed.",
            module,
            file_name,
            analysis.total_lines,
            analysis.missed_lines.len()
        );
        coverage.add_file(&file_name, &analysis);
    }
    Ok(coverage)
}

/// Stop the tool, print one summary line per module plus the all-scope line
/// to `out`, and write the detailed report.
pub fn report(
    tool: &mut dyn CoverageTool,
    modules: &dyn ModuleSource,
    specs: &[DecoderSpec],
    policy: CountPolicy,
    destination: &Path,
    out: &mut dyn Write,
) -> Result<AggregateCoverage, CoverageError> {
    debug!("Stopping coverage.");
    tool.stop()?;

    debug!("Making coverage report.");
    let emit = |out: &mut dyn Write, line: String| {
        writeln!(out, "{line}").map_err(|e| CoverageError::Report(e.to_string()))
    };

    let mut all = AggregateCoverage::default();
    for spec in specs {
        let module = collect_module(tool, modules, &spec.id)?;
        emit(out, module.summary_line())?;
        debug!(
            "Coverage for module {}: {} lines, {} missed",
            module.name,
            module.total_lines,
            module.missed()
        );
        all.add(module);
    }
    emit(out, all.summary_line(policy))?;

    tool.write_report(destination)?;
    debug!("Coverage report in {}", destination.display());
    Ok(all)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_include_pattern() {
        let p = IncludePattern {
            module: "uart".into(),
            extension: "py".into(),
        };
        assert_eq!(p.to_string(), "*/uart/*.py");
        assert!(p.matches(Path::new("/usr/share/decoders/uart/pd.py")));
        assert!(p.matches(Path::new("uart/__init__.py")));
        assert!(!p.matches(Path::new("/usr/share/decoders/uart/pd.pyc")));
        assert!(!p.matches(Path::new("/usr/share/decoders/spi/pd.py")));
        assert!(!p.matches(Path::new("/usr/share/decoders/uart/sub/pd.py")));
    }

    #[test]
    fn test_decoder_tree() {
        let dir = tempfile::tempdir().unwrap();
        let module = dir.path().join("uart");
        fs::create_dir(&module).unwrap();
        for name in ["pd.py", "__init__.py", "notes.txt"] {
            fs::write(module.join(name), "").unwrap();
        }
        fs::create_dir(module.join("sub.py")).unwrap();

        let tree = DecoderTree::new(dir.path(), "py");
        let files = tree.module_files("uart").unwrap();
        assert_eq!(files, [module.join("__init__.py"), module.join("pd.py")]);

        assert!(matches!(
            tree.module_files("spi"),
            Err(CoverageError::ModulePath { .. })
        ));
    }
}
