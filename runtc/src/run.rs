//! Runs one test case from start to finish.

use std::{
    fs::{File, OpenOptions},
    io::{self, BufWriter, Write},
    path::Path,
};

use capture::Capture;
use log::{debug, error};

use crate::{
    coverage::{self, CoverageTool, ModuleSource},
    dispatch::{Dispatcher, ResolvedSelector},
    engine::{Registry, Session},
    error::RunError,
    feed::{AcquisitionFeed, ReplaySource},
    stack::build_stack,
    testcase::{DecoderSpec, TestCase},
};

/// What a completed run did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Samples replayed into the session.
    pub samples: u64,
    /// Lines written to the output sink.
    pub lines: usize,
    /// Lines that could not be written.
    pub write_errors: usize,
}

/// The coverage tool and decoder sources of a run.
pub struct CoverageSetup<'a> {
    pub tool: &'a mut dyn CoverageTool,
    pub modules: &'a dyn ModuleSource,
}

/// Check the output selector against the target decoder's definition.
pub fn resolve_output(registry: &Registry, case: &TestCase) -> Result<ResolvedSelector, RunError> {
    let target = registry.load(&case.output.decoder)?;
    ResolvedSelector::resolve(&case.output, &target)
}

/// Build the decoder stack in a new session, replay the capture into it and
/// write the selected output to `sink`.
pub fn run_pipeline(
    registry: &Registry,
    decoders: &[DecoderSpec],
    selector: ResolvedSelector,
    replay: &mut dyn ReplaySource,
    sink: &mut dyn Write,
) -> Result<RunSummary, RunError> {
    let mut dispatcher = Dispatcher::new(selector, sink);
    let kind = dispatcher.kind();

    let samples = {
        let mut session = Session::new();
        session.register_output(kind, &mut dispatcher);
        let stack = build_stack(registry, &mut session, decoders)?;
        debug!("Built stack of {} instances.", stack.instances.len());

        let mut feed = AcquisitionFeed::new(&mut session);
        replay.replay(&mut |packet| feed.handle(packet))?;
        feed.sample_cursor()
    };

    let mut summary = RunSummary {
        samples,
        lines: dispatcher.written(),
        write_errors: dispatcher.write_errors(),
    };
    if let Err(e) = dispatcher.flush() {
        error!("{e}");
        summary.write_errors += 1;
    }
    Ok(summary)
}

fn open_output(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

/// Run a test case: validate it, open the sink, load the capture and run the
/// pipeline. Nothing is opened until the test case is known to be valid.
pub fn run_testcase(registry: &Registry, case: &TestCase) -> Result<RunSummary, RunError> {
    case.validate()?;
    let selector = resolve_output(registry, case)?;

    let mut sink: Box<dyn Write> = match &case.output_file {
        Some(path) => {
            let file = open_output(path).map_err(|e| {
                RunError::config(format!("Unable to open {} for writing: {e}", path.display()))
            })?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(io::stdout().lock()),
    };

    let mut capture = load_capture(&case.input)?;
    run_pipeline(registry, &case.decoders, selector, &mut capture, &mut sink)
}

fn load_capture(path: &Path) -> Result<Capture, RunError> {
    debug!(target: "sr", "Loading {}", path.display());
    Capture::load(path)
        .map_err(|e| RunError::acquisition(format!("Failed to load {}: {e:#}", path.display())))
}

/// Run a test case with coverage measured around it if a report was asked
/// for. Coverage summary lines go to `coverage_out`. Coverage problems are
/// logged and never change the outcome of the run.
pub fn execute(
    registry: &Registry,
    case: &TestCase,
    setup: Option<CoverageSetup<'_>>,
    coverage_out: &mut dyn Write,
) -> Result<RunSummary, RunError> {
    let measuring = match (&case.coverage_report, setup) {
        (Some(report), Some(setup)) => {
            match coverage::start(setup.tool, setup.modules, &case.decoders) {
                Ok(()) => Some((report, setup)),
                Err(e) => {
                    error!("{e}");
                    None
                }
            }
        }
        (Some(_), None) => {
            error!("No coverage tool available; not measuring coverage.");
            None
        }
        (None, _) => None,
    };

    let result = run_testcase(registry, case);

    if let Some((report, setup)) = measuring {
        if let Err(e) = coverage::report(
            setup.tool,
            setup.modules,
            &case.decoders,
            case.coverage_policy,
            report,
            coverage_out,
        ) {
            error!("{e}");
        }
    }

    result
}
