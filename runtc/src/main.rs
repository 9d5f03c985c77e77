use std::{io, process::ExitCode};

use log::{debug, error};

use runtc::{
    cli::{self, Invocation},
    coverage::{DecoderTree, LcovTool},
    engine::Registry,
    logging, run, CoverageSetup,
};

fn main() -> ExitCode {
    let matches = cli::command().get_matches();
    logging::init(matches.get_flag("debug"));

    let invocation = match Invocation::from_matches(&matches) {
        Ok(invocation) => invocation,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let registry = Registry::builtin();
    debug!("Decoders: {}", registry.ids().collect::<Vec<_>>().join(", "));

    let mut tool = invocation.coverage_data.as_ref().map(LcovTool::new);
    let tree = invocation
        .decoders_dir
        .as_ref()
        .map(|dir| DecoderTree::new(dir, &invocation.source_ext));
    let setup = match (tool.as_mut(), tree.as_ref()) {
        (Some(tool), Some(modules)) => Some(CoverageSetup { tool, modules }),
        _ => None,
    };

    match run::execute(&registry, &invocation.case, setup, &mut io::stdout()) {
        Ok(summary) => {
            debug!(
                "Decoded {} samples, wrote {} lines ({} failed).",
                summary.samples, summary.lines, summary.write_errors
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
