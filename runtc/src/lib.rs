//! Conformance test driver for protocol decoders.
//!
//! A test case names a stack of decoders (bottom first) with their channel
//! bindings and options, a capture to replay through the stack and the one
//! output to print. Every record the selected instance emits becomes one line:
//!
//! ```text
//! <start>-<end> <instance>: <payload>
//! ```
//!
//! Optionally the line coverage of the decoders' sources is measured around
//! the run and summarised per decoder and for the whole stack.

pub mod channels;
pub mod cli;
pub mod coverage;
pub mod decoders;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod feed;
pub mod logging;
pub mod run;
pub mod stack;
pub mod testcase;

pub use error::{CoverageError, DispatchWriteError, RunError};
pub use run::{execute, run_pipeline, run_testcase, CoverageSetup, RunSummary};
pub use testcase::TestCase;
