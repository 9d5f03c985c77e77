//! Command line. The short flags follow the getopt interface of the C test
//! driver so existing test definitions keep working.

use std::path::PathBuf;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};

use crate::{
    coverage::CountPolicy,
    error::RunError,
    testcase::{DecoderSpec, OutputSelector, TestCase},
};

pub fn command() -> Command {
    Command::new("runtc")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Runs a protocol decoder stack over a capture and prints the selected output")
        .arg(
            Arg::new("debug")
                .short('d')
                .action(ArgAction::SetTrue)
                .help("Debug output"),
        )
        .arg(
            Arg::new("decoder")
                .short('P')
                .value_name("DECODER")
                .action(ArgAction::Append)
                .required(true)
                .help("Protocol decoder; each one is stacked on the one before"),
        )
        .arg(
            Arg::new("channel")
                .short('p')
                .value_name("NAME=CHANNEL")
                .action(ArgAction::Append)
                .help("Bind a decoder channel of the preceding -P"),
        )
        .arg(
            Arg::new("option")
                .short('o')
                .value_name("KEY=VALUE")
                .action(ArgAction::Append)
                .help("Set an option of the preceding -P"),
        )
        .arg(
            Arg::new("input")
                .short('i')
                .value_name("CAPTURE")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Capture file to decode"),
        )
        .arg(
            Arg::new("output")
                .short('O')
                .value_name("DECODER:TYPE[:CLASS]")
                .required(true)
                .help("Output to print: annotation, binary or raw"),
        )
        .arg(
            Arg::new("outfile")
                .short('f')
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Write output to FILE instead of stdout"),
        )
        .arg(
            Arg::new("coverage")
                .short('c')
                .value_name("REPORT")
                .value_parser(value_parser!(PathBuf))
                .help("Measure decoder coverage and write the report to REPORT"),
        )
        .arg(
            Arg::new("coverage-sum")
                .long("coverage-sum")
                .action(ArgAction::SetTrue)
                .requires("coverage")
                .help("Sum line counts over all decoders instead of averaging them"),
        )
        .arg(
            Arg::new("decoders-dir")
                .long("decoders-dir")
                .value_name("DIR")
                .env("RUNTC_DECODERS_DIR")
                .value_parser(value_parser!(PathBuf))
                .help("Directory holding one source directory per decoder"),
        )
        .arg(
            Arg::new("source-ext")
                .long("source-ext")
                .value_name("EXT")
                .default_value("py")
                .help("Extension of decoder source files"),
        )
        .arg(
            Arg::new("coverage-data")
                .long("coverage-data")
                .value_name("FILE")
                .env("RUNTC_COVERAGE_DATA")
                .value_parser(value_parser!(PathBuf))
                .help("LCOV tracefile with the decoders' line coverage (read only)"),
        )
}

/// Everything the command line asks for.
#[derive(Clone, Debug, PartialEq)]
pub struct Invocation {
    pub debug: bool,
    pub case: TestCase,
    pub decoders_dir: Option<PathBuf>,
    pub source_ext: String,
    pub coverage_data: Option<PathBuf>,
}

enum Flag<'a> {
    Decoder(&'a str),
    Channel(&'a str),
    Option(&'a str),
}

/// Values of a repeatable argument together with their positions on the
/// command line.
fn positioned<'a>(
    matches: &'a ArgMatches,
    id: &str,
    wrap: fn(&'a str) -> Flag<'a>,
) -> Vec<(usize, Flag<'a>)> {
    match (matches.indices_of(id), matches.get_many::<String>(id)) {
        (Some(indices), Some(values)) => indices.zip(values.map(|v| wrap(v))).collect(),
        _ => Vec::new(),
    }
}

impl Invocation {
    pub fn from_matches(matches: &ArgMatches) -> Result<Self, RunError> {
        let mut flags = positioned(matches, "decoder", Flag::Decoder);
        flags.extend(positioned(matches, "channel", Flag::Channel));
        flags.extend(positioned(matches, "option", Flag::Option));
        flags.sort_by_key(|(index, _)| *index);

        let mut decoders: Vec<DecoderSpec> = Vec::new();
        for (_, flag) in flags {
            match flag {
                Flag::Decoder(id) => decoders.push(DecoderSpec::new(id)),
                Flag::Channel(s) | Flag::Option(s) if decoders.is_empty() => {
                    return Err(RunError::config(format!("Syntax error at '{s}'")));
                }
                Flag::Channel(s) => {
                    if let Some(spec) = decoders.last_mut() {
                        spec.channels.push(s.parse()?);
                    }
                }
                Flag::Option(s) => {
                    if let Some(spec) = decoders.last_mut() {
                        spec.options.push(s.parse()?);
                    }
                }
            }
        }

        let output: OutputSelector = matches
            .get_one::<String>("output")
            .map(|s| s.parse())
            .transpose()?
            .ok_or_else(|| RunError::config("No output specified."))?;
        let input = matches
            .get_one::<PathBuf>("input")
            .cloned()
            .ok_or_else(|| RunError::config("No input file specified."))?;

        let coverage_policy = if matches.get_flag("coverage-sum") {
            CountPolicy::Sum
        } else {
            CountPolicy::Mean
        };

        Ok(Self {
            debug: matches.get_flag("debug"),
            case: TestCase {
                decoders,
                output,
                input,
                output_file: matches.get_one::<PathBuf>("outfile").cloned(),
                coverage_report: matches.get_one::<PathBuf>("coverage").cloned(),
                coverage_policy,
            },
            decoders_dir: matches.get_one::<PathBuf>("decoders-dir").cloned(),
            source_ext: matches
                .get_one::<String>("source-ext")
                .cloned()
                .unwrap_or_else(|| "py".to_string()),
            coverage_data: matches.get_one::<PathBuf>("coverage-data").cloned(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{engine::OptionValue, testcase::ChannelBinding};

    fn parse(args: &[&str]) -> Result<Invocation, RunError> {
        let matches = command()
            .try_get_matches_from(std::iter::once("runtc").chain(args.iter().copied()))
            .unwrap();
        Invocation::from_matches(&matches)
    }

    #[test]
    fn test_command() {
        command().debug_assert();
    }

    #[test]
    fn test_bindings_follow_decoder() {
        let inv = parse(&[
            "-P", "uart", "-p", "rx=0", "-o", "baudrate=115200", "-P", "midi", "-o", "mode=x",
            "-i", "in.cap", "-O", "midi:annotation",
        ])
        .unwrap();
        let decoders = &inv.case.decoders;
        assert_eq!(decoders.len(), 2);
        assert_eq!(decoders[0].id, "uart");
        assert_eq!(decoders[0].channels, [ChannelBinding { name: "rx".into(), index: 0 }]);
        assert_eq!(decoders[0].options[0].value, OptionValue::Str("115200".into()));
        assert_eq!(decoders[1].id, "midi");
        assert!(decoders[1].channels.is_empty());
        assert_eq!(decoders[1].options[0].key, "mode");
        assert_eq!(inv.case.input, PathBuf::from("in.cap"));
        assert_eq!(inv.case.coverage_policy, CountPolicy::Mean);
        assert!(!inv.debug);
    }

    #[test]
    fn test_binding_before_decoder() {
        let err = parse(&["-p", "rx=0", "-P", "uart", "-i", "in.cap", "-O", "uart:annotation"])
            .unwrap_err();
        assert!(matches!(err, RunError::Configuration(msg) if msg == "Syntax error at 'rx=0'"));
    }

    #[test]
    fn test_coverage_flags() {
        let inv = parse(&[
            "-d", "-P", "uart", "-i", "in.cap", "-O", "uart:binary:rx", "-f", "out.txt", "-c",
            "cov.txt", "--coverage-sum", "--decoders-dir", "/dec", "--coverage-data", "t.info",
        ])
        .unwrap();
        assert!(inv.debug);
        assert_eq!(inv.case.output_file, Some(PathBuf::from("out.txt")));
        assert_eq!(inv.case.coverage_report, Some(PathBuf::from("cov.txt")));
        assert_eq!(inv.case.coverage_policy, CountPolicy::Sum);
        assert_eq!(inv.decoders_dir, Some(PathBuf::from("/dec")));
        assert_eq!(inv.coverage_data, Some(PathBuf::from("t.info")));
        assert_eq!(inv.source_ext, "py");
    }

    #[test]
    fn test_missing_required() {
        assert!(command()
            .try_get_matches_from(["runtc", "-P", "uart", "-i", "in.cap"])
            .is_err());
    }
}
