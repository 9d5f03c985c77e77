mod common;

use std::{fs, io, path::PathBuf};

use runtc::{
    dispatch::ResolvedSelector,
    engine::Registry,
    run::{resolve_output, run_pipeline, run_testcase},
    testcase::{DecoderSpec, OutputSelector, TestCase},
    RunError,
};

const SAMPLES: &[u8] = &[0, 1, 1, 0, 1, 0, 0, 1];

fn selector(registry: &Registry, s: &str) -> ResolvedSelector {
    let selector: OutputSelector = s.parse().unwrap();
    let target = registry.load(&selector.decoder).unwrap();
    ResolvedSelector::resolve(&selector, &target).unwrap()
}

fn decode(specs: &[DecoderSpec], output: &str, chunks: &[&[u8]]) -> String {
    let registry = common::registry();
    let mut capture = common::capture(chunks);
    let mut sink = Vec::new();
    run_pipeline(
        &registry,
        specs,
        selector(&registry, output),
        &mut capture,
        &mut sink,
    )
    .unwrap();
    String::from_utf8(sink).unwrap()
}

fn case(decoders: &[&str], output: &str, input: PathBuf) -> TestCase {
    TestCase {
        decoders: decoders.iter().map(|d| DecoderSpec::new(d)).collect(),
        output: output.parse().unwrap(),
        input,
        output_file: None,
        coverage_report: None,
        coverage_policy: Default::default(),
    }
}

#[test]
fn test_single_decoder_annotations() {
    let out = decode(&[DecoderSpec::new("bits")], "bits:annotation", &[SAMPLES]);
    assert_eq!(
        out,
        "0-1 bits: bit: \"0\"\n\
         1-2 bits: bit: \"1\"\n\
         1-2 bits: edge: \"rise\"\n\
         2-3 bits: bit: \"1\"\n\
         3-4 bits: bit: \"0\"\n\
         4-5 bits: bit: \"1\"\n\
         4-5 bits: edge: \"rise\"\n\
         5-6 bits: bit: \"0\"\n\
         6-7 bits: bit: \"0\"\n\
         7-8 bits: bit: \"1\"\n\
         7-8 bits: edge: \"rise\"\n"
    );
}

#[test]
fn test_annotation_class_filter() {
    let out = decode(&[DecoderSpec::new("bits")], "bits:annotation:edge", &[SAMPLES]);
    assert_eq!(
        out,
        "1-2 bits: edge: \"rise\"\n4-5 bits: edge: \"rise\"\n7-8 bits: edge: \"rise\"\n"
    );
}

#[test]
fn test_stacked_binary_class() {
    let specs = [DecoderSpec::new("bits"), DecoderSpec::new("bytes")];
    let out = decode(&specs, "bytes:binary:first", &[&SAMPLES[..3], &SAMPLES[3..]]);
    assert_eq!(
        out,
        "0-1 bytes: first: 0c\n\
         1-2 bytes: first: ab\n\
         2-3 bytes: first: ab\n\
         3-4 bytes: first: 0c\n\
         4-5 bytes: first: ab\n\
         5-6 bytes: first: 0c\n\
         6-7 bytes: first: 0c\n\
         7-8 bytes: first: ab\n"
    );

    let out = decode(&specs, "bytes:binary", &[&SAMPLES[..1]]);
    assert_eq!(out, "0-1 bytes: first: 0c\n0-1 bytes: second: 0c ff\n");
}

#[test]
fn test_raw_objects() {
    let specs = [DecoderSpec::new("bits"), DecoderSpec::new("bytes")];
    let out = decode(&specs, "bits:python", &[&SAMPLES[..2]]);
    assert_eq!(out, "0-1 bits: 12\n1-2 bits: 171\n");
}

#[test]
fn test_summary_and_failing_sink() {
    struct Closed;
    impl io::Write for Closed {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let registry = common::registry();
    let mut capture = common::capture(&[SAMPLES]);
    let summary = run_pipeline(
        &registry,
        &[DecoderSpec::new("bits")],
        selector(&registry, "bits:annotation:bit"),
        &mut capture,
        &mut Closed,
    )
    .unwrap();
    assert_eq!(summary.samples, 8);
    assert_eq!(summary.lines, 0);
    assert_eq!(summary.write_errors, 8);
}

#[test]
fn test_bad_class_fails_before_io() {
    let dir = tempfile::tempdir().unwrap();
    let mut case = case(
        &["bits", "bytes"],
        "bytes:binary:third",
        dir.path().join("missing.cap"),
    );
    case.output_file = Some(dir.path().join("out.txt"));

    let err = run_testcase(&common::registry(), &case).unwrap_err();
    assert!(matches!(err, RunError::Configuration(_)), "{err}");
    // Neither the sink nor the capture was touched.
    assert!(!dir.path().join("out.txt").exists());
}

#[test]
fn test_fatal_errors() {
    let registry = common::registry();
    let dir = tempfile::tempdir().unwrap();
    let input = common::write_capture(dir.path(), "in.cap", &[SAMPLES]);

    let err = run_testcase(&registry, &case(&["bits", "nope"], "bits:annotation", input.clone()))
        .unwrap_err();
    assert!(matches!(err, RunError::DecoderNotFound(id) if id == "nope"));

    let err = run_testcase(&registry, &case(&["bits"], "bytes:annotation", input.clone()))
        .unwrap_err();
    assert!(matches!(err, RunError::Configuration(_)));

    let err = run_testcase(
        &registry,
        &case(&["bits"], "bits:annotation", dir.path().join("missing.cap")),
    )
    .unwrap_err();
    assert!(matches!(err, RunError::Acquisition(_)));

    fs::write(dir.path().join("junk.cap"), b"not a capture").unwrap();
    let err = run_testcase(
        &registry,
        &case(&["bits"], "bits:annotation", dir.path().join("junk.cap")),
    )
    .unwrap_err();
    assert!(matches!(err, RunError::Acquisition(_)));
}

#[test]
fn test_file_sink() {
    let dir = tempfile::tempdir().unwrap();
    let input = common::write_capture(dir.path(), "in.cap", &[&[1, 1, 2, 2, 2, 1, 0]]);
    let output = dir.path().join("out.txt");
    // Stale content is replaced.
    fs::write(&output, "x".repeat(4096)).unwrap();

    let mut case = case(&["logic", "tally"], "tally:annotation", input);
    case.decoders[0].options.push("format=bin".parse().unwrap());
    case.output_file = Some(output.clone());

    let summary = run_testcase(&Registry::builtin(), &case).unwrap();
    assert_eq!(summary.samples, 7);
    assert_eq!(summary.lines, 3);
    assert_eq!(
        fs::read_to_string(&output).unwrap(),
        "0-2 tally: count: \"1: 1\"\n2-5 tally: count: \"2: 1\"\n5-6 tally: count: \"1: 2\"\n"
    );

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // Only checked for files this run created.
        let fresh = dir.path().join("fresh.txt");
        case.output_file = Some(fresh.clone());
        run_testcase(&Registry::builtin(), &case).unwrap();
        let mode = fs::metadata(&fresh).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }
}

#[test]
fn test_resolve_output() {
    let registry = common::registry();
    let c = case(&["bits", "bytes"], "bytes:binary:second", PathBuf::from("x"));
    assert_eq!(resolve_output(&registry, &c).unwrap().class, Some(1));
}
