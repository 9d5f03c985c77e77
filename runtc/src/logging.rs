use std::io::Write;

use log::{Level, LevelFilter};

/// Where a log record comes from: the decode engine (`srd`), capture
/// handling (`sr`) or the driver itself.
fn scope(target: &str) -> &'static str {
    if target == "srd" {
        "srd"
    } else if target == "sr" || target.starts_with("capture") {
        "sr"
    } else {
        "runtc"
    }
}

/// Prefix a message the way every runtc log line looks. Errors from the
/// driver carry no scope.
pub fn format_line(level: Level, target: &str, message: &str) -> String {
    let scope = scope(target);
    match level {
        Level::Error if scope == "runtc" => format!("Error: {message}"),
        Level::Error => format!("Error: {scope}: {message}"),
        Level::Warn => format!("Warning: {scope}: {message}"),
        Level::Info | Level::Debug | Level::Trace => format!("DBG: {scope}: {message}"),
    }
}

/// Log to stderr. `debug` enables debug messages; `RUST_LOG` overrides both.
pub fn init(debug: bool) {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let result = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format(|buf, record| {
            writeln!(
                buf,
                "{}",
                format_line(record.level(), record.target(), &record.args().to_string())
            )
        })
        .try_init();
    if let Err(e) = result {
        eprintln!("Logging already initialised: {e}");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_prefixes() {
        assert_eq!(format_line(Level::Debug, "runtc::run", "Built"), "DBG: runtc: Built");
        assert_eq!(format_line(Level::Debug, "srd", "Creating"), "DBG: srd: Creating");
        assert_eq!(format_line(Level::Error, "runtc::feed", "Bad"), "Error: Bad");
        assert_eq!(format_line(Level::Error, "srd", "uart: oops"), "Error: srd: uart: oops");
        assert_eq!(
            format_line(Level::Error, "capture::capture", "short read"),
            "Error: sr: short read"
        );
        assert_eq!(format_line(Level::Warn, "srd", "types"), "Warning: srd: types");
    }
}
