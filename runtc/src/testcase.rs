//! The test case: which decoders to stack, how to wire them, which output to
//! capture and where.

use std::{collections::HashSet, fmt, path::PathBuf, str::FromStr};

use crate::{
    coverage::CountPolicy,
    engine::{OptionValue, OutputKind},
    error::RunError,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelBinding {
    pub name: String,
    pub index: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OptionBinding {
    pub key: String,
    pub value: OptionValue,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DecoderSpec {
    pub id: String,
    pub channels: Vec<ChannelBinding>,
    pub options: Vec<OptionBinding>,
}

impl DecoderSpec {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            channels: Vec::new(),
            options: Vec::new(),
        }
    }
}

/// `decoder:kind[:class]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputSelector {
    pub decoder: String,
    pub kind: OutputKind,
    pub class: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TestCase {
    /// Bottom decoder first.
    pub decoders: Vec<DecoderSpec>,
    pub output: OutputSelector,
    pub input: PathBuf,
    /// `None` writes to standard output.
    pub output_file: Option<PathBuf>,
    /// Coverage is only measured if this is set.
    pub coverage_report: Option<PathBuf>,
    pub coverage_policy: CountPolicy,
}

impl TestCase {
    /// Checks that need nothing but the test case itself.
    pub fn validate(&self) -> Result<(), RunError> {
        if self.decoders.is_empty() {
            return Err(RunError::config("No protocol decoder specified."));
        }
        for spec in &self.decoders {
            let mut seen = HashSet::new();
            for channel in &spec.channels {
                if !seen.insert(channel.name.as_str()) {
                    return Err(RunError::config(format!(
                        "Channel '{}' of decoder {} is bound more than once.",
                        channel.name, spec.id
                    )));
                }
            }
        }
        if !self.decoders.iter().any(|d| d.id == self.output.decoder) {
            return Err(RunError::config(format!(
                "Output decoder {} is not part of the decoder stack.",
                self.output.decoder
            )));
        }
        Ok(())
    }
}

/// Split `key=value`, rejecting anything without exactly one `=`.
fn split_assignment(s: &str) -> Result<(&str, &str), RunError> {
    let mut parts = s.split('=');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(value), None) if !key.is_empty() => Ok((key, value)),
        _ => Err(RunError::config(format!("Syntax error at '{s}'"))),
    }
}

impl FromStr for ChannelBinding {
    type Err = RunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, index) = split_assignment(s)?;
        let index = index
            .trim()
            .parse()
            .map_err(|_| RunError::config(format!("Invalid channel number at '{s}'")))?;
        Ok(Self {
            name: name.to_string(),
            index,
        })
    }
}

impl FromStr for OptionBinding {
    type Err = RunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = split_assignment(s)?;
        Ok(Self {
            key: key.to_string(),
            value: OptionValue::Str(value.to_string()),
        })
    }
}

impl FromStr for OutputKind {
    type Err = RunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "annotation" => Ok(OutputKind::Annotation),
            "binary" => Ok(OutputKind::Binary),
            // An exception test only needs the run to bomb out; any kind will do.
            "raw" | "python" | "exception" => Ok(OutputKind::RawObject),
            _ => Err(RunError::config(format!("Unknown output type '{s}'"))),
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputKind::Annotation => "annotation",
            OutputKind::Binary => "binary",
            OutputKind::RawObject => "raw",
        })
    }
}

impl FromStr for OutputSelector {
    type Err = RunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let (decoder, kind, class) = match parts.as_slice() {
            [decoder, kind] => (decoder, kind, None),
            [decoder, kind, class] => (decoder, kind, Some(class.to_string())),
            _ => return Err(RunError::config(format!("Syntax error at '{s}'"))),
        };
        if decoder.is_empty() {
            return Err(RunError::config(format!("Syntax error at '{s}'")));
        }
        Ok(Self {
            decoder: decoder.to_string(),
            kind: kind.parse()?,
            class,
        })
    }
}
