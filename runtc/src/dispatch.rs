//! Turns the selected decoder's output into the canonical text lines:
//!
//! ```text
//! <start>-<end> <instance>: <payload>
//! ```
//!
//! where the payload is the value's representation for raw objects,
//! `<class>: xx xx ..` for binary output and `<class>: "text" "text" ..` for
//! annotations.

use std::{fmt::Write as _, io::Write};

use log::{debug, error};

use crate::{
    engine::{DecoderDefinition, OutputCallback, OutputData, OutputKind, OutputRecord},
    error::{DispatchWriteError, RunError},
    testcase::OutputSelector,
};

/// An output selector checked against the target decoder's definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedSelector {
    pub decoder: String,
    pub kind: OutputKind,
    /// Index into the decoder's annotation or binary class list.
    pub class: Option<usize>,
}

impl ResolvedSelector {
    /// Resolve the class name, if any, to its index. The first class whose id
    /// matches exactly wins.
    pub fn resolve(
        selector: &OutputSelector,
        decoder: &DecoderDefinition,
    ) -> Result<Self, RunError> {
        let class = match &selector.class {
            None => None,
            Some(name) => {
                let classes = match selector.kind {
                    OutputKind::Annotation => &decoder.annotations,
                    OutputKind::Binary => &decoder.binary,
                    OutputKind::RawObject => {
                        return Err(RunError::config(format!(
                            "Output type {} has no classes (got '{name}').",
                            selector.kind
                        )));
                    }
                };
                let index = classes.iter().position(|c| &c.id == name).ok_or_else(|| {
                    RunError::config(format!(
                        "Output class '{name}' not found in decoder {}.",
                        decoder.id
                    ))
                })?;
                debug!("Class {name} index is {index}");
                Some(index)
            }
        };
        Ok(Self {
            decoder: selector.decoder.clone(),
            kind: selector.kind,
            class,
        })
    }

    pub fn matches(&self, record: &OutputRecord<'_>) -> bool {
        if record.inst_id != self.decoder || record.data.kind() != self.kind {
            return false;
        }
        match (self.class, record.data.class()) {
            (Some(wanted), Some(class)) => wanted == class,
            _ => true,
        }
    }
}

/// Format one record as a line, including the terminating newline.
pub fn format_record(record: &OutputRecord<'_>) -> String {
    let mut line = format!(
        "{}-{} {}: ",
        record.start_sample, record.end_sample, record.inst_id
    );
    match record.data {
        OutputData::RawObject(value) => line.push_str(&value.repr()),
        OutputData::Binary { class, data } => {
            line.push_str(class_id(&record.decoder.binary, class));
            line.push(':');
            for byte in data {
                let _ = write!(line, " {byte:02x}");
            }
        }
        OutputData::Annotation { class, texts } => {
            line.push_str(class_id(&record.decoder.annotations, class));
            line.push(':');
            for text in texts {
                let _ = write!(line, " \"{text}\"");
            }
        }
    }
    line.push('\n');
    line
}

fn class_id(classes: &[crate::engine::ClassDef], index: usize) -> &str {
    classes.get(index).map_or("?", |c| c.id.as_str())
}

/// The output callback of a run: filters records down to the selected
/// instance, kind and class and writes them to the sink. Write failures are
/// logged and counted; the run goes on.
pub struct Dispatcher<'w> {
    selector: ResolvedSelector,
    sink: &'w mut dyn Write,
    written: usize,
    write_errors: usize,
}

impl<'w> Dispatcher<'w> {
    pub fn new(selector: ResolvedSelector, sink: &'w mut dyn Write) -> Self {
        Self {
            selector,
            sink,
            written: 0,
            write_errors: 0,
        }
    }

    pub fn kind(&self) -> OutputKind {
        self.selector.kind
    }

    /// Lines successfully written.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn write_errors(&self) -> usize {
        self.write_errors
    }

    pub fn flush(&mut self) -> Result<(), DispatchWriteError> {
        self.sink.flush().map_err(DispatchWriteError)
    }

    fn write_line(&mut self, line: &str) -> Result<(), DispatchWriteError> {
        self.sink.write_all(line.as_bytes())?;
        Ok(())
    }
}

impl OutputCallback for Dispatcher<'_> {
    fn on_output(&mut self, record: &OutputRecord<'_>) {
        if !self.selector.matches(record) {
            return;
        }
        let line = format_record(record);
        match self.write_line(&line) {
            Ok(()) => {
                self.written += 1;
                debug!("wrote '{}'", line.trim_end());
            }
            Err(e) => {
                self.write_errors += 1;
                error!("{} callback {e}", self.selector.kind);
            }
        }
    }
}
