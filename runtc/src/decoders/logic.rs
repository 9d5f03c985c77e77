use anyhow::{bail, Result};

use crate::engine::{Decoder, DecoderDefinition, OptionValue, Options, Output, Samples, Value};

const NUM_CHANNELS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Hex,
    Bin,
}

/// Reports the value of up to eight channels each time it changes.
struct Logic {
    format: Format,
    /// Value of the current run and the sample it started at.
    run: Option<(u8, u64)>,
}

impl Logic {
    fn new(options: &Options) -> Result<Self> {
        let format = match options.str("format")? {
            "hex" => Format::Hex,
            "bin" => Format::Bin,
            other => bail!("Unknown format '{other}'"),
        };
        Ok(Self { format, run: None })
    }

    fn text(&self, value: u8) -> String {
        match self.format {
            Format::Hex => format!("0x{value:02x}"),
            Format::Bin => format!("0b{value:08b}"),
        }
    }

    fn emit(&self, out: &mut Output<'_, '_>, start: u64, end: u64, value: u8) -> Result<()> {
        out.annotation(start, end, 0, &[&self.text(value)])?;
        out.binary(start, end, 0, &[value])?;
        out.raw_object(start, end, &Value::Int(value.into()))
    }
}

impl Decoder for Logic {
    fn decode(&mut self, samples: &Samples<'_>, out: &mut Output<'_, '_>) -> Result<()> {
        for index in samples.start()..samples.end() {
            let mut value = 0u8;
            for channel in 0..NUM_CHANNELS {
                if samples.level(index, channel).unwrap_or(false) {
                    value |= 1 << channel;
                }
            }
            match self.run {
                Some((current, _)) if current == value => {}
                Some((current, start)) => {
                    self.emit(out, start, index, current)?;
                    self.run = Some((value, index));
                }
                None => self.run = Some((value, index)),
            }
        }
        Ok(())
    }
}

pub fn definition() -> DecoderDefinition {
    let mut def = DecoderDefinition::new("logic", |options| Ok(Box::new(Logic::new(options)?)))
        .describe("Logic", "Value of up to eight logic channels.")
        .outputs(&["logic"]);
    for channel in 0..NUM_CHANNELS {
        def = def.optional_channel(&format!("d{channel}"), &format!("Data bit {channel}"));
    }
    def.option(
        "format",
        "Annotation format",
        OptionValue::Str("hex".into()),
        &[OptionValue::Str("hex".into()), OptionValue::Str("bin".into())],
    )
    .annotation("value", "Value")
    .binary("raw", "Raw value")
}
