use std::collections::BTreeMap;

use anyhow::{anyhow, Result};

use crate::engine::{Decoder, DecoderDefinition, Output, Value};

/// Counts how often each value arrives from the decoder below.
#[derive(Default)]
struct Tally {
    counts: BTreeMap<i64, u32>,
}

impl Decoder for Tally {
    fn decode_stacked(
        &mut self,
        start_sample: u64,
        end_sample: u64,
        data: &Value,
        out: &mut Output<'_, '_>,
    ) -> Result<()> {
        let value = data
            .as_int()
            .ok_or_else(|| anyhow!("expected an integer, got {}", data.repr()))?;
        let count = self.counts.entry(value).or_default();
        *count += 1;
        let count = *count;

        out.annotation(start_sample, end_sample, 0, &[&format!("{value}: {count}")])?;
        out.binary(start_sample, end_sample, 0, &count.to_le_bytes())?;
        out.raw_object(
            start_sample,
            end_sample,
            &Value::Tuple(vec![Value::Int(value), Value::Int(count.into())]),
        )
    }
}

pub fn definition() -> DecoderDefinition {
    DecoderDefinition::new("tally", |_| Ok(Box::<Tally>::default()))
        .describe("Tally", "Occurrences of each value.")
        .outputs(&["tally"])
        .annotation("count", "Count")
        .binary("count", "Count (u32 LE)")
}
