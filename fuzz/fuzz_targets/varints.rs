#![no_main]

use capture::varint::{encode_varint, VarintReader, MAX_VARINT_BYTES};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|value: u64| {
    let mut output = [0; MAX_VARINT_BYTES];
    let len = encode_varint(&mut output, value);
    assert_eq!((&output[..len]).read_varint().ok(), Some(value));
});
