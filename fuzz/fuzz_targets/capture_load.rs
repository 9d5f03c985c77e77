#![no_main]

use std::io::Cursor;

use capture::Capture;
use libfuzzer_sys::fuzz_target;

// Any input either fails to load or replays without panicking.
fuzz_target!(|data: &[u8]| {
    if let Ok(capture) = Capture::from_reader(Cursor::new(data)) {
        let samples: u64 = capture
            .packets()
            .map(|packet| match packet {
                capture::Packet::Logic(logic) => logic.num_samples(),
                _ => 0,
            })
            .sum();
        assert_eq!(samples, capture.num_samples());
    }
});
