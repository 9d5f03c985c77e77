//! Logic analyzer capture files.
//!
//! A capture is a header (sample rate, bytes per sample, channel names)
//! followed by blocks of raw, ZLib or LZ4 compressed logic samples and an end
//! marker. Every block is `[type: u8][length: u64 BE, including itself][payload]`.
//!
//! `Capture::packets` replays a loaded capture as the data feed a decoder
//! session consumes: one header packet, one logic packet per block, one end
//! packet.

pub mod capture;
pub mod varint;
pub mod writer;

pub use capture::{Capture, Header, Logic, LogicBlock, Packet};
pub use writer::CaptureWriter;
