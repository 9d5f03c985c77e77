use std::io::Write;

use anyhow::{bail, Result};
use byteorder::{BigEndian, WriteBytesExt};
use flate2::{write::ZlibEncoder, Compression};

use crate::{
    capture::{BlockType, Header, MAGIC, VERSION},
    varint::push_varint,
};

/// Writes capture files block by block. Blocks are written in the order the
/// methods are called; the reader rejects files that are not
/// header, logic..., end.
pub struct CaptureWriter<W: Write> {
    writer: W,
}

impl<W: Write> CaptureWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn header(&mut self, header: &Header) -> Result<()> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&MAGIC);
        payload.push(VERSION);
        payload.push(header.unit_size);
        push_varint(&mut payload, header.samplerate.unwrap_or(0));
        push_varint(&mut payload, header.channels.len() as u64);
        for name in &header.channels {
            if name.as_bytes().contains(&0) {
                bail!("Channel name {name:?} contains a NUL byte");
            }
            payload.extend_from_slice(name.as_bytes());
            payload.push(0);
        }
        self.block(BlockType::CAP_BL_HDR, &payload)
    }

    pub fn logic(&mut self, data: &[u8]) -> Result<()> {
        self.block(BlockType::CAP_BL_LOGIC, data)
    }

    pub fn logic_zlib(&mut self, data: &[u8]) -> Result<()> {
        let mut payload = Vec::new();
        push_varint(&mut payload, data.len() as u64);
        let mut encoder = ZlibEncoder::new(payload, Compression::default());
        encoder.write_all(data)?;
        let payload = encoder.finish()?;
        self.block(BlockType::CAP_BL_LOGIC_ZLIB, &payload)
    }

    pub fn logic_lz4(&mut self, data: &[u8]) -> Result<()> {
        let mut payload = Vec::new();
        push_varint(&mut payload, data.len() as u64);
        payload.extend_from_slice(&lz4_flex::compress(data));
        self.block(BlockType::CAP_BL_LOGIC_LZ4, &payload)
    }

    pub fn end(&mut self) -> Result<()> {
        self.block(BlockType::CAP_BL_END, &[])?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn block(&mut self, block_type: BlockType, payload: &[u8]) -> Result<()> {
        self.writer.write_u8(block_type as u8)?;
        // The length includes itself.
        self.writer
            .write_u64::<BigEndian>(payload.len() as u64 + 8)?;
        self.writer.write_all(payload)?;
        Ok(())
    }
}
