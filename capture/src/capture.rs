use crate::varint::VarintReader;
use std::{
    collections::HashSet,
    fs::File,
    io::{BufRead, BufReader, Read, Seek},
    path::{Path, PathBuf},
};

use log::{debug, info};

use anyhow::{bail, Context, Result};
use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

#[allow(non_camel_case_types)]
#[derive(FromPrimitive, Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) enum BlockType {
    CAP_BL_HDR = 0,
    CAP_BL_LOGIC = 1,
    CAP_BL_LOGIC_ZLIB = 2,
    CAP_BL_LOGIC_LZ4 = 3,
    CAP_BL_END = 255,
}

pub(crate) const MAGIC: [u8; 4] = *b"LCAP";
pub(crate) const VERSION: u8 = 1;

/// Upper bound for channel names, including the terminator.
const MAX_CHANNEL_NAME: u64 = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    /// Samples per second. `None` if the capture did not record it.
    pub samplerate: Option<u64>,
    /// Bytes per sample. Channel `n` lives in bit `n % 8` of byte `n / 8`.
    pub unit_size: u8,
    /// Channel names in index order.
    pub channels: Vec<String>,
}

/// A run of logic samples, already decompressed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogicBlock {
    pub data: Vec<u8>,
}

/// One item of the replayed data feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Packet<'a> {
    Header(&'a Header),
    Logic(Logic<'a>),
    End,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Logic<'a> {
    pub unit_size: usize,
    pub data: &'a [u8],
}

impl Logic<'_> {
    pub fn num_samples(&self) -> u64 {
        (self.data.len() / self.unit_size) as u64
    }
}

#[derive(Debug)]
pub struct Capture {
    /// File path that this capture was loaded from, if any.
    pub filename: Option<PathBuf>,

    pub header: Header,

    /// Logic blocks in file order.
    pub blocks: Vec<LogicBlock>,
}

trait ReadString {
    fn read_null_terminated_string(&mut self, max_size: u64) -> std::io::Result<String>;
}

impl<R> ReadString for R
where
    R: BufRead,
{
    fn read_null_terminated_string(&mut self, max_size: u64) -> std::io::Result<String> {
        let mut buf = Vec::new();
        self.take(max_size).read_until(0, &mut buf)?;
        // It includes the 0 byte.
        if buf.pop() != Some(0) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "unterminated string",
            ));
        }
        Ok(String::from_utf8_lossy(&buf).to_string())
    }
}

impl Capture {
    pub fn load(filename: &Path) -> Result<Self> {
        let f = File::open(filename)
            .with_context(|| format!("Unable to open capture {}", filename.display()))?;

        let mut capture = Self::from_reader(BufReader::new(f))
            .with_context(|| format!("Invalid capture {}", filename.display()))?;
        capture.filename = Some(filename.to_owned());
        Ok(capture)
    }

    pub fn from_reader(mut reader: impl BufRead + Seek) -> Result<Self> {
        let mut expected_block_types: HashSet<BlockType> = Default::default();
        expected_block_types.insert(BlockType::CAP_BL_HDR);

        let mut header: Option<Header> = None;
        let mut blocks = Vec::new();
        let mut ended = false;

        // Read blocks.
        while let Ok(block_type) = reader.read_u8() {
            let block_type = match BlockType::from_u8(block_type) {
                Some(b) => b,
                None => {
                    bail!("Unknown block type {}", block_type);
                }
            };

            if !expected_block_types.contains(&block_type) {
                bail!(
                    "Unexpected block type {:?}; expected one of {:?}",
                    &block_type,
                    &expected_block_types
                );
            }

            let block_length_position = reader.stream_position()?;

            let block_length_including_length = reader.read_u64::<BigEndian>()?;
            let block_length = block_length_including_length
                .checked_sub(8)
                .context("Invalid block length (must be >= 8).")?;
            let block_end = block_length_position
                .checked_add(block_length_including_length)
                .context("Invalid block length (too large).")?;

            match block_type {
                BlockType::CAP_BL_HDR => {
                    let h = Self::read_header(&mut reader)?;
                    info!(
                        "Capture header: samplerate {:?}, unit size {}, {} channels",
                        h.samplerate,
                        h.unit_size,
                        h.channels.len()
                    );
                    header = Some(h);

                    expected_block_types.remove(&BlockType::CAP_BL_HDR);
                    expected_block_types.insert(BlockType::CAP_BL_LOGIC);
                    expected_block_types.insert(BlockType::CAP_BL_LOGIC_ZLIB);
                    expected_block_types.insert(BlockType::CAP_BL_LOGIC_LZ4);
                    expected_block_types.insert(BlockType::CAP_BL_END);
                }
                BlockType::CAP_BL_LOGIC
                | BlockType::CAP_BL_LOGIC_ZLIB
                | BlockType::CAP_BL_LOGIC_LZ4 => {
                    // `expected_block_types` ensures the header came first.
                    let unit_size = header
                        .as_ref()
                        .context("Logic block before header")?
                        .unit_size as usize;
                    let data = Self::read_logic_block(&mut reader, block_type, block_length)?;
                    if data.len() % unit_size != 0 {
                        bail!(
                            "Logic block of {} bytes is not a whole number of {}-byte samples",
                            data.len(),
                            unit_size
                        );
                    }
                    debug!("Logic block {:?}: {} bytes", block_type, data.len());
                    blocks.push(LogicBlock { data });
                }
                BlockType::CAP_BL_END => {
                    if block_length != 0 {
                        bail!("Invalid end block length {block_length} (should be 0)");
                    }
                    ended = true;
                    expected_block_types.clear();
                }
            }

            // Verify we are at the end of the block.
            let pos = reader.stream_position()?;
            if pos != block_end {
                bail!("Error after reading block {:?} Expected to be at position {} + {} = {}, but actually at {}.",
                    block_type,
                    block_length_position,
                    block_length_including_length,
                    block_end,
                    pos,
                );
            }
        }

        let header = match header {
            Some(h) => h,
            None => {
                bail!("Empty capture");
            }
        };

        if !ended {
            bail!("Missing end block; the capture is truncated");
        }

        Ok(Self {
            filename: None,
            header,
            blocks,
        })
    }

    /// The data feed in replay order: the header, every logic block, then the
    /// end marker.
    pub fn packets(&self) -> impl Iterator<Item = Packet<'_>> {
        let unit_size = self.header.unit_size as usize;
        std::iter::once(Packet::Header(&self.header))
            .chain(self.blocks.iter().map(move |block| {
                Packet::Logic(Logic {
                    unit_size,
                    data: &block.data,
                })
            }))
            .chain(std::iter::once(Packet::End))
    }

    pub fn num_samples(&self) -> u64 {
        let unit_size = self.header.unit_size as usize;
        self.blocks
            .iter()
            .map(|b| (b.data.len() / unit_size) as u64)
            .sum()
    }

    fn read_header(reader: &mut impl BufRead) -> Result<Header> {
        let mut magic = [0; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            bail!("Not a capture file: {:x?}", magic);
        }
        let version = reader.read_u8()?;
        if version != VERSION {
            bail!("Unsupported capture version {version}");
        }
        let unit_size = reader.read_u8()?;
        if unit_size == 0 {
            bail!("Invalid unit size 0");
        }
        let samplerate = match reader.read_varint()? {
            0 => None,
            rate => Some(rate),
        };
        let num_channels = reader.read_varint()?;
        if num_channels > unit_size as u64 * 8 {
            bail!("{num_channels} channels do not fit in {unit_size}-byte samples");
        }
        let channels = (0..num_channels)
            .map(|_| reader.read_null_terminated_string(MAX_CHANNEL_NAME))
            .collect::<std::io::Result<Vec<_>>>()?;
        Ok(Header {
            samplerate,
            unit_size,
            channels,
        })
    }

    fn read_logic_block(
        reader: &mut impl BufRead,
        block_type: BlockType,
        block_length: u64,
    ) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        match block_type {
            BlockType::CAP_BL_LOGIC => {
                reader.take(block_length).read_to_end(&mut data)?;
                if data.len() as u64 != block_length {
                    bail!("Logic block truncated");
                }
            }
            BlockType::CAP_BL_LOGIC_ZLIB => {
                let mut block = reader.take(block_length);
                let uncompressed_length = block.read_varint()?;
                // One byte past the declared length is enough to tell it was wrong.
                ZlibDecoder::new(&mut block)
                    .take(uncompressed_length.saturating_add(1))
                    .read_to_end(&mut data)?;
                if data.len() as u64 > uncompressed_length {
                    bail!(
                        "Couldn't uncompress logic data using ZLib: expected {} bytes, got more",
                        uncompressed_length
                    );
                }
                if (data.len() as u64) < uncompressed_length {
                    bail!(
                        "Couldn't uncompress logic data using ZLib: expected {} bytes, got {}",
                        uncompressed_length,
                        data.len()
                    );
                }
                // Drain anything the decoder left behind so the position check
                // reports it.
                std::io::copy(&mut block, &mut std::io::sink())?;
            }
            BlockType::CAP_BL_LOGIC_LZ4 => {
                let mut block = reader.take(block_length);
                let uncompressed_length = block.read_varint()?;
                let mut compressed = Vec::new();
                block.read_to_end(&mut compressed)?;
                // LZ4 cannot expand data by more than 255x.
                if uncompressed_length > (compressed.len() as u64).saturating_mul(255) + 16 {
                    bail!(
                        "LZ4 logic block claims {} bytes from {} compressed",
                        uncompressed_length,
                        compressed.len()
                    );
                }
                data = lz4_flex::decompress(&compressed, uncompressed_length as usize)?;
            }
            _ => {
                bail!("Internal logic error (invalid block type for logic data)");
            }
        }
        Ok(data)
    }
}
