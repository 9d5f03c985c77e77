use std::{io, slice};

/// Maximum number of bytes an unsigned 64-bit varint occupies (7 bits each).
pub const MAX_VARINT_BYTES: usize = 10;

/// Encode an unsigned LEB128 varint. Return the number of bytes written. There
/// must be enough space in the output; at most `MAX_VARINT_BYTES` are written.
pub fn encode_varint(output: &mut [u8], mut value: u64) -> usize {
    for i in 0..MAX_VARINT_BYTES {
        let mut bits = value as u8 & 0x7F;
        value >>= 7;
        let more = value != 0;
        if more {
            bits |= 0x80;
        }
        output[i] = bits;
        if !more {
            return i + 1;
        }
    }
    MAX_VARINT_BYTES
}

/// Append an unsigned varint to a growable buffer.
pub fn push_varint(output: &mut Vec<u8>, value: u64) {
    let mut buf = [0; MAX_VARINT_BYTES];
    let len = encode_varint(&mut buf, value);
    output.extend_from_slice(&buf[..len]);
}

pub trait VarintReader {
    fn read_varint(&mut self) -> io::Result<u64>;
}

impl<R> VarintReader for R
where
    R: io::Read,
{
    fn read_varint(&mut self) -> io::Result<u64> {
        let mut value: u64 = 0;
        let mut shift = 0;
        loop {
            let mut byte = 0;
            self.read_exact(slice::from_mut(&mut byte))?;

            if shift >= 64 {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "varint overflow"));
            }
            // The 10th byte only has one useful bit; the rest is silently
            // dropped.
            value |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_manual_examples() {
        let mut output: Vec<u8> = vec![0; 10];
        assert_eq!(encode_varint(&mut output, 3141), 2);
        assert_eq!(output, [0xC5, 0x18, 0, 0, 0, 0, 0, 0, 0, 0]);

        let mut output: Vec<u8> = vec![0; 10];
        assert_eq!(encode_varint(&mut output, u64::MAX), 10);
        assert_eq!(output[9], 0x01);
    }

    #[test]
    fn test_read_back() {
        let mut buf = Vec::new();
        for value in [0, 1, 127, 128, 1_000_000, u64::MAX] {
            push_varint(&mut buf, value);
        }
        let mut cursor = Cursor::new(buf);
        for value in [0, 1, 127, 128, 1_000_000, u64::MAX] {
            assert_eq!(cursor.read_varint().unwrap(), value);
        }
        assert!(cursor.read_varint().is_err());
    }

    #[test]
    fn test_overflow() {
        let mut cursor = Cursor::new(vec![0xFF; 11]);
        assert_eq!(
            cursor.read_varint().unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }
}
