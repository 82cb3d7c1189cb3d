//! Single S-record line decoding

use crate::checksum::record_checksum;
use crate::error::{SrecError, SrecResult};

/// Record types this parser accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// S0 - header, data holds the describe info
    Header,
    /// S3 - data with a 32-bit address
    Data32,
    /// S7 - program start address, 32-bit
    StartAddress32,
}

impl RecordType {
    fn from_kind(line: usize, kind: char) -> SrecResult<Self> {
        match kind {
            '0' => Ok(Self::Header),
            '3' => Ok(Self::Data32),
            '7' => Ok(Self::StartAddress32),
            other => Err(SrecError::UnsupportedRecordType { line, kind: other }),
        }
    }

    /// Width of the address field in bytes
    pub fn address_len(&self) -> usize {
        match self {
            Self::Header => 2,
            Self::Data32 | Self::StartAddress32 => 4,
        }
    }

    pub fn kind(&self) -> char {
        match self {
            Self::Header => '0',
            Self::Data32 => '3',
            Self::StartAddress32 => '7',
        }
    }
}

/// A checksum-verified line whose type has not been interpreted yet
#[derive(Debug, Clone)]
pub(crate) struct VerifiedLine {
    pub line: usize,
    pub kind: char,
    /// Address and data bytes (length byte and checksum stripped)
    pub body: Vec<u8>,
}

/// Decode the hex body of a line and verify its checksum.
///
/// Only the framing is checked here; the record type is interpreted later so
/// that every line of a file is checksum-verified before any is used.
pub(crate) fn verify_line(line: usize, text: &str) -> SrecResult<VerifiedLine> {
    let mut chars = text.chars();
    if chars.next() != Some('S') {
        return Err(SrecError::Malformed {
            line,
            reason: "record does not start with 'S'".to_string(),
        });
    }
    let kind = chars.next().ok_or_else(|| SrecError::Malformed {
        line,
        reason: "missing record type".to_string(),
    })?;

    let bytes = hex::decode(&text[1 + kind.len_utf8()..]).map_err(|e| SrecError::Malformed {
        line,
        reason: format!("invalid hex: {}", e),
    })?;

    let Some((&count, rest)) = bytes.split_first() else {
        return Err(SrecError::Malformed {
            line,
            reason: "missing byte count".to_string(),
        });
    };
    if rest.len() != count as usize || rest.is_empty() {
        return Err(SrecError::Malformed {
            line,
            reason: format!(
                "byte count 0x{:02X} does not match {} bytes on the line",
                count,
                rest.len()
            ),
        });
    }

    let actual = bytes[bytes.len() - 1];
    let expected = record_checksum(&bytes[..bytes.len() - 1]);
    if expected != actual {
        return Err(SrecError::ChecksumMismatch {
            line,
            expected,
            actual,
        });
    }

    Ok(VerifiedLine {
        line,
        kind,
        body: bytes[1..bytes.len() - 1].to_vec(),
    })
}

/// An interpreted record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// 1-based source line
    pub line: usize,
    pub record_type: RecordType,
    pub address: u32,
    pub data: Vec<u8>,
}

impl RawRecord {
    pub(crate) fn interpret(verified: VerifiedLine) -> SrecResult<Self> {
        let record_type = RecordType::from_kind(verified.line, verified.kind)?;
        let addr_len = record_type.address_len();
        if verified.body.len() < addr_len {
            return Err(SrecError::Malformed {
                line: verified.line,
                reason: format!("record shorter than its {}-byte address", addr_len),
            });
        }

        let address = verified.body[..addr_len]
            .iter()
            .fold(0u32, |acc, b| (acc << 8) | *b as u32);

        Ok(Self {
            line: verified.line,
            record_type,
            address,
            data: verified.body[addr_len..].to_vec(),
        })
    }

    /// Address one past the last data byte
    pub fn end_address(&self) -> u32 {
        self.address.wrapping_add(self.data.len() as u32)
    }
}
