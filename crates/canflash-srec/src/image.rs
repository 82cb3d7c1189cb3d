//! Firmware image built from an S-record file

use std::path::Path;

use tracing::debug;

use crate::checksum::{crc16_modbus, crc32_bzip2};
use crate::error::{SrecError, SrecResult};
use crate::record::{verify_line, RawRecord, RecordType};

/// One contiguous block of firmware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrecordSegment {
    pub start_address: u32,
    pub data: Vec<u8>,
}

impl SrecordSegment {
    pub fn length(&self) -> u32 {
        self.data.len() as u32
    }

    /// Address one past the last byte
    pub fn end_address(&self) -> u32 {
        self.start_address.wrapping_add(self.length())
    }

    /// Checksum the CCP `BUILD_CHKSUM` result is compared against
    pub fn crc16_modbus(&self) -> u16 {
        crc16_modbus(&self.data)
    }

    pub fn crc32(&self) -> u32 {
        crc32_bzip2(&self.data)
    }
}

/// A parsed and segmented S-record image
#[derive(Debug, Clone)]
pub struct SrecordImage {
    describe_info: String,
    segments: Vec<SrecordSegment>,
    program_start_address: u32,
    crc32: u32,
}

impl SrecordImage {
    /// Parse S-record text.
    ///
    /// Every non-empty line is checksum-verified first; only then are the
    /// records interpreted and grouped into segments. Line numbers in errors
    /// are 1-based and count blank lines.
    pub fn parse(text: &str) -> SrecResult<Self> {
        let mut verified = Vec::new();
        let mut last_line = 0;
        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            last_line = line;
            verified.push(verify_line(line, trimmed)?);
        }

        let mut header: Option<RawRecord> = None;
        let mut start: Option<RawRecord> = None;
        let mut data: Vec<RawRecord> = Vec::new();

        for line in verified {
            let record = RawRecord::interpret(line)?;
            match record.record_type {
                RecordType::Header => {
                    if header.is_some() {
                        return Err(SrecError::DuplicateRecord {
                            line: record.line,
                            kind: '0',
                        });
                    }
                    header = Some(record);
                }
                RecordType::StartAddress32 => {
                    if start.is_some() {
                        return Err(SrecError::DuplicateRecord {
                            line: record.line,
                            kind: '7',
                        });
                    }
                    start = Some(record);
                }
                RecordType::Data32 => {
                    if record.data.is_empty() {
                        return Err(SrecError::EmptyDataRecord {
                            line: record.line,
                            address: record.address,
                        });
                    }
                    if let Some(prev) = data.last() {
                        if record.line != prev.line + 1 {
                            return Err(SrecError::NonContiguousLines {
                                line: record.line,
                                previous_line: prev.line,
                            });
                        }
                        if record.address < prev.end_address() {
                            return Err(SrecError::NonMonotonicAddress {
                                line: record.line,
                                address: record.address,
                                previous_end: prev.end_address(),
                            });
                        }
                    }
                    data.push(record);
                }
            }
        }

        if data.is_empty() {
            return Err(SrecError::Empty { line: last_line });
        }
        let start = start.ok_or(SrecError::MissingRecord {
            line: last_line,
            kind: '7',
        })?;

        let describe_info = header
            .map(|h| {
                String::from_utf8_lossy(&h.data)
                    .trim_end_matches(|c: char| c == ' ' || c == '\0')
                    .to_string()
            })
            .unwrap_or_default();

        let segments = build_segments(data);
        let payload: Vec<u8> = segments
            .iter()
            .flat_map(|s| s.data.iter().copied())
            .collect();
        let crc32 = crc32_bzip2(&payload);

        debug!(
            segments = segments.len(),
            bytes = payload.len(),
            crc32 = format!("0x{:08X}", crc32),
            "Parsed S-record image"
        );

        Ok(Self {
            describe_info,
            segments,
            program_start_address: start.address,
            crc32,
        })
    }

    /// Read and parse an S-record file
    pub fn from_file(path: impl AsRef<Path>) -> SrecResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn describe_info(&self) -> &str {
        &self.describe_info
    }

    pub fn segments(&self) -> &[SrecordSegment] {
        &self.segments
    }

    pub fn program_start_address(&self) -> u32 {
        self.program_start_address
    }

    /// CRC-32/BZIP2 over all segment payloads in segment order
    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    /// `crc32` as the big-endian bytes sent to the integrity check routine
    pub fn crc32_bytes(&self) -> [u8; 4] {
        self.crc32.to_be_bytes()
    }

    /// Total payload bytes across all segments
    pub fn total_len(&self) -> usize {
        self.segments.iter().map(|s| s.data.len()).sum()
    }

    /// Raw bytes of the segment starting exactly at `address`.
    ///
    /// Used to read the embedded build fingerprint (EPK).
    pub fn get_epk(&self, address: u32) -> Option<&[u8]> {
        self.segments
            .iter()
            .find(|s| s.start_address == address)
            .map(|s| s.data.as_slice())
    }
}

/// Group address-ordered data records into runs of directly adjacent addresses
fn build_segments(records: Vec<RawRecord>) -> Vec<SrecordSegment> {
    let mut segments: Vec<SrecordSegment> = Vec::new();
    for record in records {
        match segments.last_mut() {
            Some(current) if current.end_address() == record.address => {
                current.data.extend_from_slice(&record.data);
            }
            _ => segments.push(SrecordSegment {
                start_address: record.address,
                data: record.data,
            }),
        }
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::record_checksum;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    const HEADER: &str = "S00F000068656C6C6F202020202000003C";

    fn s3(address: u32, data: &[u8]) -> String {
        let mut bytes = vec![(4 + data.len() + 1) as u8];
        bytes.extend_from_slice(&address.to_be_bytes());
        bytes.extend_from_slice(data);
        let checksum = record_checksum(&bytes);
        format!("S3{}{:02X}", hex::encode_upper(&bytes[..]), checksum)
    }

    fn s7(address: u32) -> String {
        let mut bytes = vec![5u8];
        bytes.extend_from_slice(&address.to_be_bytes());
        let checksum = record_checksum(&bytes);
        format!("S7{}{:02X}", hex::encode_upper(&bytes[..]), checksum)
    }

    fn image_text(data_lines: &[String], start: u32) -> String {
        let mut lines = vec![HEADER.to_string()];
        lines.extend_from_slice(data_lines);
        lines.push(s7(start));
        lines.join("\n")
    }

    #[test]
    fn test_generated_line_checksums_are_valid() {
        let line = s3(0x1000, &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(line, "S30900001000DEADBEEFAE");
        assert_eq!(s7(0x1000), "S70500001000EA");
    }

    #[test]
    fn test_segmentation_splits_on_gap() {
        let text = image_text(
            &[
                s3(0x1000, &[1, 2, 3, 4]),
                s3(0x1004, &[5, 6, 7, 8]),
                s3(0x2000, &[9, 10, 11, 12]),
            ],
            0x1000,
        );

        let image = SrecordImage::parse(&text).unwrap();
        let layout: Vec<(u32, u32)> = image
            .segments()
            .iter()
            .map(|s| (s.start_address, s.length()))
            .collect();
        assert_eq!(layout, vec![(0x1000, 8), (0x2000, 4)]);
        assert_eq!(image.segments()[0].data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(image.total_len(), 12);
    }

    #[test]
    fn test_crc32_over_concatenated_segments() {
        let text = image_text(&[s3(0x1000, b"12345"), s3(0x3000, b"6789")], 0x1000);
        let image = SrecordImage::parse(&text).unwrap();
        assert_eq!(image.segments().len(), 2);
        assert_eq!(image.crc32(), 0xFC89_1918);
        assert_eq!(image.crc32_bytes(), [0xFC, 0x89, 0x19, 0x18]);
    }

    #[test]
    fn test_describe_info_and_start_address() {
        let text = image_text(&[s3(0x8000, &[0xAA])], 0x8000_0100);
        let image = SrecordImage::parse(&text).unwrap();
        assert_eq!(image.describe_info(), "hello");
        assert_eq!(image.program_start_address(), 0x8000_0100);
    }

    #[test]
    fn test_get_epk() {
        let text = image_text(
            &[s3(0x1000, &[0; 4]), s3(0x4000, b"EPK_V1")],
            0x1000,
        );
        let image = SrecordImage::parse(&text).unwrap();
        assert_eq!(image.get_epk(0x4000), Some(&b"EPK_V1"[..]));
        assert_eq!(image.get_epk(0x4001), None);
    }

    #[rstest]
    #[case(0)]
    #[case(3)]
    #[case(12)]
    fn test_corrupted_digit_reports_line(#[case] position: usize) {
        let mut line2 = s3(0x1004, &[5, 6, 7, 8]).into_bytes();
        // Skip the "S3" prefix and flip one hex digit
        let index = 2 + position;
        line2[index] = if line2[index] == b'0' { b'1' } else { b'0' };
        let line2 = String::from_utf8(line2).unwrap();

        let text = image_text(&[s3(0x1000, &[1, 2, 3, 4]), line2], 0x1000);
        match SrecordImage::parse(&text).unwrap_err() {
            SrecError::ChecksumMismatch { line, .. } => assert_eq!(line, 3),
            SrecError::Malformed { line, .. } => assert_eq!(line, 3),
            other => panic!("Expected checksum error, got {:?}", other),
        }
    }

    #[test]
    fn test_checksum_checked_before_record_type() {
        // The unsupported S1 line comes first but the bad checksum on line 3 wins
        let text = format!(
            "{}\nS1051000DEAD5F\n{}\n{}",
            HEADER,
            "S30900001000DEADBEEF00",
            s7(0x1000)
        );
        assert!(matches!(
            SrecordImage::parse(&text).unwrap_err(),
            SrecError::ChecksumMismatch { line: 3, .. }
        ));
    }

    #[test]
    fn test_unsupported_record_type() {
        let text = format!("{}\nS1051000DEAD5F\n{}", HEADER, s7(0x1000));
        assert!(matches!(
            SrecordImage::parse(&text).unwrap_err(),
            SrecError::UnsupportedRecordType { line: 2, kind: '1' }
        ));
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let text = image_text(&[s3(0x1000, &[1, 2]), s3(0x1000, &[3, 4])], 0x1000);
        assert!(matches!(
            SrecordImage::parse(&text).unwrap_err(),
            SrecError::NonMonotonicAddress {
                line: 3,
                address: 0x1000,
                previous_end: 0x1002
            }
        ));
    }

    #[test]
    fn test_empty_data_record_rejected() {
        let text = image_text(&[s3(0x1000, &[]), s3(0x1000, &[3, 4])], 0x1000);
        let err = SrecordImage::parse(&text).unwrap_err();
        assert!(matches!(
            err,
            SrecError::EmptyDataRecord {
                line: 2,
                address: 0x1000
            }
        ));
        assert_eq!(
            err.to_string(),
            "line 2: data record at 0x00001000 carries no data"
        );

        // also when it follows a regular record
        let text = image_text(&[s3(0x1000, &[1, 2]), s3(0x1002, &[])], 0x1000);
        assert!(matches!(
            SrecordImage::parse(&text).unwrap_err(),
            SrecError::EmptyDataRecord { line: 3, .. }
        ));
    }

    #[test]
    fn test_decreasing_address_rejected() {
        let text = image_text(&[s3(0x2000, &[1, 2]), s3(0x1000, &[3, 4])], 0x1000);
        assert!(matches!(
            SrecordImage::parse(&text).unwrap_err(),
            SrecError::NonMonotonicAddress { line: 3, .. }
        ));
    }

    #[test]
    fn test_non_consecutive_data_lines_rejected() {
        let text = format!(
            "{}\n{}\n\n{}\n{}",
            HEADER,
            s3(0x1000, &[1, 2]),
            s3(0x1002, &[3, 4]),
            s7(0x1000)
        );
        assert!(matches!(
            SrecordImage::parse(&text).unwrap_err(),
            SrecError::NonContiguousLines {
                line: 4,
                previous_line: 2
            }
        ));
    }

    #[test]
    fn test_duplicate_header_rejected() {
        let text = format!("{}\n{}\n{}\n{}", HEADER, HEADER, s3(0x1000, &[1]), s7(0x1000));
        assert!(matches!(
            SrecordImage::parse(&text).unwrap_err(),
            SrecError::DuplicateRecord { line: 2, kind: '0' }
        ));
    }

    #[test]
    fn test_missing_start_address() {
        let text = format!("{}\n{}", HEADER, s3(0x1000, &[1]));
        assert!(matches!(
            SrecordImage::parse(&text).unwrap_err(),
            SrecError::MissingRecord { line: 2, kind: '7' }
        ));
    }

    #[test]
    fn test_empty_image() {
        let text = format!("{}\n{}", HEADER, s7(0x1000));
        assert!(matches!(
            SrecordImage::parse(&text).unwrap_err(),
            SrecError::Empty { line: 2 }
        ));
    }

    #[test]
    fn test_segment_crc16() {
        let segment = SrecordSegment {
            start_address: 0,
            data: b"123456789".to_vec(),
        };
        assert_eq!(segment.crc16_modbus(), 0x4B37);
        assert_eq!(segment.end_address(), 9);
    }
}
