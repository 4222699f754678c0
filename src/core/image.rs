// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Packed output image: a sparse address-to-byte map over the 16-bit
//! address space, with the flat-binary and Intel HEX serializers that
//! consume it.

use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Sparse byte image. Ordered storage keeps every serialization
/// deterministic.
#[derive(Debug, Default, Clone)]
pub struct ByteImage {
    bytes: BTreeMap<u32, u8>,
}

impl ByteImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_byte(&mut self, addr: u32, value: u8) {
        self.bytes.insert(addr, value);
    }

    pub fn write_bytes(&mut self, addr: u32, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            self.bytes.insert(addr + i as u32, *b);
        }
    }

    /// Patch a previously written byte. Returns false when nothing was
    /// emitted at that address, which indicates a resolver bug upstream.
    pub fn patch_byte(&mut self, addr: u32, value: u8) -> bool {
        match self.bytes.get_mut(&addr) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn read_byte(&self, addr: u32) -> Option<u8> {
        self.bytes.get(&addr).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// The (min, max) written address range, or None for an empty image.
    pub fn output_range(&self) -> Option<(u16, u16)> {
        let min = *self.bytes.keys().next()?;
        let max = *self.bytes.keys().next_back()?;
        Some((min as u16, max as u16))
    }

    /// Contiguous written ranges as inclusive (start, end) pairs.
    pub fn written_ranges(&self) -> Vec<(u16, u16)> {
        let mut ranges: Vec<(u16, u16)> = Vec::new();
        for (&addr, _) in &self.bytes {
            match ranges.last_mut() {
                Some((_, end)) if *end as u32 + 1 == addr => *end = addr as u16,
                _ => ranges.push((addr as u16, addr as u16)),
            }
        }
        ranges
    }

    /// Flat binary covering `start..=end`, gaps filled with `fill`.
    pub fn to_bin(&self, start: u16, end: u16, fill: u8) -> Vec<u8> {
        if end < start {
            return Vec::new();
        }
        let size = (end - start) as usize + 1;
        let mut mem = vec![fill; size];
        for (&addr, &value) in self.bytes.range(start as u32..=end as u32) {
            mem[(addr - start as u32) as usize] = value;
        }
        mem
    }

    /// Intel HEX text: data records up to 32 bytes, flushed on address
    /// discontinuity, followed by the EOF record. The 16-bit address space
    /// never needs extended-linear-address records.
    pub fn to_hex(&self) -> String {
        let mut out = String::new();
        let mut line_addr: u16 = 0;
        let mut line_bytes: u8 = 0;
        let mut checksum: u8 = 0;
        let mut hex_data = String::new();
        const LINE_LIMIT: usize = 32;

        let entries: Vec<(u32, u8)> = self.bytes.iter().map(|(a, v)| (*a, *v)).collect();
        for (ix, &(addr, val)) in entries.iter().enumerate() {
            if line_bytes == 0 {
                line_addr = addr as u16;
                checksum = 0;
                hex_data.clear();
            }
            let _ = write!(hex_data, "{val:02X}");
            checksum = checksum.wrapping_add(val);
            line_bytes = line_bytes.wrapping_add(1);

            let should_flush = if (line_bytes as usize) >= LINE_LIMIT {
                true
            } else if let Some(&(next_addr, _)) = entries.get(ix + 1) {
                next_addr != addr.wrapping_add(1)
            } else {
                true
            };

            if should_flush {
                checksum = checksum.wrapping_add(line_bytes);
                checksum = checksum.wrapping_add((line_addr >> 8) as u8);
                checksum = checksum.wrapping_add((line_addr & 0xff) as u8);
                checksum = (!checksum).wrapping_add(1);
                let _ = writeln!(
                    out,
                    ":{:02X}{:04X}00{}{:02X}",
                    line_bytes, line_addr, hex_data, checksum
                );
                line_bytes = 0;
            }
        }

        out.push_str(":00000001FF\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verify_record_checksum(record: &str) {
        let payload = record.trim_start_matches(':');
        let bytes: Vec<u8> = (0..payload.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&payload[i..i + 2], 16).expect("hex digits"))
            .collect();
        let sum: u8 = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        assert_eq!(sum, 0, "record checksum must balance: {record}");
    }

    #[test]
    fn written_ranges_split_on_gaps() {
        let mut img = ByteImage::new();
        img.write_bytes(0x0000, &[0x01, 0x02, 0x03]);
        img.write_bytes(0x0010, &[0xAA]);
        assert_eq!(img.written_ranges(), vec![(0x0000, 0x0002), (0x0010, 0x0010)]);
        assert_eq!(img.output_range(), Some((0x0000, 0x0010)));
    }

    #[test]
    fn bin_fills_gaps_with_fill_byte() {
        let mut img = ByteImage::new();
        img.write_byte(0x0000, 0x3E);
        img.write_byte(0x0003, 0xC9);
        assert_eq!(img.to_bin(0, 3, 0xFF), vec![0x3E, 0xFF, 0xFF, 0xC9]);
        assert_eq!(img.to_bin(0, 3, 0x00), vec![0x3E, 0x00, 0x00, 0xC9]);
    }

    #[test]
    fn hex_records_checksum_and_terminate() {
        let mut img = ByteImage::new();
        img.write_bytes(0x0100, &[0x21, 0x00, 0x80, 0xC9]);
        let hex = img.to_hex();
        let mut lines = hex.lines();
        let data = lines.next().expect("data record");
        assert!(data.starts_with(":04010000"));
        verify_record_checksum(data);
        assert_eq!(lines.next(), Some(":00000001FF"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn hex_flushes_on_discontinuity() {
        let mut img = ByteImage::new();
        img.write_byte(0x0000, 0x00);
        img.write_byte(0x0002, 0xC9);
        let hex = img.to_hex();
        let records: Vec<&str> = hex.lines().collect();
        assert_eq!(records.len(), 3);
        assert!(records[0].starts_with(":01000000"));
        assert!(records[1].starts_with(":01000200"));
        for rec in &records {
            verify_record_checksum(rec);
        }
    }

    #[test]
    fn hex_splits_long_runs_at_32_bytes() {
        let mut img = ByteImage::new();
        let run: Vec<u8> = (0..40u8).collect();
        img.write_bytes(0x0000, &run);
        let hex = img.to_hex();
        let records: Vec<&str> = hex.lines().collect();
        assert!(records[0].starts_with(":20000000"));
        assert!(records[1].starts_with(":08002000"));
        for rec in &records {
            verify_record_checksum(rec);
        }
    }

    #[test]
    fn patch_byte_requires_prior_write() {
        let mut img = ByteImage::new();
        img.write_byte(0x0005, 0x00);
        assert!(img.patch_byte(0x0005, 0x42));
        assert_eq!(img.read_byte(0x0005), Some(0x42));
        assert!(!img.patch_byte(0x0006, 0x42));
    }
}
