use crate::core::error::{QcError, Result};
use crate::core::fastq::{FastqReader, OwnedRead};
use crate::core::model::Encoding;
use std::io::BufRead;

/// Number of leading records inspected when guessing the phred offset.
pub const AUTO_DETECT_READS: usize = 1_000;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PhredOffsetConfig {
    Auto,
    Fixed(u8),
}

/// Tracks the quality byte range over a bounded prefix of records.
#[derive(Clone, Copy, Debug)]
pub struct OffsetDetector {
    min_q: u8,
    max_q: u8,
    reads: usize,
}

impl Default for OffsetDetector {
    fn default() -> Self {
        Self {
            min_q: u8::MAX,
            max_q: 0,
            reads: 0,
        }
    }
}

impl OffsetDetector {
    pub fn observe(&mut self, qual: &[u8]) {
        for &b in qual {
            self.min_q = self.min_q.min(b);
            self.max_q = self.max_q.max(b);
        }
        self.reads += 1;
    }

    pub fn reads(&self) -> usize {
        self.reads
    }

    pub fn is_full(&self) -> bool {
        self.reads >= AUTO_DETECT_READS
    }

    pub fn guess(&self) -> u8 {
        if self.min_q > self.max_q {
            return Encoding::Sanger.offset();
        }
        // Phred+33 tops out at 'J' (74); only bytes above it prove phred+64.
        if self.min_q >= 59 && self.max_q > 74 {
            64
        } else {
            33
        }
    }
}

/// Guesses the offset from the first [`AUTO_DETECT_READS`] records of a
/// re-openable source. The rest of the source is never read.
pub fn scan_prefix<R: BufRead>(reader: R) -> Result<OffsetDetector> {
    let mut records = FastqReader::new(reader);
    let mut detector = OffsetDetector::default();
    while !detector.is_full() {
        match records.next_record()? {
            Some(read) => detector.observe(read.qual),
            None => break,
        }
    }
    Ok(detector)
}

/// Pulls up to [`AUTO_DETECT_READS`] records out of a single-pass stream and
/// returns the guessed offset together with the records to replay.
pub fn detect_with_replay<R: BufRead>(
    records: &mut FastqReader<R>,
) -> Result<(u8, Vec<OwnedRead>)> {
    let mut detector = OffsetDetector::default();
    let mut prefix = Vec::new();
    while !detector.is_full() {
        match records.next_record()? {
            Some(read) => {
                detector.observe(read.qual);
                prefix.push(OwnedRead::from_view(&read));
            }
            None => break,
        }
    }
    Ok((detector.guess(), prefix))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct QualityDecoder {
    offset: u8,
}

impl QualityDecoder {
    pub fn new(offset: u8) -> Self {
        Self { offset }
    }

    /// Decodes `qual` into `out`, replacing its contents. `line` is the
    /// quality line used in error reports.
    pub fn decode_into(&self, qual: &[u8], line: u64, out: &mut Vec<u8>) -> Result<()> {
        out.clear();
        out.reserve(qual.len());
        for (i, &b) in qual.iter().enumerate() {
            if b < self.offset {
                return Err(QcError::Decode {
                    line,
                    column: i + 1,
                    byte: b,
                    offset: self.offset,
                });
            }
            out.push(b - self.offset);
        }
        Ok(())
    }
}
