use crate::core::error::{FormatErrorKind, QcError, Result};
use memchr::memchr;
use std::io::BufRead;

#[derive(Clone, Copy, Debug)]
pub struct ReadView<'a> {
    pub id: &'a [u8],
    pub seq: &'a [u8],
    pub qual: &'a [u8],
    /// 1-based line number of the `@` header.
    pub line: u64,
}

impl ReadView<'_> {
    pub fn qual_line(&self) -> u64 {
        self.line + 3
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OwnedRead {
    pub id: Vec<u8>,
    pub seq: Vec<u8>,
    pub qual: Vec<u8>,
    pub line: u64,
}

impl OwnedRead {
    pub fn from_view(view: &ReadView<'_>) -> Self {
        Self {
            id: view.id.to_vec(),
            seq: view.seq.to_vec(),
            qual: view.qual.to_vec(),
            line: view.line,
        }
    }

    pub fn as_view(&self) -> ReadView<'_> {
        ReadView {
            id: &self.id,
            seq: &self.seq,
            qual: &self.qual,
            line: self.line,
        }
    }
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn validate(header: &[u8], seq: &[u8], sep: &[u8], qual: &[u8], line: u64) -> Result<()> {
    if header.first() != Some(&b'@') {
        return Err(QcError::Format {
            line,
            kind: FormatErrorKind::MissingHeaderSentinel,
        });
    }
    if sep.first() != Some(&b'+') {
        return Err(QcError::Format {
            line: line + 2,
            kind: FormatErrorKind::MissingSeparatorSentinel,
        });
    }
    if seq.len() != qual.len() {
        return Err(QcError::Format {
            line: line + 3,
            kind: FormatErrorKind::LengthMismatch {
                seq_len: seq.len(),
                qual_len: qual.len(),
            },
        });
    }
    Ok(())
}

/// Streaming four-line record reader over any buffered source.
///
/// Holds four reusable line buffers, so memory does not depend on how many
/// records the stream contains. The reader is forward-only: once it reports
/// an error or end of input it yields nothing further.
pub struct FastqReader<R> {
    inner: R,
    lines: u64,
    bufs: [Vec<u8>; 4],
    done: bool,
}

impl<R: BufRead> FastqReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            lines: 0,
            bufs: Default::default(),
            done: false,
        }
    }

    pub fn lines_read(&self) -> u64 {
        self.lines
    }

    pub fn next_record(&mut self) -> Result<Option<ReadView<'_>>> {
        if self.done {
            return Ok(None);
        }
        let line = match self.read_group() {
            Ok(Some(line)) => line,
            Ok(None) => {
                self.done = true;
                return Ok(None);
            }
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };
        let [header, seq, sep, qual] = &self.bufs;
        if let Err(e) = validate(header, seq, sep, qual, line) {
            self.done = true;
            return Err(e);
        }
        let [header, seq, _, qual] = &self.bufs;
        Ok(Some(ReadView {
            id: &header[1..],
            seq,
            qual,
            line,
        }))
    }

    fn fill(&mut self, slot: usize) -> Result<bool> {
        let buf = &mut self.bufs[slot];
        buf.clear();
        let n = self.inner.read_until(b'\n', buf)?;
        if n == 0 {
            return Ok(false);
        }
        self.lines += 1;
        let keep = trim_eol(buf).len();
        buf.truncate(keep);
        Ok(true)
    }

    /// Fills all four buffers and returns the header line number, or `None`
    /// when only blank lines remain.
    fn read_group(&mut self) -> Result<Option<u64>> {
        let mut blank_at = None;
        loop {
            if !self.fill(0)? {
                return Ok(None);
            }
            if !self.bufs[0].is_empty() {
                break;
            }
            blank_at.get_or_insert(self.lines);
        }
        if let Some(line) = blank_at {
            return Err(QcError::Format {
                line,
                kind: FormatErrorKind::MissingHeaderSentinel,
            });
        }
        let start = self.lines;
        for slot in 1..4 {
            if !self.fill(slot)? {
                return Err(QcError::TruncatedRecord {
                    line: start,
                    found: slot as u8,
                });
            }
        }
        Ok(Some(start))
    }
}

impl<R: BufRead> Iterator for FastqReader<R> {
    type Item = Result<OwnedRead>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(Some(view)) => Some(Ok(OwnedRead::from_view(&view))),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

struct LineCursor<'a> {
    data: &'a [u8],
    pos: usize,
    line: u64,
}

impl<'a> Iterator for LineCursor<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.pos >= self.data.len() {
            return None;
        }
        let rest = &self.data[self.pos..];
        let end = memchr(b'\n', rest).map(|i| i + 1).unwrap_or(rest.len());
        self.pos += end;
        self.line += 1;
        Some(trim_eol(&rest[..end]))
    }
}

/// Parses a record-aligned byte range whose first line is `first_line`
/// (1-based) in the whole input. Same rules as [`FastqReader`].
pub fn parse_chunk<'a>(data: &'a [u8], first_line: u64, out: &mut Vec<ReadView<'a>>) -> Result<()> {
    let mut lines = LineCursor {
        data,
        pos: 0,
        line: first_line.saturating_sub(1),
    };
    loop {
        let mut blank_at = None;
        let header = loop {
            match lines.next() {
                None => return Ok(()),
                Some(l) if l.is_empty() => {
                    blank_at.get_or_insert(lines.line);
                }
                Some(l) => break l,
            }
        };
        if let Some(line) = blank_at {
            return Err(QcError::Format {
                line,
                kind: FormatErrorKind::MissingHeaderSentinel,
            });
        }
        let start = lines.line;
        let mut rest: [&[u8]; 3] = [&[]; 3];
        for (i, slot) in rest.iter_mut().enumerate() {
            *slot = lines.next().ok_or(QcError::TruncatedRecord {
                line: start,
                found: i as u8 + 1,
            })?;
        }
        let [seq, sep, qual] = rest;
        validate(header, seq, sep, qual, start)?;
        out.push(ReadView {
            id: &header[1..],
            seq,
            qual,
            line: start,
        });
    }
}
