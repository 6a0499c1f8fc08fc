use crate::core::error::{QcError, Result};
use flate2::read::MultiGzDecoder;
use gzp::deflate::{Bgzf, Mgzip};
use gzp::par::decompress::ParDecompressBuilder;
use memchr::memchr_iter;
use memmap2::Mmap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const CHUNK_SIZE: usize = 16 * 1024 * 1024;
const GZIP_READ_BUF: usize = 8 * 1024 * 1024;

/// Opens `path`, reporting a missing file as [`QcError::InputNotFound`].
pub fn open_file(path: &Path) -> Result<File> {
    File::open(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => QcError::InputNotFound {
            path: path.to_path_buf(),
            source,
        },
        _ => QcError::Io(source),
    })
}

pub struct MmapSource {
    mmap: Mmap,
}

impl MmapSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = open_file(path)?;
        // SAFETY: read-only file mapping.
        let mmap = unsafe { Mmap::map(&file) }?;
        Ok(Self { mmap })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.mmap
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InputKind {
    Plain,
    Gzip,
}

#[derive(Clone, Debug)]
pub enum ChunkData {
    MmapRange { start: usize, end: usize },
    Owned(Vec<u8>),
}

/// A record-aligned slice of the input.
#[derive(Clone, Debug)]
pub struct Chunk {
    pub index: usize,
    /// 1-based line number of the chunk's first line in the whole input.
    pub first_line: u64,
    pub data: ChunkData,
    pub timing: ChunkTiming,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ChunkTiming {
    pub bytes: usize,
    pub decompress: Duration,
    pub align: Duration,
}

/// Cuts a mapped file into chunks of roughly `chunk_size` bytes, each ending
/// after a multiple of four lines.
pub struct MmapChunker {
    data: Arc<MmapSource>,
    pos: usize,
    lines: u64,
    chunk_size: usize,
    index: usize,
}

impl MmapChunker {
    pub fn new(data: Arc<MmapSource>, chunk_size: usize) -> Self {
        Self {
            data,
            pos: 0,
            lines: 0,
            chunk_size,
            index: 0,
        }
    }

    pub fn next_chunk(&mut self) -> Option<Chunk> {
        let bytes = self.data.bytes();
        let len = bytes.len();
        if self.pos >= len {
            return None;
        }
        let t_align = Instant::now();
        let start = self.pos;
        let target = (start + self.chunk_size).min(len);
        let mut end = len;
        let mut lines: u64 = 0;
        for nl in memchr_iter(b'\n', &bytes[start..]) {
            lines += 1;
            if lines % 4 == 0 && start + nl + 1 >= target {
                end = start + nl + 1;
                break;
            }
        }
        let chunk = Chunk {
            index: self.index,
            first_line: self.lines + 1,
            data: ChunkData::MmapRange { start, end },
            timing: ChunkTiming {
                bytes: end - start,
                decompress: Duration::ZERO,
                align: t_align.elapsed(),
            },
        };
        self.pos = end;
        self.lines += lines;
        self.index += 1;
        Some(chunk)
    }
}

/// Same contract as [`MmapChunker`] over a streaming gzip decoder.
pub struct GzipChunker {
    decoder: Box<dyn Read + Send>,
    buffer: Vec<u8>,
    read_buf: Vec<u8>,
    chunk_size: usize,
    index: usize,
    eof: bool,
    scan_pos: usize,
    nl_count: u64,
    last_cut: usize,
    lines_at_cut: u64,
    lines: u64,
    acc_decompress: Duration,
    acc_align: Duration,
}

impl GzipChunker {
    pub fn open(path: &Path, chunk_size: usize, threads: usize) -> Result<Self> {
        let decoder = open_gzip_reader(path, threads)?;
        Ok(Self {
            decoder,
            buffer: Vec::with_capacity(chunk_size + (chunk_size / 4)),
            read_buf: vec![0u8; GZIP_READ_BUF],
            chunk_size,
            index: 0,
            eof: false,
            scan_pos: 0,
            nl_count: 0,
            last_cut: 0,
            lines_at_cut: 0,
            lines: 0,
            acc_decompress: Duration::ZERO,
            acc_align: Duration::ZERO,
        })
    }

    fn emit(&mut self, data: Vec<u8>, lines: u64) -> Chunk {
        let chunk = Chunk {
            index: self.index,
            first_line: self.lines + 1,
            timing: ChunkTiming {
                bytes: data.len(),
                decompress: self.acc_decompress,
                align: self.acc_align,
            },
            data: ChunkData::Owned(data),
        };
        self.lines += lines;
        self.acc_decompress = Duration::ZERO;
        self.acc_align = Duration::ZERO;
        self.index += 1;
        chunk
    }

    pub fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        loop {
            if (self.buffer.len() >= self.chunk_size || self.eof) && self.last_cut > 0 {
                let tail = self.buffer.split_off(self.last_cut);
                let chunk_bytes = std::mem::replace(&mut self.buffer, tail);
                let lines = self.lines_at_cut;
                self.scan_pos = 0;
                self.nl_count = 0;
                self.last_cut = 0;
                self.lines_at_cut = 0;
                return Ok(Some(self.emit(chunk_bytes, lines)));
            }

            if self.eof {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                // Unaligned remainder: a final line without a newline, trailing
                // blank lines or a truncated record. The parser sorts it out.
                let rest = std::mem::take(&mut self.buffer);
                let lines = self.nl_count;
                self.scan_pos = 0;
                self.nl_count = 0;
                return Ok(Some(self.emit(rest, lines)));
            }

            let t_read = Instant::now();
            let n = self.decoder.read(&mut self.read_buf)?;
            self.acc_decompress += t_read.elapsed();
            if n == 0 {
                self.eof = true;
                continue;
            }
            self.buffer.extend_from_slice(&self.read_buf[..n]);

            let t_align = Instant::now();
            for nl in memchr_iter(b'\n', &self.buffer[self.scan_pos..]) {
                self.nl_count += 1;
                if self.nl_count % 4 == 0 {
                    self.last_cut = self.scan_pos + nl + 1;
                    self.lines_at_cut = self.nl_count;
                }
            }
            self.scan_pos = self.buffer.len();
            self.acc_align += t_align.elapsed();
        }
    }
}

pub enum InputSource {
    Mmap { chunker: MmapChunker },
    Gzip { chunker: GzipChunker },
}

impl InputSource {
    /// `chunk_size` is a target; chunks run on to the next record boundary.
    pub fn open(
        path: &Path,
        threads: usize,
        chunk_size: usize,
    ) -> Result<(Self, Option<Arc<MmapSource>>)> {
        match detect_input_kind(path)? {
            InputKind::Plain => {
                let source = Arc::new(MmapSource::open(path)?);
                let chunker = MmapChunker::new(Arc::clone(&source), chunk_size);
                Ok((InputSource::Mmap { chunker }, Some(source)))
            }
            InputKind::Gzip => {
                let chunker = GzipChunker::open(path, chunk_size, threads)?;
                Ok((InputSource::Gzip { chunker }, None))
            }
        }
    }

    pub fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        match self {
            InputSource::Mmap { chunker } => Ok(chunker.next_chunk()),
            InputSource::Gzip { chunker } => chunker.next_chunk(),
        }
    }
}

pub fn detect_input_kind(path: &Path) -> Result<InputKind> {
    if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
        if ext.eq_ignore_ascii_case("gz") {
            return Ok(InputKind::Gzip);
        }
    }
    let mut file = open_file(path)?;
    let mut magic = [0u8; 2];
    let n = file.read(&mut magic)?;
    if n == 2 && magic == [0x1f, 0x8b] {
        Ok(InputKind::Gzip)
    } else {
        Ok(InputKind::Plain)
    }
}

#[derive(Clone, Copy, Debug)]
enum GzipVariant {
    Standard,
    Mgzip,
    Bgzf,
}

fn detect_gzip_variant(path: &Path) -> Result<GzipVariant> {
    let mut file = open_file(path)?;
    let mut header = [0u8; 20];
    let n = file.read(&mut header)?;
    if n < 14 {
        return Ok(GzipVariant::Standard);
    }
    if header[0] != 0x1f || header[1] != 0x8b {
        return Ok(GzipVariant::Standard);
    }
    if header[3] & 4 == 0 {
        return Ok(GzipVariant::Standard);
    }
    if header[12] == b'B' && header[13] == b'C' {
        return Ok(GzipVariant::Bgzf);
    }
    if header[12] == b'I' && header[13] == b'G' {
        return Ok(GzipVariant::Mgzip);
    }
    Ok(GzipVariant::Standard)
}

pub fn open_gzip_reader(path: &Path, threads: usize) -> Result<Box<dyn Read + Send>> {
    let variant = detect_gzip_variant(path)?;
    let reader = BufReader::new(open_file(path)?);
    let reader: Box<dyn Read + Send> = match variant {
        GzipVariant::Bgzf if threads > 1 => Box::new(
            ParDecompressBuilder::<Bgzf>::new()
                .num_threads(threads)
                .map_err(|e| QcError::Decompress(e.to_string()))?
                .from_reader(reader),
        ),
        GzipVariant::Mgzip if threads > 1 => Box::new(
            ParDecompressBuilder::<Mgzip>::new()
                .num_threads(threads)
                .map_err(|e| QcError::Decompress(e.to_string()))?
                .from_reader(reader),
        ),
        _ => Box::new(MultiGzDecoder::new(reader)),
    };
    Ok(reader)
}

/// Opens a file (plain or gzip) or stdin (`-`) as a buffered line source for
/// the sequential reader.
pub fn open_reader(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    if path.as_os_str() == "-" {
        return sniff_gzip(BufReader::new(io::stdin()));
    }
    match detect_input_kind(path)? {
        InputKind::Plain => Ok(Box::new(BufReader::new(open_file(path)?))),
        InputKind::Gzip => Ok(Box::new(BufReader::new(open_gzip_reader(path, 1)?))),
    }
}

/// Wraps a non-seekable stream in a gzip decoder when it starts with the gzip
/// magic bytes. Nothing is consumed while peeking.
pub fn sniff_gzip<R: BufRead + Send + 'static>(mut reader: R) -> Result<Box<dyn BufRead + Send>> {
    let head = reader.fill_buf()?;
    if head.starts_with(&[0x1f, 0x8b]) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}
