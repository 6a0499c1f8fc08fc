use crate::core::decode::{self, PhredOffsetConfig, QualityDecoder};
use crate::core::error::{QcError, Result};
use crate::core::fastq;
use crate::core::io::{self, ChunkData, InputKind, InputSource};
use crate::core::metrics::{Agg, Summary};
use crate::core::model::FinalizeContext;
use crate::core::offset_cache::OffsetCache;
use crate::core::session::{self, Session};
use crossbeam_channel as channel;
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub struct RunConfig {
    /// Input path; `-` reads stdin.
    pub input: PathBuf,
    pub threads: usize,
    pub phred_offset: PhredOffsetConfig,
    pub offset_cache: Option<OffsetCache>,
}

pub struct RunOutput {
    pub agg: Agg,
    pub ctx: FinalizeContext,
}

impl RunOutput {
    pub fn summary(&self) -> Summary {
        self.agg.finalize(&self.ctx)
    }
}

type ChunkResult = (usize, Result<Agg>);

#[derive(Clone, Debug, Default)]
struct ProducerStats {
    chunks: u64,
    bytes: u64,
    decompress: Duration,
    align: Duration,
}

#[derive(Clone, Debug, Default)]
struct WorkerStats {
    chunks: u64,
    reads: u64,
    parse: Duration,
    aggregate: Duration,
}

pub fn run(cfg: RunConfig) -> Result<RunOutput> {
    let t_total = Instant::now();
    let file_name = display_name(&cfg.input);

    let (agg, phred_offset) = if is_stdin(&cfg.input) {
        session::aggregate_reader(io::open_reader(&cfg.input)?, cfg.phred_offset)?
    } else {
        run_file(&cfg)?
    };
    log_stage("engine.total", t_total);
    log::info!(
        "{}: {} reads, {} bases (phred offset {})",
        file_name,
        agg.total_reads,
        agg.total_bases,
        phred_offset
    );

    Ok(RunOutput {
        agg,
        ctx: FinalizeContext::new(phred_offset, file_name),
    })
}

fn run_file(cfg: &RunConfig) -> Result<(Agg, u8)> {
    let path = cfg.input.as_path();
    let kind = io::detect_input_kind(path)?;
    let input_size = fs::metadata(path)?.len();

    let t_phred = Instant::now();
    let phred_offset = match cfg.phred_offset {
        PhredOffsetConfig::Fixed(v) => v,
        PhredOffsetConfig::Auto => resolve_offset(path, kind, cfg)?,
    };
    log_stage("engine.phred_detect", t_phred);

    if input_size == 0 {
        return Ok((Agg::new(), phred_offset));
    }

    let agg = if cfg.threads <= 1 {
        let reader = io::open_reader(path)?;
        session::aggregate_reader(reader, PhredOffsetConfig::Fixed(phred_offset))?.0
    } else {
        run_parallel(
            path,
            cfg.threads,
            QualityDecoder::new(phred_offset),
            io::CHUNK_SIZE,
        )?
    };
    Ok((agg, phred_offset))
}

fn resolve_offset(path: &Path, kind: InputKind, cfg: &RunConfig) -> Result<u8> {
    if let Some(offset) = cfg.offset_cache.as_ref().and_then(|c| c.lookup(path)) {
        log::info!("phred offset {} (cached)", offset);
        return Ok(offset);
    }
    let detector = match kind {
        InputKind::Plain => decode::scan_prefix(BufReader::new(io::open_file(path)?))?,
        InputKind::Gzip => {
            decode::scan_prefix(BufReader::new(io::open_gzip_reader(path, cfg.threads)?))?
        }
    };
    let offset = detector.guess();
    log::info!(
        "phred offset {} (detected from {} reads)",
        offset,
        detector.reads()
    );
    if detector.reads() > 0 {
        if let Some(cache) = &cfg.offset_cache {
            cache.store(path, offset);
        }
    }
    Ok(offset)
}

/// Producer/worker pipeline: one thread cuts record-aligned chunks, workers
/// aggregate each chunk into its own [`Agg`], and the caller merges the parts
/// in chunk order. A failure is reported for the lowest failing chunk, so the
/// error matches what a sequential pass would hit first.
fn run_parallel(
    path: &Path,
    threads: usize,
    decoder: QualityDecoder,
    chunk_size: usize,
) -> Result<Agg> {
    let t_open = Instant::now();
    let (mut input, mmap_source_opt) = InputSource::open(path, threads, chunk_size)?;
    log_stage("engine.input_open", t_open);

    let (chunk_tx, chunk_rx) = channel::bounded::<io::Chunk>(threads * 2);
    let (result_tx, result_rx) = channel::unbounded::<ChunkResult>();
    let (total_tx, total_rx) = channel::bounded::<usize>(1);
    let (prod_stats_tx, prod_stats_rx) = channel::bounded::<ProducerStats>(1);
    let (worker_stats_tx, worker_stats_rx) = channel::unbounded::<WorkerStats>();

    let producer_tx = result_tx.clone();
    let producer = thread::spawn(move || {
        let mut count = 0usize;
        let mut stats = ProducerStats::default();
        loop {
            match input.next_chunk() {
                Ok(Some(chunk)) => {
                    stats.chunks += 1;
                    stats.bytes += chunk.timing.bytes as u64;
                    stats.decompress += chunk.timing.decompress;
                    stats.align += chunk.timing.align;
                    if chunk_tx.send(chunk).is_err() {
                        return;
                    }
                    count += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    // The chunk that could not be cut takes the next index.
                    let _ = producer_tx.send((count, Err(e)));
                    return;
                }
            }
        }
        let _ = total_tx.send(count);
        let _ = prod_stats_tx.send(stats);
    });

    let mut workers = Vec::with_capacity(threads);
    for _ in 0..threads {
        let rx = chunk_rx.clone();
        let tx = result_tx.clone();
        let worker_source = mmap_source_opt.as_ref().map(Arc::clone);
        let stats_tx = worker_stats_tx.clone();
        workers.push(thread::spawn(move || {
            let mut wstats = WorkerStats::default();
            for chunk in rx.iter() {
                let res = match (&chunk.data, &worker_source) {
                    (ChunkData::MmapRange { start, end }, Some(source)) => aggregate_chunk(
                        &source.bytes()[*start..*end],
                        chunk.first_line,
                        decoder,
                        &mut wstats,
                    ),
                    (ChunkData::MmapRange { .. }, None) => Err(QcError::Pipeline(format!(
                        "mmap source missing for chunk {}",
                        chunk.index
                    ))),
                    (ChunkData::Owned(data), _) => {
                        aggregate_chunk(data, chunk.first_line, decoder, &mut wstats)
                    }
                };
                let failed = res.is_err();
                if tx.send((chunk.index, res)).is_err() || failed {
                    break;
                }
            }
            let _ = stats_tx.send(wstats);
        }));
    }
    drop(chunk_rx);
    drop(result_tx);
    drop(worker_stats_tx);

    let t_collect = Instant::now();
    let collected = collect_parts(&total_rx, &result_rx);
    // Unblock the producer and workers before joining them.
    drop(result_rx);
    drop(total_rx);
    let _ = producer.join();
    for worker in workers {
        let _ = worker.join();
    }
    let parts = collected?;

    let t_merge = Instant::now();
    let mut final_agg = Agg::new();
    for part in parts.iter().flatten() {
        final_agg.merge(part);
    }
    let merge_time = t_merge.elapsed();
    log_stage("engine.collect", t_collect);

    let prod_stats = prod_stats_rx.recv().unwrap_or_default();
    let mut worker_stats = WorkerStats::default();
    for ws in worker_stats_rx.iter() {
        worker_stats.chunks += ws.chunks;
        worker_stats.reads += ws.reads;
        worker_stats.parse += ws.parse;
        worker_stats.aggregate += ws.aggregate;
    }
    log::debug!(
        "producer.chunks={} producer.bytes={} producer.decompress={} producer.align={}",
        prod_stats.chunks,
        prod_stats.bytes,
        fmt_dur(prod_stats.decompress),
        fmt_dur(prod_stats.align)
    );
    log::debug!(
        "worker.chunks={} worker.reads={} worker.parse={} worker.aggregate={} reducer.merge={}",
        worker_stats.chunks,
        worker_stats.reads,
        fmt_dur(worker_stats.parse),
        fmt_dur(worker_stats.aggregate),
        fmt_dur(merge_time)
    );

    Ok(final_agg)
}

fn aggregate_chunk(
    slice: &[u8],
    first_line: u64,
    decoder: QualityDecoder,
    stats: &mut WorkerStats,
) -> Result<Agg> {
    let mut reads = Vec::new();
    let t_parse = Instant::now();
    fastq::parse_chunk(slice, first_line, &mut reads)?;
    stats.parse += t_parse.elapsed();

    let t_agg = Instant::now();
    let mut session = Session::new(decoder);
    for read in reads.iter() {
        session.feed(read)?;
    }
    stats.aggregate += t_agg.elapsed();
    stats.chunks += 1;
    stats.reads += reads.len() as u64;
    Ok(session.finish())
}

/// Gathers per-chunk aggregates. Chunks are handed out in index order, so
/// once chunk `k` has failed every chunk below `k` is already with a worker
/// and will report; the lowest failing index is final once those are in.
fn collect_parts(
    total_rx: &channel::Receiver<usize>,
    result_rx: &channel::Receiver<ChunkResult>,
) -> Result<Vec<Option<Agg>>> {
    let never_total = channel::never::<usize>();
    let mut parts: Vec<Option<Agg>> = Vec::new();
    let mut received = 0usize;
    let mut total: Option<usize> = None;
    let mut total_open = true;
    let mut first_err: Option<(usize, QcError)> = None;
    loop {
        if let Some((index, _)) = &first_err {
            let index = *index;
            if parts.len() >= index && parts[..index].iter().all(Option::is_some) {
                return Err(take_error(first_err));
            }
        } else if total == Some(received) {
            return Ok(parts);
        }
        let total_src = if total_open { total_rx } else { &never_total };
        channel::select! {
            recv(total_src) -> msg => {
                total = msg.ok();
                total_open = false;
            },
            recv(result_rx) -> msg => match msg {
                Ok((index, Ok(agg))) => {
                    if parts.len() <= index {
                        parts.resize(index + 1, None);
                    }
                    parts[index] = Some(agg);
                    received += 1;
                }
                Ok((index, Err(err))) => {
                    if first_err.as_ref().is_none_or(|(k, _)| index < *k) {
                        first_err = Some((index, err));
                    }
                }
                // Producer and workers are gone; nothing else will arrive.
                Err(_) => {
                    if first_err.is_some() {
                        return Err(take_error(first_err));
                    }
                    if total.is_none() {
                        total = total_rx.try_recv().ok();
                    }
                    if total != Some(received) {
                        return Err(QcError::Pipeline(
                            "workers stopped before all chunks were processed".to_string(),
                        ));
                    }
                }
            },
        }
    }
}

fn take_error(first_err: Option<(usize, QcError)>) -> QcError {
    match first_err {
        Some((_, err)) => err,
        None => QcError::Pipeline("no chunk error recorded".to_string()),
    }
}

fn is_stdin(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn display_name(path: &Path) -> String {
    if is_stdin(path) {
        return "stdin".to_string();
    }
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub(crate) fn log_stage(name: &str, t: Instant) {
    log::debug!("stage={} time={}", name, fmt_dur(t.elapsed()));
}

pub(crate) fn fmt_dur(d: Duration) -> String {
    if d.as_secs_f64() < 1.0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.3}s", d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fastq(records: &[(&str, &str, &str)]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".fastq").tempfile().unwrap();
        for (id, seq, qual) in records {
            writeln!(file, "@{id}\n{seq}\n+\n{qual}").unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn config(path: &Path, threads: usize) -> RunConfig {
        RunConfig {
            input: path.to_path_buf(),
            threads,
            phred_offset: PhredOffsetConfig::Auto,
            offset_cache: None,
        }
    }

    #[test]
    fn sequential_and_parallel_agree() {
        let records: Vec<(String, String, String)> = (0..500)
            .map(|i| {
                let len = 20 + (i % 37);
                let seq: String = "ACGTN".chars().cycle().skip(i % 5).take(len).collect();
                let qual: String = (0..len).map(|j| (b'#' + ((i + j) % 40) as u8) as char).collect();
                (format!("r{i}"), seq, qual)
            })
            .collect();
        let borrowed: Vec<(&str, &str, &str)> = records
            .iter()
            .map(|(a, b, c)| (a.as_str(), b.as_str(), c.as_str()))
            .collect();
        let file = write_fastq(&borrowed);

        let seq = run(config(file.path(), 1)).unwrap();
        let par = run(config(file.path(), 4)).unwrap();
        assert_eq!(seq.agg.total_reads, 500);
        assert_eq!(seq.agg, par.agg);
        assert_eq!(seq.summary(), par.summary());
    }

    #[test]
    fn empty_file_is_an_empty_summary() {
        let file = write_fastq(&[]);
        let out = run(config(file.path(), 4)).unwrap();
        assert!(out.summary().is_empty());
        assert_eq!(out.ctx.phred_offset, 33);
    }

    #[test]
    fn missing_file_surfaces_unchanged() {
        let err = run(config(Path::new("/no/such/reads.fastq"), 1)).err().unwrap();
        assert!(matches!(err, QcError::InputNotFound { .. }));
    }

    #[test]
    fn parallel_pass_reports_format_errors() {
        let file = write_fastq(&[("a", "ACGT", "IIII"), ("b", "ACGT", "III")]);
        let mut cfg = config(file.path(), 3);
        cfg.phred_offset = PhredOffsetConfig::Fixed(33);
        let err = run(cfg).err().unwrap();
        assert!(matches!(err, QcError::Format { line: 8, .. }));
    }

    #[test]
    fn fixed_offset_skips_detection() {
        let file = write_fastq(&[("a", "AC", "hh")]);
        let mut cfg = config(file.path(), 1);
        cfg.phred_offset = PhredOffsetConfig::Fixed(33);
        let out = run(cfg).unwrap();
        assert_eq!(out.ctx.phred_offset, 33);
        assert_eq!(out.agg.pos_qual_sum, vec![71, 71]);
    }

    #[test]
    fn high_phred33_scores_are_not_read_as_phred64() {
        let file = write_fastq(&[("a", "ACGTA", "IIIII"), ("b", "ACGTACG", "IIIIIII")]);
        for threads in [1, 2] {
            let out = run(config(file.path(), threads)).unwrap();
            assert_eq!(out.ctx.phred_offset, 33);
            assert_eq!(out.agg.total_bases, 12);
            let summary = out.summary();
            let metrics = summary.metrics().unwrap();
            assert_eq!(metrics.mean_quality_at(0), Some(40.0));
            assert_eq!(metrics.mean_quality_at(6), Some(40.0));
        }
    }

    #[test]
    fn earliest_failing_chunk_wins() {
        let records: Vec<(String, String, String)> = (0..200)
            .map(|i| {
                let qual = match i {
                    2 => " IIIIIII".to_string(),
                    150 => "IIIIIII".to_string(),
                    _ => "IIIIIIII".to_string(),
                };
                (format!("r{i:03}"), "ACGTACGT".to_string(), qual)
            })
            .collect();
        let borrowed: Vec<(&str, &str, &str)> = records
            .iter()
            .map(|(a, b, c)| (a.as_str(), b.as_str(), c.as_str()))
            .collect();
        let file = write_fastq(&borrowed);

        for _ in 0..20 {
            let err = run_parallel(file.path(), 4, QualityDecoder::new(33), 64)
                .err()
                .unwrap();
            assert!(
                matches!(err, QcError::Decode { line: 12, column: 1, .. }),
                "{err}"
            );
        }
        let mut cfg = config(file.path(), 1);
        cfg.phred_offset = PhredOffsetConfig::Fixed(33);
        let err = run(cfg).err().unwrap();
        assert!(matches!(err, QcError::Decode { line: 12, column: 1, .. }));
    }

    #[test]
    fn detected_offset_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_fastq(&[("a", "AC", "hh")]);
        let cache = OffsetCache::at(dir.path().join("offsets.json"));
        let mut cfg = config(file.path(), 1);
        cfg.offset_cache = Some(cache.clone());
        let out = run(cfg).unwrap();
        assert_eq!(out.ctx.phred_offset, 64);
        assert_eq!(cache.lookup(file.path()), Some(64));
    }
}
