use flate2::Compression;
use flate2::write::GzEncoder;
use kira_readstats::core::decode::{PhredOffsetConfig, QualityDecoder};
use kira_readstats::core::engine::{self, RunConfig};
use kira_readstats::core::error::QcError;
use kira_readstats::core::fastq::FastqReader;
use kira_readstats::core::metrics::{Agg, Summary};
use kira_readstats::core::session::Session;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Write;
use std::path::Path;

fn random_fastq(seed: u64, reads: usize, offset: u8) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let alphabet = b"ACGTNacgtRY";
    let mut out = Vec::new();
    for i in 0..reads {
        let len = rng.gen_range(0..120);
        out.extend_from_slice(format!("@read{i} extra\n").as_bytes());
        for _ in 0..len {
            out.push(alphabet[rng.gen_range(0..alphabet.len())]);
        }
        out.extend_from_slice(b"\n+\n");
        for _ in 0..len {
            out.push(offset + rng.gen_range(2..41));
        }
        out.push(b'\n');
    }
    out
}

fn write_temp(data: &[u8], suffix: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(data).unwrap();
    file.flush().unwrap();
    file
}

fn run(path: &Path, threads: usize, offset: PhredOffsetConfig) -> Result<engine::RunOutput, QcError> {
    engine::run(RunConfig {
        input: path.to_path_buf(),
        threads,
        phred_offset: offset,
        offset_cache: None,
    })
}

fn aggregate_slices(data: &[u8], cuts: &[usize], offset: u8) -> Agg {
    let mut total = Agg::new();
    let mut start = 0;
    for &end in cuts.iter().chain(std::iter::once(&data.len())) {
        let mut reader = FastqReader::new(&data[start..end]);
        let mut session = Session::new(QualityDecoder::new(offset));
        while let Some(read) = reader.next_record().unwrap() {
            session.feed(&read).unwrap();
        }
        total.merge(&session.finish());
        start = end;
    }
    total
}

/// Byte offsets of record starts, usable as shard boundaries.
fn record_starts(data: &[u8]) -> Vec<usize> {
    data.iter()
        .enumerate()
        .filter(|&(_, &b)| b == b'\n')
        .map(|(i, _)| i + 1)
        .enumerate()
        .filter(|&(n, pos)| (n + 1) % 4 == 0 && pos < data.len())
        .map(|(_, pos)| pos)
        .collect()
}

#[test]
fn thread_count_does_not_change_results() {
    let data = random_fastq(11, 3_000, 33);
    let file = write_temp(&data, ".fastq");
    let baseline = run(file.path(), 1, PhredOffsetConfig::Auto).unwrap();
    assert_eq!(baseline.agg.total_reads, 3_000);
    for threads in [2, 4, 8] {
        let out = run(file.path(), threads, PhredOffsetConfig::Auto).unwrap();
        assert_eq!(out.agg, baseline.agg, "threads={threads}");
        assert_eq!(out.ctx.phred_offset, baseline.ctx.phred_offset);
    }
}

#[test]
fn random_shards_merge_to_the_sequential_aggregate() {
    let data = random_fastq(23, 800, 33);
    let whole = aggregate_slices(&data, &[], 33);
    let starts = record_starts(&data);
    let mut rng = StdRng::seed_from_u64(99);
    for _ in 0..20 {
        let shards = rng.gen_range(1..12);
        let mut cuts: Vec<usize> = (0..shards)
            .map(|_| starts[rng.gen_range(0..starts.len())])
            .collect();
        cuts.sort_unstable();
        cuts.dedup();
        assert_eq!(aggregate_slices(&data, &cuts, 33), whole);
    }
}

#[test]
fn gzip_and_plain_inputs_agree() {
    let data = random_fastq(5, 1_000, 33);
    let plain = write_temp(&data, ".fastq");
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(&data).unwrap();
    let gz = write_temp(&enc.finish().unwrap(), ".fastq.gz");

    let a = run(plain.path(), 4, PhredOffsetConfig::Auto).unwrap();
    let b = run(gz.path(), 4, PhredOffsetConfig::Auto).unwrap();
    let c = run(gz.path(), 1, PhredOffsetConfig::Auto).unwrap();
    assert_eq!(a.agg, b.agg);
    assert_eq!(a.agg, c.agg);
}

#[test]
fn detects_phred64_input() {
    let data = random_fastq(3, 200, 64);
    let file = write_temp(&data, ".fq");
    let out = run(file.path(), 2, PhredOffsetConfig::Auto).unwrap();
    assert_eq!(out.ctx.phred_offset, 64);
    let summary = out.summary();
    let metrics = summary.metrics().unwrap();
    assert_eq!(metrics.basic.encoding, "Illumina 1.5");
    for row in &metrics.per_base_qual {
        assert!(row.mean >= 2.0 && row.mean <= 40.0);
    }
}

#[test]
fn total_bases_is_exact() {
    let data = random_fastq(41, 500, 33);
    let expected: u64 = data
        .split(|&b| b == b'\n')
        .skip(1)
        .step_by(4)
        .map(|l| l.len() as u64)
        .sum();
    let file = write_temp(&data, ".fastq");
    let out = run(file.path(), 3, PhredOffsetConfig::Auto).unwrap();
    assert_eq!(out.agg.total_bases, expected);
    let summary = out.summary();
    let hist_total: u64 = summary
        .metrics()
        .unwrap()
        .length_dist
        .iter()
        .map(|r| r.count)
        .sum();
    assert_eq!(hist_total, 500);
}

#[test]
fn length_mismatch_fails_the_whole_run() {
    let mut data = random_fastq(8, 50, 33);
    data.extend_from_slice(b"@bad\nACGT\n+\nIII\n");
    data.extend_from_slice(&random_fastq(9, 50, 33));
    let file = write_temp(&data, ".fastq");
    for threads in [1, 4] {
        let err = run(file.path(), threads, PhredOffsetConfig::Fixed(33))
            .err()
            .unwrap();
        assert!(
            matches!(err, QcError::Format { line: 204, .. }),
            "threads={threads}: {err}"
        );
    }
}

#[test]
fn truncated_tail_is_reported() {
    let mut data = random_fastq(12, 10, 33);
    data.extend_from_slice(b"@cut\nACGT\n");
    let file = write_temp(&data, ".fastq");
    let err = run(file.path(), 2, PhredOffsetConfig::Fixed(33)).err().unwrap();
    assert!(matches!(err, QcError::TruncatedRecord { line: 41, found: 2 }), "{err}");
}

#[test]
fn empty_and_missing_inputs() {
    let empty = write_temp(b"", ".fastq");
    let out = run(empty.path(), 4, PhredOffsetConfig::Auto).unwrap();
    assert_eq!(out.summary(), Summary::Empty);

    let err = run(Path::new("/nope/reads.fq"), 4, PhredOffsetConfig::Auto)
        .err()
        .unwrap();
    assert!(matches!(err, QcError::InputNotFound { .. }));
    assert_eq!(err.to_string(), "input file not found: /nope/reads.fq");
}
