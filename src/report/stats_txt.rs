use crate::core::engine::RunOutput;
use crate::core::metrics::FinalMetrics;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write;
use std::fs;
use std::path::Path;

/// Headline statistics for one input. Every value that has no meaning for an
/// empty input is optional and reported as `n/a` / `null`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsReport {
    pub file: String,
    pub encoding: &'static str,
    pub phred_offset: u8,
    pub sequence_count: u64,
    pub total_bp: u64,
    pub average_length: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub gc_percent: Option<f64>,
    pub n_percent: Option<f64>,
    pub median_read_quality: Option<u8>,
}

impl StatsReport {
    pub fn new(source: &str, output: &RunOutput) -> Self {
        let summary = output.summary();
        let basic = summary.metrics().map(|m| &m.basic);
        Self {
            file: source.to_string(),
            encoding: output.ctx.encoding.label(),
            phred_offset: output.ctx.phred_offset,
            sequence_count: output.agg.total_reads,
            total_bp: output.agg.total_bases,
            average_length: basic.map(|b| round2(b.average_length)),
            min_length: basic.map(|b| b.min_len),
            max_length: basic.map(|b| b.max_len),
            gc_percent: basic.and_then(|b| b.gc_percent).map(round2),
            n_percent: basic.and_then(|b| b.n_percent).map(round2),
            median_read_quality: basic.and_then(|b| b.median_read_quality),
        }
    }
}

pub fn render_text(report: &StatsReport) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "STATISTICS RESULTS:")?;
    writeln!(out, "  File: {}", report.file)?;
    writeln!(out, "  Encoding: {}", report.encoding)?;
    writeln!(out, "  Sequence count: {}", fmt_int(report.sequence_count))?;
    writeln!(
        out,
        "  Average length: {}",
        opt(report.average_length, |v| format!("{:.2} bp", v))
    )?;
    writeln!(out, "  Total data volume: {} bp", fmt_int(report.total_bp))?;
    writeln!(
        out,
        "  Shortest read: {}",
        opt(report.min_length, |v| format!("{} bp", fmt_int(v as u64)))
    )?;
    writeln!(
        out,
        "  Longest read: {}",
        opt(report.max_length, |v| format!("{} bp", fmt_int(v as u64)))
    )?;
    writeln!(
        out,
        "  GC content: {}",
        opt(report.gc_percent, |v| format!("{:.2} %", v))
    )?;
    writeln!(
        out,
        "  N content: {}",
        opt(report.n_percent, |v| format!("{:.2} %", v))
    )?;
    writeln!(
        out,
        "  Median read quality: {}",
        opt(report.median_read_quality, |v| format!("Q{}", v))
    )?;
    Ok(out)
}

pub fn render_json(report: &StatsReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize statistics")
}

/// Dumps every finalized metric table as pretty JSON.
pub fn write_metrics_json(path: &Path, metrics: &FinalMetrics) -> Result<()> {
    let json = serde_json::to_string_pretty(metrics).context("failed to serialize metrics")?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

fn opt<T: Copy>(v: Option<T>, f: impl Fn(T) -> String) -> String {
    v.map(f).unwrap_or_else(|| "n/a".to_string())
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub fn fmt_int(v: u64) -> String {
    let s = v.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);
    let len = s.len();
    for (i, ch) in s.chars().enumerate() {
        if i != 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metrics::Agg;
    use crate::core::model::{FinalizeContext, Record};

    fn output(reads: &[(&[u8], u8)]) -> RunOutput {
        let mut agg = Agg::new();
        for &(seq, q) in reads {
            let scores = vec![q; seq.len()];
            agg.update(&Record {
                id: b"r",
                seq,
                scores: &scores,
            });
        }
        RunOutput {
            agg,
            ctx: FinalizeContext::new(33, "reads.fastq"),
        }
    }

    #[test]
    fn thousands_separator() {
        assert_eq!(fmt_int(0), "0");
        assert_eq!(fmt_int(999), "999");
        assert_eq!(fmt_int(1000), "1,000");
        assert_eq!(fmt_int(1234567), "1,234,567");
    }

    #[test]
    fn text_uses_exact_totals() {
        let out = output(&[(&b"ACGTA"[..], 30), (&b"GC"[..], 20), (&b"AAA"[..], 10)]);
        let report = StatsReport::new("data/reads.fastq", &out);
        let text = render_text(&report).unwrap();
        assert!(text.contains("  File: data/reads.fastq\n"));
        assert!(text.contains("  Sequence count: 3\n"));
        assert!(text.contains("  Average length: 3.33 bp\n"));
        assert!(text.contains("  Total data volume: 10 bp\n"));
        assert!(text.contains("  Shortest read: 2 bp\n"));
        assert!(text.contains("  Longest read: 5 bp\n"));
        assert!(text.contains("  GC content: 40.00 %\n"));
    }

    #[test]
    fn empty_input_prints_placeholders() {
        let report = StatsReport::new("empty.fq", &output(&[]));
        let text = render_text(&report).unwrap();
        assert!(text.contains("  Sequence count: 0\n"));
        assert!(text.contains("  Average length: n/a\n"));
        assert!(text.contains("  GC content: n/a\n"));

        let json: serde_json::Value = serde_json::from_str(&render_json(&report).unwrap()).unwrap();
        assert_eq!(json["sequence_count"], 0);
        assert_eq!(json["total_bp"], 0);
        assert!(json["average_length"].is_null());
        assert!(json["median_read_quality"].is_null());
    }

    #[test]
    fn json_rounds_to_two_decimals() {
        let out = output(&[(&b"AC"[..], 40), (&b"A"[..], 40), (&b"A"[..], 40)]);
        let report = StatsReport::new("x.fq", &out);
        let json: serde_json::Value = serde_json::from_str(&render_json(&report).unwrap()).unwrap();
        assert_eq!(json["average_length"], 1.33);
        assert_eq!(json["median_read_quality"], 40);
        assert_eq!(json["encoding"], "Sanger / Illumina 1.9");
    }

    #[test]
    fn metrics_json_round_trips_through_serde_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        let out = output(&[(&b"ACGT"[..], 30)]);
        let summary = out.summary();
        write_metrics_json(&path, summary.metrics().unwrap()).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(v["basic"]["total_bases"], 4);
        assert_eq!(v["per_base_qual"].as_array().unwrap().len(), 4);
        assert_eq!(v["length_dist"][0]["length"], 4);
    }
}
