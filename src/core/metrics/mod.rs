use crate::core::model::{FinalizeContext, MAX_Q, Record, quantile_from_hist};
use serde::Serialize;
use std::collections::BTreeMap;

mod basic;
mod length_dist;
mod per_base_content;
mod per_base_qual;
mod per_seq_qual;

pub use basic::BasicStats;
pub use length_dist::LengthDistRow;
pub use per_base_content::{BaseCounts, PerBaseContentRow};
pub use per_base_qual::PerBaseQualRow;
pub use per_seq_qual::PerSeqQualRow;

/// Running statistics for one pass (or one shard of a pass).
///
/// All state is integral, so merging shards in any grouping or order yields
/// exactly the aggregate a single sequential pass would have produced.
/// `total_bases` is the authoritative length sum.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Agg {
    pub total_reads: u64,
    pub total_bases: u64,
    pub min_len: usize,
    pub max_len: usize,
    pub pos_qual_sum: Vec<u64>,
    pub pos_qual_count: Vec<u64>,
    pub pos_base: Vec<BaseCounts>,
    pub length_hist: BTreeMap<usize, u64>,
    pub per_seq_mean_q_hist: Vec<u64>,
}

impl Default for Agg {
    fn default() -> Self {
        Self::new()
    }
}

impl Agg {
    pub fn new() -> Self {
        Self {
            total_reads: 0,
            total_bases: 0,
            min_len: usize::MAX,
            max_len: 0,
            pos_qual_sum: Vec::new(),
            pos_qual_count: Vec::new(),
            pos_base: Vec::new(),
            length_hist: BTreeMap::new(),
            per_seq_mean_q_hist: vec![0u64; MAX_Q + 1],
        }
    }

    pub fn positions(&self) -> usize {
        self.pos_qual_count.len()
    }

    // Vec growth doubles capacity, so repeated growth stays amortized O(1)
    // per position; new slots are zero-filled.
    fn grow_to(&mut self, len: usize) {
        if self.pos_qual_sum.len() < len {
            self.pos_qual_sum.resize(len, 0);
            self.pos_qual_count.resize(len, 0);
            self.pos_base.resize(len, BaseCounts::default());
        }
    }

    pub fn update(&mut self, record: &Record<'_>) {
        debug_assert_eq!(record.seq.len(), record.scores.len());
        let len = record.seq.len();
        self.total_reads += 1;
        self.total_bases += len as u64;
        *self.length_hist.entry(len).or_insert(0) += 1;
        self.min_len = self.min_len.min(len);
        self.max_len = self.max_len.max(len);
        if len == 0 {
            return;
        }

        self.grow_to(len);
        let mut sum_q: u64 = 0;
        for (i, (&b, &q)) in record.seq.iter().zip(record.scores).enumerate() {
            self.pos_base[i].add(b);
            self.pos_qual_sum[i] += q as u64;
            self.pos_qual_count[i] += 1;
            sum_q += q as u64;
        }
        let mean_q = (sum_q + (len as u64 / 2)) / len as u64;
        self.per_seq_mean_q_hist[(mean_q as usize).min(MAX_Q)] += 1;
    }

    pub fn merge(&mut self, other: &Agg) {
        self.total_reads += other.total_reads;
        self.total_bases += other.total_bases;
        self.min_len = self.min_len.min(other.min_len);
        self.max_len = self.max_len.max(other.max_len);

        self.grow_to(other.positions());
        for (i, &v) in other.pos_qual_sum.iter().enumerate() {
            self.pos_qual_sum[i] += v;
        }
        for (i, &v) in other.pos_qual_count.iter().enumerate() {
            self.pos_qual_count[i] += v;
        }
        for (i, bc) in other.pos_base.iter().enumerate() {
            self.pos_base[i].add_assign(bc);
        }
        for (&len, &count) in &other.length_hist {
            *self.length_hist.entry(len).or_insert(0) += count;
        }
        for (i, &v) in other.per_seq_mean_q_hist.iter().enumerate() {
            self.per_seq_mean_q_hist[i] += v;
        }
    }

    pub fn finalize(&self, ctx: &FinalizeContext) -> Summary {
        if self.total_reads == 0 {
            return Summary::Empty;
        }

        let mut totals = BaseCounts::default();
        for bc in &self.pos_base {
            totals.add_assign(bc);
        }
        let called = totals.total();
        let percent_of_called = |v: u64| {
            if called == 0 {
                None
            } else {
                Some(v as f64 * 100.0 / called as f64)
            }
        };
        let median_read_quality = if self.total_bases == 0 {
            None
        } else {
            Some(quantile_from_hist(&self.per_seq_mean_q_hist, 0.5))
        };

        let basic = BasicStats {
            file_name: ctx.file_name.clone(),
            encoding: ctx.encoding.label(),
            total_sequences: self.total_reads,
            total_bases: self.total_bases,
            average_length: self.total_bases as f64 / self.total_reads as f64,
            min_len: self.min_len,
            max_len: self.max_len,
            gc_percent: percent_of_called(totals.g + totals.c),
            n_percent: percent_of_called(totals.n),
            median_read_quality,
        };

        let mut per_base_qual = Vec::with_capacity(self.positions());
        let mut per_base_content = Vec::with_capacity(self.positions());
        for (i, &coverage) in self.pos_qual_count.iter().enumerate() {
            if coverage == 0 {
                continue;
            }
            per_base_qual.push(PerBaseQualRow {
                base: i + 1,
                mean: self.pos_qual_sum[i] as f64 / coverage as f64,
                coverage,
            });
            per_base_content.push(PerBaseContentRow::from_counts(
                i + 1,
                &self.pos_base[i],
                coverage,
            ));
        }

        let length_dist = self
            .length_hist
            .iter()
            .map(|(&length, &count)| LengthDistRow { length, count })
            .collect();

        let per_seq_qual = self
            .per_seq_mean_q_hist
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(q, &count)| PerSeqQualRow {
                mean_q: q as u8,
                count,
            })
            .collect();

        Summary::Complete(FinalMetrics {
            basic,
            per_base_qual,
            per_base_content,
            length_dist,
            per_seq_qual,
        })
    }
}

/// Outcome of finalizing a completed pass.
#[derive(Clone, Debug, PartialEq)]
pub enum Summary {
    /// The input was valid but held no records; nothing is defined.
    Empty,
    Complete(FinalMetrics),
}

impl Summary {
    pub fn metrics(&self) -> Option<&FinalMetrics> {
        match self {
            Summary::Empty => None,
            Summary::Complete(m) => Some(m),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Summary::Empty)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FinalMetrics {
    pub basic: BasicStats,
    pub per_base_qual: Vec<PerBaseQualRow>,
    pub per_base_content: Vec<PerBaseContentRow>,
    pub length_dist: Vec<LengthDistRow>,
    pub per_seq_qual: Vec<PerSeqQualRow>,
}

impl FinalMetrics {
    /// Mean quality at 0-based `index`, or `None` if no read covers it.
    pub fn mean_quality_at(&self, index: usize) -> Option<f64> {
        self.per_base_qual
            .binary_search_by_key(&(index + 1), |r| r.base)
            .ok()
            .map(|i| self.per_base_qual[i].mean)
    }

    pub fn content_at(&self, index: usize) -> Option<&PerBaseContentRow> {
        self.per_base_content
            .binary_search_by_key(&(index + 1), |r| r.base)
            .ok()
            .map(|i| &self.per_base_content[i])
    }
}
