use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BasicStats {
    pub file_name: String,
    pub encoding: &'static str,
    pub total_sequences: u64,
    /// Exact sum of read lengths; never derived from the average.
    pub total_bases: u64,
    pub average_length: f64,
    pub min_len: usize,
    pub max_len: usize,
    /// `None` when every read is empty.
    pub gc_percent: Option<f64>,
    pub n_percent: Option<f64>,
    pub median_read_quality: Option<u8>,
}
