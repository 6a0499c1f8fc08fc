use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PerBaseQualRow {
    /// 1-based read position.
    pub base: usize,
    pub mean: f64,
    pub coverage: u64,
}
