use serde::Serialize;

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PerSeqQualRow {
    pub mean_q: u8,
    pub count: u64,
}
