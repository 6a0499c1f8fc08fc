use serde::Serialize;

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct LengthDistRow {
    pub length: usize,
    pub count: u64,
}
