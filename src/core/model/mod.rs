use serde::Serialize;

/// A decoded record: `scores[i]` is the phred score of `seq[i]`.
#[derive(Clone, Copy, Debug)]
pub struct Record<'a> {
    pub id: &'a [u8],
    pub seq: &'a [u8],
    pub scores: &'a [u8],
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum Encoding {
    Sanger,
    Illumina15,
}

impl Encoding {
    pub fn from_offset(offset: u8) -> Self {
        if offset == 64 {
            Encoding::Illumina15
        } else {
            Encoding::Sanger
        }
    }

    pub fn offset(self) -> u8 {
        match self {
            Encoding::Sanger => 33,
            Encoding::Illumina15 => 64,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Encoding::Sanger => "Sanger / Illumina 1.9",
            Encoding::Illumina15 => "Illumina 1.5",
        }
    }
}

pub struct FinalizeContext {
    pub phred_offset: u8,
    pub encoding: Encoding,
    pub file_name: String,
}

impl FinalizeContext {
    pub fn new(phred_offset: u8, file_name: impl Into<String>) -> Self {
        Self {
            phred_offset,
            encoding: Encoding::from_offset(phred_offset),
            file_name: file_name.into(),
        }
    }
}

pub const MAX_Q: usize = 93;

pub fn quantile_from_hist(hist: &[u64], q: f64) -> u8 {
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return 0;
    }
    let rank = ((q * total as f64).ceil() as u64).max(1);
    let mut cum: u64 = 0;
    for (i, &v) in hist.iter().enumerate() {
        cum += v;
        if cum >= rank {
            return i as u8;
        }
    }
    (hist.len() - 1) as u8
}
