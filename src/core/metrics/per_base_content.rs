use serde::Serialize;

/// Base calls seen at one read position. Lowercase is folded to uppercase;
/// IUPAC ambiguity codes and anything else land in `other`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BaseCounts {
    pub a: u64,
    pub c: u64,
    pub g: u64,
    pub t: u64,
    pub n: u64,
    pub other: u64,
}

impl BaseCounts {
    pub fn add(&mut self, b: u8) {
        match b & 0xDF {
            b'A' => self.a += 1,
            b'C' => self.c += 1,
            b'G' => self.g += 1,
            b'T' => self.t += 1,
            b'N' => self.n += 1,
            _ => self.other += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.a + self.c + self.g + self.t + self.n + self.other
    }

    pub fn add_assign(&mut self, other: &BaseCounts) {
        self.a += other.a;
        self.c += other.c;
        self.g += other.g;
        self.t += other.t;
        self.n += other.n;
        self.other += other.other;
    }
}

/// Fraction of reads covering `base` that carry each symbol.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PerBaseContentRow {
    pub base: usize,
    pub a: f64,
    pub c: f64,
    pub g: f64,
    pub t: f64,
    pub n: f64,
    pub other: f64,
}

impl PerBaseContentRow {
    pub fn from_counts(base: usize, counts: &BaseCounts, coverage: u64) -> Self {
        let d = coverage as f64;
        Self {
            base,
            a: counts.a as f64 / d,
            c: counts.c as f64 / d,
            g: counts.g as f64 / d,
            t: counts.t as f64 / d,
            n: counts.n as f64 / d,
            other: counts.other as f64 / d,
        }
    }

    pub fn sum(&self) -> f64 {
        self.a + self.c + self.g + self.t + self.n + self.other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_case_and_buckets_ambiguity_codes() {
        let mut counts = BaseCounts::default();
        for &b in b"AaCcGgTtNnRYSWKMBDHV-*" {
            counts.add(b);
        }
        assert_eq!((counts.a, counts.c, counts.g, counts.t, counts.n), (2, 2, 2, 2, 2));
        assert_eq!(counts.other, 12);
        assert_eq!(counts.total(), 22);
    }

    #[test]
    fn non_letters_never_alias_bases() {
        let mut counts = BaseCounts::default();
        for b in 0u8..=255 {
            if !b"ACGTNacgtn".contains(&b) {
                counts.add(b);
            }
        }
        assert_eq!(counts.total(), counts.other);
    }

    #[test]
    fn fractions_sum_to_one() {
        let mut counts = BaseCounts::default();
        for &b in b"ACGTTX" {
            counts.add(b);
        }
        let row = PerBaseContentRow::from_counts(1, &counts, counts.total());
        assert!((row.sum() - 1.0).abs() < 1e-12);
        assert!((row.t - 2.0 / 6.0).abs() < 1e-12);
    }
}
