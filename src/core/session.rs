use crate::core::decode::{PhredOffsetConfig, QualityDecoder, detect_with_replay};
use crate::core::error::Result;
use crate::core::fastq::{FastqReader, ReadView};
use crate::core::metrics::Agg;
use crate::core::model::Record;
use std::io::BufRead;

/// One aggregation pass: a decoder and the aggregate it feeds.
///
/// A session is consumed by [`Session::finish`] once its input has been read
/// to the end. Dropping it on an error abandons the partial aggregate.
pub struct Session {
    decoder: QualityDecoder,
    agg: Agg,
    scores: Vec<u8>,
}

impl Session {
    pub fn new(decoder: QualityDecoder) -> Self {
        Self {
            decoder,
            agg: Agg::new(),
            scores: Vec::new(),
        }
    }

    pub fn records(&self) -> u64 {
        self.agg.total_reads
    }

    /// Decodes and aggregates one record. A decode failure leaves the
    /// aggregate untouched.
    pub fn feed(&mut self, read: &ReadView<'_>) -> Result<()> {
        self.decoder
            .decode_into(read.qual, read.qual_line(), &mut self.scores)?;
        self.agg.update(&Record {
            id: read.id,
            seq: read.seq,
            scores: &self.scores,
        });
        Ok(())
    }

    pub fn finish(self) -> Agg {
        self.agg
    }
}

/// Runs a full sequential pass over `reader` and returns the aggregate with
/// the offset that was used.
///
/// With [`PhredOffsetConfig::Auto`] only the detection prefix is buffered;
/// it is replayed into the session before streaming resumes.
pub fn aggregate_reader<R: BufRead>(reader: R, offset: PhredOffsetConfig) -> Result<(Agg, u8)> {
    let mut records = FastqReader::new(reader);
    let (offset, replay) = match offset {
        PhredOffsetConfig::Fixed(v) => (v, Vec::new()),
        PhredOffsetConfig::Auto => detect_with_replay(&mut records)?,
    };
    let mut session = Session::new(QualityDecoder::new(offset));
    for read in &replay {
        session.feed(&read.as_view())?;
    }
    drop(replay);
    while let Some(read) = records.next_record()? {
        session.feed(&read)?;
    }
    log::debug!(
        "sequential pass done: reads={} lines={}",
        session.records(),
        records.lines_read()
    );
    Ok((session.finish(), offset))
}
