pub mod decode;
pub mod engine;
pub mod error;
pub mod fastq;
pub mod io;
pub mod metrics;
pub mod model;
pub mod offset_cache;
pub mod session;
