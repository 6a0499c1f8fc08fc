use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "kira-readstats",
    version,
    about = "Streaming statistics and charts for FASTQ reads"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Clone, Debug)]
pub struct GlobalArgs {
    /// Worker threads; 1 runs a single streaming pass.
    #[arg(long, global = true, default_value_t = num_cpus::get())]
    pub threads: usize,

    #[arg(long, global = true, value_enum, default_value_t = PhredOffsetArg::Auto)]
    pub phred_offset: PhredOffsetArg,

    /// Do not read or update the detected-offset cache.
    #[arg(long, global = true, default_value_t = false)]
    pub no_offset_cache: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print read count, lengths and composition.
    Stats(StatsArgs),
    /// Per-base quality and read length charts.
    Quality(QualityArgs),
    /// Per-base nucleotide composition chart.
    Content(ContentArgs),
    /// Statistics, every chart and a JSON dump of all metrics.
    FullAnalysis(FullAnalysisArgs),
}

#[derive(Parser)]
pub struct StatsArgs {
    /// FASTQ file (plain or gzip), or `-` for stdin.
    pub fastq: PathBuf,

    #[arg(long, value_enum, default_value_t = FormatArg::Text)]
    pub format: FormatArg,
}

#[derive(Parser)]
pub struct QualityArgs {
    pub fastq: PathBuf,

    #[arg(short = 'o', long, default_value = "fastq_quality")]
    pub output_prefix: String,

    /// Also write a PDF next to each SVG.
    #[arg(long, default_value_t = false)]
    pub pdf: bool,
}

#[derive(Parser)]
pub struct ContentArgs {
    pub fastq: PathBuf,

    #[arg(short = 'o', long, default_value = "nucleotide_content.svg")]
    pub output: PathBuf,

    #[arg(long, default_value_t = false)]
    pub pdf: bool,
}

#[derive(Parser)]
pub struct FullAnalysisArgs {
    pub fastq: PathBuf,

    #[arg(short = 'o', long)]
    pub output_prefix: String,

    #[arg(long, default_value_t = false)]
    pub pdf: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum PhredOffsetArg {
    #[value(name = "auto")]
    Auto,
    #[value(name = "33")]
    P33,
    #[value(name = "64")]
    P64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    #[value(name = "text")]
    Text,
    #[value(name = "json")]
    Json,
}
