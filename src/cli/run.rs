use crate::cli::args::{
    Cli, Commands, ContentArgs, FormatArg, FullAnalysisArgs, GlobalArgs, PhredOffsetArg,
    QualityArgs, StatsArgs,
};
use crate::core::decode::PhredOffsetConfig;
use crate::core::engine::{self, RunConfig, RunOutput, log_stage};
use crate::core::metrics::{FinalMetrics, Summary};
use crate::core::offset_cache::OffsetCache;
use crate::report::chart;
use crate::report::stats_txt::{self, StatsReport};
use anyhow::{Result, bail};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

pub fn entry() -> ExitCode {
    let cli = Cli::parse();
    init_logging();
    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::debug!("{:?}", err);
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .try_init();
}

fn dispatch(cli: Cli) -> Result<()> {
    let t0 = Instant::now();
    let res = match cli.command {
        Commands::Stats(args) => stats(&cli.global, args),
        Commands::Quality(args) => quality(&cli.global, args),
        Commands::Content(args) => content(&cli.global, args),
        Commands::FullAnalysis(args) => full_analysis(&cli.global, args),
    };
    log_stage("total", t0);
    res
}

fn stats(global: &GlobalArgs, args: StatsArgs) -> Result<()> {
    log::info!("analyzing statistics for {}", args.fastq.display());
    let output = analyze(global, &args.fastq)?;
    let report = StatsReport::new(&source_label(&args.fastq), &output);
    let text = match args.format {
        FormatArg::Text => stats_txt::render_text(&report)?,
        FormatArg::Json => stats_txt::render_json(&report)?,
    };
    println!("{}", text.trim_end());
    Ok(())
}

fn quality(global: &GlobalArgs, args: QualityArgs) -> Result<()> {
    log::info!("quality analysis for {}", args.fastq.display());
    let output = analyze(global, &args.fastq)?;
    println!(
        "  Processing {} sequences...",
        stats_txt::fmt_int(output.agg.total_reads)
    );
    let summary = output.summary();
    let Some(metrics) = charted_metrics(&summary, &args.fastq) else {
        return Ok(());
    };

    let mut written = Vec::new();
    written.extend(render_chart(
        &prefixed(&args.output_prefix, "per_base_quality.svg"),
        chart::per_base_quality_svg(metrics)?,
        args.pdf,
    )?);
    written.extend(render_chart(
        &prefixed(&args.output_prefix, "length_dist.svg"),
        chart::length_dist_svg(metrics)?,
        args.pdf,
    )?);
    print_written("Quality plots saved:", &written);
    Ok(())
}

fn content(global: &GlobalArgs, args: ContentArgs) -> Result<()> {
    log::info!("nucleotide content analysis for {}", args.fastq.display());
    let output = analyze(global, &args.fastq)?;
    let summary = output.summary();
    let Some(metrics) = charted_metrics(&summary, &args.fastq) else {
        return Ok(());
    };
    let written = render_chart(
        &args.output,
        chart::per_base_content_svg(metrics)?,
        args.pdf,
    )?;
    print_written("Content plot saved:", &written);
    Ok(())
}

fn full_analysis(global: &GlobalArgs, args: FullAnalysisArgs) -> Result<()> {
    log::info!("complete analysis for {}", args.fastq.display());
    let output = analyze(global, &args.fastq)?;
    let report = StatsReport::new(&source_label(&args.fastq), &output);
    println!("{}", stats_txt::render_text(&report)?.trim_end());

    let summary = output.summary();
    let Some(metrics) = charted_metrics(&summary, &args.fastq) else {
        return Ok(());
    };

    let t_charts = Instant::now();
    let prefix = args.output_prefix.as_str();
    let mut written = Vec::new();
    written.extend(render_chart(
        &prefixed(prefix, "per_base_quality.svg"),
        chart::per_base_quality_svg(metrics)?,
        args.pdf,
    )?);
    written.extend(render_chart(
        &prefixed(prefix, "per_base_content.svg"),
        chart::per_base_content_svg(metrics)?,
        args.pdf,
    )?);
    written.extend(render_chart(
        &prefixed(prefix, "length_dist.svg"),
        chart::length_dist_svg(metrics)?,
        args.pdf,
    )?);
    log_stage("charts", t_charts);

    let metrics_path = prefixed(prefix, "metrics.json");
    stats_txt::write_metrics_json(&metrics_path, metrics)?;
    written.push(metrics_path);

    print_written("All outputs created:", &written);
    println!("Analysis complete. File prefix: {}", prefix);
    Ok(())
}

fn analyze(global: &GlobalArgs, input: &Path) -> Result<RunOutput> {
    stage("preflight", || {
        if global.threads == 0 {
            bail!("--threads must be >= 1");
        }
        Ok(())
    })?;

    let phred_offset = match global.phred_offset {
        PhredOffsetArg::Auto => PhredOffsetConfig::Auto,
        PhredOffsetArg::P33 => PhredOffsetConfig::Fixed(33),
        PhredOffsetArg::P64 => PhredOffsetConfig::Fixed(64),
    };
    let offset_cache = if global.no_offset_cache {
        None
    } else {
        OffsetCache::open_default()
    };
    if let Some(cache) = &offset_cache {
        log::debug!("offset cache at {}", cache.path().display());
    }

    let config = RunConfig {
        input: input.to_path_buf(),
        threads: global.threads,
        phred_offset,
        offset_cache,
    };

    let t_engine = Instant::now();
    let output = engine::run(config)?;
    log_stage("engine", t_engine);
    Ok(output)
}

/// Metrics to chart, or `None` (with a warning) when the input had no reads.
fn charted_metrics<'a>(summary: &'a Summary, input: &Path) -> Option<&'a FinalMetrics> {
    let metrics = summary.metrics();
    if metrics.is_none() {
        log::warn!("{} contains no reads; charts skipped", input.display());
    }
    metrics
}

fn render_chart(path: &Path, svg: String, pdf: bool) -> Result<Vec<PathBuf>> {
    let t = Instant::now();
    let written = chart::write_chart(path, &svg, pdf)?;
    log_stage(&format!("chart:{}", path.display()), t);
    Ok(written)
}

fn prefixed(prefix: &str, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}_{}", prefix, suffix))
}

fn source_label(input: &Path) -> String {
    if input.as_os_str() == "-" {
        "stdin".to_string()
    } else {
        input.display().to_string()
    }
}

fn print_written(header: &str, paths: &[PathBuf]) {
    println!("{}", header);
    for p in paths {
        println!("  - {}", p.display());
    }
}

fn stage<F>(name: &str, f: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    let t = Instant::now();
    let res = f();
    log_stage(name, t);
    res
}
