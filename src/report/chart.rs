use crate::core::metrics::FinalMetrics;
use anyhow::{Context, Result};
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};
use svg2pdf::usvg;
use svg2pdf::{ConversionOptions, PageOptions};

const WIDTH: f64 = 800.0;
const HEIGHT: f64 = 480.0;

const QUALITY_BANDS: [(f64, f64, &str); 3] = [
    (0.0, 20.0, "#f4c7c3"),
    (20.0, 28.0, "#ffe5b4"),
    (28.0, f64::MAX, "#cdeccf"),
];

// Tol palette for the four bases, grey for N.
const BASE_SERIES: [(&str, &str); 5] = [
    ("G", "#882255"),
    ("A", "#332288"),
    ("T", "#117733"),
    ("C", "#DDCC77"),
    ("N", "#888888"),
];

/// Plot area inside the SVG canvas.
#[derive(Clone, Copy, Debug)]
struct Frame {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
}

impl Frame {
    fn new(w: f64, h: f64) -> Self {
        let (left, right, top, bottom) = (60.0, 24.0, 40.0, 48.0);
        Self {
            left,
            top,
            width: w - left - right,
            height: h - top - bottom,
        }
    }

    fn bottom(&self) -> f64 {
        self.top + self.height
    }

    fn x(&self, v: f64, min: f64, max: f64) -> f64 {
        self.left + (v - min) / (max - min).max(1e-6) * self.width
    }

    fn y(&self, v: f64, min: f64, max: f64) -> f64 {
        self.bottom() - (v - min) / (max - min).max(1e-6) * self.height
    }
}

/// Mean quality per position over the usual good/reasonable/poor bands.
pub fn per_base_quality_svg(metrics: &FinalMetrics) -> Result<String> {
    let data: Vec<(f64, f64)> = metrics
        .per_base_qual
        .iter()
        .map(|r| (r.base as f64, r.mean))
        .collect();
    let max_q = data.iter().map(|d| d.1).fold(40.0, f64::max).ceil();
    let (x_min, x_max) = x_extent(&data);

    let frame = Frame::new(WIDTH, HEIGHT);
    let mut out = String::new();
    open_svg(&mut out, &title("Quality scores across all bases", metrics))?;
    draw_frame(&mut out, &frame)?;
    for (lo, hi, color) in QUALITY_BANDS {
        draw_y_band(&mut out, &frame, lo, hi.min(max_q), 0.0, max_q, color)?;
    }
    draw_y_ticks(&mut out, &frame, 0.0, max_q, 6)?;
    draw_x_ticks(&mut out, &frame, x_min, x_max, 8)?;
    draw_axis_labels(&mut out, &frame, "Position in read (bp)", "Mean Phred score")?;
    draw_line(&mut out, &frame, &data, (x_min, x_max), (0.0, max_q), "#1f4e9c")?;
    close_svg(&mut out)?;
    Ok(out)
}

/// A/C/G/T/N share per position, in percent of reads covering it.
pub fn per_base_content_svg(metrics: &FinalMetrics) -> Result<String> {
    let rows = &metrics.per_base_content;
    let xs: Vec<(f64, f64)> = rows.iter().map(|r| (r.base as f64, 0.0)).collect();
    let (x_min, x_max) = x_extent(&xs);

    let frame = Frame::new(WIDTH, HEIGHT);
    let mut out = String::new();
    open_svg(&mut out, &title("Sequence content across all bases", metrics))?;
    draw_frame(&mut out, &frame)?;
    draw_y_ticks(&mut out, &frame, 0.0, 100.0, 6)?;
    draw_x_ticks(&mut out, &frame, x_min, x_max, 8)?;
    draw_axis_labels(&mut out, &frame, "Position in read (bp)", "% of bases")?;
    for (i, (symbol, color)) in BASE_SERIES.iter().enumerate() {
        let data: Vec<(f64, f64)> = rows
            .iter()
            .map(|r| {
                let frac = match *symbol {
                    "G" => r.g,
                    "A" => r.a,
                    "T" => r.t,
                    "C" => r.c,
                    _ => r.n,
                };
                (r.base as f64, frac * 100.0)
            })
            .collect();
        draw_line(&mut out, &frame, &data, (x_min, x_max), (0.0, 100.0), color)?;
        draw_legend_entry(&mut out, &frame, i, symbol, color)?;
    }
    close_svg(&mut out)?;
    Ok(out)
}

/// One bar per observed read length.
pub fn length_dist_svg(metrics: &FinalMetrics) -> Result<String> {
    let rows = &metrics.length_dist;
    let max_count = rows.iter().map(|r| r.count).max().unwrap_or(0) as f64;
    let y_max = max_count.max(1.0);
    let x_min = rows.first().map(|r| r.length as f64).unwrap_or(0.0);
    let x_max = rows.last().map(|r| r.length as f64).unwrap_or(1.0);
    // Bars are centred on their length, so widen the axis by half a slot.
    let (lo, hi) = (x_min - 0.5, x_max + 0.5);

    let frame = Frame::new(WIDTH, HEIGHT);
    let mut out = String::new();
    open_svg(&mut out, &title("Distribution of sequence lengths", metrics))?;
    draw_frame(&mut out, &frame)?;
    draw_y_ticks(&mut out, &frame, 0.0, y_max, 5)?;
    draw_x_ticks(&mut out, &frame, lo, hi, 8)?;
    draw_axis_labels(&mut out, &frame, "Sequence length (bp)", "Reads")?;
    let slot = frame.width / (hi - lo).max(1.0);
    let bar_w = (slot * 0.9).max(1.0);
    for row in rows {
        let cx = frame.x(row.length as f64, lo, hi);
        let y = frame.y(row.count as f64, 0.0, y_max);
        writeln!(
            out,
            "<rect x=\"{:.2}\" y=\"{:.2}\" width=\"{:.2}\" height=\"{:.2}\" fill=\"#7db8da\"/>",
            cx - bar_w / 2.0,
            y,
            bar_w,
            frame.bottom() - y
        )?;
    }
    close_svg(&mut out)?;
    Ok(out)
}

/// Writes `svg` to `path` and, when asked, a PDF rendering next to it.
/// Returns every file written.
pub fn write_chart(path: &Path, svg: &str, pdf: bool) -> Result<Vec<PathBuf>> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output dir {}", dir.display()))?;
    }
    fs::write(path, svg).with_context(|| format!("failed to write {}", path.display()))?;
    let mut written = vec![path.to_path_buf()];
    if pdf {
        let pdf_path = path.with_extension("pdf");
        let bytes = svg_to_pdf(svg)?;
        fs::write(&pdf_path, bytes)
            .with_context(|| format!("failed to write {}", pdf_path.display()))?;
        written.push(pdf_path);
    }
    Ok(written)
}

fn svg_to_pdf(svg: &str) -> Result<Vec<u8>> {
    let mut opt = usvg::Options::default();
    opt.fontdb_mut().load_system_fonts();
    let tree =
        usvg::Tree::from_str(svg, &opt).map_err(|e| anyhow::anyhow!("usvg parse failed: {e}"))?;
    let pdf = svg2pdf::to_pdf(&tree, ConversionOptions::default(), PageOptions::default())
        .map_err(|e| anyhow::anyhow!("svg2pdf conversion failed: {e}"))?;
    Ok(pdf)
}

fn title(what: &str, metrics: &FinalMetrics) -> String {
    format!("{} ({})", what, metrics.basic.file_name)
}

fn x_extent(data: &[(f64, f64)]) -> (f64, f64) {
    let min = data.first().map(|d| d.0).unwrap_or(0.0);
    let max = data.last().map(|d| d.0).unwrap_or(1.0);
    if max > min { (min, max) } else { (min - 0.5, min + 0.5) }
}

fn open_svg(out: &mut String, title: &str) -> Result<()> {
    writeln!(
        out,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\" font-family=\"sans-serif\">",
        w = WIDTH,
        h = HEIGHT
    )?;
    writeln!(
        out,
        "<rect x=\"0\" y=\"0\" width=\"{}\" height=\"{}\" fill=\"#fff\"/>",
        WIDTH, HEIGHT
    )?;
    writeln!(
        out,
        "<text x=\"{}\" y=\"24\" font-size=\"15\" fill=\"#222\" text-anchor=\"middle\">{}</text>",
        WIDTH / 2.0,
        escape_svg(title)
    )?;
    Ok(())
}

fn close_svg(out: &mut String) -> Result<()> {
    writeln!(out, "</svg>")?;
    Ok(())
}

fn draw_frame(out: &mut String, frame: &Frame) -> Result<()> {
    writeln!(
        out,
        "<rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" fill=\"#fff\" stroke=\"#ddd\"/>",
        frame.left, frame.top, frame.width, frame.height
    )?;
    Ok(())
}

fn draw_y_band(
    out: &mut String,
    frame: &Frame,
    lo: f64,
    hi: f64,
    min_y: f64,
    max_y: f64,
    color: &str,
) -> Result<()> {
    if hi <= lo {
        return Ok(());
    }
    let y1 = frame.y(hi.min(max_y), min_y, max_y);
    let y2 = frame.y(lo.max(min_y), min_y, max_y);
    writeln!(
        out,
        "<rect x=\"{}\" y=\"{:.2}\" width=\"{}\" height=\"{:.2}\" fill=\"{}\" opacity=\"0.6\"/>",
        frame.left,
        y1,
        frame.width,
        (y2 - y1).max(0.0),
        color
    )?;
    Ok(())
}

fn draw_y_ticks(out: &mut String, frame: &Frame, min_y: f64, max_y: f64, ticks: usize) -> Result<()> {
    if ticks < 2 || (max_y - min_y).abs() < 1e-9 {
        return Ok(());
    }
    let (start, step, count) = nice_ticks(min_y, max_y, ticks);
    for i in 0..count {
        let v = start + step * i as f64;
        if v < min_y - 1e-9 || v > max_y + 1e-9 {
            continue;
        }
        let y = frame.y(v, min_y, max_y);
        writeln!(
            out,
            "<line x1=\"{}\" y1=\"{:.2}\" x2=\"{}\" y2=\"{:.2}\" stroke=\"#eee\"/>",
            frame.left,
            y,
            frame.left + frame.width,
            y
        )?;
        writeln!(
            out,
            "<text x=\"{}\" y=\"{:.2}\" font-size=\"10\" fill=\"#666\" text-anchor=\"end\" dominant-baseline=\"middle\">{}</text>",
            frame.left - 4.0,
            y,
            fmt_tick(v)
        )?;
    }
    Ok(())
}

fn draw_x_ticks(out: &mut String, frame: &Frame, min_x: f64, max_x: f64, ticks: usize) -> Result<()> {
    if ticks < 2 || (max_x - min_x).abs() < 1e-9 {
        return Ok(());
    }
    let (start, step, count) = nice_ticks(min_x, max_x, ticks);
    for i in 0..count {
        let v = start + step * i as f64;
        if v < min_x - 1e-9 || v > max_x + 1e-9 {
            continue;
        }
        let x = frame.x(v, min_x, max_x);
        writeln!(
            out,
            "<line x1=\"{:.2}\" y1=\"{}\" x2=\"{:.2}\" y2=\"{}\" stroke=\"#eee\"/>",
            x,
            frame.top,
            x,
            frame.bottom()
        )?;
        writeln!(
            out,
            "<text x=\"{:.2}\" y=\"{}\" font-size=\"10\" fill=\"#666\" text-anchor=\"middle\" dominant-baseline=\"hanging\">{}</text>",
            x,
            frame.bottom() + 4.0,
            fmt_tick(v)
        )?;
    }
    Ok(())
}

fn draw_axis_labels(out: &mut String, frame: &Frame, x_label: &str, y_label: &str) -> Result<()> {
    writeln!(
        out,
        "<text x=\"{}\" y=\"{}\" font-size=\"12\" fill=\"#444\" text-anchor=\"middle\">{}</text>",
        frame.left + frame.width / 2.0,
        frame.bottom() + 32.0,
        x_label
    )?;
    let yx = frame.left - 40.0;
    let yy = frame.top + frame.height / 2.0;
    writeln!(
        out,
        "<text x=\"{}\" y=\"{}\" font-size=\"12\" fill=\"#444\" text-anchor=\"middle\" transform=\"rotate(-90 {} {})\">{}</text>",
        yx, yy, yx, yy, y_label
    )?;
    Ok(())
}

fn draw_line(
    out: &mut String,
    frame: &Frame,
    data: &[(f64, f64)],
    (x_min, x_max): (f64, f64),
    (y_min, y_max): (f64, f64),
    color: &str,
) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    let mut path = String::new();
    for (i, (xv, yv)) in data.iter().enumerate() {
        let cmd = if i == 0 { "M" } else { " L" };
        write!(
            path,
            "{} {:.2} {:.2}",
            cmd,
            frame.x(*xv, x_min, x_max),
            frame.y(*yv, y_min, y_max)
        )?;
    }
    writeln!(
        out,
        "<path d=\"{}\" fill=\"none\" stroke=\"{}\" stroke-width=\"1.5\"/>",
        path, color
    )?;
    Ok(())
}

fn draw_legend_entry(
    out: &mut String,
    frame: &Frame,
    slot: usize,
    label: &str,
    color: &str,
) -> Result<()> {
    let x = frame.left + frame.width - 40.0;
    let y = frame.top + 12.0 + slot as f64 * 16.0;
    writeln!(
        out,
        "<line x1=\"{}\" y1=\"{}\" x2=\"{}\" y2=\"{}\" stroke=\"{}\" stroke-width=\"3\"/>",
        x,
        y,
        x + 16.0,
        y,
        color
    )?;
    writeln!(
        out,
        "<text x=\"{}\" y=\"{}\" font-size=\"11\" fill=\"#333\" dominant-baseline=\"middle\">{}</text>",
        x + 20.0,
        y,
        label
    )?;
    Ok(())
}

fn nice_ticks(min: f64, max: f64, ticks: usize) -> (f64, f64, usize) {
    let range = (max - min).abs().max(1e-9);
    let rough = range / (ticks as f64 - 1.0);
    let mag = 10f64.powf(rough.abs().log10().floor());
    let norm = rough / mag;
    let step = if norm <= 1.0 {
        1.0
    } else if norm <= 2.0 {
        2.0
    } else if norm <= 5.0 {
        5.0
    } else {
        10.0
    } * mag;
    let start = (min / step).ceil() * step;
    let end = (max / step).floor() * step;
    let count = ((end - start) / step).round().max(0.0) as usize + 1;
    (start, step, count)
}

fn fmt_tick(v: f64) -> String {
    if (v - v.round()).abs() < 0.001 {
        format!("{}", v.round() as i64)
    } else if v.abs() < 10.0 {
        format!("{:.2}", v)
    } else {
        format!("{:.1}", v)
    }
}

fn escape_svg(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metrics::Agg;
    use crate::core::model::{FinalizeContext, Record};

    fn metrics() -> FinalMetrics {
        let mut agg = Agg::new();
        for (seq, q) in [(&b"ACGTN"[..], 30u8), (&b"ACG"[..], 12u8), (&b"ACGTACGT"[..], 38u8)] {
            let scores = vec![q; seq.len()];
            agg.update(&Record {
                id: b"r",
                seq,
                scores: &scores,
            });
        }
        let ctx = FinalizeContext::new(33, "a<b>.fastq");
        agg.finalize(&ctx).metrics().cloned().unwrap()
    }

    #[test]
    fn quality_chart_is_standalone_svg() {
        let svg = per_base_quality_svg(&metrics()).unwrap();
        assert!(svg.starts_with("<svg xmlns=\"http://www.w3.org/2000/svg\""));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert!(svg.contains("a&lt;b&gt;.fastq"));
        assert_eq!(svg.matches("<path ").count(), 1);
        assert!(svg.contains("#f4c7c3"));
    }

    #[test]
    fn content_chart_draws_one_line_per_symbol() {
        let svg = per_base_content_svg(&metrics()).unwrap();
        assert_eq!(svg.matches("<path ").count(), BASE_SERIES.len());
        for (symbol, _) in BASE_SERIES {
            assert!(svg.contains(&format!(">{symbol}</text>")));
        }
    }

    #[test]
    fn length_chart_has_a_bar_per_length() {
        let m = metrics();
        let svg = length_dist_svg(&m).unwrap();
        let bars = svg.matches("fill=\"#7db8da\"").count();
        assert_eq!(bars, m.length_dist.len());
    }

    #[test]
    fn single_position_reads_still_render() {
        let mut agg = Agg::new();
        agg.update(&Record {
            id: b"r",
            seq: b"A",
            scores: &[20],
        });
        let m = agg
            .finalize(&FinalizeContext::new(33, "one.fq"))
            .metrics()
            .cloned()
            .unwrap();
        let svg = per_base_quality_svg(&m).unwrap();
        assert!(!svg.contains("NaN"));
        assert!(!length_dist_svg(&m).unwrap().contains("NaN"));
    }

    #[test]
    fn write_chart_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plots").join("q.svg");
        let svg = per_base_quality_svg(&metrics()).unwrap();
        let written = write_chart(&path, &svg, false).unwrap();
        assert_eq!(written, vec![path.clone()]);
        assert_eq!(fs::read_to_string(&path).unwrap(), svg);
    }

    #[test]
    fn pdf_export_writes_a_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("len.svg");
        let svg = length_dist_svg(&metrics()).unwrap();
        let written = write_chart(&path, &svg, true).unwrap();
        assert_eq!(written.len(), 2);
        let pdf = fs::read(&written[1]).unwrap();
        assert!(pdf.starts_with(b"%PDF"));
    }
}
