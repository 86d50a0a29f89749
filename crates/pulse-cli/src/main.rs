use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use plotters::prelude::*;
use pulse_lib::{
    config::{read_config, EstimatorConfig},
    detectors::ppg::analyze_window,
    io::{
        text as text_io,
        trace::{self as trace_io, TraceSample},
    },
    plot::{figure_from_snapshot, figure_from_timeseries, Figure, Series},
    session::EstimatorSession,
    signal::TimeSeries,
    source::{SimulatedSource, SimulationSpec},
};
use serde::Serialize;
use std::{
    io::{self, Read, Write},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

#[derive(Parser)]
#[command(
    name = "pulse",
    version,
    about = "Camera PPG heart-rate estimation tools"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ConfigArgs {
    /// TOML file with estimator settings; missing keys keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the sampling rate (Hz)
    #[arg(long)]
    fs: Option<f64>,
    #[arg(long)]
    window_len: Option<usize>,
    #[arg(long)]
    rate_limit_ms: Option<u64>,
}

impl ConfigArgs {
    fn load(&self) -> Result<EstimatorConfig> {
        let mut cfg = match &self.config {
            Some(path) => read_config(path)?,
            None => EstimatorConfig::default(),
        };
        if let Some(fs) = self.fs {
            cfg.sample_rate_hz = fs;
        }
        if let Some(window_len) = self.window_len {
            cfg.window_len = window_len;
        }
        if let Some(rate_limit_ms) = self.rate_limit_ms {
            cfg.rate_limit_ms = rate_limit_ms;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a brightness trace (stdin, text or .csv) through a live session
    Estimate {
        #[arg(long)]
        input: Option<PathBuf>,
        /// Only print the result after the last sample
        #[arg(long = "final")]
        final_only: bool,
        #[command(flatten)]
        cfg: ConfigArgs,
    },
    /// Generate a simulated camera brightness trace
    Simulate {
        #[arg(long, default_value_t = 75.0)]
        bpm: f64,
        #[arg(long, default_value_t = 20.0)]
        seconds: f64,
        #[arg(long, default_value_t = 10.0)]
        fs: f64,
        #[arg(long, default_value_t = 10.0)]
        noise: f64,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Emit a dark, uncovered-sensor trace instead of a pulse
        #[arg(long)]
        uncovered: bool,
        /// Write to a file; `.csv` gets timestamp_ms,value columns
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Dump every pipeline stage for the newest window of a trace
    Analyze {
        #[arg(long)]
        input: Option<PathBuf>,
        #[command(flatten)]
        cfg: ConfigArgs,
    },
    /// Render the filtered window and its peaks (or the raw trace) to a PNG
    Plot {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
        /// Plot the whole raw trace instead of the filtered window
        #[arg(long)]
        raw: bool,
        #[command(flatten)]
        cfg: ConfigArgs,
    },
    /// Print the effective estimator configuration as TOML
    Config {
        #[command(flatten)]
        cfg: ConfigArgs,
    },
}

#[derive(Serialize)]
struct ResultLine<'a> {
    sample: usize,
    timestamp_ms: f64,
    bpm: Option<u32>,
    status_message: &'a str,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Estimate {
            input,
            final_only,
            cfg,
        } => cmd_estimate(input.as_deref(), final_only, &cfg.load()?)?,
        Commands::Simulate {
            bpm,
            seconds,
            fs,
            noise,
            seed,
            uncovered,
            out,
        } => {
            let base = if uncovered {
                SimulationSpec::uncovered()
            } else {
                SimulationSpec {
                    bpm,
                    noise,
                    ..SimulationSpec::default()
                }
            };
            let spec = SimulationSpec { fs, seed, ..base };
            cmd_simulate(spec, seconds, out.as_deref())?
        }
        Commands::Analyze { input, cfg } => cmd_analyze(input.as_deref(), &cfg.load()?)?,
        Commands::Plot {
            input,
            out,
            raw,
            cfg,
        } => cmd_plot(input.as_deref(), &out, raw, &cfg.load()?)?,
        Commands::Config { cfg } => print!("{}", cfg.load()?.to_toml_string()?),
    }
    Ok(())
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

/// Load a trace; plain-text series are stamped at the configured rate.
fn read_trace(input: Option<&Path>, fs: f64) -> Result<Vec<TraceSample>> {
    match input {
        Some(path) if is_csv(path) => trace_io::read_trace_csv(path),
        Some(path) => Ok(trace_io::uniform_trace(&text_io::read_f64_series(path)?, fs)),
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            Ok(trace_io::uniform_trace(&text_io::parse_f64_series(&buf)?, fs))
        }
    }
}

fn latest_window(trace: &[TraceSample], cfg: &EstimatorConfig) -> TimeSeries {
    let skip = trace.len().saturating_sub(cfg.window_len);
    TimeSeries {
        fs: cfg.sample_rate_hz,
        data: trace[skip..].iter().map(|s| s.value).collect(),
    }
}

fn cmd_estimate(input: Option<&Path>, final_only: bool, cfg: &EstimatorConfig) -> Result<()> {
    let trace = read_trace(input, cfg.sample_rate_hz)?;
    let mut session = EstimatorSession::new(*cfg);
    session.start_session();
    let base = Instant::now();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut last_printed = None;
    for (i, sample) in trace.iter().enumerate() {
        let at = base + Duration::from_micros((sample.timestamp_ms.max(0.0) * 1000.0).round() as u64);
        session.on_sample_at(sample.value, at);
        if final_only {
            continue;
        }
        let result = session.estimation_result();
        if last_printed.as_ref() != Some(result) {
            let line = ResultLine {
                sample: i + 1,
                timestamp_ms: sample.timestamp_ms,
                bpm: result.bpm,
                status_message: &result.status_message,
            };
            writeln!(out, "{}", serde_json::to_string(&line)?)?;
            last_printed = Some(result.clone());
        }
    }
    session.stop_session();
    if final_only {
        writeln!(
            out,
            "{}",
            serde_json::to_string(session.estimation_result())?
        )?;
    }
    info!(
        "replayed {} samples, {} estimation cycles",
        trace.len(),
        session.cycles()
    );
    Ok(())
}

fn cmd_simulate(spec: SimulationSpec, seconds: f64, out: Option<&Path>) -> Result<()> {
    let mut source = SimulatedSource::new(spec);
    let values = source.take_seconds(seconds);
    match out {
        Some(path) if is_csv(path) => {
            trace_io::write_trace_csv(path, &trace_io::uniform_trace(&values, spec.fs))?
        }
        Some(path) => std::fs::write(path, text_io::format_f64_series(&values))?,
        None => print!("{}", text_io::format_f64_series(&values)),
    }
    Ok(())
}

fn cmd_analyze(input: Option<&Path>, cfg: &EstimatorConfig) -> Result<()> {
    let trace = read_trace(input, cfg.sample_rate_hz)?;
    let snapshot = analyze_window(&latest_window(&trace, cfg), cfg);
    println!("{}", serde_json::to_string(&snapshot)?);
    Ok(())
}

fn cmd_plot(input: Option<&Path>, out: &Path, raw: bool, cfg: &EstimatorConfig) -> Result<()> {
    let trace = read_trace(input, cfg.sample_rate_hz)?;
    let fig = if raw {
        let series = TimeSeries {
            fs: cfg.sample_rate_hz,
            data: trace.iter().map(|s| s.value).collect(),
        };
        figure_from_timeseries("Raw brightness", &series, 2048, 0x1F77B4)
    } else {
        figure_from_snapshot(&analyze_window(&latest_window(&trace, cfg), cfg))
    };
    draw_plotters_figure(out, &fig)
}

fn draw_plotters_figure(path: &Path, fig: &Figure) -> Result<()> {
    let (x_min, x_max, y_min, y_max) = fig
        .bounds()
        .ok_or_else(|| anyhow!("nothing to plot"))?;
    let x_max = if x_max > x_min { x_max } else { x_min + 1.0 };
    let (y_min, y_max) = if y_max > y_min {
        (y_min, y_max)
    } else {
        (y_min - 0.5, y_max + 0.5)
    };
    let backend = BitMapBackend::new(path, (800, 480));
    let root = backend.into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .caption(
            fig.title.clone().unwrap_or_else(|| "Plot".into()),
            ("sans-serif", 24),
        )
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
    let mut mesh = chart.configure_mesh();
    if let Some(label) = &fig.x.label {
        mesh.x_desc(label.as_str());
    }
    if let Some(label) = &fig.y.label {
        mesh.y_desc(label.as_str());
    }
    mesh.draw()?;
    for series in &fig.series {
        match series {
            Series::Line(line) => {
                let (r, g, b) = line.style.color.rgb();
                chart.draw_series(LineSeries::new(
                    line.points.iter().map(|p| (p[0], p[1])),
                    RGBColor(r, g, b).stroke_width(line.style.width.round().max(1.0) as u32),
                ))?;
            }
            Series::Markers(markers) => {
                let (r, g, b) = markers.color.rgb();
                let color = RGBColor(r, g, b);
                chart.draw_series(
                    markers
                        .points
                        .iter()
                        .map(|p| Circle::new((p[0], p[1]), markers.radius, color.filled())),
                )?;
            }
        }
    }
    root.present()?;
    Ok(())
}
