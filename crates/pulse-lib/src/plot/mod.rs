use crate::detectors::ppg::PipelineSnapshot;
use crate::signal::TimeSeries;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Axis {
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Style {
    pub width: f32,
    pub color: Color,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    pub fn rgb(&self) -> (u8, u8, u8) {
        (
            ((self.0 >> 16) & 0xFF) as u8,
            ((self.0 >> 8) & 0xFF) as u8,
            (self.0 & 0xFF) as u8,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub style: Style,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub radius: u32,
    pub color: Color,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Series {
    Line(LineSeries),
    Markers(MarkerSeries),
}

impl Series {
    pub fn points(&self) -> &[[f64; 2]] {
        match self {
            Series::Line(line) => &line.points,
            Series::Markers(markers) => &markers.points,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Figure {
    pub title: Option<String>,
    pub x: Axis,
    pub y: Axis,
    pub series: Vec<Series>,
}

impl Figure {
    pub fn new(title: impl Into<Option<String>>) -> Self {
        Self {
            title: title.into(),
            x: Axis { label: None },
            y: Axis { label: None },
            series: Vec::new(),
        }
    }

    pub fn add_series(&mut self, series: Series) {
        self.series.push(series);
    }

    /// Bounding box over every series as `(x_min, x_max, y_min, y_max)`, `None` when empty.
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let mut points = self.series.iter().flat_map(|s| s.points().iter());
        let first = points.next()?;
        let init = (first[0], first[0], first[1], first[1]);
        Some(points.fold(init, |(x0, x1, y0, y1), p| {
            (x0.min(p[0]), x1.max(p[0]), y0.min(p[1]), y1.max(p[1]))
        }))
    }
}

pub fn decimate_points(points: &[[f64; 2]], max_points: usize) -> Vec<[f64; 2]> {
    if points.len() <= max_points {
        return points.to_vec();
    }
    let bucket_size = points.len() as f64 / max_points as f64;
    let mut result = Vec::with_capacity(max_points);
    for i in 0..max_points {
        let start = (i as f64 * bucket_size).floor() as usize;
        if start >= points.len() {
            break;
        }
        result.push(points[start]);
    }
    result
}

pub fn figure_from_timeseries(
    title: &str,
    series: &TimeSeries,
    max_points: usize,
    color: u32,
) -> Figure {
    let dt = 1.0 / series.fs.max(f64::EPSILON);
    let points: Vec<[f64; 2]> = series
        .data
        .iter()
        .enumerate()
        .map(|(i, value)| [i as f64 * dt, *value])
        .collect();
    let mut fig = Figure::new(Some(title.into()));
    fig.x.label = Some("time (s)".into());
    fig.add_series(Series::Line(LineSeries {
        name: title.into(),
        points: decimate_points(&points, max_points),
        style: Style {
            width: 1.4,
            color: Color(color),
        },
    }));
    fig
}

/// Filtered window with detected peaks marked on top.
pub fn figure_from_snapshot(snapshot: &PipelineSnapshot) -> Figure {
    let dt = 1.0 / snapshot.fs.max(f64::EPSILON);
    let title = match snapshot.estimate {
        Some(est) => format!("Filtered PPG ({} bpm raw, {:?})", est.bpm, est.method),
        None => "Filtered PPG".to_string(),
    };
    let mut fig = Figure::new(Some(title));
    fig.x.label = Some("time (s)".into());
    fig.y.label = Some("band-passed intensity".into());
    fig.add_series(Series::Line(LineSeries {
        name: "filtered".into(),
        points: snapshot
            .filtered
            .iter()
            .enumerate()
            .map(|(i, v)| [i as f64 * dt, *v])
            .collect(),
        style: Style {
            width: 1.4,
            color: Color(0x1F77B4),
        },
    }));
    if !snapshot.filtered.is_empty() {
        let end = (snapshot.filtered.len() - 1) as f64 * dt;
        fig.add_series(Series::Line(LineSeries {
            name: "threshold".into(),
            points: vec![[0.0, snapshot.threshold], [end, snapshot.threshold]],
            style: Style {
                width: 1.0,
                color: Color(0x999999),
            },
        }));
    }
    fig.add_series(Series::Markers(MarkerSeries {
        name: "peaks".into(),
        points: snapshot
            .peaks
            .peak_indices
            .iter()
            .filter_map(|&i| snapshot.filtered.get(i).map(|v| [i as f64 * dt, *v]))
            .collect(),
        radius: 4,
        color: Color(0xFF0077),
    }));
    fig
}
