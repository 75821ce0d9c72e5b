//! Plotly-compatible figure JSON. Rendering happens in the browser.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use jobwatch_core::{format_date, JobCountRecord};
use serde_json::{json, Value};

const FONT: &str = "Arial, sans-serif";
const TITLE_COLOR: &str = "#2C3E50";
const AXIS_COLOR: &str = "#34495E";

/// One line per location over the full time series.
pub fn time_series_figure(records: &[JobCountRecord]) -> Value {
    let mut by_location: BTreeMap<&str, (Vec<String>, Vec<i64>)> = BTreeMap::new();
    for record in records {
        let (x, y) = by_location.entry(record.location.as_str()).or_default();
        x.push(format_date(record.date));
        y.push(record.job_count);
    }

    let traces = by_location
        .into_iter()
        .map(|(location, (x, y))| {
            json!({
                "type": "scatter",
                "mode": "lines+markers",
                "name": location,
                "x": x,
                "y": y,
                "line": {"width": 2.5}
            })
        })
        .collect::<Vec<_>>();

    json!({
        "data": traces,
        "layout": {
            "title": {"text": "Job Count Over Time by Location", "font": {"size": 18, "color": TITLE_COLOR}},
            "hovermode": "x unified",
            "font": {"family": FONT, "size": 12},
            "xaxis": {"title": {"text": "Date", "font": {"size": 14, "color": AXIS_COLOR}}},
            "yaxis": {"title": {"text": "Job Count", "font": {"size": 14, "color": AXIS_COLOR}}},
            "height": 500,
            "plot_bgcolor": "rgba(240, 240, 240, 0.5)",
            "paper_bgcolor": "white"
        }
    })
}

/// Bars for the latest snapshot, shaded by count.
pub fn latest_bar_figure(latest_date: Option<NaiveDate>, records: &[JobCountRecord]) -> Value {
    let x = records.iter().map(|r| r.location.clone()).collect::<Vec<_>>();
    let y = records.iter().map(|r| r.job_count).collect::<Vec<_>>();
    let title = match latest_date {
        Some(date) => format!("Current Job Count by City ({})", format_date(date)),
        None => "Current Job Count by City".to_string(),
    };

    json!({
        "data": [{
            "type": "bar",
            "x": x,
            "y": y,
            "marker": {"color": y, "colorscale": "Blues"}
        }],
        "layout": {
            "title": {"text": title, "font": {"size": 18, "color": TITLE_COLOR}},
            "showlegend": false,
            "height": 400,
            "font": {"family": FONT, "size": 12},
            "xaxis": {"title": {"text": "City"}},
            "yaxis": {"title": {"text": "Job Count"}}
        }
    })
}

/// Single trend line for one location.
pub fn city_trend_figure(location: &str, records: &[JobCountRecord]) -> Value {
    let x = records.iter().map(|r| format_date(r.date)).collect::<Vec<_>>();
    let y = records.iter().map(|r| r.job_count).collect::<Vec<_>>();

    json!({
        "data": [{
            "type": "scatter",
            "mode": "lines+markers",
            "x": x,
            "y": y,
            "line": {"width": 3, "color": "#3498db"}
        }],
        "layout": {
            "title": {"text": format!("Job Count Trend for {location}"), "font": {"size": 18, "color": TITLE_COLOR}},
            "height": 500,
            "font": {"family": FONT, "size": 12},
            "showlegend": false,
            "xaxis": {"title": {"text": "Date"}},
            "yaxis": {"title": {"text": "Job Count"}}
        }
    })
}
