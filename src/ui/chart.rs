//! Terminal line chart for stock series

use crate::services::stocks::StockSeries;

const HEIGHT: usize = 12;
const MAX_WIDTH: usize = 60;
const LABEL_WIDTH: usize = 10;

/// Render a daily close series as a fixed-height terminal chart
pub fn render(series: &StockSeries) -> String {
    let values = resample(&series.points.iter().map(|p| p.close).collect::<Vec<_>>());

    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let span = if (max - min).abs() < f64::EPSILON {
        1.0
    } else {
        max - min
    };

    let mut out = String::new();
    out.push_str(&format!("{} Stock Price History ($)\n", series.ticker));

    // One column per resampled value; row 0 is the top of the chart.
    for row in 0..HEIGHT {
        let label_value = max - span * row as f64 / (HEIGHT - 1) as f64;
        if row % 3 == 0 {
            out.push_str(&format!("{:>width$.2} ┤", label_value, width = LABEL_WIDTH - 2));
        } else {
            out.push_str(&format!("{:>width$} │", "", width = LABEL_WIDTH - 2));
        }

        for value in &values {
            let scaled = ((value - min) / span * (HEIGHT - 1) as f64).round() as usize;
            let value_row = HEIGHT - 1 - scaled;
            out.push(if value_row == row { '*' } else { ' ' });
        }
        out.push('\n');
    }

    out.push_str(&format!(
        "{:>width$} └{}\n",
        "",
        "─".repeat(values.len()),
        width = LABEL_WIDTH - 2
    ));

    if let (Some(first), Some(last)) = (series.points.first(), series.points.last()) {
        let gap = values.len().saturating_sub(first.date.len()) + 2;
        out.push_str(&format!(
            "{:>width$} {}{:>gap$}\n",
            "",
            first.date,
            last.date,
            width = LABEL_WIDTH - 2,
            gap = gap
        ));
    }

    out
}

/// Reduce a series to at most MAX_WIDTH columns by bucket averaging
fn resample(values: &[f64]) -> Vec<f64> {
    if values.len() <= MAX_WIDTH {
        return values.to_vec();
    }

    (0..MAX_WIDTH)
        .map(|bucket| {
            let start = bucket * values.len() / MAX_WIDTH;
            let end = ((bucket + 1) * values.len() / MAX_WIDTH).max(start + 1);
            let slice = &values[start..end.min(values.len())];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}
