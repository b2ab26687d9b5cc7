use anyhow::{Result, anyhow};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use image::{ExtendedColorType, ImageEncoder, codecs::png::PngEncoder};
use plotters::prelude::*;
use tracing::warn;
use yfinance_rs::Range;

use crate::quotes::QuoteFetcher;

const CHART_WIDTH: u32 = 720;
const CHART_HEIGHT: u32 = 360;

const SPANS: &[(&str, Range)] = &[("1M", Range::M1), ("1Y", Range::Y1)];

/// A rendered chart ready to be embedded by Content-ID.
pub struct InlineChart {
    pub label: String,
    pub cid: String,
    pub png: Vec<u8>,
}

/// Close series aligned onto a shared business-day calendar. Slots before a
/// series' first observation hold NaN.
pub(crate) struct ChartFrame {
    pub dates: Vec<NaiveDate>,
    pub series: Vec<(String, Vec<f64>)>,
}

pub async fn performance_charts(
    fetcher: &QuoteFetcher,
    symbols: &[String],
) -> Result<Vec<InlineChart>> {
    anyhow::ensure!(!symbols.is_empty(), "at least one symbol required");

    let mut charts = Vec::with_capacity(SPANS.len());
    for (label, range) in SPANS {
        let fetched = futures::future::join_all(symbols.iter().map(|symbol| async move {
            (symbol.clone(), fetcher.daily_closes(symbol, *range).await)
        }))
        .await;

        let mut series = Vec::new();
        for (symbol, result) in fetched {
            match result {
                Ok(closes) if !closes.is_empty() => series.push((symbol, closes)),
                Ok(_) => warn!("no {} price data for {}", label, symbol),
                Err(e) => warn!("{} chart series for {} failed: {:#}", label, symbol, e),
            }
        }

        let frame = cumulative_pct(align_on_business_days(&series));
        let png = render_chart(label, &frame)
            .ok_or_else(|| anyhow!("no price data available for {} window", label))??;
        charts.push(InlineChart {
            label: (*label).to_string(),
            cid: format!("perf-{}@digest", label.to_lowercase()),
            png,
        });
    }
    Ok(charts)
}

/// Calendar of business days between `start` and `end`, inclusive.
pub(crate) fn business_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut current = start;
    while current <= end {
        if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            days.push(current);
        }
        current += Duration::days(1);
    }
    days
}

/// Reindex every series onto the shared business-day calendar, carrying the
/// last observation forward over gaps, then drop leading rows where every
/// series is still missing.
pub(crate) fn align_on_business_days(series: &[(String, Vec<(NaiveDate, f64)>)]) -> ChartFrame {
    let nonempty: Vec<_> = series.iter().filter(|(_, s)| !s.is_empty()).collect();
    let (Some(start), Some(end)) = (
        nonempty.iter().map(|(_, s)| s[0].0).min(),
        nonempty.iter().map(|(_, s)| s[s.len() - 1].0).max(),
    ) else {
        return ChartFrame {
            dates: Vec::new(),
            series: Vec::new(),
        };
    };

    let mut dates = business_days(start, end);
    let mut columns = Vec::with_capacity(nonempty.len());
    for (symbol, observations) in nonempty {
        let mut values = Vec::with_capacity(dates.len());
        let mut cursor = 0;
        let mut carried = f64::NAN;
        for date in &dates {
            while cursor < observations.len() && observations[cursor].0 <= *date {
                carried = observations[cursor].1;
                cursor += 1;
            }
            values.push(carried);
        }
        columns.push((symbol.clone(), values));
    }

    // Drop leading rows where all symbols are still NaN.
    let first_valid = (0..dates.len())
        .find(|&i| columns.iter().any(|(_, values)| values[i].is_finite()))
        .unwrap_or(dates.len());
    dates.drain(..first_valid);
    for (_, values) in &mut columns {
        values.drain(..first_valid);
    }

    ChartFrame {
        dates,
        series: columns,
    }
}

/// Cumulative percentage return of each series from its value on the frame's
/// first row. A series missing at the first row stays NaN throughout.
pub(crate) fn cumulative_pct(frame: ChartFrame) -> ChartFrame {
    let series = frame
        .series
        .into_iter()
        .map(|(symbol, values)| {
            let base = values.first().copied().unwrap_or(f64::NAN);
            let pct = values
                .iter()
                .map(|v| {
                    if base.is_finite() && base != 0.0 {
                        (v / base - 1.0) * 100.0
                    } else {
                        f64::NAN
                    }
                })
                .collect();
            (symbol, pct)
        })
        .collect();
    ChartFrame {
        dates: frame.dates,
        series,
    }
}

/// Render the frame as a PNG line chart. Returns `None` when there is
/// nothing drawable in the frame.
fn render_chart(label: &str, frame: &ChartFrame) -> Option<Result<Vec<u8>>> {
    if frame.dates.len() < 2 {
        return None;
    }
    let finite: Vec<f64> = frame
        .series
        .iter()
        .flat_map(|(_, values)| values.iter().copied())
        .filter(|v| v.is_finite())
        .collect();
    if finite.is_empty() {
        return None;
    }

    let y_min = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let y_max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let pad = ((y_max - y_min) * 0.05).max(1.0);

    Some(draw_png(label, frame, y_min - pad, y_max + pad))
}

fn draw_png(label: &str, frame: &ChartFrame, y_min: f64, y_max: f64) -> Result<Vec<u8>> {
    let mut rgb = vec![0u8; (CHART_WIDTH * CHART_HEIGHT * 3) as usize];
    {
        let root =
            BitMapBackend::with_buffer(&mut rgb, (CHART_WIDTH, CHART_HEIGHT)).into_drawing_area();
        root.fill(&WHITE)
            .map_err(|e| anyhow!("chart background fill failed: {}", e))?;

        let start = frame.dates[0];
        let end = frame.dates[frame.dates.len() - 1];
        let mut chart = ChartBuilder::on(&root)
            .caption(format!("{} Performance", label), ("sans-serif", 22))
            .margin(10)
            .x_label_area_size(28)
            .y_label_area_size(48)
            .build_cartesian_2d(start..end, y_min..y_max)
            .map_err(|e| anyhow!("chart layout failed: {}", e))?;

        chart
            .configure_mesh()
            .y_desc("% Return")
            .x_labels(6)
            .label_style(("sans-serif", 12))
            .draw()
            .map_err(|e| anyhow!("chart mesh failed: {}", e))?;

        for (idx, (symbol, values)) in frame.series.iter().enumerate() {
            let color = Palette99::pick(idx).to_rgba();
            let points: Vec<(NaiveDate, f64)> = frame
                .dates
                .iter()
                .zip(values)
                .filter(|(_, v)| v.is_finite())
                .map(|(d, v)| (*d, *v))
                .collect();
            if points.is_empty() {
                continue;
            }
            chart
                .draw_series(LineSeries::new(points, color.stroke_width(2)))
                .map_err(|e| anyhow!("chart series for {} failed: {}", symbol, e))?
                .label(symbol.clone())
                .legend(move |(x, y)| {
                    PathElement::new(vec![(x, y), (x + 16, y)], color.stroke_width(2))
                });
        }

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperLeft)
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()
            .map_err(|e| anyhow!("chart legend failed: {}", e))?;

        root.present()
            .map_err(|e| anyhow!("chart present failed: {}", e))?;
    }

    let mut png = Vec::new();
    PngEncoder::new(&mut png).write_image(&rgb, CHART_WIDTH, CHART_HEIGHT, ExtendedColorType::Rgb8)?;
    Ok(png)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(year: i32, month: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, d).unwrap()
    }

    #[test]
    fn business_days_skip_weekends() {
        // Thu 2026-03-05 through Tue 2026-03-10.
        let days = business_days(day(2026, 3, 5), day(2026, 3, 10));
        assert_eq!(
            days,
            vec![
                day(2026, 3, 5),
                day(2026, 3, 6),
                day(2026, 3, 9),
                day(2026, 3, 10),
            ]
        );
    }

    #[test]
    fn alignment_forward_fills_gaps() {
        let series = vec![(
            "AAPL".to_string(),
            vec![(day(2026, 3, 5), 10.0), (day(2026, 3, 10), 12.0)],
        )];
        let frame = align_on_business_days(&series);
        assert_eq!(frame.dates.len(), 4);
        // Fri and Mon carry Thursday's close until the next observation.
        assert_eq!(frame.series[0].1, vec![10.0, 10.0, 10.0, 12.0]);
    }

    #[test]
    fn alignment_pads_late_starters_with_nan() {
        let series = vec![
            (
                "AAPL".to_string(),
                vec![(day(2026, 3, 5), 10.0), (day(2026, 3, 6), 11.0)],
            ),
            ("MSFT".to_string(), vec![(day(2026, 3, 6), 20.0)]),
        ];
        let frame = align_on_business_days(&series);
        assert!(frame.series[1].1[0].is_nan());
        assert_eq!(frame.series[1].1[1], 20.0);
    }

    #[test]
    fn empty_input_produces_empty_frame() {
        let frame = align_on_business_days(&[]);
        assert!(frame.dates.is_empty());
        assert!(frame.series.is_empty());
    }

    #[test]
    fn cumulative_pct_measures_from_first_row() {
        let frame = ChartFrame {
            dates: vec![day(2026, 3, 5), day(2026, 3, 6), day(2026, 3, 9)],
            series: vec![("AAPL".to_string(), vec![100.0, 110.0, 95.0])],
        };
        let pct = cumulative_pct(frame);
        let values = &pct.series[0].1;
        assert!((values[0] - 0.0).abs() < 1e-9);
        assert!((values[1] - 10.0).abs() < 1e-9);
        assert!((values[2] + 5.0).abs() < 1e-9);
    }

    #[test]
    fn series_missing_at_first_row_stays_nan() {
        let frame = ChartFrame {
            dates: vec![day(2026, 3, 5), day(2026, 3, 6)],
            series: vec![("MSFT".to_string(), vec![f64::NAN, 20.0])],
        };
        let pct = cumulative_pct(frame);
        assert!(pct.series[0].1.iter().all(|v| v.is_nan()));
    }
}
