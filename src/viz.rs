//! Console rendering of page reports, plus bar and scatter charts using Plotters

use crate::aggregate::{HistogramBin, Point, SummaryRow, SummaryTable};
use crate::pages::{KpiValue, PageOutcome, PageReport, Section};
use plotters::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Color palette for bars and scatter groups
const BAR_COLORS: [RGBColor; 5] = [RED, BLUE, GREEN, YELLOW, MAGENTA];

/// Smallest and largest scatter marker radius, in pixels
const MARKER_RADIUS: (i32, i32) = (2, 8);

fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped
}

/// `1234` -> `"1,234"`
pub fn format_count(count: usize) -> String {
    group_thousands(&count.to_string())
}

/// Whole currency units with thousands separators: `1234.6` -> `"$1,235"`
pub fn format_currency(amount: f64) -> String {
    let rounded = amount.round();
    let sign = if rounded < 0.0 { "-" } else { "" };
    format!("{}${}", sign, group_thousands(&format!("{:.0}", rounded.abs())))
}

/// Currency with cents: `1234.5` -> `"$1,234.50"`
pub fn format_price(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round();
    let sign = if amount < 0.0 && cents > 0.0 { "-" } else { "" };
    let whole = (cents / 100.0).trunc();
    let fraction = cents - whole * 100.0;
    format!(
        "{}${}.{:02.0}",
        sign,
        group_thousands(&format!("{:.0}", whole)),
        fraction
    )
}

/// Two decimals followed by a percent sign
pub fn format_percent(value: f64) -> String {
    format!("{:.2}%", value)
}

/// Display form of a KPI value
pub fn format_kpi(value: &KpiValue) -> String {
    match *value {
        KpiValue::Count(n) => format_count(n),
        KpiValue::Percent(p) => format_percent(p),
        KpiValue::Currency(c) => format_currency(c),
        KpiValue::Price(p) => format_price(p),
        KpiValue::Months(m) => format!("{:.1} months", m),
        KpiValue::Score(s) => format!("{:.2}", s),
    }
}

fn format_cell(column: &str, value: f64) -> String {
    if column.contains("rate") {
        format_percent(value)
    } else if column.contains("revenue") {
        format_currency(value)
    } else if column == "count" || column == "customers" {
        format_count(value as usize)
    } else {
        format!("{:.2}", value)
    }
}

/// Print a summary table with aligned columns
pub fn print_summary_table(table: &SummaryTable) {
    let header: Vec<&str> = table
        .key_columns
        .iter()
        .chain(table.value_columns.iter())
        .map(String::as_str)
        .collect();
    let cells: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|SummaryRow { keys, values }| {
            keys.iter()
                .cloned()
                .chain(
                    table
                        .value_columns
                        .iter()
                        .zip(values)
                        .map(|(column, &value)| format_cell(column, value)),
                )
                .collect()
        })
        .collect();

    let widths: Vec<usize> = header
        .iter()
        .enumerate()
        .map(|(i, h)| {
            cells
                .iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(h.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |fields: Vec<&str>| {
        let padded: Vec<String> = fields
            .iter()
            .zip(&widths)
            .map(|(field, &width)| format!("{:<width$}", field, width = width))
            .collect();
        println!("  {}", padded.join(" | "));
    };

    line(header.clone());
    println!(
        "  {}",
        widths
            .iter()
            .map(|&w| "-".repeat(w))
            .collect::<Vec<_>>()
            .join("-|-")
    );
    if cells.is_empty() {
        println!("  (no rows match the current filters)");
    }
    for row in &cells {
        line(row.iter().map(String::as_str).collect());
    }
}

fn print_section(section: &Section) {
    match section {
        Section::Table { title, table } => {
            println!("\n{}", title);
            print_summary_table(table);
        }
        Section::Distributions {
            title,
            measure,
            groups,
        } => {
            println!("\n{} ({})", title, measure);
            println!(
                "  {:<24} | {:>6} | {:>10} | {:>10} | {:>10} | {:>10} | {:>10} | {:>10}",
                "group", "count", "min", "q1", "median", "q3", "max", "mean"
            );
            for group in groups {
                let d = &group.distribution;
                println!(
                    "  {:<24} | {:>6} | {:>10.2} | {:>10.2} | {:>10.2} | {:>10.2} | {:>10.2} | {:>10.2}",
                    group.key, d.count, d.min, d.q1, d.median, d.q3, d.max, d.mean
                );
            }
        }
        Section::Histogram {
            title,
            measure,
            bins,
        } => {
            println!("\n{} ({})", title, measure);
            let widest = bins.iter().map(|b| b.count).max().unwrap_or(0).max(1);
            for bin in bins {
                let bar = "#".repeat(bin.count * 40 / widest);
                println!(
                    "  {:>8.2} - {:>8.2} | {:>6} {}",
                    bin.lower, bin.upper, bin.count, bar
                );
            }
        }
        Section::Scatter {
            title,
            x,
            y,
            color,
            points,
        } => {
            println!("\n{} ({} vs {}, by {})", title, y, x, color);
            println!("  {:<24} | {:>8} | {:>12} | {:>12}", "group", "points", "mean x", "mean y");
            if points.is_empty() {
                println!("  (no rows match the current filters)");
            }
            for (group, members) in scatter_groups(points) {
                let n = members.len() as f64;
                let mean_x = members.iter().map(|p| p.x).sum::<f64>() / n;
                let mean_y = members.iter().map(|p| p.y).sum::<f64>() / n;
                println!(
                    "  {:<24} | {:>8} | {:>12.2} | {:>12.2}",
                    group,
                    format_count(members.len()),
                    mean_x,
                    mean_y
                );
            }
        }
        Section::Images(assets) => {
            for asset in assets {
                println!("\n{}", asset.title);
                if asset.present {
                    println!("  {}", asset.path.display());
                } else {
                    println!("  Image not available: {}", asset.path.display());
                }
            }
        }
        Section::Preview(asset) => {
            println!("\n{}", section.title());
            if asset.present {
                println!("  {}: {}", asset.title, asset.path.display());
            } else {
                println!("  Preview image not available.");
            }
        }
        Section::Modules(pages) => {
            println!("\n{}", section.title());
            for page in pages {
                println!("  {:<28} {}", page.title(), page.summary());
            }
        }
        Section::Text(body) => println!("\n{}", body),
    }
}

/// Print a page report, or the notice that replaced it
pub fn print_page_outcome(outcome: &PageOutcome) {
    match outcome {
        PageOutcome::Report(report) => print_page_report(report),
        PageOutcome::Notice { page, message } => {
            println!("\n=== {} ===", page.title());
            println!("⚠ {}", message);
        }
    }
}

/// Print KPIs then every section, in page order
pub fn print_page_report(report: &PageReport) {
    println!("\n=== {} ===", report.page.title());
    if report.page.needs_data() {
        println!("Rows in scope: {}", format_count(report.rows_in_scope));
    }
    for kpi in &report.kpis {
        println!("  {:<28} {}", kpi.label, format_kpi(&kpi.value));
    }
    for section in &report.sections {
        print_section(section);
    }
}

/// Histogram bins as a one-key summary table, for charting
pub fn histogram_table(bins: &[HistogramBin]) -> SummaryTable {
    SummaryTable {
        key_columns: vec!["bin".to_string()],
        value_columns: vec!["count".to_string()],
        rows: bins
            .iter()
            .map(|bin| SummaryRow {
                keys: vec![format!("{:.0}", bin.lower)],
                values: vec![bin.count as f64],
            })
            .collect(),
    }
}

/// Draw the first value column of a one-key summary table as a bar chart
pub fn render_bar_chart(table: &SummaryTable, title: &str, output_path: &Path) -> crate::Result<()> {
    if table.key_columns.len() != 1 || table.value_columns.is_empty() {
        anyhow::bail!(
            "bar charts need one key column and at least one value column, got {} and {}",
            table.key_columns.len(),
            table.value_columns.len()
        );
    }

    let labels: Vec<String> = table.rows.iter().map(|row| row.keys[0].clone()).collect();
    let values: Vec<f64> = table.rows.iter().map(|row| row.values[0]).collect();
    let max_value = values.iter().copied().fold(0.0_f64, f64::max);
    let upper = if max_value > 0.0 { max_value * 1.1 } else { 1.0 };
    let bars = labels.len().max(1);

    let root = BitMapBackend::new(output_path, (900, 540)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 26))
        .margin(10)
        .x_label_area_size(60)
        .y_label_area_size(80)
        .build_cartesian_2d(-0.5f64..(bars as f64 - 0.5), 0f64..upper)?;

    let label_at = |x: &f64| {
        let index = x.round();
        if index < 0.0 || (x - index).abs() > 1e-6 {
            return String::new();
        }
        labels.get(index as usize).cloned().unwrap_or_default()
    };

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(bars)
        .x_label_formatter(&label_at)
        .x_desc(table.key_columns[0].as_str())
        .y_desc(table.value_columns[0].as_str())
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    chart.draw_series(values.iter().enumerate().map(|(i, &value)| {
        let x = i as f64;
        Rectangle::new(
            [(x - 0.4, 0.0), (x + 0.4, value.max(0.0))],
            BAR_COLORS[i % BAR_COLORS.len()].filled(),
        )
    }))?;

    root.present()?;
    Ok(())
}

/// Points grouped by their color group, groups in key order
pub fn scatter_groups(points: &[Point]) -> BTreeMap<&str, Vec<&Point>> {
    let mut groups: BTreeMap<&str, Vec<&Point>> = BTreeMap::new();
    for point in points {
        groups.entry(point.group.as_str()).or_default().push(point);
    }
    groups
}

/// Observed range of `values` padded by 5% on each side; never empty
pub fn axis_range(values: impl Iterator<Item = f64>) -> Range<f64> {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !min.is_finite() || !max.is_finite() {
        return 0.0..1.0;
    }
    let pad = if max > min { (max - min) * 0.05 } else { 1.0 };
    (min - pad)..(max + pad)
}

/// Marker radius scaled linearly from the size range onto `MARKER_RADIUS`
pub fn marker_radius(size: f64, sizes: &Range<f64>) -> i32 {
    let (small, large) = MARKER_RADIUS;
    let span = sizes.end - sizes.start;
    if span <= 0.0 {
        return (small + large) / 2;
    }
    let share = ((size - sizes.start) / span).clamp(0.0, 1.0);
    small + (share * f64::from(large - small)).round() as i32
}

/// Draw customer points as filled circles, one color and legend entry per group
///
/// # Arguments
/// * `points` - Customer-level points; `size` sets each marker's radius
/// * `title` - Chart caption
/// * `axes` - X and Y axis descriptions
/// * `output_path` - PNG file to write
pub fn render_scatter_chart(
    points: &[Point],
    title: &str,
    (x_desc, y_desc): (&str, &str),
    output_path: &Path,
) -> crate::Result<()> {
    if points.is_empty() {
        anyhow::bail!("scatter chart '{}' has no points", title);
    }

    let x_range = axis_range(points.iter().map(|p| p.x));
    let y_range = axis_range(points.iter().map(|p| p.y));
    let (min_size, max_size) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p.size), hi.max(p.size)));
    let sizes = min_size..max_size;

    let root = BitMapBackend::new(output_path, (900, 640)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 26))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(80)
        .build_cartesian_2d(x_range, y_range)?;

    chart
        .configure_mesh()
        .x_desc(x_desc)
        .y_desc(y_desc)
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for (i, (group, members)) in scatter_groups(points).into_iter().enumerate() {
        let color = BAR_COLORS[i % BAR_COLORS.len()];
        chart
            .draw_series(
                members
                    .iter()
                    .map(|p| Circle::new((p.x, p.y), marker_radius(p.size, &sizes), color.mix(0.6).filled())),
            )?
            .label(group)
            .legend(move |(x, y)| Circle::new((x + 5, y), 4, color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

/// File-system friendly name: lowercase alphanumerics joined by underscores
pub fn chart_file_name(page_slug: &str, title: &str) -> String {
    let mut name = String::from(page_slug);
    let mut pending_separator = true;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator {
                name.push('_');
                pending_separator = false;
            }
            name.push(c.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }
    name.push_str(".png");
    name
}

/// Render every chartable section of a report into `dir`, returning the written files
pub fn render_page_charts(report: &PageReport, dir: &Path) -> crate::Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;

    let mut written = Vec::new();
    for section in &report.sections {
        if let Section::Scatter { x, y, points, .. } = section {
            if points.is_empty() {
                continue;
            }
            let path = dir.join(chart_file_name(report.page.slug(), section.title()));
            render_scatter_chart(points, section.title(), (x.column(), y.column()), &path)?;
            written.push(path);
            continue;
        }

        let table = match section {
            Section::Table { table, .. } if table.key_columns.len() == 1 && !table.is_empty() => {
                table.clone()
            }
            Section::Histogram { bins, .. } if !bins.is_empty() => histogram_table(bins),
            _ => continue,
        };

        let path = dir.join(chart_file_name(report.page.slug(), section.title()));
        render_bar_chart(&table, section.title(), &path)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pages::Page;
    use tempfile::tempdir;

    fn create_test_table() -> SummaryTable {
        SummaryTable {
            key_columns: vec!["contract".to_string()],
            value_columns: vec!["total_revenue".to_string()],
            rows: vec![
                SummaryRow {
                    keys: vec!["Two Year".to_string()],
                    values: vec![12_500.0],
                },
                SummaryRow {
                    keys: vec!["Month-to-Month".to_string()],
                    values: vec![3_400.5],
                },
            ],
        }
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1_234), "1,234");
        assert_eq!(format_count(7_043_210), "7,043,210");
    }

    #[test]
    fn test_format_currency() {
        assert_eq!(format_currency(0.0), "$0");
        assert_eq!(format_currency(1_234.6), "$1,235");
        assert_eq!(format_currency(21_371_131.69), "$21,371,132");
        assert_eq!(format_currency(-1_500.0), "-$1,500");
    }

    #[test]
    fn test_format_price_and_percent() {
        assert_eq!(format_price(64.76), "$64.76");
        assert_eq!(format_price(1_234.5), "$1,234.50");
        assert_eq!(format_percent(26.536), "26.54%");
        assert_eq!(format_percent(0.0), "0.00%");
    }

    #[test]
    fn test_format_kpi() {
        assert_eq!(format_kpi(&KpiValue::Count(7_043)), "7,043");
        assert_eq!(format_kpi(&KpiValue::Months(32.42)), "32.4 months");
        assert_eq!(format_kpi(&KpiValue::Score(3.246)), "3.25");
    }

    #[test]
    fn test_chart_file_name() {
        assert_eq!(
            chart_file_name("geography", "Top 10 States by Revenue"),
            "geography_top_10_states_by_revenue.png"
        );
        assert_eq!(
            chart_file_name("churn_drivers", "Churn Rate by Contract"),
            "churn_drivers_churn_rate_by_contract.png"
        );
    }

    #[test]
    fn test_histogram_table() {
        let bins = vec![
            HistogramBin { lower: 0.0, upper: 10.0, count: 4 },
            HistogramBin { lower: 10.0, upper: 20.0, count: 1 },
        ];
        let table = histogram_table(&bins);
        assert_eq!(table.first_keys(), vec!["0", "10"]);
        assert_eq!(table.value(&["10"], "count"), Some(1.0));
    }

    #[test]
    fn test_render_rejects_multi_key_tables() {
        let mut table = create_test_table();
        table.key_columns.push("churn_label".to_string());
        let temp_dir = tempdir().unwrap();

        let result = render_bar_chart(&table, "Bad", &temp_dir.path().join("bad.png"));
        assert!(result.is_err());
    }

    fn point(id: &str, x: f64, y: f64, size: f64, group: &str) -> Point {
        Point {
            customer_id: id.to_string(),
            x,
            y,
            size,
            group: group.to_string(),
        }
    }

    #[test]
    fn test_scatter_groups_in_key_order() {
        let points = vec![
            point("A", 1.0, 2.0, 20.0, "Standard"),
            point("B", 3.0, 4.0, 80.0, "Critical Retention"),
            point("C", 5.0, 6.0, 50.0, "Standard"),
        ];
        let groups = scatter_groups(&points);

        assert_eq!(groups.keys().copied().collect::<Vec<_>>(), vec!["Critical Retention", "Standard"]);
        let standard: Vec<&str> = groups["Standard"].iter().map(|p| p.customer_id.as_str()).collect();
        assert_eq!(standard, vec!["A", "C"]);
    }

    #[test]
    fn test_axis_range_pads_and_never_collapses() {
        let range = axis_range([0.0, 100.0].into_iter());
        assert_eq!((range.start, range.end), (-5.0, 105.0));

        let single = axis_range(std::iter::once(42.0));
        assert_eq!((single.start, single.end), (41.0, 43.0));

        let empty = axis_range(std::iter::empty());
        assert_eq!((empty.start, empty.end), (0.0, 1.0));
    }

    #[test]
    fn test_marker_radius_scales_with_size() {
        let sizes = 20.0..120.0;
        assert_eq!(marker_radius(20.0, &sizes), MARKER_RADIUS.0);
        assert_eq!(marker_radius(120.0, &sizes), MARKER_RADIUS.1);
        assert_eq!(marker_radius(70.0, &sizes), 5);
        assert_eq!(marker_radius(50.0, &(50.0..50.0)), 5);
    }

    #[test]
    fn test_scatter_chart_rejects_empty_points() {
        let temp_dir = tempdir().unwrap();
        let result = render_scatter_chart(&[], "Empty", ("x", "y"), &temp_dir.path().join("empty.png"));
        assert!(result.is_err());
    }

    #[test]
    #[ignore = "needs system fonts for chart captions"]
    fn test_render_scatter_chart() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("matrix.png");
        let points = vec![
            point("A", 10.0, 900.0, 50.0, "Critical Retention"),
            point("B", 80.0, 200.0, 70.0, "Standard"),
        ];

        render_scatter_chart(&points, "CLTV vs Churn Risk Matrix", ("churn_score", "cltv"), &path).unwrap();
        assert!(path.exists());
    }

    #[test]
    #[ignore = "needs system fonts for chart captions"]
    fn test_render_page_charts() {
        let temp_dir = tempdir().unwrap();
        let report = PageReport {
            page: Page::Executive,
            rows_in_scope: 2,
            kpis: Vec::new(),
            sections: vec![Section::Table {
                title: "Revenue by Contract",
                table: create_test_table(),
            }],
        };

        let written = render_page_charts(&report, temp_dir.path()).unwrap();
        assert_eq!(written.len(), 1);
        assert!(written[0].exists());
    }
}
