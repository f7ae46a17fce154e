//! Grouping and summary statistics over filtered views, as polars lazy queries
//!
//! Every operation accepts an empty view and answers with zeros or empty
//! tables. Rates are `matched / total` with a zero denominator mapped to zero.

use crate::data::{churned, Dimension, Measure};
use crate::error::CoreResult;
use crate::filter::View;
use polars::prelude::*;

/// Small ordered result table handed to the renderer
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryTable {
    pub key_columns: Vec<String>,
    pub value_columns: Vec<String>,
    pub rows: Vec<SummaryRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub keys: Vec<String>,
    pub values: Vec<f64>,
}

impl SummaryTable {
    /// Extract a collected group-by result, keeping its row order
    ///
    /// # Arguments
    /// * `frame` - Aggregated frame holding the key and value columns
    /// * `key_columns` - String columns identifying each group
    /// * `value_columns` - Numeric columns, read as `f64` with nulls as 0
    pub fn from_frame(
        frame: &DataFrame,
        key_columns: Vec<String>,
        value_columns: Vec<String>,
    ) -> CoreResult<Self> {
        let mut rows: Vec<SummaryRow> = (0..frame.height())
            .map(|_| SummaryRow {
                keys: Vec::with_capacity(key_columns.len()),
                values: Vec::with_capacity(value_columns.len()),
            })
            .collect();

        for column in &key_columns {
            for (row, key) in rows.iter_mut().zip(frame.column(column)?.str()?) {
                row.keys.push(key.unwrap_or_default().to_string());
            }
        }
        for column in &value_columns {
            let values = frame.column(column)?.cast(&DataType::Float64)?;
            for (row, value) in rows.iter_mut().zip(values.f64()?) {
                row.values.push(value.unwrap_or(0.0));
            }
        }

        Ok(SummaryTable {
            key_columns,
            value_columns,
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Look up one cell by its full key tuple
    pub fn value(&self, keys: &[&str], column: &str) -> Option<f64> {
        let index = self.value_columns.iter().position(|c| c == column)?;
        self.rows
            .iter()
            .find(|row| row.keys.iter().map(String::as_str).eq(keys.iter().copied()))
            .map(|row| row.values[index])
    }

    /// Keys of the first key column, in row order
    pub fn first_keys(&self) -> Vec<&str> {
        self.rows
            .iter()
            .filter_map(|row| row.keys.first().map(String::as_str))
            .collect()
    }
}

/// An aggregation applied to each group
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggOp {
    Count,
    CountDistinct(Dimension),
    Sum(Measure),
    Mean(Measure),
    /// Mean of a 0/1 measure as a percentage
    Rate(Measure),
}

impl AggOp {
    /// Polars expression computing this aggregation over a frame or a group
    pub fn expr(&self) -> Expr {
        match *self {
            AggOp::Count => col(Dimension::CustomerId.column()).count(),
            AggOp::CountDistinct(dimension) => col(dimension.column()).drop_nulls().n_unique(),
            AggOp::Sum(measure) => col(measure.column()).sum(),
            AggOp::Mean(measure) => col(measure.column()).mean().fill_null(lit(0.0)),
            AggOp::Rate(measure) => col(measure.column()).mean().fill_null(lit(0.0)) * lit(100.0),
        }
    }
}

/// A named aggregation, the name becoming the result column
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub name: String,
    pub op: AggOp,
}

impl Aggregation {
    pub fn new(name: impl Into<String>, op: AggOp) -> Self {
        Aggregation {
            name: name.into(),
            op,
        }
    }

    fn expr(&self) -> Expr {
        self.op.expr().cast(DataType::Float64).alias(&self.name)
    }
}

/// Evaluate one scalar expression over the whole view
fn scalar(view: &View, expr: Expr) -> CoreResult<f64> {
    let frame = view
        .lazy()
        .select([expr.cast(DataType::Float64).alias("value")])
        .collect()?;
    Ok(frame.column("value")?.f64()?.get(0).unwrap_or(0.0))
}

/// Number of distinct non-missing values of `dimension`
pub fn count_distinct(view: &View, dimension: Dimension) -> CoreResult<usize> {
    Ok(scalar(view, AggOp::CountDistinct(dimension).expr())? as usize)
}

/// Number of rows where `predicate` is true
pub fn count_where(view: &View, predicate: Expr) -> CoreResult<usize> {
    Ok(scalar(view, predicate.sum())? as usize)
}

/// Sum of the present values; missing optional values are skipped
pub fn sum(view: &View, measure: Measure) -> CoreResult<f64> {
    scalar(view, AggOp::Sum(measure).expr())
}

/// Mean of the present values, 0 when there are none
pub fn mean(view: &View, measure: Measure) -> CoreResult<f64> {
    scalar(view, AggOp::Mean(measure).expr())
}

/// `matched / total`, or 0 when `total` is 0
pub fn rate(matched: usize, total: usize) -> f64 {
    if total > 0 {
        matched as f64 / total as f64
    } else {
        0.0
    }
}

/// Churned customers over distinct customers, as a percentage
pub fn churn_rate(view: &View) -> CoreResult<f64> {
    let churned_customers = count_where(view, churned())?;
    let customers = count_distinct(view, Dimension::CustomerId)?;
    Ok(rate(churned_customers, customers) * 100.0)
}

fn key_exprs(dimensions: &[Dimension]) -> Vec<Expr> {
    dimensions.iter().map(|d| col(d.column())).collect()
}

fn column_names(dimensions: &[Dimension]) -> Vec<String> {
    dimensions.iter().map(|d| d.column().to_string()).collect()
}

/// Group the view by `dimensions`, skipping rows where any key is missing
fn grouped(view: &View, dimensions: &[Dimension], aggregations: &[Aggregation]) -> LazyFrame {
    let keys_present = dimensions
        .iter()
        .map(|d| col(d.column()).is_not_null())
        .reduce(|all, next| all.and(next))
        .unwrap_or_else(|| lit(true));

    view.lazy()
        .filter(keys_present)
        .group_by(key_exprs(dimensions))
        .agg(aggregations.iter().map(Aggregation::expr).collect::<Vec<_>>())
}

fn by_key(view: &View, dimensions: &[Dimension], aggregations: &[Aggregation]) -> CoreResult<SummaryTable> {
    let frame = grouped(view, dimensions, aggregations)
        .sort_by_exprs(key_exprs(dimensions), SortMultipleOptions::default())
        .collect()?;
    SummaryTable::from_frame(
        &frame,
        column_names(dimensions),
        aggregations.iter().map(|a| a.name.clone()).collect(),
    )
}

/// Row count per distinct key tuple, ordered by key; rows missing a key are dropped
pub fn group_count(view: &View, dimensions: &[Dimension]) -> CoreResult<SummaryTable> {
    by_key(view, dimensions, &[Aggregation::new("count", AggOp::Count)])
}

/// Named aggregations per group of one dimension, ordered by key
pub fn group_agg(view: &View, dimension: Dimension, aggregations: &[Aggregation]) -> CoreResult<SummaryTable> {
    by_key(view, &[dimension], aggregations)
}

/// Groups of `dimension` ordered by the `by` aggregation, keeping the first `n`
///
/// # Arguments
/// * `view` - Filtered rows
/// * `dimension` - Grouping field
/// * `aggregations` - Columns of the result; `by` must name one of them
/// * `by` - Ranking column
/// * `n` - Number of groups to keep
/// * `descending` - Largest first when true
///
/// # Returns
/// * The ranked table; groups with equal rank keep key order
pub fn ranked(
    view: &View,
    dimension: Dimension,
    aggregations: &[Aggregation],
    by: &str,
    n: usize,
    descending: bool,
) -> CoreResult<SummaryTable> {
    let frame = grouped(view, &[dimension], aggregations)
        .sort_by_exprs(
            [col(by), col(dimension.column())],
            SortMultipleOptions::default().with_order_descending_multi([descending, false]),
        )
        .limit(IdxSize::try_from(n).unwrap_or(IdxSize::MAX))
        .collect()?;
    SummaryTable::from_frame(
        &frame,
        vec![dimension.column().to_string()],
        aggregations.iter().map(|a| a.name.clone()).collect(),
    )
}

/// The `n` groups with the largest (or smallest) metric; ties keep key order
pub fn top_n(
    view: &View,
    dimension: Dimension,
    metric: Aggregation,
    n: usize,
    descending: bool,
) -> CoreResult<SummaryTable> {
    let by = metric.name.clone();
    ranked(view, dimension, &[metric], &by, n, descending)
}

/// Linear-interpolated quantile of the present values, `None` when there are none
pub fn quantile(view: &View, measure: Measure, q: f64) -> CoreResult<Option<f64>> {
    let frame = view
        .lazy()
        .select([col(measure.column())
            .quantile(lit(q.clamp(0.0, 1.0)), QuantileInterpolOptions::Linear)
            .alias("quantile")])
        .collect()?;
    Ok(frame.column("quantile")?.f64()?.get(0))
}

/// Five-number summary plus mean, the data behind a box chart
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Distribution {
    pub count: usize,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    pub mean: f64,
}

impl Distribution {
    fn exprs(measure: Measure) -> Vec<Expr> {
        let value = || col(measure.column());
        let quartile = |q: f64| value().quantile(lit(q), QuantileInterpolOptions::Linear);
        vec![
            value().count().cast(DataType::Float64).alias("count"),
            value().min().alias("min"),
            quartile(0.25).alias("q1"),
            quartile(0.5).alias("median"),
            quartile(0.75).alias("q3"),
            value().max().alias("max"),
            value().mean().alias("mean"),
        ]
    }

    fn from_row(frame: &DataFrame, row: usize) -> CoreResult<Self> {
        let stat = |name: &str| -> CoreResult<f64> {
            Ok(frame.column(name)?.f64()?.get(row).unwrap_or(0.0))
        };
        Ok(Distribution {
            count: stat("count")? as usize,
            min: stat("min")?,
            q1: stat("q1")?,
            median: stat("median")?,
            q3: stat("q3")?,
            max: stat("max")?,
            mean: stat("mean")?,
        })
    }
}

/// Distribution of `measure` over the view, `None` when no value is present
pub fn describe(view: &View, measure: Measure) -> CoreResult<Option<Distribution>> {
    let frame = view.lazy().select(Distribution::exprs(measure)).collect()?;
    let distribution = Distribution::from_row(&frame, 0)?;
    Ok((distribution.count > 0).then_some(distribution))
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupDistribution {
    pub key: String,
    pub distribution: Distribution,
}

/// One distribution per group of `dimension`, ordered by key
pub fn describe_by(view: &View, dimension: Dimension, measure: Measure) -> CoreResult<Vec<GroupDistribution>> {
    let frame = view
        .lazy()
        .filter(col(dimension.column()).is_not_null())
        .group_by([col(dimension.column())])
        .agg(Distribution::exprs(measure))
        .filter(col("count").gt(lit(0.0)))
        .sort_by_exprs([col(dimension.column())], SortMultipleOptions::default())
        .collect()?;

    let keys = frame.column(dimension.column())?.str()?;
    keys.into_iter()
        .enumerate()
        .map(|(row, key)| -> CoreResult<GroupDistribution> {
            Ok(GroupDistribution {
                key: key.unwrap_or_default().to_string(),
                distribution: Distribution::from_row(&frame, row)?,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Equal-width bins over the observed range; the last bin is closed on both ends
pub fn histogram(view: &View, measure: Measure, bins: usize) -> CoreResult<Vec<HistogramBin>> {
    let column = measure.column();
    let bounds = view
        .lazy()
        .select([
            col(column).min().alias("min"),
            col(column).max().alias("max"),
            col(column).count().cast(DataType::Float64).alias("count"),
        ])
        .collect()?;
    let bound = |name: &str| -> CoreResult<Option<f64>> { Ok(bounds.column(name)?.f64()?.get(0)) };

    let (Some(min), Some(max)) = (bound("min")?, bound("max")?) else {
        return Ok(Vec::new());
    };
    if bins == 0 {
        return Ok(Vec::new());
    }
    if max == min {
        return Ok(vec![HistogramBin {
            lower: min,
            upper: max,
            count: bound("count")?.unwrap_or(0.0) as usize,
        }]);
    }

    let width = (max - min) / bins as f64;
    let last = bins as i64 - 1;
    let index = ((col(column) - lit(min)) / lit(width)).cast(DataType::Int64);
    let counted = view
        .lazy()
        .filter(col(column).is_not_null())
        .select([
            when(index.clone().gt(lit(last)))
                .then(lit(last))
                .otherwise(index)
                .alias("bin"),
            col(column).alias("value"),
        ])
        .group_by([col("bin")])
        .agg([col("value").count().cast(DataType::UInt64).alias("count")])
        .collect()?;

    let mut counts = vec![0usize; bins];
    let indices = counted.column("bin")?.i64()?;
    let totals = counted.column("count")?.u64()?;
    for (index, total) in indices.into_iter().zip(totals) {
        if let (Some(index), Some(total)) = (index, total) {
            counts[index.clamp(0, last) as usize] += total as usize;
        }
    }

    Ok(counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBin {
            lower: min + width * i as f64,
            upper: if i + 1 == bins { max } else { min + width * (i + 1) as f64 },
            count,
        })
        .collect())
}

/// One customer placed on a scatter chart
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub customer_id: String,
    pub x: f64,
    pub y: f64,
    /// Marker weight, e.g. monthly charges
    pub size: f64,
    /// Color group
    pub group: String,
}

/// Customer-level coordinates for a scatter view, in row order
///
/// Rows missing any of the requested fields are left out, so a map of
/// latitude/longitude only shows geolocated customers.
pub fn points(
    view: &View,
    x: Measure,
    y: Measure,
    size: Measure,
    group: Dimension,
) -> CoreResult<Vec<Point>> {
    let frame = view
        .lazy()
        .select([
            col(Dimension::CustomerId.column()).alias("id"),
            col(x.column()).alias("x"),
            col(y.column()).alias("y"),
            col(size.column()).alias("size"),
            col(group.column()).alias("group"),
        ])
        .drop_nulls(None)
        .collect()?;

    let ids = frame.column("id")?.str()?;
    let xs = frame.column("x")?.f64()?;
    let ys = frame.column("y")?.f64()?;
    let sizes = frame.column("size")?.f64()?;
    let groups = frame.column("group")?.str()?;

    let points = ids
        .into_iter()
        .zip(xs)
        .zip(ys)
        .zip(sizes)
        .zip(groups)
        .filter_map(|((((id, x), y), size), group)| {
            Some(Point {
                customer_id: id?.to_string(),
                x: x?,
                y: y?,
                size: size?,
                group: group?.to_string(),
            })
        })
        .collect();
    Ok(points)
}
