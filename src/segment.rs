//! Quantile-based value/risk tiering and retention priority segmentation

use crate::aggregate::{group_count, SummaryTable};
use crate::data::{Dimension, Measure, Table};
use crate::error::{ChurnError, CoreResult};
use crate::filter::View;
use log::{debug, info};
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fmt;

/// Number of equal-frequency bins used for both tiers
pub const TIER_COUNT: usize = 3;

/// Tercile of customer lifetime value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueTier {
    Low,
    Mid,
    High,
}

impl ValueTier {
    pub const ALL: [ValueTier; TIER_COUNT] = [ValueTier::Low, ValueTier::Mid, ValueTier::High];

    /// Text stored in the `cltv_tier` column
    pub fn label(&self) -> &'static str {
        match self {
            ValueTier::Low => "Low Value",
            ValueTier::Mid => "Mid Value",
            ValueTier::High => "High Value",
        }
    }
}

/// Tercile of churn score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub const ALL: [RiskTier; TIER_COUNT] = [RiskTier::Low, RiskTier::Medium, RiskTier::High];

    /// Text stored in the `risk_tier` column
    pub fn label(&self) -> &'static str {
        match self {
            RiskTier::Low => "Low Risk",
            RiskTier::Medium => "Medium Risk",
            RiskTier::High => "High Risk",
        }
    }
}

/// Action class derived from the (value, risk) tier pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RetentionPriority {
    CriticalRetention,
    HighValueMonitor,
    Standard,
}

impl RetentionPriority {
    pub const ALL: [RetentionPriority; 3] = [
        RetentionPriority::CriticalRetention,
        RetentionPriority::HighValueMonitor,
        RetentionPriority::Standard,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            RetentionPriority::CriticalRetention => "Critical Retention",
            RetentionPriority::HighValueMonitor => "High Value - Monitor",
            RetentionPriority::Standard => "Standard",
        }
    }
}

impl fmt::Display for RetentionPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Combine the two tiers into a retention priority
pub fn retention_priority(value_tier: ValueTier, risk_tier: RiskTier) -> RetentionPriority {
    match (value_tier, risk_tier) {
        (ValueTier::High, RiskTier::High) => RetentionPriority::CriticalRetention,
        (ValueTier::High, _) => RetentionPriority::HighValueMonitor,
        _ => RetentionPriority::Standard,
    }
}

/// Inner tercile boundaries of `measure` over the whole table
///
/// # Arguments
/// * `table` - The unfiltered table the tiers are defined on
/// * `measure` - Field to split into three equal-frequency bins
///
/// # Returns
/// * The 1/3 and 2/3 quantiles, linearly interpolated, or `InsufficientData`
///   when the table has fewer rows than tiers
pub fn tercile_edges(table: &Table, measure: Measure) -> CoreResult<[f64; 2]> {
    if table.len() < TIER_COUNT {
        return Err(ChurnError::InsufficientData {
            required: TIER_COUNT,
            actual: table.len(),
        });
    }

    let column = measure.column();
    let edges = table
        .frame()
        .clone()
        .lazy()
        .select([
            col(column)
                .quantile(lit(1.0 / 3.0), QuantileInterpolOptions::Linear)
                .alias("lower"),
            col(column)
                .quantile(lit(2.0 / 3.0), QuantileInterpolOptions::Linear)
                .alias("upper"),
        ])
        .collect()?;

    let edge = |name: &str| -> CoreResult<f64> {
        edges
            .column(name)?
            .f64()?
            .get(0)
            .ok_or(ChurnError::InsufficientData {
                required: TIER_COUNT,
                actual: 0,
            })
    };
    Ok([edge("lower")?, edge("upper")?])
}

/// Bin index in `0..TIER_COUNT`. Bins are right-closed, so a value equal to a
/// boundary lands in the lower bin.
pub fn tercile_bin(value: f64, edges: &[f64; 2]) -> usize {
    if value <= edges[0] {
        0
    } else if value <= edges[1] {
        1
    } else {
        2
    }
}

/// Right-closed binning of `column` into three labels; same rule as [`tercile_bin`]
fn tier_expr(column: &str, edges: [f64; 2], labels: [&'static str; TIER_COUNT]) -> Expr {
    when(col(column).lt_eq(lit(edges[0])))
        .then(lit(labels[0]))
        .when(col(column).lt_eq(lit(edges[1])))
        .then(lit(labels[1]))
        .otherwise(lit(labels[2]))
}

/// `retention_priority` over every tier pair, as one expression
fn priority_expr() -> Expr {
    let value_column = Dimension::CltvTier.column();
    let risk_column = Dimension::RiskTier.column();

    let mut expr = lit(NULL).cast(DataType::String);
    for value_tier in ValueTier::ALL {
        for risk_tier in RiskTier::ALL {
            let pair = col(value_column)
                .eq(lit(value_tier.label()))
                .and(col(risk_column).eq(lit(risk_tier.label())));
            expr = when(pair)
                .then(lit(retention_priority(value_tier, risk_tier).label()))
                .otherwise(expr);
        }
    }
    expr
}

/// Add value tier, risk tier and retention priority columns to every row
///
/// Boundaries come from the whole table passed in; run this on the unfiltered
/// dataset so that later filtering never moves a customer between tiers.
pub fn segment(table: &Table) -> CoreResult<Table> {
    let value_edges = tercile_edges(table, Measure::Cltv)?;
    let risk_edges = tercile_edges(table, Measure::ChurnScore)?;
    debug!(
        "tier edges: {}={:?}, {}={:?}",
        Measure::Cltv,
        value_edges,
        Measure::ChurnScore,
        risk_edges
    );

    let frame = table
        .frame()
        .clone()
        .lazy()
        .with_columns([
            tier_expr(Measure::Cltv.column(), value_edges, ValueTier::ALL.map(|t| t.label()))
                .alias(Dimension::CltvTier.column()),
            tier_expr(Measure::ChurnScore.column(), risk_edges, RiskTier::ALL.map(|t| t.label()))
                .alias(Dimension::RiskTier.column()),
        ])
        .with_columns([priority_expr().alias(Dimension::RetentionPriority.column())])
        .collect()?;

    let mut columns = table.schema().columns().to_vec();
    for derived in [Dimension::CltvTier, Dimension::RiskTier, Dimension::RetentionPriority] {
        if !columns.iter().any(|c| c == derived.column()) {
            columns.push(derived.column().to_string());
        }
    }

    let segmented = Table::from_frame(frame, columns)?;
    let sizes = tier_sizes(&segmented)?;
    info!(
        "segmented {} customers: value tiers {:?}, risk tiers {:?}",
        segmented.len(),
        sizes.value,
        sizes.risk
    );
    Ok(segmented)
}

/// Population of each tier and priority
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TierSizes {
    pub value: [usize; TIER_COUNT],
    pub risk: [usize; TIER_COUNT],
    pub priority: BTreeMap<RetentionPriority, usize>,
    pub unsegmented: usize,
}

/// Count rows per tier; a table that was never segmented is all `unsegmented`
pub fn tier_sizes(table: &Table) -> CoreResult<TierSizes> {
    let mut sizes = TierSizes::default();
    let Ok(priorities) = table.frame().column(Dimension::RetentionPriority.column()) else {
        sizes.unsegmented = table.len();
        return Ok(sizes);
    };
    sizes.unsegmented = priorities.null_count();

    let view = View::all(table);
    let value = group_count(&view, &[Dimension::CltvTier])?;
    let risk = group_count(&view, &[Dimension::RiskTier])?;
    let priority = group_count(&view, &[Dimension::RetentionPriority])?;
    let count = |table: &SummaryTable, label: &str| {
        table.value(&[label], "count").unwrap_or(0.0) as usize
    };

    for (i, tier) in ValueTier::ALL.iter().enumerate() {
        sizes.value[i] = count(&value, tier.label());
    }
    for (i, tier) in RiskTier::ALL.iter().enumerate() {
        sizes.risk[i] = count(&risk, tier.label());
    }
    for level in RetentionPriority::ALL {
        let n = count(&priority, level.label());
        if n > 0 {
            sizes.priority.insert(level, n);
        }
    }
    Ok(sizes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_record;
    use crate::filter::FilterCriteria;
    use std::collections::HashMap;

    fn ranked_table(scores: &[f64]) -> Table {
        let records = scores
            .iter()
            .enumerate()
            .map(|(i, &score)| {
                let contract = if i % 2 == 0 { "Month-to-Month" } else { "Two Year" };
                test_record(
                    &format!("C{}", i + 1),
                    contract,
                    i as u32 * 6,
                    (i as f64 + 1.0) * 100.0,
                    score,
                    i % 3 == 0,
                )
            })
            .collect();
        Table::from_records(records).unwrap()
    }

    /// Value tier, risk tier and priority labels of the row with this CLTV
    fn tiers_of(table: &Table, cltv: f64) -> (String, String, String) {
        let row = table
            .values(Measure::Cltv)
            .unwrap()
            .iter()
            .position(|v| *v == Some(cltv))
            .unwrap();
        let label = |dimension| table.texts(dimension).unwrap()[row].clone().unwrap();
        (
            label(Dimension::CltvTier),
            label(Dimension::RiskTier),
            label(Dimension::RetentionPriority),
        )
    }

    fn scores_table(values: &[f64]) -> Table {
        let records = values
            .iter()
            .enumerate()
            .map(|(i, &v)| test_record(&format!("S{}", i), "One Year", 1, v, v, false))
            .collect();
        Table::from_records(records).unwrap()
    }

    #[test]
    fn test_priority_rule() {
        assert_eq!(
            retention_priority(ValueTier::High, RiskTier::High),
            RetentionPriority::CriticalRetention
        );
        assert_eq!(
            retention_priority(ValueTier::High, RiskTier::Low),
            RetentionPriority::HighValueMonitor
        );
        assert_eq!(
            retention_priority(ValueTier::High, RiskTier::Medium),
            RetentionPriority::HighValueMonitor
        );
        for risk in RiskTier::ALL {
            assert_eq!(retention_priority(ValueTier::Low, risk), RetentionPriority::Standard);
            assert_eq!(retention_priority(ValueTier::Mid, risk), RetentionPriority::Standard);
        }
    }

    #[test]
    fn test_edges_interpolate_linearly() {
        let scores: Vec<f64> = (1..=9).map(|i| i as f64 * 10.0).collect();
        let edges = tercile_edges(&ranked_table(&scores), Measure::Cltv).unwrap();

        assert!((edges[0] - 1100.0 / 3.0).abs() < 1e-9, "{:?}", edges);
        assert!((edges[1] - 1900.0 / 3.0).abs() < 1e-9, "{:?}", edges);
    }

    #[test]
    fn test_nine_rows_split_into_equal_terciles() {
        let scores: Vec<f64> = (1..=9).map(|i| i as f64 * 10.0).collect();
        let table = segment(&ranked_table(&scores)).unwrap();

        let sizes = tier_sizes(&table).unwrap();
        assert_eq!(sizes.value, [3, 3, 3]);
        assert_eq!(sizes.risk, [3, 3, 3]);
        assert_eq!(sizes.unsegmented, 0);

        let (_, _, top) = tiers_of(&table, 900.0);
        assert_eq!(top, RetentionPriority::CriticalRetention.label());
        let (value, risk, _) = tiers_of(&table, 100.0);
        assert_eq!(value, ValueTier::Low.label());
        assert_eq!(risk, RiskTier::Low.label());
    }

    #[test]
    fn test_low_value_high_risk_is_standard() {
        let scores: Vec<f64> = (1..=9).rev().map(|i| i as f64 * 10.0).collect();
        let table = segment(&ranked_table(&scores)).unwrap();

        let (value, risk, priority) = tiers_of(&table, 100.0);
        assert_eq!(value, "Low Value");
        assert_eq!(risk, "High Risk");
        assert_eq!(priority, "Standard");

        let (_, _, rich) = tiers_of(&table, 900.0);
        assert_eq!(rich, "High Value - Monitor");
    }

    #[test]
    fn test_boundary_ties_fall_into_lower_bin() {
        // 1/3 quantile of [1,2,2,2,3,4] sits exactly on 2
        let table = scores_table(&[4.0, 2.0, 1.0, 2.0, 3.0, 2.0]);
        let edges = tercile_edges(&table, Measure::ChurnScore).unwrap();
        assert_eq!(edges[0], 2.0);
        assert_eq!(tercile_bin(2.0, &edges), 0);
        assert_eq!(tercile_bin(1.0, &edges), 0);
        assert_eq!(tercile_bin(4.0, &edges), 2);

        let sizes = tier_sizes(&segment(&table).unwrap()).unwrap();
        assert_eq!(sizes.risk[0], 4);
    }

    #[test]
    fn test_constant_column_lands_in_lowest_tier() {
        let table = segment(&ranked_table(&[50.0; 4])).unwrap();
        assert_eq!(tier_sizes(&table).unwrap().risk, [4, 0, 0]);
    }

    #[test]
    fn test_every_row_has_exactly_one_tier() {
        let scores = [12.5, 80.0, 33.0, 33.0, 97.0, 5.0, 61.0, 61.0, 44.0, 70.0, 18.0];
        let table = segment(&ranked_table(&scores)).unwrap();
        let sizes = tier_sizes(&table).unwrap();

        assert_eq!(sizes.value.iter().sum::<usize>(), table.len());
        assert_eq!(sizes.risk.iter().sum::<usize>(), table.len());
        assert_eq!(sizes.priority.values().sum::<usize>(), table.len());
        for count in sizes.value {
            assert!((3..=4).contains(&count), "value tier size {}", count);
        }
    }

    #[test]
    fn test_priority_column_matches_the_rule() {
        let scores = [3.0, 9.0, 1.0, 7.0, 5.0, 8.0, 2.0, 6.0, 4.0, 9.0, 1.0, 5.0];
        let table = segment(&ranked_table(&scores)).unwrap();

        let values = table.texts(Dimension::CltvTier).unwrap();
        let risks = table.texts(Dimension::RiskTier).unwrap();
        let priorities = table.texts(Dimension::RetentionPriority).unwrap();
        for ((value, risk), priority) in values.iter().zip(&risks).zip(&priorities) {
            let value = ValueTier::ALL
                .into_iter()
                .find(|t| Some(t.label()) == value.as_deref())
                .unwrap();
            let risk = RiskTier::ALL
                .into_iter()
                .find(|t| Some(t.label()) == risk.as_deref())
                .unwrap();
            assert_eq!(
                priority.as_deref(),
                Some(retention_priority(value, risk).label())
            );
        }
    }

    #[test]
    fn test_tiers_survive_filtering() {
        let scores: Vec<f64> = (1..=9).map(|i| i as f64 * 10.0).collect();
        let table = segment(&ranked_table(&scores)).unwrap();
        let criteria = FilterCriteria::new()
            .include(Dimension::Contract, ["Two Year"])
            .tenure_between(0, 30);

        let original: HashMap<_, _> = table
            .texts(Dimension::CustomerId)
            .unwrap()
            .into_iter()
            .zip(table.texts(Dimension::RetentionPriority).unwrap())
            .collect();

        let view = criteria.apply(&table).unwrap();
        assert!(!view.is_empty());
        let ids = view.texts(Dimension::CustomerId).unwrap();
        let priorities = view.texts(Dimension::RetentionPriority).unwrap();
        for (id, priority) in ids.into_iter().zip(priorities) {
            assert_eq!(original[&id], priority);
        }
    }

    #[test]
    fn test_segmented_schema_exposes_priorities() {
        let scores: Vec<f64> = (1..=9).map(|i| i as f64 * 10.0).collect();
        let table = segment(&ranked_table(&scores)).unwrap();

        assert!(table.is_segmented());
        assert!(table.schema().has_column("retention_priority"));
        let priorities = table.schema().categories(Dimension::RetentionPriority);
        assert_eq!(priorities.len(), 3);
        assert!(priorities.contains(&"Critical Retention".to_string()));
    }

    #[test]
    fn test_unsegmented_table_reports_every_row() {
        let table = ranked_table(&[10.0, 20.0]);
        let sizes = tier_sizes(&table).unwrap();
        assert_eq!(sizes.unsegmented, 2);
        assert_eq!(sizes.value, [0, 0, 0]);
    }

    #[test]
    fn test_insufficient_rows() {
        let table = ranked_table(&[10.0, 20.0]);
        match segment(&table) {
            Err(ChurnError::InsufficientData { required, actual }) => {
                assert_eq!(required, 3);
                assert_eq!(actual, 2);
            }
            other => panic!("expected InsufficientData, got {:?}", other.map(|t| t.len())),
        }
    }
}
