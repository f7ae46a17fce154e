//! Filter engine: categorical inclusion sets and inclusive numeric ranges,
//! compiled to a polars predicate

use crate::data::{numeric_values, text_values, Dimension, Measure, Schema, Table};
use crate::error::CoreResult;
use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// User-selected criteria, combined by logical AND
///
/// A dimension that was never constrained keeps every row; a dimension
/// constrained to an empty set keeps none. Rows with no value for a
/// constrained field are excluded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterCriteria {
    categories: BTreeMap<Dimension, BTreeSet<String>>,
    ranges: BTreeMap<Measure, (f64, f64)>,
}

impl FilterCriteria {
    /// Criteria that keep every row
    pub fn new() -> Self {
        Self::default()
    }

    /// Every known category of `dimensions` plus the full tenure range:
    /// the default selection that reproduces the input
    pub fn select_all(schema: &Schema, dimensions: &[Dimension]) -> Self {
        let mut criteria = dimensions.iter().fold(Self::new(), |criteria, &dimension| {
            criteria.include(dimension, schema.categories(dimension).iter().cloned())
        });
        if let Some((min, max)) = schema.tenure_range() {
            criteria = criteria.tenure_between(min, max);
        }
        criteria
    }

    /// Keep rows whose value for `dimension` is one of `values`
    pub fn include<I, S>(mut self, dimension: Dimension, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories
            .insert(dimension, values.into_iter().map(Into::into).collect());
        self
    }

    /// Keep rows whose `measure` lies in `[min, max]`
    pub fn within(mut self, measure: Measure, min: f64, max: f64) -> Self {
        self.ranges.insert(measure, (min, max));
        self
    }

    pub fn tenure_between(self, min: u32, max: u32) -> Self {
        self.within(Measure::TenureInMonths, f64::from(min), f64::from(max))
    }

    /// Allowed values of `dimension`, `None` when it is unconstrained
    pub fn included(&self, dimension: Dimension) -> Option<&BTreeSet<String>> {
        self.categories.get(&dimension)
    }

    pub fn range(&self, measure: Measure) -> Option<(f64, f64)> {
        self.ranges.get(&measure).copied()
    }

    pub fn is_unconstrained(&self) -> bool {
        self.categories.is_empty() && self.ranges.is_empty()
    }

    /// The criteria as one boolean expression
    ///
    /// Neither `is_in` nor the comparisons are true on a null cell, so a
    /// missing value never passes a constraint.
    pub fn predicate(&self) -> Expr {
        let inclusions = self.categories.iter().map(|(dimension, allowed)| {
            let allowed: Vec<&str> = allowed.iter().map(String::as_str).collect();
            col(dimension.column()).is_in(lit(Series::new("allowed", allowed)))
        });
        let ranges = self.ranges.iter().map(|(measure, &(min, max))| {
            col(measure.column())
                .gt_eq(lit(min))
                .and(col(measure.column()).lt_eq(lit(max)))
        });

        inclusions
            .chain(ranges)
            .reduce(|all, next| all.and(next))
            .unwrap_or_else(|| lit(true))
    }

    /// Rows of `table` matching every criterion
    pub fn apply(&self, table: &Table) -> CoreResult<View> {
        View::all(table).filter(self)
    }
}

/// Filter `table` by `criteria` without touching the table
///
/// # Arguments
/// * `table` - Loaded (optionally segmented) customer table
/// * `criteria` - Inclusion sets and ranges, combined by AND
///
/// # Returns
/// * A `View` holding the matching rows in table order
pub fn filter(table: &Table, criteria: &FilterCriteria) -> CoreResult<View> {
    criteria.apply(table)
}

/// Rows of a table that survived filtering
///
/// Cloning a polars frame shares its column buffers, so a view costs one
/// filtered copy and never touches the table it came from.
#[derive(Debug, Clone)]
pub struct View {
    frame: DataFrame,
}

impl View {
    /// The identity view over every row
    pub fn all(table: &Table) -> Self {
        View {
            frame: table.frame().clone(),
        }
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    /// Lazy handle for building aggregations over the view
    pub fn lazy(&self) -> LazyFrame {
        self.frame.clone().lazy()
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Narrow this view further
    pub fn filter(&self, criteria: &FilterCriteria) -> CoreResult<View> {
        self.retain(criteria.predicate())
    }

    /// Keep the rows where `predicate` is true
    pub fn retain(&self, predicate: Expr) -> CoreResult<View> {
        let frame = self.lazy().filter(predicate).collect()?;
        Ok(View { frame })
    }

    /// Values of `dimension` in row order
    pub fn texts(&self, dimension: Dimension) -> CoreResult<Vec<Option<String>>> {
        text_values(&self.frame, dimension)
    }

    pub fn values(&self, measure: Measure) -> CoreResult<Vec<Option<f64>>> {
        numeric_values(&self.frame, measure)
    }
}
