//! Dataset loading, field addressing and the process-wide table cache using Polars

use crate::error::{ChurnError, CoreResult};
use log::{debug, info};
use polars::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

/// Fixed logical location of the churn dataset, relative to the working directory
pub const DEFAULT_DATA_PATH: &str = "data/final_dataset.csv";

/// Categorical fields of a customer record, addressable by their canonical column name
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dimension {
    CustomerId,
    Contract,
    InternetService,
    PaymentMethod,
    State,
    City,
    ChurnLabel,
    ChurnCategory,
    CustomerStatus,
    OnlineSecurity,
    OnlineBackup,
    DeviceProtectionPlan,
    PremiumTechSupport,
    StreamingTv,
    StreamingMovies,
    UnlimitedData,
    CltvTier,
    RiskTier,
    RetentionPriority,
}

impl Dimension {
    pub const ALL: [Dimension; 19] = [
        Dimension::CustomerId,
        Dimension::Contract,
        Dimension::InternetService,
        Dimension::PaymentMethod,
        Dimension::State,
        Dimension::City,
        Dimension::ChurnLabel,
        Dimension::ChurnCategory,
        Dimension::CustomerStatus,
        Dimension::OnlineSecurity,
        Dimension::OnlineBackup,
        Dimension::DeviceProtectionPlan,
        Dimension::PremiumTechSupport,
        Dimension::StreamingTv,
        Dimension::StreamingMovies,
        Dimension::UnlimitedData,
        Dimension::CltvTier,
        Dimension::RiskTier,
        Dimension::RetentionPriority,
    ];

    /// Canonical (normalized) column name of the field
    pub fn column(&self) -> &'static str {
        match self {
            Dimension::CustomerId => "customer_id",
            Dimension::Contract => "contract",
            Dimension::InternetService => "internet_service",
            Dimension::PaymentMethod => "payment_method",
            Dimension::State => "state",
            Dimension::City => "city",
            Dimension::ChurnLabel => "churn_label",
            Dimension::ChurnCategory => "churn_category",
            Dimension::CustomerStatus => "customer_status",
            Dimension::OnlineSecurity => "online_security",
            Dimension::OnlineBackup => "online_backup",
            Dimension::DeviceProtectionPlan => "device_protection_plan",
            Dimension::PremiumTechSupport => "premium_tech_support",
            Dimension::StreamingTv => "streaming_tv",
            Dimension::StreamingMovies => "streaming_movies",
            Dimension::UnlimitedData => "unlimited_data",
            Dimension::CltvTier => "cltv_tier",
            Dimension::RiskTier => "risk_tier",
            Dimension::RetentionPriority => "retention_priority",
        }
    }

    /// Derived by segmentation rather than read from the source file
    pub fn is_derived(&self) -> bool {
        matches!(
            self,
            Dimension::CltvTier | Dimension::RiskTier | Dimension::RetentionPriority
        )
    }

    /// Must be present and non-empty on every source row
    pub fn is_required(&self) -> bool {
        matches!(
            self,
            Dimension::CustomerId
                | Dimension::Contract
                | Dimension::InternetService
                | Dimension::PaymentMethod
                | Dimension::State
                | Dimension::City
                | Dimension::ChurnLabel
        )
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize_column_name(s).replace('-', "_");
        Dimension::ALL
            .into_iter()
            .find(|d| d.column() == wanted)
            .ok_or_else(|| format!("unknown categorical field: {}", s))
    }
}

/// Numeric fields of a customer record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Measure {
    TenureInMonths,
    MonthlyCharges,
    TotalRevenue,
    Cltv,
    ChurnValue,
    ChurnScore,
    SatisfactionScore,
    Latitude,
    Longitude,
}

impl Measure {
    pub const ALL: [Measure; 9] = [
        Measure::TenureInMonths,
        Measure::MonthlyCharges,
        Measure::TotalRevenue,
        Measure::Cltv,
        Measure::ChurnValue,
        Measure::ChurnScore,
        Measure::SatisfactionScore,
        Measure::Latitude,
        Measure::Longitude,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            Measure::TenureInMonths => "tenure_in_months",
            Measure::MonthlyCharges => "monthly_charges",
            Measure::TotalRevenue => "total_revenue",
            Measure::Cltv => "cltv",
            Measure::ChurnValue => "churn_value",
            Measure::ChurnScore => "churn_score",
            Measure::SatisfactionScore => "satisfaction_score",
            Measure::Latitude => "latitude",
            Measure::Longitude => "longitude",
        }
    }

    /// Must be a finite number on every source row; `churn_value` is derived instead
    pub fn is_required(&self) -> bool {
        matches!(
            self,
            Measure::TenureInMonths
                | Measure::MonthlyCharges
                | Measure::TotalRevenue
                | Measure::Cltv
                | Measure::ChurnScore
        )
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for Measure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize_column_name(s).replace('-', "_");
        Measure::ALL
            .into_iter()
            .find(|m| m.column() == wanted)
            .ok_or_else(|| format!("unknown numeric field: {}", s))
    }
}

/// Predicate selecting churned customers
pub fn churned() -> Expr {
    col(Measure::ChurnValue.column()).eq(lit(1.0))
}

/// Service adoption flags (Yes / No / No Internet Service style values)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceAdoption {
    pub online_security: Option<String>,
    pub online_backup: Option<String>,
    pub device_protection_plan: Option<String>,
    pub premium_tech_support: Option<String>,
    pub streaming_tv: Option<String>,
    pub streaming_movies: Option<String>,
    pub unlimited_data: Option<String>,
}

/// One subscriber at the snapshot time, the row type behind [`Table::from_records`]
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRecord {
    pub customer_id: String,
    pub contract: String,
    pub internet_service: String,
    pub payment_method: String,
    pub state: String,
    pub city: String,
    /// Always "Yes" or "No"
    pub churn_label: String,
    /// 1 when `churn_label == "Yes"`
    pub churn_value: u8,
    pub churn_category: Option<String>,
    pub customer_status: Option<String>,
    pub services: ServiceAdoption,
    pub tenure_in_months: u32,
    pub monthly_charges: f64,
    pub total_revenue: f64,
    pub cltv: f64,
    pub churn_score: f64,
    pub satisfaction_score: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl CustomerRecord {
    /// Value of a source categorical field; derived tiers are never stored on a record
    pub fn dimension(&self, dimension: Dimension) -> Option<&str> {
        match dimension {
            Dimension::CustomerId => Some(&self.customer_id),
            Dimension::Contract => Some(&self.contract),
            Dimension::InternetService => Some(&self.internet_service),
            Dimension::PaymentMethod => Some(&self.payment_method),
            Dimension::State => Some(&self.state),
            Dimension::City => Some(&self.city),
            Dimension::ChurnLabel => Some(&self.churn_label),
            Dimension::ChurnCategory => self.churn_category.as_deref(),
            Dimension::CustomerStatus => self.customer_status.as_deref(),
            Dimension::OnlineSecurity => self.services.online_security.as_deref(),
            Dimension::OnlineBackup => self.services.online_backup.as_deref(),
            Dimension::DeviceProtectionPlan => self.services.device_protection_plan.as_deref(),
            Dimension::PremiumTechSupport => self.services.premium_tech_support.as_deref(),
            Dimension::StreamingTv => self.services.streaming_tv.as_deref(),
            Dimension::StreamingMovies => self.services.streaming_movies.as_deref(),
            Dimension::UnlimitedData => self.services.unlimited_data.as_deref(),
            Dimension::CltvTier | Dimension::RiskTier | Dimension::RetentionPriority => None,
        }
    }

    /// Value of `measure`, `None` when the optional field is missing
    pub fn measure(&self, measure: Measure) -> Option<f64> {
        match measure {
            Measure::TenureInMonths => Some(f64::from(self.tenure_in_months)),
            Measure::MonthlyCharges => Some(self.monthly_charges),
            Measure::TotalRevenue => Some(self.total_revenue),
            Measure::Cltv => Some(self.cltv),
            Measure::ChurnValue => Some(f64::from(self.churn_value)),
            Measure::ChurnScore => Some(self.churn_score),
            Measure::SatisfactionScore => self.satisfaction_score,
            Measure::Latitude => self.latitude,
            Measure::Longitude => self.longitude,
        }
    }
}

/// Column metadata plus the distinct values that drive the filter controls
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    columns: Vec<String>,
    categories: BTreeMap<Dimension, Vec<String>>,
    tenure_range: Option<(u32, u32)>,
}

impl Schema {
    fn infer(columns: Vec<String>, frame: &DataFrame) -> CoreResult<Self> {
        let mut categories = BTreeMap::new();
        for dimension in Dimension::ALL {
            if dimension == Dimension::CustomerId {
                continue;
            }
            let Ok(series) = frame.column(dimension.column()) else {
                continue;
            };
            let distinct = series.drop_nulls().unique_stable()?;
            let values: Vec<String> = distinct
                .str()?
                .into_iter()
                .flatten()
                .map(str::to_string)
                .collect();
            if !values.is_empty() {
                categories.insert(dimension, values);
            }
        }

        let tenure = frame.column(Measure::TenureInMonths.column())?.f64()?;
        let tenure_range = tenure
            .min()
            .zip(tenure.max())
            .map(|(lo, hi)| (lo as u32, hi as u32));

        Ok(Schema {
            columns,
            categories,
            tenure_range,
        })
    }

    /// Normalized column names, in source order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Whether the table carries `name`, compared after normalization
    pub fn has_column(&self, name: &str) -> bool {
        let wanted = normalize_column_name(name);
        self.columns.iter().any(|c| *c == wanted)
    }

    /// Distinct values of a categorical field in order of first appearance
    pub fn categories(&self, dimension: Dimension) -> &[String] {
        self.categories
            .get(&dimension)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Observed `(min, max)` tenure in months, `None` for an empty table
    pub fn tenure_range(&self) -> Option<(u32, u32)> {
        self.tenure_range
    }
}

/// Immutable in-memory customer table backed by a polars `DataFrame`
///
/// Every source dimension is a `String` column and every measure a `Float64`
/// column, whether or not the file carried it; absent optional fields are null.
#[derive(Debug, Clone)]
pub struct Table {
    frame: DataFrame,
    schema: Schema,
}

impl Table {
    /// Build a table from records, labelling columns with their canonical names
    pub fn from_records(records: Vec<CustomerRecord>) -> CoreResult<Self> {
        let mut columns = Vec::with_capacity(Dimension::ALL.len() + Measure::ALL.len());
        for dimension in Dimension::ALL.into_iter().filter(|d| !d.is_derived()) {
            let values: Vec<Option<&str>> = records.iter().map(|r| r.dimension(dimension)).collect();
            columns.push(Series::new(dimension.column(), values));
        }
        for measure in Measure::ALL {
            let values: Vec<Option<f64>> = records.iter().map(|r| r.measure(measure)).collect();
            columns.push(Series::new(measure.column(), values));
        }

        let names = columns.iter().map(|s| s.name().to_string()).collect();
        Self::from_frame(DataFrame::new(columns)?, names)
    }

    /// Wrap a canonical frame; customer ids must be unique
    pub(crate) fn from_frame(frame: DataFrame, columns: Vec<String>) -> CoreResult<Self> {
        {
            let ids = frame.column(Dimension::CustomerId.column())?.str()?;
            let mut seen = HashSet::with_capacity(ids.len());
            for id in ids.into_iter().flatten() {
                if !seen.insert(id) {
                    return Err(ChurnError::DuplicateCustomer {
                        customer_id: id.to_string(),
                    });
                }
            }
        }

        let schema = Schema::infer(columns, &frame)?;
        Ok(Table { frame, schema })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// True once every row carries its derived tiers
    pub fn is_segmented(&self) -> bool {
        !self.is_empty()
            && self
                .frame
                .column(Dimension::RetentionPriority.column())
                .is_ok_and(|priorities| priorities.null_count() == 0)
    }

    /// Values of a categorical column in row order
    pub fn texts(&self, dimension: Dimension) -> CoreResult<Vec<Option<String>>> {
        text_values(&self.frame, dimension)
    }

    /// Values of a numeric column in row order
    pub fn values(&self, measure: Measure) -> CoreResult<Vec<Option<f64>>> {
        numeric_values(&self.frame, measure)
    }
}

/// Copy one categorical column out of `frame`
pub fn text_values(frame: &DataFrame, dimension: Dimension) -> CoreResult<Vec<Option<String>>> {
    let values = frame
        .column(dimension.column())?
        .str()?
        .into_iter()
        .map(|value| value.map(str::to_string))
        .collect();
    Ok(values)
}

/// Copy one numeric column out of `frame`
pub fn numeric_values(frame: &DataFrame, measure: Measure) -> CoreResult<Vec<Option<f64>>> {
    Ok(frame.column(measure.column())?.f64()?.into_iter().collect())
}

/// Canonical form of a header: trimmed and lowercased
pub fn normalize_column_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Rename every header to its canonical form, rejecting headers that collide
fn normalize_headers(df: &mut DataFrame, path: &Path) -> CoreResult<Vec<String>> {
    let normalized: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(normalize_column_name)
        .collect();

    let mut seen = HashSet::new();
    for name in &normalized {
        if !seen.insert(name.as_str()) {
            return Err(ChurnError::unavailable(
                path,
                format!("duplicate column '{}' after normalizing headers", name),
            ));
        }
    }

    df.set_column_names(&normalized)?;
    Ok(normalized)
}

/// Trimmed text with empty strings turned into nulls
fn clean_text(name: &str) -> Expr {
    let trimmed = col(name).cast(DataType::String).str().strip_chars(lit(NULL));
    when(trimmed.clone().eq(lit("")))
        .then(lit(NULL))
        .otherwise(trimmed)
        .alias(name)
}

/// Float column where unparseable and non-finite cells are null
fn finite_number(name: &str) -> Expr {
    let value = col(name).cast(DataType::Float64);
    when(value.clone().is_finite())
        .then(value)
        .otherwise(lit(NULL))
        .alias(name)
}

/// Select the model's columns in canonical order and types
fn canonical_frame(df: DataFrame, columns: &[String]) -> CoreResult<DataFrame> {
    let present = |name: &str| columns.iter().any(|c| c == name);

    let mut exprs = Vec::with_capacity(Dimension::ALL.len() + Measure::ALL.len());
    for dimension in Dimension::ALL.into_iter().filter(|d| !d.is_derived()) {
        let name = dimension.column();
        if present(name) {
            exprs.push(clean_text(name));
        } else if dimension.is_required() {
            return Err(ChurnError::MissingColumn {
                column: name.to_string(),
            });
        } else {
            exprs.push(lit(NULL).cast(DataType::String).alias(name));
        }
    }
    for measure in Measure::ALL {
        let name = measure.column();
        if present(name) {
            exprs.push(finite_number(name));
        } else if measure.is_required() {
            return Err(ChurnError::MissingColumn {
                column: name.to_string(),
            });
        } else {
            exprs.push(lit(NULL).cast(DataType::Float64).alias(name));
        }
    }

    Ok(df.lazy().select(exprs).collect()?)
}

fn first_null(series: &Series) -> Option<usize> {
    if series.null_count() == 0 {
        return None;
    }
    series.is_null().into_iter().position(|is_null| is_null == Some(true))
}

/// Enforce non-null required fields, a whole non-negative tenure and a Yes/No
/// churn label; `churn_value` is rebuilt from the label
fn validate(mut frame: DataFrame, path: &Path) -> CoreResult<DataFrame> {
    let malformed = |row: usize, column: &str, problem: &str| {
        ChurnError::unavailable(path, format!("row {}: column '{}' {}", row + 1, column, problem))
    };

    for dimension in Dimension::ALL.into_iter().filter(Dimension::is_required) {
        if let Some(row) = first_null(frame.column(dimension.column())?) {
            return Err(malformed(row, dimension.column(), "is empty"));
        }
    }
    for measure in Measure::ALL.into_iter().filter(Measure::is_required) {
        if let Some(row) = first_null(frame.column(measure.column())?) {
            return Err(malformed(row, measure.column(), "is missing or not numeric"));
        }
    }

    let tenure = frame.column(Measure::TenureInMonths.column())?.f64()?;
    let bad_tenure = tenure.into_iter().position(|months| {
        months.is_some_and(|t| t < 0.0 || t.fract() != 0.0 || t > f64::from(u32::MAX))
    });
    if let Some(row) = bad_tenure {
        return Err(malformed(
            row,
            Measure::TenureInMonths.column(),
            "must be a non-negative whole number",
        ));
    }

    let height = frame.height();
    let (labels, churn_values) = {
        let labels = frame.column(Dimension::ChurnLabel.column())?.str()?;
        let source = frame.column(Measure::ChurnValue.column())?.f64()?;
        let mut normalized = Vec::with_capacity(height);
        let mut churn_values = Vec::with_capacity(height);
        for (row, (label, value)) in labels.into_iter().zip(source.into_iter()).enumerate() {
            let churned = match label {
                Some(l) if l.eq_ignore_ascii_case("yes") => true,
                Some(l) if l.eq_ignore_ascii_case("no") => false,
                _ => return Err(malformed(row, "churn_label", "must be Yes or No")),
            };
            let derived = f64::from(u8::from(churned));
            if value.is_some_and(|v| v != derived) {
                return Err(malformed(row, "churn_value", "disagrees with churn_label"));
            }
            normalized.push(if churned { "Yes" } else { "No" });
            churn_values.push(derived);
        }
        (normalized, churn_values)
    };

    frame.with_column(Series::new(Dimension::ChurnLabel.column(), labels))?;
    frame.with_column(Series::new(Measure::ChurnValue.column(), churn_values))?;
    Ok(frame)
}

/// Read the churn dataset from `path` into an immutable table
///
/// Header names are matched case-insensitively after trimming. `churn_value`
/// is derived from `churn_label`; when the file also carries `churn_value` the
/// two must agree on every row.
///
/// # Arguments
/// * `path` - Location of the CSV file
///
/// # Returns
/// * The validated `Table`, or `DataUnavailable` / `MissingColumn` /
///   `DuplicateCustomer` describing why the file cannot be used
pub fn load_table(path: impl AsRef<Path>) -> CoreResult<Table> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(ChurnError::unavailable(path, "file not found"));
    }

    let mut df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(10_000))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .map_err(|e| ChurnError::unavailable(path, e.to_string()))?;

    let columns = normalize_headers(&mut df, path)?;
    let frame = validate(canonical_frame(df, &columns)?, path)?;
    let table = Table::from_frame(frame, columns)?;

    info!(
        "loaded {} customers ({} columns) from {}",
        table.len(),
        table.schema().columns().len(),
        path.display()
    );
    Ok(table)
}

/// Lazily populated table handle; storage is read at most once per cache
#[derive(Debug, Default)]
pub struct DatasetCache {
    cell: OnceLock<Arc<Table>>,
}

impl DatasetCache {
    pub const fn new() -> Self {
        DatasetCache {
            cell: OnceLock::new(),
        }
    }

    /// Return the cached table, reading `path` only if nothing has been loaded yet.
    /// A failed read leaves the cache empty.
    pub fn get_or_load(&self, path: impl AsRef<Path>) -> CoreResult<Arc<Table>> {
        if let Some(table) = self.cell.get() {
            debug!("dataset cache hit ({} customers)", table.len());
            return Ok(Arc::clone(table));
        }

        let table = Arc::new(load_table(path)?);
        Ok(Arc::clone(self.cell.get_or_init(|| table)))
    }

    /// The cached table, without loading
    pub fn get(&self) -> Option<Arc<Table>> {
        self.cell.get().cloned()
    }
}

static SHARED_DATASET: DatasetCache = DatasetCache::new();

/// Load the dataset through the process-wide cache
pub fn load(path: impl AsRef<Path>) -> CoreResult<Arc<Table>> {
    SHARED_DATASET.get_or_load(path)
}

#[cfg(test)]
pub(crate) fn test_record(
    id: &str,
    contract: &str,
    tenure_in_months: u32,
    cltv: f64,
    churn_score: f64,
    churned: bool,
) -> CustomerRecord {
    CustomerRecord {
        customer_id: id.to_string(),
        contract: contract.to_string(),
        internet_service: "Yes".to_string(),
        payment_method: "Credit Card".to_string(),
        state: "California".to_string(),
        city: "Los Angeles".to_string(),
        churn_label: if churned { "Yes" } else { "No" }.to_string(),
        churn_value: u8::from(churned),
        churn_category: churned.then(|| "Competitor".to_string()),
        customer_status: Some(if churned { "Churned" } else { "Stayed" }.to_string()),
        services: ServiceAdoption::default(),
        tenure_in_months,
        monthly_charges: 50.0,
        total_revenue: 50.0 * f64::from(tenure_in_months),
        cltv,
        churn_score,
        satisfaction_score: Some(3.0),
        latitude: Some(34.05),
        longitude: Some(-118.24),
    }
}
