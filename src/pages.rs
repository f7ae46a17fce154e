//! Page controllers: per-page criteria, KPIs and the summary tables behind each chart

use crate::aggregate::{
    churn_rate, count_distinct, count_where, describe_by, group_agg, group_count, histogram, mean,
    points, ranked, sum, top_n, AggOp, Aggregation, GroupDistribution, HistogramBin, Point,
    SummaryTable,
};
use crate::data::{self, churned, Dimension, Measure, Schema, Table};
use crate::error::{ChurnError, CoreResult};
use crate::filter::{FilterCriteria, View};
use crate::segment::{segment, RetentionPriority, TIER_COUNT};
use log::warn;
use polars::prelude::{col, lit};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Showcase images, relative to the images directory
pub const SHOWCASE_IMAGES: [(&str, &str); 3] = [
    ("Executive Overview Dashboard", "Dashboard_1.png"),
    ("Churn Risk & Service Analysis", "Dashboard_2.png"),
    ("Revenue & Geographic Intelligence", "Dashboard_3.png"),
];

const ABOUT_TEXT: &str = "Customer Intelligence & Retention Strategy. \
Monitors customer stability, quantifies the recurring revenue exposed to churn \
and ranks accounts for proactive retention. Churn score and CLTV are read from \
the dataset; this tool filters, aggregates and segments them into retention \
priorities.";

const HISTOGRAM_BINS: usize = 30;
const TOP_STATES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, clap::ValueEnum)]
pub enum Page {
    Executive,
    Revenue,
    ChurnDrivers,
    Geography,
    Retention,
    Showcase,
    About,
}

impl Page {
    pub const ALL: [Page; 7] = [
        Page::Executive,
        Page::Revenue,
        Page::ChurnDrivers,
        Page::Geography,
        Page::Retention,
        Page::Showcase,
        Page::About,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Page::Executive => "Executive Overview",
            Page::Revenue => "Customer & Revenue Analysis",
            Page::ChurnDrivers => "Churn Risk Deep Dive",
            Page::Geography => "Geographic Intelligence",
            Page::Retention => "CLTV & Retention Strategy",
            Page::Showcase => "Dashboard Showcase",
            Page::About => "About",
        }
    }

    /// One-line description shown in the About page's module overview
    pub fn summary(&self) -> &'static str {
        match self {
            Page::Executive => "KPI and retention summary",
            Page::Revenue => "Revenue segmentation by contract, payment and service",
            Page::ChurnDrivers => "Service adoption, satisfaction and churn drivers",
            Page::Geography => "Regional revenue, churn and customer locations",
            Page::Retention => "CLTV and churn-risk tiers with retention priorities",
            Page::Showcase => "Executive BI dashboard gallery",
            Page::About => "Platform overview",
        }
    }

    /// Short machine-friendly name, used for chart file names
    pub fn slug(&self) -> &'static str {
        match self {
            Page::Executive => "executive",
            Page::Revenue => "revenue",
            Page::ChurnDrivers => "churn_drivers",
            Page::Geography => "geography",
            Page::Retention => "retention",
            Page::Showcase => "showcase",
            Page::About => "about",
        }
    }

    /// Categorical controls the page exposes
    pub fn filter_dimensions(&self) -> &'static [Dimension] {
        match self {
            Page::Executive => &[Dimension::Contract, Dimension::InternetService, Dimension::State],
            Page::Revenue => &[
                Dimension::Contract,
                Dimension::PaymentMethod,
                Dimension::InternetService,
            ],
            Page::ChurnDrivers => &[
                Dimension::Contract,
                Dimension::InternetService,
                Dimension::ChurnLabel,
            ],
            Page::Geography => &[Dimension::Contract, Dimension::ChurnLabel],
            Page::Retention => &[Dimension::RetentionPriority, Dimension::Contract],
            Page::Showcase | Page::About => &[],
        }
    }

    /// Whether the page has a tenure slider
    pub fn filters_tenure(&self) -> bool {
        matches!(self, Page::Executive | Page::Revenue)
    }

    /// False for the static pages, which render without the dataset
    pub fn needs_data(&self) -> bool {
        !matches!(self, Page::Showcase | Page::About)
    }
}

/// Raw user selections; a field that was never selected means "select all"
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageFilters {
    selections: BTreeMap<Dimension, Vec<String>>,
    tenure: Option<(u32, u32)>,
}

impl PageFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict `dimension` to `values` on every page that exposes it
    pub fn select<I, S>(mut self, dimension: Dimension, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selections
            .insert(dimension, values.into_iter().map(Into::into).collect());
        self
    }

    pub fn tenure(mut self, min: u32, max: u32) -> Self {
        self.tenure = Some((min, max));
        self
    }

    /// Criteria for one page; selections on fields the page does not expose are ignored
    pub fn criteria_for(&self, page: Page, schema: &Schema) -> FilterCriteria {
        let mut criteria = FilterCriteria::new();
        for &dimension in page.filter_dimensions() {
            criteria = match self.selections.get(&dimension) {
                Some(values) => criteria.include(dimension, values.iter().cloned()),
                None => criteria.include(dimension, schema.categories(dimension).iter().cloned()),
            };
        }
        if page.filters_tenure() {
            if let Some((min, max)) = self.tenure.or(schema.tenure_range()) {
                criteria = criteria.tenure_between(min, max);
            }
        }
        criteria
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KpiValue {
    Count(usize),
    Percent(f64),
    /// Rounded to whole currency units when shown
    Currency(f64),
    /// Shown with cents
    Price(f64),
    Months(f64),
    Score(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Kpi {
    pub label: &'static str,
    pub value: KpiValue,
}

impl Kpi {
    fn new(label: &'static str, value: KpiValue) -> Self {
        Kpi { label, value }
    }
}

/// A static image and whether it exists on disk
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAsset {
    pub title: &'static str,
    pub path: PathBuf,
    pub present: bool,
}

impl ImageAsset {
    fn locate(images_dir: &Path, (title, file): (&'static str, &str)) -> Self {
        let path = images_dir.join(file);
        ImageAsset {
            title,
            present: path.is_file(),
            path,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    Table {
        title: &'static str,
        table: SummaryTable,
    },
    Distributions {
        title: &'static str,
        measure: Measure,
        groups: Vec<GroupDistribution>,
    },
    Histogram {
        title: &'static str,
        measure: Measure,
        bins: Vec<HistogramBin>,
    },
    /// Customer-level points colored by `color`, sized by monthly charges
    Scatter {
        title: &'static str,
        x: Measure,
        y: Measure,
        color: Dimension,
        points: Vec<Point>,
    },
    Images(Vec<ImageAsset>),
    /// One image, with a fallback notice when it is missing
    Preview(ImageAsset),
    Modules(Vec<Page>),
    Text(&'static str),
}

impl Section {
    pub fn title(&self) -> &str {
        match self {
            Section::Table { title, .. }
            | Section::Distributions { title, .. }
            | Section::Histogram { title, .. }
            | Section::Scatter { title, .. } => title,
            Section::Images(_) => "Dashboards",
            Section::Preview(_) => "Dashboard Preview",
            Section::Modules(_) => "Platform Modules",
            Section::Text(_) => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageReport {
    pub page: Page,
    /// Rows left after filtering
    pub rows_in_scope: usize,
    pub kpis: Vec<Kpi>,
    pub sections: Vec<Section>,
}

impl PageReport {
    fn new(page: Page, rows_in_scope: usize) -> Self {
        PageReport {
            page,
            rows_in_scope,
            kpis: Vec::new(),
            sections: Vec::new(),
        }
    }

    /// Value of the KPI labelled `label`
    pub fn kpi(&self, label: &str) -> Option<KpiValue> {
        self.kpis.iter().find(|k| k.label == label).map(|k| k.value)
    }

    pub fn table(&self, title: &str) -> Option<&SummaryTable> {
        self.sections.iter().find_map(|section| match section {
            Section::Table { title: t, table } if *t == title => Some(table),
            _ => None,
        })
    }

    /// Points of the scatter section titled `title`
    pub fn scatter(&self, title: &str) -> Option<&[Point]> {
        self.sections.iter().find_map(|section| match section {
            Section::Scatter { title: t, points, .. } if *t == title => Some(points.as_slice()),
            _ => None,
        })
    }

    pub fn section(&self, title: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.title() == title)
    }

    fn kpi_entry(&mut self, label: &'static str, value: KpiValue) {
        self.kpis.push(Kpi::new(label, value));
    }

    fn add_table(&mut self, title: &'static str, table: SummaryTable) {
        self.sections.push(Section::Table { title, table });
    }

    fn add_distributions(&mut self, title: &'static str, measure: Measure, groups: Vec<GroupDistribution>) {
        self.sections.push(Section::Distributions {
            title,
            measure,
            groups,
        });
    }

    fn add_scatter(
        &mut self,
        view: &View,
        title: &'static str,
        (x, y): (Measure, Measure),
        color: Dimension,
    ) -> CoreResult<usize> {
        let points = points(view, x, y, Measure::MonthlyCharges, color)?;
        let plotted = points.len();
        self.sections.push(Section::Scatter {
            title,
            x,
            y,
            color,
            points,
        });
        Ok(plotted)
    }
}

/// What a page shows: its report, or a notice in place of the whole page
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    Report(PageReport),
    Notice { page: Page, message: String },
}

/// The segmented dataset plus the asset locations every page reads from
#[derive(Debug)]
pub struct Dashboard {
    images_dir: PathBuf,
    table: CoreResult<Arc<Table>>,
}

impl Dashboard {
    /// Load through the process-wide cache and segment once
    ///
    /// A load failure is kept as is and reported by every page that needs data.
    pub fn open(data_path: impl AsRef<Path>, images_dir: impl Into<PathBuf>) -> Self {
        let table = data::load(data_path).map(segmented);
        if let Err(e) = &table {
            warn!("dataset unavailable: {}", e);
        }

        Dashboard {
            images_dir: images_dir.into(),
            table,
        }
    }

    /// Dashboard over an already loaded table, bypassing the shared cache
    pub fn from_table(table: Table, images_dir: impl Into<PathBuf>) -> Self {
        Dashboard {
            images_dir: images_dir.into(),
            table: Ok(segmented(Arc::new(table))),
        }
    }

    /// The segmented table, or the error that kept it from loading
    pub fn table(&self) -> CoreResult<&Table> {
        self.table.as_deref().map_err(ChurnError::clone)
    }

    /// Build one page under its own criteria
    ///
    /// # Arguments
    /// * `page` - Page to build
    /// * `filters` - User selections; only the fields `page` exposes apply
    ///
    /// # Returns
    /// * The page's report, or the error that keeps it from rendering
    pub fn build_page(&self, page: Page, filters: &PageFilters) -> CoreResult<PageReport> {
        let build: fn(&Table, &FilterCriteria) -> CoreResult<PageReport> = match page {
            Page::Showcase => return Ok(showcase(&self.images_dir)),
            Page::About => return Ok(about(&self.images_dir)),
            Page::Executive => executive,
            Page::Revenue => revenue,
            Page::ChurnDrivers => churn_drivers,
            Page::Geography => geography,
            Page::Retention => retention,
        };

        let table = self.table()?;
        if page == Page::Retention && !table.is_segmented() {
            return Err(ChurnError::InsufficientData {
                required: TIER_COUNT,
                actual: table.len(),
            });
        }

        let criteria = filters.criteria_for(page, table.schema());
        build(table, &criteria)
    }

    /// Page boundary: errors become a notice and never leak into other pages
    pub fn run_page(&self, page: Page, filters: &PageFilters) -> PageOutcome {
        match self.build_page(page, filters) {
            Ok(report) => PageOutcome::Report(report),
            Err(e) => {
                warn!("page '{}' degraded: {}", page.slug(), e);
                PageOutcome::Notice {
                    page,
                    message: notice(&e),
                }
            }
        }
    }
}

fn notice(err: &ChurnError) -> String {
    match err {
        ChurnError::InsufficientData { .. } => format!("Retention segmentation unavailable: {}", err),
        ChurnError::DataUnavailable { path, reason } => {
            format!("Data unavailable: {} ({})", reason, path.display())
        }
        _ => format!("Data unavailable: {}", err),
    }
}

fn segmented(table: Arc<Table>) -> Arc<Table> {
    match segment(&table) {
        Ok(segmented) => Arc::new(segmented),
        Err(e) => {
            warn!("segmentation skipped: {}", e);
            table
        }
    }
}

fn revenue_sum(name: &str) -> Aggregation {
    Aggregation::new(name, AggOp::Sum(Measure::TotalRevenue))
}

fn customers(view: &View) -> CoreResult<KpiValue> {
    Ok(KpiValue::Count(count_distinct(view, Dimension::CustomerId)?))
}

fn executive(table: &Table, criteria: &FilterCriteria) -> CoreResult<PageReport> {
    let view = criteria.apply(table)?;
    let mut report = PageReport::new(Page::Executive, view.len());

    report.kpi_entry("Total Customers", customers(&view)?);
    report.kpi_entry("Churned Customers", KpiValue::Count(count_where(&view, churned())?));
    report.kpi_entry("Churn Rate", KpiValue::Percent(churn_rate(&view)?));
    report.kpi_entry("Total Revenue", KpiValue::Currency(sum(&view, Measure::TotalRevenue)?));
    report.kpi_entry("Average CLTV", KpiValue::Currency(mean(&view, Measure::Cltv)?));

    report.add_table(
        "Customer Status Distribution",
        group_count(&view, &[Dimension::CustomerStatus])?,
    );
    report.add_table(
        "Churn by Contract Type",
        group_count(&view, &[Dimension::Contract, Dimension::ChurnLabel])?,
    );
    report.add_table(
        "Revenue by Contract",
        top_n(&view, Dimension::Contract, revenue_sum("total_revenue"), usize::MAX, true)?,
    );
    report.add_distributions(
        "Tenure vs Churn Behavior",
        Measure::TenureInMonths,
        describe_by(&view, Dimension::ChurnLabel, Measure::TenureInMonths)?,
    );
    Ok(report)
}

fn revenue(table: &Table, criteria: &FilterCriteria) -> CoreResult<PageReport> {
    let view = criteria.apply(table)?;
    let mut report = PageReport::new(Page::Revenue, view.len());

    report.kpi_entry("Total Revenue", KpiValue::Currency(sum(&view, Measure::TotalRevenue)?));
    report.kpi_entry(
        "Avg Monthly Charges",
        KpiValue::Price(mean(&view, Measure::MonthlyCharges)?),
    );
    report.kpi_entry("Average CLTV", KpiValue::Currency(mean(&view, Measure::Cltv)?));
    report.kpi_entry(
        "Average Tenure",
        KpiValue::Months(mean(&view, Measure::TenureInMonths)?),
    );
    report.kpi_entry("Total Customers", customers(&view)?);

    report.add_distributions(
        "Monthly Charges by Contract",
        Measure::MonthlyCharges,
        describe_by(&view, Dimension::Contract, Measure::MonthlyCharges)?,
    );
    report.add_distributions(
        "CLTV Distribution by Contract",
        Measure::Cltv,
        describe_by(&view, Dimension::Contract, Measure::Cltv)?,
    );
    report.add_table(
        "Revenue by Payment Method",
        top_n(&view, Dimension::PaymentMethod, revenue_sum("total_revenue"), usize::MAX, true)?,
    );
    report.add_distributions(
        "Monthly Charges by Internet Service",
        Measure::MonthlyCharges,
        describe_by(&view, Dimension::InternetService, Measure::MonthlyCharges)?,
    );
    report.add_scatter(
        &view,
        "Tenure vs CLTV Relationship",
        (Measure::TenureInMonths, Measure::Cltv),
        Dimension::Contract,
    )?;
    Ok(report)
}

fn churn_drivers(table: &Table, criteria: &FilterCriteria) -> CoreResult<PageReport> {
    let view = criteria.apply(table)?;
    let mut report = PageReport::new(Page::ChurnDrivers, view.len());

    report.kpi_entry("Total Customers", customers(&view)?);
    report.kpi_entry("Churned Customers", KpiValue::Count(count_where(&view, churned())?));
    report.kpi_entry("Churn Rate", KpiValue::Percent(churn_rate(&view)?));
    report.kpi_entry(
        "Avg Satisfaction",
        KpiValue::Score(mean(&view, Measure::SatisfactionScore)?),
    );
    report.kpi_entry("Avg Churn Score", KpiValue::Score(mean(&view, Measure::ChurnScore)?));

    report.add_table(
        "Churn Rate by Contract",
        group_agg(
            &view,
            Dimension::Contract,
            &[Aggregation::new("churn_rate", AggOp::Rate(Measure::ChurnValue))],
        )?,
    );
    report.add_distributions(
        "Satisfaction vs Churn",
        Measure::SatisfactionScore,
        describe_by(&view, Dimension::ChurnLabel, Measure::SatisfactionScore)?,
    );
    report.add_table(
        "Online Security vs Churn",
        group_count(&view, &[Dimension::OnlineSecurity, Dimension::ChurnLabel])?,
    );
    report.add_table(
        "Tech Support vs Churn",
        group_count(&view, &[Dimension::PremiumTechSupport, Dimension::ChurnLabel])?,
    );
    report.add_table(
        "Churn Category Distribution",
        top_n(
            &view.retain(churned())?,
            Dimension::ChurnCategory,
            Aggregation::new("count", AggOp::Count),
            usize::MAX,
            true,
        )?,
    );
    report.sections.push(Section::Histogram {
        title: "Churn Score Distribution",
        measure: Measure::ChurnScore,
        bins: histogram(&view, Measure::ChurnScore, HISTOGRAM_BINS)?,
    });
    Ok(report)
}

fn geography(table: &Table, criteria: &FilterCriteria) -> CoreResult<PageReport> {
    let view = criteria.apply(table)?;
    let mut report = PageReport::new(Page::Geography, view.len());

    report.kpi_entry("Total Revenue", KpiValue::Currency(sum(&view, Measure::TotalRevenue)?));
    report.kpi_entry("Total Customers", customers(&view)?);
    report.kpi_entry("Average CLTV", KpiValue::Currency(mean(&view, Measure::Cltv)?));
    report.kpi_entry(
        "Avg Churn Rate",
        KpiValue::Percent(mean(&view, Measure::ChurnValue)? * 100.0),
    );

    let located = report.add_scatter(
        &view,
        "Customer Geographic Distribution",
        (Measure::Longitude, Measure::Latitude),
        Dimension::ChurnLabel,
    )?;
    report.kpi_entry("Geolocated Customers", KpiValue::Count(located));

    let top_revenue = top_n(&view, Dimension::State, revenue_sum("total_revenue"), TOP_STATES, true)?;
    let top_states: Vec<String> = top_revenue.first_keys().into_iter().map(str::to_string).collect();
    report.add_table("Top 10 States by Revenue", top_revenue);

    report.add_table(
        "Churn Rate by State (Top 10 by Customers)",
        ranked(
            &view,
            Dimension::State,
            &[
                Aggregation::new("customers", AggOp::Count),
                Aggregation::new("churn_rate", AggOp::Rate(Measure::ChurnValue)),
            ],
            "customers",
            TOP_STATES,
            true,
        )?,
    );

    let in_top_states = view.filter(&FilterCriteria::new().include(Dimension::State, top_states))?;
    report.add_distributions(
        "CLTV Distribution by State (Top 10 Revenue States)",
        Measure::Cltv,
        describe_by(&in_top_states, Dimension::State, Measure::Cltv)?,
    );
    Ok(report)
}

fn retention(table: &Table, criteria: &FilterCriteria) -> CoreResult<PageReport> {
    let view = criteria.apply(table)?;
    let mut report = PageReport::new(Page::Retention, view.len());

    let critical = col(Dimension::RetentionPriority.column())
        .eq(lit(RetentionPriority::CriticalRetention.label()));
    report.kpi_entry("Total Customers", customers(&view)?);
    report.kpi_entry(
        "Critical Retention Accounts",
        KpiValue::Count(count_where(&view, critical)?),
    );
    report.kpi_entry("Revenue at Scope", KpiValue::Currency(sum(&view, Measure::TotalRevenue)?));
    report.kpi_entry("Average CLTV", KpiValue::Currency(mean(&view, Measure::Cltv)?));

    report.add_scatter(
        &view,
        "CLTV vs Churn Risk Matrix",
        (Measure::ChurnScore, Measure::Cltv),
        Dimension::RetentionPriority,
    )?;
    report.add_table(
        "Retention Priority Distribution",
        group_count(&view, &[Dimension::RetentionPriority])?,
    );
    report.add_table(
        "Revenue by Retention Segment",
        group_agg(&view, Dimension::RetentionPriority, &[revenue_sum("total_revenue")])?,
    );
    report.add_table(
        "Contract Distribution by Retention Priority",
        group_count(&view, &[Dimension::Contract, Dimension::RetentionPriority])?,
    );
    Ok(report)
}

fn showcase(images_dir: &Path) -> PageReport {
    let assets = SHOWCASE_IMAGES
        .iter()
        .map(|&asset| ImageAsset::locate(images_dir, asset))
        .collect();

    let mut report = PageReport::new(Page::Showcase, 0);
    report.sections.push(Section::Images(assets));
    report
}

fn about(images_dir: &Path) -> PageReport {
    let mut report = PageReport::new(Page::About, 0);
    report.sections.push(Section::Text(ABOUT_TEXT));
    report.sections.push(Section::Modules(Page::ALL.to_vec()));
    report
        .sections
        .push(Section::Preview(ImageAsset::locate(images_dir, SHOWCASE_IMAGES[0])));
    report
}
