//! Integration tests for churnlens

use churnlens::pages::{KpiValue, Section};
use churnlens::{
    load_table, segment, ChurnError, Dashboard, Dimension, Page, PageFilters, PageOutcome,
    RetentionPriority,
};
use std::io::Write;
use tempfile::NamedTempFile;

const HEADER: &str = "Customer_ID,Contract,Internet_Service,Payment_Method,State,City,Tenure_in_Months,Monthly_Charges,Total_Revenue,CLTV,Churn_Label,Churn_Score,Satisfaction_Score,Churn_Category,Customer_Status,Online_Security,Premium_Tech_Support,Latitude,Longitude";

/// Nine customers with CLTV 100..=900; churn scores are shuffled so every
/// retention priority shows up
const ROWS: [&str; 9] = [
    "C001,Month-to-Month,Yes,Credit Card,California,Los Angeles,6,50,300,100,Yes,10,1,Competitor,Churned,No,No,34.05,-118.24",
    "C002,One Year,Yes,Bank Withdrawal,California,San Diego,12,50,600,200,No,20,4,,Stayed,Yes,No,32.72,-117.16",
    "C003,Two Year,No,Mailed Check,California,Fresno,18,50,900,300,No,30,5,,Stayed,No,Yes,36.74,-119.78",
    "C004,Month-to-Month,Yes,Credit Card,California,Oakland,24,50,1200,400,Yes,90,2,Attitude,Churned,No,No,37.80,-122.27",
    "C005,One Year,Yes,Bank Withdrawal,California,San Jose,30,50,1500,500,No,50,3,,Stayed,Yes,Yes,37.34,-121.89",
    "C006,Two Year,Yes,Credit Card,Texas,Austin,36,50,1800,600,No,60,4,,Stayed,Yes,No,30.27,-97.74",
    "C007,Month-to-Month,No,Mailed Check,Texas,Houston,42,50,2100,700,No,70,3,,Stayed,No,No,29.76,-95.37",
    "C008,One Year,Yes,Credit Card,Texas,Dallas,48,50,2400,800,Yes,80,1,Competitor,Churned,No,No,32.78,-96.80",
    "C009,Two Year,Yes,Bank Withdrawal,Nevada,Reno,54,50,2700,900,No,40,5,,Stayed,Yes,Yes,,",
];

/// Create a test CSV file with the given header and rows
fn create_test_csv(header: &str, rows: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{}", header).unwrap();
    for row in rows {
        writeln!(file, "{}", row).unwrap();
    }
    file
}

fn create_dashboard() -> Dashboard {
    let file = create_test_csv(HEADER, &ROWS);
    let table = load_table(file.path()).unwrap();
    Dashboard::from_table(table, "images")
}

fn percent(value: Option<KpiValue>) -> f64 {
    match value {
        Some(KpiValue::Percent(p)) => p,
        other => panic!("expected a percentage, got {:?}", other),
    }
}

#[test]
fn test_end_to_end_executive_page() {
    let dashboard = create_dashboard();
    let report = dashboard
        .build_page(Page::Executive, &PageFilters::new())
        .unwrap();

    assert_eq!(report.rows_in_scope, 9);
    assert_eq!(report.kpi("Total Customers"), Some(KpiValue::Count(9)));
    assert_eq!(report.kpi("Churned Customers"), Some(KpiValue::Count(3)));
    assert!((percent(report.kpi("Churn Rate")) - 100.0 / 3.0).abs() < 1e-9);
    assert_eq!(report.kpi("Total Revenue"), Some(KpiValue::Currency(13_500.0)));
    assert_eq!(report.kpi("Average CLTV"), Some(KpiValue::Currency(500.0)));

    let revenue = report.table("Revenue by Contract").unwrap();
    assert_eq!(
        revenue.first_keys(),
        vec!["Two Year", "One Year", "Month-to-Month"]
    );
    assert_eq!(revenue.value(&["Two Year"], "total_revenue"), Some(5_400.0));
}

#[test]
fn test_segmentation_assigns_every_priority() {
    let file = create_test_csv(HEADER, &ROWS);
    let table = segment(&load_table(file.path()).unwrap()).unwrap();

    let ids = table.texts(Dimension::CustomerId).unwrap();
    let priorities = table.texts(Dimension::RetentionPriority).unwrap();
    let priority_of = |id: &str| {
        ids.iter()
            .zip(&priorities)
            .find(|(customer, _)| customer.as_deref() == Some(id))
            .and_then(|(_, priority)| priority.clone())
    };
    assert_eq!(
        priority_of("C008").as_deref(),
        Some(RetentionPriority::CriticalRetention.label())
    );
    assert_eq!(
        priority_of("C009").as_deref(),
        Some(RetentionPriority::HighValueMonitor.label())
    );
    assert_eq!(priority_of("C004").as_deref(), Some(RetentionPriority::Standard.label()));
    assert!(table.schema().has_column("retention_priority"));

    let dashboard = Dashboard::from_table(table, "images");
    let report = dashboard
        .build_page(Page::Retention, &PageFilters::new())
        .unwrap();
    assert_eq!(
        report.kpi("Critical Retention Accounts"),
        Some(KpiValue::Count(2))
    );
    let priorities = report.table("Retention Priority Distribution").unwrap();
    assert_eq!(priorities.value(&["High Value - Monitor"], "count"), Some(1.0));
    assert_eq!(priorities.value(&["Standard"], "count"), Some(6.0));
}

#[test]
fn test_empty_selection_reports_zeros() {
    let dashboard = create_dashboard();
    let filters = PageFilters::new().select(Dimension::Contract, ["Fortnightly"]);

    for page in [Page::Executive, Page::ChurnDrivers, Page::Geography] {
        let report = dashboard.build_page(page, &filters).unwrap();
        assert_eq!(report.rows_in_scope, 0, "page {:?}", page);
        assert_eq!(report.kpi("Total Customers"), Some(KpiValue::Count(0)));
    }

    let report = dashboard.build_page(Page::Executive, &filters).unwrap();
    assert_eq!(percent(report.kpi("Churn Rate")), 0.0);
    assert_eq!(report.kpi("Total Revenue"), Some(KpiValue::Currency(0.0)));
}

#[test]
fn test_page_filters_are_independent() {
    let dashboard = create_dashboard();
    let filters = PageFilters::new()
        .select(Dimension::State, ["Texas"])
        .select(Dimension::ChurnLabel, ["Yes"])
        .tenure(6, 18);

    let executive = dashboard.build_page(Page::Executive, &filters).unwrap();
    let revenue = dashboard.build_page(Page::Revenue, &filters).unwrap();
    let geography = dashboard.build_page(Page::Geography, &filters).unwrap();

    // Texas customers have tenures from 36 to 48 months
    assert_eq!(executive.rows_in_scope, 0);
    assert_eq!(revenue.rows_in_scope, 3);
    assert_eq!(geography.rows_in_scope, 3);
    assert_eq!(
        geography.kpi("Geolocated Customers"),
        Some(KpiValue::Count(3))
    );
}

#[test]
fn test_churn_drivers_breakdowns() {
    let dashboard = create_dashboard();
    let report = dashboard
        .build_page(Page::ChurnDrivers, &PageFilters::new())
        .unwrap();

    let by_contract = report.table("Churn Rate by Contract").unwrap();
    assert!((by_contract.value(&["Month-to-Month"], "churn_rate").unwrap() - 200.0 / 3.0).abs() < 1e-9);
    assert_eq!(by_contract.value(&["Two Year"], "churn_rate"), Some(0.0));

    let categories = report.table("Churn Category Distribution").unwrap();
    assert_eq!(categories.first_keys(), vec!["Competitor", "Attitude"]);

    let security = report.table("Online Security vs Churn").unwrap();
    assert_eq!(security.value(&["No", "Yes"], "count"), Some(3.0));
}

#[test]
fn test_missing_column_degrades_to_notice() {
    let header = HEADER.replace(",CLTV", "");
    let rows: Vec<String> = ROWS
        .iter()
        .map(|row| {
            let mut fields: Vec<&str> = row.split(',').collect();
            fields.remove(9);
            fields.join(",")
        })
        .collect();
    let row_refs: Vec<&str> = rows.iter().map(String::as_str).collect();
    let file = create_test_csv(&header, &row_refs);

    match load_table(file.path()) {
        Err(ChurnError::MissingColumn { column }) => assert_eq!(column, "cltv"),
        other => panic!("expected missing column, got {:?}", other.map(|t| t.len())),
    }

    let dashboard = Dashboard::open(file.path(), "images");
    let filters = PageFilters::new();
    for page in [Page::Executive, Page::Revenue, Page::Retention] {
        match dashboard.run_page(page, &filters) {
            PageOutcome::Notice { message, .. } => assert!(message.contains("cltv")),
            other => panic!("expected notice for {:?}, got {:?}", page, other),
        }
    }

    match dashboard.run_page(Page::Showcase, &filters) {
        PageOutcome::Report(report) => match &report.sections[0] {
            Section::Images(assets) => assert_eq!(assets.len(), 3),
            other => panic!("expected images, got {:?}", other),
        },
        other => panic!("expected showcase report, got {:?}", other),
    }
}

#[test]
fn test_point_views_follow_page_filters() {
    let dashboard = create_dashboard();
    let filters = PageFilters::new().select(Dimension::ChurnLabel, ["No"]);

    let geography = dashboard.build_page(Page::Geography, &filters).unwrap();
    let map = geography.scatter("Customer Geographic Distribution").unwrap();
    // C009 has no coordinates
    assert_eq!(map.len(), 5);
    assert!(map.iter().all(|p| p.group == "No"));

    let retention = dashboard.build_page(Page::Retention, &filters).unwrap();
    let matrix = retention.scatter("CLTV vs Churn Risk Matrix").unwrap();
    assert_eq!(matrix.len(), 9);
    let c009 = matrix.iter().find(|p| p.customer_id == "C009").unwrap();
    assert_eq!((c009.x, c009.y), (40.0, 900.0));
    assert_eq!(c009.group, "High Value - Monitor");
}

#[test]
fn test_about_page_without_images() {
    let dashboard = create_dashboard();
    match dashboard.run_page(Page::About, &PageFilters::new()) {
        PageOutcome::Report(report) => {
            assert!(matches!(report.section("Platform Modules"), Some(Section::Modules(pages)) if pages.len() == 7));
            match report.section("Dashboard Preview") {
                Some(Section::Preview(asset)) => assert!(!asset.present),
                other => panic!("expected preview, got {:?}", other),
            }
        }
        other => panic!("expected about report, got {:?}", other),
    }
}
