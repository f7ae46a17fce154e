//! Command-line interface definitions and argument parsing

use crate::data::{Dimension, DEFAULT_DATA_PATH};
use crate::pages::{Page, PageFilters};
use clap::Parser;
use std::path::PathBuf;

/// Telecom churn intelligence: KPIs, breakdowns and retention priorities from the churn dataset
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the churn dataset CSV
    #[arg(short, long, env = "CHURNLENS_DATA", default_value = DEFAULT_DATA_PATH)]
    pub data: PathBuf,

    /// Directory holding the showcase dashboard images
    #[arg(long, default_value = "images")]
    pub images: PathBuf,

    /// Pages to render, comma separated (default: all)
    #[arg(short, long, value_enum, value_delimiter = ',')]
    pub page: Vec<Page>,

    /// Contract types to include
    #[arg(long, value_delimiter = ',')]
    pub contract: Vec<String>,

    /// Internet service values to include
    #[arg(long, value_delimiter = ',')]
    pub internet_service: Vec<String>,

    /// States to include
    #[arg(long, value_delimiter = ',')]
    pub state: Vec<String>,

    /// Payment methods to include
    #[arg(long, value_delimiter = ',')]
    pub payment_method: Vec<String>,

    /// Churn labels to include (Yes, No)
    #[arg(long, value_delimiter = ',')]
    pub churn_label: Vec<String>,

    /// Retention priorities to include
    #[arg(long, value_delimiter = ',')]
    pub priority: Vec<String>,

    /// Tenure range in months as "min,max"
    /// Example: --tenure "12,48"
    #[arg(short, long)]
    pub tenure: Option<String>,

    /// Write PNG bar and scatter charts for every rendered page into this directory
    #[arg(long)]
    pub charts: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Parse the tenure range from the tenure string
    /// Expected format: "min,max"
    pub fn tenure_range(&self) -> crate::Result<Option<(u32, u32)>> {
        let Some(ref tenure_str) = self.tenure else {
            return Ok(None);
        };

        let parts: Vec<&str> = tenure_str.split(',').collect();
        if parts.len() != 2 {
            anyhow::bail!("Tenure must be in format 'min,max'");
        }

        let min: u32 = parts[0]
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid minimum tenure: {}", parts[0]))?;
        let max: u32 = parts[1]
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid maximum tenure: {}", parts[1]))?;
        if min > max {
            anyhow::bail!("Minimum tenure {} exceeds maximum {}", min, max);
        }

        Ok(Some((min, max)))
    }

    /// Selections from the command line; flags left out select everything
    pub fn page_filters(&self) -> crate::Result<PageFilters> {
        let selections = [
            (Dimension::Contract, &self.contract),
            (Dimension::InternetService, &self.internet_service),
            (Dimension::State, &self.state),
            (Dimension::PaymentMethod, &self.payment_method),
            (Dimension::ChurnLabel, &self.churn_label),
            (Dimension::RetentionPriority, &self.priority),
        ];

        let mut filters = selections
            .into_iter()
            .filter(|(_, values)| !values.is_empty())
            .fold(PageFilters::new(), |filters, (dimension, values)| {
                filters.select(dimension, values.iter().map(|v| v.trim().to_string()))
            });
        if let Some((min, max)) = self.tenure_range()? {
            filters = filters.tenure(min, max);
        }
        Ok(filters)
    }

    /// Pages in the order they were asked for, or every page
    pub fn pages(&self) -> Vec<Page> {
        if self.page.is_empty() {
            Page::ALL.to_vec()
        } else {
            self.page.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("churnlens").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert_eq!(args.images, PathBuf::from("images"));
        assert_eq!(args.pages(), Page::ALL.to_vec());
        assert_eq!(args.page_filters().unwrap(), PageFilters::new());
        assert!(args.charts.is_none());
    }

    #[test]
    fn test_tenure_range() {
        let mut args = parse(&["--tenure", "12, 48"]);
        assert_eq!(args.tenure_range().unwrap(), Some((12, 48)));

        args.tenure = None;
        assert_eq!(args.tenure_range().unwrap(), None);

        args.tenure = Some("48,12".to_string());
        assert!(args.tenure_range().is_err());

        args.tenure = Some("twelve".to_string());
        assert!(args.tenure_range().is_err());
    }

    #[test]
    fn test_page_selection() {
        let args = parse(&["--page", "executive,churn-drivers"]);
        assert_eq!(args.pages(), vec![Page::Executive, Page::ChurnDrivers]);

        assert!(Args::try_parse_from(["churnlens", "--page", "nowhere"]).is_err());
    }

    #[test]
    fn test_page_filters_from_flags() {
        let args = parse(&[
            "--contract",
            "One Year,Two Year",
            "--state",
            "California",
            "--tenure",
            "1,24",
        ]);
        let expected = PageFilters::new()
            .select(Dimension::Contract, ["One Year", "Two Year"])
            .select(Dimension::State, ["California"])
            .tenure(1, 24);
        assert_eq!(args.page_filters().unwrap(), expected);
    }
}
