//! churnlens: terminal dashboard over the telecom churn dataset
//!
//! Loads the dataset once, segments it, then renders each selected page with
//! its own filters. A page that cannot be built prints a notice instead.

use anyhow::Result;
use churnlens::pages::{Dashboard, PageOutcome};
use churnlens::{viz, Args};
use clap::Parser;
use std::time::Instant;

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if args.verbose {
        println!("churnlens - Customer Churn Intelligence");
        println!("=======================================\n");
        println!("Dataset: {}", args.data.display());
    }

    let filters = args.page_filters()?;
    let start_time = Instant::now();

    let load_start = Instant::now();
    let dashboard = Dashboard::open(&args.data, &args.images);
    if args.verbose {
        println!("Load and segmentation time: {:.2}s", load_start.elapsed().as_secs_f64());
    }

    for page in args.pages() {
        let outcome = dashboard.run_page(page, &filters);
        viz::print_page_outcome(&outcome);

        if let (Some(dir), PageOutcome::Report(report)) = (&args.charts, &outcome) {
            match viz::render_page_charts(report, dir) {
                Ok(written) => {
                    for path in written {
                        println!("Chart saved to: {}", path.display());
                    }
                }
                Err(e) => log::warn!("charts for '{}' not rendered: {:#}", page.slug(), e),
            }
        }
    }

    if args.verbose {
        println!("\nTotal processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    }

    Ok(())
}

/// Warnings by default, debug output for this crate with --verbose; RUST_LOG wins over both
fn init_logging(verbose: bool) {
    let default_filter = if verbose { "churnlens=debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();
}
