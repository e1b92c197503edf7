//! `url` command: show where a crawl would start.

use console::style;

use crate::config::{parse_year, CrawlInput};
use crate::scrapers::{build_review_url, extract_car_info};

pub fn cmd_url(make: &str, model: &str, year: &str, page: u32) -> anyhow::Result<()> {
    let year = parse_year(year)?;
    let url = build_review_url(make, model, year, page.max(1));

    let input = CrawlInput {
        make: Some(make.to_string()),
        model: Some(model.to_string()),
        year: Some(year),
        ..Default::default()
    };
    let car = extract_car_info(&url, &input);

    println!("{} {}", style("→").cyan(), url);
    println!("{}", serde_json::to_string_pretty(&car)?);
    Ok(())
}
