//! Entry URL resolution and car metadata derivation.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::{ConfigurationError, CrawlInput};
use crate::models::CarInfo;

/// Origin used when synthesizing review URLs.
pub const REVIEW_HOST: &str = "https://www.cars.com";

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

fn research_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/research/([^-]+)-([^-]+)-(\d{4})/").expect("valid regex"))
}

/// Build the consumer-review listing URL for a make/model/year.
///
/// Make words are joined with `-`, model words with `_`. Page 1 has no
/// `page` query parameter.
pub fn build_review_url(make: &str, model: &str, year: u32, page: u32) -> String {
    let make_slug = whitespace_re().replace_all(make.trim(), "-").to_lowercase();
    let model_slug = whitespace_re().replace_all(model.trim(), "_").to_lowercase();

    let mut url = format!(
        "{}/research/{}-{}-{}/consumer-reviews/",
        REVIEW_HOST, make_slug, model_slug, year
    );
    if page > 1 {
        url.push_str(&format!("?page={}", page));
    }
    url
}

/// Derive car metadata from a research URL, falling back to the raw input.
pub fn extract_car_info(url: &str, input: &CrawlInput) -> CarInfo {
    if let Some(caps) = research_path_re().captures(url) {
        return CarInfo {
            car_make: Some(caps[1].replace('_', " ")),
            car_model: Some(caps[2].replace('_', " ")),
            car_year: caps[3].parse().ok(),
        };
    }

    CarInfo {
        car_make: non_blank(input.make.as_deref()),
        car_model: non_blank(input.model.as_deref()),
        car_year: input.year,
    }
}

/// Pick the entry URL for a crawl and the car metadata to stamp on records.
pub fn resolve_entry(input: &CrawlInput) -> Result<(String, CarInfo), ConfigurationError> {
    let url = match non_blank(input.start_url.as_deref()) {
        Some(start_url) => start_url,
        None => {
            let make = non_blank(input.make.as_deref());
            let model = non_blank(input.model.as_deref());
            match (make, model, input.year) {
                (Some(make), Some(model), Some(year)) => build_review_url(&make, &model, year, 1),
                _ => return Err(ConfigurationError::MissingTarget),
            }
        }
    };

    let car = extract_car_info(&url, input);
    Ok((url, car))
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
