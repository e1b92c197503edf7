//! carreviews - consumer review scraper for cars.com research pages.
//!
//! Given a make/model/year or a listing URL, crawls the paginated consumer
//! review listing and writes one JSON record per review.

pub mod cli;
pub mod config;
pub mod models;
pub mod scrapers;
pub mod sink;
