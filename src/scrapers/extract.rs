//! Review extraction from consumer-review listing pages.

use std::sync::OnceLock;

use scraper::{ElementRef, Html, Selector};

use crate::models::{CarInfo, RatingBreakdown, ReviewRecord};

/// CSS selectors for the consumer-review listing markup.
struct Selectors {
    container: Selector,
    title: Selector,
    rating: Selector,
    byline: Selector,
    review_type: Selector,
    body: Selector,
    recommendation: Selector,
    breakdown_item: Selector,
    breakdown_label: Selector,
    next_page: Selector,
}

fn selectors() -> &'static Selectors {
    static SELECTORS: OnceLock<Selectors> = OnceLock::new();
    SELECTORS.get_or_init(|| {
        let parse = |s: &str| Selector::parse(s).expect("static selector");
        Selectors {
            container: parse(".consumer-review-container"),
            title: parse("h3.title"),
            rating: parse("spark-rating"),
            byline: parse(".review-byline > div"),
            review_type: parse(".review-type"),
            body: parse(".review-body"),
            recommendation: parse(".review-recommendation strong"),
            breakdown_item: parse(".review-breakdown--list li"),
            breakdown_label: parse(".label"),
            next_page: parse(".sds-pagination__next"),
        }
    })
}

/// Everything the crawl needs from one listing page.
#[derive(Debug, Clone, Default)]
pub struct PageExtraction {
    /// Candidate records in document order.
    pub records: Vec<ReviewRecord>,
    /// Number of review containers on the page.
    pub container_count: usize,
    /// Raw `href` of the "next page" control, unresolved.
    pub next_link: Option<String>,
}

impl PageExtraction {
    /// A page with no review containers at all.
    pub fn is_empty_page(&self) -> bool {
        self.container_count == 0
    }
}

/// Turns listing HTML into review records stamped with the crawl's car info.
#[derive(Debug, Clone)]
pub struct ReviewExtractor {
    car: CarInfo,
}

impl ReviewExtractor {
    pub fn new(car: CarInfo) -> Self {
        Self { car }
    }

    /// Extract all reviews from a page.
    ///
    /// The parsed document lives only for the duration of this call.
    pub fn extract(&self, html: &str, page_url: &str) -> PageExtraction {
        let document = Html::parse_document(html);
        let sel = selectors();
        let canonical_url = strip_query(page_url).to_string();

        let records: Vec<ReviewRecord> = document
            .select(&sel.container)
            .map(|container| self.extract_review(container, &canonical_url))
            .collect();

        let next_link = document
            .select(&sel.next_page)
            .next()
            .and_then(|el| el.value().attr("href"))
            .map(str::trim)
            .filter(|href| !href.is_empty())
            .map(str::to_string);

        PageExtraction {
            container_count: records.len(),
            records,
            next_link,
        }
    }

    fn extract_review(&self, container: ElementRef<'_>, url: &str) -> ReviewRecord {
        let sel = selectors();
        let mut record = ReviewRecord::new(self.car.clone(), url.to_string());

        record.title = joined_text(container, &sel.title);
        record.rating = container.select(&sel.rating).next().and_then(parse_rating);

        let mut byline = container.select(&sel.byline);
        record.date = byline.next().and_then(element_text);
        record.author = byline.next().and_then(element_text).and_then(clean_author);

        record.review_type = joined_text(container, &sel.review_type);
        record.review_body = joined_text(container, &sel.body);
        record.recommendation = joined_text(container, &sel.recommendation);
        record.rating_breakdown = extract_breakdown(container);

        record
    }
}

fn extract_breakdown(container: ElementRef<'_>) -> Option<RatingBreakdown> {
    let sel = selectors();
    let mut breakdown = RatingBreakdown::new();

    for item in container.select(&sel.breakdown_item) {
        let category = match joined_text(item, &sel.breakdown_label) {
            Some(label) => label.to_lowercase(),
            None => continue,
        };
        let rating = match item.select(&sel.rating).next().and_then(parse_rating) {
            Some(r) => r,
            None => continue,
        };
        breakdown.insert(category, rating);
    }

    if breakdown.is_empty() {
        None
    } else {
        Some(breakdown)
    }
}

/// Read the `rating` attribute of a rating widget as a decimal.
fn parse_rating(widget: ElementRef<'_>) -> Option<f64> {
    widget
        .value()
        .attr("rating")?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|r| r.is_finite())
}

/// Concatenated, trimmed text of every match; `None` when blank.
fn joined_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    let text: String = scope.select(selector).flat_map(|el| el.text()).collect();
    non_blank(text)
}

fn element_text(el: ElementRef<'_>) -> Option<String> {
    non_blank(el.text().collect())
}

fn non_blank(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn clean_author(author: String) -> Option<String> {
    match author.strip_prefix("By ") {
        Some(rest) => non_blank(rest.to_string()),
        None => Some(author),
    }
}

/// Drop the query string (and anything after it) from a URL.
pub fn strip_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Render one review container.
    pub fn review_html(author: &str, date: &str, title: &str, rating: Option<&str>) -> String {
        let rating = rating
            .map(|r| format!(r#"<spark-rating rating="{}"></spark-rating>"#, r))
            .unwrap_or_default();
        format!(
            r#"<div class="consumer-review-container">
                {rating}
                <h3 class="title">{title}</h3>
                <div class="review-byline"><div>{date}</div><div>By {author}</div></div>
                <div class="review-type">Owned</div>
                <p class="review-body">Body from {author}</p>
                <div class="review-recommendation"><strong>Yes, I recommend this car.</strong></div>
                <ul class="review-breakdown--list">
                    <li><span class="label"> Comfort </span><spark-rating rating="4.0"></spark-rating></li>
                    <li><span class="label">Value</span><spark-rating rating="n/a"></spark-rating></li>
                </ul>
            </div>"#
        )
    }

    /// Wrap containers in a page, optionally with a "next" control.
    pub fn page_html(reviews: &[String], next_href: Option<&str>) -> String {
        let next = next_href
            .map(|h| format!(r#"<a class="sds-pagination__next" href="{}">Next</a>"#, h))
            .unwrap_or_default();
        format!(
            "<html><body><main>{}</main><nav>{}</nav></body></html>",
            reviews.join("\n"),
            next
        )
    }

    /// A page of `count` distinct reviews whose authors are prefixed by `tag`.
    pub fn numbered_page(tag: &str, count: usize, next_href: Option<&str>) -> String {
        let reviews: Vec<String> = (0..count)
            .map(|i| review_html(&format!("{tag}-{i}"), "Mar 3, 2023", "Solid car", Some("4.5")))
            .collect();
        page_html(&reviews, next_href)
    }
}
