//! `scrape` command: run one crawl.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use console::style;

use crate::config::{parse_year, Config, CrawlInput};
use crate::models::FingerprintMode;
use crate::scrapers::{
    resolve_entry, CrawlDriver, CrawlLimits, CrawlSettings, HttpClient, Pacer, PacingConfig,
    ReviewExtractor,
};
use crate::sink::{JsonLinesSink, ProgressSink, RecordSink};

#[derive(Debug, Args)]
pub struct ScrapeArgs {
    /// JSON input file (startUrl, make, model, year, results_wanted, ...)
    #[arg(short, long)]
    pub input: Option<PathBuf>,
    /// Review listing URL to start from
    #[arg(long)]
    pub start_url: Option<String>,
    #[arg(long)]
    pub make: Option<String>,
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long)]
    pub year: Option<String>,
    /// Number of reviews to collect (default: 20)
    #[arg(short = 'n', long)]
    pub results_wanted: Option<u32>,
    /// Page budget (default: derived from results wanted)
    #[arg(long)]
    pub max_pages: Option<u32>,
    /// Upstream proxy URL for every request
    #[arg(long)]
    pub proxy: Option<String>,
    /// Number of concurrent fetch workers
    #[arg(short = 'w', long)]
    pub concurrency: Option<usize>,
    /// Append JSON Lines here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Config file path (overrides auto-discovery)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    #[arg(long, value_enum)]
    pub fingerprint: Option<FingerprintMode>,
}

impl ScrapeArgs {
    /// Merge the input file (if any) with flag overrides.
    fn crawl_input(&self) -> anyhow::Result<CrawlInput> {
        let mut input = match self.input {
            Some(ref path) => CrawlInput::from_path(path)?,
            None => CrawlInput::default(),
        };

        if let Some(ref url) = self.start_url {
            input.start_url = Some(url.clone());
        }
        if let Some(ref make) = self.make {
            input.make = Some(make.clone());
        }
        if let Some(ref model) = self.model {
            input.model = Some(model.clone());
        }
        if let Some(ref year) = self.year {
            input.year = Some(parse_year(year)?);
        }
        if self.results_wanted.is_some() {
            input.results_wanted = self.results_wanted;
        }
        if self.max_pages.is_some() {
            input.max_pages = self.max_pages;
        }
        if let Some(ref proxy) = self.proxy {
            input.proxy_configuration = Some(serde_json::json!({ "proxyUrls": [proxy] }));
        }

        Ok(input)
    }

    async fn config(&self) -> anyhow::Result<Config> {
        let mut config = match self.config {
            Some(ref path) => Config::load_from_path(path).await?,
            None => Config::load().await,
        };

        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(ref output) = self.output {
            config.output = Some(output.clone());
        }
        if let Some(fingerprint) = self.fingerprint {
            config.fingerprint = fingerprint;
        }
        Ok(config)
    }
}

pub async fn cmd_scrape(args: ScrapeArgs) -> anyhow::Result<()> {
    let config = args.config().await?;
    let input = args.crawl_input()?;

    if let Some(ref path) = config.source_path {
        tracing::debug!("Using config from {}", path.display());
    }

    let (entry_url, car) = resolve_entry(&input)?;
    let limits = CrawlLimits::new(input.results_wanted(), input.max_pages);

    let (delay_min, delay_max) = config.delay_range();
    let pacer = Pacer::new(PacingConfig::with_range(delay_min, delay_max));
    let client = HttpClient::new(
        config.request_timeout(),
        pacer.clone(),
        config.user_agent.as_deref(),
        input.proxy_url().as_deref(),
    )?;

    let mut progress = None;
    let sink: Arc<dyn RecordSink> = match config.output {
        Some(ref path) => {
            eprintln!(
                "{} Writing reviews to {}",
                style("→").cyan(),
                path.display()
            );
            let file_sink: Arc<dyn RecordSink> = Arc::new(JsonLinesSink::append_to(path).await?);
            let progress_sink = Arc::new(ProgressSink::new(
                file_sink,
                u64::from(limits.results_wanted()),
            ));
            progress = Some(progress_sink.clone());
            progress_sink as Arc<dyn RecordSink>
        }
        None => Arc::new(JsonLinesSink::stdout()),
    };

    let settings = CrawlSettings::from_config(&config, limits, pacer);
    let driver = CrawlDriver::new(
        Arc::new(client),
        sink,
        ReviewExtractor::new(car),
        settings,
    );
    let summary = driver.run(&entry_url).await;

    if let Some(progress) = progress {
        progress.finish("done");
    }

    let reason = summary
        .stop_reason
        .map(|r| r.to_string())
        .unwrap_or_else(|| "queue drained".to_string());
    eprintln!(
        "{} Saved {} reviews from {} pages ({} failed, {})",
        style("✓").green(),
        summary.saved,
        summary.pages_fetched,
        summary.pages_failed,
        reason
    );
    if summary.pages_failed > 0 {
        eprintln!(
            "{} Some pages could not be fetched; see log for details",
            style("!").yellow()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ScrapeArgs {
        ScrapeArgs {
            input: None,
            start_url: None,
            make: None,
            model: None,
            year: None,
            results_wanted: None,
            max_pages: None,
            proxy: None,
            concurrency: None,
            output: None,
            config: None,
            fingerprint: None,
        }
    }

    #[test]
    fn test_flags_override_input_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.json");
        std::fs::write(
            &path,
            r#"{"make": "honda", "model": "civic", "year": "2019", "results_wanted": 40}"#,
        )
        .unwrap();

        let input = ScrapeArgs {
            input: Some(path),
            year: Some("2021".into()),
            proxy: Some("http://p.test:8000".into()),
            ..args()
        }
        .crawl_input()
        .unwrap();

        assert_eq!(input.make.as_deref(), Some("honda"));
        assert_eq!(input.year, Some(2021));
        assert_eq!(input.results_wanted(), 40);
        assert_eq!(input.proxy_url().as_deref(), Some("http://p.test:8000"));
    }

    #[test]
    fn test_invalid_year_flag_is_an_error() {
        let result = ScrapeArgs {
            year: Some("next year".into()),
            ..args()
        }
        .crawl_input();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_explicit_config_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("carreviews.toml");
        std::fs::write(&path, "concurrency = 2\nmax_request_retries = 1\n").unwrap();

        let config = ScrapeArgs {
            config: Some(path),
            concurrency: Some(6),
            fingerprint: Some(FingerprintMode::Content),
            ..args()
        }
        .config()
        .await
        .unwrap();

        assert_eq!(config.concurrency, 6);
        assert_eq!(config.max_request_retries, 1);
        assert_eq!(config.fingerprint, FingerprintMode::Content);
    }
}
