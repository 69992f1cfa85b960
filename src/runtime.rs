//! Collector runner: visits search pages, follows detail pages and writes the listings CSV.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use reqwest::Client;
use thiserror::Error;
use tokio::runtime::Builder;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::controls::CollectControls;
use crate::frontier::{dedupe_rows, plan_search_pages, SearchTask, SeenListings};
use crate::html::{parse_detail_page, parse_search_page, ListingCard};
use crate::payload::{load_payload_dir, PayloadError};
use crate::schema::ListingRow;

const USER_AGENT: &str = "homeprice-collector/0.1";

/// Fatal collector failures. Per-page problems are logged and skipped instead.
#[derive(Debug, Error)]
pub enum CollectError {
    /// Not a single search page could be fetched.
    #[error("site unreachable: none of {attempted} search pages responded (last error: {last_error})")]
    SiteUnreachable {
        /// Search pages attempted.
        attempted: usize,
        /// Most recent fetch error.
        last_error: String,
    },
    /// No suburbs were configured.
    #[error("no suburbs configured")]
    NoTargets,
    /// HTTP client construction failed.
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
    /// Offline payload import failed.
    #[error(transparent)]
    Payload(#[from] PayloadError),
    /// Writing the output CSV failed.
    #[error("failed to write {path}: {message}")]
    Output {
        /// Output path.
        path: PathBuf,
        /// Error description.
        message: String,
    },
    /// Tokio runtime could not start.
    #[error("failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Summary of a finished collection.
#[derive(Debug, Clone, Default)]
pub struct CollectReport {
    /// Rows written to the CSV.
    pub rows_written: usize,
    /// Search pages fetched successfully.
    pub pages_fetched: usize,
    /// Duplicate listings dropped.
    pub duplicates: usize,
    /// Per-page or per-listing failures skipped.
    pub failures: usize,
}

/// Builds a current-thread runtime, collects listings and writes them to `out`.
pub fn run(controls: &CollectControls, out: &Path) -> Result<CollectReport, CollectError> {
    let rt = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(CollectError::Runtime)?;
    let start = Instant::now();
    let (rows, metrics) = rt.block_on(collect(controls))?;
    write_listings_csv(out, &rows)?;
    metrics.report(start.elapsed());
    info!(rows = rows.len(), path = %out.display(), "listings written");
    Ok(CollectReport {
        rows_written: rows.len(),
        pages_fetched: metrics.pages_fetched.load(Ordering::Relaxed),
        duplicates: metrics.duplicates.load(Ordering::Relaxed),
        failures: metrics.failures(),
    })
}

/// Imports saved JSON payloads from `dir` and writes the deduplicated rows to `out`.
pub fn import_payloads(dir: &Path, out: &Path) -> Result<CollectReport, CollectError> {
    let mut rows = load_payload_dir(dir)?;
    let duplicates = dedupe_rows(&mut rows);
    rows.retain(|row| !row.address.trim().is_empty() || !row.listing_id.is_empty());
    write_listings_csv(out, &rows)?;
    info!(rows = rows.len(), duplicates, path = %out.display(), "payload rows written");
    Ok(CollectReport {
        rows_written: rows.len(),
        duplicates,
        ..CollectReport::default()
    })
}

/// Visits every planned search page and returns the unique listings found.
pub async fn collect(
    controls: &CollectControls,
) -> Result<(Vec<ListingRow>, Metrics), CollectError> {
    if controls.suburbs().is_empty() {
        return Err(CollectError::NoTargets);
    }
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(controls.page_timeout())
        .build()?;
    let metrics = Metrics::default();
    let mut seen = SeenListings::new();
    let mut rows = Vec::new();
    let mut last_error = String::from("none");
    let tasks = plan_search_pages(controls);

    for (idx, task) in tasks.iter().enumerate() {
        if idx > 0 {
            pause(controls.politeness_delay()).await;
        }
        info!(suburb = %task.suburb.name, page = task.page, url = %task.url, "visiting search page");
        let body = match fetch_page(&client, &task.url).await {
            Ok(body) => body,
            Err(err) => {
                warn!(url = %task.url, error = %err.message, "search page skipped");
                last_error = err.message.clone();
                metrics.record_error(err.kind);
                continue;
            }
        };
        metrics.record_page_fetched();
        let base = match Url::parse(&task.url) {
            Ok(base) => base,
            Err(err) => {
                metrics.record_error(TaskErrorKind::Parse);
                warn!(url = %task.url, error = %err, "unparseable search url");
                continue;
            }
        };
        let page = parse_search_page(&body, &base);
        metrics.record_cards(page.cards.len(), page.rejected);
        debug!(cards = page.cards.len(), rejected = page.rejected, "search page parsed");

        for card in page.cards {
            if let Some(id) = &card.listing_id {
                if seen.contains_id(id) {
                    seen.record_duplicate();
                    metrics.record_duplicate();
                    continue;
                }
            }
            let row = match build_row(&client, controls, task, card).await {
                Ok(row) => row,
                Err(err) => {
                    warn!(url = err.url.as_deref().unwrap_or("<card>"), error = %err.message, "listing skipped");
                    metrics.record_error(err.kind);
                    continue;
                }
            };
            if seen.insert(&row) {
                rows.push(row);
            } else {
                metrics.record_duplicate();
            }
        }
    }

    if metrics.pages_fetched.load(Ordering::Relaxed) == 0 {
        return Err(CollectError::SiteUnreachable {
            attempted: tasks.len(),
            last_error,
        });
    }
    Ok((rows, metrics))
}

async fn build_row(
    client: &Client,
    controls: &CollectControls,
    task: &SearchTask,
    card: ListingCard,
) -> Result<ListingRow, TaskError> {
    let mut row = ListingRow {
        suburb: if card.suburb.is_empty() {
            task.suburb.name.clone()
        } else {
            card.suburb
        },
        address: card.address,
        price: card.price,
        bedrooms: card.bedrooms,
        bathrooms: card.bathrooms,
        car_spaces: card.car_spaces,
        postcode: task.suburb.postcode.clone(),
        listing_id: card.listing_id.unwrap_or_default(),
        url: card
            .detail_url
            .as_ref()
            .map(Url::to_string)
            .unwrap_or_default(),
        ..ListingRow::default()
    };
    if !controls.follow_details() {
        return Ok(row);
    }
    let Some(detail_url) = card.detail_url else {
        return Err(TaskError::missing_link(&row.address));
    };

    pause(controls.politeness_delay()).await;
    let body = fetch_page(client, detail_url.as_str()).await?;
    let detail = parse_detail_page(&body);
    row.price = detail.price.or(row.price);
    row.sale_date = detail.sale_date.unwrap_or_default();
    row.property_type = detail.property_type.unwrap_or_default();
    row.land_size = detail.land_size;
    row.building_size = detail.building_size;
    row.agency = detail.agency.unwrap_or_default();
    Ok(row)
}

async fn fetch_page(client: &Client, url: &str) -> Result<String, TaskError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|err| TaskError::http(url, err))?;
    let status = response.status();
    if !status.is_success() {
        return Err(TaskError::status(url, status.as_u16()));
    }
    response.text().await.map_err(|err| TaskError::http(url, err))
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        sleep(delay).await;
    }
}

/// Writes rows with a header to `<path>.tmp` and renames it over `path`.
pub fn write_listings_csv(path: &Path, rows: &[ListingRow]) -> Result<(), CollectError> {
    let output_err = |message: String| CollectError::Output {
        path: path.to_path_buf(),
        message,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| output_err(err.to_string()))?;
    }
    let tmp = path.with_extension("csv.tmp");
    {
        let mut writer = csv::Writer::from_path(&tmp).map_err(|err| output_err(err.to_string()))?;
        for row in rows {
            writer
                .serialize(row)
                .map_err(|err| output_err(err.to_string()))?;
        }
        if rows.is_empty() {
            writer
                .write_record(crate::schema::LISTING_COLUMNS)
                .map_err(|err| output_err(err.to_string()))?;
        }
        writer.flush().map_err(|err| output_err(err.to_string()))?;
    }
    fs::rename(&tmp, path).map_err(|err| output_err(err.to_string()))
}

/// Counters gathered during a collection run.
#[derive(Debug, Default)]
pub struct Metrics {
    pages_fetched: AtomicUsize,
    cards_seen: AtomicUsize,
    cards_rejected: AtomicUsize,
    duplicates: AtomicUsize,
    http_errors: AtomicUsize,
    status_errors: AtomicUsize,
    parse_errors: AtomicUsize,
}

impl Metrics {
    fn record_page_fetched(&self) {
        self.pages_fetched.fetch_add(1, Ordering::Relaxed);
    }

    fn record_cards(&self, seen: usize, rejected: usize) {
        self.cards_seen.fetch_add(seen + rejected, Ordering::Relaxed);
        self.cards_rejected.fetch_add(rejected, Ordering::Relaxed);
    }

    fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self, kind: TaskErrorKind) {
        let counter = match kind {
            TaskErrorKind::Http => &self.http_errors,
            TaskErrorKind::Status => &self.status_errors,
            TaskErrorKind::Parse => &self.parse_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Search pages fetched successfully.
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched.load(Ordering::Relaxed)
    }

    /// Duplicate listings dropped.
    pub fn duplicates(&self) -> usize {
        self.duplicates.load(Ordering::Relaxed)
    }

    /// Network failures and timeouts.
    pub fn http_errors(&self) -> usize {
        self.http_errors.load(Ordering::Relaxed)
    }

    /// Skipped pages and listings of any kind.
    pub fn failures(&self) -> usize {
        self.http_errors.load(Ordering::Relaxed)
            + self.status_errors.load(Ordering::Relaxed)
            + self.parse_errors.load(Ordering::Relaxed)
            + self.cards_rejected.load(Ordering::Relaxed)
    }

    fn report(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f32().max(f32::EPSILON);
        println!("--- collect metrics ({secs:.2}s) ---");
        println!("search pages fetched: {}", self.pages_fetched());
        println!("cards seen: {}", self.cards_seen.load(Ordering::Relaxed));
        println!(
            "cards without address: {}",
            self.cards_rejected.load(Ordering::Relaxed)
        );
        println!("duplicate skips: {}", self.duplicates());
        println!("http errors: {}", self.http_errors.load(Ordering::Relaxed));
        println!(
            "non-success responses: {}",
            self.status_errors.load(Ordering::Relaxed)
        );
        println!("parse errors: {}", self.parse_errors.load(Ordering::Relaxed));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskErrorKind {
    Http,
    Status,
    Parse,
}

struct TaskError {
    url: Option<String>,
    message: String,
    kind: TaskErrorKind,
}

impl TaskError {
    fn http(url: &str, err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("page load timed out: {err}")
        } else {
            format!("http error: {err}")
        };
        Self {
            url: Some(url.to_string()),
            message,
            kind: TaskErrorKind::Http,
        }
    }

    fn status(url: &str, status: u16) -> Self {
        Self {
            url: Some(url.to_string()),
            message: format!("unexpected status {status}"),
            kind: TaskErrorKind::Status,
        }
    }

    fn missing_link(address: &str) -> Self {
        Self {
            url: None,
            message: format!("card for {address:?} has no detail link"),
            kind: TaskErrorKind::Parse,
        }
    }
}
