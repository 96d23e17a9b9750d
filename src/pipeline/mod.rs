//! Per-airline crawl: list → fetch → parse → normalize → dedupe → persist.

pub mod freshness;
pub mod report;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};
use url::Url;

use crate::airlines::{AirlineRef, AirlineTable};
use crate::db::{NaturalKey, SeatmapRecord, Store, UpsertOutcome};
use crate::error::{FetchError, StoreError};
use crate::fetch::{FetchClient, FetchResponse};
use crate::images::{image_filename, ImageCache, ImageCacheError};
use crate::metrics::MetricsSnapshot;
use crate::normalize::{AircraftModel, Normalizer};
use crate::parser::{self, ParsedPage};
use crate::settings::Settings;
use crate::throttle::Throttle;

pub use crate::cancel::Cancellation;
pub use freshness::{Assessment, FreshnessPolicy};
pub use report::{AirlineReport, AirlineState, BatchReport, FailureScope, Outcome};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("base url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Site root; always ends with `/`.
    pub base_url: Url,
    pub accept_unrecognized: bool,
    pub lease_ttl: Duration,
    /// Detail pages in flight per airline.
    pub page_concurrency: usize,
}

impl PipelineOptions {
    pub fn new(base_url: &str) -> Result<Self, url::ParseError> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Self {
            base_url: Url::parse(&base)?,
            accept_unrecognized: true,
            lease_ttl: Duration::from_secs(3600),
            page_concurrency: 2,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, url::ParseError> {
        let mut options = Self::new(&settings.crawler.base_url)?;
        options.accept_unrecognized = settings.pipeline.accept_unrecognized;
        options.lease_ttl = Duration::from_secs(settings.pipeline.lease_ttl_secs);
        options.page_concurrency = settings.throttle.max_concurrent.max(1);
        Ok(options)
    }

    /// Index page for one airline, e.g. `https://www.aerolopa.com/ca`.
    pub fn airline_url(&self, airline_code: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(&airline_code.trim().to_lowercase())
    }
}

/// A normalized entry ready for persistence.
#[derive(Debug, Clone)]
struct Accepted {
    model: String,
    label: String,
    image_url: Url,
}

enum PageFetch {
    Fetched(FetchResponse),
    Failed(FetchError),
    Cancelled,
}

pub struct Orchestrator {
    normalizer: Normalizer,
    fetcher: Arc<FetchClient>,
    store: Arc<Store>,
    images: ImageCache,
    freshness: FreshnessPolicy,
    options: PipelineOptions,
}

impl Orchestrator {
    pub fn new(
        normalizer: Normalizer,
        fetcher: Arc<FetchClient>,
        store: Arc<Store>,
        images: ImageCache,
        freshness: FreshnessPolicy,
        options: PipelineOptions,
    ) -> Self {
        Self {
            normalizer,
            fetcher,
            store,
            images,
            freshness,
            options,
        }
    }

    /// Wire the production stack from settings. `cancel` reaches every fetch.
    pub fn from_settings(
        settings: &Settings,
        airlines: Arc<AirlineTable>,
        cancel: Cancellation,
    ) -> Result<Self, SetupError> {
        let metrics = Arc::new(crate::metrics::Metrics::new());
        let throttle = Arc::new(Throttle::from_settings(&settings.throttle));
        let fetcher =
            FetchClient::from_settings(&settings.crawler, throttle, metrics)?.with_cancellation(cancel);
        let store = Store::from_settings(&settings.storage)?;

        Ok(Self::new(
            Normalizer::new(airlines),
            Arc::new(fetcher),
            Arc::new(store),
            ImageCache::new(settings.storage.image_root()),
            FreshnessPolicy::from_settings(&settings.pipeline),
            PipelineOptions::from_settings(settings)?,
        ))
    }

    /// The fetch client's stop signal.
    pub fn cancellation(&self) -> &Cancellation {
        self.fetcher.cancellation()
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.fetcher.metrics().snapshot()
    }

    /// Run every airline on a bounded worker pool. One airline failing never
    /// stops the others; the report keeps input order.
    pub async fn run_batch(self: &Arc<Self>, codes: &[String], workers: usize, progress: bool) -> BatchReport {
        let workers = workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let (tx, mut rx) = mpsc::channel::<(usize, AirlineReport)>(workers * 2);

        let pb = if progress {
            ProgressBar::new(codes.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) =
            ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("=> "));
        }

        for (i, code) in codes.iter().enumerate() {
            let this = Arc::clone(self);
            let sem = Arc::clone(&semaphore);
            let tx = tx.clone();
            let code = code.clone();

            tokio::spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return;
                };
                let report = this.run_airline(&code).await;
                let _ = tx.send((i, report)).await;
            });
        }

        // rx closes once every task has sent or died
        drop(tx);

        let mut slots: Vec<Option<AirlineReport>> = vec![None; codes.len()];
        while let Some((i, report)) = rx.recv().await {
            pb.set_message(format!("{} {}", report.airline_code, report.outcome()));
            pb.inc(1);
            slots[i] = Some(report);
        }
        pb.finish_and_clear();

        let airlines = slots
            .into_iter()
            .zip(codes)
            .map(|(slot, code)| {
                slot.unwrap_or_else(|| {
                    let mut r = AirlineReport::new(code.as_str());
                    r.fail(FailureScope::Listing, code.as_str(), "worker task aborted");
                    r
                })
            })
            .collect();

        BatchReport { airlines }
    }

    /// Drive one airline through the state machine. Never panics or returns
    /// early with an error: every failure lands in the report.
    pub async fn run_airline(&self, raw_airline: &str) -> AirlineReport {
        let mut report = AirlineReport::new(raw_airline.trim().to_uppercase());

        let airline = match self.normalizer.normalize_airline(raw_airline) {
            Ok(a) => a.clone(),
            Err(e) => {
                report.fail(FailureScope::Listing, raw_airline, e.to_string());
                return report;
            }
        };
        let code = airline.iata_code.clone();
        report.airline_code = code.clone();

        let _lease = match self.store.claim_airline(&code, self.options.lease_ttl) {
            Ok(lease) => lease,
            Err(e) => {
                report.fail(FailureScope::Store, code.as_str(), e.to_string());
                return report;
            }
        };

        // Listing
        report.advance(AirlineState::Listing);
        if self.cancellation().is_cancelled() {
            report.fail(FailureScope::Cancelled, code.as_str(), "run cancelled before listing");
            return report;
        }
        let index_url = match self.options.airline_url(&code) {
            Ok(u) => u,
            Err(e) => {
                report.fail(FailureScope::Listing, code.as_str(), e.to_string());
                return report;
            }
        };
        let index = match self.fetcher.fetch(index_url.as_str()).await {
            Ok(resp) => resp,
            Err(e) if e.is_cancelled() => {
                report.fail(FailureScope::Cancelled, index_url.as_str(), e.to_string());
                return report;
            }
            Err(e) => {
                report.fail(FailureScope::Listing, index_url.as_str(), e.to_string());
                return report;
            }
        };
        let index_page = parser::parse(&index.body, &code, &index.url);
        info!(
            airline = %code,
            detail_pages = index_page.detail_links.len(),
            "listing obtained"
        );

        // Fetching
        report.advance(AirlineState::Fetching);
        let fetched = self.fetch_pages(&index_page.detail_links).await;

        let mut bodies = Vec::new();
        for (url, result) in index_page.detail_links.iter().zip(fetched) {
            match result {
                PageFetch::Fetched(resp) => bodies.push((resp.url, resp.body)),
                PageFetch::Failed(e) => report.record(FailureScope::Page, url.as_str(), e.to_string()),
                PageFetch::Cancelled => {
                    report.record(FailureScope::Cancelled, url.as_str(), "not fetched")
                }
            }
        }
        report.counts.pages = 1 + bodies.len();

        // Normalizing
        report.advance(AirlineState::Normalizing);
        let mut pages = vec![index_page];
        pages.extend(self.parse_pages(&code, bodies, &mut report).await);
        let accepted = self.accept_entries(&pages, &mut report);

        // Persisting
        report.advance(AirlineState::Persisting);
        self.persist(&airline, accepted, &mut report).await;

        if report.state != AirlineState::Failed {
            report.advance(AirlineState::Done);
        }
        info!(airline = %code, outcome = %report.outcome(), "airline finished");
        report
    }

    async fn fetch_pages(&self, urls: &[Url]) -> Vec<PageFetch> {
        stream::iter(urls.iter().cloned())
            .map(|url| async move {
                if self.cancellation().is_cancelled() {
                    return PageFetch::Cancelled;
                }
                match self.fetcher.fetch(url.as_str()).await {
                    Ok(resp) => PageFetch::Fetched(resp),
                    Err(e) if e.is_cancelled() => PageFetch::Cancelled,
                    Err(e) => PageFetch::Failed(e),
                }
            })
            .buffered(self.options.page_concurrency.max(1))
            .collect()
            .await
    }

    /// CPU-bound; runs on the rayon pool off the async workers. Order is kept.
    async fn parse_pages(
        &self,
        code: &str,
        bodies: Vec<(Url, Vec<u8>)>,
        report: &mut AirlineReport,
    ) -> Vec<ParsedPage> {
        if bodies.is_empty() {
            return Vec::new();
        }
        let owned_code = code.to_string();
        let targets: Vec<String> = bodies.iter().map(|(u, _)| u.to_string()).collect();

        let joined = tokio::task::spawn_blocking(move || {
            bodies
                .par_iter()
                .map(|(url, body)| parser::parse(body, &owned_code, url))
                .collect::<Vec<_>>()
        })
        .await;

        match joined {
            Ok(pages) => pages,
            Err(e) => {
                for target in targets {
                    report.record(FailureScope::Page, target, format!("parser task failed: {e}"));
                }
                Vec::new()
            }
        }
    }

    /// Normalize, apply strictness, and drop duplicate keys within this run.
    fn accept_entries(&self, pages: &[ParsedPage], report: &mut AirlineReport) -> Vec<Accepted> {
        let code = report.airline_code.clone();
        let mut seen_keys = HashSet::new();
        let mut model_by_url: HashMap<String, String> = HashMap::new();
        let mut accepted = Vec::new();

        for page in pages {
            for err in page.errors() {
                report.counts.skipped += 1;
                report.record(FailureScope::Entry, page.page_url.as_str(), err.to_string());
            }

            for entry in page.entries() {
                report.counts.entries += 1;
                let model = match self.normalizer.normalize_aircraft(&entry.aircraft_label) {
                    AircraftModel::Recognized(m) => m,
                    AircraftModel::Unrecognized(slug) if self.options.accept_unrecognized => {
                        warn!(
                            airline = %code,
                            label = %entry.aircraft_label,
                            slug = %slug,
                            "unrecognized aircraft label, keeping slug"
                        );
                        report.counts.unrecognized += 1;
                        slug
                    }
                    AircraftModel::Unrecognized(_) => {
                        report.counts.skipped += 1;
                        report.record(
                            FailureScope::Entry,
                            entry.image_url.as_str(),
                            format!("unrecognized aircraft label {:?}", entry.aircraft_label),
                        );
                        continue;
                    }
                };

                let filename = image_filename(&code, &model, &entry.image_url);
                if !seen_keys.insert((model.clone(), filename)) {
                    debug!(airline = %code, url = %entry.image_url, "duplicate entry in run");
                    continue;
                }

                match model_by_url.get(entry.image_url.as_str()) {
                    Some(other) if *other != model => warn!(
                        airline = %code,
                        url = %entry.image_url,
                        first = %other,
                        second = %model,
                        "same image listed under two aircraft models"
                    ),
                    Some(_) => {}
                    None => {
                        model_by_url.insert(entry.image_url.to_string(), model.clone());
                    }
                }

                accepted.push(Accepted {
                    model,
                    label: entry.aircraft_label.clone(),
                    image_url: entry.image_url.clone(),
                });
            }
        }

        accepted
    }

    /// In normalization order. New keys are downloaded and inserted; known
    /// keys are refetched only when the freshness check says so.
    async fn persist(&self, airline: &AirlineRef, accepted: Vec<Accepted>, report: &mut AirlineReport) {
        let code = airline.iata_code.as_str();
        let mut store_attempts = 0usize;
        let mut store_failures = 0usize;
        let total = accepted.len();

        for (done, entry) in accepted.into_iter().enumerate() {
            if self.cancellation().is_cancelled() {
                report.record(
                    FailureScope::Cancelled,
                    code,
                    format!("{} entries not persisted", total - done),
                );
                break;
            }

            let filename = image_filename(code, &entry.model, &entry.image_url);
            let key = NaturalKey {
                airline_code: code.to_string(),
                aircraft_model: entry.model.clone(),
                image_filename: filename.clone(),
            };

            let existing = match self.store.find(&key) {
                Ok(found) => found,
                Err(e) => {
                    store_attempts += 1;
                    store_failures += 1;
                    report.record(FailureScope::Store, filename.as_str(), e.to_string());
                    continue;
                }
            };
            if let Some(current) = &existing {
                let cached = self.images.stored_size(code, &filename);
                let verdict = self.freshness.assess(current, cached, Utc::now());
                if !verdict.needs_refetch() {
                    report.counts.unchanged += 1;
                    continue;
                }
                info!(airline = code, file = %filename, reason = verdict.label(), "refetching image");
            }

            let size = match self
                .images
                .download(&self.fetcher, code, &filename, &entry.image_url)
                .await
            {
                Ok(size) => size,
                Err(ImageCacheError::Fetch(e)) if e.is_cancelled() => {
                    report.record(
                        FailureScope::Cancelled,
                        code,
                        format!("{} entries not persisted", total - done),
                    );
                    break;
                }
                Err(e) => {
                    report.record(
                        FailureScope::Image,
                        entry.image_url.as_str(),
                        format!("{} ({}): {}", entry.model, entry.label, e),
                    );
                    continue;
                }
            };
            report.counts.images += 1;

            let record = SeatmapRecord {
                airline_code: code.to_string(),
                airline_name_cn: airline.chinese_name.clone(),
                airline_name_en: airline.english_name.clone(),
                aircraft_model: entry.model,
                image_filename: filename,
                source_url: entry.image_url.to_string(),
                downloaded_at: Utc::now(),
                file_size_bytes: size,
            };

            store_attempts += 1;
            match self.store.upsert(&record) {
                Ok(UpsertOutcome::Inserted) => report.counts.inserted += 1,
                Ok(UpsertOutcome::Updated) => report.counts.updated += 1,
                Ok(UpsertOutcome::Unchanged) => report.counts.unchanged += 1,
                Err(e) => {
                    store_failures += 1;
                    report.record(FailureScope::Store, record.image_filename.as_str(), e.to_string());
                }
            }
        }

        if store_attempts > 0 && store_failures == store_attempts {
            report.fail(
                FailureScope::Store,
                code,
                format!("all {store_attempts} store writes failed"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::{client, ScriptedTransport, Step};

    const BASE: &str = "https://www.aerolopa.com/";

    struct Harness {
        _dir: tempfile::TempDir,
        transport: Arc<ScriptedTransport>,
        orchestrator: Arc<Orchestrator>,
    }

    fn harness_with(configure: impl FnOnce(&mut PipelineOptions)) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        let store = Store::open(&dir.path().join("db.sqlite"), &dir.path().join("events.jsonl")).unwrap();
        let mut options = PipelineOptions::new(BASE).unwrap();
        configure(&mut options);

        let orchestrator = Orchestrator::new(
            Normalizer::new(Arc::new(AirlineTable::packaged().unwrap())),
            Arc::new(client(Arc::clone(&transport), 3)),
            Arc::new(store),
            ImageCache::new(dir.path().join("images")),
            FreshnessPolicy::default(),
            options,
        );
        Harness {
            _dir: dir,
            transport,
            orchestrator: Arc::new(orchestrator),
        }
    }

    fn harness() -> Harness {
        harness_with(|_| {})
    }

    fn img(path: &str) -> String {
        format!("{BASE}{path}")
    }

    fn script_airline(t: &ScriptedTransport, code: &str, details: &[&str]) {
        let links: String = details
            .iter()
            .map(|d| format!(r#"<a class="aircraft-link" href="/{d}">{d}</a>"#))
            .collect();
        t.page(&format!("{BASE}{code}"), format!("<html><body>{links}</body></html>"));
    }

    fn healthy_image(t: &ScriptedTransport, path: &str) {
        t.script(&img(path), vec![Step::Ok(200, vec![0u8; 80_000])]);
    }

    #[tokio::test(start_paused = true)]
    async fn one_malformed_entry_among_valid_ones() {
        let h = harness();
        script_airline(&h.transport, "ca", &["ca-a320"]);
        h.transport.page(
            &img("ca-a320"),
            r#"<figure><img src="/img/ca-a320.jpg" alt="Airbus A-320"></figure>
               <figure><img src="/img/ca-a330.jpg" alt="A330-300"></figure>
               <figure class="seatmap"><img src="/img/broken.jpg"></figure>
               <figure><img src="/img/ca-b777.jpg" alt="Boeing 777-300ER"></figure>"#,
        );
        for p in ["img/ca-a320.jpg", "img/ca-a330.jpg", "img/ca-b777.jpg"] {
            healthy_image(&h.transport, p);
        }

        let report = h.orchestrator.run_airline("CA").await;

        assert_eq!(report.state, AirlineState::Done);
        assert_eq!(report.counts.inserted, 3);
        assert_eq!(report.counts.skipped, 1);
        assert_eq!(report.outcome(), Outcome::Partial(1));

        let store = h.orchestrator.store();
        let a320 = store.get("CA", "A320").unwrap();
        assert_eq!(a320.len(), 1);
        assert_eq!(a320[0].airline_name_en, "Air China");
        assert_eq!(a320[0].file_size_bytes, 80_000);
        assert_eq!(store.list_records("CA").unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_listing_fails_only_that_airline() {
        let h = harness();
        h.transport.script(&format!("{BASE}ca"), vec![Step::Ok(503, Vec::new())]);
        script_airline(&h.transport, "mu", &["mu-a320"]);
        h.transport.page(
            &img("mu-a320"),
            r#"<figure><img src="/img/mu-a320.jpg" alt="A320"></figure>"#,
        );
        healthy_image(&h.transport, "img/mu-a320.jpg");

        let batch = h
            .orchestrator
            .run_batch(&["CA".to_string(), "MU".to_string()], 2, false)
            .await;

        assert!(batch.any_failed());
        let ca = batch.get("CA").unwrap();
        assert_eq!(ca.state, AirlineState::Failed);
        assert_eq!(ca.failure_count(FailureScope::Listing), 1);
        assert_eq!(h.transport.calls(&format!("{BASE}ca")), 3);

        let mu = batch.get("MU").unwrap();
        assert_eq!(mu.state, AirlineState::Done);
        assert_eq!(mu.outcome(), Outcome::Succeeded);
        assert_eq!(batch.airlines[0].airline_code, "CA");
    }

    #[tokio::test(start_paused = true)]
    async fn bad_detail_page_does_not_block_others() {
        let h = harness();
        script_airline(&h.transport, "ca", &["ca-a320", "ca-gone"]);
        h.transport.page(
            &img("ca-a320"),
            r#"<figure><img src="/img/ca-a320.jpg" alt="A320"></figure>"#,
        );
        healthy_image(&h.transport, "img/ca-a320.jpg");

        let report = h.orchestrator.run_airline("CA").await;

        assert_eq!(report.state, AirlineState::Done);
        assert_eq!(report.failure_count(FailureScope::Page), 1);
        assert_eq!(report.counts.pages, 2);
        assert_eq!(report.counts.inserted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rerun_skips_fresh_images() {
        let h = harness();
        script_airline(&h.transport, "ca", &["ca-a320"]);
        h.transport.page(
            &img("ca-a320"),
            r#"<figure><img src="/img/ca-a320.jpg" alt="A320"></figure>"#,
        );
        healthy_image(&h.transport, "img/ca-a320.jpg");

        let first = h.orchestrator.run_airline("CA").await;
        let second = h.orchestrator.run_airline("CA").await;

        assert_eq!(first.counts.inserted, 1);
        assert_eq!(second.counts.inserted, 0);
        assert_eq!(second.counts.unchanged, 1);
        assert_eq!(h.transport.calls(&img("img/ca-a320.jpg")), 1);
        assert_eq!(h.orchestrator.store().get("CA", "A320").unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn undersized_image_is_refetched_even_when_fresh() {
        let h = harness();
        script_airline(&h.transport, "ca", &["ca-a320"]);
        h.transport.page(
            &img("ca-a320"),
            r#"<figure><img src="/img/ca-a320.jpg" alt="A320"></figure>"#,
        );
        h.transport.script(
            &img("img/ca-a320.jpg"),
            vec![Step::Ok(200, vec![0u8; 30_000]), Step::Ok(200, vec![0u8; 200_000])],
        );

        h.orchestrator.run_airline("CA").await;
        let second = h.orchestrator.run_airline("CA").await;

        assert_eq!(second.counts.updated, 1);
        assert_eq!(h.transport.calls(&img("img/ca-a320.jpg")), 2);
        let rows = h.orchestrator.store().get("CA", "A320").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].file_size_bytes, 200_000);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_run_on_same_airline_fails_fast() {
        let h = harness();
        script_airline(&h.transport, "ca", &[]);

        let _held = h
            .orchestrator
            .store()
            .claim_airline("CA", Duration::from_secs(3600))
            .unwrap();
        let report = h.orchestrator.run_airline("CA").await;

        assert_eq!(report.state, AirlineState::Failed);
        assert_eq!(report.failure_count(FailureScope::Store), 1);
        assert_eq!(h.transport.calls(&format!("{BASE}ca")), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn airline_names_resolve_like_codes() {
        let h = harness();
        script_airline(&h.transport, "ca", &[]);

        let by_name = h.orchestrator.run_airline("Air China").await;
        assert_eq!(by_name.airline_code, "CA");
        assert_eq!(by_name.state, AirlineState::Done);

        let unknown = h.orchestrator.run_airline("Oceanic Airlines").await;
        assert_eq!(unknown.state, AirlineState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn strict_mode_drops_unrecognized_labels() {
        let h = harness_with(|o| o.accept_unrecognized = false);
        script_airline(&h.transport, "ca", &["ca-fleet"]);
        h.transport.page(
            &img("ca-fleet"),
            r#"<figure class="seatmap"><img src="/img/a.jpg" alt="A350-900"></figure>
               <figure class="seatmap"><img src="/img/b.jpg" alt="Sukhoi Superjet"></figure>"#,
        );
        healthy_image(&h.transport, "img/a.jpg");
        healthy_image(&h.transport, "img/b.jpg");

        let report = h.orchestrator.run_airline("CA").await;

        assert_eq!(report.counts.inserted, 1);
        assert_eq!(report.counts.skipped, 1);
        assert_eq!(h.transport.calls(&img("img/b.jpg")), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lenient_mode_keeps_slug() {
        let h = harness();
        script_airline(&h.transport, "ca", &["ca-fleet"]);
        h.transport.page(
            &img("ca-fleet"),
            r#"<figure class="seatmap"><img src="/img/b.jpg" alt="Sukhoi Superjet"></figure>"#,
        );
        healthy_image(&h.transport, "img/b.jpg");

        let report = h.orchestrator.run_airline("CA").await;

        assert_eq!(report.counts.unrecognized, 1);
        assert_eq!(report.outcome(), Outcome::Succeeded);
        assert_eq!(h.orchestrator.store().get("CA", "SUKHOISUPERJET").unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_run_issues_no_fetches() {
        let h = harness();
        script_airline(&h.transport, "ca", &["ca-a320"]);
        h.orchestrator.cancellation().cancel();

        let report = h.orchestrator.run_airline("CA").await;

        assert_eq!(report.state, AirlineState::Failed);
        assert_eq!(report.failure_count(FailureScope::Cancelled), 1);
        assert_eq!(h.transport.calls(&format!("{BASE}ca")), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_listing_retries_stops_them() {
        let h = harness();
        let cancel = h.orchestrator.cancellation().clone();
        h.transport.script(
            &format!("{BASE}ca"),
            vec![Step::CancelAfter(cancel, 503, Vec::new()), Step::Ok(503, Vec::new())],
        );

        let report = h.orchestrator.run_airline("CA").await;

        assert_eq!(report.state, AirlineState::Failed);
        assert_eq!(report.failure_count(FailureScope::Cancelled), 1);
        assert_eq!(report.failure_count(FailureScope::Listing), 0);
        assert_eq!(h.transport.calls(&format!("{BASE}ca")), 1);
        assert_eq!(h.orchestrator.metrics().exhausted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_page_fetching_marks_the_rest() {
        let h = harness_with(|o| o.page_concurrency = 1);
        let cancel = h.orchestrator.cancellation().clone();
        script_airline(&h.transport, "ca", &["ca-a320", "ca-a330", "ca-b777"]);
        h.transport.script(
            &img("ca-a320"),
            vec![Step::CancelAfter(
                cancel,
                200,
                br#"<figure><img src="/img/ca-a320.jpg" alt="A320"></figure>"#.to_vec(),
            )],
        );
        h.transport.page(&img("ca-a330"), "<html></html>");
        h.transport.page(&img("ca-b777"), "<html></html>");
        healthy_image(&h.transport, "img/ca-a320.jpg");

        let report = h.orchestrator.run_airline("CA").await;

        assert_eq!(report.state, AirlineState::Done);
        assert_eq!(report.counts.pages, 2);
        let cancelled: Vec<_> = report
            .failures
            .iter()
            .filter(|f| f.scope == FailureScope::Cancelled)
            .map(|f| f.target.as_str())
            .collect();
        assert!(cancelled.contains(&img("ca-a330").as_str()));
        assert!(cancelled.contains(&img("ca-b777").as_str()));
        assert_eq!(h.transport.calls(&img("ca-a330")), 0);
        assert_eq!(h.transport.calls(&img("ca-b777")), 0);
        assert_eq!(h.transport.calls(&img("img/ca-a320.jpg")), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_downloads_keeps_persisted_records() {
        let h = harness();
        let cancel = h.orchestrator.cancellation().clone();
        script_airline(&h.transport, "ca", &["ca-fleet"]);
        h.transport.page(
            &img("ca-fleet"),
            r#"<figure><img src="/img/ca-a320.jpg" alt="A320"></figure>
               <figure><img src="/img/ca-a321.jpg" alt="A321"></figure>
               <figure><img src="/img/ca-b777.jpg" alt="B777-300ER"></figure>"#,
        );
        healthy_image(&h.transport, "img/ca-a320.jpg");
        h.transport.script(
            &img("img/ca-a321.jpg"),
            vec![Step::CancelAfter(cancel, 200, vec![0u8; 80_000])],
        );
        healthy_image(&h.transport, "img/ca-b777.jpg");

        let report = h.orchestrator.run_airline("CA").await;

        assert_eq!(report.state, AirlineState::Done);
        assert_eq!(report.counts.inserted, 2);
        assert_eq!(report.failure_count(FailureScope::Cancelled), 1);
        assert_eq!(h.transport.calls(&img("img/ca-b777.jpg")), 0);

        let store = h.orchestrator.store();
        assert_eq!(store.get("CA", "A320").unwrap().len(), 1);
        assert_eq!(store.get("CA", "A321").unwrap().len(), 1);
        assert!(store.get("CA", "B777").unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fixture_site_stores_seat_maps_only() {
        let h = harness();
        h.transport.page(
            &format!("{BASE}ca"),
            std::fs::read("tests/fixtures/ca_index.html").unwrap(),
        );
        h.transport.page(&img("ca-a320"), std::fs::read("tests/fixtures/ca_a320.html").unwrap());
        h.transport.page(
            &img("ca-a330"),
            r#"<figure><img src="/img/ca-a330-200.jpg" alt="Airbus A330-200"></figure>
               <figure><img src="/img/ca-a330-300.jpg" alt="Airbus A330-300"></figure>"#,
        );
        h.transport.page(
            &img("ca-b777"),
            r#"<figure class="seatmap"><img src="/img/ca-b777.jpg" alt="Boeing 777-300ER"></figure>"#,
        );
        for p in [
            "wp-content/uploads/ca-a320-1800.jpg",
            "wp-content/uploads/ca-a320neo.png",
            "img/ca-a330-200.jpg",
            "img/ca-a330-300.jpg",
            "img/ca-b777.jpg",
            "wp-content/uploads/ca-fleet-banner.jpg",
        ] {
            healthy_image(&h.transport, p);
        }

        let report = h.orchestrator.run_airline("CA").await;

        assert_eq!(report.outcome(), Outcome::Succeeded);
        assert_eq!(report.counts.unrecognized, 0);
        assert_eq!(h.transport.calls(&img("wp-content/uploads/ca-fleet-banner.jpg")), 0);

        let store = h.orchestrator.store();
        let models: Vec<_> = store
            .list_records("CA")
            .unwrap()
            .into_iter()
            .map(|r| r.aircraft_model)
            .collect();
        assert_eq!(models, vec!["A320", "A320NEO", "A330", "A330", "B777"]);
        assert!(store.get("CA", "AIRCHINAFLEET").unwrap().is_empty());
        assert!(store.get("CA", "A320").unwrap()[0].source_url.ends_with("ca-a320-1800.jpg"));
    }

    #[tokio::test(start_paused = true)]
    async fn image_failure_is_recorded_per_entry() {
        let h = harness();
        script_airline(&h.transport, "ca", &["ca-a320"]);
        h.transport.page(
            &img("ca-a320"),
            r#"<figure><img src="/img/ok.jpg" alt="A320"></figure>
               <figure><img src="/img/missing.jpg" alt="A321"></figure>"#,
        );
        healthy_image(&h.transport, "img/ok.jpg");

        let report = h.orchestrator.run_airline("CA").await;

        assert_eq!(report.state, AirlineState::Done);
        assert_eq!(report.counts.inserted, 1);
        assert_eq!(report.failure_count(FailureScope::Image), 1);
    }

    #[test]
    fn airline_url_is_lowercased_under_base() {
        let options = PipelineOptions::new("https://www.aerolopa.com").unwrap();
        assert_eq!(options.airline_url("CA").unwrap().as_str(), "https://www.aerolopa.com/ca");
    }
}
