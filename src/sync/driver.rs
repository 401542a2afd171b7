use crate::apimo::{FetchedPage, ListingSource, TransportError};
use crate::config::SyncConfig;
use crate::domain::{normalize, ListingRecord, TaxonomyMap, SUBTYPE_MAPPINGS, TYPE_MAPPINGS};
use crate::errors::{StoreError, SyncError};
use crate::store::sync_runs::{end_sync_run, start_sync_run, RunStart};
use crate::store::{Database, ListingId, LocalStore};
use crate::sync::fields::TAX_PROPERTY_TYPE;
use crate::sync::reconciler::{ReconcileError, ReconcileOutcome, Reconciler, SkipReason};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
pub struct SyncReport {
    pub pages: usize,
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped_stale: usize,
    pub skipped_invalid: usize,
    pub mapping_gaps: usize,
    pub failures: Vec<ReconcileError>,
}

#[derive(Debug, Default)]
pub struct PruneReport {
    pub pages: usize,
    pub remote_listings: usize,
    pub deleted: Vec<ListingId>,
    pub failures: Vec<(ListingId, StoreError)>,
}

/// Runs sync passes: pages through the source and reconciles page by page.
pub struct SyncDriver<'a, S, L> {
    config: &'a SyncConfig,
    taxonomy: &'a TaxonomyMap,
    source: S,
    store: L,
    runs: Database,
}

impl<'a, S, L> SyncDriver<'a, S, L>
where
    S: ListingSource,
    L: LocalStore,
{
    pub fn new(
        config: &'a SyncConfig,
        taxonomy: &'a TaxonomyMap,
        source: S,
        store: L,
        runs: Database,
    ) -> Self {
        Self {
            config,
            taxonomy,
            source,
            store,
            runs,
        }
    }

    pub fn store(&self) -> &L {
        &self.store
    }

    /// One full pass. Fails fast if another pass for the same job is running,
    /// and aborts (keeping already-applied pages) when a page cannot be fetched.
    pub fn run_pass(&mut self, now: DateTime<Utc>) -> Result<SyncReport, SyncError> {
        let job = self.config.job_key("sync");
        let run_id = self.claim(&job, now)?;
        info!(job = %job, run_id, "sync pass started");

        let mut report = SyncReport::default();
        let result = self.sync_pages(now, &mut report);

        self.finish_run(run_id, report.pages, report.fetched, &result)?;

        match result {
            Ok(()) => {
                info!(
                    job = %job,
                    pages = report.pages,
                    fetched = report.fetched,
                    created = report.created,
                    updated = report.updated,
                    stale = report.skipped_stale,
                    invalid = report.skipped_invalid,
                    mapping_gaps = report.mapping_gaps,
                    failures = report.failures.len(),
                    "sync pass finished"
                );
                Ok(report)
            }
            Err(e) => {
                error!(job = %job, pages = report.pages, error = %e, "sync pass aborted");
                Err(e)
            }
        }
    }

    fn sync_pages(&mut self, now: DateTime<Utc>, report: &mut SyncReport) -> Result<(), SyncError> {
        let limit = self.config.api.page_limit;
        let mut offset = 0;

        loop {
            let fetched = self.fetch_with_retry(offset, limit)?;
            let count = fetched.page.properties.len();
            report.pages += 1;
            report.fetched += count;
            debug!(offset, count, has_more = fetched.has_more, "page fetched");

            for raw in &fetched.page.properties {
                let record = normalize(raw, self.taxonomy, &self.config.area_codes);
                self.apply_record(&record, now, report);
            }

            if !fetched.has_more || count == 0 {
                return Ok(());
            }
            offset += count;
        }
    }

    fn apply_record(&mut self, record: &ListingRecord, now: DateTime<Utc>, report: &mut SyncReport) {
        for gap in &record.mapping_gaps {
            warn!(mls = %record.mls, category = %gap.category, id = %gap.id, "unmapped taxonomy id, using raw id as label");
        }
        report.mapping_gaps += record.mapping_gaps.len();

        let reconciler = Reconciler::new(&self.config.policy);
        match reconciler.reconcile(&mut self.store, record, now) {
            Ok(ReconcileOutcome::Created(id)) => {
                info!(mls = %record.mls, listing_id = id, "listing created");
                report.created += 1;
            }
            Ok(ReconcileOutcome::Updated(id)) => {
                debug!(mls = %record.mls, listing_id = id, "listing updated");
                report.updated += 1;
            }
            Ok(ReconcileOutcome::Skipped(SkipReason::Stale)) => {
                report.skipped_stale += 1;
            }
            Ok(ReconcileOutcome::Skipped(reason)) => {
                warn!(mls = %record.mls, ?reason, "listing skipped");
                report.skipped_invalid += 1;
            }
            Err(e) => {
                error!(mls = %e.mls, step = %e.step, error = %e.source, "listing reconcile failed, rolled back");
                report.failures.push(e);
            }
        }
    }

    fn fetch_with_retry(&self, offset: usize, limit: usize) -> Result<FetchedPage, TransportError> {
        let attempts = self.config.max_page_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.source.fetch_page(offset, limit) {
                Ok(page) => return Ok(page),
                Err(e) if attempt >= attempts => {
                    error!(offset, attempt, error = %e, "page fetch failed, giving up");
                    return Err(e);
                }
                Err(e) => {
                    warn!(offset, attempt, error = %e, "page fetch failed, retrying");
                    std::thread::sleep(self.backoff(attempt));
                    attempt += 1;
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = (self.config.retry_backoff * attempt).min(MAX_BACKOFF);
        let jitter_max = base.as_millis() as u64 / 2;
        let jitter = rand::thread_rng().gen_range(0..=jitter_max);
        base + Duration::from_millis(jitter)
    }

    fn claim(&self, job: &str, now: DateTime<Utc>) -> Result<i64, SyncError> {
        match start_sync_run(
            &self.runs,
            job,
            now.timestamp(),
            self.config.lock_ttl.num_seconds(),
        )? {
            RunStart::Started(run_id) => Ok(run_id),
            RunStart::InProgress(run_id) => {
                warn!(job = %job, run_id, "another pass holds the lock");
                Err(SyncError::PassInProgress {
                    job: job.to_string(),
                    run_id,
                })
            }
        }
    }

    /// Closes the run row. When the pass itself failed, a failure to record
    /// that is only logged and the pass error is what the caller sees.
    fn finish_run(
        &self,
        run_id: i64,
        pages: usize,
        seen: usize,
        result: &Result<(), SyncError>,
    ) -> Result<(), SyncError> {
        let recorded = end_sync_run(
            &self.runs,
            run_id,
            Utc::now().timestamp(),
            pages,
            seen,
            result.is_ok(),
            result.as_ref().err().map(|e| e.to_string()),
        );
        match (recorded, result) {
            (Ok(()), _) => Ok(()),
            (Err(e), Err(_)) => {
                error!(run_id, error = %e, "failed to record end of run");
                Ok(())
            }
            (Err(e), Ok(())) => Err(e.into()),
        }
    }

    /// Maintenance: deletes local listings whose listing vanished upstream.
    ///
    /// Needs every page; any fetch failure aborts before a single delete.
    pub fn prune(&mut self, now: DateTime<Utc>) -> Result<PruneReport, SyncError> {
        let job = self.config.job_key("prune");
        let run_id = self.claim(&job, now)?;
        info!(job = %job, run_id, "prune started");

        let mut report = PruneReport::default();
        let result = self.prune_inner(&mut report);

        self.finish_run(run_id, report.pages, report.remote_listings, &result)?;

        if let Err(e) = &result {
            error!(job = %job, pages = report.pages, error = %e, "prune aborted");
        }
        result.map(|_| {
            info!(
                job = %job,
                remote = report.remote_listings,
                deleted = report.deleted.len(),
                failures = report.failures.len(),
                "prune finished"
            );
            report
        })
    }

    fn prune_inner(&mut self, report: &mut PruneReport) -> Result<(), SyncError> {
        let limit = self.config.api.page_limit;
        let language = self.config.policy.site_language.clone();
        let mut offset = 0;
        let mut remote_ids = HashSet::new();
        let mut remote_titles = HashSet::new();

        loop {
            let fetched = self.fetch_with_retry(offset, limit)?;
            let count = fetched.page.properties.len();
            report.pages += 1;

            for raw in &fetched.page.properties {
                let record = normalize(raw, self.taxonomy, &self.config.area_codes);
                if let Some(title) = record.display_title(&language) {
                    remote_titles.insert(title.to_string());
                }
                if !record.mls.is_empty() {
                    remote_ids.insert(record.mls);
                }
            }

            if !fetched.has_more || count == 0 {
                break;
            }
            offset += count;
        }

        report.remote_listings = remote_ids.len();
        if remote_ids.is_empty() {
            return Err(SyncError::UnsafePrune(
                "remote returned no listings; local listings left untouched".to_string(),
            ));
        }

        for listing in self.store.list_listings()? {
            let present = match &listing.external_id {
                Some(id) => remote_ids.contains(id),
                None => remote_titles.contains(&listing.title),
            };
            if present {
                continue;
            }

            match self.delete_with_media(listing.id) {
                Ok(()) => {
                    info!(listing_id = listing.id, external_id = ?listing.external_id, "pruned listing");
                    report.deleted.push(listing.id);
                }
                Err(e) => {
                    error!(listing_id = listing.id, error = %e, "failed to prune listing");
                    report.failures.push((listing.id, e));
                }
            }
        }
        Ok(())
    }

    fn delete_with_media(&mut self, id: ListingId) -> Result<(), StoreError> {
        self.store.begin_unit()?;
        let deleted = self.store.attached_media(id).and_then(|media| {
            for m in media {
                self.store.delete_media(m.id)?;
            }
            self.store.delete_listing(id)
        });
        match deleted {
            Ok(()) => self.store.commit_unit(),
            Err(e) => {
                if let Err(rollback) = self.store.rollback_unit() {
                    error!(listing_id = id, error = %rollback, "rollback after failed prune also failed");
                }
                Err(e)
            }
        }
    }
}

/// Creates `property_type` terms for every mapped type and subtype.
/// Subtypes are placed under their parent type's label.
pub fn seed_taxonomies<L: LocalStore>(
    store: &mut L,
    taxonomy: &TaxonomyMap,
) -> Result<usize, StoreError> {
    let mut created = 0;

    for (_, entry) in taxonomy.entries(TYPE_MAPPINGS) {
        store.ensure_term(TAX_PROPERTY_TYPE, &entry.label, None)?;
        created += 1;
    }

    for (id, entry) in taxonomy.entries(SUBTYPE_MAPPINGS) {
        let parent = entry
            .parent
            .as_deref()
            .and_then(|p| taxonomy.get(TYPE_MAPPINGS, p))
            .map(|p| p.label.as_str());
        if parent.is_none() {
            warn!(subtype = id, label = %entry.label, "subtype has no mapped parent type, seeding at top level");
        }
        store.ensure_term(TAX_PROPERTY_TYPE, &entry.label, parent)?;
        created += 1;
    }

    Ok(created)
}
