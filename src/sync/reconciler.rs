use crate::domain::images::{lowest_rank_index, media_marker, still_present};
use crate::domain::ListingRecord;
use crate::errors::StoreError;
use crate::store::{ListingFields, ListingId, LocalListing, LocalStore, MediaId, UserId};
use crate::sync::fields::{build_meta, build_terms, TAX_PROPERTY_TYPE, TAX_STATUS};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error};

/// Which image becomes the listing's featured image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeaturedImagePolicy {
    /// The first image in feed order, whatever its rank.
    #[default]
    FirstEncountered,
    /// The lowest rank; the earliest image wins ties.
    LowestRank,
}

#[derive(Debug, Clone)]
pub struct ReconcilePolicy {
    pub freshness_window: Duration,
    pub site_language: String,
    pub fallback_author_id: UserId,
    pub initial_status: String,
    pub featured_image: FeaturedImagePolicy,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            freshness_window: Duration::days(5),
            site_language: "en".to_string(),
            fallback_author_id: 1,
            initial_status: "en-vente".to_string(),
            featured_image: FeaturedImagePolicy::FirstEncountered,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStep {
    Lookup,
    Begin,
    ResolveAuthor,
    CreateListing,
    UpdateListing,
    SetStatus,
    DetachImages,
    AttachImages,
    FeaturedImage,
    Metadata,
    Terms,
    Commit,
}

impl fmt::Display for ReconcileStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReconcileStep::Lookup => "lookup",
            ReconcileStep::Begin => "begin",
            ReconcileStep::ResolveAuthor => "resolve author",
            ReconcileStep::CreateListing => "create listing",
            ReconcileStep::UpdateListing => "update listing",
            ReconcileStep::SetStatus => "set status",
            ReconcileStep::DetachImages => "detach removed images",
            ReconcileStep::AttachImages => "attach images",
            ReconcileStep::FeaturedImage => "set featured image",
            ReconcileStep::Metadata => "write metadata",
            ReconcileStep::Terms => "write taxonomy terms",
            ReconcileStep::Commit => "commit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("listing {mls}: {step} failed: {source}")]
pub struct ReconcileError {
    pub mls: String,
    pub step: ReconcileStep,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Existing listing and the remote snapshot is older than the freshness window.
    Stale,
    MissingTitle,
    MissingExternalId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created(ListingId),
    Updated(ListingId),
    Skipped(SkipReason),
}

/// Decides create / update / skip for one record and applies it to the store.
pub struct Reconciler<'a> {
    policy: &'a ReconcilePolicy,
}

type StepResult<T> = Result<T, (ReconcileStep, StoreError)>;

trait AtStep<T> {
    fn at(self, step: ReconcileStep) -> StepResult<T>;
}

impl<T> AtStep<T> for Result<T, StoreError> {
    fn at(self, step: ReconcileStep) -> StepResult<T> {
        self.map_err(|e| (step, e))
    }
}

impl<'a> Reconciler<'a> {
    pub fn new(policy: &'a ReconcilePolicy) -> Self {
        Self { policy }
    }

    pub fn reconcile<S: LocalStore>(
        &self,
        store: &mut S,
        record: &ListingRecord,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let fail = |(step, source): (ReconcileStep, StoreError)| ReconcileError {
            mls: record.mls.clone(),
            step,
            source,
        };

        if record.mls.trim().is_empty() {
            return Ok(ReconcileOutcome::Skipped(SkipReason::MissingExternalId));
        }
        let Some(title) = record.display_title(&self.policy.site_language) else {
            return Ok(ReconcileOutcome::Skipped(SkipReason::MissingTitle));
        };

        let existing = self
            .find_existing(store, &record.mls, title)
            .at(ReconcileStep::Lookup)
            .map_err(fail)?;

        if existing.is_some() && self.is_stale(record, now) {
            debug!(mls = %record.mls, "remote snapshot older than freshness window, skipping");
            return Ok(ReconcileOutcome::Skipped(SkipReason::Stale));
        }

        store.begin_unit().at(ReconcileStep::Begin).map_err(fail)?;

        let applied = self
            .apply(store, record, title, existing.as_ref(), now)
            .and_then(|outcome| store.commit_unit().at(ReconcileStep::Commit).map(|_| outcome));

        match applied {
            Ok(outcome) => Ok(outcome),
            Err(failure) => {
                if let Err(e) = store.rollback_unit() {
                    error!(mls = %record.mls, error = %e, "rollback after failed reconcile also failed");
                }
                Err(fail(failure))
            }
        }
    }

    /// Missing or unparseable timestamps count as stale.
    pub fn is_stale(&self, record: &ListingRecord, now: DateTime<Utc>) -> bool {
        match record.last_modified {
            Some(modified) => modified <= now - self.policy.freshness_window,
            None => true,
        }
    }

    /// External id first; title only for listings that predate external ids.
    fn find_existing<S: LocalStore>(
        &self,
        store: &S,
        mls: &str,
        title: &str,
    ) -> Result<Option<LocalListing>, StoreError> {
        if let Some(listing) = store.find_listing_by_external_id(mls)? {
            return Ok(Some(listing));
        }
        Ok(store
            .find_listing_by_title(title)?
            .filter(|l| l.external_id.is_none()))
    }

    fn apply<S: LocalStore>(
        &self,
        store: &mut S,
        record: &ListingRecord,
        title: &str,
        existing: Option<&LocalListing>,
        now: DateTime<Utc>,
    ) -> StepResult<ReconcileOutcome> {
        let author_id = match record.agent.email.as_deref() {
            Some(email) => store
                .find_user_by_email(email)
                .at(ReconcileStep::ResolveAuthor)?
                .unwrap_or(self.policy.fallback_author_id),
            None => self.policy.fallback_author_id,
        };

        let fields = ListingFields {
            title: title.to_string(),
            body: record
                .display_body(&self.policy.site_language)
                .unwrap_or_default()
                .to_string(),
            author_id,
            external_id: record.mls.clone(),
            synced_at: now,
        };

        let (listing_id, outcome) = match existing {
            None => {
                let id = store
                    .create_listing(&fields)
                    .at(ReconcileStep::CreateListing)?;
                store
                    .set_taxonomy_terms(id, TAX_STATUS, &[self.policy.initial_status.clone()])
                    .at(ReconcileStep::SetStatus)?;
                (id, ReconcileOutcome::Created(id))
            }
            Some(listing) => {
                store
                    .update_listing(listing.id, &fields)
                    .at(ReconcileStep::UpdateListing)?;
                (listing.id, ReconcileOutcome::Updated(listing.id))
            }
        };

        let positions = self.reconcile_images(store, listing_id, title, record)?;

        store
            .set_listing_meta(listing_id, &build_meta(record, &positions))
            .at(ReconcileStep::Metadata)?;

        let property_type = self
            .resolve_property_type(store, record)
            .at(ReconcileStep::Terms)?;
        let assigned = match property_type {
            Some((name, parent)) => store.assign_term(listing_id, TAX_PROPERTY_TYPE, name, parent),
            None => store.set_taxonomy_terms(listing_id, TAX_PROPERTY_TYPE, &[]),
        };
        assigned.at(ReconcileStep::Terms)?;
        for (taxonomy, values) in build_terms(record) {
            store
                .set_taxonomy_terms(listing_id, taxonomy, &values)
                .at(ReconcileStep::Terms)?;
        }

        Ok(outcome)
    }

    /// Drops media no longer in the feed, attaches the rest, picks the
    /// featured image. Returns rank -> media id.
    fn reconcile_images<S: LocalStore>(
        &self,
        store: &mut S,
        listing_id: ListingId,
        title: &str,
        record: &ListingRecord,
    ) -> StepResult<BTreeMap<i64, MediaId>> {
        let attached = store
            .attached_media(listing_id)
            .at(ReconcileStep::DetachImages)?;
        for media in attached {
            if !still_present(&media.marker, &media.source_url, &record.images) {
                debug!(media_id = media.id, listing_id, "deleting media no longer in feed");
                store
                    .delete_media(media.id)
                    .at(ReconcileStep::DetachImages)?;
            }
        }

        let featured_idx = match self.policy.featured_image {
            FeaturedImagePolicy::FirstEncountered => (!record.images.is_empty()).then_some(0),
            FeaturedImagePolicy::LowestRank => lowest_rank_index(&record.images),
        };

        let mut positions = BTreeMap::new();
        let mut featured = None;
        for (idx, image) in record.images.iter().enumerate() {
            let marker = media_marker(&image.id);
            let media = match store
                .find_media_by_marker(&marker)
                .at(ReconcileStep::AttachImages)?
            {
                Some(media) => media,
                None => store
                    .upload_media_from_url(&image.url, listing_id)
                    .at(ReconcileStep::AttachImages)?,
            };
            // Reused media follows the listing's current title.
            store
                .stamp_media(media.id, title, &marker)
                .at(ReconcileStep::AttachImages)?;

            positions.insert(image.rank, media.id);
            if Some(idx) == featured_idx {
                featured = Some(media.id);
            }
        }

        if let Some(media_id) = featured {
            store
                .set_featured_media(listing_id, media_id)
                .at(ReconcileStep::FeaturedImage)?;
        }

        Ok(positions)
    }

    /// Subtype (with its type as parent) when it exists under the type's
    /// term, else the bare type.
    fn resolve_property_type<'r, S: LocalStore>(
        &self,
        store: &S,
        record: &'r ListingRecord,
    ) -> Result<Option<(&'r str, Option<&'r str>)>, StoreError> {
        let kind = record.property_type.trim();
        let subtype = record.property_subtype.trim();

        if kind.is_empty() {
            return Ok(None);
        }
        if !subtype.is_empty() && store.term_exists(TAX_PROPERTY_TYPE, subtype, Some(kind))? {
            return Ok(Some((subtype, Some(kind))));
        }
        Ok(Some((kind, None)))
    }
}
