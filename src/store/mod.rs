pub mod connection;
pub mod media;
pub mod sqlite;
pub mod sync_runs;

pub use connection::{init_db, Database};
pub use media::{HttpDownloader, MediaDownloader};
pub use sqlite::SqliteStore;

use crate::errors::StoreError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub type ListingId = i64;
pub type MediaId = i64;
pub type UserId = i64;

/// A listing as the local store knows it.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalListing {
    pub id: ListingId,
    pub title: String,
    pub external_id: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Fields written on create and overwritten on every update.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingFields {
    pub title: String,
    pub body: String,
    pub author_id: UserId,
    pub external_id: String,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Media {
    pub id: MediaId,
    pub owner_id: Option<ListingId>,
    pub title: String,
    pub marker: String,
    pub source_url: String,
}

/// The content store the reconciler writes into.
///
/// Every call is fallible. Writes for one listing are bracketed by
/// `begin_unit` / `commit_unit`; on the first failure the reconciler calls
/// `rollback_unit` and moves on to the next listing.
pub trait LocalStore {
    fn find_listing_by_external_id(&self, external_id: &str)
        -> Result<Option<LocalListing>, StoreError>;
    fn find_listing_by_title(&self, title: &str) -> Result<Option<LocalListing>, StoreError>;
    fn list_listings(&self) -> Result<Vec<LocalListing>, StoreError>;

    fn create_listing(&mut self, fields: &ListingFields) -> Result<ListingId, StoreError>;
    fn update_listing(&mut self, id: ListingId, fields: &ListingFields) -> Result<(), StoreError>;
    fn delete_listing(&mut self, id: ListingId) -> Result<(), StoreError>;

    /// Replaces every meta entry of the listing with `meta`.
    fn set_listing_meta(
        &mut self,
        id: ListingId,
        meta: &BTreeMap<String, String>,
    ) -> Result<(), StoreError>;

    /// Replaces the listing's terms in `taxonomy`; unknown names become new top-level terms.
    fn set_taxonomy_terms(
        &mut self,
        id: ListingId,
        taxonomy: &str,
        values: &[String],
    ) -> Result<(), StoreError>;
    /// Replaces the listing's terms in `taxonomy` with the one term `name`
    /// found under the top-level term `parent`, creating either when missing.
    fn assign_term(
        &mut self,
        id: ListingId,
        taxonomy: &str,
        name: &str,
        parent: Option<&str>,
    ) -> Result<(), StoreError>;
    fn term_exists(
        &self,
        taxonomy: &str,
        name: &str,
        parent: Option<&str>,
    ) -> Result<bool, StoreError>;
    fn ensure_term(
        &mut self,
        taxonomy: &str,
        name: &str,
        parent: Option<&str>,
    ) -> Result<(), StoreError>;

    fn find_user_by_email(&self, email: &str) -> Result<Option<UserId>, StoreError>;

    fn attached_media(&self, listing: ListingId) -> Result<Vec<Media>, StoreError>;
    fn find_media_by_marker(&self, marker: &str) -> Result<Option<Media>, StoreError>;
    fn upload_media_from_url(&mut self, url: &str, owner: ListingId)
        -> Result<Media, StoreError>;
    fn stamp_media(&mut self, id: MediaId, title: &str, marker: &str) -> Result<(), StoreError>;
    fn delete_media(&mut self, id: MediaId) -> Result<(), StoreError>;
    fn set_featured_media(&mut self, listing: ListingId, media: MediaId)
        -> Result<(), StoreError>;

    fn begin_unit(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
    fn commit_unit(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
    fn rollback_unit(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}
