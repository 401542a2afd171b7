// src/tests/utils.rs
use crate::apimo::{FetchedPage, ListingPage, ListingSource, RawListing, TransportError};
use crate::config::SyncConfig;
use crate::domain::{normalize, AreaCodes, ListingRecord, TaxonomyMap};
use crate::errors::StoreError;
use crate::store::{
    init_db, Database, ListingFields, ListingId, LocalListing, LocalStore, Media, MediaDownloader,
    MediaId, UserId,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration as StdDuration;

/// Fixed "now" for every sync test: 2024-06-10 12:00:00 UTC.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
}

/// Timestamp `days` before `now()`, in the API's "YYYY-MM-DD HH:MM:SS" form.
pub fn days_ago(days: i64) -> String {
    (now() - Duration::days(days))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Fresh in-memory database with the schema applied. Each test thread gets its own.
pub fn init_test_db() -> Database {
    let db = Database::in_memory();
    init_db(&db).unwrap_or_else(|e| panic!("Database initialization failed: {e}"));
    db
}

/// Config with credentials set and retries that never sleep.
pub fn test_config() -> SyncConfig {
    let mut config = SyncConfig::from_lookup(|key: &str| match key {
        "APIMO_PROVIDER" => Some("4242".to_string()),
        "APIMO_TOKEN" => Some("secret".to_string()),
        "APIMO_AGENCY" => Some("17".to_string()),
        _ => None,
    })
    .expect("test config");
    config.retry_backoff = StdDuration::ZERO;
    config.api.page_limit = 2;
    config
}

/// A raw listing with one English title, fresh by default.
pub fn raw_listing(id: &str, title: &str) -> RawListing {
    raw_from(json!({
        "id": id,
        "updated_at": days_ago(1),
        "address": "12 rue des Lilas",
        "price": { "value": 250000 },
        "area": { "value": "84,5" },
        "latitude": 43.7, "longitude": 7.26,
        "type": "1", "subtype": "5",
        "rooms": 4, "bedrooms": 3,
        "city": { "name": "Nice", "zipcode": "06000" },
        "country": "FR",
        "comments": [{ "language": "en", "title": title, "comment": "Bright flat." }],
        "areas": [{ "type": 1, "number": 2 }, { "type": 8, "number": 1 }],
        "user": { "firstname": "Ana", "lastname": "Costa", "email": "ana@agency.test" }
    }))
}

pub fn raw_from(value: Value) -> RawListing {
    serde_json::from_value(value).expect("raw listing json")
}

pub fn with_pictures(mut raw: RawListing, pictures: &[(&str, &str, i64)]) -> RawListing {
    raw.pictures = pictures
        .iter()
        .map(|(id, url, rank)| {
            serde_json::from_value(json!({ "id": id, "url": url, "rank": rank }))
                .expect("picture json")
        })
        .collect();
    raw
}

pub fn with_updated_at(mut raw: RawListing, updated_at: Option<String>) -> RawListing {
    raw.updated_at = updated_at;
    raw
}

pub fn test_taxonomy() -> TaxonomyMap {
    let mut taxonomy = TaxonomyMap::default();
    taxonomy.insert("type_mappings", "1", "Apartment", None);
    taxonomy.insert("type_mappings", "2", "House", None);
    taxonomy.insert("subtype_mappings", "5", "Penthouse", Some("1"));
    taxonomy.insert("subtype_mappings", "9", "Villa", Some("2"));
    taxonomy
}

pub fn record(raw: &RawListing) -> ListingRecord {
    normalize(raw, &test_taxonomy(), &AreaCodes::default())
}

pub fn page(listings: Vec<RawListing>, total: Option<u64>, has_more: bool) -> FetchedPage {
    FetchedPage {
        page: ListingPage {
            properties: listings,
            total_items: total,
        },
        has_more,
    }
}

/// Hands out pre-scripted pages in order and records every request.
/// Once the script runs out it answers with an empty last page.
#[derive(Default)]
pub struct ScriptedSource {
    script: RefCell<VecDeque<Result<FetchedPage, TransportError>>>,
    pub requests: RefCell<Vec<(usize, usize)>>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<FetchedPage, TransportError>>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            requests: RefCell::new(Vec::new()),
        }
    }
}

impl ListingSource for &ScriptedSource {
    fn fetch_page(&self, offset: usize, limit: usize) -> Result<FetchedPage, TransportError> {
        self.requests.borrow_mut().push((offset, limit));
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(FetchedPage::default()))
    }
}

/// Serves a small fixed body for any url, or fails for urls listed in `broken`.
#[derive(Default)]
pub struct StubDownloader {
    pub broken: Vec<String>,
}

impl MediaDownloader for StubDownloader {
    fn download(&self, url: &str) -> Result<Vec<u8>, StoreError> {
        if self.broken.iter().any(|b| b == url) {
            return Err(StoreError::Download {
                url: url.to_string(),
                message: "HTTP 404 Not Found".to_string(),
            });
        }
        Ok(format!("image:{url}").into_bytes())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StoreState {
    pub listings: BTreeMap<ListingId, ListingFields>,
    pub meta: BTreeMap<ListingId, BTreeMap<String, String>>,
    pub terms: BTreeMap<(ListingId, String), Vec<String>>,
    /// Parent name of a term set through `assign_term`.
    pub term_parents: BTreeMap<(ListingId, String), String>,
    /// (taxonomy, name, parent name)
    pub term_defs: Vec<(String, String, Option<String>)>,
    pub media: BTreeMap<MediaId, Media>,
    pub featured: BTreeMap<ListingId, MediaId>,
    pub users: BTreeMap<String, UserId>,
    next_listing: ListingId,
    next_media: MediaId,
}

/// In-memory `LocalStore` that counts writes and can be told to fail one operation.
/// Units of work snapshot the state and restore it on rollback.
#[derive(Default)]
pub struct RecordingStore {
    pub state: StoreState,
    snapshot: Option<StoreState>,
    pub writes: usize,
    pub uploads: Vec<String>,
    pub rollbacks: usize,
    pub fail_on: Option<&'static str>,
}

impl RecordingStore {
    pub fn new() -> Self {
        let mut store = Self::default();
        store.state.next_listing = 1;
        store.state.next_media = 100;
        store
    }

    pub fn with_user(mut self, email: &str, id: UserId) -> Self {
        self.state.users.insert(email.to_string(), id);
        self
    }

    /// Inserts a listing directly, bypassing write counting.
    pub fn seed_listing(&mut self, title: &str, external_id: Option<&str>) -> ListingId {
        let id = self.state.next_listing;
        self.state.next_listing += 1;
        self.state.listings.insert(
            id,
            ListingFields {
                title: title.to_string(),
                body: String::new(),
                author_id: 1,
                external_id: external_id.unwrap_or_default().to_string(),
                synced_at: now() - Duration::days(30),
            },
        );
        id
    }

    pub fn terms_of(&self, id: ListingId, taxonomy: &str) -> Vec<String> {
        self.state
            .terms
            .get(&(id, taxonomy.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn term_parent_of(&self, id: ListingId, taxonomy: &str) -> Option<&str> {
        self.state
            .term_parents
            .get(&(id, taxonomy.to_string()))
            .map(String::as_str)
    }

    pub fn media_of(&self, id: ListingId) -> Vec<&Media> {
        self.state
            .media
            .values()
            .filter(|m| m.owner_id == Some(id))
            .collect()
    }

    fn check(&self, op: &'static str) -> Result<(), StoreError> {
        match self.fail_on {
            Some(failing) if failing == op => Err(StoreError::Db(format!("injected failure in {op}"))),
            _ => Ok(()),
        }
    }

    fn write(&mut self, op: &'static str) -> Result<(), StoreError> {
        self.check(op)?;
        self.writes += 1;
        Ok(())
    }

    fn local(id: ListingId, fields: &ListingFields) -> LocalListing {
        LocalListing {
            id,
            title: fields.title.clone(),
            external_id: Some(fields.external_id.clone()).filter(|e| !e.is_empty()),
            last_synced_at: Some(fields.synced_at),
        }
    }

    fn missing(what: &str) -> StoreError {
        StoreError::NotFound(what.to_string())
    }
}

impl LocalStore for RecordingStore {
    fn find_listing_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<LocalListing>, StoreError> {
        self.check("find_listing_by_external_id")?;
        Ok(self
            .state
            .listings
            .iter()
            .find(|(_, f)| !f.external_id.is_empty() && f.external_id == external_id)
            .map(|(id, f)| Self::local(*id, f)))
    }

    fn find_listing_by_title(&self, title: &str) -> Result<Option<LocalListing>, StoreError> {
        self.check("find_listing_by_title")?;
        Ok(self
            .state
            .listings
            .iter()
            .find(|(_, f)| f.title == title)
            .map(|(id, f)| Self::local(*id, f)))
    }

    fn list_listings(&self) -> Result<Vec<LocalListing>, StoreError> {
        self.check("list_listings")?;
        Ok(self
            .state
            .listings
            .iter()
            .map(|(id, f)| Self::local(*id, f))
            .collect())
    }

    fn create_listing(&mut self, fields: &ListingFields) -> Result<ListingId, StoreError> {
        self.write("create_listing")?;
        let id = self.state.next_listing;
        self.state.next_listing += 1;
        self.state.listings.insert(id, fields.clone());
        Ok(id)
    }

    fn update_listing(&mut self, id: ListingId, fields: &ListingFields) -> Result<(), StoreError> {
        self.write("update_listing")?;
        match self.state.listings.get_mut(&id) {
            Some(existing) => {
                *existing = fields.clone();
                Ok(())
            }
            None => Err(Self::missing("listing")),
        }
    }

    fn delete_listing(&mut self, id: ListingId) -> Result<(), StoreError> {
        self.write("delete_listing")?;
        self.state
            .listings
            .remove(&id)
            .ok_or_else(|| Self::missing("listing"))?;
        self.state.meta.remove(&id);
        self.state.terms.retain(|(listing, _), _| *listing != id);
        self.state.term_parents.retain(|(listing, _), _| *listing != id);
        self.state.featured.remove(&id);
        Ok(())
    }

    fn set_listing_meta(
        &mut self,
        id: ListingId,
        meta: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        self.write("set_listing_meta")?;
        self.state.meta.insert(id, meta.clone());
        Ok(())
    }

    fn set_taxonomy_terms(
        &mut self,
        id: ListingId,
        taxonomy: &str,
        values: &[String],
    ) -> Result<(), StoreError> {
        self.write("set_taxonomy_terms")?;
        let key = (id, taxonomy.to_string());
        self.state.term_parents.remove(&key);
        self.state.terms.insert(key, values.to_vec());
        Ok(())
    }

    fn assign_term(
        &mut self,
        id: ListingId,
        taxonomy: &str,
        name: &str,
        parent: Option<&str>,
    ) -> Result<(), StoreError> {
        self.write("assign_term")?;
        let key = (id, taxonomy.to_string());
        match parent {
            Some(parent) => self.state.term_parents.insert(key.clone(), parent.to_string()),
            None => self.state.term_parents.remove(&key),
        };
        self.state.terms.insert(key, vec![name.to_string()]);
        Ok(())
    }

    fn term_exists(
        &self,
        taxonomy: &str,
        name: &str,
        parent: Option<&str>,
    ) -> Result<bool, StoreError> {
        self.check("term_exists")?;
        Ok(self.state.term_defs.iter().any(|(t, n, p)| {
            t == taxonomy && n == name && (parent.is_none() || p.as_deref() == parent)
        }))
    }

    fn ensure_term(
        &mut self,
        taxonomy: &str,
        name: &str,
        parent: Option<&str>,
    ) -> Result<(), StoreError> {
        self.write("ensure_term")?;
        let def = (
            taxonomy.to_string(),
            name.to_string(),
            parent.map(str::to_string),
        );
        if !self.state.term_defs.contains(&def) {
            self.state.term_defs.push(def);
        }
        Ok(())
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<UserId>, StoreError> {
        self.check("find_user_by_email")?;
        Ok(self.state.users.get(email).copied())
    }

    fn attached_media(&self, listing: ListingId) -> Result<Vec<Media>, StoreError> {
        self.check("attached_media")?;
        Ok(self.media_of(listing).into_iter().cloned().collect())
    }

    fn find_media_by_marker(&self, marker: &str) -> Result<Option<Media>, StoreError> {
        self.check("find_media_by_marker")?;
        Ok(self
            .state
            .media
            .values()
            .find(|m| m.marker == marker)
            .cloned())
    }

    fn upload_media_from_url(&mut self, url: &str, owner: ListingId) -> Result<Media, StoreError> {
        self.write("upload_media_from_url")?;
        let media = Media {
            id: self.state.next_media,
            owner_id: Some(owner),
            title: String::new(),
            marker: String::new(),
            source_url: url.to_string(),
        };
        self.state.next_media += 1;
        self.state.media.insert(media.id, media.clone());
        self.uploads.push(url.to_string());
        Ok(media)
    }

    fn stamp_media(&mut self, id: MediaId, title: &str, marker: &str) -> Result<(), StoreError> {
        self.write("stamp_media")?;
        let media = self
            .state
            .media
            .get_mut(&id)
            .ok_or_else(|| Self::missing("media"))?;
        media.title = title.to_string();
        media.marker = marker.to_string();
        Ok(())
    }

    fn delete_media(&mut self, id: MediaId) -> Result<(), StoreError> {
        self.write("delete_media")?;
        self.state
            .media
            .remove(&id)
            .ok_or_else(|| Self::missing("media"))?;
        self.state.featured.retain(|_, m| *m != id);
        Ok(())
    }

    fn set_featured_media(&mut self, listing: ListingId, media: MediaId) -> Result<(), StoreError> {
        self.write("set_featured_media")?;
        self.state.featured.insert(listing, media);
        Ok(())
    }

    fn begin_unit(&mut self) -> Result<(), StoreError> {
        self.snapshot = Some(self.state.clone());
        Ok(())
    }

    fn commit_unit(&mut self) -> Result<(), StoreError> {
        self.check("commit_unit")?;
        self.snapshot = None;
        Ok(())
    }

    fn rollback_unit(&mut self) -> Result<(), StoreError> {
        if let Some(snapshot) = self.snapshot.take() {
            self.state = snapshot;
        }
        self.rollbacks += 1;
        Ok(())
    }
}
