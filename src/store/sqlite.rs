use crate::errors::StoreError;
use crate::store::connection::Database;
use crate::store::media::MediaDownloader;
use crate::store::{
    ListingFields, ListingId, LocalListing, LocalStore, Media, MediaId, UserId,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const UNIT_SAVEPOINT: &str = "listing_unit";

/// Files touched inside an open unit of work. Written files are removed on
/// rollback; files of deleted media are only removed on commit.
#[derive(Default)]
struct UnitFiles {
    written: Vec<PathBuf>,
    doomed: Vec<PathBuf>,
}

/// `LocalStore` backed by SQLite, with media files kept under `media_dir`.
pub struct SqliteStore {
    db: Database,
    downloader: Box<dyn MediaDownloader>,
    media_dir: PathBuf,
    unit: Option<UnitFiles>,
}

impl SqliteStore {
    pub fn new(
        db: Database,
        downloader: Box<dyn MediaDownloader>,
        media_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            db,
            downloader,
            media_dir: media_dir.into(),
            unit: None,
        }
    }

    pub fn create_user(&self, email: &str, display_name: &str) -> Result<UserId, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (email, display_name) VALUES (?1, ?2)",
                params![email, display_name],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn listing_meta(&self, id: ListingId) -> Result<BTreeMap<String, String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT meta_key, meta_value FROM listing_meta WHERE listing_id = ?1",
            )?;
            let rows = stmt.query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))?;

            let mut out = BTreeMap::new();
            for r in rows {
                let (k, v) = r?;
                out.insert(k, v);
            }
            Ok(out)
        })
    }

    pub fn listing_terms(&self, id: ListingId, taxonomy: &str) -> Result<Vec<String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT t.name
                FROM listing_terms lt
                JOIN terms t ON t.id = lt.term_id
                WHERE lt.listing_id = ?1 AND lt.taxonomy = ?2
                ORDER BY lt.position
                "#,
            )?;
            let rows = stmt.query_map(params![id, taxonomy], |row| row.get(0))?;

            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
    }

    /// Assigned terms in `taxonomy` with the name of each term's parent.
    pub fn listing_term_parents(
        &self,
        id: ListingId,
        taxonomy: &str,
    ) -> Result<Vec<(String, Option<String>)>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT t.name, p.name
                FROM listing_terms lt
                JOIN terms t ON t.id = lt.term_id
                LEFT JOIN terms p ON p.id = t.parent_id
                WHERE lt.listing_id = ?1 AND lt.taxonomy = ?2
                ORDER BY lt.position
                "#,
            )?;
            let rows = stmt.query_map(params![id, taxonomy], |row| {
                Ok((row.get(0)?, row.get::<_, Option<String>>(1)?))
            })?;

            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
    }

    pub fn featured_media(&self, id: ListingId) -> Result<Option<MediaId>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT featured_media_id FROM listings WHERE id = ?1",
                params![id],
                |row| row.get::<_, Option<MediaId>>(0),
            )
            .optional()
            .map(Option::flatten)
            .map_err(StoreError::from)
        })
    }

    pub fn media_file(&self, id: MediaId) -> Result<Option<PathBuf>, StoreError> {
        self.db.with_conn(|conn| {
            let path: Option<String> = conn
                .query_row(
                    "SELECT file_path FROM media WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(path.filter(|p| !p.is_empty()).map(PathBuf::from))
        })
    }

    fn remove_file(path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed media file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "could not remove media file"),
        }
    }
}

fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<LocalListing> {
    Ok(LocalListing {
        id: row.get(0)?,
        title: row.get(1)?,
        external_id: row.get(2)?,
        last_synced_at: row.get(3)?,
    })
}

fn media_from_row(row: &Row<'_>) -> rusqlite::Result<Media> {
    Ok(Media {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        marker: row.get(3)?,
        source_url: row.get(4)?,
    })
}

const LISTING_COLUMNS: &str = "id, title, external_id, last_synced_at";
const MEDIA_COLUMNS: &str = "id, owner_id, title, marker, source_url";

fn nullable(value: &str) -> Option<&str> {
    Some(value).filter(|v| !v.trim().is_empty())
}

fn find_term(
    conn: &Connection,
    taxonomy: &str,
    name: &str,
    parent_id: Option<i64>,
) -> rusqlite::Result<Option<i64>> {
    match parent_id {
        Some(parent_id) => conn
            .query_row(
                "SELECT id FROM terms WHERE taxonomy = ?1 AND name = ?2 AND parent_id = ?3",
                params![taxonomy, name, parent_id],
                |row| row.get(0),
            )
            .optional(),
        None => conn
            .query_row(
                "SELECT id FROM terms WHERE taxonomy = ?1 AND name = ?2 ORDER BY parent_id, id LIMIT 1",
                params![taxonomy, name],
                |row| row.get(0),
            )
            .optional(),
    }
}

fn insert_term(
    conn: &Connection,
    taxonomy: &str,
    name: &str,
    parent_id: i64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO terms (taxonomy, name, parent_id) VALUES (?1, ?2, ?3)",
        params![taxonomy, name, parent_id],
    )?;
    conn.query_row(
        "SELECT id FROM terms WHERE taxonomy = ?1 AND name = ?2 AND parent_id = ?3",
        params![taxonomy, name, parent_id],
        |row| row.get(0),
    )
}

/// Id of `name` under the top-level term `parent` (or at the top level),
/// inserting the parent and the term when missing.
fn resolve_term(
    conn: &Connection,
    taxonomy: &str,
    name: &str,
    parent: Option<&str>,
) -> rusqlite::Result<i64> {
    let parent_id = match parent {
        Some(parent) => match find_term(conn, taxonomy, parent, Some(0))? {
            Some(parent_id) => parent_id,
            None => insert_term(conn, taxonomy, parent, 0)?,
        },
        None => 0,
    };
    match find_term(conn, taxonomy, name, Some(parent_id))? {
        Some(term_id) => Ok(term_id),
        None => insert_term(conn, taxonomy, name, parent_id),
    }
}

/// Safe on-disk name from the last URL segment.
fn stored_file_name(media_id: MediaId, url: &str) -> String {
    let segment = url::Url::parse(url)
        .ok()
        .and_then(|u| u.path_segments().and_then(|s| s.last().map(str::to_string)))
        .unwrap_or_default();
    let clean: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let clean = clean.trim_matches('.');
    if clean.is_empty() {
        format!("{media_id}-image")
    } else {
        format!("{media_id}-{clean}")
    }
}

impl LocalStore for SqliteStore {
    fn find_listing_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<LocalListing>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {LISTING_COLUMNS} FROM listings WHERE external_id = ?1"),
                params![external_id],
                listing_from_row,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    fn find_listing_by_title(&self, title: &str) -> Result<Option<LocalListing>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {LISTING_COLUMNS} FROM listings WHERE title = ?1 ORDER BY id LIMIT 1"
                ),
                params![title],
                listing_from_row,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    fn list_listings(&self) -> Result<Vec<LocalListing>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {LISTING_COLUMNS} FROM listings ORDER BY id"))?;
            let rows = stmt.query_map([], listing_from_row)?;

            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
    }

    fn create_listing(&mut self, fields: &ListingFields) -> Result<ListingId, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO listings (title, body, author_id, external_id, created_at, last_synced_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    fields.title,
                    fields.body,
                    fields.author_id,
                    nullable(&fields.external_id),
                    Utc::now(),
                    fields.synced_at,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn update_listing(&mut self, id: ListingId, fields: &ListingFields) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                r#"
                UPDATE listings SET
                    title = ?1, body = ?2, author_id = ?3, external_id = ?4, last_synced_at = ?5
                WHERE id = ?6
                "#,
                params![
                    fields.title,
                    fields.body,
                    fields.author_id,
                    nullable(&fields.external_id),
                    fields.synced_at,
                    id,
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("listing {id}")));
            }
            Ok(())
        })
    }

    fn delete_listing(&mut self, id: ListingId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM listings WHERE id = ?1", params![id])?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("listing {id}")));
            }
            Ok(())
        })
    }

    fn set_listing_meta(
        &mut self,
        id: ListingId,
        meta: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let sp = conn.savepoint()?;
            sp.execute("DELETE FROM listing_meta WHERE listing_id = ?1", params![id])?;
            {
                let mut stmt = sp.prepare(
                    "INSERT INTO listing_meta (listing_id, meta_key, meta_value) VALUES (?1, ?2, ?3)",
                )?;
                for (key, value) in meta {
                    stmt.execute(params![id, key, value])?;
                }
            }
            sp.commit()?;
            Ok(())
        })
    }

    fn set_taxonomy_terms(
        &mut self,
        id: ListingId,
        taxonomy: &str,
        values: &[String],
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let sp = conn.savepoint()?;
            sp.execute(
                "DELETE FROM listing_terms WHERE listing_id = ?1 AND taxonomy = ?2",
                params![id, taxonomy],
            )?;
            for (position, value) in values.iter().enumerate() {
                let name = value.trim();
                if name.is_empty() {
                    continue;
                }
                let term_id = match find_term(&sp, taxonomy, name, None)? {
                    Some(term_id) => term_id,
                    None => insert_term(&sp, taxonomy, name, 0)?,
                };
                sp.execute(
                    r#"
                    INSERT OR IGNORE INTO listing_terms (listing_id, taxonomy, term_id, position)
                    VALUES (?1, ?2, ?3, ?4)
                    "#,
                    params![id, taxonomy, term_id, position as i64],
                )?;
            }
            sp.commit()?;
            Ok(())
        })
    }

    fn assign_term(
        &mut self,
        id: ListingId,
        taxonomy: &str,
        name: &str,
        parent: Option<&str>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let sp = conn.savepoint()?;
            sp.execute(
                "DELETE FROM listing_terms WHERE listing_id = ?1 AND taxonomy = ?2",
                params![id, taxonomy],
            )?;
            let term_id = resolve_term(&sp, taxonomy, name.trim(), parent.map(str::trim))?;
            sp.execute(
                r#"
                INSERT INTO listing_terms (listing_id, taxonomy, term_id, position)
                VALUES (?1, ?2, ?3, 0)
                "#,
                params![id, taxonomy, term_id],
            )?;
            sp.commit()?;
            Ok(())
        })
    }

    fn term_exists(
        &self,
        taxonomy: &str,
        name: &str,
        parent: Option<&str>,
    ) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let exists: bool = match parent {
                None => conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM terms WHERE taxonomy = ?1 AND name = ?2)",
                    params![taxonomy, name],
                    |row| row.get(0),
                )?,
                Some(parent) => conn.query_row(
                    r#"
                    SELECT EXISTS(
                        SELECT 1
                        FROM terms c
                        JOIN terms p ON p.id = c.parent_id
                        WHERE c.taxonomy = ?1 AND c.name = ?2
                          AND p.taxonomy = ?1 AND p.name = ?3
                    )
                    "#,
                    params![taxonomy, name, parent],
                    |row| row.get(0),
                )?,
            };
            Ok(exists)
        })
    }

    fn ensure_term(
        &mut self,
        taxonomy: &str,
        name: &str,
        parent: Option<&str>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let sp = conn.savepoint()?;
            resolve_term(&sp, taxonomy, name, parent)?;
            sp.commit()?;
            Ok(())
        })
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<UserId>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id FROM users WHERE email = ?1",
                params![email.trim()],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    fn attached_media(&self, listing: ListingId) -> Result<Vec<Media>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MEDIA_COLUMNS} FROM media WHERE owner_id = ?1 ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![listing], media_from_row)?;

            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
    }

    fn find_media_by_marker(&self, marker: &str) -> Result<Option<Media>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {MEDIA_COLUMNS} FROM media WHERE marker = ?1 ORDER BY id LIMIT 1"),
                params![marker],
                media_from_row,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    fn upload_media_from_url(
        &mut self,
        url: &str,
        owner: ListingId,
    ) -> Result<Media, StoreError> {
        let bytes = self.downloader.download(url)?;
        fs::create_dir_all(&self.media_dir)?;

        let id = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO media (owner_id, source_url, created_at) VALUES (?1, ?2, ?3)",
                params![owner, url, Utc::now()],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        let path = self.media_dir.join(stored_file_name(id, url));
        if let Err(e) = fs::write(&path, &bytes) {
            self.db.with_conn(|conn| {
                conn.execute("DELETE FROM media WHERE id = ?1", params![id])?;
                Ok(())
            })?;
            return Err(e.into());
        }
        if let Some(unit) = self.unit.as_mut() {
            unit.written.push(path.clone());
        }

        let file_path = path.to_string_lossy().to_string();
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE media SET file_path = ?1 WHERE id = ?2",
                params![file_path, id],
            )?;
            Ok(())
        })?;

        debug!(media_id = id, url, path = %path.display(), "uploaded media");
        Ok(Media {
            id,
            owner_id: Some(owner),
            title: String::new(),
            marker: String::new(),
            source_url: url.to_string(),
        })
    }

    fn stamp_media(&mut self, id: MediaId, title: &str, marker: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE media SET title = ?1, marker = ?2 WHERE id = ?3",
                params![title, marker, id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("media {id}")));
            }
            Ok(())
        })
    }

    fn delete_media(&mut self, id: MediaId) -> Result<(), StoreError> {
        let file = self.media_file(id)?;
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM media WHERE id = ?1", params![id])?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("media {id}")));
            }
            Ok(())
        })?;

        if let Some(path) = file {
            match self.unit.as_mut() {
                Some(unit) => unit.doomed.push(path),
                None => Self::remove_file(&path),
            }
        }
        Ok(())
    }

    fn set_featured_media(
        &mut self,
        listing: ListingId,
        media: MediaId,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE listings SET featured_media_id = ?1 WHERE id = ?2",
                params![media, listing],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("listing {listing}")));
            }
            Ok(())
        })
    }

    fn begin_unit(&mut self) -> Result<(), StoreError> {
        if self.unit.is_some() {
            return Err(StoreError::Db("unit of work already open".into()));
        }
        self.db
            .with_conn(|conn| Ok(conn.execute_batch(&format!("SAVEPOINT {UNIT_SAVEPOINT}"))?))?;
        self.unit = Some(UnitFiles::default());
        Ok(())
    }

    fn commit_unit(&mut self) -> Result<(), StoreError> {
        self.db
            .with_conn(|conn| Ok(conn.execute_batch(&format!("RELEASE {UNIT_SAVEPOINT}"))?))?;
        if let Some(unit) = self.unit.take() {
            for path in &unit.doomed {
                Self::remove_file(path);
            }
        }
        Ok(())
    }

    fn rollback_unit(&mut self) -> Result<(), StoreError> {
        let unit = self.unit.take();
        self.db.with_conn(|conn| {
            Ok(conn.execute_batch(&format!(
                "ROLLBACK TO {UNIT_SAVEPOINT}; RELEASE {UNIT_SAVEPOINT}"
            ))?)
        })?;
        if let Some(unit) = unit {
            for path in &unit.written {
                Self::remove_file(path);
            }
        }
        Ok(())
    }
}
