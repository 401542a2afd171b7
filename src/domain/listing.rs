// src/domain/listing.rs

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

/// Shown instead of a number when the source has no usable price.
pub const PRICE_ON_ASK: &str = "Price on ask";

#[derive(Debug, Clone, PartialEq)]
pub enum ListingPrice {
    /// Whole currency units, digits only.
    Amount(String),
    OnRequest,
}

impl ListingPrice {
    pub fn display(&self) -> &str {
        match self {
            ListingPrice::Amount(value) => value,
            ListingPrice::OnRequest => PRICE_ON_ASK,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRef {
    pub id: String,
    pub url: String,
    pub rank: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Agent {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
}

impl Agent {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// A taxonomy id the mapping file does not know about; the raw id is used as label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingGap {
    pub category: String,
    pub id: String,
}

/// One remote listing, flattened and normalized for reconciliation.
/// Built fresh on every pass, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingRecord {
    pub mls: String,

    // Language code -> text, in the order the source sent them.
    pub titles: IndexMap<String, String>,
    pub bodies: IndexMap<String, String>,
    pub alt_title: String,

    pub price: ListingPrice,
    pub price_prefix: String,
    pub price_postfix: String,
    pub area: String,
    pub geo: String,

    pub rooms: Option<i64>,
    pub bedrooms: Option<i64>,
    pub bed_count: i64,
    pub bath_count: i64,

    pub property_type: String,
    pub property_subtype: String,

    pub city: String,
    pub zip: String,
    pub country: String,

    pub energy_global: Option<String>,
    pub energy_renewable: Option<String>,

    pub images: Vec<ImageRef>,
    pub last_modified: Option<DateTime<Utc>>,
    pub agent: Agent,

    pub mapping_gaps: Vec<MappingGap>,
}

impl ListingRecord {
    /// Title in the site language, else the last non-empty translation.
    pub fn display_title(&self, language: &str) -> Option<&str> {
        pick_translation(&self.titles, language)
    }

    pub fn display_body(&self, language: &str) -> Option<&str> {
        pick_translation(&self.bodies, language)
    }
}

fn pick_translation<'a>(texts: &'a IndexMap<String, String>, language: &str) -> Option<&'a str> {
    texts
        .get(language)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            texts
                .values()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .last()
        })
}
