// src/domain/mapper.rs

use crate::apimo::RawListing;
use crate::domain::listing::{Agent, ImageRef, ListingPrice, ListingRecord, MappingGap};
use crate::domain::taxonomy::{map_id_to_value, TaxonomyMap, SUBTYPE_MAPPINGS, TYPE_MAPPINGS};
use chrono::{DateTime, NaiveDateTime, Utc};
use indexmap::IndexMap;

const ENERGY_GLOBAL: i64 = 1;
const ENERGY_RENEWABLE: i64 = 2;

/// Area-measurement type codes that count as bedrooms / bathrooms.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaCodes {
    pub bedroom: Vec<i64>,
    pub bathroom: Vec<i64>,
}

impl Default for AreaCodes {
    fn default() -> Self {
        Self {
            bedroom: vec![1, 53, 70],
            bathroom: vec![8, 13, 41, 42],
        }
    }
}

/// Flattens a raw remote listing into a `ListingRecord`.
///
/// Pure: the same inputs always give the same record. Unknown taxonomy ids
/// never fail the record; they are kept as labels and listed in `mapping_gaps`.
pub fn normalize(raw: &RawListing, taxonomy: &TaxonomyMap, codes: &AreaCodes) -> ListingRecord {
    let mut gaps = Vec::new();
    let mut resolve = |category: &str, id: Option<&str>| -> String {
        let Some(id) = id.filter(|s| !s.is_empty()) else {
            return String::new();
        };
        let (label, mapped) = map_id_to_value(taxonomy, category, id);
        if !mapped {
            gaps.push(MappingGap {
                category: category.to_string(),
                id: id.to_string(),
            });
        }
        label
    };

    let property_type = resolve(TYPE_MAPPINGS, raw.property_type.as_deref());
    let property_subtype = resolve(SUBTYPE_MAPPINGS, raw.subtype.as_deref());

    let mut titles = IndexMap::new();
    let mut bodies = IndexMap::new();
    for comment in &raw.comments {
        let language = comment.language.clone().unwrap_or_default();
        titles.insert(language.clone(), comment.title.clone().unwrap_or_default());
        bodies.insert(language, comment.comment.clone().unwrap_or_default());
    }

    let (bed_count, bath_count) = derive_room_counts(raw, codes);

    let mut energy_global = None;
    let mut energy_renewable = None;
    for regulation in &raw.regulations {
        match regulation.regulation_type {
            Some(ENERGY_GLOBAL) => energy_global = regulation.value.clone(),
            Some(ENERGY_RENEWABLE) => energy_renewable = regulation.value.clone(),
            _ => {}
        }
    }

    let images = raw
        .pictures
        .iter()
        .filter_map(|p| {
            Some(ImageRef {
                id: p.id.clone()?,
                url: p.url.clone().filter(|u| !u.is_empty())?,
                rank: p.rank.unwrap_or(0),
            })
        })
        .collect();

    let user = raw.user.clone().unwrap_or_default();
    let city = raw.city.clone().unwrap_or_default();

    ListingRecord {
        mls: raw.id.clone().unwrap_or_default(),
        titles,
        bodies,
        alt_title: raw.address.clone().unwrap_or_default(),
        price: normalize_price(raw.price.as_ref().and_then(|p| p.value)),
        price_prefix: String::new(),
        price_postfix: String::new(),
        area: normalize_area(raw.area.as_ref().and_then(|a| a.value.as_deref())),
        geo: geo_string(raw.latitude, raw.longitude),
        rooms: raw.rooms,
        bedrooms: raw.bedrooms,
        bed_count,
        bath_count,
        property_type,
        property_subtype,
        city: city.name.unwrap_or_default(),
        zip: city.zipcode.unwrap_or_default(),
        country: raw.country.clone().unwrap_or_default(),
        energy_global,
        energy_renewable,
        images,
        last_modified: raw.updated_at.as_deref().and_then(parse_timestamp),
        agent: Agent {
            first_name: user.firstname.unwrap_or_default(),
            last_name: user.lastname.unwrap_or_default(),
            email: user.email.filter(|e| !e.is_empty()),
        },
        mapping_gaps: gaps,
    }
}

/// Zero or missing prices become the "on request" sentinel; amounts are whole units.
pub fn normalize_price(value: Option<f64>) -> ListingPrice {
    match value {
        Some(v) if v != 0.0 && v.is_finite() => ListingPrice::Amount(format!("{:.0}", v)),
        _ => ListingPrice::OnRequest,
    }
}

/// Decimal comma to decimal point. Anything else passes through untouched.
pub fn normalize_area(value: Option<&str>) -> String {
    value.map(|v| v.replace(',', ".")).unwrap_or_default()
}

pub fn geo_string(latitude: Option<f64>, longitude: Option<f64>) -> String {
    match (latitude, longitude) {
        (Some(lat), Some(lng)) if lat != 0.0 && lng != 0.0 => format!("{lat}, {lng}"),
        _ => String::new(),
    }
}

fn derive_room_counts(raw: &RawListing, codes: &AreaCodes) -> (i64, i64) {
    let mut beds = 0;
    let mut baths = 0;
    for area in &raw.areas {
        let (Some(kind), Some(number)) = (area.area_type, area.number) else {
            continue;
        };
        if codes.bedroom.contains(&kind) {
            beds += number;
        } else if codes.bathroom.contains(&kind) {
            baths += number;
        }
    }
    (beds, baths)
}

/// Accepts RFC 3339 or the API's "YYYY-MM-DD HH:MM:SS" (read as UTC).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
