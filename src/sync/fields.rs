//! Meta keys and taxonomy names of the local listing schema, and the
//! builders that turn a `ListingRecord` into them.

use crate::domain::ListingRecord;
use crate::store::MediaId;
use std::collections::BTreeMap;

pub const META_ALT_TITLE: &str = "_ct_listing_alt_title";
pub const META_PRICE: &str = "_ct_price";
pub const META_AGENT_NAME: &str = "_ct_agent_name";
pub const META_PRICE_PREFIX: &str = "_ct_price_prefix";
pub const META_PRICE_POSTFIX: &str = "_ct_price_postfix";
pub const META_SQFT: &str = "_ct_sqft";
pub const META_VIDEO: &str = "_ct_video";
pub const META_MLS: &str = "_ct_mls";
pub const META_LATLNG: &str = "_ct_latlng";
pub const META_EXPIRE: &str = "_ct_listing_expire";
pub const META_BROKERAGE: &str = "_ct_brokerage";
pub const META_ENERGY_GLOBAL: &str = "_ct_global_energy_performance_index";
pub const META_ENERGY_RENEWABLE: &str = "_ct_renewable_energy_performance_index";
pub const META_IMAGES_POSITION: &str = "_ct_images_position";

pub const TAX_STATUS: &str = "ct_status";
pub const TAX_PROPERTY_TYPE: &str = "property_type";
pub const TAX_BEDS: &str = "beds";
pub const TAX_BATHS: &str = "baths";
pub const TAX_STATE: &str = "state";
pub const TAX_CITY: &str = "city";
pub const TAX_ZIPCODE: &str = "zipcode";
pub const TAX_COUNTRY: &str = "country";
pub const TAX_COMMUNITY: &str = "community";
pub const TAX_FEATURES: &str = "additional_features";

/// The complete meta set of a listing. Written as a full replace.
pub fn build_meta(
    record: &ListingRecord,
    positions: &BTreeMap<i64, MediaId>,
) -> BTreeMap<String, String> {
    let positions = serde_json::to_string(positions).unwrap_or_else(|_| "{}".to_string());

    [
        (META_ALT_TITLE, record.alt_title.clone()),
        (META_PRICE, record.price.display().to_string()),
        (META_AGENT_NAME, record.agent.display_name()),
        (META_PRICE_PREFIX, record.price_prefix.clone()),
        (META_PRICE_POSTFIX, record.price_postfix.clone()),
        (META_SQFT, record.area.clone()),
        // Placeholders the listing theme expects to exist.
        (META_VIDEO, String::new()),
        (META_MLS, record.mls.clone()),
        (META_LATLNG, record.geo.clone()),
        (META_EXPIRE, String::new()),
        (META_BROKERAGE, "0".to_string()),
        (
            META_ENERGY_GLOBAL,
            record.energy_global.clone().unwrap_or_default(),
        ),
        (
            META_ENERGY_RENEWABLE,
            record.energy_renewable.clone().unwrap_or_default(),
        ),
        (META_IMAGES_POSITION, positions),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Term assignments per taxonomy, except `property_type` which needs a store
/// lookup. An empty list clears the taxonomy.
pub fn build_terms(record: &ListingRecord) -> Vec<(&'static str, Vec<String>)> {
    let one = |value: String| -> Vec<String> {
        if value.trim().is_empty() {
            Vec::new()
        } else {
            vec![value]
        }
    };

    vec![
        (TAX_BEDS, one(record.bedrooms.map(|b| b.to_string()).unwrap_or_default())),
        (TAX_BATHS, one(record.bath_count.to_string())),
        (TAX_STATE, Vec::new()),
        (TAX_CITY, one(record.city.clone())),
        (TAX_ZIPCODE, one(record.zip.clone())),
        (TAX_COUNTRY, one(record.country.clone())),
        (TAX_COMMUNITY, Vec::new()),
        (TAX_FEATURES, one(record.rooms.map(|r| r.to_string()).unwrap_or_default())),
    ]
}
