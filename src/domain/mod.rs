pub mod images;
pub mod listing;
pub mod mapper;
pub mod taxonomy;

pub use listing::{Agent, ImageRef, ListingPrice, ListingRecord, MappingGap, PRICE_ON_ASK};
pub use mapper::{normalize, AreaCodes};
pub use taxonomy::{TaxonomyMap, SUBTYPE_MAPPINGS, TYPE_MAPPINGS};
