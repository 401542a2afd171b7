mod client;
mod client_error;
mod models;

pub use client::{has_more, ApimoClient, FetchedPage, ListingSource};
pub use client_error::TransportError;
pub use models::{
    Area, AreaMeasurement, City, Comment, ListingPage, Picture, Price, RawListing, Regulation,
    User,
};
