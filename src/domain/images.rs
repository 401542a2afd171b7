// src/domain/images.rs

use crate::domain::listing::ImageRef;

const MARKER_PREFIX: &str = "APIMO ";

/// Content marker stamped on uploaded media so it can be found again.
pub fn media_marker(image_id: &str) -> String {
    format!("{MARKER_PREFIX}{image_id}")
}

/// File name without directory or extension, e.g. `.../photo-1.jpg?w=3` -> `photo-1`.
pub fn filename_from_url(value: &str) -> String {
    let path = match url::Url::parse(value) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => value.split(['?', '#']).next().unwrap_or(value).to_string(),
    };
    let base = path.rsplit('/').next().unwrap_or("");
    match base.rfind('.') {
        Some(idx) if idx > 0 => base[..idx].to_string(),
        _ => base.to_string(),
    }
}

/// Whether an attached media (marker + source url) still matches an image in the list.
pub fn still_present(marker: &str, source_url: &str, images: &[ImageRef]) -> bool {
    let filename = filename_from_url(source_url);
    images
        .iter()
        .any(|img| media_marker(&img.id) == marker && filename_from_url(&img.url) == filename)
}

/// Index of the lowest-ranked image; the first one wins ties.
pub fn lowest_rank_index(images: &[ImageRef]) -> Option<usize> {
    images
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, i64)>, (idx, img)| match best {
            Some((_, rank)) if rank <= img.rank => best,
            _ => Some((idx, img.rank)),
        })
        .map(|(idx, _)| idx)
}
