use chrono::{DateTime, Utc};

use super::parser::RawEntry;
use crate::storage::{CanonicalEntry, UNTITLED_ARTICLE};
use crate::util::{strip_control_chars, strip_html};

/// Dedup key used when an entry has no id, no link, and no title/date pair.
pub const NO_GUID: &str = "no-guid";

/// Map a raw entry onto the canonical article shape.
///
/// Normalization never fails: every field has a fallback, and an
/// unparseable date degrades to `None` with a warning.
pub fn normalize(raw: &RawEntry) -> CanonicalEntry {
    let title = non_blank(&raw.title)
        .map(|t| strip_control_chars(t).trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED_ARTICLE.to_string());

    CanonicalEntry {
        guid: derive_guid(raw),
        title,
        link: non_blank(&raw.link).unwrap_or_default().to_string(),
        author: non_blank(&raw.creator)
            .or_else(|| non_blank(&raw.author))
            .map(str::to_string),
        published_at: non_blank(&raw.iso_date).and_then(parse_date),
        summary: raw.content_snippet.as_deref().and_then(strip_html),
        content_html: non_blank(&raw.content_encoded)
            .or_else(|| non_blank(&raw.content))
            .map(str::to_string),
    }
}

/// Derive the per-feed dedup key.
///
/// Order: source id, then link, then `"{title}-{iso_date}"` when both are
/// present, then [`NO_GUID`]. Entries collapsing onto `NO_GUID` within one
/// feed merge into a single article.
pub fn derive_guid(raw: &RawEntry) -> String {
    if let Some(guid) = non_blank(&raw.guid) {
        return guid.to_string();
    }
    if let Some(link) = non_blank(&raw.link) {
        return link.to_string();
    }
    match (non_blank(&raw.title), non_blank(&raw.iso_date)) {
        (Some(title), Some(date)) => format!("{}-{}", title, date),
        _ => NO_GUID.to_string(),
    }
}

fn non_blank(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw).or_else(|_| DateTime::parse_from_rfc2822(raw));
    match parsed {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(e) => {
            tracing::warn!(date = %raw, error = %e, "Unparseable entry date, storing none");
            None
        }
    }
}
