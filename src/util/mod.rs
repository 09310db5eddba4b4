//! Utility functions shared by the ingestion engine and the CLI.
//!
//! - **Text processing**: markup stripping for summaries and descriptions
//! - **URL validation**: refusing feed URLs that would let members probe the
//!   service's own network

mod text;
mod url_validator;

pub use text::{collapse_whitespace, decode_entities, strip_control_chars, strip_html};
pub use url_validator::{validate_feed_url, UrlValidationError};
