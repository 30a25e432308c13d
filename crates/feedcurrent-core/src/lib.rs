pub mod config;
pub mod domain_filter;
pub mod record;
pub mod url_normalize;

pub use domain_filter::DomainFilter;
pub use url_normalize::{NormalizeError, NormalizedUrl, normalize_record};

pub const LOG_TARGET: &str = "feedcurrent::core";
