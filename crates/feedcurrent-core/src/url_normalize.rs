use snafu::{Location, ResultExt, Snafu};
use url::Url;

use crate::record::{Embed, PostRecord};

/// Tracking query parameters stripped during normalization, matched
/// case-insensitively.
pub const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "msclkid",
    "mc_cid",
    "mc_eid",
    "_ga",
    "_gl",
    "ref",
    "source",
    "campaign",
    "link_source",
    "taid",
    "user_email",
];

#[derive(Debug, Snafu)]
pub enum NormalizeError {
    #[snafu(display("URL could not be parsed: {source}"))]
    Parse {
        source: url::ParseError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("URL has no host"))]
    MissingHost {
        #[snafu(implicit)]
        location: Location,
    },
}

/// A normalized absolute URL and its registrable host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedUrl {
    pub url: String,
    pub host: String,
}

/// Extracts the one outbound link a post record carries, if any: an
/// external-link embed, then an external-link nested in a
/// record-with-media embed, else nothing. Image embeds, bare quote-post
/// embeds, and anything else are never inspected here.
pub fn normalize_record(record: &PostRecord) -> Option<NormalizedUrl> {
    let raw = extract_raw_url(record.embed.as_ref()?)?;
    normalize_url(raw).ok()
}

fn extract_raw_url(embed: &Embed) -> Option<&str> {
    match embed {
        Embed::External { external } => Some(external.uri.as_str()),
        Embed::RecordWithMedia { media } => match media.as_ref() {
            Embed::External { external } => Some(external.uri.as_str()),
            _ => None,
        },
        Embed::Other => None,
    }
}

/// Normalizes a raw URL string: lower-cases and strips `www.` from the
/// host, forces `https`, drops the fragment and tracking query params,
/// and defaults an empty path to `/`. Idempotent:
/// `normalize_url(normalize_url(u).url) == normalize_url(u)`.
pub fn normalize_url(raw: &str) -> Result<NormalizedUrl, NormalizeError> {
    normalize_url_inner(raw, true)
}

/// As [`normalize_url`] but with tracking-parameter removal disabled, for
/// callers that need the raw-but-canonicalized form.
pub fn normalize_url_keep_tracking(raw: &str) -> Result<NormalizedUrl, NormalizeError> {
    normalize_url_inner(raw, false)
}

fn normalize_url_inner(raw: &str, strip_tracking: bool) -> Result<NormalizedUrl, NormalizeError> {
    let mut url = Url::parse(raw).context(ParseSnafu)?;

    let host = url.host_str().context(MissingHostSnafu)?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

    if matches!(url.scheme(), "http" | "https") {
        let _ = url.set_scheme("https");
    }

    url.set_host(Some(&host)).context(ParseSnafu)?;
    url.set_fragment(None);

    if strip_tracking {
        strip_tracking_params(&mut url);
    }

    if url.path().is_empty() {
        url.set_path("/");
    }

    let domain_host = host_without_port(&host);

    Ok(NormalizedUrl {
        url: url.to_string(),
        host: domain_host,
    })
}

fn strip_tracking_params(url: &mut Url) {
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| {
            !TRACKING_PARAMS
                .iter()
                .any(|tracked| tracked.eq_ignore_ascii_case(name))
        })
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    if retained.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut()
            .clear()
            .extend_pairs(retained.iter().map(|(name, value)| (name, value)));
    }
}

/// The registrable host used by the domain filter: lower-cased, `www.`
/// stripped, port stripped.
pub fn host_without_port(host: &str) -> String {
    host.split(':').next().unwrap_or(host).to_string()
}
