use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Opaque pagination cursor: base64 of `"<score>::<uri>"`, kept stable
/// across any rewrite as part of the feed service's external contract.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub score: f64,
    pub uri: String,
}

impl Cursor {
    pub fn encode(&self) -> String {
        let raw = format!("{}::{}", self.score, self.uri);
        STANDARD.encode(raw)
    }

    /// Decodes a cursor string. Failure is tolerated by the caller (proceed
    /// as if no cursor were supplied) rather than treated as a hard client
    /// error.
    pub fn decode(encoded: &str) -> Option<Self> {
        let raw = STANDARD.decode(encoded).ok()?;
        let raw = String::from_utf8(raw).ok()?;
        let (score_str, uri) = raw.split_once("::")?;
        let score = score_str.parse::<f64>().ok()?;
        Some(Cursor {
            score,
            uri: uri.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let cursor = Cursor {
            score: 4.7596,
            uri: "at://did:plc:userA/app.bsky.feed.post/a1".to_string(),
        };
        let encoded = cursor.encode();
        assert_eq!(Cursor::decode(&encoded), Some(cursor));
    }

    #[test]
    fn malformed_cursor_decodes_to_none() {
        assert_eq!(Cursor::decode("not valid base64!!"), None);
        assert_eq!(Cursor::decode(&base64::engine::general_purpose::STANDARD.encode("garbage")), None);
    }
}
