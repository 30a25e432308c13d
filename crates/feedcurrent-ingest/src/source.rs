use chrono::{DateTime, Utc};
use snafu::Snafu;

/// One operation inside a commit: an action on a collection/rkey path,
/// dereferencing into the commit's block container by `cid`.
#[derive(Debug, Clone)]
pub struct Op {
    pub action: Action,
    pub path: String,
    pub cid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
    Delete,
}

/// A decoded commit message. `blocks` is the opaque
/// content-addressed container; `ops` references into it by cid. Decoding
/// `blocks` into a concrete record is a `BlockDecoder`'s job, kept
/// pluggable since the wire container format is provided by the firehose
/// client library, not by this crate.
#[derive(Debug, Clone)]
pub struct CommitMessage {
    pub repo: String,
    pub time: DateTime<Utc>,
    pub blocks: Vec<u8>,
    pub ops: Vec<Op>,
}

/// A message yielded by the upstream firehose client. Non-commit variants
/// (informational, error, handle changes, etc.) are ignored by the
/// consumer.
#[derive(Debug, Clone)]
pub enum FirehoseMessage {
    Commit(CommitMessage),
    Other,
}

/// Upstream message source. The WebSocket framing that produces these
/// messages is out of scope (assumed provided by a client library); this
/// trait is the seam at which that library plugs in.
#[async_trait::async_trait]
pub trait FirehoseSource: Send {
    async fn next_message(&mut self) -> Option<FirehoseMessage>;
}

#[derive(Debug, Snafu)]
pub enum DecodeError {
    #[snafu(display("block container is malformed"))]
    MalformedContainer,
    #[snafu(display("record bytes are not valid UTF-8"))]
    InvalidUtf8,
    #[snafu(display("record cid {cid} not found in block container"))]
    MissingCid { cid: String },
    #[snafu(display("record did not match the expected shape: {source}"))]
    Shape { source: serde_json::Error },
}

/// Dereferences a cid into a record's raw JSON value within a commit's
/// block container. Malformed containers or non-UTF-8 byte sequences are
/// caught and reported as `DecodeError`, never a panic.
pub trait BlockDecoder: Send + Sync {
    fn decode(&self, blocks: &[u8], cid: &str) -> Result<serde_json::Value, DecodeError>;
}

/// A source that yields no messages. Stands in for the real firehose
/// client (WebSocket framing is out of scope for this crate, see
/// `FirehoseSource`) until one is wired in at the deployment boundary.
pub struct NullFirehoseSource;

#[async_trait::async_trait]
impl FirehoseSource for NullFirehoseSource {
    async fn next_message(&mut self) -> Option<FirehoseMessage> {
        None
    }
}

/// A decoder over a block container that is simply the JSON-encoded
/// `{cid: record}` map — the shape used throughout this crate's tests and
/// a reasonable drop-in until a real CAR-decoding client library is wired
/// up at the integration boundary.
pub struct JsonMapBlockDecoder;

impl BlockDecoder for JsonMapBlockDecoder {
    fn decode(&self, blocks: &[u8], cid: &str) -> Result<serde_json::Value, DecodeError> {
        let text = std::str::from_utf8(blocks).map_err(|_| DecodeError::InvalidUtf8)?;
        let map: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(text).map_err(|_| DecodeError::MalformedContainer)?;
        map.get(cid)
            .cloned()
            .ok_or_else(|| DecodeError::MissingCid {
                cid: cid.to_string(),
            })
    }
}
