use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::warn;

const LOG_TARGET: &str = crate::LOG_TARGET;

/// Reads a JSON config document from disk, failing soft on any I/O or parse
/// error. Callers keep whatever default or prior value they already had;
/// this never returns an `Err` because there is nothing a caller could do
/// with one beyond what the `warn!` already communicates.
pub fn load_json_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Option<T> {
    let path = path.as_ref();
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(err) => {
            warn!(target: LOG_TARGET, path = %path.display(), %err, "Config file not readable, using defaults");
            return None;
        }
    };

    match serde_json::from_str(&data) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(target: LOG_TARGET, path = %path.display(), %err, "Config file malformed, using defaults");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use tempfile::NamedTempFile;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn missing_file_returns_none() {
        assert_eq!(load_json_config::<Sample>("/nonexistent/path.json"), None);
    }

    #[test]
    fn malformed_json_returns_none() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "not json").unwrap();
        assert_eq!(load_json_config::<Sample>(file.path()), None);
    }

    #[test]
    fn valid_json_parses() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), r#"{"value": 7}"#).unwrap();
        assert_eq!(
            load_json_config::<Sample>(file.path()),
            Some(Sample { value: 7 })
        );
    }
}
