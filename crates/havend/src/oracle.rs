//! DNS TXT oracle for the PoW difficulty schedule and release version.
//!
//! TXT RDATA arrives as length-prefixed chunks of up to 255 bytes; the
//! oracle concatenates every chunk across all answer records, in record
//! order then chunk order, and parses the result. The difficulty
//! document is a JSON object mapping decimal millisecond timestamps to
//! non-negative integer difficulties. Failures surface as errors; the
//! caller keeps its previous history.

use hickory_resolver::error::ResolveError;
use hickory_resolver::TokioAsyncResolver;
use thiserror::Error;
use tracing::{debug, warn};

use haven_common::pow::PowDifficulty;

/// Errors surfaced by oracle queries.
#[derive(Debug, Error)]
pub enum OracleError {
    /// The DNS query itself failed.
    #[error("dns query failed: {0}")]
    Resolve(#[from] ResolveError),
    /// The record contents did not parse.
    #[error("bad record: {0}")]
    BadRecord(String),
}

/// A release version triplet `MAJOR.MINOR.PATCH`.
pub type Version = [u16; 3];

/// Fetches the difficulty schedule and latest-version records.
pub struct DifficultyOracle {
    resolver: TokioAsyncResolver,
    difficulty_name: String,
    version_name: String,
}

impl DifficultyOracle {
    /// Creates an oracle using the system resolver configuration.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::Resolve`] if the system resolver cannot
    /// be constructed.
    pub fn new(difficulty_name: &str, version_name: &str) -> Result<Self, OracleError> {
        Ok(Self {
            resolver: TokioAsyncResolver::tokio_from_system_conf()?,
            difficulty_name: difficulty_name.to_owned(),
            version_name: version_name.to_owned(),
        })
    }

    /// Fetches and concatenates every TXT chunk for `name`.
    async fn get_txt_record(&self, name: &str) -> Result<Vec<u8>, OracleError> {
        let lookup = self.resolver.txt_lookup(name.to_owned()).await?;
        let mut data = Vec::new();
        for record in lookup.iter() {
            for chunk in record.txt_data() {
                data.extend_from_slice(chunk);
            }
        }
        Ok(data)
    }

    /// Queries the current difficulty schedule.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError`] on a failed query or malformed document;
    /// the caller retains its prior history in that case.
    pub async fn query_pow_difficulty(&self) -> Result<Vec<PowDifficulty>, OracleError> {
        debug!("querying PoW difficulty");
        let data = self.get_txt_record(&self.difficulty_name).await?;
        let text = std::str::from_utf8(&data)
            .map_err(|e| OracleError::BadRecord(e.to_string()))?;
        parse_difficulty_history(text)
    }

    /// Queries the latest published release version.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError`] on a failed query or malformed triplet.
    pub async fn query_latest_version(&self) -> Result<Version, OracleError> {
        debug!("querying latest version");
        let data = self.get_txt_record(&self.version_name).await?;
        let text = std::str::from_utf8(&data)
            .map_err(|e| OracleError::BadRecord(e.to_string()))?;
        parse_version(text.trim())
            .ok_or_else(|| OracleError::BadRecord(format!("bad version string '{text}'")))
    }

    /// Compares the published version against this build and warns if
    /// an upgrade is available.
    pub async fn check_latest_version(&self) {
        let latest = match self.query_latest_version().await {
            Ok(v) => v,
            Err(e) => {
                warn!(%e, "failed to retrieve the latest version from DNS");
                return;
            }
        };
        let running = running_version();
        if running < latest {
            warn!(
                running = %format_version(running),
                latest = %format_version(latest),
                "you are using an outdated version of the storage node, please update"
            );
        } else {
            debug!(running = %format_version(running), "storage node is up to date");
        }
    }
}

/// Parses the difficulty JSON document.
///
/// # Errors
///
/// Returns [`OracleError::BadRecord`] on non-JSON input, non-numeric
/// keys, or negative/out-of-range difficulty values.
pub fn parse_difficulty_history(data: &str) -> Result<Vec<PowDifficulty>, OracleError> {
    let doc: serde_json::Map<String, serde_json::Value> = serde_json::from_str(data)
        .map_err(|e| OracleError::BadRecord(e.to_string()))?;

    let mut history = Vec::with_capacity(doc.len());
    for (key, value) in doc {
        let timestamp_ms = key
            .parse::<u64>()
            .map_err(|_| OracleError::BadRecord(format!("bad timestamp key '{key}'")))?;
        let difficulty = value
            .as_i64()
            .filter(|d| (0..=i64::from(i32::MAX)).contains(d))
            .ok_or_else(|| OracleError::BadRecord(format!("bad difficulty value {value}")))?;
        history.push(PowDifficulty {
            timestamp_ms,
            difficulty: difficulty as i32,
        });
    }
    Ok(history)
}

/// Parses a dotted `MAJOR.MINOR.PATCH` triplet of 16-bit components.
#[must_use]
pub fn parse_version(s: &str) -> Option<Version> {
    let mut parts = s.split('.');
    let version = [
        parts.next()?.parse().ok()?,
        parts.next()?.parse().ok()?,
        parts.next()?.parse().ok()?,
    ];
    if parts.next().is_some() {
        return None;
    }
    Some(version)
}

fn running_version() -> Version {
    parse_version(env!("CARGO_PKG_VERSION")).unwrap_or([0, 0, 0])
}

fn format_version(v: Version) -> String {
    format!("{}.{}.{}", v[0], v[1], v[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_document_parses() {
        let history =
            parse_difficulty_history(r#"{"1554859211000": 10, "1554859212000": 100}"#).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.contains(&PowDifficulty {
            timestamp_ms: 1_554_859_211_000,
            difficulty: 10,
        }));
        assert!(history.contains(&PowDifficulty {
            timestamp_ms: 1_554_859_212_000,
            difficulty: 100,
        }));
    }

    #[test]
    fn empty_document_is_empty_history() {
        assert!(parse_difficulty_history("{}").unwrap().is_empty());
    }

    #[test]
    fn non_json_rejected() {
        assert!(parse_difficulty_history("difficulty=10").is_err());
    }

    #[test]
    fn non_numeric_key_rejected() {
        assert!(parse_difficulty_history(r#"{"soon": 10}"#).is_err());
    }

    #[test]
    fn negative_difficulty_rejected() {
        assert!(parse_difficulty_history(r#"{"1000": -1}"#).is_err());
    }

    #[test]
    fn fractional_difficulty_rejected() {
        assert!(parse_difficulty_history(r#"{"1000": 1.5}"#).is_err());
    }

    #[test]
    fn version_triplet_parses() {
        assert_eq!(parse_version("2.1.0"), Some([2, 1, 0]));
        assert_eq!(parse_version("0.0.65535"), Some([0, 0, 65535]));
    }

    #[test]
    fn malformed_versions_rejected() {
        assert_eq!(parse_version("2.1"), None);
        assert_eq!(parse_version("2.1.0.4"), None);
        assert_eq!(parse_version("2.1.x"), None);
        assert_eq!(parse_version("2.1.65536"), None);
        assert_eq!(parse_version(""), None);
    }

    #[test]
    fn version_ordering_is_lexicographic() {
        assert!([2u16, 1, 0] < [2, 1, 1]);
        assert!([2u16, 1, 0] < [3, 0, 0]);
        assert!([2u16, 1, 0] > [1, 9, 9]);
    }

    #[test]
    fn running_version_matches_manifest() {
        assert_eq!(
            format_version(running_version()),
            env!("CARGO_PKG_VERSION")
        );
    }
}
