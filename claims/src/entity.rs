//! Claimed entities, natural keys and the duplicate-claim relation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::bucket::{BucketId, TimeBucket};
use crate::error::{ClaimsError, Result};

/// Maximum length of a normalized label.
pub const MAX_LABEL_LEN: usize = 140;

/// External system a claimed entity was collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Reddit posts and comments
    Reddit,
    /// Posts on X
    X,
    /// YouTube video transcripts
    Youtube,
    /// Zillow property listings
    Zillow,
    /// A source tag this build does not recognize
    #[serde(other)]
    Unknown,
}

impl DataSource {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reddit => "reddit",
            Self::X => "x",
            Self::Youtube => "youtube",
            Self::Zillow => "zillow",
            Self::Unknown => "unknown",
        }
    }

    /// All sources the validator knows how to verify.
    pub fn recognized() -> [Self; 4] {
        [Self::Reddit, Self::X, Self::Youtube, Self::Zillow]
    }

    /// Whether this source belongs to the recognized vocabulary.
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Check that a label has the shape this source uses.
    ///
    /// - Reddit: `r/<community>` (1-21 word characters)
    /// - X: `#<tag>`
    /// - YouTube: `#<tag>` or `@<channel>`
    /// - Zillow: `zip:<5 digits>` or `status:<word>`
    pub fn accepts_label(&self, label: &DataLabel) -> bool {
        let value = label.as_str();
        match self {
            Self::Reddit => value
                .strip_prefix("r/")
                .map(|name| {
                    !name.is_empty()
                        && name.len() <= 21
                        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                })
                .unwrap_or(false),
            Self::X => value
                .strip_prefix('#')
                .map(is_tag_body)
                .unwrap_or(false),
            Self::Youtube => value
                .strip_prefix('#')
                .or_else(|| value.strip_prefix('@'))
                .map(is_tag_body)
                .unwrap_or(false),
            Self::Zillow => {
                if let Some(zip) = value.strip_prefix("zip:") {
                    zip.len() == 5 && zip.chars().all(|c| c.is_ascii_digit())
                } else if let Some(status) = value.strip_prefix("status:") {
                    !status.is_empty()
                        && status.chars().all(|c| c.is_ascii_lowercase() || c == '_')
                } else {
                    false
                }
            }
            Self::Unknown => false,
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_tag_body(body: &str) -> bool {
    !body.is_empty() && !body.chars().any(char::is_whitespace)
}

/// A normalized category tag (postal code, community, hashtag, status...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataLabel(String);

impl DataLabel {
    /// Normalize and validate a label: trimmed, lowercased, non-empty and at
    /// most [`MAX_LABEL_LEN`] characters.
    pub fn new(value: impl AsRef<str>) -> Result<Self> {
        let normalized = value.as_ref().trim().to_lowercase();
        if normalized.is_empty() {
            return Err(ClaimsError::EmptyLabel);
        }
        let len = normalized.chars().count();
        if len > MAX_LABEL_LEN {
            return Err(ClaimsError::LabelTooLong {
                max: MAX_LABEL_LEN,
                len,
            });
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DataLabel {
    type Error = ClaimsError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<DataLabel> for String {
    fn from(label: DataLabel) -> Self {
        label.0
    }
}

impl fmt::Display for DataLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One claimed unit of scraped data.
///
/// `uri` is unique within a single peer's claim; the same record claimed by
/// several peers is expected and resolved at scoring time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Locator of the underlying record
    pub uri: String,
    /// When the underlying fact was observed or listed
    pub timestamp: DateTime<Utc>,
    /// Where it was collected from
    pub source: DataSource,
    /// Category tag
    #[serde(default)]
    pub label: Option<DataLabel>,
    /// Opaque payload (a JSON object for every recognized source)
    #[serde(default)]
    pub content: Vec<u8>,
    /// Claimed payload length
    pub content_size_bytes: u64,
}

impl Entity {
    /// Create an entity whose size is taken from its content.
    pub fn new(
        uri: impl Into<String>,
        timestamp: DateTime<Utc>,
        source: DataSource,
        label: Option<DataLabel>,
        content: Vec<u8>,
    ) -> Self {
        let content_size_bytes = content.len() as u64;
        Self {
            uri: uri.into(),
            timestamp,
            source,
            label,
            content,
            content_size_bytes,
        }
    }

    /// Stable identity of the real-world record behind this entity.
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            source: self.source,
            canonical_id: normalize_uri(&self.uri),
        }
    }

    /// SHA-256 of the payload, hex encoded.
    pub fn content_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.content);
        hex::encode(hasher.finalize())
    }

    /// Whether the claimed size equals the payload length.
    pub fn size_matches_content(&self) -> bool {
        self.content_size_bytes == self.content.len() as u64
    }

    pub fn time_bucket(&self, width_secs: u64) -> TimeBucket {
        TimeBucket::from_datetime(self.timestamp, width_secs)
    }

    /// Bucket key this entity aggregates under.
    pub fn bucket_id(&self, width_secs: u64) -> BucketId {
        BucketId {
            source: self.source,
            label: self.label.clone(),
            time_bucket: self.time_bucket(width_secs),
        }
    }
}

/// Natural key of a record: the source plus its canonical id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NaturalKey {
    pub source: DataSource,
    pub canonical_id: String,
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.canonical_id)
    }
}

/// Canonical form of a record locator.
///
/// Lowercases scheme and host, drops a leading `www.` from the host, drops
/// query string and fragment, and strips trailing slashes from the path.
/// The path keeps its case.
pub fn normalize_uri(uri: &str) -> String {
    let trimmed = uri.trim();
    let without_fragment = trimmed.split('#').next().unwrap_or(trimmed);
    let without_query = without_fragment
        .split('?')
        .next()
        .unwrap_or(without_fragment);

    let (scheme, rest) = match without_query.split_once("://") {
        Some((scheme, rest)) => (Some(scheme.to_ascii_lowercase()), rest),
        None => (None, without_query),
    };
    let (host, path) = match rest.find('/') {
        Some(i) => rest.split_at(i),
        None => (rest, ""),
    };
    let path = path.trim_end_matches('/');
    let host = host.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    match scheme {
        Some(scheme) => format!("{}://{}{}", scheme, host, path),
        None => format!("{}{}", host, path),
    }
}

/// Relation deciding when two claimed entities count as the same record for
/// uniqueness credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Equivalence {
    /// Same source and canonical id
    #[default]
    NaturalKey,
    /// Same natural key and byte-identical content
    NaturalKeyAndContent,
}

/// Key under which equivalent entities collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EquivalenceKey {
    pub key: NaturalKey,
    pub content_digest: Option<String>,
}

impl Equivalence {
    pub fn key_for(&self, entity: &Entity) -> EquivalenceKey {
        let content_digest = match self {
            Self::NaturalKey => None,
            Self::NaturalKeyAndContent => Some(entity.content_digest()),
        };
        EquivalenceKey {
            key: entity.natural_key(),
            content_digest,
        }
    }
}

/// Whether two entities are duplicate claims of the same record.
pub fn are_equivalent(a: &Entity, b: &Entity, relation: Equivalence) -> bool {
    relation.key_for(a) == relation.key_for(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn listing(uri: &str, content: &str) -> Entity {
        Entity::new(
            uri,
            Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap(),
            DataSource::Zillow,
            Some(DataLabel::new("zip:10001").unwrap()),
            content.as_bytes().to_vec(),
        )
    }

    #[test]
    fn test_label_normalization() {
        let label = DataLabel::new("  R/Rust ").unwrap();
        assert_eq!(label.as_str(), "r/rust");

        assert_eq!(DataLabel::new("   "), Err(ClaimsError::EmptyLabel));
        assert!(matches!(
            DataLabel::new("x".repeat(141)),
            Err(ClaimsError::LabelTooLong { len: 141, .. })
        ));
    }

    #[test]
    fn test_label_shapes_per_source() {
        let zip = DataLabel::new("zip:94105").unwrap();
        let status = DataLabel::new("status:for_sale").unwrap();
        let subreddit = DataLabel::new("r/bittensor_").unwrap();
        let hashtag = DataLabel::new("#realestate").unwrap();

        assert!(DataSource::Zillow.accepts_label(&zip));
        assert!(DataSource::Zillow.accepts_label(&status));
        assert!(!DataSource::Zillow.accepts_label(&hashtag));
        assert!(!DataSource::Zillow.accepts_label(&DataLabel::new("zip:941").unwrap()));

        assert!(DataSource::Reddit.accepts_label(&subreddit));
        assert!(!DataSource::Reddit.accepts_label(&hashtag));

        assert!(DataSource::X.accepts_label(&hashtag));
        assert!(DataSource::Youtube.accepts_label(&DataLabel::new("@channel").unwrap()));
        assert!(!DataSource::Unknown.accepts_label(&hashtag));
    }

    #[test]
    fn test_unknown_source_deserializes() {
        let source: DataSource = serde_json::from_str("\"tiktok\"").unwrap();
        assert_eq!(source, DataSource::Unknown);
        assert!(!source.is_recognized());
    }

    #[test]
    fn test_normalize_uri() {
        assert_eq!(
            normalize_uri("HTTPS://WWW.Zillow.com/homedetails/123_zpid/?utm=x#photos"),
            "https://zillow.com/homedetails/123_zpid"
        );
        assert_eq!(normalize_uri("x.com/User/status/1"), "x.com/User/status/1");
        assert_eq!(normalize_uri("www.x.com/User/status/1"), "x.com/User/status/1");
        // only a leading www label is dropped
        assert_eq!(normalize_uri("https://old.www.example.com/a"), "https://old.www.example.com/a");
    }

    #[test]
    fn test_www_host_is_same_listing() {
        let bare = listing("https://zillow.com/homedetails/7_zpid", r#"{"price":100}"#);
        let www = listing("https://www.zillow.com/homedetails/7_zpid", r#"{"price":100}"#);
        assert_eq!(bare.natural_key(), www.natural_key());
        assert!(are_equivalent(&bare, &www, Equivalence::NaturalKey));
    }

    #[test]
    fn test_equivalence_relations() {
        let a = listing("https://zillow.com/homedetails/1/", r#"{"price":100}"#);
        let b = listing("https://ZILLOW.com/homedetails/1?ref=feed", r#"{"price":105}"#);

        assert!(are_equivalent(&a, &b, Equivalence::NaturalKey));
        assert!(!are_equivalent(&a, &b, Equivalence::NaturalKeyAndContent));

        let c = listing("https://zillow.com/homedetails/1", r#"{"price":100}"#);
        assert!(are_equivalent(&a, &c, Equivalence::NaturalKeyAndContent));
    }

    #[test]
    fn test_size_matches_content() {
        let mut entity = listing("https://zillow.com/homedetails/2", "{}");
        assert!(entity.size_matches_content());
        entity.content_size_bytes = 10;
        assert!(!entity.size_matches_content());
    }
}
