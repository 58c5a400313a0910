//! Confessions and the drafts they are created from.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Name shown for confessions posted without one.
pub const ANONYMOUS: &str = "Anonymous";

/// A single entry on the board.
///
/// This is both the wire format of the HTTP API and the at-rest format of the
/// persisted collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confession {
    /// Millisecond timestamp at creation, unique within a single collection file.
    pub id: u64,
    /// Display name, [`ANONYMOUS`] if none was given.
    #[serde(default = "anonymous")]
    pub name: String,
    /// The confession itself, never blank.
    pub text: String,
    /// Creation instant.
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
}

fn anonymous() -> String {
    ANONYMOUS.to_string()
}

impl Confession {
    /// Creates a confession from a validated draft, stamped with `now`.
    ///
    /// The timestamp is truncated to milliseconds, the precision it is stored with.
    pub fn new(draft: ValidDraft, now: DateTime<Utc>) -> Self {
        let now = now.trunc_subsecs(3);
        Self {
            id: millis_id(now),
            name: draft.name,
            text: draft.text,
            timestamp: now,
        }
    }

    /// Short human readable age relative to `now`, as shown next to each entry.
    pub fn age_label(&self, now: DateTime<Utc>) -> String {
        let secs = (now - self.timestamp).num_seconds();
        match secs {
            s if s < 60 => "just now".to_string(),
            s if s < 3600 => format!("{}m ago", s / 60),
            s if s < 86_400 => format!("{}h ago", s / 3600),
            s if s < 604_800 => format!("{}d ago", s / 86_400),
            _ => self.timestamp.format("%Y-%m-%d").to_string(),
        }
    }
}

/// Derives an id from the creation instant.
///
/// Two confessions created in the same millisecond get the same id; the store
/// resolves that when both land in the same file, see
/// [`assign_unique_id`].
pub fn millis_id(now: DateTime<Utc>) -> u64 {
    u64::try_from(now.timestamp_millis()).unwrap_or_default()
}

/// Makes sure `confession.id` is not already used in `existing`.
///
/// On a collision the id is moved one past the largest id in the collection.
pub fn assign_unique_id(confession: &mut Confession, existing: &[Confession]) {
    if existing.iter().any(|c| c.id == confession.id) {
        let max = existing.iter().map(|c| c.id).max().unwrap_or_default();
        confession.id = max + 1;
    }
}

/// Sorts newest first by timestamp. The sort is stable, so entries with equal
/// timestamps keep their insertion order.
pub fn sort_newest_first(confessions: &mut [Confession]) {
    confessions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

/// Unvalidated user input for a new confession.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The confession text. Missing is treated like empty.
    #[serde(default)]
    pub text: Option<String>,
}

impl Draft {
    /// Creates a draft.
    pub fn new(name: Option<impl Into<String>>, text: impl Into<String>) -> Self {
        Self {
            name: name.map(Into::into),
            text: Some(text.into()),
        }
    }

    /// Validates and normalizes the draft.
    ///
    /// Fails if the text is blank after trimming. The name is trimmed and
    /// replaced by [`ANONYMOUS`] when blank or missing.
    pub fn validate(&self) -> Result<ValidDraft, ValidationError> {
        let text = self.text.as_deref().unwrap_or_default().trim();
        if text.is_empty() {
            return EmptyTextSnafu.fail();
        }
        let name = match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => anonymous(),
        };
        Ok(ValidDraft {
            name,
            text: text.to_string(),
        })
    }
}

/// A draft that passed validation, with normalized fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidDraft {
    name: String,
    text: String,
}

impl ValidDraft {
    /// The normalized name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The normalized text.
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Input rejected before anything was stored.
#[allow(missing_docs)]
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    #[snafu(display("Confession text is required"))]
    EmptyText,
}

/// Serializes timestamps as RFC 3339 UTC with millisecond precision, e.g.
/// `2024-05-01T12:00:00.000Z`, which sorts lexicographically.
pub mod iso_millis {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    /// Serialize a timestamp.
    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&super::format_timestamp(ts))
    }

    /// Deserialize any RFC 3339 timestamp.
    pub fn deserialize<'de, D>(de: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(de)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(D::Error::custom)
    }
}

/// Formats a timestamp the way it is persisted.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
