//! The replicated document type and its revision marker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Revision marker stamped by the master on every accepted write.
///
/// Carried on the wire as an ISO-8601 string with millisecond precision.
pub type Revision = DateTime<Utc>;

/// The master-side authoritative copy of a document.
///
/// Same shape as [`Document`]; the alias marks values that came from the
/// master rather than from a local edit.
pub type MasterRecord = Document;

/// Returns the epoch revision used for documents the master has never seen.
pub fn epoch() -> Revision {
    DateTime::<Utc>::UNIX_EPOCH
}

/// A replicated person record.
///
/// `passport_id` is the primary key. `updated` is owned by the master: a
/// client never sets it, and every accepted push overwrites it with the
/// master's processing time. `deleted` is the replicated tombstone flag;
/// documents are never hard-deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Primary key, unique per person.
    pub passport_id: String,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Age in years, 0 to 150 inclusive.
    #[serde(default)]
    pub age: u32,
    /// Master-owned revision marker. Defaults to the epoch for documents the
    /// master has not confirmed yet.
    #[serde(default = "epoch", with = "iso_millis")]
    pub updated: Revision,
    /// Tombstone flag for soft deletion.
    #[serde(rename = "_deleted", default)]
    pub deleted: bool,
}

impl Document {
    /// Creates a live document with the epoch revision.
    pub fn new(
        passport_id: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        age: u32,
    ) -> Self {
        Self {
            passport_id: passport_id.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            age,
            updated: epoch(),
            deleted: false,
        }
    }

    /// Returns a copy carrying the given revision.
    pub fn with_updated(mut self, updated: Revision) -> Self {
        self.updated = updated;
        self
    }

    /// Turns the document into its tombstone, keeping fields and revision.
    pub fn into_tombstone(mut self) -> Self {
        self.deleted = true;
        self
    }

    /// True when both documents carry the same revision marker.
    ///
    /// This is the only equality the conflict resolver looks at; business
    /// fields are never diffed.
    pub fn same_revision(&self, other: &Document) -> bool {
        self.updated == other.updated
    }

    /// True when everything except the revision marker matches.
    ///
    /// Lets a replica recognize the master's re-stamped echo of a write it
    /// already made itself.
    pub fn same_content(&self, other: &Document) -> bool {
        self.passport_id == other.passport_id
            && self.first_name == other.first_name
            && self.last_name == other.last_name
            && self.age == other.age
            && self.deleted == other.deleted
    }
}

/// ISO-8601 serialization with millisecond precision for revision markers.
///
/// The master stamps revisions at millisecond granularity, so a document that
/// round-trips through the wire compares equal to the stored record.
pub(crate) mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
