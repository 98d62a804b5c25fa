use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Stable string key, unique within an entity kind
pub type Uid = String;

/// Entity version - monotonically increasing, 0 on first creation
pub type Version = i64;

/// Calendar day of a data point
pub type Day = NaiveDate;

/// Sentinel "beginning of time" day used for version-0 placeholder documents
pub const START_DAY: Day = match NaiveDate::from_ymd_opt(2015, 1, 1) {
    Some(day) => day,
    None => panic!("invalid start day"),
};

/// Identifies a specific committed state of an entity.
///
/// Immutable once constructed; a save is accepted only if the revision's
/// version matches the store's current version for that uid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub uid: Uid,
    pub ver: Version,
}

impl Revision {
    pub fn new(uid: impl Into<Uid>, ver: Version) -> Self {
        Self {
            uid: uid.into(),
            ver,
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(ver {})", self.uid, self.ver)
    }
}

/// Named partition of the store - one logical database per subdomain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subdomain(&'static str);

impl Subdomain {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Subdomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Versioned, uniquely-identified persisted domain object.
///
/// Every entity serializes to a flat document whose `rev` object carries the
/// identity; the store keeps `rev` split into its `_id`/`ver` fields. Domain
/// fields must provide serde defaults so a version-0 placeholder document
/// deserializes.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Canonical collection name.
    ///
    /// Doubles as the default uid for singleton entities keyed by type.
    fn kind() -> &'static str;

    fn revision(&self) -> &Revision;

    fn revision_mut(&mut self) -> &mut Revision;

    fn uid(&self) -> &str {
        &self.revision().uid
    }

    fn ver(&self) -> Version {
        self.revision().ver
    }
}
