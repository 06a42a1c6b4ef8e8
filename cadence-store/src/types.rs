use std::{fmt, str::FromStr};

/// Declares a ULID backed identifier.
///
/// ULIDs sort by creation time at millisecond resolution; identifiers minted
/// within the same millisecond order randomly.
macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            id: ulid::Ulid,
        }

        impl $name {
            /// Create an identifier from a ULID
            #[must_use]
            pub const fn new(id: ulid::Ulid) -> Self {
                Self { id }
            }

            /// Generate a new unique identifier
            #[must_use]
            pub fn generate() -> Self {
                Self {
                    id: ulid::Ulid::new(),
                }
            }

            #[must_use]
            pub const fn ulid(&self) -> ulid::Ulid {
                self.id
            }

            /// Milliseconds since the Unix epoch encoded in the identifier
            #[must_use]
            pub const fn timestamp_ms(&self) -> u64 {
                self.id.timestamp_ms()
            }

            /// Parse an identifier from a record filename like `01ARYZ6S41.bin`.
            ///
            /// Anything carrying a path separator, a traversal pattern, or a
            /// stem that is not a ULID is rejected.
            pub fn from_filename(filename: &str) -> Option<Self> {
                if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
                    return None;
                }

                let stem = filename.strip_suffix(".bin")?;
                let id = ulid::Ulid::from_string(stem).ok()?;

                Some(Self { id })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.id)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                ulid::Ulid::from_string(s).map(Self::new)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.id.to_string())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                let id = ulid::Ulid::from_string(&s).map_err(serde::de::Error::custom)?;
                Ok(Self { id })
            }
        }
    };
}

ulid_id!(
    /// Identifier of a campaign
    CampaignId
);

ulid_id!(
    /// Identifier of a dispatch unit.
    ///
    /// Doubles as the work queue's de-duplication and exclusion key.
    UnitId
);
