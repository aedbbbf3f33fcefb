// File: src/sync/core/ids.rs

//! Identifier types for the sync engine.
//!
//! Strongly-typed newtypes for memory records, real-time connections and
//! client devices, with helpers for generation, parsing, and `SQLite` mapping.
//!
//! ## Cargo features used by this module
//! - `uuid_v7`: enables `UUIDv7` generation via `uuid/v7` for memory ids.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate an ID intended to have good DB insert locality.
///
/// With feature `uuid_v7` enabled, this uses `Uuid::now_v7()`.
/// Otherwise it falls back to `Uuid::new_v4()`.
#[inline]
#[must_use]
fn uuid_time_ordered() -> Uuid {
    #[cfg(feature = "uuid_v7")]
    {
        Uuid::now_v7()
    }
    #[cfg(not(feature = "uuid_v7"))]
    {
        Uuid::new_v4()
    }
}

/// Generate a random UUID (v4).
#[inline]
#[must_use]
fn uuid_random() -> Uuid {
    Uuid::new_v4()
}

/// Declare a UUID newtype with a consistent API.
macro_rules! define_uuid_id {
    (
        $(#[$meta:meta])*
        $name:ident,
        generator = $gen:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl Default for $name {
            #[inline]
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            /// Create a new identifier.
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self($gen())
            }

            /// Borrow the underlying UUID.
            #[inline]
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            #[inline]
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            #[inline]
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

define_uuid_id!(
    /// Identifier for a captured memory record.
    MemoryId,
    generator = uuid_time_ordered
);

define_uuid_id!(
    /// Server-generated identifier of one live real-time connection.
    ///
    /// Several connections may belong to the same [`DeviceId`].
    ConnectionId,
    generator = uuid_random
);

impl MemoryId {
    /// Queue identity used for the processing work item of this memory.
    #[must_use]
    pub fn task_identity(&self) -> String {
        format!("process_{}", self.0)
    }
}

/// Errors returned when parsing/validating a [`DeviceId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceIdError {
    /// Empty (or whitespace-only) identifier.
    Empty,
    /// Exceeds the maximum accepted length.
    TooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length received.
        got: usize,
    },
}

impl fmt::Display for DeviceIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "device id must not be empty"),
            Self::TooLong { max, got } => write!(f, "device id too long: got {got}, max {max}"),
        }
    }
}

impl std::error::Error for DeviceIdError {}

/// Client-chosen identifier of a device (one browser profile / extension install).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Hard ceiling to prevent pathological payloads.
    pub const MAX_LEN: usize = 128;

    /// Build a validated `DeviceId`.
    ///
    /// # Errors
    /// Returns `DeviceIdError` if the input is empty or too long.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, DeviceIdError> {
        let s = raw.as_ref().trim();

        if s.is_empty() {
            return Err(DeviceIdError::Empty);
        }
        if s.len() > Self::MAX_LEN {
            return Err(DeviceIdError::TooLong {
                max: Self::MAX_LEN,
                got: s.len(),
            });
        }

        Ok(Self(s.to_owned()))
    }

    /// Borrow as `&str`.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceId {
    type Err = DeviceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl From<DeviceId> for String {
    fn from(value: DeviceId) -> Self {
        value.0
    }
}

impl TryFrom<String> for DeviceId {
    type Error = DeviceIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

// ===== Rusqlite integration ================================================

mod rusqlite_impl {
    use super::{DeviceId, MemoryId};

    use rusqlite::types::{
        FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef,
    };

    impl ToSql for MemoryId {
        fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
            // Store UUIDs as TEXT for compatibility
            Ok(ToSqlOutput::Owned(Value::Text(self.0.to_string())))
        }
    }

    impl FromSql for MemoryId {
        fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
            match value {
                ValueRef::Text(t) => {
                    let s = std::str::from_utf8(t).map_err(|e| FromSqlError::Other(Box::new(e)))?;
                    uuid::Uuid::parse_str(s)
                        .map(Self)
                        .map_err(|e| FromSqlError::Other(Box::new(e)))
                }
                _ => Err(FromSqlError::InvalidType),
            }
        }
    }

    impl ToSql for DeviceId {
        fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
            Ok(ToSqlOutput::Owned(Value::Text(self.as_str().to_owned())))
        }
    }

    impl FromSql for DeviceId {
        fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
            match value {
                ValueRef::Text(t) => {
                    let s = std::str::from_utf8(t).map_err(|e| FromSqlError::Other(Box::new(e)))?;
                    Self::new(s).map_err(|e| FromSqlError::Other(Box::new(e)))
                }
                _ => Err(FromSqlError::InvalidType),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_identity_format() {
        let id = MemoryId::new();
        assert_eq!(id.task_identity(), format!("process_{id}"));
    }

    #[test]
    fn test_device_id_validation() {
        assert_eq!(DeviceId::new("   "), Err(DeviceIdError::Empty));
        assert!(matches!(
            DeviceId::new("x".repeat(DeviceId::MAX_LEN + 1)),
            Err(DeviceIdError::TooLong { .. })
        ));
        let device = DeviceId::new(" laptop ").unwrap();
        assert_eq!(device.as_str(), "laptop");
    }

    #[test]
    fn test_device_id_serde() {
        let device: DeviceId = serde_json::from_str("\"tab-1\"").unwrap();
        assert_eq!(serde_json::to_string(&device).unwrap(), "\"tab-1\"");
        assert!(serde_json::from_str::<DeviceId>("\"\"").is_err());
    }

    #[test]
    fn test_memory_id_roundtrip_str() {
        let id = MemoryId::new();
        let parsed: MemoryId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
