//! Strongly-typed identifiers for conauth entities.
//!
//! All identifiers in conauth are:
//! - **Strongly typed**: Prevents mixing up different ID types at compile time
//! - **Lexicographically sortable**: ULIDs encode creation time and sort naturally
//! - **Globally unique**: No coordination required for generation
//!
//! # Example
//!
//! ```rust
//! use conauth_core::id::{CheckId, IncidentId};
//!
//! let check = CheckId::generate();
//! let incident = IncidentId::generate();
//!
//! // IDs are different types - this won't compile:
//! // let wrong: CheckId = incident;
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident, $label:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Generates a new unique identifier.
            ///
            /// Uses ULID generation which is:
            /// - Lexicographically sortable by creation time
            /// - Globally unique without coordination
            /// - URL-safe and case-insensitive
            #[must_use]
            pub fn generate() -> Self {
                Self(Ulid::new())
            }

            /// Creates an identifier from a raw ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }

            /// Returns the creation timestamp encoded in the ID.
            #[must_use]
            #[allow(clippy::cast_possible_wrap)]
            pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
                let ms = self.0.timestamp_ms();
                chrono::DateTime::from_timestamp_millis(ms as i64)
                    .unwrap_or_else(chrono::Utc::now)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Ulid::from_string(s)
                    .map(Self)
                    .map_err(|e| Error::InvalidId {
                        message: format!(concat!("invalid ", $label, " ID '{}': {}"), s, e),
                    })
            }
        }
    };
}

entity_id!(
    /// A unique identifier for a protected cloud service.
    ///
    /// Services are the unit of authorization: every indicator record,
    /// authorization rollup, and quarterly report is scoped to one service.
    ServiceId,
    "service"
);

entity_id!(
    /// A unique identifier for one indicator record (one KSI instance
    /// tracked for one service).
    IndicatorId,
    "indicator"
);

entity_id!(
    /// A unique identifier for an automated check definition.
    CheckId,
    "check"
);

entity_id!(
    /// A unique identifier for a single check execution record.
    ExecutionId,
    "execution"
);

entity_id!(
    /// A unique identifier for a security incident.
    IncidentId,
    "incident"
);

entity_id!(
    /// A unique identifier for a change request.
    ChangeRequestId,
    "change request"
);

entity_id!(
    /// A unique identifier for a quarterly authorization report.
    ReportId,
    "report"
);

entity_id!(
    /// A unique identifier for a stored piece of evidence.
    ///
    /// Evidence is owned by an external store; conauth only resolves these
    /// identifiers to existence and metadata.
    EvidenceId,
    "evidence"
);
