//! Request tracking subsystem.
//!
//! # Data Flow
//! ```text
//! inbound headers
//!     → identity.rs (resolve or generate the four tracking ids)
//!     → metadata.rs (flatten request/response into properties)
//!         → redaction.rs (mask sensitive header values)
//!     → telemetry events
//! ```

pub mod identity;
pub mod metadata;
pub mod redaction;

pub use identity::{
    current_identity, HeaderKeys, IdentifierKind, IdentifierResolver, RequestIdentity, Resolution,
};
pub use metadata::{
    MetadataExtractor, Properties, RequestSnapshot, DEFAULT_MAX_BODY_SIZE, NO_RESPONSE,
};
pub use redaction::{RedactionPolicy, REDACTED};
