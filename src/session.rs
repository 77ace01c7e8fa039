//! Refresh-token sessions: issuance, validation, exactly-once rotation, and revocation.
//!
//! [`TokenStore`] owns the token lifecycle against a [`crate::store::TokenRepository`].
//! [`SessionManager`] is the surface exposed to the transport layer; it checks the
//! [`UserDirectory`] before issuing and runs [`crate::abuse::AbuseControl`] before every refresh.

pub mod directory;
pub mod manager;
pub mod tokens;

mod metrics;

pub use self::metrics::RotationMetrics;
pub use directory::*;
pub use manager::*;
pub use tokens::*;
