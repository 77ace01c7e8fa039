//! Refresh-token session rotation and IP abuse control: exactly-once rotation, sliding-window
//! rate limits, and escalating blocks behind pluggable stores.
//!
//! The crate is split into two cooperating halves:
//!
//! - [`session`] issues, validates, rotates, and revokes refresh tokens through a
//!   [`store::TokenRepository`].
//! - [`abuse`] counts requests per client IP, records violations, and escalates blocks through
//!   the request-log, violation, and block repositories.
//!
//! [`abuse::AbuseControl::admit`] is consulted before any authenticated action, and
//! [`session::SessionManager::refresh_session`] chains the two so a blocked client never reaches
//! the token store.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod abuse;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod obs;
pub mod session;
pub mod store;

mod _prelude {
	pub use std::{
		collections::{HashMap, HashSet},
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};

	pub use crate::error::{Error, Result};
}

#[cfg(test)] use color_eyre as _;
