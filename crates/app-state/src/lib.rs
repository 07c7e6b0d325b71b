//! Session state for the VM hosting console
//!
//! This crate owns the client-side authentication state: the [`Session`]
//! record, the [`SessionStore`] that drives it, the persisted
//! [`SessionSnapshot`] projection, and the [`AccessGate`] the dashboard shell
//! uses to decide what to render.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod gate;
pub mod session;
pub mod snapshot;
pub mod store;

pub use gate::{visible_nav_items, AccessGate, NavItem, NavSection, NAV_ITEMS};
pub use session::{Operation, Session, SessionError, SessionEvent, SessionStatus};
pub use snapshot::{SessionSnapshot, SNAPSHOT_KEY, SNAPSHOT_VERSION};
pub use store::SessionStore;
