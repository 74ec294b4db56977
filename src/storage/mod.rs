pub mod admin;
pub mod roster;
pub mod session_store;

pub use admin::{AdminPermission, AdminRecord, AdminRole, AdminSettings};
pub use roster::{Roster, RosterFeed, load_roster_file, save_roster_file, seed_default_admin};
pub use session_store::{SessionStore, SESSION_KEY};
