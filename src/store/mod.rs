//! Storage collaborator: narrow upsert/query stores over SQLite.
//!
//! The sync core treats persistence as an external collaborator. These store
//! structs are the whole contract: key-based upserts and a handful of lookups.
//! Tokens arrive here already encrypted by the vault; the stores never see
//! plaintext secrets.
//!
//! # Thread safety
//! Each store wraps its `rusqlite::Connection` in a `Mutex`; SQLite serialized
//! mode handles the rest.

mod campaigns;
mod integrations;

pub use campaigns::CampaignStore;
pub use integrations::{IntegrationRecord, IntegrationStore};
