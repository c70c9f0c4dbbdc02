//! Record, blob and change-feed access for Solace.
//!
//! Two backends: an in-process [`MemoryStore`] (development and tests) and
//! Supabase ([`SupabaseStore`] for tables and buckets, [`RealtimeFeed`] for
//! push notifications).

pub mod memory;
pub mod realtime;
pub mod reconnect;
pub mod supabase;
pub mod traits;

pub use memory::MemoryStore;
pub use realtime::RealtimeFeed;
pub use reconnect::ReconnectBackoff;
pub use supabase::SupabaseStore;
pub use traits::{
    BlobStore, ChangeFeed, ChangeKind, ConversationFilter, MessageChange, MessageFilter,
    RecordStore,
};
