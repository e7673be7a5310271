//! Data store modules for Supabase integration

pub mod matches;
pub mod profiles;
pub mod supabase;

pub use matches::{
    MatchRecord, MatchStore, MemoryMatchStore, Participant, StoreError, SupabaseMatchStore,
};
pub use profiles::ProfileStore;
pub use supabase::SupabaseClient;
