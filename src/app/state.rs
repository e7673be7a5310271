//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::MatchRegistry;
use crate::http::auth::{IdentityVerifier, SupabaseIdentityVerifier};
use crate::store::{MatchStore, ProfileStore, SupabaseClient, SupabaseMatchStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub matches: MatchRegistry,
    pub identity: Arc<dyn IdentityVerifier>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        // Initialize Supabase client
        let supabase = SupabaseClient::new(&config);

        let profile_store = ProfileStore::new(supabase.clone());
        let identity = Arc::new(SupabaseIdentityVerifier::new(
            config.supabase_jwt_secret.clone(),
            profile_store,
        ));
        let store = Arc::new(SupabaseMatchStore::new(supabase));

        Self::with_parts(config, store, identity)
    }

    /// Assemble state from explicit collaborators
    pub fn with_parts(
        config: Config,
        store: Arc<dyn MatchStore>,
        identity: Arc<dyn IdentityVerifier>,
    ) -> Self {
        let matches = MatchRegistry::new(config.rooms.clone(), store);
        Self {
            config: Arc::new(config),
            matches,
            identity,
        }
    }
}
