//! User profile lookup for display names

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::supabase::{SupabaseClient, SupabaseError};

/// User profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub display_name: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// New profile for insertion
#[derive(Debug, Clone, Serialize)]
pub struct NewProfile {
    pub id: Uuid,
    pub display_name: String,
}

/// Profile store operations
#[derive(Clone)]
pub struct ProfileStore {
    client: SupabaseClient,
}

impl ProfileStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    /// Get a user profile by ID
    pub async fn get_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, SupabaseError> {
        let query = format!("id=eq.{}", user_id);
        self.client.get_one("profiles", &query).await
    }

    /// Create a new user profile
    pub async fn create_profile(
        &self,
        user_id: Uuid,
        display_name: &str,
    ) -> Result<UserProfile, SupabaseError> {
        let profile = NewProfile {
            id: user_id,
            display_name: display_name.to_string(),
        };
        self.client.insert("profiles", &profile).await
    }

    /// Display name for a user, creating a default profile on first sight
    pub async fn display_name(&self, user_id: Uuid) -> Result<String, SupabaseError> {
        match self.get_profile(user_id).await? {
            Some(profile) => Ok(profile
                .display_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| default_display_name(user_id))),
            None => {
                let name = default_display_name(user_id);
                self.create_profile(user_id, &name).await?;
                Ok(name)
            }
        }
    }
}

/// Fallback name derived from the user id
pub fn default_display_name(user_id: Uuid) -> String {
    format!("Player_{}", &user_id.simple().to_string()[..8])
}
