//! User identity store
//!
//! Profiles live in backend hashes under `user:{name}`.

use std::sync::Arc;

use crate::backend::{Backend, BackendError};

fn profile_key(name: &str) -> String {
    format!("user:{}", name)
}

/// A user profile as collected by the identify flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub user_name: String,
    pub user_age: String,
    pub user_gender: String,
    pub user_location: String,
}

/// Typed access to user profiles over the backend
pub struct UserDirectory {
    backend: Arc<dyn Backend>,
}

impl UserDirectory {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Store a profile, overwriting any existing fields
    pub async fn set_profile(&self, profile: &UserProfile) -> Result<(), BackendError> {
        self.backend
            .hash_set(
                &profile_key(&profile.user_name),
                &[
                    ("user_name", &profile.user_name),
                    ("user_age", &profile.user_age),
                    ("user_gender", &profile.user_gender),
                    ("user_location", &profile.user_location),
                ],
            )
            .await
    }

    /// Fetch a profile; `None` if the user never identified
    pub async fn get_profile(&self, name: &str) -> Result<Option<UserProfile>, BackendError> {
        let fields = self.backend.hash_get_all(&profile_key(name)).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        let get = |field: &str| fields.get(field).cloned().unwrap_or_default();
        Ok(Some(UserProfile {
            user_name: get("user_name"),
            user_age: get("user_age"),
            user_gender: get("user_gender"),
            user_location: get("user_location"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn sample_profile() -> UserProfile {
        UserProfile {
            user_name: "alice".to_string(),
            user_age: "30".to_string(),
            user_gender: "f".to_string(),
            user_location: "Nashville".to_string(),
        }
    }

    #[tokio::test]
    async fn test_profile_roundtrip() {
        let directory = UserDirectory::new(Arc::new(MemoryBackend::new()));

        let profile = sample_profile();
        directory.set_profile(&profile).await.unwrap();

        let loaded = directory.get_profile("alice").await.unwrap();
        assert_eq!(loaded, Some(profile));
    }

    #[tokio::test]
    async fn test_unknown_user_is_none() {
        let directory = UserDirectory::new(Arc::new(MemoryBackend::new()));
        assert!(directory.get_profile("nobody").await.unwrap().is_none());
    }
}
