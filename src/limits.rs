//! # Admission Control Module
//!
//! ## Purpose
//! Per-user-type counting semaphores bounding concurrent expensive search and
//! aggregation operations, so a burst of heavy requests cannot overrun the
//! search backend.
//!
//! ## Input/Output Specification
//! - **Input**: User type of the caller, configured permit counts
//! - **Output**: Semaphore handles and timeout-bounded permits
//! - **Fallback**: Unconfigured user types use the `Unknown` slot with a
//!   warning; a manager without an `Unknown` slot cannot be constructed
//!
//! This is simple admission control, not a scheduler: there is no queueing
//! fairness beyond what the underlying semaphore provides.

use crate::config::LimitsConfig;
use crate::errors::{Result, SearchError};
use crate::UserType;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug)]
struct UserTypeSemaphores {
    observation: Arc<Semaphore>,
    aggregation: Arc<Semaphore>,
}

/// Per-user-type admission semaphores sized from configuration
#[derive(Debug)]
pub struct SemaphoreLimitManager {
    semaphores: HashMap<UserType, UserTypeSemaphores>,
    acquire_timeout: Duration,
}

impl SemaphoreLimitManager {
    /// Build the semaphore table from configuration.
    ///
    /// Fails loudly when the `Unknown` fallback slot is absent; every lookup
    /// relies on it existing.
    pub fn new(config: &LimitsConfig) -> Result<Self> {
        if !config.user_types.contains_key(&UserType::Unknown) {
            return Err(SearchError::MissingUnknownLimit);
        }

        let semaphores = config
            .user_types
            .iter()
            .map(|(user_type, limits)| {
                (
                    *user_type,
                    UserTypeSemaphores {
                        observation: Arc::new(Semaphore::new(limits.observation_permits)),
                        aggregation: Arc::new(Semaphore::new(limits.aggregation_permits)),
                    },
                )
            })
            .collect();

        Ok(Self {
            semaphores,
            acquire_timeout: Duration::from_secs(config.acquire_timeout_seconds),
        })
    }

    /// Semaphore bounding concurrent observation searches for a user type
    pub fn observation_semaphore(&self, user_type: UserType) -> Arc<Semaphore> {
        Arc::clone(&self.slot(user_type).observation)
    }

    /// Semaphore bounding concurrent expensive aggregations for a user type
    pub fn aggregation_semaphore(&self, user_type: UserType) -> Arc<Semaphore> {
        Arc::clone(&self.slot(user_type).aggregation)
    }

    fn slot(&self, user_type: UserType) -> &UserTypeSemaphores {
        if let Some(slot) = self.semaphores.get(&user_type) {
            return slot;
        }
        tracing::warn!(
            "No semaphore limits configured for user type {:?}, using Unknown slot",
            user_type
        );
        self.semaphores
            .get(&UserType::Unknown)
            .expect("constructor guarantees the Unknown slot")
    }

    /// Acquire a permit with the configured timeout.
    ///
    /// A timeout is surfaced as [`SearchError::AdmissionTimeout`], distinct
    /// from an empty result, so the API layer can answer with a rate-limit
    /// response.
    pub async fn acquire_with_timeout(
        &self,
        semaphore: Arc<Semaphore>,
        user_type: UserType,
    ) -> Result<OwnedSemaphorePermit> {
        match tokio::time::timeout(self.acquire_timeout, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(crate::internal_error!("admission semaphore closed")),
            Err(_) => Err(SearchError::AdmissionTimeout {
                user_type: format!("{:?}", user_type),
                timeout_seconds: self.acquire_timeout.as_secs(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, UserTypeLimits};

    fn manager() -> SemaphoreLimitManager {
        SemaphoreLimitManager::new(&Config::default().limits).unwrap()
    }

    #[test]
    fn test_missing_unknown_slot_fails_construction() {
        let mut config = Config::default().limits;
        config.user_types.remove(&UserType::Unknown);
        let err = SemaphoreLimitManager::new(&config).unwrap_err();
        assert!(matches!(err, SearchError::MissingUnknownLimit));
    }

    #[test]
    fn test_configured_user_type_gets_own_slot() {
        let manager = manager();
        let semaphore = manager.observation_semaphore(UserType::Application);
        assert_eq!(semaphore.available_permits(), 32);
    }

    #[test]
    fn test_unconfigured_user_type_falls_back_to_unknown() {
        let mut config = Config::default().limits;
        config.user_types.remove(&UserType::Application);
        config.user_types.insert(
            UserType::Unknown,
            UserTypeLimits {
                observation_permits: 3,
                aggregation_permits: 1,
            },
        );
        let manager = SemaphoreLimitManager::new(&config).unwrap();

        let semaphore = manager.observation_semaphore(UserType::Application);
        assert_eq!(semaphore.available_permits(), 3);
    }

    #[tokio::test]
    async fn test_acquire_within_limit_succeeds() {
        let manager = manager();
        let semaphore = manager.aggregation_semaphore(UserType::Authenticated);
        let permit = manager
            .acquire_with_timeout(Arc::clone(&semaphore), UserType::Authenticated)
            .await
            .unwrap();
        assert_eq!(semaphore.available_permits(), 3);
        drop(permit);
        assert_eq!(semaphore.available_permits(), 4);
    }

    #[tokio::test]
    async fn test_exhausted_semaphore_times_out_with_distinct_error() {
        let mut config = Config::default().limits;
        config.acquire_timeout_seconds = 0;
        config.user_types.insert(
            UserType::Unknown,
            UserTypeLimits {
                observation_permits: 1,
                aggregation_permits: 1,
            },
        );
        let manager = SemaphoreLimitManager::new(&config).unwrap();

        let semaphore = manager.observation_semaphore(UserType::Unknown);
        let _held = semaphore.clone().acquire_owned().await.unwrap();

        let err = manager
            .acquire_with_timeout(semaphore, UserType::Unknown)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::AdmissionTimeout { .. }));
    }
}
