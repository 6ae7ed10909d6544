//! Leader flag used to keep exactly one instance ingesting.
//!
//! Each instance claims the flag at startup; the scheduler re-reads it every
//! tick and shuts the pipeline down once another instance holds it.

use async_trait::async_trait;
use parking_lot::Mutex;

#[derive(thiserror::Error, Debug)]
pub enum LeaderError {
    #[error("leader flag unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait LeaderFlag: Send + Sync {
    /// Marks `instance_id` as the active instance.
    async fn claim(&self, instance_id: &str) -> Result<(), LeaderError>;

    /// The currently active instance, if any instance has claimed the flag.
    async fn active_instance(&self) -> Result<Option<String>, LeaderError>;
}

/// In-process flag for single-instance deployments.
#[derive(Debug, Default)]
pub struct SingleInstance {
    active: Mutex<Option<String>>,
}

impl SingleInstance {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaderFlag for SingleInstance {
    async fn claim(&self, instance_id: &str) -> Result<(), LeaderError> {
        *self.active.lock() = Some(instance_id.to_string());
        Ok(())
    }

    async fn active_instance(&self) -> Result<Option<String>, LeaderError> {
        Ok(self.active.lock().clone())
    }
}

/// Result of checking the flag for `instance_id`. An unclaimed or unreadable
/// flag does not demote the instance.
pub async fn still_leader(flag: &dyn LeaderFlag, instance_id: &str) -> bool {
    match flag.active_instance().await {
        Ok(Some(active)) => active == instance_id,
        Ok(None) => true,
        Err(e) => {
            tracing::warn!("could not read leader flag, assuming still active: {e}");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenFlag;

    #[async_trait]
    impl LeaderFlag for BrokenFlag {
        async fn claim(&self, _instance_id: &str) -> Result<(), LeaderError> {
            Err(LeaderError::Unavailable("down".into()))
        }

        async fn active_instance(&self) -> Result<Option<String>, LeaderError> {
            Err(LeaderError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_takeover_demotes_previous_instance() {
        let flag = SingleInstance::new();
        assert!(still_leader(&flag, "aaaa0001").await);

        flag.claim("aaaa0001").await.unwrap();
        assert!(still_leader(&flag, "aaaa0001").await);

        flag.claim("bbbb0002").await.unwrap();
        assert!(!still_leader(&flag, "aaaa0001").await);
        assert!(still_leader(&flag, "bbbb0002").await);
    }

    #[tokio::test]
    async fn test_unreadable_flag_keeps_instance_active() {
        assert!(still_leader(&BrokenFlag, "aaaa0001").await);
    }
}
