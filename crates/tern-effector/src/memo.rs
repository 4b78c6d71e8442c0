//! Distributed action-memoization cache.
//!
//! Destructive effects are memoized by `subject-rules[-dur-N]` keys in a
//! shared TTL store so replicas do not re-apply the same action. The
//! get-then-add sequence is deliberately not transactional: a small
//! duplicate rate is acceptable, and a memo-store outage degrades to
//! re-application rather than blocking the consumer.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Entries outlive any realistic rules-engine replay window.
pub const DEFAULT_MEMO_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Shared TTL key-value store behind the memo cache.
pub trait MemoStore: Send + Sync {
    /// Whether the key is currently present.
    fn contains(&self, key: &str) -> Result<bool>;

    /// Insert the key with the given lifetime. Inserting an existing key is
    /// not an error.
    fn add(&self, key: &str, ttl: Duration) -> Result<()>;
}

/// Memcached-backed store shared across effector replicas.
pub struct MemcachedStore {
    client: memcache::Client,
}

impl MemcachedStore {
    pub fn connect(servers: &[String]) -> Result<Self> {
        let urls: Vec<String> = servers
            .iter()
            .map(|s| format!("memcache://{}", s))
            .collect();
        let client = memcache::connect(urls)?;
        Ok(Self { client })
    }
}

impl MemoStore for MemcachedStore {
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.client.get::<String>(key)?.is_some())
    }

    fn add(&self, key: &str, ttl: Duration) -> Result<()> {
        match self.client.add(key, "1", ttl.as_secs() as u32) {
            Ok(()) => Ok(()),
            // Lost the race to another replica; the action is memoized.
            Err(memcache::MemcacheError::CommandError(
                memcache::CommandError::KeyExists,
            )) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process store used in tests and single-replica deployments.
pub struct InMemoryStore {
    cache: moka::sync::Cache<String, ()>,
}

impl InMemoryStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: moka::sync::Cache::builder()
                .max_capacity(1_000_000)
                .time_to_live(ttl)
                .build(),
        }
    }
}

impl MemoStore for InMemoryStore {
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.cache.get(key).is_some())
    }

    fn add(&self, key: &str, _ttl: Duration) -> Result<()> {
        self.cache.insert(key.to_string(), ());
        Ok(())
    }
}

/// The memo cache gating duplicate destructive actions.
#[derive(Clone)]
pub struct ActionMemo {
    store: Arc<dyn MemoStore>,
    ttl: Duration,
}

impl ActionMemo {
    pub fn new(store: Arc<dyn MemoStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Memo key for an action. The optional duration suffix lets
    /// incremental step-ups of persistent behavior through the gate.
    pub fn action_key(subject: &str, rules: &str, expiration_in_hours: Option<i64>) -> String {
        match expiration_in_hours {
            Some(hours) => format!("{}-{}-dur-{}", subject, rules, hours),
            None => format!("{}-{}", subject, rules),
        }
    }

    /// Returns true when an identical action was already applied within the
    /// TTL. Otherwise records the action and returns false. Store errors log
    /// and proceed: duplicate application is tolerated, blocking is not.
    pub fn check_has_actioned(
        &self,
        subject: &str,
        rules: &str,
        expiration_in_hours: Option<i64>,
    ) -> bool {
        let key = Self::action_key(subject, rules, expiration_in_hours);

        match self.store.contains(&key) {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => tracing::error!(error = %e, "memo cache lookup error"),
        }

        if let Err(e) = self.store.add(&key, self.ttl) {
            tracing::error!(error = %e, "memo cache insert error");
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingStore;

    impl MemoStore for FailingStore {
        fn contains(&self, _key: &str) -> Result<bool> {
            Err(crate::error::Error::Session("store down".to_string()))
        }
        fn add(&self, _key: &str, _ttl: Duration) -> Result<()> {
            Err(crate::error::Error::Session("store down".to_string()))
        }
    }

    fn memo() -> ActionMemo {
        ActionMemo::new(
            Arc::new(InMemoryStore::new(Duration::from_secs(60))),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn key_includes_optional_duration() {
        assert_eq!(
            ActionMemo::action_key("did:plc:abc", "R1,R2", None),
            "did:plc:abc-R1,R2"
        );
        assert_eq!(
            ActionMemo::action_key("did:plc:abc", "R1", Some(24)),
            "did:plc:abc-R1-dur-24"
        );
    }

    #[test]
    fn second_identical_action_is_suppressed() {
        let memo = memo();
        assert!(!memo.check_has_actioned("did:plc:abc", "R1", None));
        assert!(memo.check_has_actioned("did:plc:abc", "R1", None));
    }

    #[test]
    fn different_duration_is_a_different_action() {
        let memo = memo();
        assert!(!memo.check_has_actioned("did:plc:abc", "R1", Some(24)));
        assert!(!memo.check_has_actioned("did:plc:abc", "R1", Some(168)));
        assert!(memo.check_has_actioned("did:plc:abc", "R1", Some(24)));
    }

    #[test]
    fn different_rules_are_different_actions() {
        let memo = memo();
        assert!(!memo.check_has_actioned("did:plc:abc", "R1", None));
        assert!(!memo.check_has_actioned("did:plc:abc", "R2", None));
    }

    #[test]
    fn store_errors_proceed_with_application() {
        let memo = ActionMemo::new(Arc::new(FailingStore), Duration::from_secs(60));
        // An unavailable memo store must never suppress an action.
        assert!(!memo.check_has_actioned("did:plc:abc", "R1", None));
        assert!(!memo.check_has_actioned("did:plc:abc", "R1", None));
    }
}
