use crate::config::DedupConfig;
use crate::error::{CounterError, CounterResult};
use crate::kv::KvStore;
use crate::types::keys::marker_key;
use crate::types::{ActionKind, ActorFingerprint, SubjectId};
use std::sync::Arc;
use tracing::trace;

/// Result of asking the gate whether an action may be counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Duplicate,
}

impl Admission {
    pub fn is_accepted(self) -> bool {
        self == Admission::Accepted
    }
}

/// Decides whether an actor's action on a post was already counted within
/// the kind's dedup window.
///
/// The marker is claimed with a single set-if-absent, so of two
/// near-simultaneous first actions exactly one is accepted. Cache failures
/// propagate: an action is never counted when the gate cannot decide.
pub struct DedupGate {
    kv: Arc<dyn KvStore>,
    windows: DedupConfig,
}

impl DedupGate {
    pub fn new(kv: Arc<dyn KvStore>, windows: DedupConfig) -> Self {
        Self { kv, windows }
    }

    pub async fn admit(
        &self,
        kind: ActionKind,
        subject: SubjectId,
        actor: Option<&ActorFingerprint>,
    ) -> CounterResult<Admission> {
        let Some(window) = self.windows.window(kind) else {
            return Ok(Admission::Accepted);
        };
        let actor = actor.ok_or_else(|| {
            CounterError::InvalidArgument(format!("Fingerprint is required for {}", kind))
        })?;

        let key = marker_key(kind, subject, actor);
        let claimed = self.kv.set_nx(&key, "1", Some(window)).await?;
        trace!(kind = %kind, subject = %subject, claimed, "Dedup check");

        Ok(if claimed {
            Admission::Accepted
        } else {
            Admission::Duplicate
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{MemoryKv, MockKvStore};
    use std::time::Duration;

    fn subject(id: u64) -> SubjectId {
        SubjectId::new(id).unwrap()
    }

    fn actor(s: &str) -> ActorFingerprint {
        ActorFingerprint::new(s).unwrap()
    }

    fn gate(kv: Arc<MemoryKv>) -> DedupGate {
        DedupGate::new(kv, DedupConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_view_window_expires_after_a_day() {
        let kv = Arc::new(MemoryKv::new());
        let gate = gate(kv);
        let f1 = actor("f1");

        assert_eq!(
            gate.admit(ActionKind::View, subject(42), Some(&f1)).await.unwrap(),
            Admission::Accepted
        );
        assert_eq!(
            gate.admit(ActionKind::View, subject(42), Some(&f1)).await.unwrap(),
            Admission::Duplicate
        );

        tokio::time::advance(Duration::from_secs(24 * 60 * 60 + 1)).await;
        assert_eq!(
            gate.admit(ActionKind::View, subject(42), Some(&f1)).await.unwrap(),
            Admission::Accepted
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_like_window_outlives_view_window() {
        let gate = gate(Arc::new(MemoryKv::new()));
        let f1 = actor("f1");

        assert!(gate
            .admit(ActionKind::Like, subject(7), Some(&f1))
            .await
            .unwrap()
            .is_accepted());
        tokio::time::advance(Duration::from_secs(30 * 24 * 60 * 60)).await;
        assert!(!gate
            .admit(ActionKind::Like, subject(7), Some(&f1))
            .await
            .unwrap()
            .is_accepted());
    }

    #[tokio::test]
    async fn test_markers_are_scoped_per_kind_subject_and_actor() {
        let gate = gate(Arc::new(MemoryKv::new()));
        let (f1, f2) = (actor("f1"), actor("f2"));

        for (kind, id, who) in [
            (ActionKind::View, 1, &f1),
            (ActionKind::View, 1, &f2),
            (ActionKind::View, 2, &f1),
            (ActionKind::Like, 1, &f1),
        ] {
            assert!(gate
                .admit(kind, subject(id), Some(who))
                .await
                .unwrap()
                .is_accepted());
        }
    }

    #[tokio::test]
    async fn test_share_is_not_deduplicated() {
        let gate = gate(Arc::new(MemoryKv::new()));
        for _ in 0..3 {
            assert!(gate
                .admit(ActionKind::Share, subject(1), None)
                .await
                .unwrap()
                .is_accepted());
        }
    }

    #[tokio::test]
    async fn test_missing_actor_is_rejected() {
        let gate = gate(Arc::new(MemoryKv::new()));
        let result = gate.admit(ActionKind::View, subject(1), None).await;
        assert!(matches!(result, Err(CounterError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_cache_failure_fails_closed() {
        let mut kv = MockKvStore::new();
        kv.expect_set_nx()
            .returning(|_, _, _| Err(CounterError::NetworkError("down".to_string())));

        let gate = DedupGate::new(Arc::new(kv), DedupConfig::default());
        let result = gate
            .admit(ActionKind::View, subject(1), Some(&actor("f1")))
            .await;
        assert!(result.unwrap_err().is_unavailable());
    }

    #[tokio::test]
    async fn test_concurrent_first_actions_accept_once() {
        let gate = Arc::new(gate(Arc::new(MemoryKv::new())));
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let gate = Arc::clone(&gate);
            tasks.push(tokio::spawn(async move {
                gate.admit(ActionKind::Like, subject(3), Some(&actor("same")))
                    .await
                    .unwrap()
            }));
        }

        let mut accepted = 0;
        for task in tasks {
            if task.await.unwrap().is_accepted() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }
}
