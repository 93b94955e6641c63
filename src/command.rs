//! ==============================================================================
//! command.rs - the singleton actuator command record
//! ==============================================================================
//!
//! purpose:
//!     holds the one CommandState the field device polls.
//!     two producers write it: the operator (full replace or patch) and the
//!     detection path (buzzer escalation).
//!
//! concurrency:
//!     every mutation is a read-modify-write under the write lock, so
//!     concurrent replace/escalate calls land in some total order. an
//!     escalation can't be lost to a replace computed from a stale copy, and
//!     a reader never sees half a write.
//!
//! ```text
//!     `updated_at` never goes backwards: a write stamped earlier than the
//!     stored value keeps the stored value.
//! ```
//!
//! lifecycle:
//!     created once, all off. nothing here deletes or recreates it.
//!
//! ==============================================================================

use std::future::Future;

use tokio::sync::RwLock;

use crate::domain::{Actuators, CommandPatch, CommandState, Timestamp};
use crate::error::Result;

/// one kind of write against the command record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    /// operator full-state write: all three fields overwritten
    Replace(Actuators),
    /// detection escalation: buzzer on, spray/light untouched
    EscalateBuzzer,
    /// operator partial write: only the given fields change
    Patch(CommandPatch),
}

impl Mutation {
    fn apply_to(self, state: &mut CommandState) {
        match self {
            Mutation::Replace(a) => {
                state.spray = a.spray;
                state.light = a.light;
                state.buzzer = a.buzzer;
            }
            Mutation::EscalateBuzzer => state.buzzer = true,
            Mutation::Patch(p) => {
                if let Some(v) = p.spray {
                    state.spray = v;
                }
                if let Some(v) = p.light {
                    state.light = v;
                }
                if let Some(v) = p.buzzer {
                    state.buzzer = v;
                }
            }
        }
    }
}

pub struct CommandChannel {
    state: RwLock<CommandState>,
}

impl CommandChannel {
    /// all actuators off, stamped `at`
    pub fn new(at: Timestamp) -> Self {
        Self { state: RwLock::new(CommandState::initial(at)) }
    }

    /// Current snapshot
    pub async fn read(&self) -> CommandState {
        *self.state.read().await
    }

    pub async fn replace(&self, actuators: Actuators, at: Timestamp) -> CommandState {
        self.apply_unpersisted(Mutation::Replace(actuators), at).await
    }

    pub async fn escalate_buzzer(&self, at: Timestamp) -> CommandState {
        self.apply_unpersisted(Mutation::EscalateBuzzer, at).await
    }

    pub async fn apply(&self, patch: CommandPatch, at: Timestamp) -> CommandState {
        self.apply_unpersisted(Mutation::Patch(patch), at).await
    }

    async fn apply_unpersisted(&self, mutation: Mutation, at: Timestamp) -> CommandState {
        let mut guard = self.state.write().await;
        let next = Self::next_state(&guard, mutation, at);
        *guard = next;
        next
    }

    /// Apply `mutation` and hand the resulting state to `persist` before it
    /// becomes visible
    ///
    /// the write lock is held across `persist`, so persisted order equals
    /// commit order. if `persist` fails the stored state is left untouched.
    /// whatever `persist` returns is passed back alongside the new state.
    pub async fn commit_with<F, Fut, T>(&self, mutation: Mutation, at: Timestamp, persist: F) -> Result<(CommandState, T)>
    where
        F: FnOnce(CommandState) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut guard = self.state.write().await;
        let next = Self::next_state(&guard, mutation, at);
        let extra = persist(next).await?;
        *guard = next;
        Ok((next, extra))
    }

    /// Overwrite with the state loaded from storage
    pub(crate) async fn restore(&self, state: CommandState) {
        *self.state.write().await = state;
    }

    fn next_state(current: &CommandState, mutation: Mutation, at: Timestamp) -> CommandState {
        let mut next = *current;
        mutation.apply_to(&mut next);
        next.updated_at = current.updated_at.max(at);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::parse_timestamp;
    use crate::error::Error;
    use std::sync::Arc;

    fn at(minute: u32) -> Timestamp {
        parse_timestamp(&format!("2024-01-01T00:{minute:02}:00")).unwrap()
    }

    fn on(spray: bool, light: bool, buzzer: bool) -> Actuators {
        Actuators { spray, light, buzzer }
    }

    #[tokio::test]
    async fn test_starts_all_off() {
        let channel = CommandChannel::new(at(0));
        assert_eq!(channel.read().await.actuators(), on(false, false, false));
    }

    #[tokio::test]
    async fn test_escalation_keeps_operator_fields() {
        let channel = CommandChannel::new(at(0));
        channel.replace(on(true, false, true), at(1)).await;
        channel.escalate_buzzer(at(2)).await;

        let state = channel.read().await;
        assert_eq!(state.actuators(), on(true, false, true));
        assert_eq!(state.updated_at, at(2));
    }

    #[tokio::test]
    async fn test_replace_clears_escalated_buzzer() {
        let channel = CommandChannel::new(at(0));
        channel.escalate_buzzer(at(1)).await;
        channel.replace(on(false, false, false), at(2)).await;
        assert!(!channel.read().await.buzzer);
    }

    #[tokio::test]
    async fn test_buzzer_stays_on_until_cleared() {
        let channel = CommandChannel::new(at(0));
        channel.replace(on(true, true, false), at(1)).await;
        channel.escalate_buzzer(at(2)).await;
        channel.apply(CommandPatch { spray: Some(false), ..Default::default() }, at(3)).await;
        channel.escalate_buzzer(at(4)).await;
        assert_eq!(channel.read().await.actuators(), on(false, true, true));
    }

    #[tokio::test]
    async fn test_patch_only_touches_given_fields() {
        let channel = CommandChannel::new(at(0));
        channel.replace(on(true, true, false), at(1)).await;
        channel.apply(CommandPatch { buzzer: Some(true), ..Default::default() }, at(2)).await;
        assert_eq!(channel.read().await.actuators(), on(true, true, true));
    }

    #[tokio::test]
    async fn test_updated_at_never_goes_back() {
        let channel = CommandChannel::new(at(0));
        channel.replace(on(true, false, false), at(10)).await;
        let state = channel.escalate_buzzer(at(5)).await;
        assert!(state.buzzer);
        assert_eq!(state.updated_at, at(10));
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_state() {
        let channel = CommandChannel::new(at(0));
        let result = channel
            .commit_with(Mutation::EscalateBuzzer, at(1), |_| async {
                Err::<(), _>(Error::StorageUnavailable("disk full".into()))
            })
            .await;

        assert!(matches!(result, Err(Error::StorageUnavailable(_))));
        assert_eq!(channel.read().await, CommandState::initial(at(0)));
    }

    #[tokio::test]
    async fn test_persist_sees_next_state() {
        let channel = CommandChannel::new(at(0));
        let seen = Arc::new(tokio::sync::Mutex::new(None));
        let sink = seen.clone();
        channel
            .commit_with(Mutation::Replace(on(false, true, false)), at(3), |next| async move {
                *sink.lock().await = Some(next);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(*seen.lock().await, Some(channel.read().await));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_replace_and_escalate_serialize() {
        for _ in 0..200 {
            let channel = Arc::new(CommandChannel::new(at(0)));

            let c1 = channel.clone();
            let replace = tokio::spawn(async move { c1.replace(on(true, false, false), at(1)).await });
            let c2 = channel.clone();
            let escalate = tokio::spawn(async move { c2.escalate_buzzer(at(1)).await });
            replace.await.unwrap();
            escalate.await.unwrap();

            // replace then escalate, or escalate then replace
            let end = channel.read().await.actuators();
            assert!(
                end == on(true, false, true) || end == on(true, false, false),
                "torn state {end:?}"
            );
        }
    }
}
