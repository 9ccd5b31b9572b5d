use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{session_store::SessionStore, storage::StorageError},
    state::SharedState,
};

/// Polling and backoff intervals of the supervisor.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorTimings {
    /// First backoff delay after a failure.
    pub initial_delay: Duration,
    /// Cap of the doubling backoff.
    pub max_delay: Duration,
    /// Pause between health checks while connected.
    pub health_poll_interval: Duration,
    /// Reconnects tried before connecting from scratch.
    pub max_reconnect_attempts: u32,
}

impl Default for SupervisorTimings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_secs(10),
            health_poll_interval: Duration::from_secs(5),
            max_reconnect_attempts: 3,
        }
    }
}

/// Connect to the session store and keep the shared state in degraded mode
/// while it is unavailable.
pub async fn run<F, Fut>(state: SharedState, connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn SessionStore>, StorageError>> + Send,
{
    run_with(state, connect, SupervisorTimings::default()).await
}

/// [`run`] with explicit timings.
pub async fn run_with<F, Fut>(state: SharedState, mut connect: F, timings: SupervisorTimings)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn SessionStore>, StorageError>> + Send,
{
    let mut delay = timings.initial_delay;

    loop {
        match connect().await {
            Ok(store) => {
                // A fresh handle to a store that is still down must not leave degraded mode.
                if let Err(err) = store.health_check().await {
                    warn!(error = %err, "session store connected but unhealthy");
                    sleep(delay).await;
                    delay = (delay * 2).min(timings.max_delay);
                    continue;
                }
                state.set_session_store(store.clone()).await;
                info!("session store connected; leaving degraded mode");
                delay = timings.initial_delay;

                watch_health(&state, store.as_ref(), &timings).await;
                warn!("exhausted session store reconnect attempts; connecting from scratch");
            }
            Err(err) => warn!(error = %err, "session store connection attempt failed"),
        }

        sleep(delay).await;
        delay = (delay * 2).min(timings.max_delay);
    }
}

/// Poll the store until it stays unreachable through every reconnect attempt.
async fn watch_health(state: &SharedState, store: &dyn SessionStore, timings: &SupervisorTimings) {
    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded().await {
                    info!("session store healthy again; leaving degraded mode");
                    state.update_degraded(false).await;
                }
            }
            Err(err) => {
                warn!(error = %err, "session store health check failed");
                if !reconnect(state, store, timings).await {
                    return;
                }
                state.update_degraded(false).await;
            }
        }
        sleep(timings.health_poll_interval).await;
    }
}

async fn reconnect(state: &SharedState, store: &dyn SessionStore, timings: &SupervisorTimings) -> bool {
    let mut delay = timings.initial_delay;

    for attempt in 0..timings.max_reconnect_attempts {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "session store reconnected after health check failure");
                return true;
            }
            Err(err) => {
                if attempt == 0 {
                    warn!(attempt, error = %err, "session store reconnect failed; entering degraded mode");
                    state.update_degraded(true).await;
                } else {
                    warn!(attempt, error = %err, "session store reconnect attempt failed");
                }
                sleep(delay).await;
                delay = (delay * 2).min(timings.max_delay);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use futures::{FutureExt, future::BoxFuture};
    use serde_json::Value;

    use super::*;
    use crate::{
        dao::{
            models::{CreateOutcome, MergePatch},
            session_store::{SnapshotStream, memory::MemorySessionStore},
            storage::StorageResult,
        },
        services::{question_source::DeckQuestionSource, session_client::ClientSettings},
        state::{
            AppState,
            session::{ParticipantId, Round},
        },
    };

    /// Memory store whose health can be switched off.
    #[derive(Clone, Default)]
    struct FlakyStore {
        inner: MemorySessionStore,
        down: Arc<AtomicBool>,
    }

    impl FlakyStore {
        fn status(&self) -> StorageResult<()> {
            if self.down.load(Ordering::SeqCst) {
                Err(StorageError::unavailable(
                    "store offline".into(),
                    std::io::Error::other("down"),
                ))
            } else {
                Ok(())
            }
        }
    }

    impl SessionStore for FlakyStore {
        fn create_if_absent(
            &self,
            key: &str,
            document: Value,
        ) -> BoxFuture<'static, StorageResult<CreateOutcome>> {
            self.inner.create_if_absent(key, document)
        }

        fn merge(&self, key: &str, patch: MergePatch) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.merge(key, patch)
        }

        fn subscribe(&self, key: &str) -> BoxFuture<'static, StorageResult<SnapshotStream>> {
            self.inner.subscribe(key)
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            futures::future::ready(self.status()).boxed()
        }

        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            futures::future::ready(self.status()).boxed()
        }
    }

    fn fast() -> SupervisorTimings {
        SupervisorTimings {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            health_poll_interval: Duration::from_millis(5),
            max_reconnect_attempts: 2,
        }
    }

    async fn wait_degraded(state: &SharedState, expected: bool) {
        let mut watcher = state.degraded_watcher();
        tokio::time::timeout(
            Duration::from_secs(2),
            watcher.wait_for(|degraded| *degraded == expected),
        )
        .await
        .expect("degraded flag did not settle")
        .unwrap();
    }

    #[tokio::test]
    async fn degraded_mode_follows_store_health() {
        let state = AppState::new(
            ParticipantId::new("H"),
            Arc::new(DeckQuestionSource::new(Vec::<Round>::new())),
            ClientSettings::default(),
        );
        assert!(state.is_degraded().await);

        let store = FlakyStore::default();
        let down = store.down.clone();
        let supervisor = tokio::spawn(run_with(
            state.clone(),
            move || {
                let store = store.clone();
                async move { Ok(Arc::new(store) as Arc<dyn SessionStore>) }
            },
            fast(),
        ));

        wait_degraded(&state, false).await;
        assert!(state.session_store().await.is_some());

        down.store(true, Ordering::SeqCst);
        wait_degraded(&state, true).await;

        down.store(false, Ordering::SeqCst);
        wait_degraded(&state, false).await;

        supervisor.abort();
    }
}
