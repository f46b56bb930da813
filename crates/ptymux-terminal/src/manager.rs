use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ptymux_types::{GroupId, PtyError, PtyId, PtySummary, SpawnSpec};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session::{PtySession, SessionConfig};
use super::MAX_CONCURRENT_SESSIONS;

type Groups = HashMap<GroupId, HashMap<PtyId, Arc<PtySession>>>;

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub session: SessionConfig,
    /// Live sessions across all groups
    pub max_sessions: usize,
    pub sweep_interval: Duration,
    /// How long an exited, unobserved session is kept around
    pub idle_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            max_sessions: MAX_CONCURRENT_SESSIONS,
            sweep_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Owns every pty session, keyed by group and pty id
pub struct PtyRegistry {
    groups: RwLock<Groups>,
    next_id: AtomicU64,
    config: RegistryConfig,
}

impl std::fmt::Debug for PtyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyRegistry")
            .field("config", &self.config)
            .finish()
    }
}

impl PtyRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Spawn a new pty in `group`. Nothing is registered if the spawn fails.
    pub async fn create(&self, group: &str, spec: SpawnSpec) -> Result<Arc<PtySession>, PtyError> {
        spec.validate()?;

        let mut groups = self.groups.write().await;
        // Exited sessions waiting for the sweeper hold no process
        let live = groups
            .values()
            .flat_map(HashMap::values)
            .filter(|session| !session.is_exited())
            .count();
        if live >= self.config.max_sessions {
            return Err(PtyError::Validation(format!(
                "maximum concurrent sessions ({}) reached",
                self.config.max_sessions
            )));
        }

        let id = format!("pty_{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = PtySession::spawn(group, id.clone(), &spec, &self.config.session)?;

        groups
            .entry(group.to_string())
            .or_default()
            .insert(id, Arc::clone(&session));
        Ok(session)
    }

    pub async fn get(&self, group: &str, id: &str) -> Result<Arc<PtySession>, PtyError> {
        self.groups
            .read()
            .await
            .get(group)
            .and_then(|sessions| sessions.get(id))
            .cloned()
            .ok_or_else(|| PtyError::not_found(group, id))
    }

    /// Summaries of a group's sessions, oldest first
    pub async fn list(&self, group: &str) -> Vec<PtySummary> {
        let mut sessions: Vec<Arc<PtySession>> = self
            .groups
            .read()
            .await
            .get(group)
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default();
        // Ids break ties between sessions created within the same tick
        sessions.sort_by(|a, b| {
            (a.created_at(), a.id().len(), a.id()).cmp(&(b.created_at(), b.id().len(), b.id()))
        });
        sessions.iter().map(|session| session.info()).collect()
    }

    /// Groups that currently hold at least one session
    pub async fn groups(&self) -> Vec<GroupId> {
        let mut groups: Vec<GroupId> = self.groups.read().await.keys().cloned().collect();
        groups.sort();
        groups
    }

    pub async fn len(&self) -> usize {
        self.groups.read().await.values().map(HashMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Kill a session and forget it.
    pub async fn remove(&self, group: &str, id: &str) -> Result<(), PtyError> {
        let session = {
            let mut groups = self.groups.write().await;
            let sessions = groups
                .get_mut(group)
                .ok_or_else(|| PtyError::not_found(group, id))?;
            let session = sessions
                .remove(id)
                .ok_or_else(|| PtyError::not_found(group, id))?;
            if sessions.is_empty() {
                groups.remove(group);
            }
            session
        };

        session.kill().await;
        info!(group, pty = id, "pty session removed");
        Ok(())
    }

    /// Evict sessions that have exited, have no readers and have been quiet
    /// for at least `idle_timeout`. Running processes are never touched.
    pub async fn sweep(&self, idle_timeout: Duration) -> usize {
        let idle_timeout = chrono::Duration::from_std(idle_timeout).unwrap_or(chrono::Duration::MAX);
        let is_stale = |session: &PtySession| {
            session.is_exited()
                && session.reader_count() == 0
                && Utc::now().signed_duration_since(session.last_activity()) >= idle_timeout
        };

        let candidates: Vec<(GroupId, PtyId)> = {
            let groups = self.groups.read().await;
            groups
                .iter()
                .flat_map(|(group, sessions)| {
                    sessions
                        .iter()
                        .filter(|(_, session)| is_stale(session))
                        .map(move |(id, _)| (group.clone(), id.clone()))
                })
                .collect()
        };
        if candidates.is_empty() {
            return 0;
        }

        let mut evicted = 0;
        let mut groups = self.groups.write().await;
        for (group, id) in candidates {
            let Some(sessions) = groups.get_mut(&group) else {
                continue;
            };
            // A reader may have attached since the read pass
            match sessions.get(&id) {
                Some(session) if is_stale(session) => {
                    sessions.remove(&id);
                    evicted += 1;
                    debug!(group = %group, pty = %id, "evicted idle pty session");
                }
                Some(_) => debug!(group = %group, pty = %id, "session became active, kept"),
                None => warn!(group = %group, pty = %id, "session vanished during sweep"),
            }
            if sessions.is_empty() {
                groups.remove(&group);
            }
        }

        if evicted > 0 {
            info!(evicted, "idle sweep finished");
        }
        evicted
    }

    /// Run `sweep` every `sweep_interval` until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(registry.config.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        registry.sweep(registry.config.idle_timeout).await;
                    }
                }
            }
            debug!("idle sweeper stopped");
        })
    }

    /// Kill and forget every session.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<PtySession>> = {
            let mut groups = self.groups.write().await;
            groups
                .drain()
                .flat_map(|(_, sessions)| sessions.into_values())
                .collect()
        };
        if sessions.is_empty() {
            return;
        }

        info!(count = sessions.len(), "killing remaining pty sessions");
        futures::future::join_all(sessions.iter().map(|session| session.kill())).await;
    }
}
