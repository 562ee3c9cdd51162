//! Capacity-bounded store of live sessions.
//!
//! The map is guarded by a single mutex so that "remove the session being
//! replaced, check capacity, insert" happens as one step. Killing a session
//! can take seconds, so it always happens after the session has been removed
//! and the lock released; whoever removes a session is the one that kills it.
//! Kills run on their own tasks, so a removed session is always torn down
//! even when the request that removed it goes away.

use super::error::StreamError;
use super::session::{Session, SessionSummary};
use futures::future::join_all;
use kino_common::SessionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Sessions an admission removed from the registry. The caller kills them.
#[derive(Debug, Default)]
pub struct Admitted {
    /// The session named by `replace`, if it was registered.
    pub replaced: Option<Arc<Session>>,
    /// Sessions whose transcoder had already failed.
    pub failed: Vec<Arc<Session>>,
}

impl Admitted {
    /// Everything removed, replaced session first.
    pub fn into_sessions(self) -> Vec<Arc<Session>> {
        self.replaced.into_iter().chain(self.failed).collect()
    }
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_sessions,
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Register `session`, first removing the session it replaces.
    ///
    /// Failed sessions do not count toward capacity and are removed along
    /// with the replaced one; the caller must kill everything returned.
    /// Fails with [`StreamError::CapacityExceeded`] when the starting and
    /// running sessions left after the replacement fill the registry;
    /// nothing is removed in that case.
    pub fn admit(
        &self,
        session: Arc<Session>,
        replace: Option<&SessionId>,
    ) -> Result<Admitted, StreamError> {
        // Failure is final once seen, so it can be checked without the lock
        let failed: Vec<SessionId> = self
            .snapshot()
            .into_iter()
            .filter(|s| s.has_failed())
            .map(|s| s.id())
            .collect();

        let mut sessions = self.sessions.lock();

        let replacing = replace.filter(|id| sessions.contains_key(*id));
        let failed: Vec<SessionId> = failed
            .into_iter()
            .filter(|id| sessions.contains_key(id) && replacing != Some(id))
            .collect();
        let occupied = sessions.len() - failed.len() - usize::from(replacing.is_some());
        if occupied >= self.max_sessions {
            return Err(StreamError::CapacityExceeded {
                max: self.max_sessions,
            });
        }

        let admitted = Admitted {
            replaced: replacing.and_then(|id| sessions.remove(id)),
            failed: failed.iter().filter_map(|id| sessions.remove(id)).collect(),
        };
        sessions.insert(session.id(), session);
        Ok(admitted)
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.lock().get(id).cloned()
    }

    /// Remove a session. At most one caller ever receives it.
    pub fn pop(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.lock().remove(id)
    }

    /// Remove and kill a session. Returns `false` if it was not registered.
    pub async fn pop_and_kill(&self, id: &SessionId) -> bool {
        match self.pop(id) {
            Some(session) => {
                session.kill_detached().await;
                true
            }
            None => false,
        }
    }

    /// Remove and kill every session matching `predicate`.
    ///
    /// The predicate runs on a snapshot without the lock held; sessions
    /// removed concurrently by someone else are skipped. Returns the number
    /// of sessions this call killed.
    pub async fn pop_and_kill_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Session) -> bool,
    {
        let selected: Vec<SessionId> = self
            .snapshot()
            .into_iter()
            .filter(|s| predicate(s.as_ref()))
            .map(|s| s.id())
            .collect();

        let popped: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock();
            selected.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        let count = popped.len();
        kill_all(popped).await;
        count
    }

    /// Remove and kill every session.
    pub async fn drain(&self) -> usize {
        let popped: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock();
            sessions.drain().map(|(_, session)| session).collect()
        };
        let count = popped.len();
        kill_all(popped).await;
        count
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// The registered sessions at this instant.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().values().cloned().collect()
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> =
            self.snapshot().iter().map(|s| s.summary()).collect();
        summaries.sort_by_key(|s| s.started_at);
        summaries
    }
}

/// Kill removed sessions in parallel, reporting any whose transcoder failed.
///
/// Every kill is spawned before anything is awaited.
pub async fn kill_all(sessions: Vec<Arc<Session>>) {
    let kills: Vec<_> = sessions
        .into_iter()
        .map(|session| {
            tokio::spawn(async move {
                if session.has_failed() {
                    let log = session.failure_log().await;
                    tracing::error!(
                        session_id = %session.id(),
                        source = %session.source().display(),
                        %log,
                        "Transcoder failed before producing output"
                    );
                }
                session.kill().await
            })
        })
        .collect();

    for result in join_all(kills).await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Session teardown task failed");
        }
    }
}
