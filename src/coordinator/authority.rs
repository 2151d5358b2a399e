//! Metadata authority tracking
//!
//! A coordinator node only drives resharding while it holds the metadata
//! authority. Gaining it (with a fresh term) rebuilds the instance registry
//! from the durable store; losing it destroys every running instance.

use crate::reshard::registry::Registry;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityRole {
    Follower,
    Leader,
}

impl std::fmt::Display for AuthorityRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthorityRole::Follower => write!(f, "follower"),
            AuthorityRole::Leader => write!(f, "leader"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Leadership {
    pub role: AuthorityRole,
    pub term: u64,
}

pub struct Authority {
    node_id: String,
    state: watch::Sender<Leadership>,
}

impl Authority {
    pub fn new(node_id: impl Into<String>) -> Self {
        let (state, _) = watch::channel(Leadership {
            role: AuthorityRole::Follower,
            term: 0,
        });
        Self {
            node_id: node_id.into(),
            state,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn current(&self) -> Leadership {
        *self.state.borrow()
    }

    pub fn is_leader(&self) -> bool {
        self.current().role == AuthorityRole::Leader
    }

    pub fn role(&self) -> AuthorityRole {
        self.current().role
    }

    pub fn term(&self) -> u64 {
        self.current().term
    }

    /// Take the authority under a new term
    pub fn become_leader(&self) -> u64 {
        let mut term = 0;
        self.state.send_modify(|s| {
            s.role = AuthorityRole::Leader;
            s.term += 1;
            term = s.term;
        });
        info!("Node {} is metadata authority for term {}", self.node_id, term);
        term
    }

    /// Give up the authority, keeping the current term
    pub fn step_down(&self) {
        self.state.send_if_modified(|s| {
            if s.role == AuthorityRole::Follower {
                return false;
            }
            s.role = AuthorityRole::Follower;
            true
        });
        info!("Node {} stepped down in term {}", self.node_id, self.term());
    }

    pub fn subscribe(&self) -> watch::Receiver<Leadership> {
        self.state.subscribe()
    }
}

/// Keep `registry` in line with the authority.
///
/// A new leader term stops whatever the previous term left running and
/// resumes every unfinished operation from the store.
pub fn start_authority_tasks(
    authority: &Authority,
    registry: Registry,
) -> tokio::task::JoinHandle<()> {
    let mut rx = authority.subscribe();
    let node_id = authority.node_id().to_string();

    tokio::spawn(async move {
        let mut served_term = None;

        loop {
            let leadership = *rx.borrow_and_update();
            match leadership.role {
                AuthorityRole::Leader if served_term != Some(leadership.term) => {
                    registry.step_down().await;
                    match registry.recover() {
                        Ok(resumed) => info!(
                            "Node {} resumed {} operations for term {}",
                            node_id, resumed, leadership.term
                        ),
                        Err(e) => error!(
                            "Node {} failed to recover operations for term {}: {}",
                            node_id, leadership.term, e
                        ),
                    }
                    served_term = Some(leadership.term);
                }
                AuthorityRole::Leader => {}
                AuthorityRole::Follower => {
                    if served_term.take().is_some() {
                        let stopped = registry.step_down().await;
                        info!(
                            "Node {} stopped {} operations after stepping down",
                            node_id, stopped
                        );
                    }
                }
            }

            if rx.changed().await.is_err() {
                registry.step_down().await;
                break;
            }
        }
    })
}
