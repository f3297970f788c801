//! Bounded convergence polling
//!
//! The backend settles asynchronously, so every check against the dashboard
//! is a poll: refresh a snapshot, project it, and either stop or sleep until
//! the next tick. The deadline is fixed when polling starts and the
//! condition is always evaluated at least once.

use std::fmt::Debug;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

use crate::error::{E2eError, E2eResult};

/// Label, tick interval and overall deadline of one wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSpec {
    pub label: String,
    pub interval: Duration,
    pub timeout: Duration,
}

/// Distinct observations made while tracking a value, in first-seen order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trajectory<K> {
    pub seen: Vec<K>,
    pub last: Option<K>,
    /// Whether the completion condition was met before the deadline
    pub converged: bool,
    label: String,
    ticks: u32,
    waited_ms: u64,
}

impl<K> Default for Trajectory<K> {
    fn default() -> Self {
        Self {
            seen: Vec::new(),
            last: None,
            converged: false,
            label: String::new(),
            ticks: 0,
            waited_ms: 0,
        }
    }
}

impl<K: Clone + PartialEq + Debug> Trajectory<K> {
    /// Trajectory that already contains a value observed before polling began
    pub fn seeded(initial: K) -> Self {
        let mut trajectory = Self::default();
        trajectory.record(initial);
        trajectory
    }

    pub fn record(&mut self, key: K) {
        if !self.seen.contains(&key) {
            self.seen.push(key.clone());
        }
        self.last = Some(key);
    }

    pub fn contains(&self, key: &K) -> bool {
        self.seen.contains(key)
    }

    /// Turn a trajectory that ran out of time into a timeout error
    pub fn require_converged(self) -> E2eResult<Self> {
        if self.converged {
            return Ok(self);
        }
        Err(E2eError::ConvergenceTimeout {
            label: self.label,
            waited_ms: self.waited_ms,
            ticks: self.ticks,
            last_seen: format!("{:?}", self.seen),
        })
    }
}

impl PollSpec {
    pub fn new(label: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        Self {
            label: label.into(),
            interval,
            timeout,
        }
    }

    /// Poll until `project` yields a value.
    ///
    /// Errors from `refresh` or `project` end the wait immediately. On
    /// timeout the last snapshot is reported in the error.
    pub async fn until<C, S, T, R, P>(&self, ctx: &mut C, mut refresh: R, mut project: P) -> E2eResult<T>
    where
        C: Send,
        S: Debug,
        R: for<'c> FnMut(&'c mut C) -> BoxFuture<'c, E2eResult<S>>,
        P: FnMut(&S) -> E2eResult<Option<T>>,
    {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut ticks = 0u32;

        loop {
            ticks += 1;
            let snapshot = refresh(ctx).await?;
            if let Some(value) = project(&snapshot)? {
                debug!("{} converged after {} polls", self.label, ticks);
                return Ok(value);
            }
            trace!("{}: poll {} not yet converged", self.label, ticks);

            let now = Instant::now();
            if now >= deadline {
                return Err(self.timed_out(started, ticks, format!("{:?}", snapshot)));
            }
            sleep(self.interval.min(deadline - now)).await;
        }
    }

    /// Poll a changing value, recording every distinct key seen, until `done`
    /// accepts the trajectory or the deadline passes.
    ///
    /// The trajectory is returned either way; `converged` tells which.
    /// `key` may fail to signal an observation that must abort tracking.
    pub async fn track<C, S, K, R, F, D>(
        &self,
        ctx: &mut C,
        mut trajectory: Trajectory<K>,
        mut refresh: R,
        mut key: F,
        mut done: D,
    ) -> E2eResult<Trajectory<K>>
    where
        C: Send,
        K: Clone + PartialEq + Debug,
        R: for<'c> FnMut(&'c mut C) -> BoxFuture<'c, E2eResult<S>>,
        F: FnMut(&S) -> E2eResult<K>,
        D: FnMut(&Trajectory<K>) -> bool,
    {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut ticks = 0u32;

        loop {
            ticks += 1;
            let snapshot = refresh(ctx).await?;
            let observed = key(&snapshot)?;
            if trajectory.last.as_ref() != Some(&observed) {
                debug!("{}: observed {:?}", self.label, observed);
            }
            trajectory.record(observed);

            let converged = done(&trajectory);
            let now = Instant::now();
            if converged || now >= deadline {
                trajectory.converged = converged;
                trajectory.label = self.label.clone();
                trajectory.ticks = ticks;
                trajectory.waited_ms = started.elapsed().as_millis() as u64;
                if !converged {
                    debug!("{} did not converge after {} polls: {:?}", self.label, ticks, trajectory.seen);
                }
                return Ok(trajectory);
            }
            sleep(self.interval.min(deadline - now)).await;
        }
    }

    fn timed_out(&self, started: Instant, ticks: u32, last_seen: String) -> E2eError {
        E2eError::ConvergenceTimeout {
            label: self.label.clone(),
            waited_ms: started.elapsed().as_millis() as u64,
            ticks,
            last_seen,
        }
    }
}
