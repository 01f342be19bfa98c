//! # Link health
//!
//! Consecutive-unreachable counter fed by the reachability prober, plus the
//! probe session plumbing the lifecycle monitors.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ModemError;

/// One probe round's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeEvent {
    /// The target answered within the round-trip ceiling.
    Reply,
    /// The round ended without an answer.
    Idle,
}

/// Counts probe rounds without a reply since the last one with a reply.
#[derive(Debug, Clone)]
pub struct HealthCounter {
    misses: u32,
    threshold: u32,
}

impl HealthCounter {
    pub fn new(threshold: u32) -> Self {
        HealthCounter {
            misses: 0,
            threshold,
        }
    }

    /// Apply a probe result. Returns `true` once the threshold is reached.
    pub fn record(&mut self, event: ProbeEvent) -> bool {
        match event {
            ProbeEvent::Reply => self.misses = 0,
            ProbeEvent::Idle => self.misses = self.misses.saturating_add(1),
        }
        self.is_tripped()
    }

    pub fn misses(&self) -> u32 {
        self.misses
    }

    pub fn is_tripped(&self) -> bool {
        self.misses >= self.threshold
    }

    pub fn reset(&mut self) {
        self.misses = 0;
    }
}

/// A running prober: a stream of [`ProbeEvent`]s, stopped on drop.
pub struct ProbeSession {
    events: mpsc::Receiver<ProbeEvent>,
    task: Option<JoinHandle<()>>,
}

impl ProbeSession {
    pub fn new(events: mpsc::Receiver<ProbeEvent>, task: Option<JoinHandle<()>>) -> Self {
        ProbeSession { events, task }
    }

    /// Next probe result, or `None` once the prober has stopped.
    pub async fn next(&mut self) -> Option<ProbeEvent> {
        self.events.recv().await
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.events.close();
    }
}

impl Drop for ProbeSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Periodic reachability probing of `target`, sourced from `source`.
#[async_trait]
pub trait ReachabilityProber: Send + Sync {
    async fn start(&self, source: Ipv4Addr, target: Ipv4Addr) -> Result<ProbeSession, ModemError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_idles_trip() {
        let mut h = HealthCounter::new(3);
        assert!(!h.record(ProbeEvent::Idle));
        assert!(!h.record(ProbeEvent::Idle));
        assert!(h.record(ProbeEvent::Idle));
        assert_eq!(h.misses(), 3);
    }

    #[test]
    fn reply_resets() {
        let mut h = HealthCounter::new(3);
        h.record(ProbeEvent::Idle);
        h.record(ProbeEvent::Idle);
        assert!(!h.record(ProbeEvent::Reply));
        assert_eq!(h.misses(), 0);
        assert!(!h.record(ProbeEvent::Idle));
        assert!(!h.is_tripped());
    }

    #[test]
    fn reset_clears() {
        let mut h = HealthCounter::new(1);
        assert!(h.record(ProbeEvent::Idle));
        h.reset();
        assert!(!h.is_tripped());
    }

    #[tokio::test]
    async fn session_yields_then_ends() {
        let (tx, rx) = mpsc::channel(4);
        let mut session = ProbeSession::new(rx, None);
        tx.send(ProbeEvent::Reply).await.unwrap();
        drop(tx);
        assert_eq!(session.next().await, Some(ProbeEvent::Reply));
        assert_eq!(session.next().await, None);
    }

    #[tokio::test]
    async fn stop_aborts_task() {
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(async move {
            loop {
                if tx.send(ProbeEvent::Idle).await.is_err() {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        });
        let mut session = ProbeSession::new(rx, Some(task));
        assert_eq!(session.next().await, Some(ProbeEvent::Idle));
        session.stop();
        while session.next().await.is_some() {}
    }
}
