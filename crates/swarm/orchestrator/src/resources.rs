//! Resource claims and conflict resolution across active orchestrations.
//!
//! An orchestration claims its trigger source plus every affected
//! component. Two claims on the same resource conflict; the configured
//! [`ConflictPolicy`] orders the two and the loser defers its
//! recovery-type components until it owns what it claimed.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use swarm_types::OrchestrationId;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::ConflictPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both claim the same resource.
    Resource,
    /// One claims the other's trigger source.
    Dependency,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::Resource => write!(f, "resource"),
            ConflictKind::Dependency => write!(f, "dependency"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConflict {
    pub kind: ConflictKind,
    pub resource: String,
    /// Keeps the resource.
    pub winner: OrchestrationId,
    /// Waits for the resource.
    pub deferred: OrchestrationId,
    pub policy: ConflictPolicy,
    pub detected_at: DateTime<Utc>,
}

/// What an orchestration holds, plus what the policies compare.
#[derive(Debug, Clone)]
pub struct Claim {
    pub id: OrchestrationId,
    pub source: String,
    pub resources: BTreeSet<String>,
    pub priority: u8,
    pub confidence: f64,
    /// Admission order.
    seq: u64,
}

impl Claim {
    pub fn new(
        id: OrchestrationId,
        source: impl Into<String>,
        resources: impl IntoIterator<Item = String>,
        priority: u8,
        confidence: f64,
    ) -> Self {
        let source = source.into();
        let mut resources: BTreeSet<String> = resources.into_iter().collect();
        resources.insert(source.clone());
        Self {
            id,
            source,
            resources,
            priority,
            confidence,
            seq: 0,
        }
    }
}

/// `Less` when `a` keeps a contested resource over `b`.
fn precedence(policy: ConflictPolicy, a: &Claim, b: &Claim) -> CmpOrdering {
    let first_come = a.seq.cmp(&b.seq);
    match policy {
        ConflictPolicy::FirstCome => first_come,
        ConflictPolicy::Priority => b.priority.cmp(&a.priority).then(first_come),
        ConflictPolicy::Consensus => b
            .confidence
            .total_cmp(&a.confidence)
            .then(first_come),
    }
}

type ConflictKey = (String, OrchestrationId, OrchestrationId);

#[derive(Default)]
struct LedgerInner {
    claims: Vec<Claim>,
    next_seq: u64,
    /// Conflicts already reported.
    known: HashSet<ConflictKey>,
}

#[derive(Default)]
pub struct ResourceLedger {
    inner: Mutex<LedgerInner>,
    released: Notify,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, mut claim: Claim) {
        let mut inner = self.inner.lock();
        claim.seq = inner.next_seq;
        inner.next_seq += 1;
        inner.claims.retain(|c| c.id != claim.id);
        inner.claims.push(claim);
    }

    /// Add resources to an existing claim, e.g. after detection.
    pub fn extend(&self, id: &OrchestrationId, resources: impl IntoIterator<Item = String>) {
        let mut inner = self.inner.lock();
        if let Some(claim) = inner.claims.iter_mut().find(|c| &c.id == id) {
            claim.resources.extend(resources);
        }
    }

    /// Drop a claim and wake deferred orchestrations.
    pub fn release(&self, id: &OrchestrationId) {
        {
            let mut inner = self.inner.lock();
            inner.claims.retain(|c| &c.id != id);
            inner.known.retain(|(_, a, b)| a != id && b != id);
        }
        self.released.notify_waiters();
    }

    pub fn resources_of(&self, id: &OrchestrationId) -> Vec<String> {
        self.inner
            .lock()
            .claims
            .iter()
            .find(|c| &c.id == id)
            .map(|c| c.resources.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every current conflict, resolved under `policy`.
    pub fn conflicts(&self, policy: ConflictPolicy) -> Vec<ResourceConflict> {
        let inner = self.inner.lock();
        scan(&inner.claims, policy, Utc::now())
    }

    /// Conflicts `id` currently loses.
    pub fn blockers(&self, id: &OrchestrationId, policy: ConflictPolicy) -> Vec<ResourceConflict> {
        self.conflicts(policy)
            .into_iter()
            .filter(|c| &c.deferred == id)
            .collect()
    }

    /// Scan and return only conflicts not reported before.
    pub fn new_conflicts(&self, policy: ConflictPolicy) -> Vec<ResourceConflict> {
        let mut inner = self.inner.lock();
        let found = scan(&inner.claims, policy, Utc::now());
        found
            .into_iter()
            .filter(|c| {
                inner
                    .known
                    .insert((c.resource.clone(), c.winner.clone(), c.deferred.clone()))
            })
            .collect()
    }

    /// Wait until `id` loses no conflict, at most `timeout`. Returns whether
    /// the resources were obtained and how long it waited.
    pub async fn wait_until_owned(
        &self,
        id: &OrchestrationId,
        policy: ConflictPolicy,
        timeout: Duration,
    ) -> (bool, Duration) {
        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.blockers(id, policy).is_empty() {
                return (true, started.elapsed());
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return (false, started.elapsed());
            }
        }
    }
}

fn scan(claims: &[Claim], policy: ConflictPolicy, now: DateTime<Utc>) -> Vec<ResourceConflict> {
    let mut conflicts = Vec::new();
    for (i, a) in claims.iter().enumerate() {
        for b in &claims[i + 1..] {
            for resource in a.resources.intersection(&b.resources) {
                let (winner, deferred) = match precedence(policy, a, b) {
                    CmpOrdering::Greater => (b, a),
                    _ => (a, b),
                };
                let kind = if (resource == &a.source) != (resource == &b.source) {
                    ConflictKind::Dependency
                } else {
                    ConflictKind::Resource
                };
                conflicts.push(ResourceConflict {
                    kind,
                    resource: resource.clone(),
                    winner: winner.id.clone(),
                    deferred: deferred.id.clone(),
                    policy,
                    detected_at: now,
                });
            }
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn claim(source: &str, resources: &[&str], priority: u8, confidence: f64) -> Claim {
        Claim::new(
            OrchestrationId::generate(),
            source,
            resources.iter().map(|r| r.to_string()),
            priority,
            confidence,
        )
    }

    #[test]
    fn test_first_come_keeps_resource() {
        let ledger = ResourceLedger::new();
        let a = claim("db", &[], 0, 0.5);
        let b = claim("db", &[], 3, 0.9);
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        ledger.claim(a);
        ledger.claim(b);

        let conflicts = ledger.conflicts(ConflictPolicy::FirstCome);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::Resource);
        assert_eq!(conflicts[0].winner, a_id);
        assert!(ledger.blockers(&a_id, ConflictPolicy::FirstCome).is_empty());
        assert_eq!(ledger.blockers(&b_id, ConflictPolicy::FirstCome).len(), 1);
    }

    #[test]
    fn test_priority_and_consensus_policies() {
        let ledger = ResourceLedger::new();
        let low = claim("api", &["db"], 1, 0.9);
        let high = claim("worker", &["db"], 3, 0.4);
        let (low_id, high_id) = (low.id.clone(), high.id.clone());
        ledger.claim(low);
        ledger.claim(high);

        let by_priority = ledger.conflicts(ConflictPolicy::Priority);
        assert_eq!(by_priority.len(), 1);
        assert_eq!(by_priority[0].resource, "db");
        assert_eq!(by_priority[0].winner, high_id);
        assert_eq!(by_priority[0].deferred, low_id);

        let by_consensus = ledger.conflicts(ConflictPolicy::Consensus);
        assert_eq!(by_consensus[0].winner, low_id);
    }

    #[test]
    fn test_claiming_another_source_is_dependency_conflict() {
        let ledger = ResourceLedger::new();
        ledger.claim(claim("db", &[], 2, 1.0));
        ledger.claim(claim("api", &["db"], 2, 1.0));
        let conflicts = ledger.conflicts(ConflictPolicy::FirstCome);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::Dependency);
    }

    #[test]
    fn test_new_conflicts_reported_once() {
        let ledger = ResourceLedger::new();
        let a = claim("db", &[], 0, 1.0);
        let a_id = a.id.clone();
        ledger.claim(a);
        ledger.claim(claim("db", &[], 0, 1.0));

        assert_eq!(ledger.new_conflicts(ConflictPolicy::FirstCome).len(), 1);
        assert!(ledger.new_conflicts(ConflictPolicy::FirstCome).is_empty());

        ledger.release(&a_id);
        assert!(ledger.conflicts(ConflictPolicy::FirstCome).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_claim_proceeds_on_release() {
        let ledger = Arc::new(ResourceLedger::new());
        let winner = claim("db", &[], 0, 1.0);
        let loser = claim("db", &[], 0, 1.0);
        let (winner_id, loser_id) = (winner.id.clone(), loser.id.clone());
        ledger.claim(winner);
        ledger.claim(loser);

        let releaser = ledger.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            releaser.release(&winner_id);
        });

        let (owned, waited) = ledger
            .wait_until_owned(&loser_id, ConflictPolicy::FirstCome, Duration::from_secs(10))
            .await;
        assert!(owned);
        assert!(waited >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferral_is_bounded() {
        let ledger = ResourceLedger::new();
        ledger.claim(claim("db", &[], 0, 1.0));
        let loser = claim("db", &[], 0, 1.0);
        let loser_id = loser.id.clone();
        ledger.claim(loser);

        let (owned, waited) = ledger
            .wait_until_owned(&loser_id, ConflictPolicy::FirstCome, Duration::from_secs(3))
            .await;
        assert!(!owned);
        assert!(waited >= Duration::from_secs(3));
    }
}
