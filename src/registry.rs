//! Process-wide registry of producers, policies, and consumers.
//!
//! The registry is the single piece of shared, mutable state in the
//! control plane. Everything else (the scheduler, the RPC handlers)
//! dispatches through it under one mutual-exclusion primitive.

use crate::error::{ControllerError, Result};
use crate::situation::{Budget, Situation};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// Metadata a policy exposes for the `/api/policies` listing and the settings UI.
#[derive(Debug, Clone)]
pub struct PolicyInfo {
    pub name: String,
    pub icon: String,
    pub label: String,
    /// HTML permitted, with inline settings-editor placeholders.
    pub description: String,
}

/// Before each tick, writes fresh measurements into the shared [`Situation`].
#[async_trait]
pub trait Producer: Send + Sync {
    fn name(&self) -> &str;
    async fn poll(&mut self, situation: &mut Situation) -> Result<()>;
}

/// Given a [`Situation`], computes a [`Budget`].
pub trait Policy: Send + Sync {
    fn info(&self) -> PolicyInfo;
    fn apply(&self, situation: &Situation) -> Result<Budget>;
}

/// Given the resulting [`Budget`] and [`Situation`], drives downstream hardware.
#[async_trait]
pub trait Consumer: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&mut self, budget: &Budget, situation: &Situation) -> Result<()>;
}

/// `index = (max existing index) + 1`, or `0` if the map is empty.
fn next_index<V>(map: &BTreeMap<u32, V>) -> u32 {
    map.keys().next_back().map_or(0, |max| max + 1)
}

/// The process-wide, mutex-guarded collection of producers, policies, and consumers.
///
/// Callers are expected to wrap this in `Arc<tokio::sync::Mutex<Registry>>` and
/// hold the lock across an entire tick, per the control cycle's ordering guarantees.
#[derive(Default)]
pub struct Registry {
    producers: BTreeMap<u32, Box<dyn Producer>>,
    policies: BTreeMap<u32, Box<dyn Policy>>,
    consumers: BTreeMap<u32, Box<dyn Consumer>>,
    active_policy: Option<u32>,
    last_budget: Budget,
    last_situation: Option<Situation>,
    tick_count: u64,
    last_tick_duration: Duration,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a producer, evicting any existing entry with the same name (overrule).
    pub fn register_producer(&mut self, producer: Box<dyn Producer>) -> u32 {
        let name = producer.name().to_string();
        self.evict_by_name_producer(&name);
        let index = next_index(&self.producers);
        self.producers.insert(index, producer);
        index
    }

    pub fn unregister_producer(&mut self, index: u32) {
        self.producers.remove(&index);
    }

    /// Register a policy, evicting any existing entry with the same name (overrule).
    pub fn register_policy(&mut self, policy: Box<dyn Policy>) -> u32 {
        let name = policy.info().name;
        self.evict_by_name_policy(&name);
        let index = next_index(&self.policies);
        self.policies.insert(index, policy);
        index
    }

    pub fn unregister_policy(&mut self, index: u32) {
        self.policies.remove(&index);
        if self.active_policy == Some(index) {
            self.active_policy = None;
        }
    }

    /// Register a consumer, evicting any existing entry with the same name (overrule).
    pub fn register_consumer(&mut self, consumer: Box<dyn Consumer>) -> u32 {
        let name = consumer.name().to_string();
        self.evict_by_name_consumer(&name);
        let index = next_index(&self.consumers);
        self.consumers.insert(index, consumer);
        index
    }

    pub fn unregister_consumer(&mut self, index: u32) {
        self.consumers.remove(&index);
    }

    fn evict_by_name_producer(&mut self, name: &str) {
        if let Some(&idx) = self
            .producers
            .iter()
            .find(|(_, p)| p.name() == name)
            .map(|(idx, _)| idx)
        {
            warn!("Overruling previous producer registration for '{name}'");
            self.producers.remove(&idx);
        }
    }

    fn evict_by_name_policy(&mut self, name: &str) {
        if let Some(&idx) = self
            .policies
            .iter()
            .find(|(_, p)| p.info().name == name)
            .map(|(idx, _)| idx)
        {
            warn!("Overruling previous policy registration for '{name}'");
            self.policies.remove(&idx);
        }
    }

    fn evict_by_name_consumer(&mut self, name: &str) {
        if let Some(&idx) = self
            .consumers
            .iter()
            .find(|(_, c)| c.name() == name)
            .map(|(idx, _)| idx)
        {
            warn!("Overruling previous consumer registration for '{name}'");
            self.consumers.remove(&idx);
        }
    }

    /// Set the active policy index. Does not validate the index exists; an
    /// unknown index is detected and logged at the next tick (§4.1 failure semantics).
    pub fn set_active_policy(&mut self, index: u32) {
        self.active_policy = Some(index);
    }

    pub fn get_active_policy(&self) -> Option<u32> {
        self.active_policy
    }

    /// Policies in index order, for `GET /api/policies`.
    pub fn list_policies(&self) -> Vec<(u32, PolicyInfo)> {
        self.policies
            .iter()
            .map(|(&idx, p)| (idx, p.info()))
            .collect()
    }

    pub fn snapshot_budget(&self) -> Budget {
        self.last_budget
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Producer indices in ascending order, for driving one tick.
    pub fn producer_indices(&self) -> Vec<u32> {
        self.producers.keys().copied().collect()
    }

    /// Consumer indices in ascending order, for driving one tick.
    pub fn consumer_indices(&self) -> Vec<u32> {
        self.consumers.keys().copied().collect()
    }

    pub fn producer_mut(&mut self, index: u32) -> Option<&mut Box<dyn Producer>> {
        self.producers.get_mut(&index)
    }

    pub fn consumer_mut(&mut self, index: u32) -> Option<&mut Box<dyn Consumer>> {
        self.consumers.get_mut(&index)
    }

    pub fn policy(&self, index: u32) -> Option<&dyn Policy> {
        self.policies.get(&index).map(|p| p.as_ref())
    }

    pub fn set_last_budget(&mut self, budget: Budget) {
        self.last_budget = budget;
    }

    pub fn set_last_situation(&mut self, situation: Situation) {
        self.last_situation = Some(situation);
    }

    /// The most recently observed [`Situation`], for the `/api/monitor` and
    /// `/api/curcap` projections. `None` before the first tick completes.
    pub fn snapshot_situation(&self) -> Option<&Situation> {
        self.last_situation.as_ref()
    }

    pub fn increment_tick_count(&mut self) -> u64 {
        self.tick_count += 1;
        self.tick_count
    }

    pub fn set_last_tick_duration(&mut self, duration: Duration) {
        self.last_tick_duration = duration;
    }

    /// Wall-clock time the most recently completed tick took to run its
    /// producers, policy, and consumers. `Duration::ZERO` before the first
    /// tick completes.
    pub fn last_tick_duration(&self) -> Duration {
        self.last_tick_duration
    }

    /// Unregister every producer, policy, and consumer in LIFO order (highest index first).
    pub fn unregister_all(&mut self) {
        for idx in self.consumers.keys().copied().rev().collect::<Vec<_>>() {
            self.unregister_consumer(idx);
        }
        for idx in self.policies.keys().copied().rev().collect::<Vec<_>>() {
            self.unregister_policy(idx);
        }
        for idx in self.producers.keys().copied().rev().collect::<Vec<_>>() {
            self.unregister_producer(idx);
        }
    }

    pub fn active_policy_name(&self) -> Option<String> {
        self.active_policy
            .and_then(|idx| self.policies.get(&idx))
            .map(|p| p.info().name)
    }

    /// Look up the active policy, surfacing the "unknown index" case as an error
    /// so the scheduler can log it and hold the previous budget.
    pub fn active_policy_or_err(&self) -> Result<&dyn Policy> {
        let idx = self
            .active_policy
            .ok_or_else(|| ControllerError::generic("no active policy set"))?;
        self.policies
            .get(&idx)
            .map(|p| p.as_ref())
            .ok_or_else(|| ControllerError::policy_not_found(idx))
    }
}
