//! End-to-end scheduler scenarios that need a real `Scheduler::run()` loop
//! rather than a single `tick()` call.

use async_trait::async_trait;
use p1gen::error::Result;
use p1gen::registry::{Consumer, Policy, PolicyInfo, Producer, Registry};
use p1gen::scheduler::Scheduler;
use p1gen::situation::{Budget, Situation};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

struct SlowProducer {
    delay: Duration,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Producer for SlowProducer {
    fn name(&self) -> &str {
        "slow"
    }
    async fn poll(&mut self, _situation: &mut Situation) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

struct FixedPolicy;
impl Policy for FixedPolicy {
    fn info(&self) -> PolicyInfo {
        PolicyInfo {
            name: "fixed".into(),
            icon: String::new(),
            label: String::new(),
            description: String::new(),
        }
    }
    fn apply(&self, _situation: &Situation) -> Result<Budget> {
        Ok(Budget::new(1.0))
    }
}

struct NopConsumer;
#[async_trait]
impl Consumer for NopConsumer {
    fn name(&self) -> &str {
        "nop"
    }
    async fn handle(&mut self, _budget: &Budget, _situation: &Situation) -> Result<()> {
        Ok(())
    }
}

/// Scenario F — a producer that overruns its deadline must not trigger a
/// catch-up burst: two ticks at a 1500ms-sleeping producer with a 200ms
/// interval should still only observe a small, bounded number of calls in a
/// short wall-clock window, not a backlog flush.
#[tokio::test(flavor = "multi_thread")]
async fn tick_overrun_does_not_trigger_a_catch_up_burst() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = Registry::new();
    registry.register_producer(Box::new(SlowProducer {
        delay: Duration::from_millis(300),
        calls: calls.clone(),
    }));
    let idx = registry.register_policy(Box::new(FixedPolicy));
    registry.set_active_policy(idx);
    registry.register_consumer(Box::new(NopConsumer));

    let registry = Arc::new(Mutex::new(registry));
    let scheduler = Arc::new(Scheduler::new(registry, Duration::from_millis(100), 3));

    let run_handle = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    tokio::time::sleep(Duration::from_millis(700)).await;
    run_handle.abort();

    // At a 300ms tick duration over a 700ms window, at most 2-3 ticks can
    // possibly complete; a catch-up burst would instead run many ticks
    // back-to-back as soon as the deadline passed each time.
    assert!(calls.load(Ordering::SeqCst) <= 3);
}

/// Scenario D — switching the active policy mid-run takes effect on the very
/// next tick, and the budget from the tick before the switch remains the
/// last-observed value until that next tick completes.
#[tokio::test]
async fn policy_switch_takes_effect_on_the_next_tick() {
    struct NamedPolicy(&'static str, f64);
    impl Policy for NamedPolicy {
        fn info(&self) -> PolicyInfo {
            PolicyInfo {
                name: self.0.to_string(),
                icon: String::new(),
                label: String::new(),
                description: String::new(),
            }
        }
        fn apply(&self, _situation: &Situation) -> Result<Budget> {
            Ok(Budget::new(self.1))
        }
    }

    let mut registry = Registry::new();
    let red = registry.register_policy(Box::new(NamedPolicy("red", 4.0)));
    let yellow = registry.register_policy(Box::new(NamedPolicy("yellow", 9.0)));
    registry.set_active_policy(red);

    let registry = Arc::new(Mutex::new(registry));
    let scheduler = Scheduler::new(registry.clone(), Duration::from_millis(10), 3);

    scheduler.tick().await;
    assert_eq!(registry.lock().await.snapshot_budget().current, 4.0);

    registry.lock().await.set_active_policy(yellow);
    // Budget must still read as the previous tick's value until the next
    // tick actually runs.
    assert_eq!(registry.lock().await.snapshot_budget().current, 4.0);

    scheduler.tick().await;
    assert_eq!(registry.lock().await.snapshot_budget().current, 9.0);
    assert_eq!(
        registry.lock().await.active_policy_name().as_deref(),
        Some("yellow")
    );
}
