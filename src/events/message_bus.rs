use super::registry::{SubscriberRegistry, Subscription};
use super::Subscriber;
use crate::config::BusConfig;
use crate::utils::errors::BusError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::type_name;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// What a publish does when a handler returns an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first failing handler and return its error.
    #[default]
    FailFast,
    /// Deliver to every capable subscriber and report all failures together.
    Isolate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusStats {
    pub total_publishes: u64,
    pub publishes_by_type: HashMap<&'static str, u64>,
    /// Handler invocations across all publishes, failed ones included
    pub deliveries: u64,
    pub failed_deliveries: u64,
    pub pruned_subscribers: u64,
    pub subscriber_count: usize,
}

#[derive(Debug, Default)]
struct Counters {
    total_publishes: u64,
    publishes_by_type: HashMap<&'static str, u64>,
    deliveries: u64,
    failed_deliveries: u64,
}

/// In-process bus routing messages by their runtime type.
///
/// Subscribers are held weakly; a publish delivers to every live subscriber
/// whose [`Subscriber::dispatch`] accepts the message type, in registration
/// order. The registry lock is only held while taking a snapshot of the
/// subscribers, so handlers are free to subscribe, unsubscribe or publish
/// from inside a delivery.
#[derive(Debug)]
pub struct MessageBus {
    registry: SubscriberRegistry,
    failure_policy: FailurePolicy,
    counters: Mutex<Counters>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_config(&BusConfig::default())
    }

    pub fn with_config(config: &BusConfig) -> Self {
        info!(
            "Message bus created (failure policy: {:?}, dedupe: {})",
            config.failure_policy, config.dedupe_subscriptions
        );

        Self {
            registry: SubscriberRegistry::with_dedupe(config.dedupe_subscriptions),
            failure_policy: config.failure_policy,
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn subscribe<S: Subscriber>(&self, subscriber: &Arc<S>) -> Subscription {
        self.registry.add(subscriber)
    }

    pub fn subscribe_dyn(&self, subscriber: &Arc<dyn Subscriber>) -> Subscription {
        self.registry.add_dyn(subscriber)
    }

    /// Remove the first registration of `subscriber`. Unknown subscribers are
    /// ignored.
    pub fn unsubscribe<S: Subscriber + ?Sized>(&self, subscriber: &Arc<S>) -> bool {
        self.registry.remove(subscriber)
    }

    /// Live subscribers currently registered
    pub fn subscriber_count(&self) -> usize {
        self.registry.live_count()
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    /// Deliver `message` synchronously to every capable subscriber and hand
    /// it back, including any changes handlers made to it.
    pub fn publish<M: 'static>(&self, mut message: M) -> Result<M, BusError> {
        let message_type = type_name::<M>();
        let subscribers = self.registry.snapshot();
        trace!(
            "Publishing {} to {} subscriber(s)",
            message_type,
            subscribers.len()
        );

        let mut delivered = 0u64;
        let mut failures = Vec::new();

        for subscriber in &subscribers {
            match subscriber.dispatch(&mut message) {
                None => continue,
                Some(Ok(())) => delivered += 1,
                Some(Err(error)) => {
                    delivered += 1;
                    if let Some(abort) = self.on_failure(message_type, error, &mut failures) {
                        self.record(message_type, delivered, 1);
                        return Err(abort);
                    }
                }
            }
        }

        self.finish(message_type, delivered, failures)?;
        Ok(message)
    }

    /// Like [`publish`](Self::publish), using the asynchronous handlers.
    /// Each handler is awaited before the next one starts.
    pub async fn publish_async<M: Send + 'static>(&self, mut message: M) -> Result<M, BusError> {
        let message_type = type_name::<M>();
        let subscribers = self.registry.snapshot();
        trace!(
            "Publishing {} (async) to {} subscriber(s)",
            message_type,
            subscribers.len()
        );

        let mut delivered = 0u64;
        let mut failures = Vec::new();

        for subscriber in &subscribers {
            let Some(handler) = subscriber.dispatch_async(&mut message) else {
                continue;
            };

            delivered += 1;
            if let Err(error) = handler.await
                && let Some(abort) = self.on_failure(message_type, error, &mut failures)
            {
                self.record(message_type, delivered, 1);
                return Err(abort);
            }
        }

        self.finish(message_type, delivered, failures)?;
        Ok(message)
    }

    pub fn stats(&self) -> BusStats {
        let counters = self.counters.lock();
        BusStats {
            total_publishes: counters.total_publishes,
            publishes_by_type: counters.publishes_by_type.clone(),
            deliveries: counters.deliveries,
            failed_deliveries: counters.failed_deliveries,
            pruned_subscribers: self.registry.pruned_count(),
            subscriber_count: self.subscriber_count(),
        }
    }

    /// Returns the error to abort with under fail-fast, otherwise keeps the
    /// failure for the final report.
    fn on_failure(
        &self,
        message_type: &'static str,
        error: anyhow::Error,
        failures: &mut Vec<anyhow::Error>,
    ) -> Option<BusError> {
        match self.failure_policy {
            FailurePolicy::FailFast => {
                warn!("Handler for {} failed, aborting delivery: {}", message_type, error);
                Some(BusError::Handler {
                    message_type,
                    source: error,
                })
            }
            FailurePolicy::Isolate => {
                warn!("Handler for {} failed: {}", message_type, error);
                failures.push(error);
                None
            }
        }
    }

    fn finish(
        &self,
        message_type: &'static str,
        delivered: u64,
        failures: Vec<anyhow::Error>,
    ) -> Result<(), BusError> {
        self.record(message_type, delivered, failures.len() as u64);

        if failures.is_empty() {
            if delivered == 0 {
                trace!("No subscriber handled {}", message_type);
            }
            Ok(())
        } else {
            debug!(
                "{} of {} handler(s) for {} failed",
                failures.len(),
                delivered,
                message_type
            );
            Err(BusError::Handlers {
                message_type,
                failures,
            })
        }
    }

    fn record(&self, message_type: &'static str, delivered: u64, failed: u64) {
        let mut counters = self.counters.lock();
        counters.total_publishes += 1;
        *counters.publishes_by_type.entry(message_type).or_insert(0) += 1;
        counters.deliveries += delivered;
        counters.failed_deliveries += failed;
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{HandleMessage, HandleMessageAsync};
    use crate::handles;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Greeting(String);

    struct Tick;

    #[derive(Default)]
    struct Counter(Vec<String>);

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Listener {
        name: &'static str,
        journal: Journal,
        fail: bool,
    }

    impl Listener {
        fn new(name: &'static str, journal: &Journal) -> Arc<Self> {
            Arc::new(Self {
                name,
                journal: Arc::clone(journal),
                fail: false,
            })
        }

        fn failing(name: &'static str, journal: &Journal) -> Arc<Self> {
            Arc::new(Self {
                name,
                journal: Arc::clone(journal),
                fail: true,
            })
        }
    }

    impl HandleMessage<Greeting> for Listener {
        fn handle(&self, message: &mut Greeting) -> Result<()> {
            self.journal.lock().push(self.name.to_string());
            if self.fail {
                return Err(anyhow!("{} refused the greeting", self.name));
            }
            message.0.push_str(self.name);
            Ok(())
        }
    }

    #[async_trait]
    impl HandleMessageAsync<Counter> for Listener {
        async fn handle_async(&self, message: &mut Counter) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.journal.lock().push(format!("{}-async", self.name));
            message.0.push(self.name.to_string());
            if self.fail {
                return Err(anyhow!("{} failed asynchronously", self.name));
            }
            Ok(())
        }
    }

    handles!(Listener => [Greeting]; async [Counter]);

    fn journal() -> Journal {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn isolating_bus() -> MessageBus {
        MessageBus::with_config(&BusConfig {
            failure_policy: FailurePolicy::Isolate,
            dedupe_subscriptions: false,
        })
    }

    #[test]
    fn test_publish_delivers_in_registration_order() {
        let bus = MessageBus::new();
        let journal = journal();
        let first = Listener::new("a", &journal);
        let second = Listener::new("b", &journal);
        let _s1 = bus.subscribe(&first);
        let _s2 = bus.subscribe(&second);

        let message = bus.publish(Greeting(String::new())).unwrap();

        // Handlers see and mutate the same message value
        assert_eq!(message, Greeting("ab".to_string()));
        assert_eq!(*journal.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_publish_without_subscribers_returns_message() {
        let bus = MessageBus::new();
        let message = bus.publish(Greeting("unchanged".into())).unwrap();
        assert_eq!(message.0, "unchanged");
    }

    #[test]
    fn test_publish_skips_incapable_subscribers() {
        let bus = MessageBus::new();
        let journal = journal();
        let listener = Listener::new("a", &journal);
        let _sub = bus.subscribe(&listener);

        bus.publish(Tick).unwrap();

        assert!(journal.lock().is_empty());
        assert_eq!(bus.stats().deliveries, 0);
    }

    #[test]
    fn test_duplicate_subscription_delivers_twice() {
        let bus = MessageBus::new();
        let journal = journal();
        let listener = Listener::new("a", &journal);
        let _s1 = bus.subscribe(&listener);
        let _s2 = bus.subscribe(&listener);

        bus.publish(Greeting(String::new())).unwrap();

        assert_eq!(journal.lock().len(), 2);
    }

    #[test]
    fn test_dedupe_config_delivers_once() {
        let bus = MessageBus::with_config(&BusConfig {
            failure_policy: FailurePolicy::FailFast,
            dedupe_subscriptions: true,
        });
        let journal = journal();
        let listener = Listener::new("a", &journal);
        let _s1 = bus.subscribe(&listener);
        let _s2 = bus.subscribe(&listener);

        bus.publish(Greeting(String::new())).unwrap();

        assert_eq!(journal.lock().len(), 1);
    }

    #[test]
    fn test_dedupe_dropping_repeat_handle_keeps_delivery() {
        let bus = MessageBus::with_config(&BusConfig {
            failure_policy: FailurePolicy::FailFast,
            dedupe_subscriptions: true,
        });
        let journal = journal();
        let listener = Listener::new("a", &journal);
        let _kept = bus.subscribe(&listener);
        drop(bus.subscribe(&listener));

        bus.publish(Greeting(String::new())).unwrap();

        assert_eq!(*journal.lock(), vec!["a"]);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = MessageBus::new();
        let journal = journal();
        let listener = Listener::new("a", &journal);
        bus.subscribe(&listener).detach();

        bus.publish(Greeting(String::new())).unwrap();
        assert!(bus.unsubscribe(&listener));
        bus.publish(Greeting(String::new())).unwrap();

        assert_eq!(journal.lock().len(), 1);
        assert!(!bus.unsubscribe(&listener));
    }

    #[test]
    fn test_dropped_subscriber_is_pruned_on_publish() {
        let bus = MessageBus::new();
        let journal = journal();
        let listener = Listener::new("a", &journal);
        bus.subscribe(&listener).detach();
        drop(listener);

        assert_eq!(bus.registry().len(), 1);
        bus.publish(Greeting(String::new())).unwrap();

        assert!(journal.lock().is_empty());
        assert_eq!(bus.registry().len(), 0);
        assert_eq!(bus.stats().pruned_subscribers, 1);
    }

    #[test]
    fn test_fail_fast_stops_at_first_failure() {
        let bus = MessageBus::new();
        let journal = journal();
        let ok = Listener::new("a", &journal);
        let broken = Listener::failing("b", &journal);
        let skipped = Listener::new("c", &journal);
        let _subs = [
            bus.subscribe(&ok),
            bus.subscribe(&broken),
            bus.subscribe(&skipped),
        ];

        let error = bus.publish(Greeting(String::new())).unwrap_err();

        assert!(matches!(error, BusError::Handler { .. }));
        assert_eq!(error.failure_count(), 1);
        assert!(error.message_type().ends_with("Greeting"));
        assert_eq!(*journal.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_isolate_runs_every_handler() {
        let bus = isolating_bus();
        let journal = journal();
        let first = Listener::failing("a", &journal);
        let second = Listener::new("b", &journal);
        let third = Listener::failing("c", &journal);
        let _subs = [
            bus.subscribe(&first),
            bus.subscribe(&second),
            bus.subscribe(&third),
        ];

        let error = bus.publish(Greeting(String::new())).unwrap_err();

        assert_eq!(error.failure_count(), 2);
        assert_eq!(*journal.lock(), vec!["a", "b", "c"]);
        assert_eq!(bus.stats().failed_deliveries, 2);
    }

    #[tokio::test]
    async fn test_publish_async_awaits_sequentially() {
        let bus = MessageBus::new();
        let journal = journal();
        let first = Listener::new("a", &journal);
        let second = Listener::new("b", &journal);
        let _s1 = bus.subscribe(&first);
        let _s2 = bus.subscribe(&second);

        let counter = bus.publish_async(Counter::default()).await.unwrap();

        assert_eq!(counter.0, vec!["a", "b"]);
        assert_eq!(*journal.lock(), vec!["a-async", "b-async"]);
    }

    #[tokio::test]
    async fn test_publish_async_fail_fast() {
        let bus = MessageBus::new();
        let journal = journal();
        let broken = Listener::failing("a", &journal);
        let skipped = Listener::new("b", &journal);
        let _s1 = bus.subscribe(&broken);
        let _s2 = bus.subscribe(&skipped);

        let result = bus.publish_async(Counter::default()).await;

        assert!(result.is_err());
        assert_eq!(*journal.lock(), vec!["a-async"]);
    }

    struct Recruiter {
        bus: Arc<MessageBus>,
        recruit: Arc<Listener>,
        recruited: Mutex<Option<Subscription>>,
    }

    impl HandleMessage<Tick> for Recruiter {
        fn handle(&self, _message: &mut Tick) -> Result<()> {
            // Re-entrant subscribe and publish from inside a delivery
            let subscription = self.bus.subscribe(&self.recruit);
            *self.recruited.lock() = Some(subscription);
            self.bus.publish(Greeting(String::new()))?;
            Ok(())
        }
    }

    handles!(Recruiter => [Tick]);

    #[test]
    fn test_handlers_can_reenter_the_bus() {
        let bus = Arc::new(MessageBus::new());
        let journal = journal();
        let recruiter = Arc::new(Recruiter {
            bus: Arc::clone(&bus),
            recruit: Listener::new("recruit", &journal),
            recruited: Mutex::new(None),
        });
        let _sub = bus.subscribe(&recruiter);

        bus.publish(Tick).unwrap();

        // The nested publish already saw the new subscriber
        assert_eq!(*journal.lock(), vec!["recruit"]);
        assert_eq!(bus.subscriber_count(), 2);

        // The second tick does not deliver twice to the recruit
        bus.publish(Tick).unwrap();
        assert_eq!(journal.lock().len(), 2);
    }

    #[test]
    fn test_stats_track_publishes() {
        let bus = MessageBus::new();
        let journal = journal();
        let listener = Listener::new("a", &journal);
        let _sub = bus.subscribe(&listener);

        bus.publish(Greeting(String::new())).unwrap();
        bus.publish(Greeting(String::new())).unwrap();
        bus.publish(Tick).unwrap();

        let stats = bus.stats();
        assert_eq!(stats.total_publishes, 3);
        assert_eq!(stats.deliveries, 2);
        assert_eq!(stats.subscriber_count, 1);
        assert_eq!(stats.publishes_by_type[type_name::<Greeting>()], 2);
        assert_eq!(stats.publishes_by_type[type_name::<Tick>()], 1);
    }
}
