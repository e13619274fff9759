//! Destination middleware chains.

use beacon_core::Event;
use std::sync::Arc;
use tracing::debug;

/// Continuation handle passed to each middleware link.
///
/// A link must call [`deliver`](Next::deliver) to pass the (possibly
/// modified) payload on, or [`drop_event`](Next::drop_event) to suppress
/// delivery for this destination. A link that does neither stalls the chain;
/// there is no implicit timeout at this layer.
pub struct Next {
    outcome: Option<Option<Event>>,
}

impl Next {
    fn new() -> Self {
        Self { outcome: None }
    }

    /// Continue the chain with this payload. The first call wins.
    pub fn deliver(&mut self, event: Event) {
        if self.outcome.is_none() {
            self.outcome = Some(Some(event));
        }
    }

    /// Drop the event for this destination only. The first call wins.
    pub fn drop_event(&mut self) {
        if self.outcome.is_none() {
            self.outcome = Some(None);
        }
    }
}

/// One link in a destination's middleware chain.
pub trait DestinationMiddleware: Send + Sync {
    /// Link name for logs.
    fn name(&self) -> &str {
        "anonymous"
    }

    fn apply(&self, event: Event, next: &mut Next);
}

impl<F> DestinationMiddleware for F
where
    F: Fn(Event, &mut Next) + Send + Sync,
{
    fn apply(&self, event: Event, next: &mut Next) {
        self(event, next)
    }
}

/// Result of running an event through a chain.
#[derive(Debug)]
pub enum ChainOutcome {
    /// Every link passed the payload on.
    Continue(Event),
    /// A link dropped the event; `link` names it.
    Dropped { link: String },
    /// A link never invoked its continuation; delivery is withheld.
    Stalled { link: String },
}

/// Ordered middleware chain run per destination.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    links: Vec<Arc<dyn DestinationMiddleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, link: Arc<dyn DestinationMiddleware>) {
        self.links.push(link);
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Run the event through every link in order.
    pub fn apply(&self, mut event: Event) -> ChainOutcome {
        for link in &self.links {
            let mut next = Next::new();
            link.apply(event, &mut next);
            match next.outcome {
                Some(Some(passed)) => event = passed,
                Some(None) => {
                    debug!(link = link.name(), "Middleware dropped event");
                    return ChainOutcome::Dropped {
                        link: link.name().to_string(),
                    };
                }
                None => {
                    debug!(link = link.name(), "Middleware stalled the chain");
                    return ChainOutcome::Stalled {
                        link: link.name().to_string(),
                    };
                }
            }
        }
        ChainOutcome::Continue(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn track(name: &str) -> Event {
        Event::track(name, Map::new())
    }

    #[test]
    fn empty_chain_continues() {
        let chain = MiddlewareChain::new();
        let event = track("Foo");
        let message_id = event.message_id.clone();

        match chain.apply(event) {
            ChainOutcome::Continue(out) => assert_eq!(out.message_id, message_id),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn links_run_in_order_and_may_modify() {
        let mut chain = MiddlewareChain::new();
        chain.push(Arc::new(|mut event: Event, next: &mut Next| {
            event.set_property("step", json!(1));
            next.deliver(event);
        }));
        chain.push(Arc::new(|mut event: Event, next: &mut Next| {
            let step = event.properties.get("step").cloned();
            assert_eq!(step, Some(json!(1)));
            event.set_property("step", json!(2));
            next.deliver(event);
        }));

        match chain.apply(track("Foo")) {
            ChainOutcome::Continue(out) => {
                assert_eq!(out.properties.get("step"), Some(&json!(2)))
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    struct NamedDrop;

    impl DestinationMiddleware for NamedDrop {
        fn name(&self) -> &str {
            "blocker"
        }
        fn apply(&self, _event: Event, next: &mut Next) {
            next.drop_event();
        }
    }

    #[test]
    fn drop_short_circuits_later_links() {
        let mut chain = MiddlewareChain::new();
        chain.push(Arc::new(NamedDrop));
        chain.push(Arc::new(|_event: Event, _next: &mut Next| {
            panic!("link after a drop must not run");
        }));

        match chain.apply(track("Foo")) {
            ChainOutcome::Dropped { link } => assert_eq!(link, "blocker"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn silent_link_stalls_the_chain() {
        let mut chain = MiddlewareChain::new();
        chain.push(Arc::new(|_event: Event, _next: &mut Next| {
            // never touches next
        }));

        match chain.apply(track("Foo")) {
            ChainOutcome::Stalled { link } => assert_eq!(link, "anonymous"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn only_the_first_continuation_call_counts() {
        let mut chain = MiddlewareChain::new();
        chain.push(Arc::new(|event: Event, next: &mut Next| {
            next.deliver(event);
            next.drop_event();
        }));

        assert!(matches!(
            chain.apply(track("Foo")),
            ChainOutcome::Continue(_)
        ));
    }
}
