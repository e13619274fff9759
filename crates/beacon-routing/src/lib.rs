//! Per-destination event shaping: middleware chains and routing rules.
//!
//! Both layers run inside a destination, after the shared pipeline has
//! sealed the event. A drop here suppresses delivery for that destination
//! only; sibling destinations are never affected.

mod middleware;
mod rules;

pub use middleware::{ChainOutcome, DestinationMiddleware, MiddlewareChain, Next};
pub use rules::{Matcher, RoutingRule, RuleOutcome, RuleSet, Transform};
