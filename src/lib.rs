//! Filter-list based ad and tracker request blocking for embedding hosts.
//!
//! A host builds one [`AdBlocker`], calls [`AdBlocker::start`] to load and
//! periodically refresh the configured Adblock Plus lists, and hands an
//! [`Interceptor`] to its request hooks.

pub mod blocker;
pub mod config;
pub mod engine;
pub mod filter_list;
pub mod interceptor;
pub mod parser;
pub mod rules;
pub mod stats;

pub use blocker::{AdBlocker, RefreshSummary};
pub use config::{Config, FilterListSource};
pub use engine::{MatchDecision, MatchEngine};
pub use interceptor::{Interceptor, RequestAction, RequestDetails};
pub use rules::{ResourceType, RuleSet};
pub use stats::{Observer, ObserverId, StateSnapshot};
