//! Autoresponder pipeline.
//!
//! Every inbound message flows through:
//! 1. `HeaderFilter::scan()`: bulk, list, spam, and loop detection
//! 2. `NoReplyPolicy` and the sanitizer: canonical sender and recipient
//! 3. `AliasResolver::resolve()`: find the vacation owner
//! 4. `NotificationGate::should_notify()`: once per sender per interval
//! 5. Compose and deliver (`crate::reply`)
//!
//! Stages run strictly in this order; [`Engine`] wires them together.

pub mod address;
pub mod engine;
pub mod filter;
pub mod gate;
pub mod resolver;
pub mod types;

pub use engine::Engine;
pub use types::{InboundHeaders, Invocation, Outcome, PreparedMessage, Suppression};
