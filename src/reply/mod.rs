//! Outbound side: compose the reply and hand it to a relay.

pub mod compose;
pub mod dns;
pub mod transport;

pub use compose::{ReplyContext, compose};
pub use dns::{DnsMxLookup, MxLookup};
pub use transport::{Mailer, Route};
