//! Control-plane domain layer.
//!
//! Pure types shared by every other crate: workspace/stream identifiers,
//! the request-scoped identity context, the tagged event enum, and the
//! error kinds domain rules raise. Zero I/O.

#![warn(clippy::all)]

pub mod context;
pub mod error;
pub mod event;
pub mod ids;

pub use context::RequestContext;
pub use error::DomainError;
pub use event::{Actor, ActorType, EventDraft, EventKind, StreamRef, StreamType};
pub use ids::{CorrelationId, WorkspaceId};

#[cfg(test)]
mod tests {
    #[test]
    fn it_works() {
        assert_eq!(2 + 2, 4);
    }
}
