//! Public extension contracts for collaborators the scheduler does not own.
//!
//! Authentication lives outside the scheduler: an external session or OAuth component
//! supplies a [`RequestAuthorizer`] that is applied to every request (and probe) right
//! before it is transmitted, so refreshed credentials are picked up even for requests
//! that waited in a queue.

pub mod authorizer;

pub use authorizer::*;
