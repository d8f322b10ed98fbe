//! Optiwatch Control - local request channel for other processes
//!
//! Two Unix sockets under the socket directory:
//! - `submit.sock`: optimise items, replies with one response per item
//! - `stop.sock`: stop optimisations or pause the watchers, no reply
//!
//! One request per connection. The client writes JSON, half-closes and
//! reads the reply; an empty reply means the request was rejected.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::ControlClient;
pub use protocol::{
    ControlRequest, ItemReference, OptimisationResponse, PauseRequest, PauseScope, ResponseStatus, StopRequest,
    SubmitOptions, SubmitRequest,
};
pub use server::{ControlServer, OptimisationService};
