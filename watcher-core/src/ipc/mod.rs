//! Event types crossing execution contexts.
//!
//! Transport tasks, the engine thread and the host process only talk to each
//! other through these types. Everything the host observes derives
//! `serde::Serialize` + `serde::Deserialize` so it can be logged as JSON or
//! forwarded to a UI unchanged.

pub mod events;
