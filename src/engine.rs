//! Turn engine
//!
//! A turn is processed synchronously against an in-memory copy of the
//! conversation's instance tree and produces [`Effect`]s for the runtime to
//! execute. Nothing is persisted or sent unless the whole turn succeeds.

mod activity;
mod effect;
mod turn;

#[cfg(test)]
mod proptests;

pub use activity::{Activity, ActivityKind};
pub use effect::Effect;
pub use turn::{Turn, TurnResult};
