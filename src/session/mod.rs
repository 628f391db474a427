//! Session domain: per-connection interview state, the phase machine,
//! time budgeting, language coordination, duplicate suppression, and
//! the cross-task registry.

pub mod conversation;
pub mod dedup;
pub mod language;
pub mod phase;
pub mod registry;
pub mod timing;
