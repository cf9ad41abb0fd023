//! Functional modules of the resilience core.
//!
//! `classify` turns raw failures into a taxonomy, `identity` manages the
//! fingerprint pool, `rotation` decides what to replace after each failure,
//! and `admission` gates how fast anything is allowed to leave.

pub mod admission;
pub mod classify;
pub mod identity;
pub mod rotation;
