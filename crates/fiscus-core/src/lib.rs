//! # Fiscus Core
//!
//! Core types, traits, and error definitions shared by the Fiscus
//! background-work subsystem. This crate provides the error language,
//! the injectable clock, the tracing/error sink contract, and the
//! interfaces of the domain collaborators that processors and the cron
//! scheduler call into. Domain implementations live elsewhere; only the
//! seams are defined here.

pub mod clock;
pub mod domain;
pub mod error;
pub mod trace;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{CoreError, CoreResult};
pub use trace::{CheckIn, CheckInStatus, LogTraceSink, MemoryTraceSink, Severity, TraceSink};
