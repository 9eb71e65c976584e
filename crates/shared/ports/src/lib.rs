//! Meridian Ports
//!
//! Port definitions (traits) shared by every component.
//! These define the boundaries between domain logic and infrastructure.

mod clock;

pub use clock::Clock;
