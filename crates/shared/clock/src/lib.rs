//! Meridian Clock Infrastructure
//!
//! ```text
//! Clock (port)
//!   ├── SystemClock   wall time, used by the running engine
//!   └── ManualClock   frozen time moved explicitly, used by tests
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use meridian_clock::{Clock, ManualClock};
//! use chrono::Duration;
//!
//! let clock = ManualClock::starting_now();
//! let t0 = clock.now();
//! clock.advance(Duration::seconds(5));
//! assert_eq!(clock.now() - t0, Duration::seconds(5));
//! ```

mod manual;
mod system;

pub use manual::ManualClock;
pub use system::SystemClock;

// Re-export the Clock trait for convenience
pub use meridian_ports::Clock;
