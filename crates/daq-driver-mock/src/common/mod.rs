//! Common infrastructure for the simulated controller.
//!
//! - **mode**: Operational modes (Instant, Realistic, Chaos)
//! - **errors**: Error injection framework

pub mod errors;
pub mod mode;

pub use errors::{ErrorConfig, ErrorScenario};
pub use mode::MockMode;
