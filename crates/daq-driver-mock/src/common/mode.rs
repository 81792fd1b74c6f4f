//! Operational modes for the simulated controller.
//!
//! - **Instant**: moves complete after a fixed number of status polls
//! - **Realistic**: moves take `distance / velocity` of wall-clock time
//! - **Chaos**: instant timing plus random call failures

use serde::{Deserialize, Serialize};

/// Motion and failure behavior of the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MockMode {
    /// Deterministic, poll-counted motion - for unit tests
    #[default]
    Instant,
    /// Velocity-timed motion - for demos and integration tests
    Realistic,
    /// Random failures - for resilience testing
    Chaos,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode() {
        assert_eq!(MockMode::default(), MockMode::Instant);
    }

    #[test]
    fn test_mode_from_config_string() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: MockMode,
        }
        let w: Wrapper = toml::from_str("mode = \"realistic\"").unwrap();
        assert_eq!(w.mode, MockMode::Realistic);
    }
}
