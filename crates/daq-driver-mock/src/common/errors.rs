//! Error injection framework for the simulated controller.
//!
//! Enables configurable failures and error scenarios for resilience testing.
//! Injected failures surface as [`CtlError`]s, exactly like errors reported by
//! the real control library.

use daq_driver_smaract::CtlError;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::Arc;

/// Error code used for random and FailAfterN failures.
pub const ERR_INJECTED: u32 = 0x00F0;
/// Error code used for timeouts.
pub const ERR_TIMEOUT: u32 = 0x0100;
/// Error code used for communication loss.
pub const ERR_COMMUNICATION_LOST: u32 = 0x0104;

/// Error injection configuration for the simulated controller
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Per-operation failure rate (0.0 to 1.0)
    failure_rates: Arc<HashMap<&'static str, f64>>,
    /// Specific failure scenarios
    scenarios: Arc<Vec<ErrorScenario>>,
    /// Seeded RNG for failure decisions, replayable in tests
    rng: Arc<Mutex<ChaCha8Rng>>,
    /// State tracking for scenarios
    state: Arc<Mutex<ErrorState>>,
}

/// Deterministic failure patterns.
#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Let `count` calls of `operation` succeed, fail every later one
    FailAfterN {
        /// Operation name, see [`crate::CtlCall::operation`]
        operation: &'static str,
        /// Calls that still succeed
        count: u32,
    },
    /// Time out on every call of `operation`
    Timeout {
        /// Operation name
        operation: &'static str,
    },
    /// Lose the connection on the first checked call; every later call fails
    CommunicationLoss,
    /// Latch a controller fault with the given code on the first checked call
    HardwareFault {
        /// Error code returned while latched
        code: u32,
    },
}

#[derive(Default, Debug)]
struct ErrorState {
    /// Operation counters for FailAfterN scenarios
    operation_counts: HashMap<&'static str, u32>,
    communication_lost: bool,
    /// Latched fault code (0 = no fault)
    hardware_fault_code: u32,
}

impl ErrorConfig {
    /// No injected errors (default)
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    /// Uniform random failures on every operation
    pub fn random_failures(rate: f64) -> Self {
        Self::random_failures_seeded(rate, None)
    }

    /// Random failures at `rate` for every operation, replayable with a seed.
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate); // wildcard
        Self::build(rates, Vec::new(), seed)
    }

    /// A single scenario.
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Several scenarios, checked in order.
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    /// Per-operation failure rates, keyed by [`crate::CtlCall::operation`] names
    pub fn with_rates(rates: HashMap<&'static str, f64>) -> Self {
        Self::build(rates, Vec::new(), None)
    }

    fn build(
        rates: HashMap<&'static str, f64>,
        scenarios: Vec<ErrorScenario>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            failure_rates: Arc::new(rates),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(Mutex::new(match seed {
                Some(seed) => ChaCha8Rng::seed_from_u64(seed),
                None => ChaCha8Rng::from_entropy(),
            })),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Decide whether `operation` fails this time.
    pub fn check_operation(&self, operation: &'static str) -> Result<(), CtlError> {
        let mut state = self.state.lock();

        if state.communication_lost {
            return Err(CtlError::new(ERR_COMMUNICATION_LOST, "Communication lost"));
        }
        if state.hardware_fault_code != 0 {
            return Err(CtlError::new(
                state.hardware_fault_code,
                format!("Hardware fault: {}", state.hardware_fault_code),
            ));
        }

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation => {
                    let current = state.operation_counts.entry(operation).or_insert(0);
                    *current += 1;
                    if *current > *count {
                        return Err(CtlError::new(
                            ERR_INJECTED,
                            format!("Injected failure after {count} '{operation}' calls"),
                        ));
                    }
                }
                ErrorScenario::Timeout { operation: op } if *op == operation => {
                    return Err(CtlError::new(
                        ERR_TIMEOUT,
                        format!("Operation '{operation}' timed out"),
                    ));
                }
                ErrorScenario::CommunicationLoss => {
                    state.communication_lost = true;
                    return Err(CtlError::new(ERR_COMMUNICATION_LOST, "Communication lost"));
                }
                ErrorScenario::HardwareFault { code } => {
                    state.hardware_fault_code = *code;
                    return Err(CtlError::new(*code, format!("Hardware fault: {code}")));
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);

        if self.roll(rate) {
            return Err(CtlError::new(
                ERR_INJECTED,
                format!("Random failure on operation '{operation}'"),
            ));
        }

        Ok(())
    }

    /// True with probability `rate`.
    fn roll(&self, rate: f64) -> bool {
        match rate {
            r if r <= 0.0 => false,
            r if r >= 1.0 => true,
            r => self.rng.lock().r#gen::<f64>() < r,
        }
    }

    /// Clear counters and latched faults
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}
