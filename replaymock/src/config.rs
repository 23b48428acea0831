// vim: tw=80
//! Engine configuration.

use crate::stub::MockOptions;

/// Upper bound on replay rounds unless configured otherwise.
pub const DEFAULT_MAX_ROUNDS: usize = 64;

/// Settings of one [`MockEngine`](crate::MockEngine).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Seed for signature values.  `None` seeds from OS entropy.
    pub seed: Option<u64>,
    /// Make new mocks relaxed unless they say otherwise.
    pub relaxed: bool,
    /// Make new mocks answer unstubbed `Unit` methods.
    pub relax_unit: bool,
    /// Most replay rounds a recording block may take.
    pub max_rounds: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            seed: None,
            relaxed: false,
            relax_unit: false,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }
}

impl EngineConfig {
    /// The default configuration, overridden by the `REPLAYMOCK_*`
    /// environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Override settings from the environment.  Invalid values are logged
    /// and ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(raw) = env_value("REPLAYMOCK_SEED") {
            match raw.parse::<u64>() {
                Ok(seed) => self.seed = Some(seed),
                Err(err) => {
                    tracing::warn!("invalid REPLAYMOCK_SEED, ignoring: {err}");
                }
            }
        }
        if let Some(raw) = env_value("REPLAYMOCK_RELAXED") {
            match parse_bool(&raw) {
                Some(b) => self.relaxed = b,
                None => {
                    tracing::warn!(
                        "invalid REPLAYMOCK_RELAXED, ignoring: {raw}");
                }
            }
        }
        if let Some(raw) = env_value("REPLAYMOCK_RELAX_UNIT") {
            match parse_bool(&raw) {
                Some(b) => self.relax_unit = b,
                None => {
                    tracing::warn!(
                        "invalid REPLAYMOCK_RELAX_UNIT, ignoring: {raw}");
                }
            }
        }
        if let Some(raw) = env_value("REPLAYMOCK_MAX_ROUNDS") {
            match raw.parse::<usize>() {
                Ok(0) => {
                    tracing::warn!("REPLAYMOCK_MAX_ROUNDS must be positive");
                }
                Ok(n) => self.max_rounds = n,
                Err(err) => {
                    tracing::warn!(
                        "invalid REPLAYMOCK_MAX_ROUNDS, ignoring: {err}");
                }
            }
        }
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn relaxed(mut self, relaxed: bool) -> Self {
        self.relaxed = relaxed;
        self
    }

    pub fn relax_unit(mut self, relax_unit: bool) -> Self {
        self.relax_unit = relax_unit;
        self
    }

    pub fn max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    /// Options for mocks created without explicit options.
    pub fn mock_options(&self) -> MockOptions {
        MockOptions { relaxed: self.relaxed, relax_unit: self.relax_unit }
    }
}

fn env_value(key: &str) -> Option<String> {
    let raw = std::env::var(key).ok()?;
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None
    }
}
