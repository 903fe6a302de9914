//! Bridge configuration, validation, and error types.
//!
//! [`BridgeConfig`] is plain data with serde support, so it can be built
//! in code or loaded from JSON. [`validate()`](BridgeConfig::validate)
//! checks every structural invariant before a [`Bridge`](crate::Bridge)
//! is constructed.

use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use simlink_channel::{ChannelConfig, Endpoint, ReconnectPolicy};
use simlink_codec::BehaviorSpec;
use simlink_core::{ActionSpec, BehaviorName, ObservationSpec};
use simlink_policy::Fallback;

// ── Cadence ───────────────────────────────────────────────────────

/// How often rounds open, and whether ticks wait for them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CadenceMode {
    /// Every tick opens a round and blocks until it resolves.
    Lockstep,
    /// Every `n`th tick opens a blocking round; the others reuse the
    /// held actions.
    Decimated(u32),
    /// A round opens whenever none is in flight. Ticks never block.
    FireAndForget,
}

/// What happens to pending agents when a round times out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Keep the last action, or zero if there is none.
    HoldLastAction,
    /// Apply the zero action.
    ZeroAction,
    /// Hold the last action, interrupt the pending episodes, and stop
    /// seeking decisions until the connection is re-established.
    FatalStop,
}

impl TimeoutPolicy {
    /// The per-agent fallback this policy applies.
    pub fn fallback(self) -> Fallback {
        match self {
            Self::HoldLastAction | Self::FatalStop => Fallback::HoldLastAction,
            Self::ZeroAction => Fallback::ZeroAction,
        }
    }
}

/// Round scheduling parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Scheduling mode. Default: `Lockstep`.
    pub mode: CadenceMode,
    /// Longest a round may wait for its response (ms). Default: 1000.
    pub timeout_ms: u64,
    /// Fallback when a round times out. Default: `HoldLastAction`.
    pub on_timeout: TimeoutPolicy,
    /// Phase of decimated rounds: tick `t` opens a round when
    /// `t % n == decision_offset % n`. Default: 0.
    pub decision_offset: u32,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            mode: CadenceMode::Lockstep,
            timeout_ms: 1000,
            on_timeout: TimeoutPolicy::HoldLastAction,
            decision_offset: 0,
        }
    }
}

impl CadenceConfig {
    /// `timeout_ms` as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ── BehaviorDecl ──────────────────────────────────────────────────

/// Shapes a behavior is expected to have.
///
/// Declared behaviors are announced in the handshake even before any
/// agent registers under them, and every later registration must match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorDecl {
    /// Fully qualified behavior name.
    pub name: BehaviorName,
    /// Observation layout.
    pub observation: ObservationSpec,
    /// Action layout.
    pub action: ActionSpec,
}

impl BehaviorDecl {
    /// The wire form announced to the trainer.
    pub fn to_spec(&self) -> BehaviorSpec {
        BehaviorSpec {
            name: self.name.clone(),
            observation: self.observation.clone(),
            action: self.action.clone(),
        }
    }
}

// ── ConfigError ───────────────────────────────────────────────────

/// Errors detected by [`BridgeConfig::validate()`] or while loading.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigError {
    /// `cadence.timeout_ms` is zero.
    ZeroTimeout,
    /// `Decimated(0)`.
    InvalidDecimation,
    /// Connect or handshake timeout is zero.
    ZeroConnectTimeout {
        /// Which timeout.
        field: &'static str,
    },
    /// Reconnect policy invariant violated.
    InvalidBackoff {
        /// Which invariant.
        reason: String,
    },
    /// `malformed_threshold` is zero.
    ZeroMalformedThreshold,
    /// The same behavior is declared twice.
    DuplicateBehavior(BehaviorName),
    /// The config file could not be read.
    Read {
        /// Description of the failure.
        reason: String,
    },
    /// The config text is not valid JSON for a [`BridgeConfig`].
    Parse {
        /// Description of the failure.
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroTimeout => write!(f, "cadence.timeout_ms must be at least 1"),
            Self::InvalidDecimation => write!(f, "decimation factor must be at least 1"),
            Self::ZeroConnectTimeout { field } => write!(f, "{field} must be at least 1"),
            Self::InvalidBackoff { reason } => write!(f, "invalid reconnect policy: {reason}"),
            Self::ZeroMalformedThreshold => write!(f, "malformed_threshold must be at least 1"),
            Self::DuplicateBehavior(name) => write!(f, "behavior '{name}' declared twice"),
            Self::Read { reason } => write!(f, "reading config: {reason}"),
            Self::Parse { reason } => write!(f, "parsing config: {reason}"),
        }
    }
}

impl Error for ConfigError {}

// ── BridgeConfig ──────────────────────────────────────────────────

/// Complete configuration of a [`Bridge`](crate::Bridge).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Where the trainer listens. Default: `tcp://127.0.0.1:5004`.
    pub endpoint: Endpoint,
    /// Round scheduling.
    pub cadence: CadenceConfig,
    /// Reconnect behaviour.
    pub reconnect: ReconnectPolicy,
    /// Bound on opening the transport (ms). Default: 1000.
    pub connect_timeout_ms: u64,
    /// Bound on the handshake round trip (ms). Default: 2000.
    pub handshake_timeout_ms: u64,
    /// Consecutive undecodable messages that force a reconnect. Default: 3.
    pub malformed_threshold: u32,
    /// Identity reported in the handshake. Default: `"simlink"`.
    pub bridge_name: String,
    /// Behaviors known up front.
    pub behaviors: Vec<BehaviorDecl>,
    /// Connect synchronously in [`Bridge::new`](crate::Bridge::new) and
    /// fail if the trainer is not there. Default: false.
    pub wait_for_trainer: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            cadence: CadenceConfig::default(),
            reconnect: ReconnectPolicy::default(),
            connect_timeout_ms: 1000,
            handshake_timeout_ms: 2000,
            malformed_threshold: 3,
            bridge_name: "simlink".into(),
            behaviors: Vec::new(),
            wait_for_trainer: false,
        }
    }
}

impl BridgeConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    /// The result is validated.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            reason: format!("{}: {e}", path.display()),
        })?;
        Self::from_json_str(&text)
    }

    /// Check all structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 1. Rounds need a positive deadline.
        if self.cadence.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        // 2. Decimation factor >= 1.
        if self.cadence.mode == CadenceMode::Decimated(0) {
            return Err(ConfigError::InvalidDecimation);
        }
        // 3. Transport timeouts > 0.
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ZeroConnectTimeout {
                field: "connect_timeout_ms",
            });
        }
        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::ZeroConnectTimeout {
                field: "handshake_timeout_ms",
            });
        }
        // 4. Backoff curve must be non-decreasing and bounded.
        let r = &self.reconnect;
        if !r.multiplier.is_finite() || r.multiplier < 1.0 {
            return Err(ConfigError::InvalidBackoff {
                reason: format!("multiplier must be finite and >= 1.0, got {}", r.multiplier),
            });
        }
        if r.initial_backoff_ms > r.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff {
                reason: format!(
                    "initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                    r.initial_backoff_ms, r.max_backoff_ms
                ),
            });
        }
        // 5. Malformed threshold >= 1.
        if self.malformed_threshold == 0 {
            return Err(ConfigError::ZeroMalformedThreshold);
        }
        // 6. Behavior declarations are unique.
        for (i, decl) in self.behaviors.iter().enumerate() {
            if self.behaviors[..i].iter().any(|d| d.name == decl.name) {
                return Err(ConfigError::DuplicateBehavior(decl.name.clone()));
            }
        }
        Ok(())
    }

    /// The declaration of `name`, if any.
    pub fn declared(&self, name: &BehaviorName) -> Option<&BehaviorDecl> {
        self.behaviors.iter().find(|d| &d.name == name)
    }

    /// Channel settings derived from this config.
    pub fn channel_config(&self) -> ChannelConfig {
        let mut channel = ChannelConfig::new(self.endpoint.clone(), self.bridge_name.clone());
        channel.connect_timeout = Duration::from_millis(self.connect_timeout_ms);
        channel.handshake_timeout = Duration::from_millis(self.handshake_timeout_ms);
        channel.reconnect = self.reconnect.clone();
        channel.hello.behaviors = self.behaviors.iter().map(BehaviorDecl::to_spec).collect();
        channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner_decl() -> BehaviorDecl {
        BehaviorDecl {
            name: BehaviorName::new("Runner"),
            observation: ObservationSpec::vector(8),
            action: ActionSpec::continuous(2),
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(BridgeConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_timeout_fails() {
        let mut cfg = BridgeConfig::default();
        cfg.cadence.timeout_ms = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroTimeout));
    }

    #[test]
    fn zero_decimation_fails() {
        let mut cfg = BridgeConfig::default();
        cfg.cadence.mode = CadenceMode::Decimated(0);
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidDecimation));
        cfg.cadence.mode = CadenceMode::Decimated(1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn shrinking_backoff_fails() {
        let mut cfg = BridgeConfig::default();
        cfg.reconnect.multiplier = 0.5;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidBackoff { .. })));

        let mut cfg = BridgeConfig::default();
        cfg.reconnect.initial_backoff_ms = 10_000;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidBackoff { .. })));
    }

    #[test]
    fn zero_malformed_threshold_fails() {
        let mut cfg = BridgeConfig::default();
        cfg.malformed_threshold = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroMalformedThreshold));
    }

    #[test]
    fn zero_connect_timeout_fails() {
        let mut cfg = BridgeConfig::default();
        cfg.handshake_timeout_ms = 0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ZeroConnectTimeout {
                field: "handshake_timeout_ms"
            })
        );
    }

    #[test]
    fn duplicate_declaration_fails() {
        let mut cfg = BridgeConfig::default();
        cfg.behaviors = vec![runner_decl(), runner_decl()];
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::DuplicateBehavior(BehaviorName::new("Runner")))
        );
    }

    #[test]
    fn json_fills_defaults() {
        let cfg = BridgeConfig::from_json_str(
            r#"{
                "endpoint": "tcp://10.0.0.2:6000",
                "cadence": { "mode": { "decimated": 5 }, "on_timeout": "zero_action" },
                "behaviors": [
                    { "name": "Runner",
                      "observation": { "shapes": [[8]] },
                      "action": { "continuous": 2 } }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.endpoint, "10.0.0.2:6000".parse::<Endpoint>().unwrap());
        assert_eq!(cfg.cadence.mode, CadenceMode::Decimated(5));
        assert_eq!(cfg.cadence.on_timeout, TimeoutPolicy::ZeroAction);
        assert_eq!(cfg.cadence.timeout_ms, 1000);
        assert_eq!(cfg.malformed_threshold, 3);
        assert_eq!(cfg.behaviors, vec![runner_decl()]);
    }

    #[test]
    fn invalid_json_values_are_rejected() {
        assert!(matches!(
            BridgeConfig::from_json_str(r#"{"endpoint": "nowhere"}"#),
            Err(ConfigError::Parse { .. })
        ));
        assert_eq!(
            BridgeConfig::from_json_str(r#"{"malformed_threshold": 0}"#),
            Err(ConfigError::ZeroMalformedThreshold)
        );
    }

    #[test]
    fn missing_file_is_a_read_error() {
        assert!(matches!(
            BridgeConfig::from_json_file("/definitely/not/here.json"),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn channel_config_announces_declared_behaviors() {
        let mut cfg = BridgeConfig::default();
        cfg.behaviors = vec![runner_decl()];
        cfg.bridge_name = "arena".into();
        let ch = cfg.channel_config();
        assert_eq!(ch.hello.bridge_name, "arena");
        assert_eq!(ch.hello.behaviors, vec![runner_decl().to_spec()]);
        assert_eq!(ch.handshake_timeout, Duration::from_millis(2000));
    }
}
