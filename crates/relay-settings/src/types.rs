//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file only needs the fields it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    pub server: ServerSettings,
    pub gateway: GatewaySettings,
    pub send: SendSettings,
    pub keep_alive: KeepAliveSettings,
    pub reconnect: ReconnectSettings,
    pub pairing: PairingSettings,
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Correct out-of-range values in place.
    ///
    /// Called automatically during loading. Bad values are replaced with a
    /// warning rather than rejected.
    pub fn validate(&mut self) {
        fn non_zero(val: &mut u64, default: u64, name: &str) {
            if *val == 0 {
                tracing::warn!("{name} must be positive, using default {default}");
                *val = default;
            }
        }

        let send_defaults = SendSettings::default();
        non_zero(&mut self.send.timeout_ms, send_defaults.timeout_ms, "send.timeoutMs");

        let keep_alive_defaults = KeepAliveSettings::default();
        non_zero(
            &mut self.keep_alive.interval_ms,
            keep_alive_defaults.interval_ms,
            "keepAlive.intervalMs",
        );

        let gateway_defaults = GatewaySettings::default();
        non_zero(
            &mut self.gateway.request_timeout_ms,
            gateway_defaults.request_timeout_ms,
            "gateway.requestTimeoutMs",
        );

        let rc = &mut self.reconnect;
        if rc.backoff_factor < 1.0 || rc.backoff_factor.is_nan() {
            tracing::warn!("reconnect.backoffFactor ({}) < 1.0, using 1.0", rc.backoff_factor);
            rc.backoff_factor = 1.0;
        }
        if !(0.0..=1.0).contains(&rc.jitter_factor) {
            let clamped = if rc.jitter_factor.is_nan() {
                0.0
            } else {
                rc.jitter_factor.clamp(0.0, 1.0)
            };
            tracing::warn!(
                "reconnect.jitterFactor out of range ({}), clamped to {clamped}",
                rc.jitter_factor
            );
            rc.jitter_factor = clamped;
        }
        if rc.max_delay_ms < rc.initial_delay_ms {
            tracing::warn!(
                "reconnect.maxDelayMs ({}) < initialDelayMs ({}), correcting",
                rc.max_delay_ms,
                rc.initial_delay_ms
            );
            rc.max_delay_ms = rc.initial_delay_ms;
        }

        let suffix = self.send.jid_suffix.trim().trim_start_matches('@');
        if suffix.is_empty() {
            tracing::warn!("send.jidSuffix is empty, using default");
            self.send.jid_suffix = send_defaults.jid_suffix;
        } else if suffix != self.send.jid_suffix {
            self.send.jid_suffix = suffix.to_string();
        }
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
        }
    }
}

/// Messaging gateway (protocol sidecar) settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Base URL of the gateway REST API. The event socket uses the same
    /// host with a `ws`/`wss` scheme.
    pub url: String,
    /// Directory the gateway persists session credentials into.
    pub auth_dir: String,
    /// Per-request HTTP timeout.
    pub request_timeout_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8790".to_string(),
            auth_dir: "./auth_info".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

impl GatewaySettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Resilient send settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendSettings {
    /// Deadline for one delivery attempt.
    pub timeout_ms: u64,
    /// Pause between a timed-out attempt and its single retry.
    pub retry_grace_ms: u64,
    /// Service domain appended to phone digits.
    pub jid_suffix: String,
    /// Message body; `{otp}` is replaced with the code.
    pub message_template: String,
}

impl Default for SendSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 8_000,
            retry_grace_ms: 3_000,
            jid_suffix: "s.whatsapp.net".to_string(),
            message_template: "Kode OTP kamu adalah: {otp} jangan bagikan ke siapapun!"
                .to_string(),
        }
    }
}

impl SendSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_grace(&self) -> Duration {
        Duration::from_millis(self.retry_grace_ms)
    }

    /// Render the message body for a code.
    pub fn render_message(&self, otp: &str) -> String {
        self.message_template.replace("{otp}", otp)
    }
}

/// Liveness ping settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeepAliveSettings {
    pub interval_ms: u64,
    /// Delay before the best-effort presence update after a connection opens.
    pub ready_presence_delay_ms: u64,
}

impl Default for KeepAliveSettings {
    fn default() -> Self {
        Self {
            interval_ms: 120_000,
            ready_presence_delay_ms: 2_000,
        }
    }
}

/// Reconnect backoff settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    /// Jitter factor (0.0–1.0) applied to each delay.
    pub jitter_factor: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 60_000,
            backoff_factor: 2.0,
            jitter_factor: 0.2,
        }
    }
}

/// Device pairing settings, used when the stored credentials are not registered.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PairingSettings {
    /// Custom pairing code requested from the service.
    pub custom_code: Option<String>,
    /// Wait between reading the phone number and requesting the code.
    pub request_delay_ms: u64,
    /// Text shown to the operator when asking for the phone number.
    pub prompt: String,
}

impl Default for PairingSettings {
    fn default() -> Self {
        Self {
            custom_code: Some("SPMBDIGI".to_string()),
            request_delay_ms: 2_000,
            prompt: "/> please enter your WhatsApp number, starting with 62:\n> number: "
                .to_string(),
        }
    }
}

/// Logging output settings. `RUST_LOG` takes precedence over `level`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
