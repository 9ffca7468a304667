use framebridge_transport::{MessageEvent, Origin};
use tracing::trace;

use crate::codec::{decode_with_config, Envelope, EnvelopeConfig};
use crate::error::{EnvelopeError, Result};

/// Senders a receiving zone accepts messages from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginRule {
    /// Only this exact origin.
    Exact(Origin),
    /// Any origin. Reserved for the public zone.
    Any,
}

impl OriginRule {
    pub fn allows(&self, origin: &str) -> bool {
        match self {
            OriginRule::Exact(expected) => expected.matches(origin),
            OriginRule::Any => true,
        }
    }
}

/// Turns posted message events into envelopes.
///
/// The origin gate runs before the payload is parsed, so a message from an
/// untrusted window is never decoded.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeReader {
    config: EnvelopeConfig,
}

impl EnvelopeReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EnvelopeConfig) -> Self {
        Self { config }
    }

    /// Check the sender origin against `rule`, then decode.
    pub fn read(&self, event: &MessageEvent, rule: &OriginRule) -> Result<Envelope> {
        if !rule.allows(&event.origin) {
            let expected = match rule {
                OriginRule::Exact(origin) => origin.to_string(),
                OriginRule::Any => "*".to_string(),
            };
            return Err(EnvelopeError::OriginRejected {
                expected,
                actual: event.origin.clone(),
            });
        }

        let envelope = decode_with_config(&event.data, &self.config)?;
        trace!(origin = %event.origin, request_uuid = envelope.request_uuid(), "envelope read");
        Ok(envelope)
    }

    pub fn config(&self) -> &EnvelopeConfig {
        &self.config
    }
}
