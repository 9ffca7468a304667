use framebridge_transport::PortHandle;
use tracing::trace;

use crate::codec::{encode_with_config, Envelope, EnvelopeConfig};
use crate::error::Result;

/// Posts envelopes to one window, pinned to the origin it must be showing.
#[derive(Clone)]
pub struct EnvelopeWriter {
    port: PortHandle,
    target_origin: String,
    config: EnvelopeConfig,
}

impl EnvelopeWriter {
    /// Create a writer with default configuration.
    pub fn new(port: PortHandle, target_origin: impl Into<String>) -> Self {
        Self::with_config(port, target_origin, EnvelopeConfig::default())
    }

    /// Create a writer with explicit configuration.
    pub fn with_config(
        port: PortHandle,
        target_origin: impl Into<String>,
        config: EnvelopeConfig,
    ) -> Self {
        Self {
            port,
            target_origin: target_origin.into(),
            config,
        }
    }

    /// Encode and post an envelope.
    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        let encoded = encode_with_config(envelope, &self.config)?;
        self.send_encoded(&encoded)
    }

    /// Post an envelope that was encoded earlier (e.g. while queued).
    pub fn send_encoded(&self, encoded: &str) -> Result<()> {
        self.port.post_message(encoded, &self.target_origin)?;
        trace!(target_origin = %self.target_origin, size = encoded.len(), "envelope posted");
        Ok(())
    }

    pub fn target_origin(&self) -> &str {
        &self.target_origin
    }

    pub fn port(&self) -> &PortHandle {
        &self.port
    }
}

impl std::fmt::Debug for EnvelopeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeWriter")
            .field("target_origin", &self.target_origin)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use framebridge_transport::MessageBus;
    use serde_json::Map;

    use super::*;
    use crate::codec::{decode, Reply};
    use crate::error::EnvelopeError;

    fn bus_with_windows() -> MessageBus {
        let bus = MessageBus::new();
        bus.open_window("page", "https://example.org/").unwrap();
        bus.open_window("frame", "https://session.example.org/frame")
            .unwrap();
        bus
    }

    #[test]
    fn send_posts_encoded_envelope() {
        let bus = bus_with_windows();
        let writer = EnvelopeWriter::new(bus.port("frame", "page"), "https://example.org");
        let reply = Envelope::Reply(Reply::success("req-1", Map::new()));

        writer.send(&reply).unwrap();

        let delivery = bus.pop().unwrap();
        assert_eq!(delivery.target, "page");
        assert_eq!(delivery.event.origin, "https://session.example.org");
        assert_eq!(decode(&delivery.event.data).unwrap(), reply);
    }

    #[test]
    fn send_from_closed_window_is_a_transport_error() {
        let bus = bus_with_windows();
        let writer = EnvelopeWriter::new(bus.port("frame", "page"), "*");
        bus.close_window("frame");

        let result = writer.send(&Envelope::Reply(Reply::success("r", Map::new())));
        assert!(matches!(result, Err(EnvelopeError::Transport(_))));
    }
}
