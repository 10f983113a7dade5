//! Connection configuration.

use serde::{Deserialize, Serialize};

/// Tunables for one client connection, loadable from the embedding
/// application's configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Pixel depth to decode at (24, or 8 for the low-bandwidth mode).
    pub depth: u8,
    /// Encoding ids offered to the server, in preference order.
    pub preferred_encodings: Vec<i32>,
    /// Video decoding settings.
    pub video: VideoSettings,
}

/// Video (H.264) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    /// Whether to offer the H.264 encoding at all.
    pub enabled: bool,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            depth: 24,
            preferred_encodings: vec![
                crate::decoders::ENCODING_TIGHT,
                crate::decoders::ENCODING_ZRLE,
                crate::decoders::ENCODING_HEXTILE,
                crate::decoders::ENCODING_RRE,
                crate::decoders::ENCODING_COPY_RECT,
                crate::decoders::ENCODING_RAW,
            ],
            video: VideoSettings::default(),
        }
    }
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_prefer_compressed_encodings() {
        let config = ConnectionConfig::default();
        assert_eq!(config.depth, 24);
        assert_eq!(config.preferred_encodings[0], crate::decoders::ENCODING_TIGHT);
        assert!(config.video.enabled);
    }
}
