use std::time::Duration;

use compositor_protocol::Color;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositingConfig {
    /// Fill of the background layer behind child content.
    pub background_color: Color,
    /// Placeholder painted when the child process is gone.
    pub gone_color: Color,
    pub opaque_by_default: bool,
}

impl Default for CompositingConfig {
    fn default() -> Self {
        Self {
            background_color: Color::WHITE,
            gone_color: Color::GONE_GREEN,
            opaque_by_default: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboxConfig {
    pub batch_size: usize,
    /// How long an empty inbox waits for the first message of a batch.
    pub wait: Duration,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            wait: Duration::ZERO,
        }
    }
}
