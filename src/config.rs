//! Session configuration.

use std::time::Duration;

/// Lower time bound sent when a feed request carries no `since`.
pub const DEFAULT_SINCE_FLOOR: &str = "2000-01-01T00:00:00.000Z";

/// Per-channel item ceiling for recent-items requests.
pub const DEFAULT_MAX_RECENT_ITEMS: u32 = 50;

/// Tunables for a [`ChannelClient`](crate::ChannelClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelsConfig {
    /// Overall limit on the capability probing phase of discovery.
    ///
    /// `None` waits for every probe; `Some(Duration::ZERO)` gives up on the
    /// next scheduler turn.
    pub discovery_timeout: Option<Duration>,
    /// `max` attribute used for recent-items when the caller gives none.
    pub max_recent_items_per_channel: u32,
    /// `since` attribute used for feed queries when the caller gives none.
    pub since_floor: String,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: Some(Duration::from_secs(8)),
            max_recent_items_per_channel: DEFAULT_MAX_RECENT_ITEMS,
            since_floor: DEFAULT_SINCE_FLOOR.to_string(),
        }
    }
}

impl ChannelsConfig {
    /// Set the discovery timeout.
    pub fn discovery_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the recent-items ceiling. Default: 50.
    pub fn max_recent_items_per_channel(mut self, max: u32) -> Self {
        self.max_recent_items_per_channel = max;
        self
    }

    /// Set the default `since` floor.
    pub fn since_floor(mut self, since: impl Into<String>) -> Self {
        self.since_floor = since.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ChannelsConfig::default();
        assert_eq!(config.discovery_timeout, Some(Duration::from_secs(8)));
        assert_eq!(config.max_recent_items_per_channel, 50);
        assert!(config.since_floor.starts_with("2000-01-01T"));
    }
}
