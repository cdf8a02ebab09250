//! Runtime settings for one feed, assembled by the binary from its config
//! layers.

use std::time::Duration;

use crate::core::backoff::BackoffPolicy;
use crate::core::heartbeat::DEFAULT_HEARTBEAT_INTERVAL;
use crate::core::pipeline::FilterCriteria;
use crate::core::subscription::SubscriptionConfig;

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub subscription: SubscriptionConfig,
    pub backoff: BackoffPolicy,
    pub heartbeat_interval: Duration,
    pub filter: FilterCriteria,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            subscription: SubscriptionConfig::default(),
            backoff: BackoffPolicy::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            filter: FilterCriteria::default(),
        }
    }
}
