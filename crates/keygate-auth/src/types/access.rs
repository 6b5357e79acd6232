//! Access events recorded on sessions and refresh tokens.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A single authenticated access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEvent {
    /// When the access happened.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Client IP, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<String>,
    /// Client user agent, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// First and most recent access of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessInfo {
    /// The access that created the session.
    pub initial_access: AccessEvent,
    /// The latest access.
    pub last_access: AccessEvent,
}

impl AccessInfo {
    /// Starts access tracking from a first event.
    #[must_use]
    pub fn new(event: AccessEvent) -> Self {
        Self {
            initial_access: event.clone(),
            last_access: event,
        }
    }
}

/// Request attributes needed to build access events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    /// Client IP.
    pub remote_ip: Option<String>,
    /// Client user agent.
    pub user_agent: Option<String>,
}

impl RequestMeta {
    /// Builds an access event stamped at `timestamp`.
    #[must_use]
    pub fn access_event(&self, timestamp: OffsetDateTime) -> AccessEvent {
        AccessEvent {
            timestamp,
            remote_ip: self.remote_ip.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}
