//! Centralized Configuration Management
//!
//! Every capacity in the multiplexer is fixed at startup. This module collects
//! them into one serializable structure so host tools can load it from a file.

use crate::errors::{NetError, NetResult};

// ----------------------------------------------------------------------------
// Registry Configuration
// ----------------------------------------------------------------------------

/// Socket capacity of the connection registry
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RegistryConfig {
    /// Number of TCP control blocks the stack was built with
    pub tcp_sockets: usize,
    /// Number of UDP control blocks the stack was built with
    pub udp_sockets: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            tcp_sockets: 5,
            udp_sockets: 5,
        }
    }
}

impl RegistryConfig {
    /// Total number of registry slots
    pub fn capacity(&self) -> usize {
        self.tcp_sockets + self.udp_sockets
    }
}

// ----------------------------------------------------------------------------
// Queue Configuration
// ----------------------------------------------------------------------------

/// Client count and per-client event queue depth
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QueueConfig {
    /// Number of client tasks that may use the stack
    pub max_clients: usize,
    /// Events each client can have outstanding before new ones are dropped
    pub queue_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_clients: 10,
            queue_capacity: 16,
        }
    }
}

// ----------------------------------------------------------------------------
// Runtime Configuration
// ----------------------------------------------------------------------------

/// Buffer sizes and timers for the stack task
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RuntimeConfig {
    /// Buffer size for client requests (clients → stack task)
    pub request_buffer_size: usize,
    /// Buffer size for injected stack callbacks (protocol engine → stack task)
    pub stack_event_buffer_size: usize,
    /// Period of the stack service tick in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            request_buffer_size: 32,
            stack_event_buffer_size: 128, // Receive bursts arrive here
            poll_interval_ms: 250,
        }
    }
}

// ----------------------------------------------------------------------------
// Unified Configuration
// ----------------------------------------------------------------------------

/// Complete multiplexer configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NetmuxConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl NetmuxConfig {
    /// Small footprint for constrained targets
    pub fn low_memory() -> Self {
        Self {
            registry: RegistryConfig {
                tcp_sockets: 2,
                udp_sockets: 2,
            },
            queue: QueueConfig {
                max_clients: 4,
                queue_capacity: 4,
            },
            runtime: RuntimeConfig {
                request_buffer_size: 8,
                stack_event_buffer_size: 16,
                poll_interval_ms: 500,
            },
        }
    }

    /// Tight limits with a fast service tick, so overflow paths are easy to reach
    pub fn testing() -> Self {
        Self {
            registry: RegistryConfig {
                tcp_sockets: 4,
                udp_sockets: 4,
            },
            queue: QueueConfig {
                max_clients: 4,
                queue_capacity: 2,
            },
            runtime: RuntimeConfig {
                request_buffer_size: 16,
                stack_event_buffer_size: 32,
                poll_interval_ms: 10,
            },
        }
    }

    /// Reject configurations the registry or queues cannot be built from
    pub fn validate(&self) -> NetResult<()> {
        if self.registry.capacity() == 0 {
            return Err(NetError::config_error("registry must hold at least one socket"));
        }
        if i32::try_from(self.registry.capacity()).is_err() {
            return Err(NetError::config_error("registry capacity exceeds identifier range"));
        }
        if self.queue.max_clients == 0 || self.queue.max_clients > usize::from(u8::MAX) {
            return Err(NetError::config_error("max_clients must be within 1..=255"));
        }
        if self.queue.queue_capacity == 0 {
            return Err(NetError::config_error("queue_capacity must be non-zero"));
        }
        if self.runtime.request_buffer_size == 0 || self.runtime.stack_event_buffer_size == 0 {
            return Err(NetError::config_error("channel buffers must be non-zero"));
        }
        if self.runtime.poll_interval_ms == 0 {
            return Err(NetError::config_error("poll_interval_ms must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        assert!(NetmuxConfig::default().validate().is_ok());
        assert!(NetmuxConfig::low_memory().validate().is_ok());
        assert!(NetmuxConfig::testing().validate().is_ok());
    }

    #[test]
    fn test_capacity_is_sum_of_socket_pools() {
        let config = RegistryConfig {
            tcp_sockets: 3,
            udp_sockets: 4,
        };
        assert_eq!(config.capacity(), 7);
    }

    #[test]
    fn test_validate_rejects_zero_capacities() {
        let mut config = NetmuxConfig::testing();
        config.queue.queue_capacity = 0;
        assert!(matches!(config.validate(), Err(NetError::Config { .. })));

        let mut config = NetmuxConfig::testing();
        config.registry = RegistryConfig {
            tcp_sockets: 0,
            udp_sockets: 0,
        };
        assert!(config.validate().is_err());

        let mut config = NetmuxConfig::testing();
        config.queue.max_clients = 300;
        assert!(config.validate().is_err());
    }
}
