use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state shared by the bus, the database service and the realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServiceState {
    #[default]
    Stopped,
    Connecting,
    Running,
    /// Started but currently unable to serve; recovery is in progress.
    Degraded,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Connecting => "connecting",
            ServiceState::Running => "running",
            ServiceState::Degraded => "degraded",
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            ServiceState::Stopped => 0,
            ServiceState::Connecting => 1,
            ServiceState::Running => 2,
            ServiceState::Degraded => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => ServiceState::Connecting,
            2 => ServiceState::Running,
            3 => ServiceState::Degraded,
            _ => ServiceState::Stopped,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A [`ServiceState`] that can be read and swapped without locking.
#[derive(Debug, Default)]
pub struct AtomicServiceState(AtomicU8);

impl AtomicServiceState {
    pub fn new(state: ServiceState) -> Self {
        Self(AtomicU8::new(state.to_u8()))
    }

    pub fn load(&self) -> ServiceState {
        ServiceState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: ServiceState) {
        self.0.store(state.to_u8(), Ordering::Release);
    }

    /// Returns the previous state.
    pub fn swap(&self, state: ServiceState) -> ServiceState {
        ServiceState::from_u8(self.0.swap(state.to_u8(), Ordering::AcqRel))
    }

    /// Sets `new` only if the current state is `current`.
    pub fn compare_exchange(&self, current: ServiceState, new: ServiceState) -> bool {
        self.0
            .compare_exchange(
                current.to_u8(),
                new.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_state_transitions() {
        let state = AtomicServiceState::default();
        assert_eq!(state.load(), ServiceState::Stopped);

        assert!(state.compare_exchange(ServiceState::Stopped, ServiceState::Connecting));
        assert!(!state.compare_exchange(ServiceState::Stopped, ServiceState::Running));
        assert_eq!(state.swap(ServiceState::Degraded), ServiceState::Connecting);
        assert_eq!(state.load(), ServiceState::Degraded);
    }
}
