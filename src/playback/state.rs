//! Driver lifecycle state.

/// `Closed → Opening → Playing ⇄ Paused → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Closed,
    Opening,
    Playing,
    Paused,
}

impl DriverState {
    pub fn is_closed(self) -> bool {
        self == DriverState::Closed
    }

    pub fn is_active(self) -> bool {
        !self.is_closed()
    }

    pub fn is_paused(self) -> bool {
        self == DriverState::Paused
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_queries() {
        assert!(DriverState::Closed.is_closed());
        assert!(!DriverState::Closed.is_active());
        assert!(DriverState::Opening.is_active());
        assert!(DriverState::Paused.is_paused());
        assert!(!DriverState::Playing.is_paused());
    }
}
