//! Dump session phases and counters.

use std::fmt;

/// Phase of a dump session.
///
/// `Idle -> SizeQuery -> CmdSent -> Streaming -> {Complete, Failed}`; any
/// non-terminal phase may also drop straight to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DumpPhase {
    #[default]
    Idle,
    /// Best-effort `partition-size` query.
    SizeQuery,
    /// `oem dump-storage` sent, waiting for `DUMPSTART`.
    CmdSent,
    /// Receiving raw blocks.
    Streaming,
    /// End marker seen.
    Complete,
    Failed,
}

impl fmt::Display for DumpPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpPhase::Idle => write!(f, "IDLE"),
            DumpPhase::SizeQuery => write!(f, "SIZE_QUERY"),
            DumpPhase::CmdSent => write!(f, "CMD_SENT"),
            DumpPhase::Streaming => write!(f, "STREAMING"),
            DumpPhase::Complete => write!(f, "COMPLETE"),
            DumpPhase::Failed => write!(f, "FAILED"),
        }
    }
}

impl DumpPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DumpPhase::Complete | DumpPhase::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_advance_to(&self, next: DumpPhase) -> bool {
        match (self, next) {
            (DumpPhase::Idle, DumpPhase::SizeQuery)
            | (DumpPhase::SizeQuery, DumpPhase::CmdSent)
            | (DumpPhase::CmdSent, DumpPhase::Streaming)
            | (DumpPhase::Streaming, DumpPhase::Complete) => true,
            (from, DumpPhase::Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Per-session counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DumpState {
    pub bytes_written: u64,
    /// From the size query; 0 when unknown.
    pub expected_size: u64,
    /// End marker seen.
    pub terminated: bool,
    /// Consecutive empty streaming reads.
    pub stalls: u32,
}

impl DumpState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, written: usize) -> u64 {
        self.bytes_written += written as u64;
        self.bytes_written
    }

    /// Count one more empty read and return the run length.
    pub fn record_stall(&mut self) -> u32 {
        self.stalls = self.stalls.saturating_add(1);
        self.stalls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            DumpPhase::Idle,
            DumpPhase::SizeQuery,
            DumpPhase::CmdSent,
            DumpPhase::Streaming,
            DumpPhase::Complete,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!DumpPhase::Idle.can_advance_to(DumpPhase::Streaming));
        assert!(!DumpPhase::CmdSent.can_advance_to(DumpPhase::Complete));
        assert!(!DumpPhase::Complete.can_advance_to(DumpPhase::Failed));
        assert!(!DumpPhase::Failed.can_advance_to(DumpPhase::Idle));
        assert!(DumpPhase::CmdSent.can_advance_to(DumpPhase::Failed));
    }

    #[test]
    fn test_record_accumulates() {
        let mut state = DumpState::new();
        assert_eq!(state.record(5), 5);
        assert_eq!(state.record(5), 10);
        assert!(!state.terminated);
    }

    #[test]
    fn test_stall_count_saturates() {
        let mut state = DumpState::new();
        assert_eq!(state.record_stall(), 1);

        state.stalls = u32::MAX - 1;
        assert_eq!(state.record_stall(), u32::MAX);
        assert_eq!(state.record_stall(), u32::MAX);
    }
}
