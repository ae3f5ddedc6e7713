//! Cursor lifecycle shared by plugin and remote cursors.

/// `Created → Planned → Filtered → Exhausted → Closed`. Filter may be
/// re-invoked from any live state and always restarts the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Created,
    Planned,
    Filtered,
    Exhausted,
    Closed,
}

impl CursorState {
    pub fn is_live(self) -> bool {
        !matches!(self, CursorState::Closed)
    }
}
