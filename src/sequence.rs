/// Default number of recent sequence numbers a reply may match.
pub const DEFAULT_CORRELATION_WINDOW: u16 = 120;

/// Echo sequence counter plus the window of recently sent numbers that
/// replies are correlated against.
///
/// The counter starts at 0 and wraps at 65536. A reply matches when its
/// sequence is one of the last `window` numbers handed out, so late or
/// reordered replies still correlate, as do duplicates.
#[derive(Debug, Clone)]
pub struct SequenceWindow {
    next: u16,
    sent: u64,
    window: u16,
}

impl SequenceWindow {
    pub fn new(window: u16) -> Self {
        Self::starting_at(0, window)
    }

    pub(crate) fn starting_at(next: u16, window: u16) -> Self {
        Self {
            next,
            sent: 0,
            window: window.max(1),
        }
    }

    /// The sequence number the next send will carry.
    pub fn next(&self) -> u16 {
        self.next
    }

    /// Total sequence numbers handed out so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Hands out the next sequence number and moves the counter on.
    pub fn advance(&mut self) -> u16 {
        let sequence = self.next;
        self.next = self.next.wrapping_add(1);
        self.sent += 1;
        sequence
    }

    /// Whether `sequence` was handed out recently enough to correlate.
    pub fn contains(&self, sequence: u16) -> bool {
        let age = self.next.wrapping_sub(sequence) as u64;
        age >= 1 && age <= self.sent.min(self.window as u64)
    }
}

impl Default for SequenceWindow {
    fn default() -> Self {
        Self::new(DEFAULT_CORRELATION_WINDOW)
    }
}
