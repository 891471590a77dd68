use nix::sys::signal::Signal;

const ESCALATION: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGKILL];

/// Signals sent for successive cancel requests against one process.
#[derive(Debug, Default)]
pub struct CancelEscalation {
    attempts: usize,
}

impl CancelEscalation {
    pub fn new() -> Self {
        Self::default()
    }

    /// The signal for the next cancel, or `None` once SIGKILL has been sent.
    pub fn next_signal(&mut self) -> Option<Signal> {
        let signal = ESCALATION.get(self.attempts).copied();
        if signal.is_some() {
            self.attempts += 1;
        }
        signal
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }
}
