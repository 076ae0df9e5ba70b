use crate::track::{TrackId, TrackStatus};

/// Changes in recovery mode reported by [RecoveryMonitor::observe].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryEvent {
    /// The primary track went lost.
    Entered,
    /// The primary track was re-confirmed.
    Recovered,
    /// Recovery mode lasted longer than the timeout and the primary
    /// designation was dropped.
    TimedOut,
}

/// Tracks the designated primary track and the global recovery mode that
/// is active while it is lost.
#[derive(Debug, Clone)]
pub struct RecoveryMonitor {
    timeout: f64,
    primary: Option<TrackId>,
    active_since: Option<f64>,
}

impl RecoveryMonitor {
    pub fn new(timeout: f64) -> Self {
        Self {
            timeout,
            primary: None,
            active_since: None,
        }
    }

    /// Designates a new primary track. Any running recovery episode ends.
    pub fn designate(&mut self, id: TrackId) {
        self.primary = Some(id);
        self.active_since = None;
    }

    pub fn clear(&mut self) {
        self.primary = None;
        self.active_since = None;
    }

    pub fn primary(&self) -> Option<TrackId> {
        self.primary
    }

    pub fn is_active(&self) -> bool {
        self.active_since.is_some()
    }

    /// Advances the state machine with the primary track's status after a
    /// frame. `status` is `None` once the track has been removed.
    pub fn observe(&mut self, status: Option<TrackStatus>, now: f64) -> Option<RecoveryEvent> {
        self.primary?;

        match (self.active_since, status) {
            (Some(_), Some(TrackStatus::Confirmed)) => {
                self.active_since = None;
                Some(RecoveryEvent::Recovered)
            }
            (Some(since), _) if now - since > self.timeout => {
                self.clear();
                Some(RecoveryEvent::TimedOut)
            }
            (Some(_), _) => None,
            (None, Some(TrackStatus::Lost)) => {
                self.active_since = Some(now);
                Some(RecoveryEvent::Entered)
            }
            // the primary vanished without ever being seen as lost
            (None, None | Some(TrackStatus::Deleted)) => {
                self.primary = None;
                None
            }
            (None, Some(_)) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loss_enters_and_confirmation_recovers() {
        let mut monitor = RecoveryMonitor::new(2.0);
        assert_eq!(monitor.observe(Some(TrackStatus::Lost), 0.0), None);

        monitor.designate(TrackId(3));
        assert_eq!(monitor.observe(Some(TrackStatus::Confirmed), 0.0), None);
        assert_eq!(
            monitor.observe(Some(TrackStatus::Lost), 0.1),
            Some(RecoveryEvent::Entered)
        );
        assert!(monitor.is_active());
        assert_eq!(monitor.observe(Some(TrackStatus::Lost), 0.5), None);
        assert_eq!(
            monitor.observe(Some(TrackStatus::Confirmed), 1.0),
            Some(RecoveryEvent::Recovered)
        );
        assert!(!monitor.is_active());
        assert_eq!(monitor.primary(), Some(TrackId(3)));
    }

    #[test]
    fn recovery_times_out_even_after_deletion() {
        let mut monitor = RecoveryMonitor::new(2.0);
        monitor.designate(TrackId(0));
        monitor.observe(Some(TrackStatus::Lost), 1.0);

        assert_eq!(monitor.observe(None, 2.5), None);
        assert_eq!(monitor.observe(None, 3.0), None);
        assert!(monitor.is_active());
        assert_eq!(monitor.observe(None, 3.01), Some(RecoveryEvent::TimedOut));
        assert!(!monitor.is_active());
        assert_eq!(monitor.primary(), None);
    }

    #[test]
    fn vanished_primary_is_dropped() {
        let mut monitor = RecoveryMonitor::new(2.0);
        monitor.designate(TrackId(7));
        assert_eq!(monitor.observe(None, 0.0), None);
        assert_eq!(monitor.primary(), None);
        assert!(!monitor.is_active());
    }
}
