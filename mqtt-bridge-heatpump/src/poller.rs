//! Stale register polling.
//!
//! The scheduler only keeps time: it records when each polled register was
//! last refreshed and decides, on every tick, which ones are due. The reads
//! themselves are issued by the service.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::catalogue::Register;

/// How often staleness is checked, independent of the poll interval.
pub const POLL_TICK: Duration = Duration::from_secs(5);

/// Staleness tracker for the configured poll set.
#[derive(Debug)]
pub struct PollScheduler {
    interval: Duration,
    registers: Vec<Arc<Register>>,
    last_refresh: HashMap<u16, Instant>,
    sweep_in_flight: bool,
}

impl PollScheduler {
    pub fn new(interval: Duration, registers: Vec<Arc<Register>>) -> Self {
        Self {
            interval,
            registers,
            last_refresh: HashMap::new(),
            sweep_in_flight: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn registers(&self) -> &[Arc<Register>] {
        &self.registers
    }

    /// When `address` was last refreshed, if ever.
    pub fn last_refresh(&self, address: u16) -> Option<Instant> {
        self.last_refresh.get(&address).copied()
    }

    /// A register is due when it was never refreshed or its last refresh is
    /// older than the interval.
    pub fn is_due(&self, address: u16, now: Instant) -> bool {
        match self.last_refresh.get(&address) {
            None => true,
            Some(&last) => now.saturating_duration_since(last) > self.interval,
        }
    }

    /// Registers due at `now`, in configured order.
    pub fn due(&self, now: Instant) -> Vec<Arc<Register>> {
        self.registers
            .iter()
            .filter(|r| self.is_due(r.address, now))
            .cloned()
            .collect()
    }

    /// Record that `address` was just refreshed. Registers outside the poll
    /// set are ignored.
    pub fn register_update(&mut self, address: u16, now: Instant) {
        if self.registers.iter().any(|r| r.address == address) {
            self.last_refresh.insert(address, now);
        }
    }

    /// Start a sweep over the due registers.
    ///
    /// Returns `None` while a previous sweep is still running or when nothing
    /// is due.
    pub fn begin_sweep(&mut self, now: Instant) -> Option<Vec<Arc<Register>>> {
        if self.sweep_in_flight {
            return None;
        }

        let due = self.due(now);
        if due.is_empty() {
            return None;
        }

        self.sweep_in_flight = true;
        Some(due)
    }

    pub fn finish_sweep(&mut self) {
        self.sweep_in_flight = false;
    }

    pub fn sweep_in_flight(&self) -> bool {
        self.sweep_in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataType, RegisterConfig, RegisterType};

    fn register(address: u16) -> Arc<Register> {
        Arc::new(Register::from_config(&RegisterConfig {
            address,
            name: format!("register-{}", address),
            title: None,
            register_type: RegisterType::Input,
            data_type: DataType::U16,
            factor: 1.0,
            unit: None,
            min: None,
            max: None,
            writable: None,
            mappings: Vec::new(),
        }))
    }

    fn scheduler() -> PollScheduler {
        PollScheduler::new(Duration::from_secs(60), vec![register(1), register(2)])
    }

    #[test]
    fn test_never_refreshed_is_due() {
        let scheduler = scheduler();
        let now = Instant::now();

        assert!(scheduler.is_due(1, now));
        assert_eq!(scheduler.due(now).len(), 2);
    }

    #[test]
    fn test_refreshed_not_due_until_interval_elapsed() {
        let mut scheduler = scheduler();
        let start = Instant::now();

        scheduler.register_update(1, start);

        assert!(!scheduler.is_due(1, start));
        assert!(!scheduler.is_due(1, start + Duration::from_secs(60)));
        assert!(scheduler.is_due(1, start + Duration::from_secs(61)));

        let due = scheduler.due(start + Duration::from_secs(30));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].address, 2);
    }

    #[test]
    fn test_updates_outside_poll_set_ignored() {
        let mut scheduler = scheduler();
        scheduler.register_update(99, Instant::now());

        assert!(scheduler.last_refresh(99).is_none());
    }

    #[test]
    fn test_single_sweep_in_flight() {
        let mut scheduler = scheduler();
        let now = Instant::now();

        let first = scheduler.begin_sweep(now).unwrap();
        assert_eq!(first.len(), 2);
        assert!(scheduler.sweep_in_flight());
        assert!(scheduler.begin_sweep(now).is_none());

        scheduler.finish_sweep();
        assert!(scheduler.begin_sweep(now).is_some());
    }

    #[test]
    fn test_nothing_due_no_sweep() {
        let mut scheduler = scheduler();
        let now = Instant::now();
        scheduler.register_update(1, now);
        scheduler.register_update(2, now);

        assert!(scheduler.begin_sweep(now).is_none());
        assert!(!scheduler.sweep_in_flight());
    }
}
