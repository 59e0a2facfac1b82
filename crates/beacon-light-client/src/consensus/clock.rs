use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::errors::ConsensusError;
use crate::config::ChainConfig;

/// Slot, epoch and sync committee period arithmetic for a chain.
///
/// All functions are pure; `now` is passed in as the time elapsed since the unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    genesis_time: u64,
    seconds_per_slot: u64,
    slots_per_epoch: u64,
    epochs_per_sync_committee_period: u64,
}

impl Clock {
    pub fn new(
        genesis_time: u64,
        seconds_per_slot: u64,
        slots_per_epoch: u64,
        epochs_per_sync_committee_period: u64,
    ) -> Self {
        Self {
            genesis_time,
            seconds_per_slot: seconds_per_slot.max(1),
            slots_per_epoch: slots_per_epoch.max(1),
            epochs_per_sync_committee_period: epochs_per_sync_committee_period.max(1),
        }
    }

    pub fn from_chain_config(chain: &ChainConfig) -> Self {
        Self::new(
            chain.genesis_time,
            chain.seconds_per_slot,
            chain.slots_per_epoch,
            chain.epochs_per_sync_committee_period,
        )
    }

    /// Time since the unix epoch according to the system clock.
    pub fn now() -> Result<Duration, ConsensusError> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| ConsensusError::Clock(err.to_string()))
    }

    pub fn epochs_per_sync_committee_period(&self) -> u64 {
        self.epochs_per_sync_committee_period
    }

    fn epoch_millis(&self) -> i128 {
        (self.slots_per_epoch * self.seconds_per_slot * 1000) as i128
    }

    fn millis_from_genesis(&self, now: Duration) -> i128 {
        now.as_millis() as i128 - self.genesis_time as i128 * 1000
    }

    /// Slot at `now`. Negative before genesis.
    pub fn current_slot(&self, now: Duration) -> i64 {
        let slot_millis = self.seconds_per_slot as i128 * 1000;
        self.millis_from_genesis(now).div_euclid(slot_millis) as i64
    }

    /// Slot the clock would report if it were `tolerance` ahead.
    pub fn slot_with_tolerance(&self, now: Duration, tolerance: Duration) -> i64 {
        self.current_slot(now + tolerance)
    }

    pub fn epoch_at_slot(&self, slot: u64) -> u64 {
        slot / self.slots_per_epoch
    }

    pub fn period_at_epoch(&self, epoch: u64) -> u64 {
        epoch / self.epochs_per_sync_committee_period
    }

    pub fn period_at_slot(&self, slot: u64) -> u64 {
        self.period_at_epoch(self.epoch_at_slot(slot))
    }

    /// Time left until the next epoch boundary, always shorter than one epoch.
    ///
    /// Before genesis this is the time until the next genesis aligned epoch boundary.
    pub fn time_until_next_epoch(&self, now: Duration) -> Duration {
        let epoch_millis = self.epoch_millis();
        let into_epoch = self.millis_from_genesis(now).rem_euclid(epoch_millis);
        let remaining = (epoch_millis - into_epoch) % epoch_millis;
        Duration::from_millis(remaining as u64)
    }

    /// Unix timestamp, in seconds, at which `slot` starts.
    pub fn slot_timestamp(&self, slot: u64) -> u64 {
        self.genesis_time + slot * self.seconds_per_slot
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const GENESIS: u64 = 1_606_824_023;

    fn mainnet_clock() -> Clock {
        Clock::new(GENESIS, 12, 32, 256)
    }

    fn at(seconds: u64, millis: u64) -> Duration {
        Duration::from_secs(seconds) + Duration::from_millis(millis)
    }

    #[rstest]
    #[case(GENESIS, 0)]
    #[case(GENESIS + 11, 0)]
    #[case(GENESIS + 12, 1)]
    #[case(GENESIS + 12 * 8192, 8192)]
    fn current_slot(#[case] now: u64, #[case] expected: i64) {
        assert_eq!(mainnet_clock().current_slot(at(now, 0)), expected);
    }

    #[test]
    fn current_slot_is_negative_before_genesis() {
        assert_eq!(mainnet_clock().current_slot(at(GENESIS - 1, 0)), -1);
        assert_eq!(mainnet_clock().current_slot(at(GENESIS - 13, 0)), -2);
    }

    #[test]
    fn tolerance_moves_the_clock_forward() {
        let clock = mainnet_clock();
        let now = at(GENESIS + 12 * 10 - 5, 0);
        assert_eq!(clock.current_slot(now), 9);
        assert_eq!(clock.slot_with_tolerance(now, Duration::from_secs(10)), 10);
    }

    #[rstest]
    #[case(0, 0, 0)]
    #[case(31, 0, 0)]
    #[case(32, 1, 0)]
    #[case(8191, 255, 0)]
    #[case(8192, 256, 1)]
    #[case(7358726, 229960, 898)]
    fn epoch_and_period(#[case] slot: u64, #[case] epoch: u64, #[case] period: u64) {
        let clock = mainnet_clock();
        assert_eq!(clock.epoch_at_slot(slot), epoch);
        assert_eq!(clock.period_at_slot(slot), period);
    }

    #[test]
    fn period_is_monotonic_in_slot() {
        let clock = Clock::new(0, 6, 8, 8);
        let mut previous = 0;
        for slot in 0..2_000 {
            let period = clock.period_at_slot(slot);
            assert!(period >= previous);
            previous = period;
        }
    }

    #[test]
    fn time_until_next_epoch_is_bounded() {
        let clock = mainnet_clock();
        let epoch = Duration::from_secs(12 * 32);
        for offset in (0..2 * 384_000u64).step_by(997) {
            let remaining = clock.time_until_next_epoch(at(GENESIS - 384, offset));
            assert!(remaining < epoch, "{remaining:?} at offset {offset}");
        }
    }

    #[test]
    fn time_until_next_epoch_values() {
        let clock = mainnet_clock();
        assert_eq!(clock.time_until_next_epoch(at(GENESIS, 0)), Duration::ZERO);
        assert_eq!(
            clock.time_until_next_epoch(at(GENESIS + 1, 500)),
            Duration::from_millis(382_500)
        );
        // Before genesis, count down to the next genesis aligned boundary.
        assert_eq!(
            clock.time_until_next_epoch(at(GENESIS - 10, 0)),
            Duration::from_secs(10)
        );
    }
}
