use std::collections::BTreeSet;

use thiserror::Error;

use crate::{modes::RelaySet, types::RelayId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("failed to read relay {relay}: {reason}")]
    Read { relay: RelayId, reason: String },
    #[error("failed to write relay {relay}: {reason}")]
    Write { relay: RelayId, reason: String },
    /// A transition failed and putting the relays back failed too, so the
    /// bank may now match no mode.
    #[error("{cause}; rollback also failed: {rollback}")]
    RollbackFailed {
        cause: Box<RelayError>,
        rollback: Box<RelayError>,
    },
}

/// Digital outputs driving the equipment stages.
pub trait RelayBank {
    /// Current logical level of `relay`; `true` means energized.
    fn read(&self, relay: RelayId) -> Result<bool, RelayError>;

    fn write(&mut self, relay: RelayId, energized: bool) -> Result<(), RelayError>;
}

impl<T: RelayBank + ?Sized> RelayBank for Box<T> {
    fn read(&self, relay: RelayId) -> Result<bool, RelayError> {
        (**self).read(relay)
    }

    fn write(&mut self, relay: RelayId, energized: bool) -> Result<(), RelayError> {
        (**self).write(relay, energized)
    }
}

pub fn read_energized<B: RelayBank + ?Sized>(bank: &B) -> Result<RelaySet, RelayError> {
    let mut energized = RelaySet::EMPTY;
    for relay in RelayId::ALL {
        if bank.read(relay)? {
            energized.insert(relay);
        }
    }
    Ok(energized)
}

/// Relays are engaged in this order and released in reverse, so the
/// compressor never runs without the fan and the reversing valve is set
/// before the compressor starts.
const ENGAGE_ORDER: [RelayId; 4] = [
    RelayId::Fan,
    RelayId::ReversingValve,
    RelayId::Compressor,
    RelayId::AuxHeat,
];

/// Drive the bank from `from` to `to`, touching only relays that differ.
///
/// All releases happen before any engage. If a write fails, relays already
/// switched are put back to their `from` level in reverse order before the
/// error is returned; a failed rollback is reported as
/// [`RelayError::RollbackFailed`].
pub fn switch_relays<B: RelayBank + ?Sized>(
    bank: &mut B,
    from: RelaySet,
    to: RelaySet,
) -> Result<(), RelayError> {
    let releases = ENGAGE_ORDER
        .into_iter()
        .rev()
        .filter(|relay| from.contains(*relay) && !to.contains(*relay))
        .map(|relay| (relay, false));
    let engages = ENGAGE_ORDER
        .into_iter()
        .filter(|relay| !from.contains(*relay) && to.contains(*relay))
        .map(|relay| (relay, true));

    let mut applied: Vec<(RelayId, bool)> = Vec::new();
    for (relay, level) in releases.chain(engages) {
        if let Err(cause) = bank.write(relay, level) {
            let mut rollback_error = None;
            for (switched, level) in applied.into_iter().rev() {
                if let Err(err) = bank.write(switched, !level) {
                    rollback_error.get_or_insert(err);
                }
            }
            return Err(match rollback_error {
                Some(rollback) => RelayError::RollbackFailed {
                    cause: Box::new(cause),
                    rollback: Box::new(rollback),
                },
                None => cause,
            });
        }
        applied.push((relay, level));
    }
    Ok(())
}

/// In-memory relay bank for simulation and tests. Individual relays can be
/// marked faulty so reads or writes fail.
#[derive(Debug, Clone, Default)]
pub struct MemoryRelayBank {
    energized: RelaySet,
    read_faults: BTreeSet<RelayId>,
    write_faults: BTreeSet<RelayId>,
    writes: u64,
}

impl MemoryRelayBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_energized(energized: RelaySet) -> Self {
        Self {
            energized,
            ..Self::default()
        }
    }

    pub fn energized(&self) -> RelaySet {
        self.energized
    }

    /// Number of successful writes since construction.
    pub fn write_count(&self) -> u64 {
        self.writes
    }

    pub fn fail_reads(&mut self, relay: RelayId, failing: bool) {
        if failing {
            self.read_faults.insert(relay);
        } else {
            self.read_faults.remove(&relay);
        }
    }

    pub fn fail_writes(&mut self, relay: RelayId, failing: bool) {
        if failing {
            self.write_faults.insert(relay);
        } else {
            self.write_faults.remove(&relay);
        }
    }
}

impl RelayBank for MemoryRelayBank {
    fn read(&self, relay: RelayId) -> Result<bool, RelayError> {
        if self.read_faults.contains(&relay) {
            return Err(RelayError::Read {
                relay,
                reason: "simulated fault".to_string(),
            });
        }
        Ok(self.energized.contains(relay))
    }

    fn write(&mut self, relay: RelayId, energized: bool) -> Result<(), RelayError> {
        if self.write_faults.contains(&relay) {
            return Err(RelayError::Write {
                relay,
                reason: "simulated fault".to_string(),
            });
        }

        if energized {
            self.energized.insert(relay);
        } else {
            self.energized.remove(relay);
        }
        self.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::ModeTable;
    use crate::types::OperatingMode;

    #[test]
    fn switch_touches_only_changed_relays() {
        let table = ModeTable::heat_pump();
        let heat = table.relays_for(OperatingMode::Heat);
        let aux = table.relays_for(OperatingMode::Aux);
        let mut bank = MemoryRelayBank::with_energized(heat);

        switch_relays(&mut bank, heat, aux).unwrap();

        assert_eq!(bank.energized(), aux);
        assert_eq!(bank.write_count(), 1);
    }

    #[test]
    fn failed_write_rolls_back_switched_relays() {
        let table = ModeTable::heat_pump();
        let cool = table.relays_for(OperatingMode::Cool);
        let mut bank = MemoryRelayBank::new();
        bank.fail_writes(RelayId::ReversingValve, true);

        let err = switch_relays(&mut bank, RelaySet::EMPTY, cool).unwrap_err();

        assert!(matches!(
            err,
            RelayError::Write {
                relay: RelayId::ReversingValve,
                ..
            }
        ));
        assert_eq!(bank.energized(), RelaySet::EMPTY);
    }

    /// Keeps the energized set after every successful write.
    #[derive(Default)]
    struct RecordingBank {
        inner: MemoryRelayBank,
        states: Vec<RelaySet>,
        attempts: usize,
        failing_attempts: Vec<usize>,
    }

    impl RelayBank for RecordingBank {
        fn read(&self, relay: RelayId) -> Result<bool, RelayError> {
            self.inner.read(relay)
        }

        fn write(&mut self, relay: RelayId, energized: bool) -> Result<(), RelayError> {
            let attempt = self.attempts;
            self.attempts += 1;
            if self.failing_attempts.contains(&attempt) {
                return Err(RelayError::Write {
                    relay,
                    reason: format!("write #{attempt} failed"),
                });
            }
            self.inner.write(relay, energized)?;
            self.states.push(self.inner.energized());
            Ok(())
        }
    }

    #[test]
    fn compressor_never_runs_without_fan_mid_transition() {
        let table = ModeTable::heat_pump();
        for from in OperatingMode::ALL {
            for to in OperatingMode::ALL {
                let mut bank = RecordingBank {
                    inner: MemoryRelayBank::with_energized(table.relays_for(from)),
                    ..RecordingBank::default()
                };
                switch_relays(&mut bank, table.relays_for(from), table.relays_for(to)).unwrap();

                for state in &bank.states {
                    assert!(
                        !state.contains(RelayId::Compressor) || state.contains(RelayId::Fan),
                        "{from} -> {to} passed through {state}"
                    );
                }
                assert_eq!(bank.inner.energized(), table.relays_for(to));
            }
        }
    }

    #[test]
    fn stopping_heat_drops_compressor_before_fan() {
        let table = ModeTable::heat_pump();
        let heat = table.relays_for(OperatingMode::Heat);
        let mut bank = RecordingBank {
            inner: MemoryRelayBank::with_energized(heat),
            ..RecordingBank::default()
        };

        switch_relays(&mut bank, heat, RelaySet::EMPTY).unwrap();

        assert_eq!(
            bank.states,
            vec![RelaySet::EMPTY.with(RelayId::Fan), RelaySet::EMPTY]
        );
    }

    #[test]
    fn starting_cool_sets_valve_before_compressor() {
        let table = ModeTable::heat_pump();
        let mut bank = RecordingBank::default();

        switch_relays(&mut bank, RelaySet::EMPTY, table.relays_for(OperatingMode::Cool)).unwrap();

        let fan = RelaySet::EMPTY.with(RelayId::Fan);
        let valve = fan.with(RelayId::ReversingValve);
        assert_eq!(
            bank.states,
            vec![fan, valve, valve.with(RelayId::Compressor)]
        );
    }

    #[test]
    fn failed_rollback_is_reported_with_cause() {
        let table = ModeTable::heat_pump();
        // Fan and valve go on, the compressor write fails, then putting the
        // valve back fails as well.
        let mut bank = RecordingBank {
            failing_attempts: vec![2, 3],
            ..RecordingBank::default()
        };

        let err =
            switch_relays(&mut bank, RelaySet::EMPTY, table.relays_for(OperatingMode::Cool))
                .unwrap_err();

        assert_eq!(
            err,
            RelayError::RollbackFailed {
                cause: Box::new(RelayError::Write {
                    relay: RelayId::Compressor,
                    reason: "write #2 failed".to_string(),
                }),
                rollback: Box::new(RelayError::Write {
                    relay: RelayId::ReversingValve,
                    reason: "write #3 failed".to_string(),
                }),
            }
        );
        assert_eq!(
            bank.inner.energized(),
            RelaySet::EMPTY.with(RelayId::ReversingValve)
        );
    }

    #[test]
    fn read_energized_propagates_faults() {
        let mut bank = MemoryRelayBank::with_energized(RelaySet::EMPTY.with(RelayId::Fan));
        assert_eq!(
            read_energized(&bank),
            Ok(RelaySet::EMPTY.with(RelayId::Fan))
        );

        bank.fail_reads(RelayId::AuxHeat, true);
        assert!(read_energized(&bank).is_err());
    }
}
