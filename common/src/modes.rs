use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::types::{OperatingMode, RelayId};

/// A set of relays, stored as a bitmask over [`RelayId`].
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RelaySet(u8);

impl RelaySet {
    pub const EMPTY: RelaySet = RelaySet(0);

    pub fn with(mut self, relay: RelayId) -> Self {
        self.insert(relay);
        self
    }

    pub fn insert(&mut self, relay: RelayId) {
        self.0 |= relay.bit();
    }

    pub fn remove(&mut self, relay: RelayId) {
        self.0 &= !relay.bit();
    }

    pub fn contains(self, relay: RelayId) -> bool {
        self.0 & relay.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = RelayId> {
        RelayId::ALL
            .into_iter()
            .filter(move |relay| self.contains(*relay))
    }
}

impl FromIterator<RelayId> for RelaySet {
    fn from_iter<I: IntoIterator<Item = RelayId>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

impl fmt::Debug for RelaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for RelaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.iter().map(RelayId::as_str).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

impl Serialize for RelaySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModeTableError {
    #[error("mode {0} has no relay set")]
    MissingMode(OperatingMode),
    #[error("mode {0} appears more than once")]
    DuplicateMode(OperatingMode),
    #[error("off must not energize any relay, found {0}")]
    OffNotEmpty(RelaySet),
    #[error("modes {first} and {second} share relay set {relays}")]
    Ambiguous {
        first: OperatingMode,
        second: OperatingMode,
        relays: RelaySet,
    },
}

/// Relay signature of each operating mode.
///
/// Construction rejects tables the inferencer could not read back
/// unambiguously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeTable {
    entries: Vec<(OperatingMode, RelaySet)>,
}

impl ModeTable {
    pub fn new(entries: Vec<(OperatingMode, RelaySet)>) -> Result<Self, ModeTableError> {
        for (index, (mode, relays)) in entries.iter().enumerate() {
            if *mode == OperatingMode::Off && !relays.is_empty() {
                return Err(ModeTableError::OffNotEmpty(*relays));
            }
            for (other_mode, other_relays) in &entries[..index] {
                if other_mode == mode {
                    return Err(ModeTableError::DuplicateMode(*mode));
                }
                if other_relays == relays {
                    return Err(ModeTableError::Ambiguous {
                        first: *other_mode,
                        second: *mode,
                        relays: *relays,
                    });
                }
            }
        }

        if let Some(missing) = OperatingMode::ALL
            .into_iter()
            .find(|mode| !entries.iter().any(|(entry, _)| entry == mode))
        {
            return Err(ModeTableError::MissingMode(missing));
        }

        Ok(Self { entries })
    }

    /// Single-stage heat pump with reversing valve and auxiliary strip heat.
    pub fn heat_pump() -> Self {
        use RelayId::{AuxHeat, Compressor, Fan, ReversingValve};

        Self {
            entries: vec![
                (OperatingMode::Off, RelaySet::EMPTY),
                (OperatingMode::Fan, RelaySet::EMPTY.with(Fan)),
                (
                    OperatingMode::Heat,
                    RelaySet::EMPTY.with(Fan).with(Compressor),
                ),
                (
                    OperatingMode::Cool,
                    RelaySet::EMPTY
                        .with(Fan)
                        .with(Compressor)
                        .with(ReversingValve),
                ),
                (
                    OperatingMode::Aux,
                    RelaySet::EMPTY.with(Fan).with(Compressor).with(AuxHeat),
                ),
            ],
        }
    }

    pub fn relays_for(&self, mode: OperatingMode) -> RelaySet {
        self.entries
            .iter()
            .find(|(entry, _)| *entry == mode)
            .map(|(_, relays)| *relays)
            .unwrap_or(RelaySet::EMPTY)
    }

    /// The mode whose signature is exactly `energized`, if any.
    pub fn mode_for(&self, energized: RelaySet) -> Option<OperatingMode> {
        self.entries
            .iter()
            .find(|(_, relays)| *relays == energized)
            .map(|(mode, _)| *mode)
    }
}

impl Default for ModeTable {
    fn default() -> Self {
        Self::heat_pump()
    }
}
