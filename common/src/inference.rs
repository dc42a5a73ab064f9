use std::fmt;

use crate::{
    modes::{ModeTable, RelaySet},
    relay::{read_energized, RelayBank, RelayError},
    types::OperatingMode,
};

/// Equipment mode as read back from the relays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferredMode {
    Known(OperatingMode),
    /// The energized relays match no mode signature. Callers must not act
    /// on this, and must not treat it as `off`.
    Indeterminate(RelaySet),
}

impl InferredMode {
    pub fn mode(self) -> Option<OperatingMode> {
        match self {
            Self::Known(mode) => Some(mode),
            Self::Indeterminate(_) => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Known(mode) => mode.as_str(),
            Self::Indeterminate(_) => "indeterminate",
        }
    }
}

impl fmt::Display for InferredMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(mode) => write!(f, "{mode}"),
            Self::Indeterminate(relays) => write!(f, "indeterminate {relays}"),
        }
    }
}

pub fn infer_mode<B: RelayBank + ?Sized>(
    bank: &B,
    table: &ModeTable,
) -> Result<InferredMode, RelayError> {
    let energized = read_energized(bank)?;
    Ok(match table.mode_for(energized) {
        Some(mode) => InferredMode::Known(mode),
        None => InferredMode::Indeterminate(energized),
    })
}
