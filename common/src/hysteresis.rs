use crate::types::{OperatingMode, Setpoints};

/// Active/idle decision for `mode` at `temperature`.
///
/// Inside the band `setpoint ± tolerance` the previous decision is kept, so
/// a reading hovering at the setpoint cannot chatter the equipment.
pub fn should_be_active(
    mode: OperatingMode,
    temperature: f32,
    setpoints: &Setpoints,
    tolerance: f32,
    previously_active: bool,
) -> bool {
    let Some(setpoint) = setpoints.for_mode(mode) else {
        return false;
    };

    let lower_bound = setpoint - tolerance;
    let upper_bound = setpoint + tolerance;

    if mode.is_heating() {
        if temperature < lower_bound {
            true
        } else if temperature > upper_bound {
            false
        } else {
            previously_active
        }
    } else if temperature > upper_bound {
        true
    } else if temperature < lower_bound {
        false
    } else {
        previously_active
    }
}
