use heatpump_common::{MemoryRelayBank, RelayBackend, RelayBank, RelayConfig, RelayError, RelayId};

/// Relay backend chosen at startup.
#[derive(Debug)]
pub enum HostRelays {
    Simulated(MemoryRelayBank),
    #[cfg(feature = "rpi")]
    Gpio(gpio::GpioRelayBank),
}

impl HostRelays {
    pub fn from_config(config: &RelayConfig) -> anyhow::Result<Self> {
        match config.backend {
            RelayBackend::Simulated => Ok(Self::Simulated(MemoryRelayBank::new())),
            #[cfg(feature = "rpi")]
            RelayBackend::Gpio => Ok(Self::Gpio(gpio::GpioRelayBank::open(config)?)),
            #[cfg(not(feature = "rpi"))]
            RelayBackend::Gpio => {
                anyhow::bail!("gpio relay backend requires building with the `rpi` feature")
            }
        }
    }
}

impl RelayBank for HostRelays {
    fn read(&self, relay: RelayId) -> Result<bool, RelayError> {
        match self {
            Self::Simulated(bank) => bank.read(relay),
            #[cfg(feature = "rpi")]
            Self::Gpio(bank) => bank.read(relay),
        }
    }

    fn write(&mut self, relay: RelayId, energized: bool) -> Result<(), RelayError> {
        match self {
            Self::Simulated(bank) => bank.write(relay, energized),
            #[cfg(feature = "rpi")]
            Self::Gpio(bank) => bank.write(relay, energized),
        }
    }
}

#[cfg(feature = "rpi")]
mod gpio {
    use anyhow::Context;
    use rppal::gpio::{Gpio, OutputPin};

    use heatpump_common::{RelayBank, RelayConfig, RelayError, RelayId};

    /// Relay HAT outputs on the Raspberry Pi header, active high.
    #[derive(Debug)]
    pub struct GpioRelayBank {
        pins: Vec<(RelayId, OutputPin)>,
    }

    impl GpioRelayBank {
        pub fn open(config: &RelayConfig) -> anyhow::Result<Self> {
            let gpio = Gpio::new().context("failed to open gpio peripheral")?;
            let mut pins = Vec::with_capacity(RelayId::ALL.len());
            for relay in RelayId::ALL {
                let number = config.pin(relay);
                // Leave the current level alone so a restart does not cycle
                // equipment that is already running.
                let mut pin = gpio
                    .get(number)
                    .with_context(|| format!("failed to claim gpio {number} for {relay}"))?
                    .into_output();
                pin.set_reset_on_drop(false);
                pins.push((relay, pin));
            }
            Ok(Self { pins })
        }

        fn pin(&self, relay: RelayId) -> &OutputPin {
            &self.pins[relay_index(relay)].1
        }
    }

    fn relay_index(relay: RelayId) -> usize {
        RelayId::ALL
            .iter()
            .position(|candidate| *candidate == relay)
            .unwrap_or_default()
    }

    impl RelayBank for GpioRelayBank {
        /// Level of the pin as sampled from the level register. This process
        /// is the only driver of these pins, so the output level is the
        /// relay coil state; switching the pin to an input to sample it
        /// would drop the coil.
        fn read(&self, relay: RelayId) -> Result<bool, RelayError> {
            Ok(self.pin(relay).is_set_high())
        }

        fn write(&mut self, relay: RelayId, energized: bool) -> Result<(), RelayError> {
            let pin = &mut self.pins[relay_index(relay)].1;
            if energized {
                pin.set_high();
            } else {
                pin.set_low();
            }
            Ok(())
        }
    }
}
