//! Fault-sense input line.
//!
//! The supply monitor pulls the line low while mains is missing. A single
//! read can catch a glitch, so the level only counts as active once every
//! sample in a short burst agrees.

use embedded_hal::digital::InputPin;

use crate::config::PanicConfig;

pub struct FaultLine<P: InputPin> {
    pin: P,
    samples: u8,
}

impl<P: InputPin> FaultLine<P> {
    /// `samples` is clamped to at least one read.
    pub fn new(pin: P, samples: u8) -> Self {
        Self {
            pin,
            samples: samples.max(1),
        }
    }

    /// Debounce with `config.fault_debounce_samples` reads.
    pub fn from_config(pin: P, config: &PanicConfig) -> Self {
        Self::new(pin, config.fault_debounce_samples)
    }

    /// Debounced level: `true` only if all samples read low.
    pub fn is_active(&mut self) -> Result<bool, P::Error> {
        for _ in 0..self.samples {
            if self.pin.is_high()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Single undebounced read, for the interrupt handler.
    pub fn is_active_raw(&mut self) -> Result<bool, P::Error> {
        self.pin.is_low()
    }

    pub fn release(self) -> P {
        self.pin
    }
}
