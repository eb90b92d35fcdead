//! Device session
//!
//! A `Session` owns one bus for its whole life and turns validated commands
//! into full-chain frames. The chips cannot be read back, so the colors kept
//! here are what was last *sent successfully*, never a claim about what the
//! LEDs actually show.

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::config::SpiConfig;
use crate::error::{P9813Error, Result};
use crate::frame::{self, Color, CHANNEL_COUNT};
use crate::spi::{Bus, SpiBus};

/// Logical request against the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Set one channel (0 = red, 1 = green, 2 = blue) of one chip
    Channel {
        led: usize,
        channel: usize,
        intensity: u8,
    },
    /// Set all channels of one chip
    Color { led: usize, color: Color },
    /// Set every chip, nearest first
    Chain(Vec<Color>),
    /// Switch every channel off
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

/// Session shared between threads; the mutex serializes transfers
pub type SharedSession<B> = Arc<Mutex<Session<B>>>;

#[derive(Debug)]
pub struct Session<B: Bus> {
    bus: Option<B>,
    colors: Vec<Color>,
    in_sync: bool,
}

impl Session<SpiBus> {
    /// Open the spidev device described by `config` and drive `chips` chips
    pub fn open(config: &SpiConfig, chips: usize) -> Result<Self> {
        // Checked before the device is claimed and locked
        check_chain(chips)?;
        let bus = SpiBus::open(config)?;
        Session::new(bus, chips)
    }
}

impl<B: Bus> Session<B> {
    pub fn new(bus: B, chips: usize) -> Result<Self> {
        check_chain(chips)?;
        info!("P9813 session opened for {} chip(s)", chips);
        Ok(Session {
            bus: Some(bus),
            colors: vec![Color::OFF; chips],
            in_sync: false,
        })
    }

    pub fn state(&self) -> SessionState {
        if self.bus.is_some() {
            SessionState::Open
        } else {
            SessionState::Closed
        }
    }

    pub fn chips(&self) -> usize {
        self.colors.len()
    }

    /// Colors last sent successfully
    pub fn colors(&self) -> &[Color] {
        &self.colors
    }

    /// False until the first successful `set` and after any failed transfer
    pub fn in_sync(&self) -> bool {
        self.in_sync
    }

    /// Validate, encode and transmit `command`.
    ///
    /// Invalid commands fail before any byte reaches the bus. A transfer
    /// failure aborts the remaining chunks and leaves the stored colors as
    /// they were.
    pub fn set(&mut self, command: Command) -> Result<()> {
        let chips = self.colors.len();
        let bus = self.bus.as_mut().ok_or(P9813Error::SessionClosed)?;

        let next = apply(&self.colors, command)?;
        let frame = frame::encode(&next);

        let max = bus.max_transfer_size();
        for (i, chunk) in frame.chunks(max).enumerate() {
            if let Err(e) = bus.transfer(chunk) {
                warn!(
                    "Transfer of chunk {} failed, chain state unknown: {}",
                    i, e
                );
                self.in_sync = false;
                return Err(e);
            }
        }

        debug!("Updated {} chip(s) with a {} byte frame", chips, frame.len());
        self.colors = next;
        self.in_sync = true;
        Ok(())
    }

    /// Set the color of the first chip
    pub fn set_color(&mut self, r: u8, g: u8, b: u8) -> Result<()> {
        self.set(Command::Color {
            led: 0,
            color: Color::new(r, g, b),
        })
    }

    /// Set the colors of the whole chain
    pub fn set_colors(&mut self, colors: impl AsRef<[Color]>) -> Result<()> {
        self.set(Command::Chain(colors.as_ref().to_vec()))
    }

    /// Release the bus. Later `set` calls fail with `SessionClosed`.
    pub fn close(&mut self) {
        if self.bus.take().is_some() {
            info!("P9813 session closed");
        }
    }

    pub fn into_shared(self) -> SharedSession<B> {
        Arc::new(Mutex::new(self))
    }
}

impl<B: Bus> Drop for Session<B> {
    fn drop(&mut self) {
        self.close();
    }
}

fn check_chain(chips: usize) -> Result<()> {
    if chips == 0 {
        return Err(P9813Error::ConfigurationError(
            "chain must contain at least one chip".to_string(),
        ));
    }
    Ok(())
}

/// Chain colors after `command`, or `InvalidCommand` if it doesn't fit
fn apply(current: &[Color], command: Command) -> Result<Vec<Color>> {
    let chips = current.len();
    let check_led = |led: usize| {
        if led >= chips {
            Err(P9813Error::InvalidCommand(format!(
                "led {} out of range for a chain of {}",
                led, chips
            )))
        } else {
            Ok(())
        }
    };

    let mut next = current.to_vec();
    match command {
        Command::Channel {
            led,
            channel,
            intensity,
        } => {
            check_led(led)?;
            if channel >= CHANNEL_COUNT {
                return Err(P9813Error::InvalidCommand(format!(
                    "channel {} out of range (0-{})",
                    channel,
                    CHANNEL_COUNT - 1
                )));
            }
            next[led] = next[led].with_channel(channel, intensity);
        }
        Command::Color { led, color } => {
            check_led(led)?;
            next[led] = color;
        }
        Command::Chain(colors) => {
            if colors.len() != chips {
                return Err(P9813Error::InvalidCommand(format!(
                    "{} colors for a chain of {}",
                    colors.len(),
                    chips
                )));
            }
            next = colors;
        }
        Command::Off => next.fill(Color::OFF),
    }
    Ok(next)
}
