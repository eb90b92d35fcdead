//! P9813 RGB LED controller driver for Linux spidev
//!
//! The driver is split into a bus handle (`spi`), a pure frame encoder
//! (`frame`) and a device session (`session`) that validates commands and
//! sequences transfers. `hal` runs the session over any embedded-hal SPI bus.
//! `demo` and `config` back the `raspberry_pi` binary.
//!
//! ```no_run
//! use p9813::{Color, Command, Session, SpiConfig};
//!
//! let mut session = Session::open(&SpiConfig::default(), 2)?;
//! session.set_colors([Color::new(0, 255, 200), Color::new(255, 50, 20)])?;
//! session.set(Command::Channel { led: 1, channel: 2, intensity: 0 })?;
//! # Ok::<(), p9813::P9813Error>(())
//! ```

pub mod config;
pub mod demo;
pub mod error;
pub mod frame;
pub mod hal;
pub mod session;
pub mod spi;

// Re-export main types for convenience
pub use config::{Config, SpiConfig, MAX_CLOCK_FREQUENCY};
pub use demo::Demo;
pub use error::{P9813Error, Result};
pub use frame::{encode, Color, Frame};
pub use hal::HalBus;
pub use session::{Command, Session, SessionState, SharedSession};
pub use spi::{Bus, SpiBus};
