//! SPI bus handle
//!
//! `SpiBus` owns one `/dev/spidevB.C` character device through rppal. A
//! process-wide claim list keeps two handles from driving the same bus and
//! chip select at once, and a non-blocking `flock` on the device node keeps
//! other processes out. Both are released when the handle is dropped.

use log::{debug, info, warn};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use parking_lot::Mutex;
use rppal::spi::{BitOrder, Bus as SpiBusIndex, Mode, SlaveSelect, Spi};
use std::fs::File;
use std::io;

use crate::config::SpiConfig;
use crate::error::{P9813Error, Result};

/// Kernel spidev buffer size parameter
const BUF_SIZE_SYSFS: &str = "/sys/module/spidev/parameters/bufsiz";

/// spidev's default buffer size when sysfs can't tell us
pub const DEFAULT_MAX_TRANSFER: usize = 4096;

/// Raw transmit/receive access to one SPI device
pub trait Bus {
    /// Clock `frame` out and return the bytes clocked in.
    fn transfer(&mut self, frame: &[u8]) -> Result<Vec<u8>>;

    /// Largest frame a single `transfer` accepts
    fn max_transfer_size(&self) -> usize {
        DEFAULT_MAX_TRANSFER
    }
}

impl<B: Bus + ?Sized> Bus for Box<B> {
    fn transfer(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        (**self).transfer(frame)
    }

    fn max_transfer_size(&self) -> usize {
        (**self).max_transfer_size()
    }
}

static CLAIMED: Mutex<Vec<(u8, u8)>> = parking_lot::const_mutex(Vec::new());

/// Exclusive claim on a bus/chip-select pair within this process
#[derive(Debug)]
struct Claim {
    key: (u8, u8),
}

impl Claim {
    fn acquire(config: &SpiConfig) -> Result<Self> {
        let key = (config.bus, config.chip_select);
        let mut claimed = CLAIMED.lock();
        if claimed.contains(&key) {
            return Err(P9813Error::DeviceUnavailable {
                path: config.device_path(),
                reason: "already claimed by another session".to_string(),
            });
        }
        claimed.push(key);
        Ok(Claim { key })
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        CLAIMED.lock().retain(|k| *k != self.key);
    }
}

/// Exclusive advisory lock on the device node, held until dropped
fn lock_device(path: &str) -> Result<Flock<File>> {
    let file = File::open(path).map_err(|e| P9813Error::DeviceUnavailable {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, errno)| {
        let reason = if errno == Errno::EWOULDBLOCK {
            "locked by another process".to_string()
        } else {
            format!("cannot lock device: {}", errno)
        };
        P9813Error::DeviceUnavailable {
            path: path.to_string(),
            reason,
        }
    })
}

/// spidev-backed bus handle
pub struct SpiBus {
    spi: Spi,
    device_path: String,
    max_transfer_size: usize,
    // Dropped after `spi` so the device is closed before it can be reclaimed
    _lock: Flock<File>,
    _claim: Claim,
}

impl std::fmt::Debug for SpiBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpiBus")
            .field("device_path", &self.device_path)
            .field("max_transfer_size", &self.max_transfer_size)
            .finish()
    }
}

impl SpiBus {
    pub fn open(config: &SpiConfig) -> Result<Self> {
        config.validate()?;

        let device_path = config.device_path();
        debug!(
            "Opening SPI device {} (mode={}, speed={} Hz)",
            device_path, config.mode, config.speed_hz
        );

        let claim = Claim::acquire(config)?;
        let lock = lock_device(&device_path)?;

        let spi = Spi::new(
            bus_index(config.bus)?,
            slave_select(config.chip_select)?,
            config.speed_hz,
            spi_mode(config.mode)?,
        )
        .map_err(|e| open_error(&device_path, e))?;

        if config.lsb_first {
            spi.set_bit_order(BitOrder::LsbFirst)
                .map_err(|e| open_error(&device_path, e))?;
        }

        let max_transfer_size = max_kernel_buf_size();
        info!(
            "SPI device opened: {} ({} kHz, mode {}, max transfer {} bytes)",
            device_path,
            config.speed_hz / 1000,
            config.mode,
            max_transfer_size
        );

        Ok(SpiBus {
            spi,
            device_path,
            max_transfer_size,
            _lock: lock,
            _claim: claim,
        })
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

impl Bus for SpiBus {
    fn transfer(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        debug!("Transferring {} bytes to {}", frame.len(), self.device_path);

        let mut read = vec![0u8; frame.len()];
        let written = self.spi.transfer(&mut read, frame).map_err(transfer_error)?;
        check_written(written, frame.len())?;

        Ok(read)
    }

    fn max_transfer_size(&self) -> usize {
        self.max_transfer_size
    }
}

fn bus_index(bus: u8) -> Result<SpiBusIndex> {
    Ok(match bus {
        0 => SpiBusIndex::Spi0,
        1 => SpiBusIndex::Spi1,
        2 => SpiBusIndex::Spi2,
        3 => SpiBusIndex::Spi3,
        4 => SpiBusIndex::Spi4,
        5 => SpiBusIndex::Spi5,
        6 => SpiBusIndex::Spi6,
        _ => {
            return Err(P9813Error::ConfigurationError(format!(
                "SPI bus {} not supported",
                bus
            )))
        }
    })
}

fn slave_select(cs: u8) -> Result<SlaveSelect> {
    Ok(match cs {
        0 => SlaveSelect::Ss0,
        1 => SlaveSelect::Ss1,
        2 => SlaveSelect::Ss2,
        3 => SlaveSelect::Ss3,
        4 => SlaveSelect::Ss4,
        5 => SlaveSelect::Ss5,
        6 => SlaveSelect::Ss6,
        7 => SlaveSelect::Ss7,
        8 => SlaveSelect::Ss8,
        9 => SlaveSelect::Ss9,
        10 => SlaveSelect::Ss10,
        11 => SlaveSelect::Ss11,
        12 => SlaveSelect::Ss12,
        13 => SlaveSelect::Ss13,
        14 => SlaveSelect::Ss14,
        15 => SlaveSelect::Ss15,
        _ => {
            return Err(P9813Error::ConfigurationError(format!(
                "chip select {} not supported",
                cs
            )))
        }
    })
}

fn spi_mode(mode: u8) -> Result<Mode> {
    Ok(match mode {
        0 => Mode::Mode0,
        1 => Mode::Mode1,
        2 => Mode::Mode2,
        3 => Mode::Mode3,
        _ => {
            return Err(P9813Error::ConfigurationError(format!(
                "SPI mode {} (must be 0-3)",
                mode
            )))
        }
    })
}

/// Failures while opening: a missing or forbidden device file means the bus
/// is unavailable, anything the driver refuses is a configuration problem.
fn open_error(path: &str, err: rppal::spi::Error) -> P9813Error {
    match err {
        rppal::spi::Error::Io(e) if e.kind() == io::ErrorKind::InvalidInput => {
            P9813Error::ConfigurationError(format!("{}: {}", path, e))
        }
        rppal::spi::Error::Io(e) => P9813Error::DeviceUnavailable {
            path: path.to_string(),
            reason: e.to_string(),
        },
        other => P9813Error::ConfigurationError(format!("{}: {}", path, other)),
    }
}

fn check_written(written: usize, expected: usize) -> Result<()> {
    if written != expected {
        return Err(P9813Error::Io(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("short transfer: {} of {} bytes", written, expected),
        )));
    }
    Ok(())
}

fn transfer_error(err: rppal::spi::Error) -> P9813Error {
    match err {
        rppal::spi::Error::Io(e) => P9813Error::Io(e),
        other => P9813Error::Io(io::Error::other(other.to_string())),
    }
}

fn max_kernel_buf_size() -> usize {
    match std::fs::read_to_string(BUF_SIZE_SYSFS) {
        Ok(content) => match content.trim().parse::<usize>() {
            Ok(size) if size > 0 => size,
            _ => {
                warn!("Invalid buffer size in {}", BUF_SIZE_SYSFS);
                DEFAULT_MAX_TRANSFER
            }
        },
        Err(_) => {
            debug!(
                "Cannot read {}, assuming {} bytes",
                BUF_SIZE_SYSFS, DEFAULT_MAX_TRANSFER
            );
            DEFAULT_MAX_TRANSFER
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_rejects_fast_clock_before_io() {
        // bus 6 / cs 15 never exists on test machines; validation fails first
        let config = SpiConfig {
            bus: 6,
            chip_select: 15,
            speed_hz: 20_000_000,
            ..Default::default()
        };
        assert!(matches!(
            SpiBus::open(&config),
            Err(P9813Error::ConfigurationError(_))
        ));
        // nothing was claimed
        assert!(!CLAIMED.lock().contains(&(6, 15)));
    }

    #[test]
    fn test_claim_is_exclusive_and_released() {
        let config = SpiConfig {
            bus: 5,
            chip_select: 14,
            ..Default::default()
        };
        let first = Claim::acquire(&config).unwrap();
        assert!(matches!(
            Claim::acquire(&config),
            Err(P9813Error::DeviceUnavailable { .. })
        ));
        drop(first);
        assert!(Claim::acquire(&config).is_ok());
    }

    #[test]
    fn test_open_missing_device_releases_claim() {
        let config = SpiConfig {
            bus: 4,
            chip_select: 13,
            ..Default::default()
        };
        if std::path::Path::new(&config.device_path()).exists() {
            return;
        }
        assert!(matches!(
            SpiBus::open(&config),
            Err(P9813Error::DeviceUnavailable { .. })
        ));
        assert!(!CLAIMED.lock().contains(&(4, 13)));
    }

    #[test]
    fn test_mode_mapping() {
        assert!(matches!(spi_mode(3), Ok(Mode::Mode3)));
        assert!(spi_mode(4).is_err());
        assert!(bus_index(7).is_err());
        assert!(slave_select(16).is_err());
    }

    #[test]
    fn test_open_error_classification() {
        let missing = rppal::spi::Error::Io(io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(
            open_error("/dev/spidev0.0", missing),
            P9813Error::DeviceUnavailable { .. }
        ));

        let rejected = rppal::spi::Error::Io(io::Error::from(io::ErrorKind::InvalidInput));
        assert!(matches!(
            open_error("/dev/spidev0.0", rejected),
            P9813Error::ConfigurationError(_)
        ));
    }

    #[test]
    fn test_device_lock_is_exclusive_and_released() {
        let node = tempfile::NamedTempFile::new().unwrap();
        let path = node.path().to_str().unwrap();

        let first = lock_device(path).unwrap();
        match lock_device(path) {
            Err(P9813Error::DeviceUnavailable { reason, .. }) => {
                assert_eq!(reason, "locked by another process")
            }
            Err(other) => panic!("expected DeviceUnavailable, got {:?}", other),
            Ok(_) => panic!("device locked twice"),
        }
        drop(first);
        assert!(lock_device(path).is_ok());
    }

    #[test]
    fn test_device_lock_missing_node() {
        assert!(matches!(
            lock_device("/nonexistent/spidev9.9"),
            Err(P9813Error::DeviceUnavailable { .. })
        ));
    }

    #[test]
    fn test_short_transfer_is_io_error() {
        assert!(check_written(12, 12).is_ok());
        match check_written(8, 12) {
            Err(P9813Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::WriteZero),
            other => panic!("expected Io, got {:?}", other),
        }
    }

    #[test]
    fn test_transfer_errors_are_io() {
        let io_err = rppal::spi::Error::Io(io::Error::from(io::ErrorKind::BrokenPipe));
        match transfer_error(io_err) {
            P9813Error::Io(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("expected Io, got {:?}", other),
        }

        let driver_err = rppal::spi::Error::BitsPerWordNotSupported(9);
        let err = transfer_error(driver_err);
        assert!(matches!(err, P9813Error::Io(_)));
        assert!(err.is_transient());
    }
}
