//! embedded-hal adapter
//!
//! `HalBus` lets a `Session` drive the chain through any
//! `embedded_hal::spi::SpiBus<u8>`, such as rppal's `Spi` (with its `hal`
//! feature) or a microcontroller HAL, instead of the spidev `SpiBus`.

use std::io;

use crate::error::{P9813Error, Result};
use crate::spi::{Bus, DEFAULT_MAX_TRANSFER};

#[derive(Debug)]
pub struct HalBus<S> {
    spi: S,
    max_transfer_size: usize,
}

impl<S> HalBus<S> {
    pub fn new(spi: S) -> Self {
        HalBus {
            spi,
            max_transfer_size: DEFAULT_MAX_TRANSFER,
        }
    }

    /// Limit the size of a single transfer; longer frames are chunked
    pub fn with_max_transfer(mut self, max: usize) -> Self {
        self.max_transfer_size = max;
        self
    }

    pub fn into_inner(self) -> S {
        self.spi
    }
}

impl<S: embedded_hal::spi::SpiBus<u8>> Bus for HalBus<S> {
    fn transfer(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        let mut read = vec![0u8; frame.len()];
        self.spi.transfer(&mut read, frame).map_err(hal_error)?;
        // The bus may return before the last word is clocked out
        self.spi.flush().map_err(hal_error)?;
        Ok(read)
    }

    fn max_transfer_size(&self) -> usize {
        self.max_transfer_size
    }
}

fn hal_error<E: embedded_hal::spi::Error>(err: E) -> P9813Error {
    P9813Error::Io(io::Error::other(format!("{:?}", err.kind())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{self, Color};
    use crate::session::Session;
    use embedded_hal::spi::{ErrorKind, ErrorType, SpiBus as HalSpiBus};
    use embedded_hal_mock::eh1::spi::{Mock as SpiMock, Transaction as SpiTransaction};

    #[test]
    fn test_session_over_embedded_hal() {
        let colors = [Color::new(0, 255, 200), Color::new(255, 50, 20)];
        let bytes = frame::encode(&colors).as_bytes().to_vec();
        let expectations = [
            SpiTransaction::transfer(bytes.clone(), vec![0; bytes.len()]),
            SpiTransaction::flush(),
        ];
        let mut spi = SpiMock::new(&expectations);

        let mut session = Session::new(HalBus::new(spi.clone()), 2).unwrap();
        session.set_colors(colors).unwrap();
        drop(session);

        spi.done();
    }

    #[test]
    fn test_chunked_over_embedded_hal() {
        let colors = [Color::new(1, 2, 3)];
        let bytes = frame::encode(&colors).as_bytes().to_vec();
        let expectations = [
            SpiTransaction::transfer(bytes[..8].to_vec(), vec![0; 8]),
            SpiTransaction::flush(),
            SpiTransaction::transfer(bytes[8..].to_vec(), vec![0; 4]),
            SpiTransaction::flush(),
        ];
        let mut spi = SpiMock::new(&expectations);

        let bus = HalBus::new(spi.clone()).with_max_transfer(8);
        let mut session = Session::new(bus, 1).unwrap();
        session.set_colors(colors).unwrap();
        drop(session);

        spi.done();
    }

    /// Bus whose every operation fails
    struct BrokenSpi;

    impl ErrorType for BrokenSpi {
        type Error = ErrorKind;
    }

    impl HalSpiBus<u8> for BrokenSpi {
        fn read(&mut self, _words: &mut [u8]) -> std::result::Result<(), ErrorKind> {
            Err(ErrorKind::Other)
        }

        fn write(&mut self, _words: &[u8]) -> std::result::Result<(), ErrorKind> {
            Err(ErrorKind::Other)
        }

        fn transfer(
            &mut self,
            _read: &mut [u8],
            _write: &[u8],
        ) -> std::result::Result<(), ErrorKind> {
            Err(ErrorKind::Overrun)
        }

        fn transfer_in_place(&mut self, _words: &mut [u8]) -> std::result::Result<(), ErrorKind> {
            Err(ErrorKind::Other)
        }

        fn flush(&mut self) -> std::result::Result<(), ErrorKind> {
            Ok(())
        }
    }

    #[test]
    fn test_hal_errors_are_io() {
        let mut session = Session::new(HalBus::new(BrokenSpi), 1).unwrap();
        let err = session.set_color(1, 2, 3).unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("Overrun"));
        assert!(!session.in_sync());
    }
}
