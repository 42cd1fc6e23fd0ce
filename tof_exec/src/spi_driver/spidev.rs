//! Opening the sensor board's SPI device.
//!
//! On Linux the bus is a spidev device driven through `rppal`. The kernel's spidev buffer must be
//! at least one frame long (`spidev.bufsiz=28900` or more on the kernel command line), otherwise
//! frame transfers fail with a transfer error. On other hosts no device exists and opening always
//! fails with [`TofSpiError::DeviceUnavailable`].
//!
//! The board writes its current status into byte 4 of the frame header as the frame is clocked
//! out, the same value a poll would have returned at that moment. A frame read while nothing was
//! ready still transfers, but holds an old frame or a mix of two, and its header status is a wait
//! time (1 to 250) or 0. Such frames are dropped as stale. If every frame is dropped on real
//! hardware, the dropped status is in the read warning: 0 means the board is not answering
//! (check wiring, SPI mode and clock), a wait time means reads are racing the board's imaging.
//! A `spidev.bufsiz` smaller than a frame shows up as a transfer error instead.

use super::{TofSpi, TofSpiError};
use crate::params::SpiParams;

#[cfg(target_os = "linux")]
pub use linux::*;

#[cfg(not(target_os = "linux"))]
pub use other::*;

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use log::info;
    use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

    /// The SPI device type used on this host.
    pub type SpiDev = Spi;

    /// Open and configure the bus: mode 0, 8 bits per word, the configured clock.
    pub fn open(params: &SpiParams) -> Result<TofSpi<SpiDev>, TofSpiError> {
        let bus = match params.bus {
            0 => Bus::Spi0,
            1 => Bus::Spi1,
            2 => Bus::Spi2,
            3 => Bus::Spi3,
            4 => Bus::Spi4,
            5 => Bus::Spi5,
            6 => Bus::Spi6,
            b => {
                return Err(TofSpiError::DeviceUnavailable(format!(
                    "there is no SPI bus {}",
                    b
                )))
            }
        };

        let slave_select = match params.slave_select {
            0 => SlaveSelect::Ss0,
            1 => SlaveSelect::Ss1,
            2 => SlaveSelect::Ss2,
            s => {
                return Err(TofSpiError::DeviceUnavailable(format!(
                    "slave select {} is not supported",
                    s
                )))
            }
        };

        let spi = Spi::new(bus, slave_select, params.clock_hz, Mode::Mode0)
            .map_err(|e| TofSpiError::DeviceUnavailable(e.to_string()))?;

        spi.set_bits_per_word(8)
            .map_err(|e| TofSpiError::DeviceUnavailable(e.to_string()))?;

        info!(
            "Opened /dev/spidev{}.{} at {} Hz",
            params.bus, params.slave_select, params.clock_hz
        );

        Ok(TofSpi::new(spi))
    }
}

#[cfg(not(target_os = "linux"))]
mod other {
    use super::*;
    use embedded_hal::blocking::spi::{Transfer, Write};

    /// No SPI device exists on this host, so this type has no values.
    pub enum SpiDev {}

    impl Transfer<u8> for SpiDev {
        type Error = ();

        fn transfer<'w>(&mut self, _: &'w mut [u8]) -> Result<&'w [u8], ()> {
            match *self {}
        }
    }

    impl Write<u8> for SpiDev {
        type Error = ();

        fn write(&mut self, _: &[u8]) -> Result<(), ()> {
            match *self {}
        }
    }

    pub fn open(params: &SpiParams) -> Result<TofSpi<SpiDev>, TofSpiError> {
        Err(TofSpiError::DeviceUnavailable(format!(
            "SPI bus {} is only available on Linux hosts",
            params.bus
        )))
    }
}
