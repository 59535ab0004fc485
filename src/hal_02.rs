use super::*;
use core::time::Duration;
use embedded_hal_02::serial::{Read, Write};
use log::*;

/// Line rate the controller firmware listens at
pub const BAUD_RATE: u32 = 115_200;

/// Errors from a `HalSerial`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HalSerialError {
    /// read or write before `open`
    NotOpen,
    /// the peripheral reported a receive error
    Read,
    /// the peripheral reported a transmit error
    Write,
}

/// `Transport` over an embedded-hal 0.2 serial peripheral
///
/// The peripheral is expected to be configured for `BAUD_RATE` already,
/// `open` and `close` only gate traffic. Reads never wait, they take what
/// the receiver holds and return.
#[derive(Debug)]
pub struct HalSerial<S> {
    serial: S,
    open: bool,
}

impl<S> HalSerial<S> {
    /// Wrap a configured peripheral, closed
    pub fn new(serial: S) -> Self {
        HalSerial {
            serial,
            open: false,
        }
    }

    /// Give back the peripheral
    pub fn free(self) -> S {
        self.serial
    }
}

impl<S> Transport for HalSerial<S>
where
    S: Read<u8> + Write<u8>,
{
    type Error = HalSerialError;

    fn open(&mut self, port: &str) -> Result<(), Self::Error> {
        info!("serial peripheral {} at {} baud", port, BAUD_RATE);
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        nb::block!(self.serial.flush()).map_err(|_| HalSerialError::Write)
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, Self::Error> {
        if !self.open {
            return Err(HalSerialError::NotOpen);
        }
        let mut n = 0;
        while n < buf.len() {
            match self.serial.read() {
                Ok(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(_)) => return Err(HalSerialError::Read),
            }
        }
        Ok(n)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        if !self.open {
            return Err(HalSerialError::NotOpen);
        }
        for &byte in bytes {
            nb::block!(self.serial.write(byte)).map_err(|_| HalSerialError::Write)?;
        }
        nb::block!(self.serial.flush()).map_err(|_| HalSerialError::Write)
    }
}
