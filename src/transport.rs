//! Register-level bus access
//!
//! Both chips speak the same protocol: a register write is the register
//! address followed by the value bytes, and a register read is a write of the
//! register address followed by a repeated-START read of N bytes. The read
//! must stay a single transaction; splitting it lets the MAX30102 FIFO read
//! pointer advance between the address write and the data read.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use embedded_hal::i2c::{self, ErrorKind};

use crate::error::TransportError;

/// How long a transaction may block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// Block until the bus reports definite success or failure
    #[default]
    Blocking,
    /// Give up after the given duration (transport permitting)
    After(Duration),
}

/// Value written to a register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterValue {
    /// 8-bit register (MAX30102)
    Byte(u8),
    /// 16-bit register, sent MSB first (INA219)
    Word(u16),
}

impl RegisterValue {
    /// Encode as a register write frame: `[register, value...]`
    pub fn frame(self, register: u8) -> Vec<u8> {
        match self {
            RegisterValue::Byte(b) => vec![register, b],
            RegisterValue::Word(w) => {
                let [hi, lo] = w.to_be_bytes();
                vec![register, hi, lo]
            }
        }
    }
}

/// Register transactions against a device address
pub trait RegisterTransport {
    /// Write one register
    fn write_register(
        &mut self,
        device: u8,
        register: u8,
        value: RegisterValue,
        timeout: Timeout,
    ) -> Result<(), TransportError>;

    /// Write the register pointer, then read `count` bytes, as one transaction
    fn read_registers(
        &mut self,
        device: u8,
        register: u8,
        count: usize,
        timeout: Timeout,
    ) -> Result<Vec<u8>, TransportError>;
}

impl<T: RegisterTransport + ?Sized> RegisterTransport for &mut T {
    fn write_register(
        &mut self,
        device: u8,
        register: u8,
        value: RegisterValue,
        timeout: Timeout,
    ) -> Result<(), TransportError> {
        (**self).write_register(device, register, value, timeout)
    }

    fn read_registers(
        &mut self,
        device: u8,
        register: u8,
        count: usize,
        timeout: Timeout,
    ) -> Result<Vec<u8>, TransportError> {
        (**self).read_registers(device, register, count, timeout)
    }
}

/// One bus handle shared by several drivers on the same thread
///
/// Each transaction borrows the bus for its duration only, so the drivers
/// take turns without locking.
pub struct SharedBus<T> {
    bus: Rc<RefCell<T>>,
}

impl<T> SharedBus<T> {
    pub fn new(bus: T) -> Self {
        Self {
            bus: Rc::new(RefCell::new(bus)),
        }
    }

    /// Run `f` with exclusive access to the underlying bus
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.bus.borrow_mut())
    }
}

impl<T> Clone for SharedBus<T> {
    fn clone(&self) -> Self {
        Self {
            bus: Rc::clone(&self.bus),
        }
    }
}

impl<T: RegisterTransport> RegisterTransport for SharedBus<T> {
    fn write_register(
        &mut self,
        device: u8,
        register: u8,
        value: RegisterValue,
        timeout: Timeout,
    ) -> Result<(), TransportError> {
        let mut bus = self
            .bus
            .try_borrow_mut()
            .map_err(|_| TransportError::Bus("bus already in use".to_string()))?;
        bus.write_register(device, register, value, timeout)
    }

    fn read_registers(
        &mut self,
        device: u8,
        register: u8,
        count: usize,
        timeout: Timeout,
    ) -> Result<Vec<u8>, TransportError> {
        let mut bus = self
            .bus
            .try_borrow_mut()
            .map_err(|_| TransportError::Bus("bus already in use".to_string()))?;
        bus.read_registers(device, register, count, timeout)
    }
}

/// Adapter for any `embedded-hal` I2C bus
///
/// `embedded-hal` transfers have no per-call deadline; they block until the
/// HAL returns, so `Timeout::After` is left to the bus configuration.
pub struct HalTransport<I2C> {
    i2c: I2C,
}

impl<I2C: i2c::I2c> HalTransport<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self { i2c }
    }

    /// Release the wrapped bus
    pub fn release(self) -> I2C {
        self.i2c
    }
}

fn map_hal_error<E: i2c::Error>(device: u8, err: E) -> TransportError {
    match err.kind() {
        ErrorKind::NoAcknowledge(_) => TransportError::Nack { device },
        kind => TransportError::Bus(format!("{:?}", kind)),
    }
}

impl<I2C: i2c::I2c> RegisterTransport for HalTransport<I2C> {
    fn write_register(
        &mut self,
        device: u8,
        register: u8,
        value: RegisterValue,
        _timeout: Timeout,
    ) -> Result<(), TransportError> {
        self.i2c
            .write(device, &value.frame(register))
            .map_err(|e| map_hal_error(device, e))
    }

    fn read_registers(
        &mut self,
        device: u8,
        register: u8,
        count: usize,
        _timeout: Timeout,
    ) -> Result<Vec<u8>, TransportError> {
        let mut data = vec![0u8; count];
        self.i2c
            .write_read(device, &[register], &mut data)
            .map_err(|e| map_hal_error(device, e))?;
        Ok(data)
    }
}
