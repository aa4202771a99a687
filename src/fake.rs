//! In-memory bus, clock and delay used by the unit tests

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use embedded_hal::delay::DelayNs;

use crate::common::MonotonicClock;
use crate::error::TransportError;
use crate::transport::{RegisterTransport, RegisterValue, Timeout};

/// One recorded bus transaction
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Write {
        device: u8,
        register: u8,
        value: RegisterValue,
    },
    Read {
        device: u8,
        register: u8,
        count: usize,
    },
}

/// Register map per device address
///
/// Writes store the value bytes so later reads see them. Queued replies take
/// priority over stored contents.
#[derive(Default)]
pub struct FakeBus {
    registers: HashMap<(u8, u8), Vec<u8>>,
    queued: HashMap<(u8, u8), VecDeque<Vec<u8>>>,
    latched: HashMap<(u8, u8), Vec<u8>>,
    failing_reads: HashSet<(u8, u8)>,
    failing_writes: HashSet<(u8, u8)>,
    pending_read_failures: HashMap<(u8, u8), usize>,
    short_reads: HashMap<(u8, u8), usize>,
    log: Vec<Op>,
}

impl FakeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, device: u8, register: u8, bytes: &[u8]) {
        self.registers.insert((device, register), bytes.to_vec());
    }

    pub fn queue(&mut self, device: u8, register: u8, bytes: &[u8]) {
        self.queued
            .entry((device, register))
            .or_default()
            .push_back(bytes.to_vec());
    }

    /// Writes to this register store `bytes` instead of the written value
    pub fn latch(&mut self, device: u8, register: u8, bytes: &[u8]) {
        self.latched.insert((device, register), bytes.to_vec());
    }

    /// Fail only the next `count` reads of this register
    pub fn fail_next_reads(&mut self, device: u8, register: u8, count: usize) {
        self.pending_read_failures.insert((device, register), count);
    }

    /// Reads of this register return at most `len` bytes
    pub fn short_reads(&mut self, device: u8, register: u8, len: usize) {
        self.short_reads.insert((device, register), len);
    }

    pub fn fail_reads(&mut self, device: u8, register: u8) {
        self.failing_reads.insert((device, register));
    }

    pub fn fail_writes(&mut self, device: u8, register: u8) {
        self.failing_writes.insert((device, register));
    }

    pub fn log(&self) -> &[Op] {
        &self.log
    }

    pub fn writes(&self) -> Vec<(u8, u8, RegisterValue)> {
        self.log
            .iter()
            .filter_map(|op| match *op {
                Op::Write {
                    device,
                    register,
                    value,
                } => Some((device, register, value)),
                Op::Read { .. } => None,
            })
            .collect()
    }

    pub fn read_count(&self, device: u8, register: u8) -> usize {
        self.log
            .iter()
            .filter(|op| {
                matches!(op, Op::Read { device: d, register: r, .. } if *d == device && *r == register)
            })
            .count()
    }
}

impl RegisterTransport for FakeBus {
    fn write_register(
        &mut self,
        device: u8,
        register: u8,
        value: RegisterValue,
        _timeout: Timeout,
    ) -> Result<(), TransportError> {
        self.log.push(Op::Write {
            device,
            register,
            value,
        });
        if self.failing_writes.contains(&(device, register)) {
            return Err(TransportError::Nack { device });
        }
        let stored = match self.latched.get(&(device, register)) {
            Some(bytes) => bytes.clone(),
            None => value.frame(register)[1..].to_vec(),
        };
        self.registers.insert((device, register), stored);
        Ok(())
    }

    fn read_registers(
        &mut self,
        device: u8,
        register: u8,
        count: usize,
        _timeout: Timeout,
    ) -> Result<Vec<u8>, TransportError> {
        self.log.push(Op::Read {
            device,
            register,
            count,
        });
        if self.failing_reads.contains(&(device, register)) {
            return Err(TransportError::Nack { device });
        }
        if let Some(remaining) = self.pending_read_failures.get_mut(&(device, register)) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransportError::Nack { device });
            }
        }
        let mut data = self
            .queued
            .get_mut(&(device, register))
            .and_then(|q| q.pop_front())
            .or_else(|| self.registers.get(&(device, register)).cloned())
            .unwrap_or_default();
        let len = self
            .short_reads
            .get(&(device, register))
            .map_or(count, |&len| len.min(count));
        data.resize(len, 0);
        Ok(data)
    }
}

/// Clock whose time only moves when a paired [`FakeDelay`] sleeps
#[derive(Clone, Default)]
pub struct FakeClock {
    now: Rc<Cell<u64>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(&self) -> FakeDelay {
        FakeDelay {
            now: Rc::clone(&self.now),
            calls: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl MonotonicClock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

/// Delay that records each call (in ms) and advances the shared clock
#[derive(Clone)]
pub struct FakeDelay {
    now: Rc<Cell<u64>>,
    calls: Rc<RefCell<Vec<u32>>>,
}

impl FakeDelay {
    pub fn standalone() -> Self {
        FakeClock::new().delay()
    }

    pub fn calls(&self) -> Vec<u32> {
        self.calls.borrow().clone()
    }
}

impl DelayNs for FakeDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.now.set(self.now.get() + (ns / 1_000_000) as u64);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.calls.borrow_mut().push(ms);
        self.now.set(self.now.get() + ms as u64);
    }
}
