//! MAX30102 optical biosensor driver (red/IR FIFO, die temperature, proximity)

use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};

use crate::error::{Result, SensorError, TransportError};
use crate::transport::{RegisterTransport, RegisterValue, Timeout};

/// MAX30102 I2C address (fixed)
pub const MAX30102_ADDRESS: u8 = 0x57;

// System control and identity
const REG_MODE_CONFIG: u8 = 0x09;
const REG_SPO2_CONFIG: u8 = 0x0A;
const REG_REV_ID: u8 = 0xFE;
const REG_PART_ID: u8 = 0xFF;

// LED drive and proximity
const REG_LED1_PA: u8 = 0x0C;        // Red
const REG_LED2_PA: u8 = 0x0D;        // IR
const REG_PILOT_PA: u8 = 0x10;
const REG_PROX_INT_THR: u8 = 0x30;

// FIFO
const REG_FIFO_WR_PTR: u8 = 0x04;
const REG_OVF_COUNTER: u8 = 0x05;
const REG_FIFO_RD_PTR: u8 = 0x06;
const REG_FIFO_DATA: u8 = 0x07;
const REG_FIFO_CONFIG: u8 = 0x08;

// Die temperature
const REG_TEMP_INT: u8 = 0x1F;
const REG_TEMP_EN: u8 = 0x21;

// Multi-LED slot control (slots 1 and 2)
const REG_MULTI_LED_1: u8 = 0x11;

// Expected PART_ID value
const PART_ID_VALUE: u8 = 0x15;

const MODE_RESET: u8 = 0x40;
const TEMP_EN_BIT: u8 = 0x01;
const RESET_DELAY_MS: u32 = 100;

// Temperature conversion poll: 20 x 10 ms bounds the wait at ~200 ms
const TEMP_POLL_ATTEMPTS: usize = 20;
const TEMP_POLL_INTERVAL_MS: u32 = 10;
const TEMP_FRACTION_STEP: f32 = 0.0625;

// FIFO constants
const FIFO_SAMPLE_SIZE: usize = 6;      // 3 bytes red + 3 bytes IR
const SAMPLE_MASK: u32 = 0x3FFFF;       // 18-bit ADC

/// Operating mode (MODE_CONFIG bits 2-0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedMode {
    /// Red only
    HeartRate = 0x02,
    /// Red + IR
    SpO2 = 0x03,
    /// Slot-driven LED sequence
    MultiLed = 0x07,
}

/// SpO2 ADC full-scale range (SPO2_CONFIG bits 6-5)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcRange {
    Na2048 = 0,
    Na4096 = 1,
    Na8192 = 2,
    Na16384 = 3,
}

/// Samples per second (SPO2_CONFIG bits 4-2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRate {
    Hz50 = 0,
    Hz100 = 1,
    Hz200 = 2,
    Hz400 = 3,
    Hz800 = 4,
    Hz1000 = 5,
    Hz1600 = 6,
    Hz3200 = 7,
}

/// LED pulse width, which also sets ADC resolution (SPO2_CONFIG bits 1-0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseWidth {
    /// 69 us, 15-bit
    Us69 = 0,
    /// 118 us, 16-bit
    Us118 = 1,
    /// 215 us, 17-bit
    Us215 = 2,
    /// 411 us, 18-bit
    Us411 = 3,
}

/// SPO2_CONFIG register (0x0A)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpO2Config {
    pub adc_range: AdcRange,
    pub sample_rate: SampleRate,
    pub pulse_width: PulseWidth,
}

impl SpO2Config {
    pub fn pack(&self) -> u8 {
        ((self.adc_range as u8 & 0x03) << 5)
            | ((self.sample_rate as u8 & 0x07) << 2)
            | (self.pulse_width as u8 & 0x03)
    }

    pub fn unpack(raw: u8) -> Self {
        let adc_range = match (raw >> 5) & 0x03 {
            0 => AdcRange::Na2048,
            1 => AdcRange::Na4096,
            2 => AdcRange::Na8192,
            _ => AdcRange::Na16384,
        };
        let sample_rate = match (raw >> 2) & 0x07 {
            0 => SampleRate::Hz50,
            1 => SampleRate::Hz100,
            2 => SampleRate::Hz200,
            3 => SampleRate::Hz400,
            4 => SampleRate::Hz800,
            5 => SampleRate::Hz1000,
            6 => SampleRate::Hz1600,
            _ => SampleRate::Hz3200,
        };
        let pulse_width = match raw & 0x03 {
            0 => PulseWidth::Us69,
            1 => PulseWidth::Us118,
            2 => PulseWidth::Us215,
            _ => PulseWidth::Us411,
        };
        Self {
            adc_range,
            sample_rate,
            pulse_width,
        }
    }
}

/// Map a samples-per-FIFO-entry count to its 3-bit SMP_AVE code
///
/// Counts outside {1, 2, 4, 8, 16, 32} select code 0 (no averaging).
pub fn sample_average_code(sample_avg: u8) -> u8 {
    match sample_avg {
        2 => 1,
        4 => 2,
        8 => 3,
        16 => 4,
        32 => 5,
        _ => 0,
    }
}

/// FIFO_CONFIG register (0x08)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FifoConfig {
    /// SMP_AVE code, bits 7-5
    pub sample_avg_code: u8,
    /// FIFO_ROLLOVER_EN, bit 4
    pub rollover: bool,
    /// FIFO_A_FULL, bits 3-0
    pub almost_full: u8,
}

impl FifoConfig {
    pub fn pack(&self) -> u8 {
        ((self.sample_avg_code & 0x07) << 5) | ((self.rollover as u8) << 4) | (self.almost_full & 0x0F)
    }

    pub fn unpack(raw: u8) -> Self {
        Self {
            sample_avg_code: raw >> 5,
            rollover: raw & 0x10 != 0,
            almost_full: raw & 0x0F,
        }
    }
}

/// LED source for a multi-LED time slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedSlot {
    Disabled = 0,
    Red = 1,
    Ir = 2,
    PilotRed = 5,
    PilotIr = 6,
}

/// MULTI_LED_1 register (0x11): slot 1 in bits 2-0, slot 2 in bits 6-4
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiLedSlots {
    pub slot1: LedSlot,
    pub slot2: LedSlot,
}

impl MultiLedSlots {
    /// Slot 1 red, slot 2 infrared
    pub const RED_IR: Self = Self {
        slot1: LedSlot::Red,
        slot2: LedSlot::Ir,
    };

    pub fn pack(&self) -> u8 {
        ((self.slot2 as u8 & 0x07) << 4) | (self.slot1 as u8 & 0x07)
    }
}

/// Startup configuration, written once by [`OpticalSensor::init`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpticalSensorConfig {
    /// Samples averaged per FIFO entry: 1, 2, 4, 8, 16 or 32
    pub sample_avg: u8,
    pub mode: LedMode,
    pub adc_range: AdcRange,
    pub sample_rate: SampleRate,
    pub pulse_width: PulseWidth,
    /// LED1 drive current, ~0.2 mA per unit
    pub led_current_red: u8,
    /// LED2 drive current, ~0.2 mA per unit
    pub led_current_ir: u8,
    pub fifo_rollover: bool,
    /// Free FIFO slots that raise the almost-full interrupt (0-15)
    pub fifo_almost_full: u8,
}

impl Default for OpticalSensorConfig {
    fn default() -> Self {
        Self {
            sample_avg: 4,
            mode: LedMode::SpO2,
            adc_range: AdcRange::Na4096,
            sample_rate: SampleRate::Hz100,
            pulse_width: PulseWidth::Us411,
            led_current_red: 0x64,
            led_current_ir: 0x64,
            fifo_rollover: true,
            fifo_almost_full: 0,
        }
    }
}

impl OpticalSensorConfig {
    /// Same drive current on both LEDs
    pub fn with_led_current(mut self, current: u8) -> Self {
        self.led_current_red = current;
        self.led_current_ir = current;
        self
    }

    pub fn spo2_config(&self) -> SpO2Config {
        SpO2Config {
            adc_range: self.adc_range,
            sample_rate: self.sample_rate,
            pulse_width: self.pulse_width,
        }
    }

    pub fn fifo_config(&self) -> FifoConfig {
        FifoConfig {
            sample_avg_code: sample_average_code(self.sample_avg),
            rollover: self.fifo_rollover,
            almost_full: self.fifo_almost_full & 0x0F,
        }
    }
}

/// One red/IR sample pair from the FIFO, 18-bit counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawOpticalSample {
    pub red: u32,
    pub ir: u32,
}

impl RawOpticalSample {
    /// Unpack two big-endian 3-byte channels, each masked to 18 bits
    pub fn from_fifo_bytes(bytes: &[u8; FIFO_SAMPLE_SIZE]) -> Self {
        let channel = |b: &[u8]| u32::from_be_bytes([0, b[0], b[1], b[2]]) & SAMPLE_MASK;
        Self {
            red: channel(&bytes[0..3]),
            ir: channel(&bytes[3..6]),
        }
    }
}

/// Die temperature in 1/16 degree steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemperatureReading {
    /// TINT, signed whole degrees
    pub integer: i8,
    /// TFRAC, 0.0625 degree units
    pub fraction: u8,
    /// The conversion had not finished when the poll gave up; the value may
    /// be stale or from the previous conversion
    pub conversion_timed_out: bool,
}

impl TemperatureReading {
    pub fn from_bytes(integer: u8, fraction: u8) -> Self {
        Self {
            integer: integer as i8,
            fraction,
            conversion_timed_out: false,
        }
    }

    pub fn celsius(&self) -> f32 {
        self.integer as f32 + self.fraction as f32 * TEMP_FRACTION_STEP
    }
}

/// Identity registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub part_id: u8,
    pub revision: u8,
}

/// FIFO pointer registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FifoPointers {
    pub write: u8,
    pub overflow: u8,
    pub read: u8,
}

/// MAX30102 sensor on a register transport
pub struct OpticalSensor<T> {
    bus: T,
    address: u8,
    timeout: Timeout,
}

impl<T: RegisterTransport> OpticalSensor<T> {
    /// Create a driver. Nothing is written until `init`.
    pub fn new(bus: T) -> Self {
        Self {
            bus,
            address: MAX30102_ADDRESS,
            timeout: Timeout::Blocking,
        }
    }

    /// Bound each bus transaction
    pub fn with_timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Release the transport
    pub fn release(self) -> T {
        self.bus
    }

    /// Verify PART_ID
    ///
    /// # Returns
    /// * `Ok(DeviceInfo)` - Part ID is 0x15 (any revision)
    /// * `Err(SensorError::DeviceIdentity)` - Some other chip answered
    /// * `Err(SensorError::Transport)` - Either register read failed
    pub fn check_identity(&mut self) -> Result<DeviceInfo> {
        let part_id = self.read_register(REG_PART_ID)?;
        let revision = self.read_register(REG_REV_ID)?;

        if part_id != PART_ID_VALUE {
            return Err(SensorError::DeviceIdentity {
                expected: PART_ID_VALUE,
                found: part_id,
            });
        }

        info!(
            "MAX30102 OK. Part ID: 0x{:02X}, Rev ID: 0x{:02X}",
            part_id, revision
        );
        Ok(DeviceInfo { part_id, revision })
    }

    /// Reset and configure the sensor
    ///
    /// Sequence: identity check, soft reset + 100 ms, mode, SpO2 config, LED
    /// currents, FIFO config, slot assignment (multi-LED mode only), FIFO
    /// pointer reset. The first failing step aborts; nothing is retried.
    ///
    /// # Arguments
    /// * `config` - Startup configuration
    /// * `delay` - Delay source for the post-reset wait
    pub fn init(&mut self, config: &OpticalSensorConfig, delay: &mut impl DelayNs) -> Result<()> {
        self.check_identity()?;

        self.write_register(REG_MODE_CONFIG, MODE_RESET)?;
        delay.delay_ms(RESET_DELAY_MS);

        self.write_register(REG_MODE_CONFIG, config.mode as u8)?;
        self.write_register(REG_SPO2_CONFIG, config.spo2_config().pack())?;

        self.write_register(REG_LED1_PA, config.led_current_red)?;
        self.write_register(REG_LED2_PA, config.led_current_ir)?;

        self.write_register(REG_FIFO_CONFIG, config.fifo_config().pack())?;

        if config.mode == LedMode::MultiLed {
            self.write_register(REG_MULTI_LED_1, MultiLedSlots::RED_IR.pack())?;
        }

        self.write_register(REG_FIFO_WR_PTR, 0x00)?;
        self.write_register(REG_OVF_COUNTER, 0x00)?;
        self.write_register(REG_FIFO_RD_PTR, 0x00)?;

        debug!("MAX30102 configured: {:?}", config);
        Ok(())
    }

    /// Read one red/IR sample from the FIFO
    ///
    /// The register address write and the 6-byte read are one transaction so
    /// the FIFO read pointer cannot move in between.
    pub fn read_fifo_sample(&mut self) -> std::result::Result<RawOpticalSample, TransportError> {
        let data = self
            .bus
            .read_registers(self.address, REG_FIFO_DATA, FIFO_SAMPLE_SIZE, self.timeout)?;

        let bytes: [u8; FIFO_SAMPLE_SIZE] = data.as_slice().try_into().map_err(|_| {
            TransportError::ShortRead {
                expected: FIFO_SAMPLE_SIZE,
                actual: data.len(),
            }
        })?;

        Ok(RawOpticalSample::from_fifo_bytes(&bytes))
    }

    /// Run a die temperature conversion and read the result
    ///
    /// Polls TEMP_EN up to 20 times, 10 ms apart. If the bit never clears a
    /// warning is logged, the reading is flagged `conversion_timed_out`, and
    /// the result registers are read anyway.
    pub fn read_temperature(
        &mut self,
        delay: &mut impl DelayNs,
    ) -> std::result::Result<TemperatureReading, TransportError> {
        self.write_register(REG_TEMP_EN, TEMP_EN_BIT)?;

        let mut busy = true;
        for _ in 0..TEMP_POLL_ATTEMPTS {
            busy = self.read_register(REG_TEMP_EN)? & TEMP_EN_BIT != 0;
            if !busy {
                break;
            }
            delay.delay_ms(TEMP_POLL_INTERVAL_MS);
        }

        if busy {
            warn!(
                "Temperature conversion still pending after {} ms",
                TEMP_POLL_ATTEMPTS as u32 * TEMP_POLL_INTERVAL_MS
            );
        }

        // TEMP_INT and TEMP_FRAC are adjacent
        let data = self.bus.read_registers(self.address, REG_TEMP_INT, 2, self.timeout)?;
        if data.len() < 2 {
            return Err(TransportError::ShortRead {
                expected: 2,
                actual: data.len(),
            });
        }

        let mut reading = TemperatureReading::from_bytes(data[0], data[1]);
        reading.conversion_timed_out = busy;
        Ok(reading)
    }

    /// Set proximity threshold and pilot LED current (no read-back)
    pub fn set_proximity(
        &mut self,
        threshold: u8,
        pilot_current: u8,
    ) -> std::result::Result<(), TransportError> {
        self.write_register(REG_PROX_INT_THR, threshold)?;
        self.write_register(REG_PILOT_PA, pilot_current)?;
        Ok(())
    }

    /// Read FIFO write pointer, overflow counter and read pointer
    pub fn read_fifo_pointers(&mut self) -> std::result::Result<FifoPointers, TransportError> {
        let data = self
            .bus
            .read_registers(self.address, REG_FIFO_WR_PTR, 3, self.timeout)?;
        if data.len() < 3 {
            return Err(TransportError::ShortRead {
                expected: 3,
                actual: data.len(),
            });
        }
        Ok(FifoPointers {
            write: data[0],
            overflow: data[1],
            read: data[2],
        })
    }

    /// Write a single byte to a register
    fn write_register(&mut self, reg: u8, value: u8) -> std::result::Result<(), TransportError> {
        self.bus
            .write_register(self.address, reg, RegisterValue::Byte(value), self.timeout)
    }

    /// Read a single byte from a register
    fn read_register(&mut self, reg: u8) -> std::result::Result<u8, TransportError> {
        let data = self.bus.read_registers(self.address, reg, 1, self.timeout)?;
        data.first().copied().ok_or(TransportError::ShortRead {
            expected: 1,
            actual: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeBus, FakeDelay, Op};

    fn bus_with_part_id(part_id: u8, revision: u8) -> FakeBus {
        let mut fake = FakeBus::new();
        fake.set(MAX30102_ADDRESS, REG_PART_ID, &[part_id]);
        fake.set(MAX30102_ADDRESS, REG_REV_ID, &[revision]);
        fake
    }

    fn byte_writes(fake: &FakeBus) -> Vec<(u8, u8)> {
        fake.writes()
            .into_iter()
            .map(|(_, reg, value)| match value {
                RegisterValue::Byte(b) => (reg, b),
                RegisterValue::Word(w) => panic!("unexpected word write 0x{:04X}", w),
            })
            .collect()
    }

    #[test]
    fn test_fifo_unpack_masks_to_18_bits() {
        let sample = RawOpticalSample::from_fifo_bytes(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        assert_eq!(sample.red, 66051);
        assert_eq!(sample.ir, 1286);

        let full = RawOpticalSample::from_fifo_bytes(&[0xFF; 6]);
        assert_eq!(full.red, 262143);
        assert_eq!(full.ir, 262143);
    }

    #[test]
    fn test_sample_average_mapping() {
        let expected = [(1, 0), (2, 1), (4, 2), (8, 3), (16, 4), (32, 5)];
        for (avg, code) in expected {
            assert_eq!(sample_average_code(avg), code, "sample_avg {}", avg);
        }
        assert_eq!(sample_average_code(3), 0);
        assert_eq!(sample_average_code(64), 0);
    }

    #[test]
    fn test_spo2_config_packing() {
        let cfg = OpticalSensorConfig::default().spo2_config();
        // 4096 nA (1) << 5 | 100 Hz (1) << 2 | 411 us (3)
        assert_eq!(cfg.pack(), 0x27);
        assert_eq!(SpO2Config::unpack(0x27), cfg);
    }

    #[test]
    fn test_fifo_config_packing() {
        let cfg = FifoConfig {
            sample_avg_code: sample_average_code(4),
            rollover: true,
            almost_full: 0x1F,
        };
        // Almost-full is masked to 4 bits
        assert_eq!(cfg.pack(), 0b010_1_1111);
        assert_eq!(FifoConfig::unpack(0x5F).almost_full, 0x0F);
    }

    #[test]
    fn test_slot_byte() {
        assert_eq!(MultiLedSlots::RED_IR.pack(), 0x21);
    }

    #[test]
    fn test_temperature_conversion() {
        assert_eq!(TemperatureReading::from_bytes(26, 8).celsius(), 26.5);
        assert_eq!(TemperatureReading::from_bytes(0xFF, 0).celsius(), -1.0);
    }

    #[test]
    fn test_identity_accepts_any_revision() {
        for revision in [0x00, 0x03, 0xFF] {
            let mut fake = bus_with_part_id(0x15, revision);
            let mut sensor = OpticalSensor::new(&mut fake);
            let info = sensor.check_identity().unwrap();
            assert_eq!(info.revision, revision);
        }
    }

    #[test]
    fn test_identity_rejects_wrong_part() {
        let mut fake = bus_with_part_id(0x68, 0x00);
        let mut sensor = OpticalSensor::new(&mut fake);
        assert_eq!(
            sensor.check_identity().unwrap_err(),
            SensorError::DeviceIdentity {
                expected: 0x15,
                found: 0x68
            }
        );
    }

    #[test]
    fn test_init_register_sequence() {
        let mut fake = bus_with_part_id(0x15, 0x03);
        let mut delay = FakeDelay::standalone();
        let config = OpticalSensorConfig::default().with_led_current(0x32);

        OpticalSensor::new(&mut fake).init(&config, &mut delay).unwrap();

        assert_eq!(
            byte_writes(&fake),
            vec![
                (REG_MODE_CONFIG, 0x40),
                (REG_MODE_CONFIG, 0x03),
                (REG_SPO2_CONFIG, 0x27),
                (REG_LED1_PA, 0x32),
                (REG_LED2_PA, 0x32),
                (REG_FIFO_CONFIG, 0x50),
                (REG_FIFO_WR_PTR, 0x00),
                (REG_OVF_COUNTER, 0x00),
                (REG_FIFO_RD_PTR, 0x00),
            ]
        );
        assert_eq!(delay.calls(), vec![100]);
    }

    #[test]
    fn test_init_multi_led_writes_slots() {
        let mut fake = bus_with_part_id(0x15, 0x03);
        let config = OpticalSensorConfig {
            mode: LedMode::MultiLed,
            ..OpticalSensorConfig::default()
        };

        OpticalSensor::new(&mut fake)
            .init(&config, &mut FakeDelay::standalone())
            .unwrap();

        let writes = byte_writes(&fake);
        assert!(writes.contains(&(REG_MULTI_LED_1, 0x21)));
        assert_eq!(writes[1], (REG_MODE_CONFIG, 0x07));
    }

    #[test]
    fn test_init_aborts_on_identity_failure() {
        let mut fake = bus_with_part_id(0x11, 0x00);
        let result = OpticalSensor::new(&mut fake)
            .init(&OpticalSensorConfig::default(), &mut FakeDelay::standalone());

        assert!(matches!(result, Err(SensorError::DeviceIdentity { .. })));
        assert!(fake.writes().is_empty());
    }

    #[test]
    fn test_init_aborts_on_write_failure() {
        let mut fake = bus_with_part_id(0x15, 0x00);
        fake.fail_writes(MAX30102_ADDRESS, REG_LED1_PA);

        let result = OpticalSensor::new(&mut fake)
            .init(&OpticalSensorConfig::default(), &mut FakeDelay::standalone());

        assert!(matches!(result, Err(SensorError::Transport(_))));
        // Nothing after the failed LED1 write
        let last = *fake.writes().last().unwrap();
        assert_eq!(last.1, REG_LED1_PA);
    }

    #[test]
    fn test_fifo_read_is_single_transaction() {
        let mut fake = FakeBus::new();
        fake.set(MAX30102_ADDRESS, REG_FIFO_DATA, &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);

        let sample = OpticalSensor::new(&mut fake).read_fifo_sample().unwrap();
        assert_eq!(sample, RawOpticalSample { red: 66051, ir: 1286 });
        assert_eq!(
            fake.log(),
            &[Op::Read {
                device: MAX30102_ADDRESS,
                register: REG_FIFO_DATA,
                count: 6
            }]
        );
    }

    #[test]
    fn test_temperature_completes_after_a_few_polls() {
        let mut fake = FakeBus::new();
        fake.queue(MAX30102_ADDRESS, REG_TEMP_EN, &[1]);
        fake.queue(MAX30102_ADDRESS, REG_TEMP_EN, &[1]);
        fake.queue(MAX30102_ADDRESS, REG_TEMP_EN, &[0]);
        fake.set(MAX30102_ADDRESS, REG_TEMP_INT, &[26, 8]);
        let mut delay = FakeDelay::standalone();

        let reading = OpticalSensor::new(&mut fake)
            .read_temperature(&mut delay)
            .unwrap();

        assert_eq!(reading.celsius(), 26.5);
        assert!(!reading.conversion_timed_out);
        assert_eq!(fake.read_count(MAX30102_ADDRESS, REG_TEMP_EN), 3);
        assert_eq!(delay.calls(), vec![10, 10]);
    }

    #[test]
    fn test_temperature_poll_is_bounded() {
        let mut fake = FakeBus::new();
        // The trigger write leaves TEMP_EN = 1 and nothing ever clears it
        fake.set(MAX30102_ADDRESS, REG_TEMP_INT, &[25, 4]);
        let mut delay = FakeDelay::standalone();

        let reading = OpticalSensor::new(&mut fake)
            .read_temperature(&mut delay)
            .unwrap();

        assert_eq!(fake.read_count(MAX30102_ADDRESS, REG_TEMP_EN), 20);
        assert_eq!(delay.calls(), vec![10; 20]);
        assert!(reading.conversion_timed_out);
        // The data read still happens
        assert_eq!(fake.read_count(MAX30102_ADDRESS, REG_TEMP_INT), 1);
        assert_eq!(reading.celsius(), 25.25);
    }

    #[test]
    fn test_temperature_status_failure_propagates() {
        let mut fake = FakeBus::new();
        fake.fail_reads(MAX30102_ADDRESS, REG_TEMP_EN);

        let result = OpticalSensor::new(&mut fake).read_temperature(&mut FakeDelay::standalone());
        assert!(result.is_err());
        // Only the status read is attempted, not retried
        assert_eq!(fake.read_count(MAX30102_ADDRESS, REG_TEMP_EN), 1);
        assert_eq!(fake.read_count(MAX30102_ADDRESS, REG_TEMP_INT), 0);
    }

    #[test]
    fn test_set_proximity_writes_two_registers() {
        let mut fake = FakeBus::new();
        OpticalSensor::new(&mut fake).set_proximity(0x20, 0x0A).unwrap();
        assert_eq!(byte_writes(&fake), vec![(REG_PROX_INT_THR, 0x20), (REG_PILOT_PA, 0x0A)]);
        assert!(fake.log().iter().all(|op| matches!(op, Op::Write { .. })));
    }

    #[test]
    fn test_read_fifo_pointers() {
        let mut fake = FakeBus::new();
        fake.set(MAX30102_ADDRESS, REG_FIFO_WR_PTR, &[0x0A, 0x01, 0x04]);
        let ptrs = OpticalSensor::new(&mut fake).read_fifo_pointers().unwrap();
        assert_eq!(
            ptrs,
            FifoPointers {
                write: 0x0A,
                overflow: 0x01,
                read: 0x04
            }
        );
    }

    #[test]
    fn test_short_fifo_reply_is_reported() {
        let mut fake = FakeBus::new();
        fake.set(MAX30102_ADDRESS, REG_FIFO_DATA, &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        fake.short_reads(MAX30102_ADDRESS, REG_FIFO_DATA, 4);

        let err = OpticalSensor::new(&mut fake).read_fifo_sample().unwrap_err();
        assert_eq!(
            err,
            TransportError::ShortRead {
                expected: 6,
                actual: 4
            }
        );
    }

    #[test]
    fn test_short_temperature_reply_is_reported() {
        let mut fake = FakeBus::new();
        fake.latch(MAX30102_ADDRESS, REG_TEMP_EN, &[0]);
        fake.set(MAX30102_ADDRESS, REG_TEMP_INT, &[26, 8]);
        fake.short_reads(MAX30102_ADDRESS, REG_TEMP_INT, 1);

        let err = OpticalSensor::new(&mut fake)
            .read_temperature(&mut FakeDelay::standalone())
            .unwrap_err();
        assert_eq!(
            err,
            TransportError::ShortRead {
                expected: 2,
                actual: 1
            }
        );
    }
}
