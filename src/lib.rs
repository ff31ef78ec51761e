//! Platform-agnostic driver for the Sensirion SGP40 air quality sensor,
//! built on the [`embedded-hal`](https://docs.rs/embedded-hal) blocking
//! traits.
//!
//! The SGP40 exposes a raw VOC signal in device ticks over I²C; this crate
//! pairs the wire protocol (command encoding, checksum-protected humidity
//! and temperature compensation, timed read-back) with the
//! [`GasIndexAlgorithm`] conditioner that turns the tick stream into a
//! bounded VOC index around a learned baseline.
//!
//! The bus and the delay source are injected, so any `I2c`/`DelayNs`
//! implementation works, including mocks:
//!
//! ```ignore
//! use sgp40_rs::{Sgp40, DEFAULT_I2C_ADDRESS};
//!
//! let mut sensor = Sgp40::new(i2c, DEFAULT_I2C_ADDRESS, delay);
//! if sensor.begin(10)? {
//!     loop {
//!         match sensor.measure_voc_index() {
//!             Ok(index) => defmt::info!("VOC index {}", index),
//!             // one bad reading is not fatal; skip the cycle
//!             Err(_) => continue,
//!         }
//!     }
//! }
//! ```
//!
//! The driver owns no retry policy: every checksum or protocol failure is
//! reported once and the caller decides whether to retry, abort or skip a
//! cycle. It also assumes exclusive ownership of the bus address for the
//! duration of each call; concurrent access must be serialized at the bus
//! level.

#![cfg_attr(not(test), no_std)]

mod crc;
mod gas_index;
mod types;

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use sensirion_i2c::i2c;

use crate::crc::crc8;

pub use crate::gas_index::GasIndexAlgorithm;
pub use crate::types::{Compensation, TestResult};

/// The one I²C address the sensor responds on.
pub const DEFAULT_I2C_ADDRESS: u8 = 0x59;

const MEASURE_TEST_PASS: u16 = 0xD400;
const MEASURE_TEST_FAIL: u16 = 0x4B00;

/// SGP40 command set. Opcodes and settle windows are datasheet constants;
/// the settle window is the minimum wait before the response is valid.
#[derive(Debug, Clone, Copy)]
enum Command {
    MeasureRaw,
    MeasureTest,
    HeaterOff,
    SoftReset,
}

impl Command {
    /// Opcode and settle window [ms].
    const fn parts(self) -> (u16, u32) {
        match self {
            Command::MeasureRaw => (0x260F, 30),
            Command::MeasureTest => (0x280E, 250),
            Command::HeaterOff => (0x3615, 0),
            Command::SoftReset => (0x0006, 0),
        }
    }
}

/// Driver errors.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// The bus transport failed.
    I2c(E),
    /// A read-back word did not match its checksum byte.
    Crc,
    /// The self test answered with a word that is neither the pass nor the
    /// fail sentinel. Carries the offending word; deliberately not folded
    /// into [`TestResult::Fail`].
    SelfTest(u16),
}

impl<E: core::fmt::Debug> core::fmt::Display for Error<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::I2c(err) => write!(f, "i2c bus error: {:?}", err),
            Error::Crc => write!(f, "checksum mismatch in sensor response"),
            Error::SelfTest(word) => {
                write!(f, "self test answered with unknown word {:#06x}", word)
            }
        }
    }
}

#[cfg(feature = "thiserror")]
impl<E: core::fmt::Debug> core::error::Error for Error<E> {}

impl<I2C: I2c> From<i2c::Error<I2C>> for Error<I2C::Error> {
    fn from(err: i2c::Error<I2C>) -> Self {
        match err {
            i2c::Error::Crc => Error::Crc,
            i2c::Error::I2cWrite(e) | i2c::Error::I2cRead(e) => Error::I2c(e),
        }
    }
}

/// SGP40 device handle: bus address, bound transport and delay source, and
/// the conditioner state for this sensor's tick stream.
#[derive(Debug)]
pub struct Sgp40<I2C, D> {
    i2c: I2C,
    address: u8,
    delay: D,
    gas_index: GasIndexAlgorithm,
}

impl<I2C, D> Sgp40<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    pub fn new(i2c: I2C, address: u8, delay: D) -> Self {
        Self {
            i2c,
            address,
            delay,
            gas_index: GasIndexAlgorithm::new(),
        }
    }

    /// Probes the bus address. No side effects beyond the probe.
    pub fn is_connected(&mut self) -> bool {
        self.i2c.write(self.address, &[]).is_ok()
    }

    /// Initializes the sensor and warms it up for `warmup_seconds`.
    ///
    /// Probes the device first and returns `Ok(false)` without touching the
    /// bus further if nothing answers. Otherwise the conditioner state is
    /// reset and raw measurements are issued back to back for the warm-up
    /// period (each cycle blocks for the 30 ms settle window; readings and
    /// errors are discarded, the cycles only heat the sensor plate). Ends
    /// by running the self test and returning whether it passed.
    ///
    /// A zero warm-up is valid and still runs the self test.
    pub fn begin(&mut self, warmup_seconds: u32) -> Result<bool, Error<I2C::Error>> {
        if !self.is_connected() {
            return Ok(false);
        }
        self.gas_index.init();
        let (_, cycle_ms) = Command::MeasureRaw.parts();
        let cycles = warmup_seconds.saturating_mul(1000) / cycle_ms;
        for _ in 0..cycles {
            let _ = self.measure_voc_index();
        }
        Ok(self.measure_test()? == TestResult::Pass)
    }

    /// Runs the chip self test.
    ///
    /// Any answer other than the two documented sentinel words is a
    /// protocol error, reported as [`Error::SelfTest`] rather than mapped
    /// to a clean [`TestResult::Fail`].
    pub fn measure_test(&mut self) -> Result<TestResult, Error<I2C::Error>> {
        self.write_command(Command::MeasureTest)?;
        match self.read_word()? {
            MEASURE_TEST_PASS => Ok(TestResult::Pass),
            MEASURE_TEST_FAIL => Ok(TestResult::Fail),
            word => Err(Error::SelfTest(word)),
        }
    }

    /// Resets the sensor. No response is read. Device state, including the
    /// assumptions baked into the learned conditioner baseline, must be
    /// treated as invalidated: run [`begin`](Self::begin) again.
    pub fn soft_reset(&mut self) -> Result<(), Error<I2C::Error>> {
        self.write_command(Command::SoftReset)
    }

    /// Turns the hotplate off and puts the sensor in idle mode.
    pub fn heater_off(&mut self) -> Result<(), Error<I2C::Error>> {
        self.write_command(Command::HeaterOff)
    }

    /// Measures the raw VOC signal using default compensation
    /// (50 %RH, 25 °C).
    pub fn measure_raw(&mut self) -> Result<u16, Error<I2C::Error>> {
        self.measure_raw_compensated(Compensation::default())
    }

    /// Measures the raw VOC signal in device ticks.
    ///
    /// Humidity and temperature are clamped, encoded as ticks and injected
    /// into the command frame, each word protected by its checksum byte.
    /// The transaction is a single 8-byte write, the 30 ms settle window,
    /// then a 3-byte read-back whose checksum must validate.
    pub fn measure_raw_compensated(
        &mut self,
        compensation: Compensation,
    ) -> Result<u16, Error<I2C::Error>> {
        let (opcode, settle_ms) = Command::MeasureRaw.parts();
        let [cmd_hi, cmd_lo] = opcode.to_be_bytes();
        let [rh_hi, rh_lo] = compensation.humidity_ticks().to_be_bytes();
        let [t_hi, t_lo] = compensation.temperature_ticks().to_be_bytes();
        let frame = [
            cmd_hi,
            cmd_lo,
            rh_hi,
            rh_lo,
            crc8(&[rh_hi, rh_lo]),
            t_hi,
            t_lo,
            crc8(&[t_hi, t_lo]),
        ];
        self.i2c.write(self.address, &frame).map_err(Error::I2c)?;
        self.delay.delay_ms(settle_ms);
        self.read_word()
    }

    /// Measures and conditions one VOC index sample using default
    /// compensation (50 %RH, 25 °C).
    pub fn measure_voc_index(&mut self) -> Result<i32, Error<I2C::Error>> {
        self.measure_voc_index_compensated(Compensation::default())
    }

    /// Measures the raw signal and feeds it through the gas index
    /// conditioner. The conditioner state advances only on a validated
    /// reading; a failed measurement leaves it untouched.
    pub fn measure_voc_index_compensated(
        &mut self,
        compensation: Compensation,
    ) -> Result<i32, Error<I2C::Error>> {
        let raw = self.measure_raw_compensated(compensation)?;
        Ok(self.gas_index.process(raw))
    }

    /// Releases the bus transport.
    pub fn destroy(self) -> I2C {
        self.i2c
    }

    fn write_command(&mut self, command: Command) -> Result<(), Error<I2C::Error>> {
        let (opcode, settle_ms) = command.parts();
        i2c::write_command_u16(&mut self.i2c, self.address, opcode).map_err(Error::I2c)?;
        if settle_ms > 0 {
            self.delay.delay_ms(settle_ms);
        }
        Ok(())
    }

    fn read_word(&mut self) -> Result<u16, Error<I2C::Error>> {
        let mut frame = [0u8; 3];
        i2c::read_words_with_crc(&mut self.i2c, self.address, &mut frame)?;
        Ok(u16::from_be_bytes([frame[0], frame[1]]))
    }
}

#[cfg(test)]
mod tests {
    use embedded_hal::i2c::ErrorKind;
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction};

    use super::*;

    const ADDR: u8 = DEFAULT_I2C_ADDRESS;

    /// The datasheet's example frame for a raw measurement at default
    /// compensation: opcode 0x260F, 50 %RH (0x8000), 25 degC (0x6666).
    const RAW_DEFAULT_FRAME: [u8; 8] = [0x26, 0x0F, 0x80, 0x00, 0xA2, 0x66, 0x66, 0x93];

    fn raw_response(ticks: u16) -> Vec<u8> {
        let [hi, lo] = ticks.to_be_bytes();
        vec![hi, lo, crc8(&[hi, lo])]
    }

    fn sensor(transactions: &[Transaction]) -> Sgp40<I2cMock, NoopDelay> {
        Sgp40::new(I2cMock::new(transactions), ADDR, NoopDelay::new())
    }

    #[test]
    fn measure_raw_sends_the_datasheet_frame() {
        let mut sgp = sensor(&[
            Transaction::write(ADDR, RAW_DEFAULT_FRAME.to_vec()),
            Transaction::read(ADDR, vec![0x12, 0x34, 0x37]),
        ]);
        assert_eq!(sgp.measure_raw().unwrap(), 0x1234);
        sgp.destroy().done();
    }

    #[test]
    fn measure_raw_clamps_out_of_range_compensation() {
        // -10 %RH / 200 degC clamp to 0 %RH / 130 degC: words 0x0000 and
        // 0xFFFF with their checksums.
        let frame = vec![
            0x26,
            0x0F,
            0x00,
            0x00,
            crc8(&[0x00, 0x00]),
            0xFF,
            0xFF,
            crc8(&[0xFF, 0xFF]),
        ];
        let mut sgp = sensor(&[
            Transaction::write(ADDR, frame),
            Transaction::read(ADDR, raw_response(0x5000)),
        ]);
        let raw = sgp
            .measure_raw_compensated(Compensation::new(-10.0, 200.0))
            .unwrap();
        assert_eq!(raw, 0x5000);
        sgp.destroy().done();
    }

    #[test]
    fn measure_raw_rejects_a_corrupt_readback() {
        let mut sgp = sensor(&[
            Transaction::write(ADDR, RAW_DEFAULT_FRAME.to_vec()),
            Transaction::read(ADDR, vec![0x12, 0x34, 0x00]),
        ]);
        assert!(matches!(sgp.measure_raw(), Err(Error::Crc)));
        sgp.destroy().done();
    }

    #[test]
    fn self_test_pass_sentinel_maps_to_pass() {
        let mut sgp = sensor(&[
            Transaction::write(ADDR, vec![0x28, 0x0E]),
            Transaction::read(ADDR, raw_response(0xD400)),
        ]);
        assert_eq!(sgp.measure_test().unwrap(), TestResult::Pass);
        sgp.destroy().done();
    }

    #[test]
    fn self_test_fail_sentinel_maps_to_fail() {
        let mut sgp = sensor(&[
            Transaction::write(ADDR, vec![0x28, 0x0E]),
            Transaction::read(ADDR, raw_response(0x4B00)),
        ]);
        assert_eq!(sgp.measure_test().unwrap(), TestResult::Fail);
        sgp.destroy().done();
    }

    #[test]
    fn self_test_unknown_word_is_a_protocol_error() {
        let mut sgp = sensor(&[
            Transaction::write(ADDR, vec![0x28, 0x0E]),
            Transaction::read(ADDR, raw_response(0xABCD)),
        ]);
        assert!(matches!(sgp.measure_test(), Err(Error::SelfTest(0xABCD))));
        sgp.destroy().done();
    }

    #[test]
    fn begin_with_zero_warmup_still_runs_one_self_test() {
        let mut sgp = sensor(&[
            Transaction::write(ADDR, vec![]),
            Transaction::write(ADDR, vec![0x28, 0x0E]),
            Transaction::read(ADDR, raw_response(0xD400)),
        ]);
        assert!(sgp.begin(0).unwrap());
        sgp.destroy().done();
    }

    #[test]
    fn begin_reports_a_failing_self_test() {
        let mut sgp = sensor(&[
            Transaction::write(ADDR, vec![]),
            Transaction::write(ADDR, vec![0x28, 0x0E]),
            Transaction::read(ADDR, raw_response(0x4B00)),
        ]);
        assert!(!sgp.begin(0).unwrap());
        sgp.destroy().done();
    }

    #[test]
    fn begin_without_a_device_stops_after_the_probe() {
        // The probe is the only transaction the mock knows about; any
        // warm-up or self-test traffic would fail the mock's expectations.
        let mut sgp = sensor(&[Transaction::write(ADDR, vec![]).with_error(ErrorKind::Other)]);
        assert!(!sgp.begin(10).unwrap());
        sgp.destroy().done();
    }

    #[test]
    fn heater_off_sends_its_opcode() {
        let mut sgp = sensor(&[Transaction::write(ADDR, vec![0x36, 0x15])]);
        sgp.heater_off().unwrap();
        sgp.destroy().done();
    }

    #[test]
    fn soft_reset_sends_its_opcode() {
        let mut sgp = sensor(&[Transaction::write(ADDR, vec![0x00, 0x06])]);
        sgp.soft_reset().unwrap();
        sgp.destroy().done();
    }

    #[test]
    fn voc_index_feeds_validated_ticks_into_the_conditioner() {
        // Drive the conditioner through its blackout with a constant raw
        // signal; once live it reports the baseline index.
        let mut transactions = Vec::new();
        for _ in 0..46 {
            transactions.push(Transaction::write(ADDR, RAW_DEFAULT_FRAME.to_vec()));
            transactions.push(Transaction::read(ADDR, raw_response(30_000)));
        }
        let mut sgp = sensor(&transactions);
        let mut last = -1;
        for _ in 0..46 {
            last = sgp.measure_voc_index().unwrap();
        }
        assert_eq!(last, 100);
        sgp.destroy().done();
    }
}
