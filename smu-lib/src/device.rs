use std::ops::RangeInclusive;

use tracing::{debug, info, warn};

use crate::channel::{Channel, Dac10Output, Dac16Output, Led, Port, Sampling};
use crate::codec;
use crate::command::{Command, TERMINATOR};
use crate::error::{Result, SmuError};
use crate::outcome::{Outcome, Skip};
use crate::response::{self, Arity, Base};
use crate::transport::Link;

const DAC10_DIFF_RANGE: RangeInclusive<i64> = -1023..=1023;
const DAC16_CHANNEL_RANGE: RangeInclusive<i64> = -65535..=65535;
const ADC24_OFFSET_RANGE: RangeInclusive<i64> = (i32::MIN as i64)..=(i32::MAX as i64);
const ADC24_LAST_REG: u8 = 0xB;

fn bit(on: bool) -> String {
    codec::hex(u32::from(on))
}

fn flag(line: &str) -> Result<bool> {
    Ok(response::parse_single(line, Base::Decimal)? != 0)
}

fn hex_u16(line: &str) -> Result<u16> {
    let raw = response::parse_single(line, Base::Hex)?;
    u16::try_from(raw).map_err(|_| SmuError::Protocol(format!("{raw:#X} does not fit 16 bits")))
}

fn hex_u8(line: &str) -> Result<u8> {
    let raw = response::parse_single(line, Base::Hex)?;
    u8::try_from(raw).map_err(|_| SmuError::Protocol(format!("{raw:#X} does not fit 8 bits")))
}

fn hex_i16(line: &str) -> Result<i64> {
    Ok(codec::decode_signed(response::parse_single(line, Base::Hex)?, 16))
}

/// `(high, low)` fields of a flash address.
fn flash_address(address: u32) -> [String; 2] {
    [codec::hex(address >> 16), codec::hex(address & 0xFFFF)]
}

/// A connected SMU board.
///
/// Every operation returns `Ok(Outcome::Skipped(..))` instead of touching
/// the instrument when the link is down or an argument is out of range.
/// The link is checked first.
pub struct Smu<L> {
    link: L,
    adc16_maxval: Option<u32>,
}

impl<L: Link> Smu<L> {
    /// Wrap `link` without talking to the instrument.
    pub fn new(link: L) -> Self {
        Self {
            link,
            adc16_maxval: None,
        }
    }

    /// Wrap `link` and run the connection handshake: an empty line to flush
    /// whatever the firmware has half-parsed, then the ADC16 calibration
    /// maximum used to scale readings.
    pub async fn open(link: L) -> Result<Self> {
        let mut smu = Self::new(link);
        if !smu.link.is_connected() {
            warn!("Link is down, skipping handshake");
            return Ok(smu);
        }
        smu.link.send_line(TERMINATOR).await?;
        if let Outcome::Done(maxval) = smu.adc16_read_maxval().await? {
            info!(maxval, "SMU ready");
        }
        Ok(smu)
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn into_link(self) -> L {
        self.link
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Last ADC16 calibration maximum read from the board.
    pub fn adc16_maxval(&self) -> Option<u32> {
        self.adc16_maxval
    }

    /// Send an arbitrary command. Commands the firmware answers (queries and
    /// `FLASH:READ`) wait for and return their reply.
    pub async fn execute(&mut self, command: Command) -> Result<Outcome<Option<String>>> {
        if command.expects_reply() {
            Ok(self.query(command, |line| Ok(line.to_string())).await?.map(Some))
        } else {
            Ok(self.send(command).await?.map(|()| None))
        }
    }

    fn skip<T>(&self, command: &str, reason: Skip) -> Outcome<T> {
        warn!(command, %reason, "Command skipped");
        Outcome::Skipped(reason)
    }

    /// `Some` when the command must not be sent.
    fn precheck<T>(&self, command: &str, in_range: bool) -> Option<Outcome<T>> {
        if !self.link.is_connected() {
            Some(self.skip(command, Skip::NotConnected))
        } else if !in_range {
            Some(self.skip(command, Skip::OutOfRange))
        } else {
            None
        }
    }

    async fn send(&mut self, command: Command) -> Result<Outcome<()>> {
        if let Some(skipped) = self.precheck(command.name(), true) {
            return Ok(skipped);
        }
        debug!(%command, "Send");
        self.link.send_line(&command.to_line()).await?;
        Ok(Outcome::Done(()))
    }

    async fn query<T>(
        &mut self,
        command: Command,
        decode: impl FnOnce(&str) -> Result<T>,
    ) -> Result<Outcome<T>> {
        if let Some(skipped) = self.precheck(command.name(), true) {
            return Ok(skipped);
        }
        debug!(%command, "Query");
        self.link.send_line(&command.to_line()).await?;
        let reply = self.link.read_line().await?;
        debug!(%reply, "Reply");
        decode(&reply).map(Outcome::Done)
    }

    async fn set_flag(&mut self, name: String, on: bool) -> Result<Outcome<()>> {
        self.send(Command::write(name, [bit(on)])).await
    }

    // UI and power

    pub async fn set_led(&mut self, led: Led, on: bool) -> Result<Outcome<()>> {
        self.set_flag(format!("UI:{led}"), on).await
    }

    pub async fn toggle_led(&mut self, led: Led) -> Result<Outcome<()>> {
        self.send(Command::toggle(format!("UI:{led}"))).await
    }

    pub async fn led(&mut self, led: Led) -> Result<Outcome<bool>> {
        self.query(Command::query(format!("UI:{led}")), flag).await
    }

    /// State of the on-board push button.
    pub async fn sw1(&mut self) -> Result<Outcome<bool>> {
        self.query(Command::query("UI:SW1"), flag).await
    }

    pub async fn set_ena12v(&mut self, on: bool) -> Result<Outcome<()>> {
        self.set_flag("PWR:ENA12V".to_string(), on).await
    }

    pub async fn toggle_ena12v(&mut self) -> Result<Outcome<()>> {
        self.send(Command::toggle("PWR:ENA12V")).await
    }

    pub async fn ena12v(&mut self) -> Result<Outcome<bool>> {
        self.query(Command::query("PWR:ENA12V"), flag).await
    }

    // 10-bit DAC

    pub async fn dac10_set(&mut self, output: Dac10Output, value: u16) -> Result<Outcome<()>> {
        let command = Command::write(format!("DAC10:{output}"), [codec::hex(value.into())]);
        self.send(command).await
    }

    pub async fn dac10(&mut self, output: Dac10Output) -> Result<Outcome<u16>> {
        self.query(Command::query(format!("DAC10:{output}")), hex_u16).await
    }

    /// Set the differential output, in `[-1023, 1023]`.
    pub async fn dac10_set_diff(&mut self, value: i64) -> Result<Outcome<()>> {
        if let Some(skipped) = self.precheck("DAC10:DIFF", DAC10_DIFF_RANGE.contains(&value)) {
            return Ok(skipped);
        }
        let field = codec::encode_signed_wrap(value, 16)?;
        self.send(Command::write("DAC10:DIFF", [field])).await
    }

    pub async fn dac10_diff(&mut self) -> Result<Outcome<i64>> {
        self.query(Command::query("DAC10:DIFF"), hex_i16).await
    }

    // 16-bit DAC

    pub async fn dac16_set(&mut self, output: Dac16Output, value: u16) -> Result<Outcome<()>> {
        let command = Command::write(format!("DAC16:{output}"), [codec::hex(value.into())]);
        self.send(command).await
    }

    pub async fn dac16(&mut self, output: Dac16Output) -> Result<Outcome<u16>> {
        self.query(Command::query(format!("DAC16:{output}")), hex_u16).await
    }

    /// Drive a differential channel to `value` in `[-65535, 65535]`.
    ///
    /// The pair is centered on mid-scale; see [`codec::encode_diff_pair`].
    pub async fn dac16_set_channel(&mut self, channel: Channel, value: i64) -> Result<Outcome<()>> {
        let name = format!("DAC16:{channel}");
        if let Some(skipped) = self.precheck(&name, DAC16_CHANNEL_RANGE.contains(&value)) {
            return Ok(skipped);
        }
        let (pos, neg) = codec::encode_diff_pair(value)?;
        self.send(Command::write(name, [pos, neg])).await
    }

    pub async fn dac16_channel(&mut self, channel: Channel) -> Result<Outcome<i64>> {
        let command = Command::query(format!("DAC16:{channel}"));
        self.query(command, response::parse_diff_pair).await
    }

    // 16-bit ADC

    /// Read a channel. Calibrated readings are normalised to full scale
    /// 32767 against the board's calibration maximum, raw ones are not.
    pub async fn adc16(&mut self, channel: Channel, sampling: Sampling) -> Result<Outcome<i64>> {
        let maxval = match (sampling, self.adc16_maxval) {
            (Sampling::Raw, _) => None,
            (_, Some(maxval)) => Some(maxval),
            (_, None) => match self.adc16_read_maxval().await? {
                Outcome::Done(maxval) => Some(maxval),
                Outcome::Skipped(reason) => return Ok(reason.into()),
            },
        };

        let command = Command::query(format!("ADC16:{channel}{sampling}"));
        self.query(command, |line| {
            let reading = hex_i16(line)?;
            match maxval {
                Some(maxval) => codec::scale_adc16(reading, maxval),
                None => Ok(reading),
            }
        })
        .await
    }

    /// Recalibrate and refresh the cached calibration maximum.
    pub async fn adc16_calibrate(&mut self) -> Result<Outcome<u32>> {
        if let Outcome::Skipped(reason) = self.send(Command::new("ADC16:CALIBRATE")).await? {
            return Ok(reason.into());
        }
        self.adc16_read_maxval().await
    }

    pub async fn adc16_offset(&mut self) -> Result<Outcome<i64>> {
        self.query(Command::query("ADC16:OFFSET"), hex_i16).await
    }

    pub async fn adc16_read_maxval(&mut self) -> Result<Outcome<u32>> {
        let outcome = self
            .query(Command::query("ADC16:MAXVAL"), |line| {
                response::parse_single(line, Base::Hex)
            })
            .await?;
        if let Outcome::Done(maxval) = outcome {
            self.adc16_maxval = Some(maxval);
        }
        Ok(outcome)
    }

    // 24-bit ADC

    pub async fn adc24(&mut self, channel: Channel, sampling: Sampling) -> Result<Outcome<i64>> {
        let command = Command::query(format!("ADC24:{channel}{sampling}"));
        self.query(command, response::parse_split32).await
    }

    /// Read both channels from the same conversion, `[ch1, ch2]`.
    pub async fn adc24_both(&mut self, sampling: Sampling) -> Result<Outcome<[i64; 2]>> {
        let command = Command::query(format!("ADC24:BOTH{sampling}"));
        self.query(command, response::parse_split32_pair).await
    }

    pub async fn adc24_set_offset(&mut self, channel: Channel, offset: i64) -> Result<Outcome<()>> {
        let name = format!("ADC24:{channel}OFFSET");
        if let Some(skipped) = self.precheck(&name, ADC24_OFFSET_RANGE.contains(&offset)) {
            return Ok(skipped);
        }
        let (low, high) = codec::encode_split32(offset)?;
        self.send(Command::write(name, [low, high])).await
    }

    pub async fn adc24_offset(&mut self, channel: Channel) -> Result<Outcome<i64>> {
        let command = Command::query(format!("ADC24:{channel}OFFSET"));
        self.query(command, response::parse_split32).await
    }

    pub async fn adc24_calibrate(&mut self) -> Result<Outcome<()>> {
        self.send(Command::new("ADC24:CALIBRATE")).await
    }

    /// Write a converter register. Register 0 is read-only.
    pub async fn adc24_write_reg(&mut self, reg: u8, value: u16) -> Result<Outcome<()>> {
        let in_range = (1..=ADC24_LAST_REG).contains(&reg) && value <= 0xFF;
        if let Some(skipped) = self.precheck("ADC24:REG", in_range) {
            return Ok(skipped);
        }
        let fields = [codec::hex(reg.into()), codec::hex(value.into())];
        self.send(Command::write("ADC24:REG", fields)).await
    }

    pub async fn adc24_read_reg(&mut self, reg: u8) -> Result<Outcome<u8>> {
        if let Some(skipped) = self.precheck("ADC24:REG?", reg <= ADC24_LAST_REG) {
            return Ok(skipped);
        }
        let command = Command::query("ADC24:REG").with_field(codec::hex(reg.into()));
        self.query(command, hex_u8).await
    }

    // Digital outputs

    pub async fn set_port(&mut self, port: Port, value: u8) -> Result<Outcome<()>> {
        let command = Command::write(format!("DIGOUT:PORT{port}"), [codec::hex(value.into())]);
        self.send(command).await
    }

    pub async fn port(&mut self, port: Port) -> Result<Outcome<u8>> {
        self.query(Command::query(format!("DIGOUT:PORT{port}")), hex_u8).await
    }

    pub async fn set_port_bit(&mut self, port: Port, bit: u8, on: bool) -> Result<Outcome<()>> {
        let name = format!("DIGOUT:R{port}{bit}");
        if let Some(skipped) = self.precheck(&name, bit < Port::BITS) {
            return Ok(skipped);
        }
        self.set_flag(name, on).await
    }

    pub async fn toggle_port_bit(&mut self, port: Port, bit: u8) -> Result<Outcome<()>> {
        let name = format!("DIGOUT:R{port}{bit}");
        if let Some(skipped) = self.precheck(&name, bit < Port::BITS) {
            return Ok(skipped);
        }
        self.send(Command::toggle(name)).await
    }

    pub async fn port_bit(&mut self, port: Port, bit: u8) -> Result<Outcome<bool>> {
        let name = format!("DIGOUT:R{port}{bit}");
        if let Some(skipped) = self.precheck(&name, bit < Port::BITS) {
            return Ok(skipped);
        }
        self.query(Command::query(name), flag).await
    }

    // BLE module

    /// Hold (`true`) or release the BLE module's reset line.
    pub async fn set_ble_reset(&mut self, on: bool) -> Result<Outcome<()>> {
        self.set_flag("BLE:RESET".to_string(), on).await
    }

    pub async fn toggle_ble_reset(&mut self) -> Result<Outcome<()>> {
        self.send(Command::toggle("BLE:RESET")).await
    }

    pub async fn ble_reset(&mut self) -> Result<Outcome<bool>> {
        self.query(Command::query("BLE:RESET"), |line| {
            Ok(response::parse_single(line, Base::Hex)? != 0)
        })
        .await
    }

    /// Put the firmware into pass-through mode between USB and the BLE module.
    pub async fn ble_forward(&mut self) -> Result<Outcome<()>> {
        self.send(Command::new("BLE:FORWARD")).await
    }

    // Program flash

    /// Read `count` bytes of program flash starting at `address`.
    ///
    /// The firmware answers in whole instruction words (four bytes each);
    /// the padding past `count` is dropped. A zero count gets no reply at
    /// all and is skipped.
    pub async fn flash_read(&mut self, address: u32, count: u16) -> Result<Outcome<Vec<u8>>> {
        if let Some(skipped) = self.precheck("FLASH:READ", count > 0) {
            return Ok(skipped);
        }
        let [high, low] = flash_address(address);
        let command = Command::write("FLASH:READ", [high, low, codec::hex(count.into())]);
        let wanted = usize::from(count);

        self.query(command, |line| {
            let fields = response::parse(line, Arity::Any, Base::Hex)?;
            if fields.len() < wanted {
                return Err(SmuError::ArityMismatch {
                    expected: wanted,
                    actual: fields.len(),
                    line: line.trim().to_string(),
                });
            }
            fields
                .into_iter()
                .take(wanted)
                .map(|raw| {
                    u8::try_from(raw)
                        .map_err(|_| SmuError::Protocol(format!("flash byte {raw:#X} out of range")))
                })
                .collect::<Result<Vec<u8>>>()
        })
        .await
    }

    /// Program `bytes` at `address` in a single line.
    pub async fn flash_write(&mut self, address: u32, bytes: &[u8]) -> Result<Outcome<()>> {
        let command = Command::write("FLASH:WRITE", flash_address(address))
            .with_fields(bytes.iter().map(|&b| codec::hex(b.into())));
        self.send(command).await
    }

    /// Erase the flash page containing `address`.
    pub async fn flash_erase(&mut self, address: u32) -> Result<Outcome<()>> {
        self.send(Command::write("FLASH:ERASE", flash_address(address))).await
    }
}
