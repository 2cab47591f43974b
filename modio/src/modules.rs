//! Typed helpers for the known module families.
//!
//! Everything here is a thin adapter over [`Client::register_access`]: the
//! board families expose their I/O as `chN.*` registers, so a typed read is
//! a read of the right register with the variant checked, and a typed write
//! is a write of the right register with the value coerced. Multi-register
//! configurations fan out their writes without waiting in between and share
//! one aggregator that fires the caller's continuation exactly once.

use std::cell::RefCell;
use std::rc::Rc;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::register::RegisterValue;
use crate::types::NodeId;

/// Input range of an analog input channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AnalogInputMode {
    FiveVolt = 0,
    CurrentLoop = 1,
    TenVolt = 2,
}

/// Drive style of a digital output channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputDrive {
    Source = 0,
    Sink = 1,
}

/// Operating mode of a digital input / counter channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CounterMode {
    Basic = 0,
    Frequency = 1,
    PulseCounter = 2,
}

/// Counting edge of a counter channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EdgePolarity {
    Rising = 0,
    Falling = 1,
}

/// Input bias network of a counter channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InputBias {
    None = 0,
    Pnp = 1,
    Npn = 2,
}

/// Sensor type of a thermocouple input channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ThermocoupleType {
    B = 0,
    E = 1,
    J = 2,
    K = 3,
    N = 4,
    R = 5,
    S = 6,
    T = 7,
}

/// Rail readings reported by the system monitor module.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SupplyReadings {
    pub rail_5v_ma: u16,
    pub rail_5v_mv: u16,
    pub rail_24v1_mv: u16,
    pub rail_24v2_mv: u16,
    pub rail_24v_mv: u16,
    pub rail_24v_ma: u16,
}

fn channel_name(channel: u8, suffix: &str) -> String {
    format!("ch{}.{}", channel + 1, suffix)
}

/// Shared state of one fan-out configuration: counts finished and
/// synchronously failed writes, keeps the first error, fires once.
struct Aggregate {
    total: u8,
    completed: u8,
    failed: u8,
    first_error: Option<Error>,
    callback: Option<Box<dyn FnOnce(&mut Client, Result<()>)>>,
}

impl Aggregate {
    fn new(total: u8, callback: Box<dyn FnOnce(&mut Client, Result<()>)>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            total,
            completed: 0,
            failed: 0,
            first_error: None,
            callback: Some(callback),
        }))
    }

    /// Continuation for one constituent write.
    fn child(
        this: &Rc<RefCell<Self>>,
    ) -> impl FnOnce(&mut Client, Result<RegisterValue>) + 'static {
        let this = this.clone();
        move |client, result| {
            let finished = {
                let mut agg = this.borrow_mut();
                agg.completed += 1;
                if let Err(e) = result {
                    agg.first_error.get_or_insert(e);
                }
                agg.completed + agg.failed >= agg.total
            };
            if finished {
                Self::settle(&this, client);
            }
        }
    }

    /// Records a write that never got dispatched. Completions cannot have
    /// run yet at dispatch time, so this never has to settle by itself.
    fn dispatch_failed(this: &Rc<RefCell<Self>>, error: Error) {
        let mut agg = this.borrow_mut();
        agg.failed += 1;
        agg.first_error.get_or_insert(error);
    }

    fn settle(this: &Rc<RefCell<Self>>, client: &mut Client) {
        let (callback, error) = {
            let mut agg = this.borrow_mut();
            (agg.callback.take(), agg.first_error.take())
        };
        if let Some(callback) = callback {
            callback(client, error.map_or(Ok(()), Err));
        }
    }
}

impl Client {
    /// Fans out register writes that run concurrently and resolve through
    /// one shared aggregator. A failure to dispatch the first write aborts
    /// the whole operation; later dispatch failures are folded into the
    /// aggregate result.
    fn write_group(
        &mut self,
        node: NodeId,
        writes: Vec<(String, RegisterValue)>,
        callback: impl FnOnce(&mut Client, Result<()>) + 'static,
    ) -> Result<()> {
        let aggregate = Aggregate::new(writes.len() as u8, Box::new(callback));
        for (index, (name, value)) in writes.into_iter().enumerate() {
            let result = self.register_access(node, &name, Some(&value), Aggregate::child(&aggregate));
            if let Err(e) = result {
                if index == 0 {
                    return Err(e);
                }
                Aggregate::dispatch_failed(&aggregate, e);
            }
        }
        Ok(())
    }

    /// Writes one register, reducing the readback to success or failure.
    fn write_register(
        &mut self,
        node: NodeId,
        name: String,
        value: RegisterValue,
        callback: impl FnOnce(&mut Client, Result<()>) + 'static,
    ) -> Result<()> {
        self.register_access(node, &name, Some(&value), move |client, result| {
            callback(client, result.map(|_| ()))
        })
    }

    fn read_register_u16(
        &mut self,
        node: NodeId,
        name: String,
        callback: impl FnOnce(&mut Client, Result<u16>) + 'static,
    ) -> Result<()> {
        self.register_access(node, &name, None, move |client, result| {
            callback(
                client,
                result.and_then(|value| match value {
                    RegisterValue::Uint16(v) if !v.is_empty() => Ok(v[0]),
                    _ => Err(Error::Protocol),
                }),
            )
        })
    }

    // ---- system monitor -----------------------------------------------

    /// Reads the supply rail measurements of a system monitor module.
    pub fn supply_read(
        &mut self,
        node: NodeId,
        callback: impl FnOnce(&mut Client, Result<SupplyReadings>) + 'static,
    ) -> Result<()> {
        self.register_access(node, "input", None, move |client, result| {
            callback(
                client,
                result.and_then(|value| match value {
                    RegisterValue::Uint16(v) if v.len() >= 6 => Ok(SupplyReadings {
                        rail_5v_ma: v[0],
                        rail_5v_mv: v[1],
                        rail_24v1_mv: v[2],
                        rail_24v2_mv: v[3],
                        rail_24v_mv: v[4],
                        rail_24v_ma: v[5],
                    }),
                    _ => Err(Error::Protocol),
                }),
            )
        })
    }

    // ---- relay and digital outputs ------------------------------------

    /// Switches one relay output channel (4 channels).
    pub fn relay_write(
        &mut self,
        node: NodeId,
        channel: u8,
        on: bool,
        callback: impl FnOnce(&mut Client, Result<()>) + 'static,
    ) -> Result<()> {
        if channel > 3 {
            return Err(Error::InvalidArgument);
        }
        let value = RegisterValue::Uint8(vec![u8::from(on)]);
        self.write_register(node, channel_name(channel, "output"), value, callback)
    }

    /// Sets the level of one digital output channel (4 channels).
    pub fn digital_output_write(
        &mut self,
        node: NodeId,
        channel: u8,
        value: u16,
        callback: impl FnOnce(&mut Client, Result<()>) + 'static,
    ) -> Result<()> {
        if channel > 3 {
            return Err(Error::InvalidArgument);
        }
        let value = RegisterValue::Uint16(vec![value]);
        self.write_register(node, channel_name(channel, "output"), value, callback)
    }

    /// Selects sourcing or sinking drive for one digital output channel.
    pub fn digital_output_configure(
        &mut self,
        node: NodeId,
        channel: u8,
        drive: OutputDrive,
        callback: impl FnOnce(&mut Client, Result<()>) + 'static,
    ) -> Result<()> {
        if channel > 3 {
            return Err(Error::InvalidArgument);
        }
        let value = RegisterValue::Uint8(vec![drive as u8]);
        self.write_register(node, channel_name(channel, "mode"), value, callback)
    }

    // ---- analog I/O ----------------------------------------------------

    /// Reads one analog input channel (4 channels).
    pub fn analog_input_read(
        &mut self,
        node: NodeId,
        channel: u8,
        callback: impl FnOnce(&mut Client, Result<u16>) + 'static,
    ) -> Result<()> {
        if channel > 3 {
            return Err(Error::InvalidArgument);
        }
        self.read_register_u16(node, channel_name(channel, "input"), callback)
    }

    /// Selects the input range of one analog input channel.
    pub fn analog_input_configure(
        &mut self,
        node: NodeId,
        channel: u8,
        mode: AnalogInputMode,
        callback: impl FnOnce(&mut Client, Result<()>) + 'static,
    ) -> Result<()> {
        if channel > 3 {
            return Err(Error::InvalidArgument);
        }
        let value = RegisterValue::Uint8(vec![mode as u8]);
        self.write_register(node, channel_name(channel, "mode"), value, callback)
    }

    /// Sets one analog output channel (4 channels).
    pub fn analog_output_write(
        &mut self,
        node: NodeId,
        channel: u8,
        value: u16,
        callback: impl FnOnce(&mut Client, Result<()>) + 'static,
    ) -> Result<()> {
        if channel > 3 {
            return Err(Error::InvalidArgument);
        }
        let value = RegisterValue::Uint16(vec![value]);
        self.write_register(node, channel_name(channel, "output"), value, callback)
    }

    // ---- digital input / counter ---------------------------------------

    /// Reads one counter channel (4 channels). The count is a full 32-bit
    /// value.
    pub fn counter_read(
        &mut self,
        node: NodeId,
        channel: u8,
        callback: impl FnOnce(&mut Client, Result<u32>) + 'static,
    ) -> Result<()> {
        if channel > 3 {
            return Err(Error::InvalidArgument);
        }
        self.register_access(node, &channel_name(channel, "input"), None, move |client, result| {
            callback(
                client,
                result.and_then(|value| match value {
                    RegisterValue::Uint32(v) if !v.is_empty() => Ok(v[0]),
                    _ => Err(Error::Protocol),
                }),
            )
        })
    }

    /// Configures mode, polarity and bias of one counter channel in a
    /// single fan-out of three writes.
    pub fn counter_configure(
        &mut self,
        node: NodeId,
        channel: u8,
        mode: CounterMode,
        polarity: EdgePolarity,
        bias: InputBias,
        callback: impl FnOnce(&mut Client, Result<()>) + 'static,
    ) -> Result<()> {
        if channel > 3 {
            return Err(Error::InvalidArgument);
        }
        self.write_group(
            node,
            vec![
                (
                    channel_name(channel, "mode"),
                    RegisterValue::Uint8(vec![mode as u8]),
                ),
                (
                    channel_name(channel, "polarity"),
                    RegisterValue::Uint8(vec![polarity as u8]),
                ),
                (
                    channel_name(channel, "bias"),
                    RegisterValue::Uint8(vec![bias as u8]),
                ),
            ],
            callback,
        )
    }

    // ---- temperature inputs --------------------------------------------

    /// Reads one thermistor input channel (8 channels).
    pub fn thermistor_read(
        &mut self,
        node: NodeId,
        channel: u8,
        callback: impl FnOnce(&mut Client, Result<u16>) + 'static,
    ) -> Result<()> {
        if channel > 7 {
            return Err(Error::InvalidArgument);
        }
        self.read_register_u16(node, channel_name(channel, "input"), callback)
    }

    /// Configures one thermistor channel: enable plus the sensor's beta and
    /// nominal-temperature coefficients, fanned out as three writes.
    pub fn thermistor_configure(
        &mut self,
        node: NodeId,
        channel: u8,
        enabled: bool,
        beta: u16,
        t0: u16,
        callback: impl FnOnce(&mut Client, Result<()>) + 'static,
    ) -> Result<()> {
        if channel > 7 {
            return Err(Error::InvalidArgument);
        }
        self.write_group(
            node,
            vec![
                (
                    channel_name(channel, "enabled"),
                    RegisterValue::Uint8(vec![u8::from(enabled)]),
                ),
                (
                    channel_name(channel, "beta"),
                    RegisterValue::Uint16(vec![beta]),
                ),
                (channel_name(channel, "t0"), RegisterValue::Uint16(vec![t0])),
            ],
            callback,
        )
    }

    /// Reads one thermocouple input channel (6 channels).
    pub fn thermocouple_read(
        &mut self,
        node: NodeId,
        channel: u8,
        callback: impl FnOnce(&mut Client, Result<u16>) + 'static,
    ) -> Result<()> {
        if channel > 5 {
            return Err(Error::InvalidArgument);
        }
        self.read_register_u16(node, channel_name(channel, "input"), callback)
    }

    /// Selects the sensor type of one thermocouple channel.
    pub fn thermocouple_configure(
        &mut self,
        node: NodeId,
        channel: u8,
        sensor: ThermocoupleType,
        callback: impl FnOnce(&mut Client, Result<()>) + 'static,
    ) -> Result<()> {
        if channel > 5 {
            return Err(Error::InvalidArgument);
        }
        let value = RegisterValue::Uint8(vec![sensor as u8]);
        self.write_register(node, channel_name(channel, "type"), value, callback)
    }

    /// Reads one RTD input channel (8 channels).
    pub fn rtd_read(
        &mut self,
        node: NodeId,
        channel: u8,
        callback: impl FnOnce(&mut Client, Result<u16>) + 'static,
    ) -> Result<()> {
        if channel > 7 {
            return Err(Error::InvalidArgument);
        }
        self.read_register_u16(node, channel_name(channel, "input"), callback)
    }

    // ---- node-wide settings --------------------------------------------

    /// Sets the sampling interval register and verifies the readback.
    /// A readback that differs from the written value reports
    /// [`Error::Mismatch`].
    pub fn set_sample_interval(
        &mut self,
        node: NodeId,
        interval: u16,
        callback: impl FnOnce(&mut Client, Result<()>) + 'static,
    ) -> Result<()> {
        let value = RegisterValue::Uint16(vec![interval]);
        self.register_access(node, "sample_interval", Some(&value), move |client, result| {
            callback(
                client,
                result.and_then(|readback| match readback {
                    RegisterValue::Uint16(v) if v.len() == 1 => {
                        if v[0] == interval {
                            Ok(())
                        } else {
                            Err(Error::Mismatch)
                        }
                    }
                    _ => Err(Error::NotSupported),
                }),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::*;
    use crate::Priority;
    use crate::register::encode_value;
    use crate::services::REGISTER_ACCESS_PORT;
    use crate::transfer::{TransferKind, TransferMetadata, tx};
    use crate::types::TransferId;

    const HOST: u8 = 1;
    const NODE: u8 = 9;

    fn client() -> Client {
        Client::new(HOST).unwrap()
    }

    fn access_response(value: &RegisterValue) -> Vec<u8> {
        let mut payload = vec![0u8; 8];
        encode_value(value, &mut payload);
        payload
    }

    fn inject_access_response(client: &mut Client, transfer_id: TransferId, value: &RegisterValue) {
        let metadata = TransferMetadata {
            timestamp_us: 0,
            priority: Priority::Nominal,
            transfer_kind: TransferKind::Response,
            port_id: REGISTER_ACCESS_PORT,
            remote_node_id: Some(HOST),
            transfer_id,
        };
        let mut frames = VecDeque::new();
        tx::push_transfer(&mut frames, &metadata, &access_response(value), NODE).unwrap();
        for mut frame in frames {
            frame.timestamp_us = 1_000_000;
            client.handle_frame(&frame);
        }
    }

    #[test]
    fn compound_configure_fires_once_on_success() {
        let mut client = client();
        let results = Rc::new(RefCell::new(Vec::new()));

        let log = results.clone();
        client
            .counter_configure(
                NODE,
                0,
                CounterMode::PulseCounter,
                EdgePolarity::Rising,
                InputBias::Npn,
                move |_, r| log.borrow_mut().push(r.is_ok()),
            )
            .unwrap();
        assert_eq!(client.pending_requests(), 3);

        for transfer_id in 0..3 {
            inject_access_response(&mut client, transfer_id, &RegisterValue::Uint8(vec![2]));
        }
        assert_eq!(results.borrow().as_slice(), &[true]);
        assert_eq!(client.pending_requests(), 0);
    }

    #[test]
    fn compound_configure_keeps_the_first_error() {
        let mut client = client();
        let results = Rc::new(RefCell::new(Vec::new()));

        let log = results.clone();
        client
            .thermistor_configure(NODE, 2, true, 3950, 2980, move |_, r| {
                log.borrow_mut().push(r)
            })
            .unwrap();

        // First write answers "no such register", the rest succeed.
        inject_access_response(&mut client, 0, &RegisterValue::Empty);
        assert!(results.borrow().is_empty(), "must wait for all three");
        inject_access_response(&mut client, 1, &RegisterValue::Uint16(vec![3950]));
        inject_access_response(&mut client, 2, &RegisterValue::Uint16(vec![2980]));

        let results = results.borrow();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(Error::NotFound)));
    }

    #[test]
    fn compound_configure_resolves_through_timeouts() {
        let mut client = client();
        client.set_timeout(std::time::Duration::from_millis(100));
        let fired = Rc::new(RefCell::new(0u32));

        let count = fired.clone();
        let t0 = std::time::Instant::now();
        client
            .counter_configure(
                NODE,
                1,
                CounterMode::Basic,
                EdgePolarity::Falling,
                InputBias::None,
                move |_, r| {
                    assert!(matches!(r, Err(Error::Timeout)));
                    *count.borrow_mut() += 1;
                },
            )
            .unwrap();

        client.expire_timers(t0 + std::time::Duration::from_millis(200));
        assert_eq!(*fired.borrow(), 1);
        assert_eq!(client.pending_requests(), 0);
    }

    #[test]
    fn sample_interval_verifies_the_readback() {
        let mut client = client();
        let results = Rc::new(RefCell::new(Vec::new()));

        for (transfer_id, response, expect_ok) in [
            (0, RegisterValue::Uint16(vec![500]), true),
            (1, RegisterValue::Uint16(vec![499]), false),
        ] {
            let log = results.clone();
            client
                .set_sample_interval(NODE, 500, move |_, r| log.borrow_mut().push(r))
                .unwrap();
            client.take_frame().unwrap();
            inject_access_response(&mut client, transfer_id, &response);
            assert_eq!(results.borrow().last().unwrap().is_ok(), expect_ok);
        }

        assert!(matches!(results.borrow()[1], Err(Error::Mismatch)));

        // A readback of the wrong variant is not usable for verification.
        let log = results.clone();
        client
            .set_sample_interval(NODE, 500, move |_, r| log.borrow_mut().push(r))
            .unwrap();
        inject_access_response(&mut client, 2, &RegisterValue::Uint8(vec![1]));
        assert!(matches!(
            results.borrow()[2],
            Err(Error::NotSupported)
        ));
    }

    #[test]
    fn counter_read_requires_full_width() {
        let mut client = client();
        let results = Rc::new(RefCell::new(Vec::new()));

        let log = results.clone();
        client
            .counter_read(NODE, 0, move |_, r| log.borrow_mut().push(r))
            .unwrap();
        inject_access_response(&mut client, 0, &RegisterValue::Uint32(vec![0x11223344]));
        assert!(matches!(results.borrow()[0], Ok(0x11223344)));

        // A 16-bit answer cannot fill a 32-bit count.
        let log = results.clone();
        client
            .counter_read(NODE, 0, move |_, r| log.borrow_mut().push(r))
            .unwrap();
        inject_access_response(&mut client, 1, &RegisterValue::Uint16(vec![7]));
        assert!(matches!(results.borrow()[1], Err(Error::Protocol)));
    }

    #[test]
    fn supply_read_maps_the_rails() {
        let mut client = client();
        let result = Rc::new(RefCell::new(None));

        let slot = result.clone();
        client
            .supply_read(NODE, move |_, r| *slot.borrow_mut() = Some(r))
            .unwrap();
        inject_access_response(
            &mut client,
            0,
            &RegisterValue::Uint16(vec![10, 5000, 24010, 24020, 24000, 350]),
        );

        let readings = result.borrow_mut().take().unwrap().unwrap();
        assert_eq!(
            readings,
            SupplyReadings {
                rail_5v_ma: 10,
                rail_5v_mv: 5000,
                rail_24v1_mv: 24010,
                rail_24v2_mv: 24020,
                rail_24v_mv: 24000,
                rail_24v_ma: 350,
            }
        );
    }

    #[test]
    fn channel_bounds_are_validated() {
        let mut client = client();
        assert!(matches!(
            client.relay_write(NODE, 4, true, |_, _| {}),
            Err(Error::InvalidArgument)
        ));
        assert!(matches!(
            client.thermistor_read(NODE, 8, |_, _| {}),
            Err(Error::InvalidArgument)
        ));
        assert!(matches!(
            client.thermocouple_read(NODE, 6, |_, _| {}),
            Err(Error::InvalidArgument)
        ));
        assert!(matches!(
            client.analog_input_read(NODE, 4, |_, _| {}),
            Err(Error::InvalidArgument)
        ));
        assert_eq!(client.pending_requests(), 0);
    }

    #[test]
    fn writes_use_the_channel_register_names() {
        let mut client = client();
        client.relay_write(NODE, 2, true, |_, _| {}).unwrap();
        let frame = client.take_frame().unwrap();
        // Payload starts with the name length and name.
        assert_eq!(frame.payload[0] as usize, "ch3.output".len());
        assert_eq!(&frame.payload[1..11], b"ch3.output");
    }
}
