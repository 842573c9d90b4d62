// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Asynchronous Modbus clients
//!
//! The transport submodules provide `connect*` functions that return a
//! [`Context`]. The context owns exactly one transport driver and runs
//! the request engine on top of it: local validation, retries with
//! optional auto-reconnect, broadcast handling and response
//! consistency checks.

#[cfg(feature = "ascii")]
pub mod ascii;

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "sync")]
pub mod sync;

#[cfg(feature = "tcp")]
pub mod tcp;

#[cfg(feature = "udp")]
pub mod udp;

mod values;

pub use self::values::{ByteOrder, WordOrder};

use std::{fmt, time::Duration};

use async_trait::async_trait;

use crate::{
    error::{Error, Result},
    frame::*,
    slave::*,
};

/// The framing and transport combination of a client driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// MBAP over TCP.
    Tcp,
    /// MBAP over TLS over TCP.
    Tls,
    /// MBAP over UDP datagrams.
    Udp,
    /// RTU framing over a TCP stream.
    RtuOverTcp,
    /// RTU framing over a serial line.
    Rtu,
    /// ASCII framing over a serial line.
    Ascii,
}

/// Serial line parameters for the RTU and ASCII transports.
#[cfg(feature = "rtu")]
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Path of the serial device.
    pub path: String,
    /// Baud rate in bits per second.
    pub baud_rate: u32,
    /// Number of data bits, 8 for RTU, 7 for ASCII.
    pub data_bits: tokio_serial::DataBits,
    /// Number of stop bits.
    pub stop_bits: tokio_serial::StopBits,
    /// Parity scheme.
    pub parity: tokio_serial::Parity,
}

#[cfg(feature = "rtu")]
impl SerialConfig {
    /// Serial parameters with the common 8N1 character framing.
    #[must_use]
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            data_bits: tokio_serial::DataBits::Eight,
            stop_bits: tokio_serial::StopBits::One,
            parity: tokio_serial::Parity::None,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(Error::Configuration("baud rate must not be zero".into()));
        }
        Ok(())
    }

    pub(crate) fn builder(&self) -> tokio_serial::SerialPortBuilder {
        tokio_serial::new(&self.path, self.baud_rate)
            .data_bits(self.data_bits)
            .stop_bits(self.stop_bits)
            .parity(self.parity)
    }

    /// Transmission time of a single character including start, parity
    /// and stop bits.
    pub(crate) fn char_time(&self) -> Duration {
        let data_bits = match self.data_bits {
            tokio_serial::DataBits::Five => 5,
            tokio_serial::DataBits::Six => 6,
            tokio_serial::DataBits::Seven => 7,
            tokio_serial::DataBits::Eight => 8,
        };
        let stop_bits = match self.stop_bits {
            tokio_serial::StopBits::One => 1,
            tokio_serial::StopBits::Two => 2,
        };
        let parity_bits = match self.parity {
            tokio_serial::Parity::None => 0,
            tokio_serial::Parity::Odd | tokio_serial::Parity::Even => 1,
        };
        let bits_per_char = 1 + data_bits + stop_bits + parity_bits;
        Duration::from_secs_f64(f64::from(bits_per_char) / f64::from(self.baud_rate))
    }

    /// The 3.5-character end-of-frame silence, with the fixed 1.75 ms
    /// shortcut for baud rates of 19200 and above.
    pub(crate) fn inter_frame_delay(&self) -> Duration {
        if self.baud_rate >= 19_200 {
            Duration::from_micros(1750)
        } else {
            self.char_time().mul_f64(3.5)
        }
    }

    /// The longest silence tolerated between the characters of one
    /// frame, 1.5 character times, with the fixed 750 µs shortcut for
    /// baud rates of 19200 and above.
    pub(crate) fn inter_char_timeout(&self) -> Duration {
        if self.baud_rate >= 19_200 {
            Duration::from_micros(750)
        } else {
            self.char_time().mul_f64(1.5)
        }
    }

    /// The timing parameters driving frame-boundary detection on this
    /// serial line.
    pub(crate) fn frame_timing(&self) -> crate::codec::rtu::SerialTiming {
        crate::codec::rtu::SerialTiming {
            inter_char: self.inter_char_timeout(),
            end_of_frame: self.inter_frame_delay(),
        }
    }
}

/// Client policy and transport configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// The slave device addressed by all requests.
    pub slave: Slave,
    /// Deadline bounding each request/response exchange.
    pub response_timeout: Option<Duration>,
    /// Deadline for establishing a connection.
    pub connect_timeout: Option<Duration>,
    /// Transparently reconnect before the next request after this much
    /// inactivity. `None` disables the idle check.
    pub idle_timeout: Option<Duration>,
    /// Number of additional attempts after a failed request.
    pub retry_count: usize,
    /// Fixed sleep between attempts.
    pub retry_delay: Duration,
    /// Reconnect automatically when a request finds the transport
    /// disconnected.
    pub auto_reconnect: bool,
    /// Byte ordering within each 16-bit register, used by the typed
    /// accessors.
    pub byte_order: ByteOrder,
    /// Which register of a multi-register value holds the most
    /// significant word, used by the typed accessors.
    pub word_order: WordOrder,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            slave: Slave::MIN_DEVICE,
            response_timeout: Some(Duration::from_secs(1)),
            connect_timeout: Some(Duration::from_secs(5)),
            idle_timeout: None,
            retry_count: 0,
            retry_delay: Duration::from_millis(100),
            auto_reconnect: true,
            byte_order: ByteOrder::BigEndian,
            word_order: WordOrder::HighWordFirst,
        }
    }
}

impl Config {
    pub(crate) fn validate(&self) -> Result<()> {
        self.slave.ensure_request_target()?;
        Ok(())
    }
}

/// A transport-independent asynchronous client driver.
///
/// Implemented by the per-transport drivers; the uniform contract
/// comprises connection management and one blocking request/response
/// exchange at a time.
#[async_trait]
pub trait Client: SlaveContext + fmt::Debug + Send {
    /// Invoke a Modbus function and await the response.
    async fn call(&mut self, req: Request<'_>) -> Result<Response>;

    /// Send a broadcast request for which no response will arrive.
    async fn broadcast(&mut self, req: Request<'_>) -> Result<()>;

    /// (Re-)establish the underlying transport connection.
    async fn connect(&mut self) -> Result<()>;

    /// Close the underlying transport connection.
    async fn disconnect(&mut self) -> Result<()>;

    /// Whether the transport is currently connected.
    fn is_connected(&self) -> bool;

    /// Adjust the deadline bounding each exchange.
    fn set_response_timeout(&mut self, timeout: Option<Duration>);

    /// The framing/transport combination of this driver.
    fn transport_type(&self) -> TransportType;
}

/// An asynchronous Modbus client context.
///
/// Wraps a transport driver with the retry/reconnect policy and the
/// response consistency checks.
#[derive(Debug)]
pub struct Context {
    client: Box<dyn Client>,
    slave: Slave,
    retry_count: usize,
    retry_delay: Duration,
    auto_reconnect: bool,
    byte_order: ByteOrder,
    word_order: WordOrder,
}

impl Context {
    pub(crate) fn new(client: Box<dyn Client>, config: &Config) -> Self {
        Self {
            client,
            slave: config.slave,
            retry_count: config.retry_count,
            retry_delay: config.retry_delay,
            auto_reconnect: config.auto_reconnect,
            byte_order: config.byte_order,
            word_order: config.word_order,
        }
    }

    /// The currently addressed slave device.
    #[must_use]
    pub const fn slave(&self) -> Slave {
        self.slave
    }

    /// The transport of the wrapped driver.
    #[must_use]
    pub fn transport_type(&self) -> TransportType {
        self.client.transport_type()
    }

    /// Whether the wrapped driver is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// (Re-)establish the transport connection.
    pub async fn connect(&mut self) -> Result<()> {
        self.client.connect().await
    }

    /// Close the transport connection.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.client.disconnect().await
    }

    /// Adjust the per-operation deadline.
    pub fn set_response_timeout(&mut self, timeout: impl Into<Option<Duration>>) {
        self.client.set_response_timeout(timeout.into());
    }

    /// Adjust the number of additional attempts after a failure.
    pub fn set_retry_count(&mut self, retry_count: usize) {
        self.retry_count = retry_count;
    }

    /// Adjust the sleep between attempts.
    pub fn set_retry_delay(&mut self, retry_delay: Duration) {
        self.retry_delay = retry_delay;
    }

    /// Enable or disable automatic reconnects.
    pub fn set_auto_reconnect(&mut self, auto_reconnect: bool) {
        self.auto_reconnect = auto_reconnect;
    }

    /// The configured byte order of the typed accessors.
    #[must_use]
    pub const fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// The configured word order of the typed accessors.
    #[must_use]
    pub const fn word_order(&self) -> WordOrder {
        self.word_order
    }

    /// Adjust the byte order used by the typed accessors.
    pub fn set_byte_order(&mut self, byte_order: ByteOrder) {
        self.byte_order = byte_order;
    }

    /// Adjust the word order used by the typed accessors.
    pub fn set_word_order(&mut self, word_order: WordOrder) {
        self.word_order = word_order;
    }

    async fn send_request(&mut self, req: Request<'_>) -> Result<Response> {
        req.validate()?;
        if self.slave.is_broadcast() {
            return Err(Error::InvalidRequest(
                "broadcast requests cannot return a response",
            ));
        }
        self.send_with_retry(req).await
    }

    async fn send_with_retry(&mut self, req: Request<'_>) -> Result<Response> {
        let attempts = self.retry_count + 1;
        let mut last_error = None;
        for attempt in 1..=attempts {
            let is_last = attempt == attempts;
            if !self.client.is_connected() {
                if !self.auto_reconnect {
                    return Err(Error::NotConnected);
                }
                if let Err(err) = self.client.connect().await {
                    log::warn!("Connect attempt {attempt}/{attempts} failed: {err}");
                    last_error = Some(err);
                    if !is_last {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                    continue;
                }
            }
            match self.client.call(req.clone()).await {
                Ok(rsp) => return Ok(rsp),
                // Retrying a protocol exception or a locally rejected
                // request cannot change the outcome.
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    log::warn!("Request attempt {attempt}/{attempts} failed: {err}");
                    last_error = Some(err);
                    if !is_last {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        Err(Error::RequestFailed {
            attempts,
            source: Box::new(last_error.unwrap_or(Error::NotConnected)),
        })
    }

    /// Broadcasts bypass the retry loop: nothing confirms delivery, so
    /// repeating them only multiplies side effects.
    async fn send_broadcast(&mut self, req: Request<'_>) -> Result<()> {
        req.validate()?;
        if !req.is_broadcast_permitted() {
            return Err(Error::InvalidRequest(
                "function not permitted for broadcast",
            ));
        }
        if !self.client.is_connected() {
            if !self.auto_reconnect {
                return Err(Error::NotConnected);
            }
            self.client.connect().await?;
        }
        self.client.broadcast(req).await
    }
}

impl From<Box<dyn Client>> for Context {
    fn from(client: Box<dyn Client>) -> Self {
        Self::new(client, &Config::default())
    }
}

impl SlaveContext for Context {
    fn set_slave(&mut self, slave: Slave) {
        self.slave = slave;
        self.client.set_slave(slave);
    }
}

#[async_trait]
impl Client for Context {
    async fn call(&mut self, req: Request<'_>) -> Result<Response> {
        self.send_request(req).await
    }

    async fn broadcast(&mut self, req: Request<'_>) -> Result<()> {
        self.send_broadcast(req).await
    }

    async fn connect(&mut self) -> Result<()> {
        self.client.connect().await
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.client.disconnect().await
    }

    fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    fn set_response_timeout(&mut self, timeout: Option<Duration>) {
        self.client.set_response_timeout(timeout);
    }

    fn transport_type(&self) -> TransportType {
        self.client.transport_type()
    }
}

fn unexpected_rsp<T>() -> Result<T> {
    Err(Error::ResponseMismatch("unexpected response function"))
}

/// An asynchronous Modbus reader.
#[async_trait]
pub trait Reader {
    /// Read multiple coils (0x01).
    async fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;

    /// Read multiple discrete inputs (0x02).
    async fn read_discrete_inputs(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;

    /// Read multiple holding registers (0x03).
    async fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;

    /// Read multiple input registers (0x04).
    async fn read_input_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;

    /// Read the 8-bit exception status (0x07).
    async fn read_exception_status(&mut self) -> Result<u8>;

    /// Read the communication event counter (0x0B).
    ///
    /// Returns the status word and the event count.
    async fn get_comm_event_counter(&mut self) -> Result<(u16, u16)>;

    /// Read the communication event log (0x0C).
    async fn get_comm_event_log(&mut self) -> Result<CommEventLog>;

    /// Read the server identification (0x11).
    async fn report_server_id(&mut self) -> Result<ServerId>;

    /// Read one or more file records (0x14).
    async fn read_file_record(&mut self, refs: &[FileRecordRef]) -> Result<Vec<Vec<Word>>>;

    /// Write and read multiple holding registers in a single
    /// transaction (0x17). The write is performed before the read.
    async fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_count: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>>;

    /// Read the FIFO queue registered at `addr` (0x18).
    async fn read_fifo_queue(&mut self, addr: Address) -> Result<Vec<Word>>;

    /// Read one transaction worth of device-identification objects
    /// (0x2B/0x0E).
    async fn read_device_identification(
        &mut self,
        code: ReadDeviceIdCode,
        object_id: u8,
    ) -> Result<DeviceIdResponse>;
}

/// An asynchronous Modbus writer.
#[async_trait]
pub trait Writer {
    /// Write a single coil (0x05).
    async fn write_single_coil(&mut self, addr: Address, coil: Coil) -> Result<()>;

    /// Write a single holding register (0x06).
    async fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()>;

    /// Write multiple coils (0x0F).
    async fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<()>;

    /// Write multiple holding registers (0x10).
    async fn write_multiple_registers(&mut self, addr: Address, words: &[Word]) -> Result<()>;

    /// Update a holding register as
    /// `(current & and_mask) | (or_mask & !and_mask)` (0x16).
    async fn mask_write_register(
        &mut self,
        addr: Address,
        and_mask: Word,
        or_mask: Word,
    ) -> Result<()>;

    /// Write one or more file records (0x15).
    async fn write_file_record(&mut self, records: &[FileRecord]) -> Result<()>;
}

#[async_trait]
impl Reader for Context {
    async fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        let rsp = self.send_request(Request::ReadCoils(addr, cnt)).await?;
        let Response::ReadCoils(mut coils) = rsp else {
            return unexpected_rsp();
        };
        if coils.len() < cnt.into() {
            return Err(Error::ResponseMismatch("too few coils"));
        }
        coils.truncate(cnt.into());
        Ok(coils)
    }

    async fn read_discrete_inputs(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        let rsp = self
            .send_request(Request::ReadDiscreteInputs(addr, cnt))
            .await?;
        let Response::ReadDiscreteInputs(mut coils) = rsp else {
            return unexpected_rsp();
        };
        if coils.len() < cnt.into() {
            return Err(Error::ResponseMismatch("too few discrete inputs"));
        }
        coils.truncate(cnt.into());
        Ok(coils)
    }

    async fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        let rsp = self
            .send_request(Request::ReadHoldingRegisters(addr, cnt))
            .await?;
        let Response::ReadHoldingRegisters(words) = rsp else {
            return unexpected_rsp();
        };
        if words.len() != cnt.into() {
            return Err(Error::ResponseMismatch("unexpected register count"));
        }
        Ok(words)
    }

    async fn read_input_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        let rsp = self
            .send_request(Request::ReadInputRegisters(addr, cnt))
            .await?;
        let Response::ReadInputRegisters(words) = rsp else {
            return unexpected_rsp();
        };
        if words.len() != cnt.into() {
            return Err(Error::ResponseMismatch("unexpected register count"));
        }
        Ok(words)
    }

    async fn read_exception_status(&mut self) -> Result<u8> {
        let rsp = self.send_request(Request::ReadExceptionStatus).await?;
        let Response::ReadExceptionStatus(status) = rsp else {
            return unexpected_rsp();
        };
        Ok(status)
    }

    async fn get_comm_event_counter(&mut self) -> Result<(u16, u16)> {
        let rsp = self.send_request(Request::GetCommEventCounter).await?;
        let Response::GetCommEventCounter(status, event_count) = rsp else {
            return unexpected_rsp();
        };
        Ok((status, event_count))
    }

    async fn get_comm_event_log(&mut self) -> Result<CommEventLog> {
        let rsp = self.send_request(Request::GetCommEventLog).await?;
        let Response::GetCommEventLog(event_log) = rsp else {
            return unexpected_rsp();
        };
        Ok(event_log)
    }

    async fn report_server_id(&mut self) -> Result<ServerId> {
        let rsp = self.send_request(Request::ReportServerId).await?;
        let Response::ReportServerId(server_id) = rsp else {
            return unexpected_rsp();
        };
        Ok(server_id)
    }

    async fn read_file_record(&mut self, refs: &[FileRecordRef]) -> Result<Vec<Vec<Word>>> {
        let rsp = self
            .send_request(Request::ReadFileRecord(refs.into()))
            .await?;
        let Response::ReadFileRecord(record_data) = rsp else {
            return unexpected_rsp();
        };
        if record_data.len() != refs.len() {
            return Err(Error::ResponseMismatch("unexpected file record count"));
        }
        for (data, record) in record_data.iter().zip(refs) {
            if data.len() != usize::from(record.record_length) {
                return Err(Error::ResponseMismatch("unexpected file record length"));
            }
        }
        Ok(record_data)
    }

    async fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_count: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>> {
        let rsp = self
            .send_request(Request::ReadWriteMultipleRegisters(
                read_addr,
                read_count,
                write_addr,
                write_data.into(),
            ))
            .await?;
        let Response::ReadWriteMultipleRegisters(words) = rsp else {
            return unexpected_rsp();
        };
        if words.len() != read_count.into() {
            return Err(Error::ResponseMismatch("unexpected register count"));
        }
        Ok(words)
    }

    async fn read_fifo_queue(&mut self, addr: Address) -> Result<Vec<Word>> {
        let rsp = self.send_request(Request::ReadFifoQueue(addr)).await?;
        let Response::ReadFifoQueue(words) = rsp else {
            return unexpected_rsp();
        };
        Ok(words)
    }

    async fn read_device_identification(
        &mut self,
        code: ReadDeviceIdCode,
        object_id: u8,
    ) -> Result<DeviceIdResponse> {
        let rsp = self
            .send_request(Request::ReadDeviceIdentification(code, object_id))
            .await?;
        let Response::ReadDeviceIdentification(device_id) = rsp else {
            return unexpected_rsp();
        };
        Ok(device_id)
    }
}

#[async_trait]
impl Writer for Context {
    async fn write_single_coil(&mut self, addr: Address, coil: Coil) -> Result<()> {
        let req = Request::WriteSingleCoil(addr, coil);
        if self.slave.is_broadcast() {
            return self.send_broadcast(req).await;
        }
        let rsp = self.send_request(req).await?;
        let Response::WriteSingleCoil(rsp_addr, rsp_coil) = rsp else {
            return unexpected_rsp();
        };
        if rsp_addr != addr || rsp_coil != coil {
            return Err(Error::ResponseMismatch("write echo mismatch"));
        }
        Ok(())
    }

    async fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()> {
        let req = Request::WriteSingleRegister(addr, word);
        if self.slave.is_broadcast() {
            return self.send_broadcast(req).await;
        }
        let rsp = self.send_request(req).await?;
        let Response::WriteSingleRegister(rsp_addr, rsp_word) = rsp else {
            return unexpected_rsp();
        };
        if rsp_addr != addr || rsp_word != word {
            return Err(Error::ResponseMismatch("write echo mismatch"));
        }
        Ok(())
    }

    async fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<()> {
        let req = Request::WriteMultipleCoils(addr, coils.into());
        if self.slave.is_broadcast() {
            return self.send_broadcast(req).await;
        }
        let cnt = coils.len();
        let rsp = self.send_request(req).await?;
        let Response::WriteMultipleCoils(rsp_addr, rsp_cnt) = rsp else {
            return unexpected_rsp();
        };
        if rsp_addr != addr || usize::from(rsp_cnt) != cnt {
            return Err(Error::ResponseMismatch("write echo mismatch"));
        }
        Ok(())
    }

    async fn write_multiple_registers(&mut self, addr: Address, words: &[Word]) -> Result<()> {
        let req = Request::WriteMultipleRegisters(addr, words.into());
        if self.slave.is_broadcast() {
            return self.send_broadcast(req).await;
        }
        let cnt = words.len();
        let rsp = self.send_request(req).await?;
        let Response::WriteMultipleRegisters(rsp_addr, rsp_cnt) = rsp else {
            return unexpected_rsp();
        };
        if rsp_addr != addr || usize::from(rsp_cnt) != cnt {
            return Err(Error::ResponseMismatch("write echo mismatch"));
        }
        Ok(())
    }

    async fn mask_write_register(
        &mut self,
        addr: Address,
        and_mask: Word,
        or_mask: Word,
    ) -> Result<()> {
        let rsp = self
            .send_request(Request::MaskWriteRegister(addr, and_mask, or_mask))
            .await?;
        let Response::MaskWriteRegister(rsp_addr, rsp_and, rsp_or) = rsp else {
            return unexpected_rsp();
        };
        if rsp_addr != addr || rsp_and != and_mask || rsp_or != or_mask {
            return Err(Error::ResponseMismatch("write echo mismatch"));
        }
        Ok(())
    }

    async fn write_file_record(&mut self, records: &[FileRecord]) -> Result<()> {
        let rsp = self
            .send_request(Request::WriteFileRecord(records.into()))
            .await?;
        let Response::WriteFileRecord(rsp_records) = rsp else {
            return unexpected_rsp();
        };
        if rsp_records != records {
            return Err(Error::ResponseMismatch("write echo mismatch"));
        }
        Ok(())
    }
}

/// Diagnostics and device-identification convenience calls.
impl Context {
    /// Invoke a diagnostics sub-function (0x08) and return the
    /// response data field.
    pub async fn diagnostics(
        &mut self,
        sub_function: DiagnosticSubFunction,
        data: u16,
    ) -> Result<u16> {
        let rsp = self
            .send_request(Request::Diagnostics(sub_function, data))
            .await?;
        let Response::Diagnostics(rsp_sub, rsp_data) = rsp else {
            return unexpected_rsp();
        };
        if rsp_sub != sub_function {
            return Err(Error::ResponseMismatch("sub-function echo mismatch"));
        }
        Ok(rsp_data)
    }

    /// Loopback test: the server echoes `data` unchanged (0x08/0x0000).
    pub async fn return_query_data(&mut self, data: u16) -> Result<()> {
        let echoed = self
            .diagnostics(DiagnosticSubFunction::ReturnQueryData, data)
            .await?;
        if echoed != data {
            return Err(Error::ResponseMismatch("query data echo mismatch"));
        }
        Ok(())
    }

    /// Restart the server communications option (0x08/0x0001).
    ///
    /// Clears all counters; `clear_event_log` additionally clears the
    /// communication event log.
    pub async fn restart_communications(&mut self, clear_event_log: bool) -> Result<()> {
        let data = if clear_event_log { 0xFF00 } else { 0x0000 };
        self.diagnostics(DiagnosticSubFunction::RestartCommunicationsOption, data)
            .await?;
        Ok(())
    }

    /// Read the 16-bit diagnostic register (0x08/0x0002).
    pub async fn read_diagnostic_register(&mut self) -> Result<u16> {
        self.diagnostics(DiagnosticSubFunction::ReturnDiagnosticRegister, 0)
            .await
    }

    /// Clear all diagnostic counters and the diagnostic register
    /// (0x08/0x000A).
    pub async fn clear_counters(&mut self) -> Result<()> {
        self.diagnostics(DiagnosticSubFunction::ClearCountersAndDiagnosticRegister, 0)
            .await?;
        Ok(())
    }

    /// Fetch all device-identification objects of a category,
    /// following the continuation markers across transactions.
    pub async fn read_full_device_identification(
        &mut self,
        code: ReadDeviceIdCode,
    ) -> Result<Vec<DeviceIdObject>> {
        let mut objects = Vec::new();
        let mut next_object_id = 0x00;
        // The object id space is exhausted after at most 256 rounds.
        for _ in 0..=u8::MAX as usize {
            let rsp = self.read_device_identification(code, next_object_id).await?;
            objects.extend(rsp.objects);
            if !rsp.more_follows {
                return Ok(objects);
            }
            next_object_id = rsp.next_object_id;
        }
        Err(Error::ResponseMismatch("device identification never ends"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
    };

    #[derive(Debug, Default)]
    pub(crate) struct ClientMock {
        connected: bool,
        connect_error: bool,
        next_responses: VecDeque<Result<Response>>,
        call_count: Arc<AtomicUsize>,
        connect_count: Arc<AtomicUsize>,
        broadcast_count: Arc<AtomicUsize>,
        last_request: Arc<Mutex<Option<Request<'static>>>>,
    }

    #[async_trait]
    impl Client for ClientMock {
        async fn call(&mut self, req: Request<'_>) -> Result<Response> {
            self.call_count.fetch_add(1, Ordering::Relaxed);
            *self.last_request.lock().expect("mutex poisoned") = Some(req.into_owned());
            self.next_responses
                .pop_front()
                .unwrap_or(Err(Error::Timeout))
        }

        async fn broadcast(&mut self, req: Request<'_>) -> Result<()> {
            self.broadcast_count.fetch_add(1, Ordering::Relaxed);
            *self.last_request.lock().expect("mutex poisoned") = Some(req.into_owned());
            Ok(())
        }

        async fn connect(&mut self) -> Result<()> {
            self.connect_count.fetch_add(1, Ordering::Relaxed);
            if self.connect_error {
                return Err(Error::Transport(std::io::Error::from(
                    std::io::ErrorKind::ConnectionRefused,
                )));
            }
            self.connected = true;
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.connected = false;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn set_response_timeout(&mut self, _: Option<Duration>) {}

        fn transport_type(&self) -> TransportType {
            TransportType::Tcp
        }
    }

    impl SlaveContext for ClientMock {
        fn set_slave(&mut self, _: Slave) {}
    }

    fn context_with(mock: ClientMock, config: &Config) -> Context {
        Context::new(Box::new(mock), config)
    }

    fn fast_config() -> Config {
        Config {
            retry_delay: Duration::from_millis(1),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn read_some_coils() {
        // The protocol always returns entire bytes, i.e. a multiple of
        // 8 coils.
        let response_coils = [true, false, false, true, false, true, false, true].to_vec();
        for num_coils in 1..8 {
            let mut mock = ClientMock {
                connected: true,
                ..ClientMock::default()
            };
            mock.next_responses
                .push_back(Ok(Response::ReadCoils(response_coils.clone())));
            let mut context = context_with(mock, &fast_config());
            let coils = context.read_coils(1, num_coils as u16).await.unwrap();
            assert_eq!(&response_coils[0..num_coils], &coils[..]);
        }
    }

    #[tokio::test]
    async fn surface_exception_without_retry() {
        let mut mock = ClientMock {
            connected: true,
            ..ClientMock::default()
        };
        mock.next_responses.push_back(Err(Error::Exception(ExceptionResponse {
            function: FunctionCode::ReadHoldingRegisters,
            exception: ExceptionCode::IllegalDataAddress,
        })));
        let mut context = context_with(
            mock,
            &Config {
                retry_count: 3,
                ..fast_config()
            },
        );
        let err = context.read_holding_registers(0, 1).await.unwrap_err();
        assert_eq!(
            err.exception_code(),
            Some(ExceptionCode::IllegalDataAddress)
        );
    }

    #[tokio::test]
    async fn retry_exhaustion_reports_attempt_count() {
        let mock = ClientMock {
            connected: true,
            ..ClientMock::default()
        };
        let call_count = Arc::clone(&mock.call_count);
        // No responses queued: every call fails with a timeout.
        let mut context = context_with(
            mock,
            &Config {
                retry_count: 2,
                ..fast_config()
            },
        );
        let err = context.read_holding_registers(0, 1).await.unwrap_err();
        let Error::RequestFailed { attempts, source } = err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(attempts, 3);
        assert_eq!(call_count.load(Ordering::Relaxed), 3);
        assert!(matches!(*source, Error::Timeout));
    }

    #[tokio::test]
    async fn auto_reconnect_before_request() {
        let mut mock = ClientMock::default();
        mock.next_responses
            .push_back(Ok(Response::ReadHoldingRegisters(vec![42])));
        let connect_count = Arc::clone(&mock.connect_count);
        let mut context = context_with(mock, &fast_config());
        let words = context.read_holding_registers(0, 1).await.unwrap();
        assert_eq!(words, vec![42]);
        assert_eq!(connect_count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn disconnected_without_auto_reconnect() {
        let mock = ClientMock::default();
        let mut context = context_with(
            mock,
            &Config {
                auto_reconnect: false,
                ..fast_config()
            },
        );
        let err = context.read_holding_registers(0, 1).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn local_validation_before_any_io() {
        let mock = ClientMock {
            connected: true,
            ..ClientMock::default()
        };
        let mut context = context_with(mock, &fast_config());
        let err = context.read_holding_registers(0, 126).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn broadcast_write_skips_response() {
        let mock = ClientMock {
            connected: true,
            ..ClientMock::default()
        };
        let call_count = Arc::clone(&mock.call_count);
        let broadcast_count = Arc::clone(&mock.broadcast_count);
        let last_request = Arc::clone(&mock.last_request);
        let mut context = context_with(mock, &fast_config());
        context.set_slave(Slave::BROADCAST);
        context
            .write_multiple_registers(100, &[1, 2, 3])
            .await
            .unwrap();
        assert_eq!(call_count.load(Ordering::Relaxed), 0);
        assert_eq!(broadcast_count.load(Ordering::Relaxed), 1);
        assert_eq!(
            *last_request.lock().expect("mutex poisoned"),
            Some(Request::WriteMultipleRegisters(
                100,
                std::borrow::Cow::Owned(vec![1, 2, 3])
            ))
        );
    }

    #[tokio::test]
    async fn broadcast_read_is_rejected() {
        let mock = ClientMock {
            connected: true,
            ..ClientMock::default()
        };
        let mut context = context_with(mock, &fast_config());
        context.set_slave(Slave::BROADCAST);
        let err = context.read_coils(0, 1).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn write_echo_mismatch_is_detected() {
        let mut mock = ClientMock {
            connected: true,
            ..ClientMock::default()
        };
        mock.next_responses
            .push_back(Ok(Response::WriteSingleRegister(0x08, 0x0003)));
        let mut context = context_with(mock, &fast_config());
        let err = context.write_single_register(0x07, 0x0003).await.unwrap_err();
        assert!(matches!(err, Error::ResponseMismatch(_)));
    }

    #[tokio::test]
    async fn mask_write_echo_is_verified() {
        let mut mock = ClientMock {
            connected: true,
            ..ClientMock::default()
        };
        mock.next_responses
            .push_back(Ok(Response::MaskWriteRegister(0x28, 0x00F2, 0x0025)));
        let mut context = context_with(mock, &fast_config());
        context
            .mask_write_register(0x28, 0x00F2, 0x0025)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn device_identification_fetch_loop() {
        let mut mock = ClientMock {
            connected: true,
            ..ClientMock::default()
        };
        mock.next_responses.push_back(Ok(Response::ReadDeviceIdentification(
            DeviceIdResponse {
                read_device_id_code: ReadDeviceIdCode::Basic,
                conformity_level: 0x01,
                more_follows: true,
                next_object_id: 0x02,
                objects: vec![
                    DeviceIdObject {
                        object_id: 0x00,
                        data: b"slowtec".to_vec(),
                    },
                    DeviceIdObject {
                        object_id: 0x01,
                        data: b"MB".to_vec(),
                    },
                ],
            },
        )));
        mock.next_responses.push_back(Ok(Response::ReadDeviceIdentification(
            DeviceIdResponse {
                read_device_id_code: ReadDeviceIdCode::Basic,
                conformity_level: 0x01,
                more_follows: false,
                next_object_id: 0x00,
                objects: vec![DeviceIdObject {
                    object_id: 0x02,
                    data: b"v2.0".to_vec(),
                }],
            },
        )));
        let mut context = context_with(mock, &fast_config());
        let objects = context
            .read_full_device_identification(ReadDeviceIdCode::Basic)
            .await
            .unwrap();
        assert_eq!(objects.len(), 3);
        assert_eq!(objects[2].data, b"v2.0");
    }
}
