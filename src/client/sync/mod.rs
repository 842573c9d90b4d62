// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Synchronous Modbus clients
//!
//! A thin blocking facade: every context owns a private
//! single-threaded runtime and blocks on the asynchronous engine. All
//! deadlines, retries and broadcast rules of the asynchronous
//! [`Context`](super::Context) apply unchanged.

#[cfg(feature = "ascii")]
pub mod ascii;

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "tcp")]
pub mod tcp;

#[cfg(feature = "udp")]
pub mod udp;

use std::time::Duration;

use crate::{
    error::Result,
    frame::*,
    slave::*,
};

use super::{
    Context as AsyncContext, Reader as AsyncReader, TransportType, Writer as AsyncWriter,
};

fn new_runtime() -> Result<tokio::runtime::Runtime> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(runtime)
}

/// A synchronous Modbus client context.
#[derive(Debug)]
pub struct Context {
    runtime: tokio::runtime::Runtime,
    async_ctx: AsyncContext,
}

impl Context {
    pub(crate) const fn new(runtime: tokio::runtime::Runtime, async_ctx: AsyncContext) -> Self {
        Self { runtime, async_ctx }
    }

    /// The currently addressed slave device.
    #[must_use]
    pub const fn slave(&self) -> Slave {
        self.async_ctx.slave()
    }

    /// The transport of the wrapped driver.
    #[must_use]
    pub fn transport_type(&self) -> TransportType {
        self.async_ctx.transport_type()
    }

    /// Whether the wrapped driver is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.async_ctx.is_connected()
    }

    /// (Re-)establish the transport connection.
    pub fn connect(&mut self) -> Result<()> {
        self.runtime.block_on(self.async_ctx.connect())
    }

    /// Close the transport connection.
    pub fn disconnect(&mut self) -> Result<()> {
        self.runtime.block_on(self.async_ctx.disconnect())
    }

    /// Adjust the per-operation deadline.
    pub fn set_response_timeout(&mut self, timeout: impl Into<Option<Duration>>) {
        self.async_ctx.set_response_timeout(timeout);
    }

    /// Adjust the number of additional attempts after a failure.
    pub fn set_retry_count(&mut self, retry_count: usize) {
        self.async_ctx.set_retry_count(retry_count);
    }

    /// Adjust the sleep between attempts.
    pub fn set_retry_delay(&mut self, retry_delay: Duration) {
        self.async_ctx.set_retry_delay(retry_delay);
    }

    /// Enable or disable automatic reconnects.
    pub fn set_auto_reconnect(&mut self, auto_reconnect: bool) {
        self.async_ctx.set_auto_reconnect(auto_reconnect);
    }

    /// Invoke a diagnostics sub-function (0x08).
    pub fn diagnostics(
        &mut self,
        sub_function: DiagnosticSubFunction,
        data: u16,
    ) -> Result<u16> {
        self.runtime
            .block_on(self.async_ctx.diagnostics(sub_function, data))
    }

    /// Loopback test (0x08/0x0000).
    pub fn return_query_data(&mut self, data: u16) -> Result<()> {
        self.runtime.block_on(self.async_ctx.return_query_data(data))
    }

    /// Restart the server communications option (0x08/0x0001).
    pub fn restart_communications(&mut self, clear_event_log: bool) -> Result<()> {
        self.runtime
            .block_on(self.async_ctx.restart_communications(clear_event_log))
    }

    /// Read the diagnostic register (0x08/0x0002).
    pub fn read_diagnostic_register(&mut self) -> Result<u16> {
        self.runtime
            .block_on(self.async_ctx.read_diagnostic_register())
    }

    /// Clear all diagnostic counters (0x08/0x000A).
    pub fn clear_counters(&mut self) -> Result<()> {
        self.runtime.block_on(self.async_ctx.clear_counters())
    }

    /// Fetch all device-identification objects of a category.
    pub fn read_full_device_identification(
        &mut self,
        code: ReadDeviceIdCode,
    ) -> Result<Vec<DeviceIdObject>> {
        self.runtime
            .block_on(self.async_ctx.read_full_device_identification(code))
    }

    /// Read an `u32` from two holding registers.
    pub fn read_u32(&mut self, addr: Address) -> Result<u32> {
        self.runtime.block_on(self.async_ctx.read_u32(addr))
    }

    /// Read an `i32` from two holding registers.
    pub fn read_i32(&mut self, addr: Address) -> Result<i32> {
        self.runtime.block_on(self.async_ctx.read_i32(addr))
    }

    /// Read an `u64` from four holding registers.
    pub fn read_u64(&mut self, addr: Address) -> Result<u64> {
        self.runtime.block_on(self.async_ctx.read_u64(addr))
    }

    /// Read an `i64` from four holding registers.
    pub fn read_i64(&mut self, addr: Address) -> Result<i64> {
        self.runtime.block_on(self.async_ctx.read_i64(addr))
    }

    /// Read an `f32` from two holding registers.
    pub fn read_f32(&mut self, addr: Address) -> Result<f32> {
        self.runtime.block_on(self.async_ctx.read_f32(addr))
    }

    /// Read an `f64` from four holding registers.
    pub fn read_f64(&mut self, addr: Address) -> Result<f64> {
        self.runtime.block_on(self.async_ctx.read_f64(addr))
    }

    /// Write an `u32` to two holding registers.
    pub fn write_u32(&mut self, addr: Address, value: u32) -> Result<()> {
        self.runtime.block_on(self.async_ctx.write_u32(addr, value))
    }

    /// Write an `i32` to two holding registers.
    pub fn write_i32(&mut self, addr: Address, value: i32) -> Result<()> {
        self.runtime.block_on(self.async_ctx.write_i32(addr, value))
    }

    /// Write an `u64` to four holding registers.
    pub fn write_u64(&mut self, addr: Address, value: u64) -> Result<()> {
        self.runtime.block_on(self.async_ctx.write_u64(addr, value))
    }

    /// Write an `i64` to four holding registers.
    pub fn write_i64(&mut self, addr: Address, value: i64) -> Result<()> {
        self.runtime.block_on(self.async_ctx.write_i64(addr, value))
    }

    /// Write an `f32` to two holding registers.
    pub fn write_f32(&mut self, addr: Address, value: f32) -> Result<()> {
        self.runtime.block_on(self.async_ctx.write_f32(addr, value))
    }

    /// Write an `f64` to four holding registers.
    pub fn write_f64(&mut self, addr: Address, value: f64) -> Result<()> {
        self.runtime.block_on(self.async_ctx.write_f64(addr, value))
    }

    /// Read a string, truncated at the first NUL byte.
    pub fn read_string(&mut self, addr: Address, max_len: u16) -> Result<String> {
        self.runtime
            .block_on(self.async_ctx.read_string(addr, max_len))
    }

    /// Write a string to holding registers.
    pub fn write_string(&mut self, addr: Address, value: &str) -> Result<()> {
        self.runtime
            .block_on(self.async_ctx.write_string(addr, value))
    }
}

impl SlaveContext for Context {
    fn set_slave(&mut self, slave: Slave) {
        self.async_ctx.set_slave(slave);
    }
}

/// A transport-independent synchronous reader trait.
///
/// The synchronous counterpart of the asynchronous
/// [`Reader`](`crate::client::Reader`) trait.
pub trait Reader {
    /// Read multiple coils (0x01).
    fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;
    /// Read multiple discrete inputs (0x02).
    fn read_discrete_inputs(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;
    /// Read multiple holding registers (0x03).
    fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;
    /// Read multiple input registers (0x04).
    fn read_input_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;
    /// Read the 8-bit exception status (0x07).
    fn read_exception_status(&mut self) -> Result<u8>;
    /// Read the communication event counter (0x0B).
    fn get_comm_event_counter(&mut self) -> Result<(u16, u16)>;
    /// Read the communication event log (0x0C).
    fn get_comm_event_log(&mut self) -> Result<CommEventLog>;
    /// Read the server identification (0x11).
    fn report_server_id(&mut self) -> Result<ServerId>;
    /// Read one or more file records (0x14).
    fn read_file_record(&mut self, refs: &[FileRecordRef]) -> Result<Vec<Vec<Word>>>;
    /// Write and read multiple holding registers in one transaction
    /// (0x17).
    fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_count: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>>;
    /// Read a FIFO queue (0x18).
    fn read_fifo_queue(&mut self, addr: Address) -> Result<Vec<Word>>;
    /// Read device-identification objects (0x2B/0x0E).
    fn read_device_identification(
        &mut self,
        code: ReadDeviceIdCode,
        object_id: u8,
    ) -> Result<DeviceIdResponse>;
}

/// A transport-independent synchronous writer trait.
///
/// The synchronous counterpart of the asynchronous
/// [`Writer`](`crate::client::Writer`) trait.
pub trait Writer {
    /// Write a single coil (0x05).
    fn write_single_coil(&mut self, addr: Address, coil: Coil) -> Result<()>;
    /// Write a single holding register (0x06).
    fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()>;
    /// Write multiple coils (0x0F).
    fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<()>;
    /// Write multiple holding registers (0x10).
    fn write_multiple_registers(&mut self, addr: Address, words: &[Word]) -> Result<()>;
    /// Masked holding register update (0x16).
    fn mask_write_register(&mut self, addr: Address, and_mask: Word, or_mask: Word)
        -> Result<()>;
    /// Write one or more file records (0x15).
    fn write_file_record(&mut self, records: &[FileRecord]) -> Result<()>;
}

impl Reader for Context {
    fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        self.runtime.block_on(self.async_ctx.read_coils(addr, cnt))
    }

    fn read_discrete_inputs(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        self.runtime
            .block_on(self.async_ctx.read_discrete_inputs(addr, cnt))
    }

    fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        self.runtime
            .block_on(self.async_ctx.read_holding_registers(addr, cnt))
    }

    fn read_input_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        self.runtime
            .block_on(self.async_ctx.read_input_registers(addr, cnt))
    }

    fn read_exception_status(&mut self) -> Result<u8> {
        self.runtime.block_on(self.async_ctx.read_exception_status())
    }

    fn get_comm_event_counter(&mut self) -> Result<(u16, u16)> {
        self.runtime
            .block_on(self.async_ctx.get_comm_event_counter())
    }

    fn get_comm_event_log(&mut self) -> Result<CommEventLog> {
        self.runtime.block_on(self.async_ctx.get_comm_event_log())
    }

    fn report_server_id(&mut self) -> Result<ServerId> {
        self.runtime.block_on(self.async_ctx.report_server_id())
    }

    fn read_file_record(&mut self, refs: &[FileRecordRef]) -> Result<Vec<Vec<Word>>> {
        self.runtime.block_on(self.async_ctx.read_file_record(refs))
    }

    fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_count: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>> {
        self.runtime.block_on(self.async_ctx.read_write_multiple_registers(
            read_addr, read_count, write_addr, write_data,
        ))
    }

    fn read_fifo_queue(&mut self, addr: Address) -> Result<Vec<Word>> {
        self.runtime.block_on(self.async_ctx.read_fifo_queue(addr))
    }

    fn read_device_identification(
        &mut self,
        code: ReadDeviceIdCode,
        object_id: u8,
    ) -> Result<DeviceIdResponse> {
        self.runtime
            .block_on(self.async_ctx.read_device_identification(code, object_id))
    }
}

impl Writer for Context {
    fn write_single_coil(&mut self, addr: Address, coil: Coil) -> Result<()> {
        self.runtime
            .block_on(self.async_ctx.write_single_coil(addr, coil))
    }

    fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()> {
        self.runtime
            .block_on(self.async_ctx.write_single_register(addr, word))
    }

    fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<()> {
        self.runtime
            .block_on(self.async_ctx.write_multiple_coils(addr, coils))
    }

    fn write_multiple_registers(&mut self, addr: Address, words: &[Word]) -> Result<()> {
        self.runtime
            .block_on(self.async_ctx.write_multiple_registers(addr, words))
    }

    fn mask_write_register(
        &mut self,
        addr: Address,
        and_mask: Word,
        or_mask: Word,
    ) -> Result<()> {
        self.runtime
            .block_on(self.async_ctx.mask_write_register(addr, and_mask, or_mask))
    }

    fn write_file_record(&mut self, records: &[FileRecord]) -> Result<()> {
        self.runtime
            .block_on(self.async_ctx.write_file_record(records))
    }
}
