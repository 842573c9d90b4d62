// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server-side data stores
//!
//! The server dispatches every decoded request against a polymorphic
//! [`DataStore`]. Each capability is individually substitutable, e.g.
//! a test store may answer every register access with
//! [`ExceptionCode::IllegalDataAddress`].

mod memory;

pub use self::memory::InMemoryStore;

use crate::frame::{
    Address, Coil, CommEventLog, DiagnosticSubFunction, ExceptionCode, Quantity, Word,
};

/// The result of a data-store operation.
///
/// Errors carry a Modbus exception code that the dispatcher reflects
/// verbatim to the client.
pub type StoreResult<T> = Result<T, ExceptionCode>;

/// Counter events recorded by the server engine while processing
/// requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterEvent {
    /// A message was seen on the bus.
    BusMessage,
    /// A message failed its checksum.
    BusCommunicationError,
    /// An exception response was returned.
    BusException,
    /// A message addressed this server.
    ServerMessage,
    /// A request was processed without sending a response.
    ServerNoResponse,
    /// A negative acknowledgement was returned.
    ServerNak,
    /// A server-busy exception was returned.
    ServerBusy,
    /// A character overrun occurred.
    BusCharacterOverrun,
}

/// The capability set the server engine invokes.
///
/// All methods take `&self`: implementations guard their state for
/// concurrent readers and serialized writers. The compound operations
/// (`mask_write_register`, `read_write_registers`) must be atomic with
/// respect to other writers of the same region.
pub trait DataStore: Send + Sync {
    /// Read `cnt` coils starting at `addr`.
    fn read_coils(&self, addr: Address, cnt: Quantity) -> StoreResult<Vec<Coil>>;

    /// Write coil values starting at `addr`.
    fn write_coils(&self, addr: Address, coils: &[Coil]) -> StoreResult<()>;

    /// Read `cnt` discrete inputs starting at `addr`.
    fn read_discrete_inputs(&self, addr: Address, cnt: Quantity) -> StoreResult<Vec<Coil>>;

    /// Read `cnt` holding registers starting at `addr`.
    fn read_holding_registers(&self, addr: Address, cnt: Quantity) -> StoreResult<Vec<Word>>;

    /// Write register values starting at `addr`.
    fn write_holding_registers(&self, addr: Address, words: &[Word]) -> StoreResult<()>;

    /// Read `cnt` input registers starting at `addr`.
    fn read_input_registers(&self, addr: Address, cnt: Quantity) -> StoreResult<Vec<Word>>;

    /// Atomically update a holding register as
    /// `(current & and_mask) | (or_mask & !and_mask)` and return the
    /// new value.
    fn mask_write_register(
        &self,
        addr: Address,
        and_mask: Word,
        or_mask: Word,
    ) -> StoreResult<Word>;

    /// Atomically write `words` at `write_addr`, then read `cnt`
    /// holding registers at `read_addr`. A read range overlapping the
    /// write range observes the newly written values.
    fn read_write_registers(
        &self,
        read_addr: Address,
        cnt: Quantity,
        write_addr: Address,
        words: &[Word],
    ) -> StoreResult<Vec<Word>>;

    /// Read `record_length` registers of a file record.
    fn read_file_record(
        &self,
        file_number: u16,
        record_number: u16,
        record_length: u16,
    ) -> StoreResult<Vec<Word>>;

    /// Write the registers of a file record.
    fn write_file_record(
        &self,
        file_number: u16,
        record_number: u16,
        data: &[Word],
    ) -> StoreResult<()>;

    /// Read the FIFO queue registered at `addr`, oldest value first.
    ///
    /// At most 31 values are returned.
    fn read_fifo_queue(&self, addr: Address) -> StoreResult<Vec<Word>>;

    /// Read the 8-bit exception status.
    fn read_exception_status(&self) -> StoreResult<u8>;

    /// Query a diagnostics sub-function and return the response data
    /// field.
    ///
    /// The dispatcher handles `ReturnQueryData` and
    /// `ForceListenOnlyMode` itself; every other sub-function reaches
    /// the store.
    fn diagnostics(&self, sub_function: DiagnosticSubFunction, data: u16) -> StoreResult<u16>;

    /// Read the communication event counter: status word and event
    /// count.
    fn comm_event_counter(&self) -> StoreResult<(u16, u16)>;

    /// Read the communication event log.
    fn comm_event_log(&self) -> StoreResult<CommEventLog>;

    /// Record a counter event observed by the server engine.
    ///
    /// The default implementation discards the event.
    fn record(&self, event: CounterEvent) {
        let _ = event;
    }
}
