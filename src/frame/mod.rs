// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Protocol data units and the typed request/response model

pub(crate) mod coils;

#[cfg(feature = "rtu")]
pub(crate) mod rtu;

#[cfg(feature = "tcp")]
pub(crate) mod tcp;

use std::{borrow::Cow, error, fmt};

use bytes::Bytes;

use crate::{error::Error, slave::SlaveId};

/// A Modbus protocol address is represented by 16 bit from `0` to `65535`.
///
/// This *protocol address* uses 0-based indexing, while the *coil address* or
/// *register address* is often specified as a number with 1-based indexing.
/// Please consult the specification of your devices if 1-based coil/register
/// addresses need to be converted to 0-based protocol addresses by subtracting 1.
pub type Address = u16;

/// A Coil represents a single bit.
///
/// - `true` is equivalent to `ON`, `1` and `0xFF00`.
/// - `false` is equivalent to `OFF`, `0` and `0x0000`.
pub type Coil = bool;

/// Modbus uses 16 bit for its data items (big-endian representation).
pub type Word = u16;

/// Number of items to process (`1` - `65535`).
pub type Quantity = u16;

/// Raw PDU payloads are limited to 252 bytes, i.e. one function code
/// byte plus payload must not exceed 253 bytes.
pub(crate) const MAX_PDU_SIZE: usize = 253;

/// The reference type byte of every file-record sub-request.
pub(crate) const FILE_REFERENCE_TYPE: u8 = 6;

/// The MEI type for reading the device identification via function
/// code `0x2B` (Encapsulated Interface Transport).
pub(crate) const MEI_DEVICE_IDENTIFICATION: u8 = 0x0E;

/// Per-function-code quantity limits, enforced before any I/O.
pub(crate) mod limits {
    /// Maximum number of coils/discrete inputs per read (FC 01/02).
    pub(crate) const MAX_READ_BITS: u16 = 2000;
    /// Maximum number of registers per read (FC 03/04).
    pub(crate) const MAX_READ_REGISTERS: u16 = 125;
    /// Maximum number of coils per write (FC 15).
    pub(crate) const MAX_WRITE_BITS: u16 = 1968;
    /// Maximum number of registers per write (FC 16).
    pub(crate) const MAX_WRITE_REGISTERS: u16 = 123;
    /// Maximum number of registers read by FC 23.
    pub(crate) const MAX_RW_READ_REGISTERS: u16 = 125;
    /// Maximum number of registers written by FC 23.
    pub(crate) const MAX_RW_WRITE_REGISTERS: u16 = 121;
    /// Maximum payload of file-record sub-requests in a read request (FC 20).
    pub(crate) const MAX_READ_FILE_RECORD_BYTES: usize = 245;
    /// Maximum payload of file-record sub-requests in a write request (FC 21).
    pub(crate) const MAX_WRITE_FILE_RECORD_BYTES: usize = 251;
    /// Maximum number of values in a FIFO queue response (FC 24).
    pub(crate) const MAX_FIFO_COUNT: u16 = 31;
    /// Highest valid file record number.
    pub(crate) const MAX_RECORD_NUMBER: u16 = 9999;
}

/// A Modbus function code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCode {
    /// Modbus Function Code: `01` (`0x01`).
    ReadCoils,
    /// Modbus Function Code: `02` (`0x02`).
    ReadDiscreteInputs,
    /// Modbus Function Code: `03` (`0x03`).
    ReadHoldingRegisters,
    /// Modbus Function Code: `04` (`0x04`).
    ReadInputRegisters,
    /// Modbus Function Code: `05` (`0x05`).
    WriteSingleCoil,
    /// Modbus Function Code: `06` (`0x06`).
    WriteSingleRegister,
    /// Modbus Function Code: `07` (`0x07`).
    ReadExceptionStatus,
    /// Modbus Function Code: `08` (`0x08`).
    Diagnostics,
    /// Modbus Function Code: `11` (`0x0B`).
    GetCommEventCounter,
    /// Modbus Function Code: `12` (`0x0C`).
    GetCommEventLog,
    /// Modbus Function Code: `15` (`0x0F`).
    WriteMultipleCoils,
    /// Modbus Function Code: `16` (`0x10`).
    WriteMultipleRegisters,
    /// Modbus Function Code: `17` (`0x11`).
    ReportServerId,
    /// Modbus Function Code: `20` (`0x14`).
    ReadFileRecord,
    /// Modbus Function Code: `21` (`0x15`).
    WriteFileRecord,
    /// Modbus Function Code: `22` (`0x16`).
    MaskWriteRegister,
    /// Modbus Function Code: `23` (`0x17`).
    ReadWriteMultipleRegisters,
    /// Modbus Function Code: `24` (`0x18`).
    ReadFifoQueue,
    /// Modbus Function Code: `43` (`0x2B`), Encapsulated Interface
    /// Transport. Only the Device Identification MEI (`0x0E`) is
    /// implemented.
    EncapsulatedInterfaceTransport,
    /// Custom Modbus Function Code.
    Custom(u8),
}

impl FunctionCode {
    /// Create a new [`FunctionCode`] with `value`.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        match value {
            0x01 => Self::ReadCoils,
            0x02 => Self::ReadDiscreteInputs,
            0x03 => Self::ReadHoldingRegisters,
            0x04 => Self::ReadInputRegisters,
            0x05 => Self::WriteSingleCoil,
            0x06 => Self::WriteSingleRegister,
            0x07 => Self::ReadExceptionStatus,
            0x08 => Self::Diagnostics,
            0x0B => Self::GetCommEventCounter,
            0x0C => Self::GetCommEventLog,
            0x0F => Self::WriteMultipleCoils,
            0x10 => Self::WriteMultipleRegisters,
            0x11 => Self::ReportServerId,
            0x14 => Self::ReadFileRecord,
            0x15 => Self::WriteFileRecord,
            0x16 => Self::MaskWriteRegister,
            0x17 => Self::ReadWriteMultipleRegisters,
            0x18 => Self::ReadFifoQueue,
            0x2B => Self::EncapsulatedInterfaceTransport,
            code => Self::Custom(code),
        }
    }

    /// Get the [`u8`] value of the current [`FunctionCode`].
    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
            Self::ReadExceptionStatus => 0x07,
            Self::Diagnostics => 0x08,
            Self::GetCommEventCounter => 0x0B,
            Self::GetCommEventLog => 0x0C,
            Self::WriteMultipleCoils => 0x0F,
            Self::WriteMultipleRegisters => 0x10,
            Self::ReportServerId => 0x11,
            Self::ReadFileRecord => 0x14,
            Self::WriteFileRecord => 0x15,
            Self::MaskWriteRegister => 0x16,
            Self::ReadWriteMultipleRegisters => 0x17,
            Self::ReadFifoQueue => 0x18,
            Self::EncapsulatedInterfaceTransport => 0x2B,
            Self::Custom(code) => code,
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value().fmt(f)
    }
}

/// A diagnostics sub-function of function code `08` (`0x08`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSubFunction {
    /// `0x0000`: echo the request data.
    ReturnQueryData,
    /// `0x0001`: restart communications, clear counters and the event log.
    RestartCommunicationsOption,
    /// `0x0002`: return the 16-bit diagnostic register.
    ReturnDiagnosticRegister,
    /// `0x0004`: stop responding until communications are restarted.
    ForceListenOnlyMode,
    /// `0x000A`: clear all counters and the diagnostic register.
    ClearCountersAndDiagnosticRegister,
    /// `0x000B`: number of messages seen on the bus.
    ReturnBusMessageCount,
    /// `0x000C`: number of CRC/LRC errors seen on the bus.
    ReturnBusCommunicationErrorCount,
    /// `0x000D`: number of exception responses returned.
    ReturnBusExceptionErrorCount,
    /// `0x000E`: number of messages addressed to this server.
    ReturnServerMessageCount,
    /// `0x000F`: number of broadcasts processed without a response.
    ReturnServerNoResponseCount,
    /// `0x0010`: number of negative acknowledgements.
    ReturnServerNakCount,
    /// `0x0011`: number of server-busy exception responses.
    ReturnServerBusyCount,
    /// `0x0012`: number of character overruns.
    ReturnBusCharacterOverrunCount,
    /// `0x0014`: clear the overrun counter.
    ClearOverrunCounter,
}

impl DiagnosticSubFunction {
    /// Map a raw sub-function value.
    #[must_use]
    pub const fn new(value: u16) -> Option<Self> {
        let subfn = match value {
            0x0000 => Self::ReturnQueryData,
            0x0001 => Self::RestartCommunicationsOption,
            0x0002 => Self::ReturnDiagnosticRegister,
            0x0004 => Self::ForceListenOnlyMode,
            0x000A => Self::ClearCountersAndDiagnosticRegister,
            0x000B => Self::ReturnBusMessageCount,
            0x000C => Self::ReturnBusCommunicationErrorCount,
            0x000D => Self::ReturnBusExceptionErrorCount,
            0x000E => Self::ReturnServerMessageCount,
            0x000F => Self::ReturnServerNoResponseCount,
            0x0010 => Self::ReturnServerNakCount,
            0x0011 => Self::ReturnServerBusyCount,
            0x0012 => Self::ReturnBusCharacterOverrunCount,
            0x0014 => Self::ClearOverrunCounter,
            _ => return None,
        };
        Some(subfn)
    }

    /// Get the raw sub-function value.
    #[must_use]
    pub const fn value(self) -> u16 {
        match self {
            Self::ReturnQueryData => 0x0000,
            Self::RestartCommunicationsOption => 0x0001,
            Self::ReturnDiagnosticRegister => 0x0002,
            Self::ForceListenOnlyMode => 0x0004,
            Self::ClearCountersAndDiagnosticRegister => 0x000A,
            Self::ReturnBusMessageCount => 0x000B,
            Self::ReturnBusCommunicationErrorCount => 0x000C,
            Self::ReturnBusExceptionErrorCount => 0x000D,
            Self::ReturnServerMessageCount => 0x000E,
            Self::ReturnServerNoResponseCount => 0x000F,
            Self::ReturnServerNakCount => 0x0010,
            Self::ReturnServerBusyCount => 0x0011,
            Self::ReturnBusCharacterOverrunCount => 0x0012,
            Self::ClearOverrunCounter => 0x0014,
        }
    }
}

/// The category of device-identification objects to read (FC 43/14).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadDeviceIdCode {
    /// Objects `0x00..=0x02` (mandatory).
    Basic,
    /// Objects `0x00..=0x06` (optional).
    Regular,
    /// Vendor-specific objects `0x80..`.
    Extended,
    /// One specific object.
    Specific,
}

impl ReadDeviceIdCode {
    /// Map a raw read-device-id code.
    #[must_use]
    pub const fn new(value: u8) -> Option<Self> {
        let code = match value {
            0x01 => Self::Basic,
            0x02 => Self::Regular,
            0x03 => Self::Extended,
            0x04 => Self::Specific,
            _ => return None,
        };
        Some(code)
    }

    /// Get the raw code value.
    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::Basic => 0x01,
            Self::Regular => 0x02,
            Self::Extended => 0x03,
            Self::Specific => 0x04,
        }
    }
}

/// Well-known device-identification object ids.
pub mod device_id_object {
    /// Object `0x00`: vendor name (mandatory).
    pub const VENDOR_NAME: u8 = 0x00;
    /// Object `0x01`: product code (mandatory).
    pub const PRODUCT_CODE: u8 = 0x01;
    /// Object `0x02`: major/minor revision (mandatory).
    pub const MAJOR_MINOR_REVISION: u8 = 0x02;
    /// Object `0x03`: vendor URL.
    pub const VENDOR_URL: u8 = 0x03;
    /// Object `0x04`: product name.
    pub const PRODUCT_NAME: u8 = 0x04;
    /// Object `0x05`: model name.
    pub const MODEL_NAME: u8 = 0x05;
    /// Object `0x06`: user application name.
    pub const USER_APPLICATION_NAME: u8 = 0x06;
}

/// A single device-identification object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdObject {
    /// Object id, see [`device_id_object`].
    pub object_id: u8,
    /// Raw object value, typically an ASCII string.
    pub data: Vec<u8>,
}

/// The parsed payload of a device-identification response.
///
/// When `more_follows` is set the device holds further objects that must
/// be fetched with a follow-up request starting at `next_object_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdResponse {
    /// The category that was read.
    pub read_device_id_code: ReadDeviceIdCode,
    /// Conformity level reported by the device.
    pub conformity_level: u8,
    /// Whether another transaction is required to fetch all objects.
    pub more_follows: bool,
    /// First object id of the next transaction, `0` if none.
    pub next_object_id: u8,
    /// The objects returned by this transaction.
    pub objects: Vec<DeviceIdObject>,
}

/// A sub-request of a read-file-record request (FC 20).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRecordRef {
    /// File number, `1..=65535`.
    pub file_number: u16,
    /// Record number within the file, `0..=9999`.
    pub record_number: u16,
    /// Number of registers to read.
    pub record_length: u16,
}

/// A file record with data, written by FC 21 and echoed in its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// File number, `1..=65535`.
    pub file_number: u16,
    /// Record number within the file, `0..=9999`.
    pub record_number: u16,
    /// Record data, one register per entry.
    pub data: Vec<Word>,
}

/// The payload of a get-comm-event-log response (FC 12).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommEventLog {
    /// Device status word, `0xFFFF` while busy.
    pub status: u16,
    /// Event counter.
    pub event_count: u16,
    /// Bus message counter.
    pub message_count: u16,
    /// Most recent event bytes, newest first, at most 64.
    pub events: Vec<u8>,
}

/// The payload of a report-server-id response (FC 17).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerId {
    /// Device-specific identifier.
    pub server_id: u8,
    /// `true` for `0xFF` (running), `false` for `0x00` (stopped).
    pub run_indicator: bool,
    /// Additional device-specific data.
    pub additional_data: Vec<u8>,
}

/// A request represents a message from the client (master) to the server (slave).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    /// A request to read multiple coils.
    /// The first parameter is the address of the first coil to read.
    /// The second parameter is the number of coils to read.
    ReadCoils(Address, Quantity),

    /// A request to read multiple discrete inputs.
    /// The first parameter is the address of the first discrete input to read.
    /// The second parameter is the number of discrete inputs to read.
    ReadDiscreteInputs(Address, Quantity),

    /// A request to read multiple holding registers.
    /// The first parameter is the address of the first register to read.
    /// The second parameter is the number of registers to read.
    ReadHoldingRegisters(Address, Quantity),

    /// A request to read multiple input registers.
    /// The first parameter is the address of the first register to read.
    /// The second parameter is the number of registers to read.
    ReadInputRegisters(Address, Quantity),

    /// A request to write a single coil.
    WriteSingleCoil(Address, Coil),

    /// A request to write a single register.
    WriteSingleRegister(Address, Word),

    /// A request to read the 8-bit exception status.
    ReadExceptionStatus,

    /// A diagnostics request with sub-function and data field.
    Diagnostics(DiagnosticSubFunction, u16),

    /// A request to read the communication event counter.
    GetCommEventCounter,

    /// A request to read the communication event log.
    GetCommEventLog,

    /// A request to write multiple coils.
    /// The first parameter is the address of the first coil to write.
    /// The second parameter contains the values to write.
    WriteMultipleCoils(Address, Cow<'a, [Coil]>),

    /// A request to write multiple registers.
    /// The first parameter is the address of the first register to write.
    /// The second parameter contains the values to write.
    WriteMultipleRegisters(Address, Cow<'a, [Word]>),

    /// A request to read the server identification.
    ReportServerId,

    /// A request to read one or more file records.
    ReadFileRecord(Cow<'a, [FileRecordRef]>),

    /// A request to write one or more file records.
    WriteFileRecord(Cow<'a, [FileRecord]>),

    /// A request to update a holding register as
    /// `(current & and_mask) | (or_mask & !and_mask)`.
    /// The parameters are the address, the AND mask and the OR mask.
    MaskWriteRegister(Address, Word, Word),

    /// A combined write/read request. The write is performed before the
    /// read, so a read range overlapping the write range observes the
    /// newly written values.
    /// The first two parameters address the read range, the remaining
    /// two the write range and values.
    ReadWriteMultipleRegisters(Address, Quantity, Address, Cow<'a, [Word]>),

    /// A request to read the FIFO queue registered at an address.
    ReadFifoQueue(Address),

    /// A request to read a category of device-identification objects.
    /// The second parameter is the object id to start from.
    ReadDeviceIdentification(ReadDeviceIdCode, u8),

    /// A raw request with a custom function code and payload bytes.
    Custom(u8, Cow<'a, [u8]>),
}

impl<'a> Request<'a> {
    /// Converts the request into an owned instance with `'static` lifetime.
    #[must_use]
    pub fn into_owned(self) -> Request<'static> {
        use Request::*;
        match self {
            ReadCoils(addr, qty) => ReadCoils(addr, qty),
            ReadDiscreteInputs(addr, qty) => ReadDiscreteInputs(addr, qty),
            ReadHoldingRegisters(addr, qty) => ReadHoldingRegisters(addr, qty),
            ReadInputRegisters(addr, qty) => ReadInputRegisters(addr, qty),
            WriteSingleCoil(addr, coil) => WriteSingleCoil(addr, coil),
            WriteSingleRegister(addr, word) => WriteSingleRegister(addr, word),
            ReadExceptionStatus => ReadExceptionStatus,
            Diagnostics(subfn, data) => Diagnostics(subfn, data),
            GetCommEventCounter => GetCommEventCounter,
            GetCommEventLog => GetCommEventLog,
            WriteMultipleCoils(addr, coils) => {
                WriteMultipleCoils(addr, Cow::Owned(coils.into_owned()))
            }
            WriteMultipleRegisters(addr, words) => {
                WriteMultipleRegisters(addr, Cow::Owned(words.into_owned()))
            }
            ReportServerId => ReportServerId,
            ReadFileRecord(refs) => ReadFileRecord(Cow::Owned(refs.into_owned())),
            WriteFileRecord(records) => WriteFileRecord(Cow::Owned(records.into_owned())),
            MaskWriteRegister(addr, and_mask, or_mask) => {
                MaskWriteRegister(addr, and_mask, or_mask)
            }
            ReadWriteMultipleRegisters(read_addr, qty, write_addr, words) => {
                ReadWriteMultipleRegisters(read_addr, qty, write_addr, Cow::Owned(words.into_owned()))
            }
            ReadFifoQueue(addr) => ReadFifoQueue(addr),
            ReadDeviceIdentification(code, object_id) => {
                ReadDeviceIdentification(code, object_id)
            }
            Custom(code, bytes) => Custom(code, Cow::Owned(bytes.into_owned())),
        }
    }

    /// Get the [`FunctionCode`] of the [`Request`].
    #[must_use]
    pub const fn function_code(&self) -> FunctionCode {
        use Request::*;
        match self {
            ReadCoils(_, _) => FunctionCode::ReadCoils,
            ReadDiscreteInputs(_, _) => FunctionCode::ReadDiscreteInputs,
            ReadHoldingRegisters(_, _) => FunctionCode::ReadHoldingRegisters,
            ReadInputRegisters(_, _) => FunctionCode::ReadInputRegisters,
            WriteSingleCoil(_, _) => FunctionCode::WriteSingleCoil,
            WriteSingleRegister(_, _) => FunctionCode::WriteSingleRegister,
            ReadExceptionStatus => FunctionCode::ReadExceptionStatus,
            Diagnostics(_, _) => FunctionCode::Diagnostics,
            GetCommEventCounter => FunctionCode::GetCommEventCounter,
            GetCommEventLog => FunctionCode::GetCommEventLog,
            WriteMultipleCoils(_, _) => FunctionCode::WriteMultipleCoils,
            WriteMultipleRegisters(_, _) => FunctionCode::WriteMultipleRegisters,
            ReportServerId => FunctionCode::ReportServerId,
            ReadFileRecord(_) => FunctionCode::ReadFileRecord,
            WriteFileRecord(_) => FunctionCode::WriteFileRecord,
            MaskWriteRegister(_, _, _) => FunctionCode::MaskWriteRegister,
            ReadWriteMultipleRegisters(_, _, _, _) => FunctionCode::ReadWriteMultipleRegisters,
            ReadFifoQueue(_) => FunctionCode::ReadFifoQueue,
            ReadDeviceIdentification(_, _) => FunctionCode::EncapsulatedInterfaceTransport,
            Custom(code, _) => FunctionCode::Custom(*code),
        }
    }

    /// Whether this request may be sent to the broadcast address.
    ///
    /// Only state-changing requests that do not require a response
    /// are meaningful as broadcasts.
    #[must_use]
    pub const fn is_broadcast_permitted(&self) -> bool {
        use Request::*;
        matches!(
            self,
            WriteSingleCoil(_, _)
                | WriteSingleRegister(_, _)
                | WriteMultipleCoils(_, _)
                | WriteMultipleRegisters(_, _)
        )
    }

    /// Check all per-function-code constraints that can be verified
    /// without contacting the server.
    ///
    /// Violations map to [`Error::InvalidRequest`] and must be surfaced
    /// before any I/O takes place.
    pub fn validate(&self) -> Result<(), Error> {
        use Request::*;
        match self {
            ReadCoils(addr, qty) | ReadDiscreteInputs(addr, qty) => {
                check_quantity(*qty, limits::MAX_READ_BITS, "bit read count out of range")?;
                check_address_space(*addr, *qty)
            }
            ReadHoldingRegisters(addr, qty) | ReadInputRegisters(addr, qty) => {
                check_quantity(
                    *qty,
                    limits::MAX_READ_REGISTERS,
                    "register read count out of range",
                )?;
                check_address_space(*addr, *qty)
            }
            WriteMultipleCoils(addr, coils) => {
                let qty = quantity_of(coils.len())?;
                check_quantity(qty, limits::MAX_WRITE_BITS, "coil write count out of range")?;
                check_address_space(*addr, qty)
            }
            WriteMultipleRegisters(addr, words) => {
                let qty = quantity_of(words.len())?;
                check_quantity(
                    qty,
                    limits::MAX_WRITE_REGISTERS,
                    "register write count out of range",
                )?;
                check_address_space(*addr, qty)
            }
            ReadWriteMultipleRegisters(read_addr, read_qty, write_addr, words) => {
                check_quantity(
                    *read_qty,
                    limits::MAX_RW_READ_REGISTERS,
                    "register read count out of range",
                )?;
                check_address_space(*read_addr, *read_qty)?;
                let write_qty = quantity_of(words.len())?;
                check_quantity(
                    write_qty,
                    limits::MAX_RW_WRITE_REGISTERS,
                    "register write count out of range",
                )?;
                check_address_space(*write_addr, write_qty)
            }
            ReadFileRecord(refs) => {
                if refs.is_empty() {
                    return Err(Error::InvalidRequest("no file-record sub-requests"));
                }
                if refs.len() * 7 > limits::MAX_READ_FILE_RECORD_BYTES {
                    return Err(Error::InvalidRequest("too many file-record sub-requests"));
                }
                for record in refs.as_ref() {
                    check_file_record(record.file_number, record.record_number)?;
                    if record.record_length == 0 {
                        return Err(Error::InvalidRequest("empty file-record range"));
                    }
                }
                Ok(())
            }
            WriteFileRecord(records) => {
                if records.is_empty() {
                    return Err(Error::InvalidRequest("no file-record sub-requests"));
                }
                let payload: usize = records.iter().map(|r| 7 + 2 * r.data.len()).sum();
                if payload > limits::MAX_WRITE_FILE_RECORD_BYTES {
                    return Err(Error::InvalidRequest("file-record payload too large"));
                }
                for record in records.as_ref() {
                    check_file_record(record.file_number, record.record_number)?;
                    if record.data.is_empty() {
                        return Err(Error::InvalidRequest("empty file-record data"));
                    }
                }
                Ok(())
            }
            Custom(_, bytes) => {
                if bytes.len() + 1 > MAX_PDU_SIZE {
                    return Err(Error::InvalidRequest("custom payload exceeds PDU size"));
                }
                Ok(())
            }
            WriteSingleCoil(..)
            | WriteSingleRegister(..)
            | ReadExceptionStatus
            | Diagnostics(..)
            | GetCommEventCounter
            | GetCommEventLog
            | ReportServerId
            | MaskWriteRegister(..)
            | ReadFifoQueue(..)
            | ReadDeviceIdentification(..) => Ok(()),
        }
    }
}

fn check_quantity(qty: Quantity, max: Quantity, msg: &'static str) -> Result<(), Error> {
    if qty == 0 || qty > max {
        return Err(Error::InvalidRequest(msg));
    }
    Ok(())
}

fn check_address_space(addr: Address, qty: Quantity) -> Result<(), Error> {
    if usize::from(addr) + usize::from(qty) > 0x1_0000 {
        return Err(Error::InvalidRequest("address range exceeds 65536"));
    }
    Ok(())
}

fn check_file_record(file_number: u16, record_number: u16) -> Result<(), Error> {
    if file_number == 0 {
        return Err(Error::InvalidRequest("file number must not be zero"));
    }
    if record_number > limits::MAX_RECORD_NUMBER {
        return Err(Error::InvalidRequest("record number exceeds 9999"));
    }
    Ok(())
}

fn quantity_of(len: usize) -> Result<Quantity, Error> {
    Quantity::try_from(len).map_err(|_| Error::InvalidRequest("item count exceeds 65535"))
}

/// A Modbus request with its corresponding slave address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveRequest<'a> {
    /// Slave id of the addressed device, `0` for broadcasts.
    pub slave: SlaveId,
    /// The request to be processed.
    pub request: Request<'a>,
}

impl<'a> SlaveRequest<'a> {
    /// Converts the request into an owned instance with `'static` lifetime.
    #[must_use]
    pub fn into_owned(self) -> SlaveRequest<'static> {
        let Self { slave, request } = self;
        SlaveRequest {
            slave,
            request: request.into_owned(),
        }
    }
}

/// The data of a successful request.
///
/// `ReadCoils`/`ReadDiscreteInputs`: the length of the result `Vec` is always
/// a multiple of 8. Only the values of the first bits that have actually been
/// requested are defined, the value of the trailing padding bits is
/// unspecified and those bits should be ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Response to a read-coils request.
    ReadCoils(Vec<Coil>),
    /// Response to a read-discrete-inputs request.
    ReadDiscreteInputs(Vec<Coil>),
    /// Response to a read-holding-registers request.
    ReadHoldingRegisters(Vec<Word>),
    /// Response to a read-input-registers request.
    ReadInputRegisters(Vec<Word>),
    /// Response to a write-single-coil request, echoing address and value.
    WriteSingleCoil(Address, Coil),
    /// Response to a write-single-register request, echoing address and value.
    WriteSingleRegister(Address, Word),
    /// Response to a read-exception-status request.
    ReadExceptionStatus(u8),
    /// Response to a diagnostics request, echoing the sub-function and
    /// carrying the response data field.
    Diagnostics(DiagnosticSubFunction, u16),
    /// Response to a get-comm-event-counter request: status word and
    /// event count.
    GetCommEventCounter(u16, u16),
    /// Response to a get-comm-event-log request.
    GetCommEventLog(CommEventLog),
    /// Response to a write-multiple-coils request, echoing address and
    /// quantity.
    WriteMultipleCoils(Address, Quantity),
    /// Response to a write-multiple-registers request, echoing address
    /// and quantity.
    WriteMultipleRegisters(Address, Quantity),
    /// Response to a report-server-id request.
    ReportServerId(ServerId),
    /// Response to a read-file-record request, one data sequence per
    /// sub-request.
    ReadFileRecord(Vec<Vec<Word>>),
    /// Response to a write-file-record request, echoing the written
    /// records.
    WriteFileRecord(Vec<FileRecord>),
    /// Response to a mask-write-register request, echoing address and
    /// masks.
    MaskWriteRegister(Address, Word, Word),
    /// Response to a read/write-multiple-registers request carrying the
    /// values of the read range.
    ReadWriteMultipleRegisters(Vec<Word>),
    /// Response to a read-FIFO-queue request, oldest value first.
    ReadFifoQueue(Vec<Word>),
    /// Response to a read-device-identification request.
    ReadDeviceIdentification(DeviceIdResponse),
    /// Response of a raw request with a custom function code.
    Custom(u8, Bytes),
}

impl Response {
    /// Get the [`FunctionCode`] of the [`Response`].
    #[must_use]
    pub const fn function_code(&self) -> FunctionCode {
        use Response::*;
        match self {
            ReadCoils(_) => FunctionCode::ReadCoils,
            ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs,
            ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
            WriteSingleCoil(_, _) => FunctionCode::WriteSingleCoil,
            WriteSingleRegister(_, _) => FunctionCode::WriteSingleRegister,
            ReadExceptionStatus(_) => FunctionCode::ReadExceptionStatus,
            Diagnostics(_, _) => FunctionCode::Diagnostics,
            GetCommEventCounter(_, _) => FunctionCode::GetCommEventCounter,
            GetCommEventLog(_) => FunctionCode::GetCommEventLog,
            WriteMultipleCoils(_, _) => FunctionCode::WriteMultipleCoils,
            WriteMultipleRegisters(_, _) => FunctionCode::WriteMultipleRegisters,
            ReportServerId(_) => FunctionCode::ReportServerId,
            ReadFileRecord(_) => FunctionCode::ReadFileRecord,
            WriteFileRecord(_) => FunctionCode::WriteFileRecord,
            MaskWriteRegister(_, _, _) => FunctionCode::MaskWriteRegister,
            ReadWriteMultipleRegisters(_) => FunctionCode::ReadWriteMultipleRegisters,
            ReadFifoQueue(_) => FunctionCode::ReadFifoQueue,
            ReadDeviceIdentification(_) => FunctionCode::EncapsulatedInterfaceTransport,
            Custom(code, _) => FunctionCode::Custom(*code),
        }
    }
}

/// A server (slave) exception code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    /// `0x01`
    IllegalFunction = 0x01,
    /// `0x02`
    IllegalDataAddress = 0x02,
    /// `0x03`
    IllegalDataValue = 0x03,
    /// `0x04`
    ServerDeviceFailure = 0x04,
    /// `0x05`
    Acknowledge = 0x05,
    /// `0x06`
    ServerDeviceBusy = 0x06,
    /// `0x08`
    MemoryParityError = 0x08,
    /// `0x0A`
    GatewayPathUnavailable = 0x0A,
    /// `0x0B`
    GatewayTargetDevice = 0x0B,
}

impl ExceptionCode {
    /// Map a raw exception code value.
    #[must_use]
    pub const fn new(value: u8) -> Option<Self> {
        let code = match value {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalDataAddress,
            0x03 => Self::IllegalDataValue,
            0x04 => Self::ServerDeviceFailure,
            0x05 => Self::Acknowledge,
            0x06 => Self::ServerDeviceBusy,
            0x08 => Self::MemoryParityError,
            0x0A => Self::GatewayPathUnavailable,
            0x0B => Self::GatewayTargetDevice,
            _ => return None,
        };
        Some(code)
    }

    pub(crate) fn description(self) -> &'static str {
        match self {
            Self::IllegalFunction => "Illegal function",
            Self::IllegalDataAddress => "Illegal data address",
            Self::IllegalDataValue => "Illegal data value",
            Self::ServerDeviceFailure => "Server device failure",
            Self::Acknowledge => "Acknowledge",
            Self::ServerDeviceBusy => "Server device busy",
            Self::MemoryParityError => "Memory parity error",
            Self::GatewayPathUnavailable => "Gateway path unavailable",
            Self::GatewayTargetDevice => "Gateway target device failed to respond",
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl error::Error for ExceptionCode {}

/// A server (slave) exception response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    /// The function code of the rejected request.
    pub function: FunctionCode,
    /// The reported exception code.
    pub exception: ExceptionCode,
}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus function {}: {}", self.function, self.exception)
    }
}

impl error::Error for ExceptionResponse {}

/// Represents a message from the client (master) to the server (slave).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestPdu<'a>(pub(crate) Request<'a>);

impl<'a> From<Request<'a>> for RequestPdu<'a> {
    fn from(from: Request<'a>) -> Self {
        RequestPdu(from)
    }
}

impl<'a> From<RequestPdu<'a>> for Request<'a> {
    fn from(from: RequestPdu<'a>) -> Self {
        from.0
    }
}

/// Represents a message from the server (slave) to the client (master).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponsePdu(pub(crate) Result<Response, ExceptionResponse>);

impl From<Response> for ResponsePdu {
    fn from(from: Response) -> Self {
        ResponsePdu(Ok(from))
    }
}

impl From<ExceptionResponse> for ResponsePdu {
    fn from(from: ExceptionResponse) -> Self {
        ResponsePdu(Err(from))
    }
}

impl From<ResponsePdu> for Result<Response, ExceptionResponse> {
    fn from(from: ResponsePdu) -> Self {
        from.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_code_values() {
        for value in 0x01..=0xFF {
            assert_eq!(FunctionCode::new(value).value(), value);
        }
    }

    #[test]
    fn function_code_from_request() {
        use Request::*;
        assert_eq!(ReadCoils(0, 0).function_code().value(), 0x01);
        assert_eq!(ReadDiscreteInputs(0, 0).function_code().value(), 0x02);
        assert_eq!(ReadHoldingRegisters(0, 0).function_code().value(), 0x03);
        assert_eq!(ReadInputRegisters(0, 0).function_code().value(), 0x04);
        assert_eq!(WriteSingleCoil(0, true).function_code().value(), 0x05);
        assert_eq!(WriteSingleRegister(0, 0).function_code().value(), 0x06);
        assert_eq!(ReadExceptionStatus.function_code().value(), 0x07);
        assert_eq!(
            Diagnostics(DiagnosticSubFunction::ReturnQueryData, 0)
                .function_code()
                .value(),
            0x08
        );
        assert_eq!(GetCommEventCounter.function_code().value(), 0x0B);
        assert_eq!(GetCommEventLog.function_code().value(), 0x0C);
        assert_eq!(
            WriteMultipleCoils(0, Cow::Borrowed(&[])).function_code().value(),
            0x0F
        );
        assert_eq!(
            WriteMultipleRegisters(0, Cow::Borrowed(&[]))
                .function_code()
                .value(),
            0x10
        );
        assert_eq!(ReportServerId.function_code().value(), 0x11);
        assert_eq!(
            ReadFileRecord(Cow::Borrowed(&[])).function_code().value(),
            0x14
        );
        assert_eq!(
            WriteFileRecord(Cow::Borrowed(&[])).function_code().value(),
            0x15
        );
        assert_eq!(MaskWriteRegister(0, 0, 0).function_code().value(), 0x16);
        assert_eq!(
            ReadWriteMultipleRegisters(0, 0, 0, Cow::Borrowed(&[]))
                .function_code()
                .value(),
            0x17
        );
        assert_eq!(ReadFifoQueue(0).function_code().value(), 0x18);
        assert_eq!(
            ReadDeviceIdentification(ReadDeviceIdCode::Basic, 0)
                .function_code()
                .value(),
            0x2B
        );
        assert_eq!(Custom(0x44, Cow::Borrowed(&[])).function_code().value(), 0x44);
    }

    #[test]
    fn validate_read_quantities() {
        assert!(Request::ReadCoils(0, 1).validate().is_ok());
        assert!(Request::ReadCoils(0, 2000).validate().is_ok());
        assert!(Request::ReadCoils(0, 0).validate().is_err());
        assert!(Request::ReadCoils(0, 2001).validate().is_err());
        assert!(Request::ReadHoldingRegisters(0, 125).validate().is_ok());
        assert!(Request::ReadHoldingRegisters(0, 126).validate().is_err());
    }

    #[test]
    fn validate_address_space() {
        assert!(Request::ReadHoldingRegisters(0xFFFF, 1).validate().is_ok());
        assert!(Request::ReadHoldingRegisters(0xFFFF, 2).validate().is_err());
        assert!(Request::ReadCoils(65000, 536).validate().is_ok());
        assert!(Request::ReadCoils(65000, 537).validate().is_err());
    }

    #[test]
    fn validate_write_quantities() {
        let coils = vec![false; 1968];
        assert!(Request::WriteMultipleCoils(0, Cow::Owned(coils))
            .validate()
            .is_ok());
        let coils = vec![false; 1969];
        assert!(Request::WriteMultipleCoils(0, Cow::Owned(coils))
            .validate()
            .is_err());
        let words = vec![0; 123];
        assert!(Request::WriteMultipleRegisters(0, Cow::Owned(words))
            .validate()
            .is_ok());
        let words = vec![0; 124];
        assert!(Request::WriteMultipleRegisters(0, Cow::Owned(words))
            .validate()
            .is_err());
    }

    #[test]
    fn validate_read_write_quantities() {
        let words = vec![0; 121];
        assert!(
            Request::ReadWriteMultipleRegisters(0, 125, 200, Cow::Owned(words))
                .validate()
                .is_ok()
        );
        let words = vec![0; 122];
        assert!(
            Request::ReadWriteMultipleRegisters(0, 125, 200, Cow::Owned(words))
                .validate()
                .is_err()
        );
        let words = vec![0; 1];
        assert!(
            Request::ReadWriteMultipleRegisters(0, 126, 200, Cow::Owned(words))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn validate_file_records() {
        let record = FileRecordRef {
            file_number: 4,
            record_number: 1,
            record_length: 2,
        };
        assert!(Request::ReadFileRecord(Cow::Owned(vec![record; 35]))
            .validate()
            .is_ok());
        assert!(Request::ReadFileRecord(Cow::Owned(vec![record; 36]))
            .validate()
            .is_err());
        let invalid = FileRecordRef {
            file_number: 0,
            ..record
        };
        assert!(Request::ReadFileRecord(Cow::Owned(vec![invalid]))
            .validate()
            .is_err());
        let invalid = FileRecordRef {
            record_number: 10_000,
            ..record
        };
        assert!(Request::ReadFileRecord(Cow::Owned(vec![invalid]))
            .validate()
            .is_err());
    }

    #[test]
    fn validate_write_file_records() {
        let record = FileRecord {
            file_number: 4,
            record_number: 7,
            data: vec![0x0000; 122],
        };
        // 7 + 2 * 122 = 251 bytes
        assert!(Request::WriteFileRecord(Cow::Owned(vec![record.clone()]))
            .validate()
            .is_ok());
        let record = FileRecord {
            data: vec![0x0000; 123],
            ..record
        };
        assert!(Request::WriteFileRecord(Cow::Owned(vec![record]))
            .validate()
            .is_err());
    }

    #[test]
    fn broadcast_permission() {
        assert!(Request::WriteSingleCoil(0, true).is_broadcast_permitted());
        assert!(Request::WriteMultipleRegisters(0, Cow::Borrowed(&[1]))
            .is_broadcast_permitted());
        assert!(!Request::ReadCoils(0, 1).is_broadcast_permitted());
        assert!(!Request::MaskWriteRegister(0, 0, 0).is_broadcast_permitted());
    }

    #[test]
    fn exception_code_mapping() {
        for value in [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x08, 0x0A, 0x0B] {
            let code = ExceptionCode::new(value).unwrap();
            assert_eq!(code as u8, value);
        }
        assert_eq!(ExceptionCode::new(0x07), None);
        assert_eq!(ExceptionCode::new(0x0C), None);
    }

    #[test]
    fn exception_response_display() {
        let rsp = ExceptionResponse {
            function: FunctionCode::ReadDiscreteInputs,
            exception: ExceptionCode::IllegalDataValue,
        };
        assert_eq!(format!("{rsp}"), "Modbus function 2: Illegal data value");
    }

    #[test]
    fn diagnostic_sub_function_roundtrip() {
        for value in [
            0x0000, 0x0001, 0x0002, 0x0004, 0x000A, 0x000B, 0x000C, 0x000D, 0x000E, 0x000F,
            0x0010, 0x0011, 0x0012, 0x0014,
        ] {
            assert_eq!(DiagnosticSubFunction::new(value).unwrap().value(), value);
        }
        assert_eq!(DiagnosticSubFunction::new(0x0003), None);
        assert_eq!(DiagnosticSubFunction::new(0x0013), None);
    }
}
