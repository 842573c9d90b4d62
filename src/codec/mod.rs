// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport-agnostic PDU codec
//!
//! Translates between the typed [`Request`]/[`Response`] model and raw
//! PDU bytes, enforcing every protocol-level constraint. The framing
//! codecs in the submodules wrap these PDUs into their respective
//! application data units.

#[cfg(feature = "ascii")]
pub(crate) mod ascii;

#[cfg(feature = "rtu")]
pub(crate) mod rtu;

#[cfg(feature = "tcp")]
pub(crate) mod tcp;

#[cfg(feature = "server")]
use std::borrow::Cow;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    error::{Error, FrameError},
    frame::{coils::*, *},
};

/// Encoded size of a request PDU including the function code byte.
fn request_pdu_len(req: &Request<'_>) -> usize {
    use Request::*;
    match req {
        ReadCoils(_, _)
        | ReadDiscreteInputs(_, _)
        | ReadHoldingRegisters(_, _)
        | ReadInputRegisters(_, _)
        | WriteSingleCoil(_, _)
        | WriteSingleRegister(_, _)
        | Diagnostics(_, _) => 5,
        ReadExceptionStatus | GetCommEventCounter | GetCommEventLog | ReportServerId => 1,
        WriteMultipleCoils(_, coils) => 6 + packed_len(coils.len()),
        WriteMultipleRegisters(_, words) => 6 + words.len() * 2,
        ReadFileRecord(refs) => 2 + refs.len() * 7,
        WriteFileRecord(records) => {
            2 + records.iter().map(|r| 7 + r.data.len() * 2).sum::<usize>()
        }
        MaskWriteRegister(_, _, _) => 7,
        ReadWriteMultipleRegisters(_, _, _, words) => 10 + words.len() * 2,
        ReadFifoQueue(_) => 3,
        ReadDeviceIdentification(_, _) => 4,
        Custom(_, bytes) => 1 + bytes.len(),
    }
}

fn u8_len(len: usize) -> Result<u8, Error> {
    u8::try_from(len).map_err(|_| Error::InvalidRequest("byte count exceeds 255"))
}

fn u16_len(len: usize) -> Result<u16, Error> {
    u16::try_from(len).map_err(|_| Error::InvalidRequest("length exceeds 65535"))
}

impl<'a> TryFrom<RequestPdu<'a>> for Bytes {
    type Error = Error;

    fn try_from(pdu: RequestPdu<'a>) -> Result<Bytes, Error> {
        let RequestPdu(req) = pdu;
        req.validate()?;
        let pdu_len = request_pdu_len(&req);
        if pdu_len > MAX_PDU_SIZE {
            return Err(Error::InvalidRequest("request exceeds PDU size"));
        }
        let mut data = BytesMut::with_capacity(pdu_len);
        data.put_u8(req.function_code().value());
        use Request::*;
        match req {
            ReadCoils(address, quantity)
            | ReadDiscreteInputs(address, quantity)
            | ReadHoldingRegisters(address, quantity)
            | ReadInputRegisters(address, quantity) => {
                data.put_u16(address);
                data.put_u16(quantity);
            }
            WriteSingleCoil(address, coil) => {
                data.put_u16(address);
                data.put_u16(coil_to_u16(coil));
            }
            WriteSingleRegister(address, word) => {
                data.put_u16(address);
                data.put_u16(word);
            }
            ReadExceptionStatus | GetCommEventCounter | GetCommEventLog | ReportServerId => (),
            Diagnostics(sub_function, value) => {
                data.put_u16(sub_function.value());
                data.put_u16(value);
            }
            WriteMultipleCoils(address, coils) => {
                data.put_u16(address);
                data.put_u16(u16_len(coils.len())?);
                let packed = pack_coils(&coils);
                data.put_u8(u8_len(packed.len())?);
                data.put_slice(&packed);
            }
            WriteMultipleRegisters(address, words) => {
                data.put_u16(address);
                data.put_u16(u16_len(words.len())?);
                data.put_u8(u8_len(words.len() * 2)?);
                for word in words.as_ref() {
                    data.put_u16(*word);
                }
            }
            ReadFileRecord(refs) => {
                data.put_u8(u8_len(refs.len() * 7)?);
                for r in refs.as_ref() {
                    data.put_u8(FILE_REFERENCE_TYPE);
                    data.put_u16(r.file_number);
                    data.put_u16(r.record_number);
                    data.put_u16(r.record_length);
                }
            }
            WriteFileRecord(records) => {
                let payload: usize = records.iter().map(|r| 7 + r.data.len() * 2).sum();
                data.put_u8(u8_len(payload)?);
                for r in records.as_ref() {
                    data.put_u8(FILE_REFERENCE_TYPE);
                    data.put_u16(r.file_number);
                    data.put_u16(r.record_number);
                    data.put_u16(u16_len(r.data.len())?);
                    for word in &r.data {
                        data.put_u16(*word);
                    }
                }
            }
            MaskWriteRegister(address, and_mask, or_mask) => {
                data.put_u16(address);
                data.put_u16(and_mask);
                data.put_u16(or_mask);
            }
            ReadWriteMultipleRegisters(read_address, quantity, write_address, words) => {
                data.put_u16(read_address);
                data.put_u16(quantity);
                data.put_u16(write_address);
                data.put_u16(u16_len(words.len())?);
                data.put_u8(u8_len(words.len() * 2)?);
                for word in words.as_ref() {
                    data.put_u16(*word);
                }
            }
            ReadFifoQueue(address) => {
                data.put_u16(address);
            }
            ReadDeviceIdentification(code, object_id) => {
                data.put_u8(MEI_DEVICE_IDENTIFICATION);
                data.put_u8(code.value());
                data.put_u8(object_id);
            }
            Custom(_, bytes) => {
                data.put_slice(&bytes);
            }
        }
        Ok(data.freeze())
    }
}

impl TryFrom<ResponsePdu> for Bytes {
    type Error = Error;

    fn try_from(pdu: ResponsePdu) -> Result<Bytes, Error> {
        let ResponsePdu(rsp) = pdu;
        let rsp = match rsp {
            Err(exc_rsp) => {
                let mut data = BytesMut::with_capacity(2);
                data.put_u8(exc_rsp.function.value() | 0x80);
                data.put_u8(exc_rsp.exception as u8);
                return Ok(data.freeze());
            }
            Ok(rsp) => rsp,
        };
        let mut data = BytesMut::new();
        data.put_u8(rsp.function_code().value());
        use Response::*;
        match rsp {
            ReadCoils(coils) | ReadDiscreteInputs(coils) => {
                let packed = pack_coils(&coils);
                data.put_u8(u8_len(packed.len())?);
                data.put_slice(&packed);
            }
            ReadHoldingRegisters(words)
            | ReadInputRegisters(words)
            | ReadWriteMultipleRegisters(words) => {
                data.put_u8(u8_len(words.len() * 2)?);
                for word in words {
                    data.put_u16(word);
                }
            }
            WriteSingleCoil(address, coil) => {
                data.put_u16(address);
                data.put_u16(coil_to_u16(coil));
            }
            WriteSingleRegister(address, word) => {
                data.put_u16(address);
                data.put_u16(word);
            }
            ReadExceptionStatus(status) => {
                data.put_u8(status);
            }
            Diagnostics(sub_function, value) => {
                data.put_u16(sub_function.value());
                data.put_u16(value);
            }
            GetCommEventCounter(status, event_count) => {
                data.put_u16(status);
                data.put_u16(event_count);
            }
            GetCommEventLog(event_log) => {
                data.put_u8(u8_len(6 + event_log.events.len())?);
                data.put_u16(event_log.status);
                data.put_u16(event_log.event_count);
                data.put_u16(event_log.message_count);
                data.put_slice(&event_log.events);
            }
            WriteMultipleCoils(address, quantity) | WriteMultipleRegisters(address, quantity) => {
                data.put_u16(address);
                data.put_u16(quantity);
            }
            ReportServerId(server_id) => {
                data.put_u8(u8_len(2 + server_id.additional_data.len())?);
                data.put_u8(server_id.server_id);
                data.put_u8(if server_id.run_indicator { 0xFF } else { 0x00 });
                data.put_slice(&server_id.additional_data);
            }
            ReadFileRecord(record_data) => {
                let payload: usize = record_data.iter().map(|d| 2 + d.len() * 2).sum();
                data.put_u8(u8_len(payload)?);
                for d in record_data {
                    data.put_u8(u8_len(1 + d.len() * 2)?);
                    data.put_u8(FILE_REFERENCE_TYPE);
                    for word in d {
                        data.put_u16(word);
                    }
                }
            }
            WriteFileRecord(records) => {
                let payload: usize = records.iter().map(|r| 7 + r.data.len() * 2).sum();
                data.put_u8(u8_len(payload)?);
                for r in records {
                    data.put_u8(FILE_REFERENCE_TYPE);
                    data.put_u16(r.file_number);
                    data.put_u16(r.record_number);
                    data.put_u16(u16_len(r.data.len())?);
                    for word in r.data {
                        data.put_u16(word);
                    }
                }
            }
            MaskWriteRegister(address, and_mask, or_mask) => {
                data.put_u16(address);
                data.put_u16(and_mask);
                data.put_u16(or_mask);
            }
            ReadFifoQueue(words) => {
                data.put_u16(u16_len(2 + words.len() * 2)?);
                data.put_u16(u16_len(words.len())?);
                for word in words {
                    data.put_u16(word);
                }
            }
            ReadDeviceIdentification(device_id) => {
                data.put_u8(MEI_DEVICE_IDENTIFICATION);
                data.put_u8(device_id.read_device_id_code.value());
                data.put_u8(device_id.conformity_level);
                data.put_u8(if device_id.more_follows { 0xFF } else { 0x00 });
                data.put_u8(device_id.next_object_id);
                data.put_u8(u8_len(device_id.objects.len())?);
                for object in device_id.objects {
                    data.put_u8(object.object_id);
                    data.put_u8(u8_len(object.data.len())?);
                    data.put_slice(&object.data);
                }
            }
            Custom(_, bytes) => {
                data.put_slice(&bytes);
            }
        }
        if data.len() > MAX_PDU_SIZE {
            return Err(Error::InvalidRequest("response exceeds PDU size"));
        }
        Ok(data.freeze())
    }
}

/// Outcome of decoding an inbound request PDU on the server.
///
/// The outer `Err` means the PDU is structurally hopeless and the frame
/// must be dropped. The inner `Err` carries the exception response that
/// answers a well-framed but invalid request.
#[cfg(feature = "server")]
pub(crate) type DecodedRequest = Result<RequestPdu<'static>, ExceptionResponse>;

#[cfg(feature = "server")]
fn reject(function: FunctionCode, exception: ExceptionCode) -> DecodedRequest {
    Err(ExceptionResponse {
        function,
        exception,
    })
}

/// Decode a request PDU received by the server.
#[cfg(feature = "server")]
pub(crate) fn decode_request(mut data: Bytes) -> Result<DecodedRequest, Error> {
    use Request::*;

    if data.is_empty() {
        return Err(FrameError::Malformed("empty request PDU").into());
    }
    let fn_code = data.get_u8();
    let function = FunctionCode::new(fn_code);

    // Payload lengths are validated exactly; a mismatch answers with an
    // IllegalDataValue exception instead of tearing down the connection.
    let req = match function {
        FunctionCode::ReadCoils
        | FunctionCode::ReadDiscreteInputs
        | FunctionCode::ReadHoldingRegisters
        | FunctionCode::ReadInputRegisters => {
            if data.len() != 4 {
                return Ok(reject(function, ExceptionCode::IllegalDataValue));
            }
            let address = data.get_u16();
            let quantity = data.get_u16();
            match function {
                FunctionCode::ReadCoils => ReadCoils(address, quantity),
                FunctionCode::ReadDiscreteInputs => ReadDiscreteInputs(address, quantity),
                FunctionCode::ReadHoldingRegisters => ReadHoldingRegisters(address, quantity),
                _ => ReadInputRegisters(address, quantity),
            }
        }
        FunctionCode::WriteSingleCoil => {
            if data.len() != 4 {
                return Ok(reject(function, ExceptionCode::IllegalDataValue));
            }
            let address = data.get_u16();
            let Some(coil) = u16_to_coil(data.get_u16()) else {
                return Ok(reject(function, ExceptionCode::IllegalDataValue));
            };
            WriteSingleCoil(address, coil)
        }
        FunctionCode::WriteSingleRegister => {
            if data.len() != 4 {
                return Ok(reject(function, ExceptionCode::IllegalDataValue));
            }
            WriteSingleRegister(data.get_u16(), data.get_u16())
        }
        FunctionCode::ReadExceptionStatus => {
            if !data.is_empty() {
                return Ok(reject(function, ExceptionCode::IllegalDataValue));
            }
            ReadExceptionStatus
        }
        FunctionCode::Diagnostics => {
            if data.len() != 4 {
                return Ok(reject(function, ExceptionCode::IllegalDataValue));
            }
            let Some(sub_function) = DiagnosticSubFunction::new(data.get_u16()) else {
                return Ok(reject(function, ExceptionCode::IllegalFunction));
            };
            Diagnostics(sub_function, data.get_u16())
        }
        FunctionCode::GetCommEventCounter => {
            if !data.is_empty() {
                return Ok(reject(function, ExceptionCode::IllegalDataValue));
            }
            GetCommEventCounter
        }
        FunctionCode::GetCommEventLog => {
            if !data.is_empty() {
                return Ok(reject(function, ExceptionCode::IllegalDataValue));
            }
            GetCommEventLog
        }
        FunctionCode::WriteMultipleCoils => {
            if data.len() < 5 {
                return Ok(reject(function, ExceptionCode::IllegalDataValue));
            }
            let address = data.get_u16();
            let quantity = data.get_u16();
            let byte_count = data.get_u8();
            if usize::from(byte_count) != data.len()
                || usize::from(byte_count) != packed_len(usize::from(quantity))
            {
                return Ok(reject(function, ExceptionCode::IllegalDataValue));
            }
            let coils = unpack_coils(&data, quantity);
            WriteMultipleCoils(address, Cow::Owned(coils))
        }
        FunctionCode::WriteMultipleRegisters => {
            if data.len() < 5 {
                return Ok(reject(function, ExceptionCode::IllegalDataValue));
            }
            let address = data.get_u16();
            let quantity = data.get_u16();
            let byte_count = data.get_u8();
            if usize::from(byte_count) != data.len()
                || usize::from(byte_count) != usize::from(quantity) * 2
            {
                return Ok(reject(function, ExceptionCode::IllegalDataValue));
            }
            let words = (0..quantity).map(|_| data.get_u16()).collect();
            WriteMultipleRegisters(address, Cow::Owned(words))
        }
        FunctionCode::ReportServerId => {
            if !data.is_empty() {
                return Ok(reject(function, ExceptionCode::IllegalDataValue));
            }
            ReportServerId
        }
        FunctionCode::ReadFileRecord => {
            if data.is_empty() {
                return Ok(reject(function, ExceptionCode::IllegalDataValue));
            }
            let byte_count = data.get_u8();
            if usize::from(byte_count) != data.len() || byte_count % 7 != 0 {
                return Ok(reject(function, ExceptionCode::IllegalDataValue));
            }
            let mut refs = Vec::with_capacity(usize::from(byte_count) / 7);
            while data.has_remaining() {
                if data.get_u8() != FILE_REFERENCE_TYPE {
                    return Ok(reject(function, ExceptionCode::IllegalDataValue));
                }
                refs.push(FileRecordRef {
                    file_number: data.get_u16(),
                    record_number: data.get_u16(),
                    record_length: data.get_u16(),
                });
            }
            ReadFileRecord(Cow::Owned(refs))
        }
        FunctionCode::WriteFileRecord => {
            if data.is_empty() {
                return Ok(reject(function, ExceptionCode::IllegalDataValue));
            }
            let byte_count = data.get_u8();
            if usize::from(byte_count) != data.len() {
                return Ok(reject(function, ExceptionCode::IllegalDataValue));
            }
            let mut records = Vec::new();
            while data.has_remaining() {
                if data.remaining() < 7 || data.get_u8() != FILE_REFERENCE_TYPE {
                    return Ok(reject(function, ExceptionCode::IllegalDataValue));
                }
                let file_number = data.get_u16();
                let record_number = data.get_u16();
                let record_length = data.get_u16();
                if data.remaining() < usize::from(record_length) * 2 {
                    return Ok(reject(function, ExceptionCode::IllegalDataValue));
                }
                let words = (0..record_length).map(|_| data.get_u16()).collect();
                records.push(FileRecord {
                    file_number,
                    record_number,
                    data: words,
                });
            }
            WriteFileRecord(Cow::Owned(records))
        }
        FunctionCode::MaskWriteRegister => {
            if data.len() != 6 {
                return Ok(reject(function, ExceptionCode::IllegalDataValue));
            }
            MaskWriteRegister(data.get_u16(), data.get_u16(), data.get_u16())
        }
        FunctionCode::ReadWriteMultipleRegisters => {
            if data.len() < 9 {
                return Ok(reject(function, ExceptionCode::IllegalDataValue));
            }
            let read_address = data.get_u16();
            let read_quantity = data.get_u16();
            let write_address = data.get_u16();
            let write_quantity = data.get_u16();
            let byte_count = data.get_u8();
            if usize::from(byte_count) != data.len()
                || usize::from(byte_count) != usize::from(write_quantity) * 2
            {
                return Ok(reject(function, ExceptionCode::IllegalDataValue));
            }
            let words = (0..write_quantity).map(|_| data.get_u16()).collect();
            ReadWriteMultipleRegisters(
                read_address,
                read_quantity,
                write_address,
                Cow::Owned(words),
            )
        }
        FunctionCode::ReadFifoQueue => {
            if data.len() != 2 {
                return Ok(reject(function, ExceptionCode::IllegalDataValue));
            }
            ReadFifoQueue(data.get_u16())
        }
        FunctionCode::EncapsulatedInterfaceTransport => {
            if data.len() != 3 {
                return Ok(reject(function, ExceptionCode::IllegalDataValue));
            }
            if data.get_u8() != MEI_DEVICE_IDENTIFICATION {
                return Ok(reject(function, ExceptionCode::IllegalFunction));
            }
            let Some(code) = ReadDeviceIdCode::new(data.get_u8()) else {
                return Ok(reject(function, ExceptionCode::IllegalDataValue));
            };
            ReadDeviceIdentification(code, data.get_u8())
        }
        FunctionCode::Custom(code) => Custom(code, Cow::Owned(data.to_vec())),
    };

    // Re-check the shared quantity/range constraints. Violations answer
    // with an exception just like a native server would.
    if req.validate().is_err() {
        return Ok(reject(function, ExceptionCode::IllegalDataValue));
    }
    Ok(Ok(RequestPdu(req)))
}

impl TryFrom<Bytes> for ResponsePdu {
    type Error = Error;

    fn try_from(mut data: Bytes) -> Result<ResponsePdu, Error> {
        use Response::*;

        if data.is_empty() {
            return Err(FrameError::Malformed("empty response PDU").into());
        }
        let fn_code = data.get_u8();

        if fn_code & 0x80 != 0 {
            if data.len() != 1 {
                return Err(FrameError::Malformed("invalid exception response").into());
            }
            let code = data.get_u8();
            let Some(exception) = ExceptionCode::new(code) else {
                return Err(FrameError::Malformed("invalid exception code").into());
            };
            return Ok(ResponsePdu(Err(ExceptionResponse {
                function: FunctionCode::new(fn_code & 0x7F),
                exception,
            })));
        }

        let function = FunctionCode::new(fn_code);
        let rsp = match function {
            FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => {
                if data.is_empty() {
                    return Err(FrameError::Malformed("missing byte count").into());
                }
                let byte_count = data.get_u8();
                if usize::from(byte_count) != data.len() {
                    return Err(FrameError::Malformed("inconsistent byte count").into());
                }
                // Quantity is not carried by the response; the caller
                // truncates the unpacked coils to the requested count.
                let quantity = u16::from(byte_count) * 8;
                let coils = unpack_coils(&data, quantity);
                if function == FunctionCode::ReadCoils {
                    ReadCoils(coils)
                } else {
                    ReadDiscreteInputs(coils)
                }
            }
            FunctionCode::ReadHoldingRegisters
            | FunctionCode::ReadInputRegisters
            | FunctionCode::ReadWriteMultipleRegisters => {
                if data.is_empty() {
                    return Err(FrameError::Malformed("missing byte count").into());
                }
                let byte_count = data.get_u8();
                if usize::from(byte_count) != data.len() || byte_count % 2 != 0 {
                    return Err(FrameError::Malformed("inconsistent byte count").into());
                }
                let words = (0..byte_count / 2).map(|_| data.get_u16()).collect();
                match function {
                    FunctionCode::ReadHoldingRegisters => ReadHoldingRegisters(words),
                    FunctionCode::ReadInputRegisters => ReadInputRegisters(words),
                    _ => ReadWriteMultipleRegisters(words),
                }
            }
            FunctionCode::WriteSingleCoil => {
                if data.len() != 4 {
                    return Err(FrameError::Malformed("invalid response length").into());
                }
                let address = data.get_u16();
                let Some(coil) = u16_to_coil(data.get_u16()) else {
                    return Err(FrameError::Malformed("invalid coil value").into());
                };
                WriteSingleCoil(address, coil)
            }
            FunctionCode::WriteSingleRegister => {
                if data.len() != 4 {
                    return Err(FrameError::Malformed("invalid response length").into());
                }
                WriteSingleRegister(data.get_u16(), data.get_u16())
            }
            FunctionCode::ReadExceptionStatus => {
                if data.len() != 1 {
                    return Err(FrameError::Malformed("invalid response length").into());
                }
                ReadExceptionStatus(data.get_u8())
            }
            FunctionCode::Diagnostics => {
                if data.len() != 4 {
                    return Err(FrameError::Malformed("invalid response length").into());
                }
                let Some(sub_function) = DiagnosticSubFunction::new(data.get_u16()) else {
                    return Err(FrameError::Malformed("invalid diagnostic sub-function").into());
                };
                Diagnostics(sub_function, data.get_u16())
            }
            FunctionCode::GetCommEventCounter => {
                if data.len() != 4 {
                    return Err(FrameError::Malformed("invalid response length").into());
                }
                GetCommEventCounter(data.get_u16(), data.get_u16())
            }
            FunctionCode::GetCommEventLog => {
                if data.is_empty() {
                    return Err(FrameError::Malformed("missing byte count").into());
                }
                let byte_count = data.get_u8();
                if usize::from(byte_count) != data.len() || byte_count < 6 || byte_count > 70 {
                    return Err(FrameError::Malformed("inconsistent byte count").into());
                }
                GetCommEventLog(CommEventLog {
                    status: data.get_u16(),
                    event_count: data.get_u16(),
                    message_count: data.get_u16(),
                    events: data.to_vec(),
                })
            }
            FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters => {
                if data.len() != 4 {
                    return Err(FrameError::Malformed("invalid response length").into());
                }
                let address = data.get_u16();
                let quantity = data.get_u16();
                if function == FunctionCode::WriteMultipleCoils {
                    WriteMultipleCoils(address, quantity)
                } else {
                    WriteMultipleRegisters(address, quantity)
                }
            }
            FunctionCode::ReportServerId => {
                if data.is_empty() {
                    return Err(FrameError::Malformed("missing byte count").into());
                }
                let byte_count = data.get_u8();
                if usize::from(byte_count) != data.len() || byte_count < 2 {
                    return Err(FrameError::Malformed("inconsistent byte count").into());
                }
                let server_id = data.get_u8();
                let run_indicator = match data.get_u8() {
                    0xFF => true,
                    0x00 => false,
                    _ => {
                        return Err(FrameError::Malformed("invalid run indicator").into());
                    }
                };
                ReportServerId(ServerId {
                    server_id,
                    run_indicator,
                    additional_data: data.to_vec(),
                })
            }
            FunctionCode::ReadFileRecord => {
                if data.is_empty() {
                    return Err(FrameError::Malformed("missing byte count").into());
                }
                let byte_count = data.get_u8();
                if usize::from(byte_count) != data.len() {
                    return Err(FrameError::Malformed("inconsistent byte count").into());
                }
                let mut record_data = Vec::new();
                while data.has_remaining() {
                    if data.remaining() < 2 {
                        return Err(FrameError::Malformed("truncated file record").into());
                    }
                    let file_resp_len = data.get_u8();
                    if data.get_u8() != FILE_REFERENCE_TYPE {
                        return Err(FrameError::Malformed("invalid reference type").into());
                    }
                    if file_resp_len < 1
                        || file_resp_len % 2 == 0
                        || data.remaining() < usize::from(file_resp_len) - 1
                    {
                        return Err(FrameError::Malformed("truncated file record").into());
                    }
                    let words = (0..(file_resp_len - 1) / 2).map(|_| data.get_u16()).collect();
                    record_data.push(words);
                }
                ReadFileRecord(record_data)
            }
            FunctionCode::WriteFileRecord => {
                if data.is_empty() {
                    return Err(FrameError::Malformed("missing byte count").into());
                }
                let byte_count = data.get_u8();
                if usize::from(byte_count) != data.len() {
                    return Err(FrameError::Malformed("inconsistent byte count").into());
                }
                let mut records = Vec::new();
                while data.has_remaining() {
                    if data.remaining() < 7 || data.get_u8() != FILE_REFERENCE_TYPE {
                        return Err(FrameError::Malformed("truncated file record").into());
                    }
                    let file_number = data.get_u16();
                    let record_number = data.get_u16();
                    let record_length = data.get_u16();
                    if data.remaining() < usize::from(record_length) * 2 {
                        return Err(FrameError::Malformed("truncated file record").into());
                    }
                    let words = (0..record_length).map(|_| data.get_u16()).collect();
                    records.push(FileRecord {
                        file_number,
                        record_number,
                        data: words,
                    });
                }
                WriteFileRecord(records)
            }
            FunctionCode::MaskWriteRegister => {
                if data.len() != 6 {
                    return Err(FrameError::Malformed("invalid response length").into());
                }
                MaskWriteRegister(data.get_u16(), data.get_u16(), data.get_u16())
            }
            FunctionCode::ReadFifoQueue => {
                if data.len() < 4 {
                    return Err(FrameError::Malformed("invalid response length").into());
                }
                let byte_count = data.get_u16();
                let fifo_count = data.get_u16();
                if fifo_count > limits::MAX_FIFO_COUNT {
                    return Err(FrameError::Malformed("FIFO count exceeds 31").into());
                }
                if usize::from(byte_count) != 2 + usize::from(fifo_count) * 2
                    || data.remaining() != usize::from(fifo_count) * 2
                {
                    return Err(FrameError::Malformed("inconsistent byte count").into());
                }
                let words = (0..fifo_count).map(|_| data.get_u16()).collect();
                ReadFifoQueue(words)
            }
            FunctionCode::EncapsulatedInterfaceTransport => {
                if data.len() < 6 {
                    return Err(FrameError::Malformed("invalid response length").into());
                }
                if data.get_u8() != MEI_DEVICE_IDENTIFICATION {
                    return Err(FrameError::Malformed("unsupported MEI type").into());
                }
                let Some(read_device_id_code) = ReadDeviceIdCode::new(data.get_u8()) else {
                    return Err(FrameError::Malformed("invalid read device id code").into());
                };
                let conformity_level = data.get_u8();
                let more_follows = match data.get_u8() {
                    0xFF => true,
                    0x00 => false,
                    _ => {
                        return Err(FrameError::Malformed("invalid more-follows field").into());
                    }
                };
                let next_object_id = data.get_u8();
                let object_count = data.get_u8();
                // The object list is self-terminating: stop as soon as
                // the declared count is reached or no data remains.
                let mut objects = Vec::with_capacity(usize::from(object_count));
                while objects.len() < usize::from(object_count) && data.has_remaining() {
                    if data.remaining() < 2 {
                        return Err(FrameError::Malformed("truncated object header").into());
                    }
                    let object_id = data.get_u8();
                    let object_len = data.get_u8();
                    if data.remaining() < usize::from(object_len) {
                        return Err(FrameError::Malformed("truncated object value").into());
                    }
                    let value = data.split_to(usize::from(object_len));
                    objects.push(DeviceIdObject {
                        object_id,
                        data: value.to_vec(),
                    });
                }
                ReadDeviceIdentification(DeviceIdResponse {
                    read_device_id_code,
                    conformity_level,
                    more_follows,
                    next_object_id,
                    objects,
                })
            }
            FunctionCode::Custom(code) => Custom(code, data),
        };
        Ok(ResponsePdu(Ok(rsp)))
    }
}
