// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU framing with CRC-16
//!
//! Two framings share this module. On serial lines frame boundaries
//! are detected by timing: a silence of 3.5 character times ends a
//! frame ([`read_frame_by_silence`]). On TCP streams no timing exists,
//! so the expected frame length is derived from the function code and
//! the embedded byte-count fields instead (the `Decoder` impls below).
//! Both paths end in the same CRC validation and PDU parsing.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use smallvec::SmallVec;
use tokio::{
    io::{AsyncRead, AsyncReadExt as _},
    time::Instant,
};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::{Error, FrameError},
    frame::{rtu::*, FunctionCode},
    slave::SlaveId,
};

use super::*;

// [Modbus over Serial Line Specification and Implementation Guide V1.02](http://modbus.org/docs/Modbus_over_serial_line_V1_02.pdf), page 13
// "The maximum size of a Modbus RTU frame is 256 bytes."
const MAX_FRAME_LEN: usize = 256;

// Slave id and CRC surrounding the PDU.
const FRAME_OVERHEAD: usize = 3;

// The shortest possible ADU: slave id, function code, CRC.
const MIN_FRAME_LEN: usize = 4;

/// A silence-delimited frame, assembled on the stack.
pub(crate) type FrameBuf = SmallVec<[u8; MAX_FRAME_LEN]>;

/// CRC-16 with polynomial 0xA001 (reflected 0x8005), initial value
/// 0xFFFF, reflected input and output, no final XOR. The low byte goes
/// first on the wire.
const fn build_crc_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut value = 0;
    while value < 256 {
        let mut crc = value as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x0001 != 0 {
                (crc >> 1) ^ 0xA001
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[value] = crc;
        value += 1;
    }
    table
}

const CRC_TABLE: [u16; 256] = build_crc_table();

/// Continue a CRC-16 computation over further data.
pub(crate) fn crc16_update(crc: u16, data: &[u8]) -> u16 {
    data.iter().fold(crc, |crc, byte| {
        (crc >> 8) ^ CRC_TABLE[usize::from((crc as u8) ^ *byte)]
    })
}

/// Compute the CRC-16 of `data` in one pass.
pub(crate) fn crc16(data: &[u8]) -> u16 {
    crc16_update(0xFFFF, data)
}

/// Parameters for timing-based frame-boundary detection on a serial
/// line.
///
/// `char_time` is the transmission time of one character. A silence
/// longer than 1.5 character times is only legal between frames, a
/// silence of 3.5 character times terminates the frame. For baud rates
/// of 19200 and above fixed values of 750 µs and 1.75 ms substitute
/// for the exact character times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SerialTiming {
    /// Per-read deadline while a frame is in progress, ~1.5 character
    /// times.
    pub(crate) inter_char: Duration,
    /// Cumulative idle time that ends the frame, 3.5 character times.
    pub(crate) end_of_frame: Duration,
}

/// Read one silence-delimited frame from a serial line.
///
/// Waits for the first byte until `deadline` (or indefinitely without
/// one), then issues short reads bounded by the inter-character
/// tolerance and accumulates bytes until the cumulative idle time
/// since the last byte reaches the end-of-frame silence or the overall
/// deadline is reached. The OS may deliver bytes in arbitrary chunks,
/// so no assumption is made about read sizes.
pub(crate) async fn read_frame_by_silence<R>(
    port: &mut R,
    timing: SerialTiming,
    deadline: Option<Instant>,
) -> Result<FrameBuf, Error>
where
    R: AsyncRead + Unpin,
{
    let mut frame = FrameBuf::new();
    let mut chunk = [0; MAX_FRAME_LEN];
    let mut idle = Duration::ZERO;
    loop {
        if frame.is_empty() {
            // Nothing received yet: the overall deadline applies.
            let pending = port.read(&mut chunk);
            let read = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, pending).await {
                    Ok(read) => read,
                    Err(_elapsed) => return Err(Error::Timeout),
                },
                None => pending.await,
            };
            let count = read?;
            if count == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }
            frame.extend_from_slice(&chunk[..count]);
            continue;
        }

        match tokio::time::timeout(timing.inter_char, port.read(&mut chunk)).await {
            Ok(read) => {
                let count = read?;
                if count == 0 {
                    return Err(
                        std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into()
                    );
                }
                if frame.len() + count > MAX_FRAME_LEN {
                    return Err(FrameError::Malformed("frame exceeds maximum length").into());
                }
                frame.extend_from_slice(&chunk[..count]);
                idle = Duration::ZERO;
            }
            Err(_elapsed) => {
                idle += timing.inter_char;
                if idle >= timing.end_of_frame {
                    // 3.5 character times of silence: end of frame.
                    return Ok(frame);
                }
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        // Out of time: hand over what has arrived and
                        // let the CRC decide.
                        return Ok(frame);
                    }
                }
            }
        }
    }
}

/// Strip and verify the CRC, returning the PDU bytes of the frame.
fn frame_payload(frame: &[u8]) -> Result<&[u8], Error> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(FrameError::Malformed("frame too short").into());
    }
    let (content, trailer) = frame.split_at(frame.len() - 2);
    let received_crc = u16::from_le_bytes([trailer[0], trailer[1]]);
    let computed_crc = crc16(content);
    if received_crc != computed_crc {
        return Err(FrameError::Crc {
            expected: received_crc,
            actual: computed_crc,
        }
        .into());
    }
    Ok(&content[1..])
}

/// Parse a complete response frame.
pub(crate) fn parse_response_frame(frame: &[u8]) -> Result<ResponseAdu, Error> {
    let pdu_data = frame_payload(frame)?;
    let hdr = Header { slave_id: frame[0] };
    let pdu = ResponsePdu::try_from(Bytes::copy_from_slice(pdu_data))?;
    Ok(ResponseAdu { hdr, pdu })
}

/// Parse a complete request frame.
#[cfg(feature = "server")]
pub(crate) fn parse_request_frame(frame: &[u8]) -> Result<ServerRequestAdu, Error> {
    let pdu_data = frame_payload(frame)?;
    let hdr = Header { slave_id: frame[0] };
    let pdu = decode_request(Bytes::copy_from_slice(pdu_data))?;
    Ok(ServerRequestAdu { hdr, pdu })
}

/// Expected total length of a buffered request frame, or `None` while
/// the bytes that determine it have not arrived yet.
///
/// Stream transports have no inter-frame silence, so the length must
/// be derived from the function code and, for the variable-length
/// functions, from the embedded byte-count field.
fn request_adu_len(buf: &[u8]) -> Result<Option<usize>, Error> {
    use FunctionCode::*;

    if buf.len() < 2 {
        return Ok(None);
    }
    let pdu = &buf[1..];
    let pdu_len = match FunctionCode::new(pdu[0]) {
        ReadCoils | ReadDiscreteInputs | ReadHoldingRegisters | ReadInputRegisters
        | WriteSingleCoil | WriteSingleRegister | Diagnostics => 5,
        ReadExceptionStatus | GetCommEventCounter | GetCommEventLog | ReportServerId => 1,
        MaskWriteRegister => 7,
        ReadFifoQueue => 3,
        EncapsulatedInterfaceTransport => 4,
        WriteMultipleCoils | WriteMultipleRegisters => match pdu.get(5) {
            Some(&byte_count) => 6 + usize::from(byte_count),
            None => return Ok(None),
        },
        ReadFileRecord | WriteFileRecord => match pdu.get(1) {
            Some(&byte_count) => 2 + usize::from(byte_count),
            None => return Ok(None),
        },
        ReadWriteMultipleRegisters => match pdu.get(9) {
            Some(&byte_count) => 10 + usize::from(byte_count),
            None => return Ok(None),
        },
        Custom(_) => {
            // Without a known layout the frame boundary cannot be
            // found on a stream.
            return Err(FrameError::Malformed("unknown function code").into());
        }
    };
    Ok(Some(pdu_len + FRAME_OVERHEAD))
}

/// Expected total length of a buffered response frame, or `None` while
/// the bytes that determine it have not arrived yet.
fn response_adu_len(buf: &[u8]) -> Result<Option<usize>, Error> {
    use FunctionCode::*;

    if buf.len() < 2 {
        return Ok(None);
    }
    let pdu = &buf[1..];
    if pdu[0] & 0x80 != 0 {
        // Exception responses carry a single code byte.
        return Ok(Some(2 + FRAME_OVERHEAD));
    }
    let pdu_len = match FunctionCode::new(pdu[0]) {
        ReadCoils | ReadDiscreteInputs | ReadHoldingRegisters | ReadInputRegisters
        | GetCommEventLog | ReportServerId | ReadFileRecord | WriteFileRecord
        | ReadWriteMultipleRegisters => match pdu.get(1) {
            Some(&byte_count) => 2 + usize::from(byte_count),
            None => return Ok(None),
        },
        WriteSingleCoil | WriteSingleRegister | Diagnostics | GetCommEventCounter
        | WriteMultipleCoils | WriteMultipleRegisters => 5,
        ReadExceptionStatus => 2,
        MaskWriteRegister => 7,
        ReadFifoQueue => match (pdu.get(1), pdu.get(2)) {
            (Some(&hi), Some(&lo)) => 3 + usize::from(u16::from_be_bytes([hi, lo])),
            _ => return Ok(None),
        },
        EncapsulatedInterfaceTransport => {
            // No byte-count field: walk the object list.
            let Some(&object_count) = pdu.get(6) else {
                return Ok(None);
            };
            let mut pdu_len = 7;
            let mut remaining = object_count;
            while remaining > 0 {
                let Some(&object_len) = pdu.get(pdu_len + 1) else {
                    return Ok(None);
                };
                pdu_len += 2 + usize::from(object_len);
                remaining -= 1;
            }
            pdu_len
        }
        Custom(_) => {
            return Err(FrameError::Malformed("unknown function code").into());
        }
    };
    Ok(Some(pdu_len + FRAME_OVERHEAD))
}

/// Append a framed PDU: slave id in front, CRC-16 low byte first
/// behind.
fn put_frame(slave_id: SlaveId, pdu_data: &[u8], buf: &mut BytesMut) {
    buf.reserve(pdu_data.len() + FRAME_OVERHEAD);
    let frame_start = buf.len();
    buf.put_u8(slave_id);
    buf.put_slice(pdu_data);
    let crc = crc16(&buf[frame_start..]);
    buf.put_u16_le(crc);
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ClientCodec;

#[cfg(feature = "server")]
#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ServerCodec;

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseAdu>, Error> {
        let Some(adu_len) = response_adu_len(buf)? else {
            return Ok(None);
        };
        if buf.len() < adu_len {
            return Ok(None);
        }
        let frame = buf.split_to(adu_len);
        // A checksum mismatch on a stream leaves no way to find the
        // next frame boundary; the caller closes the connection.
        parse_response_frame(&frame).map(Some)
    }
}

#[cfg(feature = "server")]
impl Decoder for ServerCodec {
    type Item = ServerRequestAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ServerRequestAdu>, Error> {
        let Some(adu_len) = request_adu_len(buf)? else {
            return Ok(None);
        };
        if buf.len() < adu_len {
            return Ok(None);
        }
        let frame = buf.split_to(adu_len);
        parse_request_frame(&frame).map(Some)
    }
}

impl<'a> Encoder<RequestAdu<'a>> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu<'a>, buf: &mut BytesMut) -> Result<(), Error> {
        let RequestAdu { hdr, pdu } = adu;
        let pdu_data: Bytes = pdu.try_into()?;
        put_frame(hdr.slave_id, &pdu_data, buf);
        Ok(())
    }
}

#[cfg(feature = "server")]
impl Encoder<ResponseAdu> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, adu: ResponseAdu, buf: &mut BytesMut) -> Result<(), Error> {
        let ResponseAdu { hdr, pdu } = adu;
        let pdu_data: Bytes = pdu.try_into()?;
        put_frame(hdr.slave_id, &pdu_data, buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Request, Response};

    // ReadHoldingRegisters(addr = 0, qty = 1) to slave 1. The CRC of
    // the six content bytes is 0x0A84, transmitted low byte first.
    const REFERENCE_FRAME: [u8; 8] = [0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A];

    fn encoded_request(slave_id: SlaveId, req: Request<'_>) -> BytesMut {
        let mut buf = BytesMut::new();
        let adu = RequestAdu {
            hdr: Header { slave_id },
            pdu: req.into(),
        };
        ClientCodec.encode(adu, &mut buf).expect("encodable request");
        buf
    }

    #[test]
    fn crc_matches_reference_frame() {
        assert_eq!(crc16(&REFERENCE_FRAME[..6]), 0x0A84);
    }

    #[test]
    fn crc_incremental_equals_one_pass() {
        let data = [0x11, 0x06, 0x00, 0x01, 0x00, 0x03, 0x42, 0xA5, 0x00, 0xFF];
        let one_pass = crc16(&data);
        for split in 0..=data.len() {
            let (head, tail) = data.split_at(split);
            assert_eq!(crc16_update(crc16_update(0xFFFF, head), tail), one_pass);
        }
    }

    #[test]
    fn crc_detects_single_bit_errors() {
        let content = &REFERENCE_FRAME[..6];
        let crc = crc16(content);
        for position in 0..content.len() {
            for bit in 0..8 {
                let mut corrupted = [0; 6];
                corrupted.copy_from_slice(content);
                corrupted[position] ^= 1 << bit;
                assert_ne!(crc16(&corrupted), crc);
            }
        }
    }

    #[test]
    fn encode_request_frame() {
        let buf = encoded_request(0x01, Request::ReadHoldingRegisters(0, 1));
        assert_eq!(buf.as_ref(), &REFERENCE_FRAME);
    }

    #[test]
    fn probe_request_lengths() {
        // Not even the function code has arrived.
        assert_eq!(request_adu_len(&[0x01]).unwrap(), None);
        // Fixed-size requests are known from the function code alone.
        assert_eq!(request_adu_len(&[0x01, 0x03]).unwrap(), Some(8));
        assert_eq!(request_adu_len(&[0x01, 0x16]).unwrap(), Some(10));
        assert_eq!(request_adu_len(&[0x01, 0x07]).unwrap(), Some(4));
        // Write requests declare their own byte count.
        assert_eq!(
            request_adu_len(&[0x01, 0x10, 0x00, 0x64, 0x00, 0x02]).unwrap(),
            None
        );
        assert_eq!(
            request_adu_len(&[0x01, 0x10, 0x00, 0x64, 0x00, 0x02, 0x04]).unwrap(),
            Some(13)
        );
        assert!(request_adu_len(&[0x01, 0x44]).is_err());
    }

    #[test]
    fn probe_response_lengths() {
        assert_eq!(response_adu_len(&[0x01, 0x03]).unwrap(), None);
        assert_eq!(response_adu_len(&[0x01, 0x03, 0x0A]).unwrap(), Some(15));
        // Exception responses carry a single code byte.
        assert_eq!(response_adu_len(&[0x01, 0x83]).unwrap(), Some(5));
        assert_eq!(response_adu_len(&[0x01, 0x07]).unwrap(), Some(5));
        // The FIFO byte count is a 16-bit field.
        assert_eq!(response_adu_len(&[0x01, 0x18, 0x00]).unwrap(), None);
        assert_eq!(response_adu_len(&[0x01, 0x18, 0x00, 0x06]).unwrap(), Some(12));
    }

    #[test]
    fn probe_device_identification_response_length() {
        // slave, fn, mei, code, conformity, more, next
        let mut buf = vec![0x11, 0x2B, 0x0E, 0x01, 0x01, 0x00, 0x00];
        assert_eq!(response_adu_len(&buf).unwrap(), None);
        buf.push(0x02); // two objects
        assert_eq!(response_adu_len(&buf).unwrap(), None);
        buf.extend_from_slice(&[0x00, 0x03, b'a', b'b', b'c']);
        assert_eq!(response_adu_len(&buf).unwrap(), None);
        buf.extend_from_slice(&[0x01, 0x02, b'x', b'y']);
        // 7 header bytes + (2 + 3) + (2 + 2) of PDU, framed.
        assert_eq!(response_adu_len(&buf).unwrap(), Some(19));
    }

    #[test]
    fn decode_response_byte_by_byte() {
        let mut frame = BytesMut::new();
        put_frame(0x21, &[0x03, 0x04, 0x00, 0x2A, 0x01, 0x00], &mut frame);

        let mut codec = ClientCodec;
        let mut buf = BytesMut::new();
        for (i, byte) in frame.iter().enumerate() {
            if i + 1 < frame.len() {
                buf.put_u8(*byte);
                assert!(codec.decode(&mut buf).unwrap().is_none());
            }
        }
        buf.put_u8(frame[frame.len() - 1]);
        let ResponseAdu { hdr, pdu } = codec.decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());
        assert_eq!(hdr.slave_id, 0x21);
        let ResponsePdu(Ok(Response::ReadHoldingRegisters(words))) = pdu else {
            panic!("unexpected response");
        };
        assert_eq!(words, vec![0x002A, 0x0100]);
    }

    #[test]
    fn corrupted_frame_is_rejected() {
        let mut frame = BytesMut::new();
        put_frame(0x21, &[0x03, 0x02, 0x12, 0x34], &mut frame);
        frame[3] ^= 0x40;
        let err = parse_response_frame(&frame).unwrap_err();
        assert!(matches!(err, Error::Frame(FrameError::Crc { .. })));
    }

    #[test]
    fn undersized_frame_is_rejected() {
        let err = parse_response_frame(&[0x21, 0x84, 0x10]).unwrap_err();
        assert!(matches!(err, Error::Frame(FrameError::Malformed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn silence_terminates_timed_frame() {
        use tokio::io::AsyncWriteExt as _;

        let (mut remote, mut port) = tokio::io::duplex(64);
        remote.write_all(&REFERENCE_FRAME).await.unwrap();

        let timing = SerialTiming {
            inter_char: Duration::from_millis(1),
            end_of_frame: Duration::from_millis(4),
        };
        let frame = read_frame_by_silence(&mut port, timing, None).await.unwrap();
        assert_eq!(frame.as_slice(), &REFERENCE_FRAME);
    }

    #[tokio::test(start_paused = true)]
    async fn fragmented_writes_assemble_into_one_frame() {
        use tokio::io::AsyncWriteExt as _;

        let (mut remote, mut port) = tokio::io::duplex(64);
        let timing = SerialTiming {
            inter_char: Duration::from_millis(10),
            end_of_frame: Duration::from_millis(30),
        };
        let writer = tokio::spawn(async move {
            // Two bursts separated by less than the end-of-frame
            // silence still belong to the same frame.
            remote.write_all(&REFERENCE_FRAME[..3]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            remote.write_all(&REFERENCE_FRAME[3..]).await.unwrap();
            // Keep the stream open past the end-of-frame silence.
            tokio::time::sleep(Duration::from_millis(100)).await;
        });
        let frame = read_frame_by_silence(&mut port, timing, None).await.unwrap();
        assert_eq!(frame.as_slice(), &REFERENCE_FRAME);
        writer.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn first_byte_is_bounded_by_the_deadline() {
        let (_remote, mut port) = tokio::io::duplex(64);
        let timing = SerialTiming {
            inter_char: Duration::from_millis(1),
            end_of_frame: Duration::from_millis(4),
        };
        let deadline = Instant::now() + Duration::from_millis(20);
        let err = read_frame_by_silence(&mut port, timing, Some(deadline))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[cfg(feature = "server")]
    mod server {
        use super::*;
        use crate::frame::SlaveRequest;
        use std::borrow::Cow;

        #[test]
        fn request_frame_roundtrip() {
            let requests = [
                Request::ReadCoils(0x0010, 8),
                Request::WriteSingleCoil(0x0002, true),
                Request::WriteMultipleRegisters(0x0100, Cow::Owned(vec![0x00FF, 0xCAFE])),
                Request::MaskWriteRegister(0x0028, 0x00F2, 0x0025),
                Request::ReadFifoQueue(0x04DE),
            ];
            for req in requests {
                let mut buf = encoded_request(0x2A, req.clone());
                let adu = ServerCodec.decode(&mut buf).unwrap().unwrap();
                assert!(buf.is_empty());
                let decoded: Result<SlaveRequest<'_>, _> = adu.into();
                let decoded = decoded.unwrap();
                assert_eq!(decoded.slave, 0x2A);
                assert_eq!(decoded.request, req.into_owned());
            }
        }

        #[test]
        fn partial_request_yields_nothing() {
            let frame = encoded_request(0x2A, Request::ReadHoldingRegisters(0, 2));
            let mut buf = BytesMut::from(&frame[..frame.len() - 1]);
            assert!(ServerCodec.decode(&mut buf).unwrap().is_none());
            assert_eq!(buf.len(), frame.len() - 1);
        }

        #[test]
        fn parse_request_frame_checks_crc() {
            let mut frame = encoded_request(0x2A, Request::ReadHoldingRegisters(0, 2));
            frame[2] ^= 0x01;
            let err = parse_request_frame(&frame).unwrap_err();
            assert!(matches!(err, Error::Frame(FrameError::Crc { .. })));
        }
    }
}
