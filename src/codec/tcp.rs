// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP framing for TCP and UDP
//!
//! Every ADU starts with the 7-byte MBAP header: transaction id,
//! protocol id (always zero), the length of unit id plus PDU, and the
//! unit id. The header is peeked and validated in full before any
//! bytes are consumed, so a partially received frame leaves the buffer
//! untouched.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::{Error, FrameError},
    frame::tcp::*,
};

use super::*;

const MBAP_HEADER_LEN: usize = 7;

const PROTOCOL_ID: u16 = 0x0000;

/// The length field counts the unit id plus the PDU: at least a bare
/// function code, at most a full 253-byte PDU.
const LENGTH_FIELD_RANGE: std::ops::RangeInclusive<usize> = 2..=254;

/// The fields of one MBAP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MbapHeader {
    transaction_id: TransactionId,
    unit_id: UnitId,
    pdu_len: usize,
}

/// Validate a complete buffered header without consuming it.
fn peek_header(buf: &BytesMut) -> Result<Option<MbapHeader>, Error> {
    if buf.len() < MBAP_HEADER_LEN {
        return Ok(None);
    }
    let mut header = &buf[..MBAP_HEADER_LEN];
    let transaction_id = header.get_u16();
    let protocol_id = header.get_u16();
    let length_field = usize::from(header.get_u16());
    let unit_id = header.get_u8();

    if protocol_id != PROTOCOL_ID {
        return Err(FrameError::ProtocolId(protocol_id).into());
    }
    if !LENGTH_FIELD_RANGE.contains(&length_field) {
        return Err(FrameError::HeaderLength(length_field).into());
    }
    Ok(Some(MbapHeader {
        transaction_id,
        unit_id,
        // The unit id is part of the declared length.
        pdu_len: length_field - 1,
    }))
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct AduDecoder;

impl Decoder for AduDecoder {
    type Item = (Header, Bytes);
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<(Header, Bytes)>, Error> {
        let Some(header) = peek_header(buf)? else {
            return Ok(None);
        };
        let adu_len = MBAP_HEADER_LEN + header.pdu_len;
        if buf.len() < adu_len {
            // Tell the transport how much is still missing.
            buf.reserve(adu_len - buf.len());
            return Ok(None);
        }
        buf.advance(MBAP_HEADER_LEN);
        let pdu_data = buf.split_to(header.pdu_len).freeze();
        let hdr = Header {
            transaction_id: header.transaction_id,
            unit_id: header.unit_id,
        };
        Ok(Some((hdr, pdu_data)))
    }
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ClientCodec {
    decoder: AduDecoder,
}

#[cfg(feature = "server")]
#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ServerCodec {
    decoder: AduDecoder,
}

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseAdu>, Error> {
        let Some((hdr, pdu_data)) = self.decoder.decode(buf)? else {
            return Ok(None);
        };
        let pdu = ResponsePdu::try_from(pdu_data)?;
        Ok(Some(ResponseAdu { hdr, pdu }))
    }
}

#[cfg(feature = "server")]
impl Decoder for ServerCodec {
    type Item = ServerRequestAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ServerRequestAdu>, Error> {
        let Some((hdr, pdu_data)) = self.decoder.decode(buf)? else {
            return Ok(None);
        };
        let pdu = decode_request(pdu_data)?;
        Ok(Some(ServerRequestAdu { hdr, pdu }))
    }
}

fn put_adu(hdr: Header, pdu_data: &Bytes, buf: &mut BytesMut) -> Result<(), Error> {
    buf.reserve(MBAP_HEADER_LEN + pdu_data.len());
    buf.put_u16(hdr.transaction_id);
    buf.put_u16(PROTOCOL_ID);
    buf.put_u16(u16_len(pdu_data.len() + 1)?);
    buf.put_u8(hdr.unit_id);
    buf.put_slice(pdu_data);
    Ok(())
}

impl<'a> Encoder<RequestAdu<'a>> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu<'a>, buf: &mut BytesMut) -> Result<(), Error> {
        let RequestAdu { hdr, pdu } = adu;
        let pdu_data: Bytes = pdu.try_into()?;
        put_adu(hdr, &pdu_data, buf)
    }
}

#[cfg(feature = "server")]
impl Encoder<ResponseAdu> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, adu: ResponseAdu, buf: &mut BytesMut) -> Result<(), Error> {
        let ResponseAdu { hdr, pdu } = adu;
        let pdu_data: Bytes = pdu.try_into()?;
        put_adu(hdr, &pdu_data, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Request, Response};

    fn encoded_request(hdr: Header, req: Request<'_>) -> BytesMut {
        let mut buf = BytesMut::new();
        let adu = RequestAdu {
            hdr,
            pdu: req.into(),
        };
        ClientCodec::default()
            .encode(adu, &mut buf)
            .expect("encodable request");
        buf
    }

    #[test]
    fn peek_incomplete_header() {
        let buf = BytesMut::from(&[0x2A, 0x17, 0x00, 0x00, 0x00, 0x06][..]);
        assert_eq!(peek_header(&buf).unwrap(), None);
    }

    #[test]
    fn peek_complete_header() {
        let buf = BytesMut::from(&[0x2A, 0x17, 0x00, 0x00, 0x00, 0x06, 0x0D][..]);
        assert_eq!(
            peek_header(&buf).unwrap(),
            Some(MbapHeader {
                transaction_id: 0x2A17,
                unit_id: 0x0D,
                pdu_len: 5,
            })
        );
    }

    #[test]
    fn peek_rejects_nonzero_protocol_id() {
        let buf = BytesMut::from(&[0x2A, 0x17, 0x00, 0x01, 0x00, 0x06, 0x0D][..]);
        let err = peek_header(&buf).unwrap_err();
        assert!(matches!(err, Error::Frame(FrameError::ProtocolId(0x0001))));
    }

    #[test]
    fn peek_rejects_length_field_out_of_range() {
        // A length of 1 would leave no room for a function code.
        let buf = BytesMut::from(&[0x2A, 0x17, 0x00, 0x00, 0x00, 0x01, 0x0D][..]);
        let err = peek_header(&buf).unwrap_err();
        assert!(matches!(err, Error::Frame(FrameError::HeaderLength(1))));

        // A length of 255 would exceed the 253-byte PDU limit.
        let buf = BytesMut::from(&[0x2A, 0x17, 0x00, 0x00, 0x00, 0xFF, 0x0D][..]);
        let err = peek_header(&buf).unwrap_err();
        assert!(matches!(err, Error::Frame(FrameError::HeaderLength(255))));
    }

    #[test]
    fn incomplete_pdu_leaves_buffer_untouched() {
        let frame = encoded_request(
            Header {
                transaction_id: 0x2A17,
                unit_id: 0x0D,
            },
            Request::ReadInputRegisters(0x0023, 5),
        );
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(&frame[..frame.len() - 2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), frame.len() - 2);
    }

    #[test]
    fn encode_read_holding_registers_adu() {
        // ReadHoldingRegisters(addr = 0, qty = 5), txid = 1, unit = 1
        let buf = encoded_request(
            Header {
                transaction_id: 0x0001,
                unit_id: 0x01,
            },
            Request::ReadHoldingRegisters(0, 5),
        );
        assert_eq!(
            buf.as_ref(),
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x05]
        );
    }

    #[test]
    fn decode_read_holding_registers_response_adu() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(
            &[
                0x00, 0x01, 0x00, 0x00, 0x00, 0x0D, 0x01, 0x03, 0x0A, 0x00, 0x00, 0x00, 0x64,
                0x00, 0xC8, 0x01, 0x2C, 0x01, 0x90,
            ][..],
        );
        let ResponseAdu { hdr, pdu } = codec.decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());
        assert_eq!(hdr.transaction_id, 0x0001);
        assert_eq!(hdr.unit_id, 0x01);
        let ResponsePdu(Ok(Response::ReadHoldingRegisters(words))) = pdu else {
            panic!("unexpected response");
        };
        assert_eq!(words, vec![0, 100, 200, 300, 400]);
    }

    #[test]
    fn decode_exception_response_adu() {
        let mut codec = ClientCodec::default();
        // Header, then function 0x03 | 0x80 with IllegalDataAddress,
        // followed by the first byte of the next frame.
        let mut buf =
            BytesMut::from(&[0x2A, 0x17, 0x00, 0x00, 0x00, 0x03, 0x0D, 0x83, 0x02, 0x00][..]);
        let ResponseAdu { hdr, pdu } = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(buf.len(), 1);
        assert_eq!(hdr.transaction_id, 0x2A17);
        assert_eq!(hdr.unit_id, 0x0D);
        let ResponsePdu(Err(exc_rsp)) = pdu else {
            panic!("unexpected response");
        };
        assert_eq!(
            exc_rsp.exception,
            crate::frame::ExceptionCode::IllegalDataAddress
        );
    }

    #[cfg(feature = "server")]
    mod server {
        use super::*;
        use crate::frame::SlaveRequest;
        use std::borrow::Cow;

        #[test]
        fn request_adu_roundtrip() {
            let requests = [
                Request::ReadHoldingRegisters(0, 5),
                Request::WriteSingleCoil(0x000A, true),
                Request::WriteMultipleCoils(0x0004, Cow::Owned(vec![true, false, true])),
                Request::ReadDeviceIdentification(crate::frame::ReadDeviceIdCode::Basic, 0),
            ];
            for req in requests {
                let mut buf = encoded_request(
                    Header {
                        transaction_id: 0x2A17,
                        unit_id: 0x0D,
                    },
                    req.clone(),
                );
                let adu = ServerCodec::default().decode(&mut buf).unwrap().unwrap();
                assert!(buf.is_empty());
                assert_eq!(adu.hdr.transaction_id, 0x2A17);
                let decoded: Result<SlaveRequest<'_>, _> = adu.into();
                let decoded = decoded.unwrap();
                assert_eq!(decoded.slave, 0x0D);
                assert_eq!(decoded.request, req.into_owned());
            }
        }

        #[test]
        fn encode_response_adu() {
            let mut codec = ServerCodec::default();
            let mut buf = BytesMut::new();
            let adu = ResponseAdu {
                hdr: Header {
                    transaction_id: 0x0001,
                    unit_id: 0x01,
                },
                pdu: Response::ReadHoldingRegisters(vec![0, 100, 200, 300, 400]).into(),
            };
            codec.encode(adu, &mut buf).unwrap();
            assert_eq!(
                buf.as_ref(),
                &[
                    0x00, 0x01, 0x00, 0x00, 0x00, 0x0D, 0x01, 0x03, 0x0A, 0x00, 0x00, 0x00,
                    0x64, 0x00, 0xC8, 0x01, 0x2C, 0x01, 0x90
                ]
            );
        }
    }
}
