// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! ASCII framing with LRC
//!
//! Frames are transmitted as `:` followed by the uppercase-hex encoding
//! of `{slave id, PDU, LRC}` and terminated by CR LF. Serial ports must
//! be configured for 7 data bits when this framing is selected.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::{Error, FrameError},
    frame::rtu::*,
    slave::SlaveId,
};

use super::*;

const FRAME_START: u8 = b':';
const CR: u8 = b'\r';
const LF: u8 = b'\n';

// One start marker, two hex characters for each of the up to 255 ADU
// bytes, and the CR LF trailer.
const MAX_FRAME_LEN: usize = 1 + 2 * 255 + 2;

/// Compute the LRC as the two's complement of the 8-bit sum.
pub(crate) fn calc_lrc(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |acc, byte| acc.wrapping_add(*byte))
        .wrapping_neg()
}

fn check_lrc(data: &[u8], expected_lrc: u8) -> Result<(), Error> {
    let actual_lrc = calc_lrc(data);
    if expected_lrc != actual_lrc {
        return Err(FrameError::Lrc {
            expected: expected_lrc,
            actual: actual_lrc,
        }
        .into());
    }
    Ok(())
}

const fn decode_hex_digit(character: u8) -> Option<u8> {
    match character {
        b'0'..=b'9' => Some(character - b'0'),
        b'A'..=b'F' => Some(character - b'A' + 10),
        b'a'..=b'f' => Some(character - b'a' + 10),
        _ => None,
    }
}

fn put_hex_byte(buf: &mut BytesMut, byte: u8) {
    const HEX_CHARS: &[u8; 16] = b"0123456789ABCDEF";
    buf.put_u8(HEX_CHARS[usize::from(byte >> 4)]);
    buf.put_u8(HEX_CHARS[usize::from(byte & 0x0F)]);
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct FrameDecoder;

impl FrameDecoder {
    pub(crate) fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<(SlaveId, Bytes)>, Error> {
        // Discard any noise in front of the start marker.
        match buf.iter().position(|&byte| byte == FRAME_START) {
            None => {
                if !buf.is_empty() {
                    log::debug!("Discarded {} byte(s) before frame start", buf.len());
                    buf.clear();
                }
                return Ok(None);
            }
            Some(start) if start > 0 => {
                log::debug!("Discarded {start} byte(s) before frame start");
                buf.advance(start);
            }
            Some(_) => (),
        }

        // Wait for the CR LF trailer.
        let Some(cr_pos) = buf.iter().position(|&byte| byte == CR) else {
            if buf.len() > MAX_FRAME_LEN {
                buf.clear();
                return Err(FrameError::Malformed("frame exceeds maximum length").into());
            }
            return Ok(None);
        };
        if cr_pos + 1 >= buf.len() {
            // LF still missing
            return Ok(None);
        }
        if buf[cr_pos + 1] != LF {
            buf.advance(cr_pos + 2);
            return Err(FrameError::Malformed("missing LF after CR").into());
        }

        let frame = buf.split_to(cr_pos + 2);
        let hex_payload = &frame[1..cr_pos];
        if hex_payload.len() % 2 != 0 {
            return Err(FrameError::Malformed("odd hex payload length").into());
        }

        let mut decoded = Vec::with_capacity(hex_payload.len() / 2);
        for pair in hex_payload.chunks(2) {
            let (Some(hi), Some(lo)) = (decode_hex_digit(pair[0]), decode_hex_digit(pair[1]))
            else {
                return Err(FrameError::Malformed("invalid hex character").into());
            };
            decoded.push(hi << 4 | lo);
        }

        // At least slave id, function code and LRC
        if decoded.len() < 3 {
            return Err(FrameError::Malformed("frame too short").into());
        }
        let expected_lrc = decoded[decoded.len() - 1];
        check_lrc(&decoded[..decoded.len() - 1], expected_lrc)?;

        let slave_id = decoded[0];
        let pdu_data = Bytes::from(decoded[1..decoded.len() - 1].to_vec());
        Ok(Some((slave_id, pdu_data)))
    }
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ClientCodec {
    decoder: FrameDecoder,
}

#[cfg(feature = "server")]
#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ServerCodec {
    decoder: FrameDecoder,
}

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseAdu>, Error> {
        let Some((slave_id, pdu_data)) = self.decoder.decode(buf)? else {
            return Ok(None);
        };
        let hdr = Header { slave_id };
        let pdu = ResponsePdu::try_from(pdu_data)?;
        Ok(Some(ResponseAdu { hdr, pdu }))
    }
}

#[cfg(feature = "server")]
impl Decoder for ServerCodec {
    type Item = ServerRequestAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ServerRequestAdu>, Error> {
        let Some((slave_id, pdu_data)) = self.decoder.decode(buf)? else {
            return Ok(None);
        };
        let hdr = Header { slave_id };
        let pdu = decode_request(pdu_data)?;
        Ok(Some(ServerRequestAdu { hdr, pdu }))
    }
}

fn encode_frame(slave_id: SlaveId, pdu_data: &Bytes, buf: &mut BytesMut) {
    buf.reserve(1 + 2 * (pdu_data.len() + 2) + 2);
    buf.put_u8(FRAME_START);
    put_hex_byte(buf, slave_id);
    for byte in pdu_data {
        put_hex_byte(buf, *byte);
    }
    let mut lrc = slave_id;
    for byte in pdu_data {
        lrc = lrc.wrapping_add(*byte);
    }
    put_hex_byte(buf, lrc.wrapping_neg());
    buf.put_u8(CR);
    buf.put_u8(LF);
}

impl<'a> Encoder<RequestAdu<'a>> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu<'a>, buf: &mut BytesMut) -> Result<(), Error> {
        let RequestAdu { hdr, pdu } = adu;
        let pdu_data: Bytes = pdu.try_into()?;
        encode_frame(hdr.slave_id, &pdu_data, buf);
        Ok(())
    }
}

#[cfg(feature = "server")]
impl Encoder<ResponseAdu> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, adu: ResponseAdu, buf: &mut BytesMut) -> Result<(), Error> {
        let ResponseAdu { hdr, pdu } = adu;
        let pdu_data: Bytes = pdu.try_into()?;
        encode_frame(hdr.slave_id, &pdu_data, buf);
        Ok(())
    }
}
