//! Modbus TCP (MBAP) framing
//!
//! The decoder buffers bytes until one whole ADU is available, so a
//! connection only becomes "ready" once a complete request has arrived.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::trace;
use tokio_util::codec::{Decoder, Encoder};

use super::constants::{
    MAX_ADU_SIZE, MAX_MBAP_LENGTH, MAX_PDU_SIZE, MBAP_HEADER_LEN, MBAP_PREFIX_LEN,
    MIN_MBAP_LENGTH, MODBUS_PROTOCOL_ID,
};
use crate::utils::error::ServerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub unit_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub header: MbapHeader,
    pub pdu: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub header: MbapHeader,
    pub pdu: Bytes,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MbapCodec;

impl Decoder for MbapCodec {
    type Item = RequestFrame;
    type Error = ServerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < MBAP_HEADER_LEN {
            src.reserve(MBAP_HEADER_LEN - src.len());
            return Ok(None);
        }

        let length = u16::from_be_bytes([src[4], src[5]]);
        if !(MIN_MBAP_LENGTH..=MAX_MBAP_LENGTH).contains(&length) {
            return Err(ServerError::FrameError(format!(
                "MBAP length {} outside {}..={}",
                length, MIN_MBAP_LENGTH, MAX_MBAP_LENGTH
            )));
        }

        let total = MBAP_PREFIX_LEN + length as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut adu = src.split_to(total);
        trace!("📥 ADU {}", hex::encode(&adu));

        let transaction_id = adu.get_u16();
        let protocol_id = adu.get_u16();
        let _length = adu.get_u16();
        let unit_id = adu.get_u8();

        Ok(Some(RequestFrame {
            header: MbapHeader {
                transaction_id,
                protocol_id,
                unit_id,
            },
            pdu: adu.freeze(),
        }))
    }
}

impl Encoder<ResponseFrame> for MbapCodec {
    type Error = ServerError;

    fn encode(&mut self, item: ResponseFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.pdu.is_empty() || item.pdu.len() > MAX_PDU_SIZE {
            return Err(ServerError::FrameError(format!(
                "response PDU of {} bytes",
                item.pdu.len()
            )));
        }

        dst.reserve(MAX_ADU_SIZE.min(MBAP_HEADER_LEN + item.pdu.len()));
        let start = dst.len();
        dst.put_u16(item.header.transaction_id);
        dst.put_u16(MODBUS_PROTOCOL_ID);
        dst.put_u16((item.pdu.len() + 1) as u16);
        dst.put_u8(item.header.unit_id);
        dst.put_slice(&item.pdu);
        trace!("📤 ADU {}", hex::encode(&dst[start..]));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_waits_for_whole_frame() {
        let mut codec = MbapCodec;
        let mut buf = BytesMut::from(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[0x00, 0x6B, 0x00]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[0x03]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.header.transaction_id, 1);
        assert_eq!(frame.header.unit_id, 0x11);
        assert_eq!(&frame.pdu[..], &[0x03, 0x00, 0x6B, 0x00, 0x03]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_leaves_next_frame_buffered() {
        let mut codec = MbapCodec;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x00, 0x07, 0x00, 0x00, 0x00, 0x02, 0x01, 0x11]);
        buf.extend_from_slice(&[0x00, 0x08, 0x00, 0x00]);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.header.transaction_id, 7);
        assert_eq!(&first.pdu[..], &[0x11]);
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        let mut codec = MbapCodec;
        let mut short = BytesMut::from(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x01][..]);
        assert!(matches!(codec.decode(&mut short), Err(ServerError::FrameError(_))));

        let mut long = BytesMut::from(&[0x00, 0x01, 0x00, 0x00, 0x00, 0xFF, 0x01][..]);
        assert!(matches!(codec.decode(&mut long), Err(ServerError::FrameError(_))));
    }

    #[test]
    fn test_encode_response() {
        let mut codec = MbapCodec;
        let mut dst = BytesMut::new();
        let frame = ResponseFrame {
            header: MbapHeader {
                transaction_id: 0xABCD,
                protocol_id: 0x1234,
                unit_id: 0x01,
            },
            pdu: Bytes::from_static(&[0x83, 0x02]),
        };
        codec.encode(frame, &mut dst).unwrap();
        assert_eq!(&dst[..], &[0xAB, 0xCD, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02]);
    }
}
