use super::{
    error::Error,
    frame::{latin1_to_string, SendData},
};
use bytes::BytesMut;
use std::sync::{
    atomic::{AtomicI32, Ordering},
    Arc,
};
use tokio_util::codec::{Decoder, Encoder};

/// Upper bound for a single line; a gateway never sends more.
pub const MAX_LINE_LEN: usize = 16 * 1024;

/// Line codec for the PCK stream.
///
/// Decodes Latin-1 lines terminated by `\n` and renders [`SendData`] frames
/// using the local segment id shared with the connection.
#[derive(Debug, Default)]
pub struct PckCodec {
    local_seg_id: Arc<AtomicI32>,
    // bytes of the buffer already scanned for a terminator
    next_index: usize,
}

impl PckCodec {
    pub fn new(local_seg_id: Arc<AtomicI32>) -> Self {
        Self {
            local_seg_id,
            next_index: 0,
        }
    }
}

impl Decoder for PckCodec {
    type Item = String;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Error> {
        loop {
            let Some(offset) = buf[self.next_index..].iter().position(|b| *b == b'\n') else {
                if buf.len() > MAX_LINE_LEN {
                    return Err(Error::ErrFrameTooLong(MAX_LINE_LEN));
                }
                self.next_index = buf.len();
                return Ok(None);
            };
            let end = self.next_index + offset;
            self.next_index = 0;
            let frame = buf.split_to(end + 1);
            let mut line = &frame[..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            if line.is_empty() {
                continue;
            }
            return Ok(Some(latin1_to_string(line)));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Error> {
        match self.decode(buf)? {
            Some(line) => Ok(Some(line)),
            None => {
                if !buf.is_empty() {
                    tracing::debug!(len = buf.len(), "Discarding unterminated data at end of stream");
                    buf.clear();
                }
                self.next_index = 0;
                Ok(None)
            }
        }
    }
}

impl Encoder<SendData> for PckCodec {
    type Error = Error;

    fn encode(&mut self, item: SendData, buf: &mut BytesMut) -> Result<(), Error> {
        item.write(self.local_seg_id.load(Ordering::Acquire), buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::LcnAddr;

    #[test]
    fn decode_reassembles_partial_lines() {
        let mut codec = PckCodec::default();
        let mut buf = BytesMut::from(&b"Userna"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"me:\n$io:#LCN:conn");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("Username:"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"ected\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap().as_deref(),
            Some("$io:#LCN:connected")
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_splits_several_lines_in_one_chunk() {
        let mut codec = PckCodec::default();
        let mut buf = BytesMut::from(&b"OK\r\n\n-M000010!\n:M000010A1050\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("OK"));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("-M000010!"));
        assert_eq!(
            codec.decode(&mut buf).unwrap().as_deref(),
            Some(":M000010A1050")
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn decode_latin1() {
        let mut codec = PckCodec::default();
        let mut buf = BytesMut::from(&b"=M000010.GT\xfcr\n"[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap().as_deref(),
            Some("=M000010.GTür")
        );
    }

    #[test]
    fn decode_rejects_endless_line() {
        let mut codec = PckCodec::default();
        let mut buf = BytesMut::from(vec![b'x'; MAX_LINE_LEN + 1].as_slice());
        assert!(matches!(
            codec.decode(&mut buf),
            Err(Error::ErrFrameTooLong(_))
        ));
    }

    #[test]
    fn decode_eof_drops_fragment() {
        let mut codec = PckCodec::default();
        let mut buf = BytesMut::from(&b"^ping1\n=M0000"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap().as_deref(), Some("^ping1"));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn encode_uses_current_local_segment() {
        let local = Arc::new(AtomicI32::new(-1));
        let mut codec = PckCodec::new(Arc::clone(&local));
        let mut buf = BytesMut::new();
        codec
            .encode(SendData::pck(LcnAddr::module(5, 10), false, "SMR"), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b">M005010.SMR\n");

        local.store(5, Ordering::Release);
        buf.clear();
        codec
            .encode(SendData::pck(LcnAddr::module(5, 10), false, "SMR"), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b">M000010.SMR\n");
    }
}
