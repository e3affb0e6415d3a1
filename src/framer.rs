//! Slices a raw, possibly-chunked byte stream into complete FIX messages.
//!
//! The framer never interprets tag semantics beyond `BodyLength`; it only
//! guarantees that messages are emitted one at a time, in wire order, and
//! byte-exact regardless of how the input was chunked.

use bytes::{Buf, Bytes, BytesMut};

const TRAILER_LEN: usize = 7; // "10=" + 3 digits + SOH
const SOH: u8 = crate::codec::SOH;

#[derive(Debug, Default)]
pub struct Framer {
    buf: BytesMut,
}

impl Framer {
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Attempt to extract the next complete message. Returns `None` if the
    /// buffer holds no complete message yet (wait for more bytes).
    pub fn next_message(&mut self) -> Option<Bytes> {
        loop {
            let data: &[u8] = &self.buf;
            let start = match memchr::memmem::find(data, b"8=") {
                Some(s) => s,
                None => {
                    if !data.is_empty() {
                        tracing::warn!(discarded = data.len(), "framer resync: no 8= found, discarding buffer");
                        self.buf.clear();
                    }
                    return None;
                }
            };
            if start > 0 {
                tracing::warn!(discarded = start, "framer resync: discarding bytes before 8=");
                self.buf.advance(start);
                continue;
            }

            let nine_pos = match memchr::memmem::find(data, b"\x019=") {
                Some(p) => p + 1,
                None => return None, // wait for more bytes
            };
            let nine_value_start = nine_pos + 2;
            let nine_end = match memchr::memchr(SOH, &data[nine_value_start..]) {
                Some(i) => nine_value_start + i,
                None => return None,
            };
            let body_len: usize = match std::str::from_utf8(&data[nine_value_start..nine_end])
                .ok()
                .and_then(|s| s.parse().ok())
            {
                Some(n) => n,
                None => {
                    tracing::warn!("framer resync: non-numeric BodyLength, discarding buffer");
                    self.buf.clear();
                    return None;
                }
            };

            let body_start = nine_end + 1;
            let total_len = body_start + body_len + TRAILER_LEN;
            if data.len() < total_len {
                return None; // incomplete; wait for more
            }

            let msg = self.buf.split_to(total_len).freeze();
            return Some(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, GroupDictionary, Message};

    fn encode_sample(seq: u32) -> Bytes {
        let mut m = Message::new("0");
        m.set(49, "C");
        m.set(56, "S");
        m.set(34, seq.to_string());
        m.set(52, "20240101-00:00:00.000");
        codec::encode(&m, "FIX.4.2").unwrap()
    }

    #[test]
    fn emits_nothing_on_partial_message() {
        let full = encode_sample(1);
        let mut framer = Framer::new();
        framer.push(&full[..full.len() / 2]);
        assert!(framer.next_message().is_none());
    }

    #[test]
    fn splits_two_concatenated_messages_fed_in_arbitrary_chunks() {
        let m1 = encode_sample(1);
        let m2 = encode_sample(2);
        let mut concatenated = Vec::new();
        concatenated.extend_from_slice(&m1);
        concatenated.extend_from_slice(&m2);

        // Split the boundary mid-BodyLength-field of the second message.
        let split_point = m1.len() + 11;
        let (chunk_a, chunk_b) = concatenated.split_at(split_point);

        let mut framer = Framer::new();
        framer.push(chunk_a);
        let first = framer.next_message();
        assert!(first.is_some());
        assert_eq!(first.unwrap(), m1);
        assert!(framer.next_message().is_none());

        framer.push(chunk_b);
        let second = framer.next_message().unwrap();
        assert_eq!(second, m2);
        assert!(framer.next_message().is_none());
        assert!(framer.buf.is_empty());
    }

    #[test]
    fn discards_garbage_prefix_before_resyncing() {
        let m1 = encode_sample(1);
        let mut garbage = b"garbage-not-fix".to_vec();
        garbage.extend_from_slice(&m1);

        let mut framer = Framer::new();
        framer.push(&garbage);
        let msg = framer.next_message().unwrap();
        assert_eq!(msg, m1);

        let dict = GroupDictionary::standard();
        let decoded = codec::decode(&msg, &dict).unwrap();
        assert_eq!(decoded.get_u32(34), Some(1));
    }
}
