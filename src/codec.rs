//! FIX tag=value wire codec: [`Message`] is a structured representation of
//! one FIX message; [`encode`]/[`decode`] convert it to and from the
//! length-prefixed, checksum-trailed wire format.

use std::collections::HashMap;

use bytes::Bytes;
use thiserror::Error;

/// ASCII control-A, the FIX field delimiter.
pub const SOH: u8 = 0x01;

const TRAILER_LEN: usize = 7; // "10=" + 3 digits + SOH

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed framing: {0}")]
    MalformedFraming(String),
    #[error("checksum mismatch: expected {expected:03}, computed {computed:03}")]
    BadChecksum { expected: u8, computed: u8 },
    #[error("body length mismatch: header={header} computed={computed}")]
    BadBodyLength { header: usize, computed: usize },
    #[error("missing required field {0}")]
    MissingField(u32),
}

/// One entry of a repeating group: an ordered list of tag/value pairs,
/// whose first tag is the group's delimiter tag.
pub type GroupEntry = Vec<(u32, String)>;

/// A static mapping from a repeating group's count tag to its ordered
/// member tags (the first member is the delimiter tag that starts every
/// entry). Extending the engine to a full data-dictionary is an explicit
/// extension point, not a core requirement.
#[derive(Debug, Clone)]
pub struct GroupDictionary {
    groups: HashMap<u32, Vec<u32>>,
}

impl GroupDictionary {
    pub fn new() -> Self {
        Self { groups: HashMap::new() }
    }

    /// Minimum required coverage: NoPartyIDs (453) and NoOrders (73).
    pub fn standard() -> Self {
        let mut dict = Self::new();
        dict.insert(453, vec![448, 447, 452]); // NoPartyIDs
        dict.insert(73, vec![11, 38, 54, 55]); // NoOrders
        dict
    }

    pub fn insert(&mut self, count_tag: u32, member_tags: Vec<u32>) -> &mut Self {
        self.groups.insert(count_tag, member_tags);
        self
    }

    pub fn members_of(&self, count_tag: u32) -> Option<&[u32]> {
        self.groups.get(&count_tag).map(|v| v.as_slice())
    }

    pub fn is_count_tag(&self, tag: u32) -> bool {
        self.groups.contains_key(&tag)
    }
}

impl Default for GroupDictionary {
    fn default() -> Self {
        Self::standard()
    }
}

/// Header fields placed, in this order, immediately after `BeginString`/
/// `BodyLength` and before any body field.
const STANDARD_HEADER: [u32; 4] = [49, 56, 34, 52];

/// A structured FIX message: ordered flat fields plus ordered repeating
/// groups. `BeginString` (8), `BodyLength` (9) and `CheckSum` (10) are not
/// stored as fields — they are computed at encode time.
#[derive(Debug, Clone, Default)]
pub struct Message {
    msg_type: String,
    fields: Vec<(u32, String)>,
    field_index: HashMap<u32, usize>,
    groups: Vec<(u32, Vec<GroupEntry>)>,
    group_index: HashMap<u32, usize>,
}

impl Message {
    pub fn new(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            fields: Vec::new(),
            field_index: HashMap::new(),
            groups: Vec::new(),
            group_index: HashMap::new(),
        }
    }

    pub fn msg_type(&self) -> &str {
        &self.msg_type
    }

    /// Set (or update, preserving original insertion position) a flat
    /// field. Tags 8, 9, 35 and 10 are rejected — they are managed by the
    /// codec itself.
    pub fn set(&mut self, tag: u32, value: impl Into<String>) -> &mut Self {
        debug_assert!(
            !matches!(tag, 8 | 9 | 10 | 35),
            "tag {tag} is managed by the codec, not set directly"
        );
        let value = value.into();
        if let Some(&idx) = self.field_index.get(&tag) {
            self.fields[idx].1 = value;
        } else {
            self.field_index.insert(tag, self.fields.len());
            self.fields.push((tag, value));
        }
        self
    }

    pub fn get(&self, tag: u32) -> Option<&str> {
        self.field_index.get(&tag).map(|&i| self.fields[i].1.as_str())
    }

    pub fn get_u32(&self, tag: u32) -> Option<u32> {
        self.get(tag).and_then(|v| v.parse().ok())
    }

    pub fn set_group(&mut self, count_tag: u32, entries: Vec<GroupEntry>) -> &mut Self {
        if let Some(&idx) = self.group_index.get(&count_tag) {
            self.groups[idx].1 = entries;
        } else {
            self.group_index.insert(count_tag, self.groups.len());
            self.groups.push((count_tag, entries));
        }
        self
    }

    pub fn group(&self, count_tag: u32) -> Option<&[GroupEntry]> {
        self.group_index.get(&count_tag).map(|&i| self.groups[i].1.as_slice())
    }

    pub fn fields(&self) -> impl Iterator<Item = (u32, &str)> {
        self.fields.iter().map(|(t, v)| (*t, v.as_str()))
    }
}

fn compute_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u32, |acc, &b| acc + b as u32) as u8
}

/// Encode a [`Message`] into wire bytes. `msg.get(35)` is implied by
/// [`Message::msg_type`]; tags 49/56/34/52 must already be set by the
/// session's outbound send contract.
pub fn encode(msg: &Message, begin_string: &str) -> Result<Bytes, CodecError> {
    let mut body = Vec::new();
    push_field(&mut body, 35, &msg.msg_type);

    for tag in STANDARD_HEADER {
        let value = msg.get(tag).ok_or(CodecError::MissingField(tag))?;
        push_field(&mut body, tag, value);
    }

    for (tag, value) in &msg.fields {
        if STANDARD_HEADER.contains(tag) {
            continue;
        }
        push_field(&mut body, *tag, value);
    }

    for (count_tag, entries) in &msg.groups {
        push_field(&mut body, *count_tag, &entries.len().to_string());
        for entry in entries {
            for (tag, value) in entry {
                push_field(&mut body, *tag, value);
            }
        }
    }

    let mut out = Vec::with_capacity(body.len() + 32);
    push_field(&mut out, 8, begin_string);
    push_field(&mut out, 9, &body.len().to_string());
    out.extend_from_slice(&body);

    let checksum = compute_checksum(&out);
    push_field(&mut out, 10, &format!("{checksum:03}"));

    Ok(Bytes::from(out))
}

fn push_field(buf: &mut Vec<u8>, tag: u32, value: &str) {
    buf.extend_from_slice(tag.to_string().as_bytes());
    buf.push(b'=');
    buf.extend_from_slice(value.as_bytes());
    buf.push(SOH);
}

/// Decode exactly one complete, SOH-terminated FIX message.
pub fn decode(buf: &[u8], dict: &GroupDictionary) -> Result<Message, CodecError> {
    if buf.len() < TRAILER_LEN || !buf.ends_with(&[SOH]) {
        return Err(CodecError::MalformedFraming("message must end with SOH".into()));
    }

    let checksum_field_start = find_trailer_start(buf)
        .ok_or_else(|| CodecError::MalformedFraming("missing 10= trailer".into()))?;
    let checksum_region = &buf[..checksum_field_start + 1]; // include SOH before 10=
    let trailer = &buf[checksum_field_start + 1..buf.len() - 1];
    let trailer_str = std::str::from_utf8(trailer)
        .map_err(|_| CodecError::MalformedFraming("non-utf8 trailer".into()))?;
    let expected_cs: u8 = trailer_str
        .strip_prefix("10=")
        .ok_or_else(|| CodecError::MalformedFraming("missing 10= trailer".into()))?
        .parse()
        .map_err(|_| CodecError::MalformedFraming("non-numeric checksum".into()))?;
    let actual_cs = compute_checksum(checksum_region);
    if actual_cs != expected_cs {
        return Err(CodecError::BadChecksum { expected: expected_cs, computed: actual_cs });
    }

    let raw_fields = split_raw_fields(&buf[..checksum_field_start])?;
    let mut iter = raw_fields.into_iter().peekable();

    let (tag8, begin_string) = iter
        .next()
        .ok_or_else(|| CodecError::MalformedFraming("empty message".into()))?;
    if tag8 != 8 {
        return Err(CodecError::MalformedFraming("first field must be 8=BeginString".into()));
    }
    let _ = begin_string;

    let (tag9, body_len_str) = iter
        .next()
        .ok_or_else(|| CodecError::MalformedFraming("missing 9=BodyLength".into()))?;
    if tag9 != 9 {
        return Err(CodecError::MalformedFraming("second field must be 9=BodyLength".into()));
    }
    let body_len: usize = body_len_str
        .parse()
        .map_err(|_| CodecError::MalformedFraming("non-numeric BodyLength".into()))?;

    // BodyLength counts bytes strictly between the SOH after 9=... and the
    // SOH before 10=, i.e. everything this split covers after the 9 field.
    let computed_len: usize = iter
        .clone()
        .map(|(tag, value)| tag.to_string().len() + 1 + value.len() + 1)
        .sum();
    if computed_len != body_len {
        return Err(CodecError::BadBodyLength { header: body_len, computed: computed_len });
    }

    let (tag35, msg_type_str) = iter
        .next()
        .ok_or_else(|| CodecError::MalformedFraming("missing 35=MsgType".into()))?;
    if tag35 != 35 {
        return Err(CodecError::MalformedFraming("third field must be 35=MsgType".into()));
    }

    let mut msg = Message::new(msg_type_str);

    while let Some((tag, value)) = iter.next() {
        if let Some(members) = dict.members_of(tag) {
            let count: usize = value
                .parse()
                .map_err(|_| CodecError::MalformedFraming(format!("non-numeric group count for tag {tag}")))?;
            let delimiter = members[0];
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let mut entry = Vec::new();
                match iter.next() {
                    Some((t, v)) if t == delimiter => entry.push((t, v)),
                    Some((t, _)) => {
                        return Err(CodecError::MalformedFraming(format!(
                            "expected group delimiter tag {delimiter}, got {t}"
                        )))
                    }
                    None => return Err(CodecError::MalformedFraming("truncated group".into())),
                }
                while let Some(&(next_tag, _)) = iter.peek() {
                    if next_tag != delimiter && members.contains(&next_tag) {
                        entry.push(iter.next().unwrap());
                    } else {
                        break;
                    }
                }
                entries.push(entry);
            }
            msg.set_group(tag, entries);
        } else {
            msg.set(tag, value);
        }
    }

    Ok(msg)
}

/// Index of the SOH byte immediately preceding the trailing `10=NNN` field,
/// i.e. the last byte of the checksum-covered region. `buf` must end with
/// SOH (the trailer's own terminator).
fn find_trailer_start(buf: &[u8]) -> Option<usize> {
    let last_soh = buf.len() - 1;
    let soh_before_trailer = buf[..last_soh].iter().rposition(|&b| b == SOH)?;
    let trailer = &buf[soh_before_trailer + 1..last_soh];
    if trailer.starts_with(b"10=") {
        Some(soh_before_trailer)
    } else {
        None
    }
}

fn split_raw_fields(buf: &[u8]) -> Result<Vec<(u32, String)>, CodecError> {
    let s = std::str::from_utf8(buf).map_err(|_| CodecError::MalformedFraming("non-utf8 message".into()))?;
    s.split(SOH as char)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut it = part.splitn(2, '=');
            let tag = it.next().ok_or_else(|| CodecError::MalformedFraming("empty field".into()))?;
            let value = it.next().ok_or_else(|| CodecError::MalformedFraming(format!("field missing '=': {part}")))?;
            let tag: u32 = tag
                .parse()
                .map_err(|_| CodecError::MalformedFraming(format!("non-integer tag: {tag}")))?;
            Ok((tag, value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        let mut m = Message::new("A");
        m.set(49, "C");
        m.set(56, "S");
        m.set(34, "1");
        m.set(52, "20240101-00:00:00.000");
        m.set(98, "0");
        m.set(108, "30");
        m
    }

    #[test]
    fn encode_checksum_and_bodylength_are_correct() {
        let msg = sample();
        let bytes = encode(&msg, "FIX.4.2").unwrap();
        let s = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(s.starts_with("8=FIX.4.2\u{1}9="));
        assert!(s.ends_with("\u{1}"));
        assert!(s.contains("\u{1}10="));

        let dict = GroupDictionary::standard();
        let decoded = decode(&bytes, &dict).unwrap();
        assert_eq!(decoded.msg_type(), "A");
        assert_eq!(decoded.get(49), Some("C"));
        assert_eq!(decoded.get(108), Some("30"));
    }

    #[test]
    fn checksum_rolls_over_with_leading_zeros() {
        // 256 '1' bytes sum to 256*49 = 12544, 12544 % 256 = 0 -> "000"
        let buf = vec![b'1'; 256];
        assert_eq!(compute_checksum(&buf), 0);
        assert_eq!(format!("{:03}", compute_checksum(&buf)), "000");
    }

    #[test]
    fn decode_rejects_bad_checksum() {
        let msg = sample();
        let mut bytes = encode(&msg, "FIX.4.2").unwrap().to_vec();
        let len = bytes.len();
        // Corrupt the checksum digits (last field is "10=NNN\x01").
        bytes[len - 2] = b'9';
        let dict = GroupDictionary::standard();
        let err = decode(&bytes, &dict).unwrap_err();
        assert!(matches!(err, CodecError::BadChecksum { .. }));
    }

    #[test]
    fn decode_rejects_bad_bodylength() {
        // Correct checksum for these exact bytes, but a 9=BodyLength value
        // that doesn't match the actual body — must fail BadBodyLength, not
        // BadChecksum.
        let body = b"35=A\x0149=C\x0156=S\x0134=1\x0152=x\x01";
        let wrong_len = body.len() + 100;
        let mut msg_bytes = Vec::new();
        msg_bytes.extend_from_slice(b"8=FIX.4.2\x01");
        msg_bytes.extend_from_slice(format!("9={wrong_len}\x01").as_bytes());
        msg_bytes.extend_from_slice(body);
        let checksum = compute_checksum(&msg_bytes);
        msg_bytes.extend_from_slice(format!("10={checksum:03}\x01").as_bytes());

        let dict = GroupDictionary::standard();
        let err = decode(&msg_bytes, &dict).unwrap_err();
        assert!(matches!(err, CodecError::BadBodyLength { .. }));
    }

    #[test]
    fn round_trips_a_repeating_group() {
        let mut m = Message::new("D");
        m.set(49, "C");
        m.set(56, "S");
        m.set(34, "1");
        m.set(52, "20240101-00:00:00.000");
        m.set_group(
            73,
            vec![
                vec![(11, "ORD1".to_string()), (38, "100".to_string()), (54, "1".to_string()), (55, "AAPL".to_string())],
                vec![(11, "ORD2".to_string()), (38, "200".to_string()), (54, "2".to_string()), (55, "MSFT".to_string())],
            ],
        );
        let dict = GroupDictionary::standard();
        let bytes = encode(&m, "FIX.4.2").unwrap();
        let decoded = decode(&bytes, &dict).unwrap();
        let group = decoded.group(73).unwrap();
        assert_eq!(group.len(), 2);
        assert_eq!(group[0][0], (11, "ORD1".to_string()));
        assert_eq!(group[1][3], (55, "MSFT".to_string()));
    }

    #[test]
    fn unknown_group_tags_fall_through_as_flat_fields() {
        let mut m = Message::new("0");
        m.set(49, "C");
        m.set(56, "S");
        m.set(34, "1");
        m.set(52, "t");
        m.set(999, "3");
        let bytes = encode(&m, "FIX.4.2").unwrap();
        let dict = GroupDictionary::standard();
        let decoded = decode(&bytes, &dict).unwrap();
        assert_eq!(decoded.get(999), Some("3"));
    }
}
