//! Constructors for the seven FIX 4.2 administrative message types, and the
//! predicate used to decide which MsgTypes the replay planner must collapse
//! into a Gap Fill rather than resend verbatim.

use std::fmt;

use crate::codec::{Message, SOH};

pub const MSG_TYPE_LOGON: &str = "A";
pub const MSG_TYPE_HEARTBEAT: &str = "0";
pub const MSG_TYPE_TEST_REQUEST: &str = "1";
pub const MSG_TYPE_REJECT: &str = "3";
pub const MSG_TYPE_SEQUENCE_RESET: &str = "4";
pub const MSG_TYPE_LOGOUT: &str = "5";
pub const MSG_TYPE_RESEND_REQUEST: &str = "2";

/// MsgTypes that §4.5 forbids resending verbatim; they are collapsed into a
/// Sequence Reset - Gap Fill by the replay planner instead.
pub fn is_admin_msg_type(msg_type: &str) -> bool {
    matches!(
        msg_type,
        MSG_TYPE_LOGON
            | MSG_TYPE_HEARTBEAT
            | MSG_TYPE_TEST_REQUEST
            | MSG_TYPE_RESEND_REQUEST
            | MSG_TYPE_SEQUENCE_RESET
            | MSG_TYPE_LOGOUT
    )
}

pub fn build_logon(heartbeat_interval_secs: u32, reset_seq_num: bool) -> Message {
    let mut msg = Message::new(MSG_TYPE_LOGON);
    msg.set(98, "0"); // EncryptMethod: none
    msg.set(108, heartbeat_interval_secs.to_string());
    if reset_seq_num {
        msg.set(141, "Y");
    }
    msg
}

pub fn build_heartbeat(test_req_id: Option<&str>) -> Message {
    let mut msg = Message::new(MSG_TYPE_HEARTBEAT);
    if let Some(id) = test_req_id {
        msg.set(112, id);
    }
    msg
}

pub fn build_test_request(test_req_id: &str) -> Message {
    let mut msg = Message::new(MSG_TYPE_TEST_REQUEST);
    msg.set(112, test_req_id);
    msg
}

pub fn build_logout(text: Option<&str>) -> Message {
    let mut msg = Message::new(MSG_TYPE_LOGOUT);
    if let Some(t) = text {
        msg.set(58, t);
    }
    msg
}

pub fn build_reject(ref_seq_num: u32, text: Option<&str>) -> Message {
    let mut msg = Message::new(MSG_TYPE_REJECT);
    if ref_seq_num > 0 {
        msg.set(45, ref_seq_num.to_string());
    }
    if let Some(t) = text {
        msg.set(58, t);
    }
    msg
}

pub fn build_resend_request(begin_seq_no: u32, end_seq_no: u32) -> Message {
    let mut msg = Message::new(MSG_TYPE_RESEND_REQUEST);
    msg.set(7, begin_seq_no.to_string());
    msg.set(16, end_seq_no.to_string());
    msg
}

pub fn build_sequence_reset(new_seq_no: u32, gap_fill: bool) -> Message {
    let mut msg = Message::new(MSG_TYPE_SEQUENCE_RESET);
    msg.set(36, new_seq_no.to_string());
    if gap_fill {
        msg.set(123, "Y");
    }
    msg
}

/// Renders raw FIX bytes with SOH shown as `|`, for human-readable trace
/// logging (mirrors the original prototype's `raw.replace(SOH, '|')`).
pub struct PipeDelimited<'a>(pub &'a [u8]);

impl fmt::Display for PipeDelimited<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in self.0 {
            if b == SOH {
                f.write_str("|")?;
            } else {
                f.write_char(b as char)?;
            }
        }
        Ok(())
    }
}

use std::fmt::Write as _;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_admin_message_types() {
        for t in ["A", "0", "1", "2", "4", "5"] {
            assert!(is_admin_msg_type(t), "{t} should be admin");
        }
        for t in ["D", "8", "6", "9"] {
            assert!(!is_admin_msg_type(t), "{t} should not be admin");
        }
    }

    #[test]
    fn pipe_delimited_renders_soh_as_pipe() {
        let raw = b"8=FIX.4.2\x019=5\x0135=0\x01";
        assert_eq!(PipeDelimited(raw).to_string(), "8=FIX.4.2|9=5|35=0|");
    }
}
