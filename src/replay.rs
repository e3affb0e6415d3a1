//! Pure planning logic for answering an inbound Resend Request (§4.5).
//!
//! Kept free of I/O and sockets so the gap-fill collapsing logic can be
//! unit-tested directly against a small in-memory log.

use bytes::Bytes;

use crate::admin::is_admin_msg_type;
use crate::codec::{self, GroupDictionary};

/// One unit of work the session actor must perform to satisfy a Resend
/// Request, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayAction {
    /// Resend the stored bytes for `seq`, with PossDupFlag injected and
    /// SendingTime refreshed by the caller.
    Resend { seq: u32, raw: Bytes },
    /// Collapse an administrative or missing range into a Gap Fill whose
    /// own MsgSeqNum is `gap_start`, advancing the peer's expectation to
    /// `new_seq_no`.
    GapFill { gap_start: u32, new_seq_no: u32 },
}

/// Build the ordered replay plan for `[begin, end]` (inclusive). `end == 0`
/// means "through the last entry in `log`". `log` holds every outbound
/// entry on file for this session, already sorted by sequence number.
pub fn plan(begin: u32, end: u32, log: &[(u32, Bytes)], dict: &GroupDictionary) -> Vec<ReplayAction> {
    let actual_end = if end == 0 {
        log.last().map(|(seq, _)| *seq).unwrap_or(begin.saturating_sub(1))
    } else {
        end
    };
    if begin > actual_end {
        return Vec::new();
    }

    let mut by_seq = std::collections::BTreeMap::new();
    for (seq, raw) in log {
        if *seq >= begin && *seq <= actual_end {
            by_seq.insert(*seq, raw.clone());
        }
    }

    let mut actions = Vec::new();
    let mut seq = begin;
    let mut gap_start: Option<u32> = None;

    while seq <= actual_end {
        let resendable = by_seq.get(&seq).and_then(|raw| {
            let decoded = codec::decode(raw, dict).ok()?;
            (!is_admin_msg_type(decoded.msg_type())).then(|| raw.clone())
        });

        match resendable {
            Some(raw) => {
                if let Some(start) = gap_start.take() {
                    actions.push(ReplayAction::GapFill { gap_start: start, new_seq_no: seq });
                }
                actions.push(ReplayAction::Resend { seq, raw });
            }
            None => {
                if gap_start.is_none() {
                    gap_start = Some(seq);
                }
            }
        }
        seq += 1;
    }

    if let Some(start) = gap_start {
        actions.push(ReplayAction::GapFill { gap_start: start, new_seq_no: actual_end + 1 });
    }

    actions
}
