/// Immutable identity of a FIX session, used as the key for all persisted
/// state (`session_<sender>.json`, `messages_<sender>.jsonl`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionIdentity {
    pub sender_comp_id: String,
    pub target_comp_id: String,
    pub begin_string: String,
}

impl SessionIdentity {
    pub fn new(
        sender_comp_id: impl Into<String>,
        target_comp_id: impl Into<String>,
    ) -> Self {
        Self {
            sender_comp_id: sender_comp_id.into(),
            target_comp_id: target_comp_id.into(),
            begin_string: "FIX.4.2".to_string(),
        }
    }

    /// Filesystem-safe stem used to name persisted state files, keyed by
    /// `sender_comp_id` per the external interface contract.
    pub fn file_key(&self) -> String {
        sanitize(&self.sender_comp_id)
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
