pub mod message;
pub mod sequence;

pub use message::{FileMessageStore, MessageStore, StorageConfig};
pub use sequence::{SequenceState, SequenceStore};
