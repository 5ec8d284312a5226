pub mod blob;
pub mod error;
pub mod ids;
pub mod store;
pub mod types;

pub use blob::{DurableBlob, JsonFileBlob};
pub use error::{StorageError, StorageResult};
pub use ids::SessionId;
pub use store::{SessionStore, StoreChange};
pub use types::{
    DEFAULT_SESSION_TITLE, MessageRecord, MessageRole, SessionRecord, TITLE_PREFIX_CHARS,
    TokenUsage,
};
