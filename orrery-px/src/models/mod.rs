//! Data models for orrery-px

pub mod conversation;
pub mod document;
pub mod product;
pub mod session;

pub use conversation::{ConversationEntry, MessageKind, MessageRole, FINAL_BRIEFING_STEP};
pub use document::UploadedDocument;
pub use product::{ProductCatalog, ProductDefinition, ProductStep};
pub use session::{SessionRecord, StepAnswer};
