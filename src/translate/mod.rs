pub mod content;
pub mod models;
pub mod request;
pub mod thinking;
pub mod tools;
pub mod wire;

pub use models::ChatRequest;
pub use request::{translate_request, TranslatedRequest};
pub use tools::ToolNameMap;
