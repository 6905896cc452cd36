pub mod use_cases;

pub use use_cases::chat_pipeline::{ChatPipeline, PipelineOptions};
pub use use_cases::conversation_service::ConversationService;
