pub mod llm_service;
pub mod result_writer;
pub mod validator;

pub use llm_service::LlmService;
pub use result_writer::ResultWriter;
pub use validator::{FieldLimit, ResultValidator, Schema};
