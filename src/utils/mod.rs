pub mod logging;

pub use logging::{init_logger, truncate_text};
