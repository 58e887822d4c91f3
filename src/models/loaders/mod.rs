pub mod index_loader;

pub use index_loader::{load_expected_identifiers, load_work_items, parse_index, IndexLoad};
