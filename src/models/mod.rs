pub mod concept;
pub mod loaders;
pub mod work_item;

pub use concept::{FieldMap, RawResult, ValidatedResult};
pub use loaders::{load_expected_identifiers, load_work_items};
pub use work_item::{is_remote, partition, Batch, WorkItem};
