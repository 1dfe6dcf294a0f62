//! Media entry processing: resource resolution, resizer service clients and
//! the status-reporting processing boundary consumed by the worker.

pub mod error;
pub mod processor;
pub mod resizer;
pub mod resource;

pub use error::{ProcessorError, ProcessorResult};
pub use processor::{status, EntryProcessor, MediaEntryProcessor, ProcessorConfig};
pub use resizer::{ResizeOptions, ResizerClient};
pub use resource::{resolve_source, resolve_target, MediaResource};
