pub mod error;
pub mod loader;
pub mod options;
pub mod tpl;
pub mod value;
pub mod view_engine;

pub use error::TemplateError;
pub use loader::{FsLoader, MemoryLoader, TemplateLoader};
pub use options::ViewOptions;
pub use tpl::cache::{CacheStats, Template};
pub use value::{Value, to_value};
pub use view_engine::ViewEngine;
