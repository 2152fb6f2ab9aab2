pub mod buffer;
pub mod context;
pub mod error;
pub mod executor;
pub mod filters;
pub mod frame;
pub mod tracker;
pub mod value;

pub use error::{RenderError, RenderResult};
pub use value::Value;
