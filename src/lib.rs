#![allow(clippy::collapsible_if)]

pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod extension;
pub mod language;
pub mod loader;
pub mod runtime;

pub use config::Config;
pub use engine::{Environment, GeneratorGuard, Template};
pub use extension::{Extension, ExtensionCall};
pub use loader::{FileSystemLoader, FnLoader, Loader, StringLoader};
pub use runtime::{RenderError, RenderResult, Value};

#[cfg(test)]
mod tests;
