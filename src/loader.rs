use crate::runtime::error::{RenderError, RenderResult};
use futures::future::{FutureExt, LocalBoxFuture};
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

#[derive(Clone, Debug)]
pub struct TemplateSource {
    pub name: String,
    pub source: String,
}

/// Result of a lookup: either known right away or still loading. `Ok(None)` means the
/// loader has no template under that name.
pub enum Loaded {
    Ready(RenderResult<Option<TemplateSource>>),
    Pending(LocalBoxFuture<'static, RenderResult<Option<TemplateSource>>>),
}

impl Loaded {
    pub async fn resolve(self) -> RenderResult<Option<TemplateSource>> {
        match self {
            Loaded::Ready(result) => result,
            Loaded::Pending(future) => future.await,
        }
    }
}

pub trait Loader {
    fn load(&self, name: &str) -> Loaded;
}

/// Templates held in memory.
#[derive(Default)]
pub struct StringLoader {
    templates: RefCell<HashMap<String, String>>,
}

impl StringLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.add_template(name, source);
        self
    }

    pub fn add_template(&self, name: impl Into<String>, source: impl Into<String>) {
        self.templates
            .borrow_mut()
            .insert(name.into(), source.into());
    }
}

impl Loader for StringLoader {
    fn load(&self, name: &str) -> Loaded {
        let source = self.templates.borrow().get(name).map(|source| TemplateSource {
            name: name.to_string(),
            source: source.clone(),
        });
        Loaded::Ready(Ok(source))
    }
}

/// Reads templates below `root` with `tokio::fs`.
#[derive(Clone, Debug)]
pub struct FileSystemLoader {
    root: PathBuf,
}

impl FileSystemLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Names are relative paths; anything that would leave the root is rejected.
    fn resolve_path(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name);
        let contained = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        contained.then(|| self.root.join(relative))
    }
}

impl Loader for FileSystemLoader {
    fn load(&self, name: &str) -> Loaded {
        let Some(path) = self.resolve_path(name) else {
            tracing::warn!(template = name, "template path escapes the loader root");
            return Loaded::Ready(Ok(None));
        };
        let name = name.to_string();
        Loaded::Pending(
            async move {
                match tokio::fs::read_to_string(&path).await {
                    Ok(source) => Ok(Some(TemplateSource { name, source })),
                    Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
                    Err(err) => Err(RenderError::Io {
                        name,
                        message: err.to_string(),
                    }),
                }
            }
            .boxed_local(),
        )
    }
}

/// Loader backed by a closure returning a future.
pub struct FnLoader<F> {
    load: F,
}

impl<F, Fut> FnLoader<F>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = RenderResult<Option<String>>> + 'static,
{
    pub fn new(load: F) -> Self {
        Self { load }
    }
}

impl<F, Fut> Loader for FnLoader<F>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = RenderResult<Option<String>>> + 'static,
{
    fn load(&self, name: &str) -> Loaded {
        let future = (self.load)(name.to_string());
        let name = name.to_string();
        Loaded::Pending(
            async move {
                Ok(future
                    .await?
                    .map(|source| TemplateSource { name, source }))
            }
            .boxed_local(),
        )
    }
}
