use crate::compiler::{compile_template, ir::Program, AsyncCompiler, NodeCompiler, SyncCompiler};
use crate::config::Config;
use crate::extension::Extension;
use crate::language::parser::parse_template;
use crate::loader::{FileSystemLoader, Loader};
use crate::runtime::{
    context::Context,
    error::{RenderError, RenderResult},
    executor::Executor,
    filters::{builtin_filters, Filter},
    frame::Frame,
    tracker::AsyncTracker,
    value::{CallArgs, Value},
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;
use tokio::task::LocalSet;

/// Loader, filters, globals, extensions and the code generator templates are compiled
/// with. Cloning shares all of it.
#[derive(Clone)]
pub struct Environment {
    inner: Rc<EnvironmentInner>,
}

struct EnvironmentInner {
    config: Config,
    loader: Option<Rc<dyn Loader>>,
    generator: RefCell<Rc<dyn NodeCompiler>>,
    filters: RefCell<HashMap<String, Filter>>,
    globals: RefCell<HashMap<String, Value>>,
    extensions: RefCell<Vec<Rc<dyn Extension>>>,
    cache: RefCell<HashMap<String, Rc<Program>>>,
}

impl Environment {
    /// Uses a [`FileSystemLoader`] when the config names a template root.
    pub fn new(config: Config) -> Self {
        let loader = config
            .template_root
            .clone()
            .map(|root| Rc::new(FileSystemLoader::new(root)) as Rc<dyn Loader>);
        Self::build(config, loader)
    }

    pub fn with_loader(config: Config, loader: impl Loader + 'static) -> Self {
        Self::build(config, Some(Rc::new(loader)))
    }

    fn build(config: Config, loader: Option<Rc<dyn Loader>>) -> Self {
        let generator: Rc<dyn NodeCompiler> = if config.async_mode {
            Rc::new(AsyncCompiler)
        } else {
            Rc::new(SyncCompiler)
        };
        Self {
            inner: Rc::new(EnvironmentInner {
                config,
                loader,
                generator: RefCell::new(generator),
                filters: RefCell::new(builtin_filters()),
                globals: RefCell::new(HashMap::new()),
                extensions: RefCell::new(Vec::new()),
                cache: RefCell::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn add_filter<F>(&self, name: impl Into<String>, filter: F)
    where
        F: Fn(Value, CallArgs) -> RenderResult<Value> + 'static,
    {
        self.inner
            .filters
            .borrow_mut()
            .insert(name.into(), Filter::sync(filter));
    }

    pub fn add_async_filter<F, Fut>(&self, name: impl Into<String>, filter: F)
    where
        F: Fn(Value, CallArgs) -> Fut + 'static,
        Fut: Future<Output = RenderResult<Value>> + 'static,
    {
        self.inner
            .filters
            .borrow_mut()
            .insert(name.into(), Filter::from_async(filter));
    }

    pub fn add_global(&self, name: impl Into<String>, value: Value) {
        self.inner.globals.borrow_mut().insert(name.into(), value);
    }

    /// Tags are looked up while parsing, so extensions must be added before the templates
    /// that use them are compiled.
    pub fn add_extension(&self, extension: impl Extension + 'static) {
        self.inner.extensions.borrow_mut().push(Rc::new(extension));
    }

    pub fn generator(&self) -> Rc<dyn NodeCompiler> {
        self.inner.generator.borrow().clone()
    }

    /// Replaces the code generator. Cached programs were built by the old one and are
    /// dropped.
    pub fn set_generator(&self, generator: impl NodeCompiler + 'static) {
        self.install(Rc::new(generator));
    }

    /// Installs `generator` until the returned guard is dropped.
    pub fn override_generator(&self, generator: impl NodeCompiler + 'static) -> GeneratorGuard {
        let previous = self.generator();
        self.install(Rc::new(generator));
        GeneratorGuard {
            env: self.clone(),
            previous: Some(previous),
        }
    }

    fn install(&self, generator: Rc<dyn NodeCompiler>) {
        tracing::debug!(mode = ?generator.mode(), "installing code generator");
        *self.inner.generator.borrow_mut() = generator;
        self.inner.cache.borrow_mut().clear();
    }

    pub(crate) fn filter(&self, name: &str) -> Option<Filter> {
        self.inner.filters.borrow().get(name).cloned()
    }

    pub(crate) fn global(&self, name: &str) -> Option<Value> {
        self.inner.globals.borrow().get(name).cloned()
    }

    pub(crate) fn extension(&self, tag: &str) -> Option<Rc<dyn Extension>> {
        self.inner
            .extensions
            .borrow()
            .iter()
            .find(|extension| extension.tags().contains(&tag))
            .cloned()
    }

    /// Parses and compiles `source` with the current generator. Not cached.
    pub fn compile_str(&self, name: &str, source: &str) -> RenderResult<Rc<Program>> {
        let extensions = self.inner.extensions.borrow().clone();
        let ast = parse_template(name, source, self.inner.config.lex_options(), &extensions)?;
        let program = compile_template(self.generator().as_ref(), &ast)?;
        Ok(Rc::new(program))
    }

    /// Compiled program for `name`, or `None` if the loader has no such template.
    pub(crate) async fn load_program(&self, name: &str) -> RenderResult<Option<Rc<Program>>> {
        if let Some(program) = self.inner.cache.borrow().get(name) {
            tracing::trace!(template = name, "template cache hit");
            return Ok(Some(program.clone()));
        }
        let Some(loader) = self.inner.loader.clone() else {
            return Ok(None);
        };
        let Some(source) = loader.load(name).resolve().await? else {
            return Ok(None);
        };
        tracing::debug!(template = name, bytes = source.source.len(), "loaded template");
        let program = self.compile_str(&source.name, &source.source)?;
        if self.inner.config.cache {
            self.inner
                .cache
                .borrow_mut()
                .insert(name.to_string(), program.clone());
        }
        Ok(Some(program))
    }

    pub async fn get_template(&self, name: &str) -> RenderResult<Template> {
        let program = self
            .load_program(name)
            .await?
            .ok_or_else(|| RenderError::TemplateNotFound {
                name: name.to_string(),
            })?;
        Ok(Template {
            env: self.clone(),
            program,
        })
    }

    pub async fn render<K, V>(
        &self,
        name: &str,
        vars: impl IntoIterator<Item = (K, V)>,
    ) -> RenderResult<String>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let vars = collect_vars(vars);
        LocalSet::new()
            .run_until(async move {
                let template = self.get_template(name).await?;
                template.render_local(vars).await
            })
            .await
    }

    pub async fn render_string<K, V>(
        &self,
        source: &str,
        vars: impl IntoIterator<Item = (K, V)>,
    ) -> RenderResult<String>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let template = Template {
            env: self.clone(),
            program: self.compile_str("(string)", source)?,
        };
        template.render(vars).await
    }
}

/// Restores the previous generator when dropped.
pub struct GeneratorGuard {
    env: Environment,
    previous: Option<Rc<dyn NodeCompiler>>,
}

impl Drop for GeneratorGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.env.install(previous);
        }
    }
}

/// A compiled template bound to its environment.
#[derive(Clone)]
pub struct Template {
    env: Environment,
    program: Rc<Program>,
}

impl Template {
    pub fn name(&self) -> &str {
        &self.program.name
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Renders on a local task set of its own; spawned blocks never outlive the call.
    pub async fn render<K, V>(&self, vars: impl IntoIterator<Item = (K, V)>) -> RenderResult<String>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let vars = collect_vars(vars);
        LocalSet::new().run_until(self.render_local(vars)).await
    }

    async fn render_local(&self, vars: HashMap<String, Value>) -> RenderResult<String> {
        let program = self.program.clone();
        tracing::debug!(template = %program.name, mode = ?program.mode, "render started");
        let executor = Executor::new(
            self.env.clone(),
            program.mode,
            Context::new(vars),
            AsyncTracker::new(),
        );
        let result = executor.run_template(program.clone(), Frame::root()).await;
        let result = executor.finish_scope(result).await;
        executor.teardown();
        let output = result.and_then(|buffer| buffer.flatten());
        match &output {
            Ok(text) => tracing::debug!(template = %program.name, bytes = text.len(), "render finished"),
            Err(error) => tracing::debug!(template = %program.name, %error, "render failed"),
        }
        output
    }
}

fn collect_vars<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> HashMap<String, Value>
where
    K: Into<String>,
    V: Into<Value>,
{
    vars.into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}
