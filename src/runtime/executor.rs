use crate::compiler::ir::{BinaryKind, Block, Capture, CompileMode, Dispatch, ForLoop, Instr, Op, Origin, Program};
use crate::engine::Environment;
use crate::extension::ExtensionCall;
use crate::runtime::{
    buffer::{Buffer, Finalizer, SlotValue},
    context::Context,
    error::{RenderError, RenderResult},
    filters::escape_html,
    frame::Frame,
    tracker::AsyncTracker,
    value::{AsyncValue, CallArgs, Fragment, MacroValue, Value},
};
use futures::future::{FutureExt, LocalBoxFuture};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

/// Runs compiled instructions for one render scope.
///
/// Cloning is cheap; a clone shares the render context and the registry of the scope it
/// was taken from. Frames and output buffers are passed explicitly to every call, so a
/// spawned block carries exactly the scope it was started with.
#[derive(Clone)]
pub struct Executor {
    env: Environment,
    mode: CompileMode,
    autoescape: bool,
    context: Context,
    tracker: AsyncTracker,
    block: Option<BlockCursor>,
    /// Set by `extends`; the parent renders once the child body is done.
    parent: Rc<RefCell<Option<Rc<Program>>>>,
    render: Rc<RenderScope>,
}

#[derive(Clone)]
struct BlockCursor {
    name: String,
    level: usize,
}

/// Contexts created during one top-level render, released by [`Executor::teardown`].
#[derive(Default)]
struct RenderScope {
    contexts: RefCell<Vec<Context>>,
}

impl Executor {
    pub fn new(env: Environment, mode: CompileMode, context: Context, tracker: AsyncTracker) -> Self {
        let render = Rc::new(RenderScope::default());
        render.contexts.borrow_mut().push(context.clone());
        Self {
            autoescape: env.config().autoescape,
            env,
            mode,
            context,
            tracker,
            block: None,
            parent: Rc::new(RefCell::new(None)),
            render,
        }
    }

    /// Same render, fresh registry: the scope waits only for work it started itself.
    fn nested(&self) -> Executor {
        Executor {
            tracker: AsyncTracker::new(),
            ..self.clone()
        }
    }

    /// Scope for another template rendered inside this one (include, import).
    fn for_template(&self, context: Context, mode: CompileMode) -> Executor {
        self.render.contexts.borrow_mut().push(context.clone());
        Executor {
            mode,
            context,
            tracker: AsyncTracker::new(),
            block: None,
            parent: Rc::new(RefCell::new(None)),
            ..self.clone()
        }
    }

    fn in_block(&self, name: &str, level: usize) -> Executor {
        Executor {
            block: Some(BlockCursor {
                name: name.to_string(),
                level,
            }),
            ..self.clone()
        }
    }

    pub fn tracker(&self) -> &AsyncTracker {
        &self.tracker
    }

    /// Breaks the reference cycles macros create through their defining context.
    pub fn teardown(&self) {
        let contexts = std::mem::take(&mut *self.render.contexts.borrow_mut());
        for context in contexts {
            context.clear();
        }
    }

    /// Renders `program` and, if it extends another template, each parent in turn.
    /// Child output outside of blocks is discarded once a parent is set.
    pub async fn run_template(&self, program: Rc<Program>, frame: Frame) -> RenderResult<Buffer> {
        self.context.add_blocks(&program.blocks);
        let mut buffer = Buffer::new();
        self.exec_block(program.body.clone(), frame.clone(), buffer.clone())
            .await?;
        loop {
            let parent = self.parent.borrow_mut().take();
            let Some(parent) = parent else {
                return Ok(buffer);
            };
            tracing::debug!(template = %program.name, parent = %parent.name, "rendering parent template");
            buffer = Buffer::new();
            self.exec_block(parent.body.clone(), frame.clone(), buffer.clone())
                .await?;
        }
    }

    /// Records a main-flow failure, waits for every tracked block, and reports the
    /// earliest error seen in this scope.
    pub async fn finish_scope<T>(&self, result: RenderResult<T>) -> RenderResult<T> {
        if let Err(err) = &result {
            self.tracker.record_error(err.clone());
        }
        self.tracker.wait_all().await;
        match self.tracker.first_error() {
            Some(err) => Err(err),
            None => result,
        }
    }

    async fn render_scope(&self, body: Block, frame: Frame) -> RenderResult<Buffer> {
        let buffer = Buffer::new();
        let result = self.exec_block(body, frame, buffer.clone()).await;
        self.finish_scope(result.map(|_| buffer)).await
    }

    pub fn exec_block(
        &self,
        body: Block,
        frame: Frame,
        out: Buffer,
    ) -> LocalBoxFuture<'static, RenderResult<()>> {
        let this = self.clone();
        async move {
            for instr in body.iter() {
                this.exec(instr, &frame, &out).await?;
            }
            Ok(())
        }
        .boxed_local()
    }

    async fn exec(&self, instr: &Instr, frame: &Frame, out: &Buffer) -> RenderResult<()> {
        match instr {
            Instr::Text(text) => {
                out.append_literal(text);
                Ok(())
            }
            Instr::Emit { value, origin } => {
                let value = self.eval(value, frame).await?;
                self.write_value(out, value, origin)
            }
            Instr::Async(block) => {
                let frame = match block.capture {
                    Capture::Snapshot => frame.snapshot(),
                    Capture::Live => frame.clone(),
                };
                self.spawn_block(block.body.clone(), frame, out);
                Ok(())
            }
            Instr::If {
                cond,
                body,
                else_body,
            } => {
                let cond = self.eval(cond, frame).await?;
                let cond = self.concrete(cond, "condition")?;
                if cond.is_truthy() {
                    self.exec_block(body.clone(), frame.clone(), out.clone())
                        .await
                } else if let Some(else_body) = else_body {
                    self.exec_block(else_body.clone(), frame.clone(), out.clone())
                        .await
                } else {
                    Ok(())
                }
            }
            Instr::For(for_loop) => self.exec_for(for_loop, frame, out).await,
            Instr::Set { targets, value } => {
                let value = self.eval(value, frame).await?;
                for target in targets {
                    self.bind(frame, target, value.clone());
                }
                Ok(())
            }
            Instr::Capture { target, body } => {
                let scope = self.nested();
                let body = body.clone();
                let inner = frame.child();
                let value = self
                    .scope_value(
                        async move {
                            let buffer = scope.render_scope(body, inner).await?;
                            Ok(Value::Fragment(Fragment { buffer, safe: true }))
                        }
                        .boxed_local(),
                    )
                    .await?;
                self.bind(frame, target, value);
                Ok(())
            }
            Instr::Macro(def) => {
                let closure = (!frame.is_top_level()).then(|| frame.snapshot());
                let value = Value::Macro(MacroValue {
                    def: def.clone(),
                    closure,
                    scope: self.clone(),
                });
                self.bind(frame, &def.name, value);
                Ok(())
            }
            Instr::Include {
                template,
                ignore_missing,
            } => {
                let name = self.eval(template, frame).await?;
                let name = self.template_name(name)?;
                let program = match self.env.load_program(&name).await? {
                    Some(program) => program,
                    None if *ignore_missing => {
                        tracing::debug!(template = %name, "skipping missing include");
                        return Ok(());
                    }
                    None => return Err(RenderError::TemplateNotFound { name }),
                };
                let context = Context::new(self.context.variables());
                let scope = self.for_template(context, program.mode);
                let result = scope.run_template(program, frame.child()).await;
                let buffer = scope.finish_scope(result).await?;
                out.append(SlotValue::Nested(buffer));
                Ok(())
            }
            Instr::Import { template, alias } => {
                let (_, exports) = self.import(template, frame).await?;
                self.bind(frame, alias, Value::from(exports));
                Ok(())
            }
            Instr::FromImport { template, names } => {
                let (name, exports) = self.import(template, frame).await?;
                for (exported, alias) in names {
                    let Some(value) = exports.get(exported) else {
                        return Err(RenderError::ImportMissing {
                            name: exported.clone(),
                            template: name,
                        });
                    };
                    self.bind(frame, alias, value.clone());
                }
                Ok(())
            }
            Instr::Extends(template) => {
                let name = self.eval(template, frame).await?;
                let name = self.template_name(name)?;
                let program = self
                    .env
                    .load_program(&name)
                    .await?
                    .ok_or(RenderError::TemplateNotFound { name })?;
                self.context.add_blocks(&program.blocks);
                *self.parent.borrow_mut() = Some(program);
                Ok(())
            }
            Instr::Block(name) => {
                if self.block.is_none() && self.parent.borrow().is_some() {
                    return Ok(());
                }
                let body = self
                    .context
                    .block(name, 0)
                    .ok_or_else(|| RenderError::custom(format!("Unknown block `{name}`")))?;
                self.in_block(name, 0)
                    .exec_block(body, frame.child(), out.clone())
                    .await
            }
            Instr::FilterBlock {
                filter,
                args,
                kwargs,
                body,
                origin,
            } => {
                let buffer = self.nested().render_scope(body.clone(), frame.child()).await?;
                let input = Value::Safe(buffer.flatten()?);
                let args = self.eval_args(args, kwargs, frame).await?;
                let value = self.apply_filter(filter, input, args).await?;
                let value = self.settled(value, &origin.name).await?;
                self.write_value(out, value, origin)
            }
            Instr::Extension {
                tag,
                args,
                kwargs,
                body,
                origin,
            } => {
                let extension = self
                    .env
                    .extension(tag)
                    .ok_or_else(|| RenderError::UnknownExtension { tag: tag.clone() })?;
                let args = self.eval_args(args, kwargs, frame).await?;
                let body = match body {
                    Some(body) => {
                        let buffer = self.nested().render_scope(body.clone(), frame.child()).await?;
                        Some(Value::Fragment(Fragment { buffer, safe: true }))
                    }
                    None => None,
                };
                let call = ExtensionCall {
                    tag: tag.clone(),
                    args: args.positional,
                    kwargs: args.keyword.into_iter().collect(),
                    body,
                };
                let value = self.settle(extension.run(call));
                let value = self.settled(value?, &origin.name).await?;
                self.write_value(out, value, origin)
            }
        }
    }

    async fn exec_for(&self, for_loop: &ForLoop, frame: &Frame, out: &Buffer) -> RenderResult<()> {
        let iterable = self.eval(&for_loop.iter, frame).await?;
        let iterable = self.concrete(iterable, "loop target")?;
        let (items, keyed) = match iterable {
            Value::List(items) => (items.as_ref().clone(), false),
            Value::Map(entries) => (
                entries
                    .iter()
                    .map(|(key, value)| Value::list(vec![Value::from(key.as_str()), value.clone()]))
                    .collect(),
                true,
            ),
            Value::String(s) | Value::Safe(s) => (
                s.chars().map(|ch| Value::String(ch.to_string())).collect(),
                false,
            ),
            Value::Undefined | Value::None => (Vec::new(), false),
            other => {
                return Err(RenderError::type_mismatch(format!(
                    "cannot iterate over {}",
                    other.type_name()
                )))
            }
        };

        if items.is_empty() {
            if let Some(else_body) = &for_loop.else_body {
                return self
                    .exec_block(else_body.clone(), frame.clone(), out.clone())
                    .await;
            }
            return Ok(());
        }

        let length = items.len();
        let parent = frame.lookup("loop");
        for (index, item) in items.into_iter().enumerate() {
            let iteration = frame.child();
            bind_targets(&iteration, &for_loop.targets, item, keyed);
            iteration.set("loop", loop_value(index, length, parent.clone()));
            match for_loop.dispatch {
                Dispatch::Inline => {
                    self.exec_block(for_loop.body.clone(), iteration, out.clone())
                        .await?
                }
                Dispatch::Async => self.spawn_block(for_loop.body.clone(), iteration, out),
            }
        }
        Ok(())
    }

    /// Buffered-async-block: reserve a slot now, fill it from a tracked task.
    fn spawn_block(&self, body: Block, frame: Frame, out: &Buffer) {
        let slot = out.reserve_slot();
        let child = Buffer::new();
        let out = out.clone();
        let this = self.clone();
        self.tracker.spawn(async move {
            let result = this.exec_block(body, frame, child.clone()).await;
            out.write_slot(slot, SlotValue::Nested(child));
            result
        });
    }

    fn eval<'a>(&'a self, op: &'a Op, frame: &'a Frame) -> LocalBoxFuture<'a, RenderResult<Value>> {
        async move {
            match op {
                Op::Const(value) => Ok(value.clone()),
                Op::Symbol(name) => Ok(self.lookup(name, frame)),
                Op::Lookup { target, key } => {
                    let target = self.eval(target, frame).await?;
                    let target = self.concrete(target, "lookup target")?;
                    let key = self.eval(key, frame).await?;
                    let key = self.concrete(key, "lookup key")?;
                    Ok(target.get_member(&key))
                }
                Op::Call {
                    name,
                    callee,
                    args,
                    kwargs,
                } => {
                    let callee = self.eval(callee, frame).await?;
                    let callee = self.concrete(callee, name)?;
                    let args = self.eval_args(args, kwargs, frame).await?;
                    self.call(name, callee, args).await
                }
                Op::Filter {
                    name,
                    input,
                    args,
                    kwargs,
                } => {
                    let input = self.eval(input, frame).await?;
                    let input = self.concrete(input, name)?;
                    let args = self.eval_args(args, kwargs, frame).await?;
                    self.apply_filter(name, input, args).await
                }
                Op::Not(operand) => {
                    let value = self.eval_concrete(operand, frame).await?;
                    Ok(Value::Bool(!value.is_truthy()))
                }
                Op::Neg(operand) => match self.eval_concrete(operand, frame).await? {
                    Value::Int(i) => i
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| RenderError::type_mismatch("integer overflow")),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    other => Err(RenderError::type_mismatch(format!(
                        "cannot negate {}",
                        other.type_name()
                    ))),
                },
                Op::Pos(operand) => match self.eval_concrete(operand, frame).await? {
                    value @ (Value::Int(_) | Value::Float(_)) => Ok(value),
                    other => Err(RenderError::type_mismatch(format!(
                        "unary `+` expects a number, found {}",
                        other.type_name()
                    ))),
                },
                Op::And(left, right) => {
                    let left = self.eval_concrete(left, frame).await?;
                    if !left.is_truthy() {
                        return Ok(left);
                    }
                    self.eval_concrete(right, frame).await
                }
                Op::Or(left, right) => {
                    let left = self.eval_concrete(left, frame).await?;
                    if left.is_truthy() {
                        return Ok(left);
                    }
                    self.eval_concrete(right, frame).await
                }
                Op::Binary { op, left, right } => {
                    let left = self.eval_concrete(left, frame).await?;
                    let right = self.eval_concrete(right, frame).await?;
                    binary(*op, left, right)
                }
                Op::InlineIf {
                    cond,
                    then,
                    otherwise,
                } => {
                    if self.eval_concrete(cond, frame).await?.is_truthy() {
                        self.eval(then, frame).await
                    } else if let Some(otherwise) = otherwise {
                        self.eval(otherwise, frame).await
                    } else {
                        Ok(Value::Undefined)
                    }
                }
                Op::List(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval(item, frame).await?);
                    }
                    Ok(Value::list(values))
                }
                Op::Dict(pairs) => {
                    let mut entries = BTreeMap::new();
                    for (key, value) in pairs {
                        let key = self.eval_concrete(key, frame).await?.to_string();
                        entries.insert(key, self.eval(value, frame).await?);
                    }
                    Ok(Value::from(entries))
                }
                Op::Caller(def) => Ok(Value::Macro(MacroValue {
                    def: def.clone(),
                    closure: Some(frame.snapshot()),
                    scope: self.clone(),
                })),
                Op::Super(name) => self.render_super(name, frame).await,
                Op::Resolve(inner) => self.eval(inner, frame).await?.resolve().await,
            }
        }
        .boxed_local()
    }

    async fn eval_concrete(&self, op: &Op, frame: &Frame) -> RenderResult<Value> {
        let value = self.eval(op, frame).await?;
        self.concrete(value, "operand")
    }

    async fn eval_args(
        &self,
        args: &[Op],
        kwargs: &[(String, Op)],
        frame: &Frame,
    ) -> RenderResult<CallArgs> {
        let mut call = CallArgs::default();
        for arg in args {
            let value = self.eval(arg, frame).await?;
            call.positional.push(self.concrete(value, "argument")?);
        }
        for (name, arg) in kwargs {
            let value = match arg {
                // `caller` stays a macro value
                Op::Caller(_) => self.eval(arg, frame).await?,
                _ => {
                    let value = self.eval(arg, frame).await?;
                    self.concrete(value, name)?
                }
            };
            call.keyword.push((name.clone(), value));
        }
        Ok(call)
    }

    fn lookup(&self, name: &str, frame: &Frame) -> Value {
        frame
            .lookup(name)
            .or_else(|| self.context.lookup(name))
            .or_else(|| self.env.global(name))
            .unwrap_or(Value::Undefined)
    }

    fn bind(&self, frame: &Frame, name: &str, value: Value) {
        if frame.is_top_level() {
            self.context.set(name, value.clone());
            self.context.add_export(name);
        }
        frame.set(name, value);
    }

    /// Settles a value without suspending. Pending work at this point means the value
    /// reached a consumer that was not compiled to await it.
    fn concrete(&self, value: Value, name: &str) -> RenderResult<Value> {
        match value.resolve_now() {
            Some(result) => result,
            None => Err(RenderError::UnresolvedAsync {
                name: name.to_string(),
            }),
        }
    }

    async fn settled(&self, value: Value, name: &str) -> RenderResult<Value> {
        match self.mode {
            CompileMode::Async => value.resolve().await,
            CompileMode::Sync => self.concrete(value, name),
        }
    }

    /// Finished results are returned as they are. Otherwise the work becomes a pending
    /// value; in async mode it is also tracked so a failure is never dropped.
    fn settle(&self, future: LocalBoxFuture<'static, RenderResult<Value>>) -> RenderResult<Value> {
        let shared = future.shared();
        if let Some(result) = shared.clone().now_or_never() {
            return result;
        }
        if self.mode == CompileMode::Async {
            let watcher = shared.clone();
            self.tracker.spawn(async move { watcher.await.map(|_| ()) });
        }
        Ok(Value::Pending(AsyncValue(shared)))
    }

    /// Nested scopes (macro bodies, captures, `super()`) finish in line in sync mode
    /// and become pending values in async mode.
    async fn scope_value(
        &self,
        future: LocalBoxFuture<'static, RenderResult<Value>>,
    ) -> RenderResult<Value> {
        match self.mode {
            CompileMode::Sync => future.await,
            CompileMode::Async => self.settle(future),
        }
    }

    async fn call(&self, name: &str, callee: Value, args: CallArgs) -> RenderResult<Value> {
        match callee {
            Value::Function(function) => self.settle((function.func)(args)),
            Value::Macro(mac) => self.scope_value(call_macro(mac, args)).await,
            Value::Undefined | Value::None => Err(RenderError::NotCallable {
                name: name.to_string(),
            }),
            other => Err(RenderError::NotCallable {
                name: format!("{name} ({})", other.type_name()),
            }),
        }
    }

    async fn apply_filter(&self, name: &str, input: Value, args: CallArgs) -> RenderResult<Value> {
        let filter = self
            .env
            .filter(name)
            .ok_or_else(|| RenderError::UnknownFilter {
                name: name.to_string(),
            })?;
        self.settle(filter.apply(input, args))
    }

    async fn render_super(&self, name: &str, frame: &Frame) -> RenderResult<Value> {
        let level = match &self.block {
            Some(cursor) if cursor.name == name => cursor.level + 1,
            _ => 1,
        };
        let body = self.context.block(name, level).ok_or_else(|| {
            RenderError::custom(format!("No parent definition of block `{name}` for super()"))
        })?;
        let scope = self.in_block(name, level).nested();
        let inner = frame.child();
        self.scope_value(
            async move {
                let buffer = scope.render_scope(body, inner).await?;
                Ok(Value::Fragment(Fragment { buffer, safe: true }))
            }
            .boxed_local(),
        )
        .await
    }

    async fn import(&self, template: &Op, frame: &Frame) -> RenderResult<(String, BTreeMap<String, Value>)> {
        let name = self.eval(template, frame).await?;
        let name = self.template_name(name)?;
        let program = self
            .env
            .load_program(&name)
            .await?
            .ok_or_else(|| RenderError::TemplateNotFound { name: name.clone() })?;
        let context = Context::new(HashMap::new());
        let scope = self.for_template(context.clone(), program.mode);
        let result = scope.run_template(program, Frame::root()).await;
        scope.finish_scope(result).await?;
        Ok((name, context.exported()))
    }

    fn template_name(&self, value: Value) -> RenderResult<String> {
        match self.concrete(value, "template name")? {
            Value::String(name) | Value::Safe(name) => Ok(name),
            other => Err(RenderError::type_mismatch(format!(
                "template name must be a string, found {}",
                other.type_name()
            ))),
        }
    }

    /// Output step: undefined check, then escaping per the autoescape flag this scope
    /// was created with.
    fn write_value(&self, out: &Buffer, value: Value, origin: &Origin) -> RenderResult<()> {
        let value = self.concrete(value, &origin.name)?;
        if value.is_none_or_undefined() {
            if self.env.config().throw_on_undefined {
                return Err(RenderError::UndefinedValue {
                    name: origin.name.clone(),
                    line: origin.line,
                    column: origin.column,
                });
            }
            return Ok(());
        }
        match value {
            Value::Fragment(fragment) if fragment.safe || !self.autoescape => {
                out.append(SlotValue::Nested(fragment.buffer));
            }
            Value::Fragment(fragment) => {
                let escape: Finalizer = Rc::new(|text: String| escape_html(&text));
                out.append(SlotValue::Finalized(fragment.buffer, escape));
            }
            Value::Safe(text) => out.append(SlotValue::Text(text)),
            other if self.autoescape => out.append(SlotValue::Text(escape_html(&other.to_string()))),
            other => out.append(SlotValue::Text(other.to_string())),
        }
        Ok(())
    }
}

fn call_macro(mac: MacroValue, args: CallArgs) -> LocalBoxFuture<'static, RenderResult<Value>> {
    let scope = mac.scope.nested();
    async move {
        let frame = match &mac.closure {
            Some(closure) => closure.child(),
            None => Frame::isolated(),
        };
        let mut positional = args.positional.into_iter();
        let mut keyword = args.keyword;
        for (param, default) in &mac.def.params {
            let value = match positional.next() {
                Some(value) => value,
                None => match take_kwarg(&mut keyword, param) {
                    Some(value) => value,
                    None => match default {
                        Some(op) => scope.eval(op, &frame).await?,
                        None => Value::Undefined,
                    },
                },
            };
            frame.set(param.clone(), value);
        }
        if let Some(caller) = take_kwarg(&mut keyword, "caller") {
            frame.set("caller", caller);
        }
        let buffer = scope.render_scope(mac.def.body.clone(), frame).await?;
        Ok(Value::Fragment(Fragment { buffer, safe: true }))
    }
    .boxed_local()
}

fn take_kwarg(keyword: &mut Vec<(String, Value)>, name: &str) -> Option<Value> {
    let index = keyword.iter().position(|(key, _)| key == name)?;
    Some(keyword.remove(index).1)
}

fn bind_targets(frame: &Frame, targets: &[String], item: Value, keyed: bool) {
    if let [target] = targets {
        let value = match (&item, keyed) {
            (Value::List(pair), true) => pair.first().cloned().unwrap_or(Value::Undefined),
            _ => item,
        };
        frame.set(target.clone(), value);
        return;
    }
    match item {
        Value::List(parts) => {
            for (index, target) in targets.iter().enumerate() {
                let value = parts.get(index).cloned().unwrap_or(Value::Undefined);
                frame.set(target.clone(), value);
            }
        }
        other => {
            for (index, target) in targets.iter().enumerate() {
                let value = if index == 0 { other.clone() } else { Value::Undefined };
                frame.set(target.clone(), value);
            }
        }
    }
}

fn loop_value(index: usize, length: usize, parent: Option<Value>) -> Value {
    let mut entries = BTreeMap::new();
    entries.insert("index".to_string(), Value::from(index + 1));
    entries.insert("index0".to_string(), Value::from(index));
    entries.insert("revindex".to_string(), Value::from(length - index));
    entries.insert("revindex0".to_string(), Value::from(length - index - 1));
    entries.insert("first".to_string(), Value::Bool(index == 0));
    entries.insert("last".to_string(), Value::Bool(index + 1 == length));
    entries.insert("length".to_string(), Value::from(length));
    entries.insert("parent".to_string(), parent.unwrap_or(Value::Undefined));
    Value::from(entries)
}

fn numbers(left: &Value, right: &Value) -> Option<(f64, f64)> {
    match (left, right) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            Some((left.as_f64()?, right.as_f64()?))
        }
        _ => None,
    }
}

fn arithmetic_error(op: &str, left: &Value, right: &Value) -> RenderError {
    RenderError::type_mismatch(format!(
        "unsupported operands for `{op}`: {} and {}",
        left.type_name(),
        right.type_name()
    ))
}

fn contains(container: &Value, item: &Value) -> RenderResult<bool> {
    match container {
        Value::List(items) => Ok(items.iter().any(|candidate| candidate.loose_eq(item))),
        Value::Map(entries) => Ok(entries.contains_key(&item.to_string())),
        Value::String(s) | Value::Safe(s) => Ok(s.contains(&item.to_string())),
        other => Err(RenderError::type_mismatch(format!(
            "cannot use `in` to search a {}",
            other.type_name()
        ))),
    }
}

fn binary(op: BinaryKind, left: Value, right: Value) -> RenderResult<Value> {
    use std::cmp::Ordering;
    let ordered = |accept: fn(Ordering) -> bool| {
        Value::Bool(left.compare(&right).map(accept).unwrap_or(false))
    };
    let value = match op {
        BinaryKind::Eq => Value::Bool(left.loose_eq(&right)),
        BinaryKind::NotEq => Value::Bool(!left.loose_eq(&right)),
        BinaryKind::Lt => ordered(|ord| ord == Ordering::Less),
        BinaryKind::LtEq => ordered(|ord| ord != Ordering::Greater),
        BinaryKind::Gt => ordered(|ord| ord == Ordering::Greater),
        BinaryKind::GtEq => ordered(|ord| ord != Ordering::Less),
        BinaryKind::In => Value::Bool(contains(&right, &left)?),
        BinaryKind::NotIn => Value::Bool(!contains(&right, &left)?),
        BinaryKind::Concat => Value::String(format!("{left}{right}")),
        BinaryKind::Add => match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_add(*b)
                .map(Value::Int)
                .unwrap_or(Value::Float(*a as f64 + *b as f64)),
            (Value::String(_) | Value::Safe(_), _) | (_, Value::String(_) | Value::Safe(_)) => {
                Value::String(format!("{left}{right}"))
            }
            (Value::List(a), Value::List(b)) => {
                Value::list(a.iter().chain(b.iter()).cloned())
            }
            _ => match numbers(&left, &right) {
                Some((a, b)) => Value::Float(a + b),
                None => return Err(arithmetic_error("+", &left, &right)),
            },
        },
        BinaryKind::Sub => match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_sub(*b)
                .map(Value::Int)
                .unwrap_or(Value::Float(*a as f64 - *b as f64)),
            _ => match numbers(&left, &right) {
                Some((a, b)) => Value::Float(a - b),
                None => return Err(arithmetic_error("-", &left, &right)),
            },
        },
        BinaryKind::Mul => match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_mul(*b)
                .map(Value::Int)
                .unwrap_or(Value::Float(*a as f64 * *b as f64)),
            _ => match numbers(&left, &right) {
                Some((a, b)) => Value::Float(a * b),
                None => return Err(arithmetic_error("*", &left, &right)),
            },
        },
        BinaryKind::Div => match numbers(&left, &right) {
            Some((a, b)) => Value::Float(a / b),
            None => return Err(arithmetic_error("/", &left, &right)),
        },
        BinaryKind::FloorDiv => match (&left, &right) {
            (Value::Int(_), Value::Int(0)) => {
                return Err(RenderError::type_mismatch("integer division by zero"))
            }
            (Value::Int(a), Value::Int(b)) => match a.checked_div(*b) {
                Some(quotient) => {
                    let adjust = a % b != 0 && ((*a < 0) != (*b < 0));
                    Value::Int(if adjust { quotient - 1 } else { quotient })
                }
                None => Value::Float((*a as f64 / *b as f64).floor()),
            },
            _ => match numbers(&left, &right) {
                Some((a, b)) => Value::Float((a / b).floor()),
                None => return Err(arithmetic_error("//", &left, &right)),
            },
        },
        BinaryKind::Mod => match (&left, &right) {
            (Value::Int(_), Value::Int(0)) => {
                return Err(RenderError::type_mismatch("integer modulo by zero"))
            }
            (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_rem(*b)),
            _ => match numbers(&left, &right) {
                Some((a, b)) => Value::Float(a % b),
                None => return Err(arithmetic_error("%", &left, &right)),
            },
        },
        BinaryKind::Pow => match (&left, &right) {
            (Value::Int(a), Value::Int(b)) if *b >= 0 => u32::try_from(*b)
                .ok()
                .and_then(|exp| a.checked_pow(exp))
                .map(Value::Int)
                .unwrap_or(Value::Float((*a as f64).powf(*b as f64))),
            _ => match numbers(&left, &right) {
                Some((a, b)) => Value::Float(a.powf(b)),
                None => return Err(arithmetic_error("**", &left, &right)),
            },
        },
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(kind: BinaryKind, left: Value, right: Value) -> String {
        binary(kind, left, right).expect("binary op").to_string()
    }

    #[test]
    fn arithmetic_follows_template_numbers() {
        assert_eq!(op(BinaryKind::Add, Value::Int(2), Value::Int(3)), "5");
        assert_eq!(op(BinaryKind::Div, Value::Int(7), Value::Int(2)), "3.5");
        assert_eq!(op(BinaryKind::FloorDiv, Value::Int(-7), Value::Int(2)), "-4");
        assert_eq!(op(BinaryKind::Mod, Value::Int(7), Value::Int(3)), "1");
        assert_eq!(op(BinaryKind::Pow, Value::Int(2), Value::Int(10)), "1024");
        assert_eq!(op(BinaryKind::Add, "a".into(), Value::Int(1)), "a1");
        assert_eq!(op(BinaryKind::Concat, Value::Int(1), "b".into()), "1b");
    }

    #[test]
    fn comparisons_and_membership() {
        assert_eq!(op(BinaryKind::Lt, Value::Int(1), Value::Float(1.5)), "true");
        assert_eq!(op(BinaryKind::GtEq, "b".into(), "a".into()), "true");
        let items = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(op(BinaryKind::In, Value::Int(2), items.clone()), "true");
        assert_eq!(op(BinaryKind::NotIn, Value::Int(3), items), "true");
        assert!(binary(BinaryKind::In, Value::Int(1), Value::Int(5)).is_err());
    }

    #[test]
    fn division_by_zero_is_an_error_for_integers() {
        assert!(binary(BinaryKind::Mod, Value::Int(1), Value::Int(0)).is_err());
        assert!(binary(BinaryKind::FloorDiv, Value::Int(1), Value::Int(0)).is_err());
    }

    #[test]
    fn integer_overflow_falls_back_to_float() {
        let quotient = binary(BinaryKind::FloorDiv, Value::Int(i64::MIN), Value::Int(-1));
        assert!(matches!(quotient, Ok(Value::Float(f)) if f == -(i64::MIN as f64)));
        let product = binary(BinaryKind::Mul, Value::Int(i64::MAX), Value::Int(2));
        assert!(matches!(product, Ok(Value::Float(_))));
        assert_eq!(op(BinaryKind::Mod, Value::Int(i64::MIN), Value::Int(-1)), "0");
    }

    #[test]
    fn loop_bindings_are_complete() {
        let value = loop_value(1, 3, None);
        let get = |key: &str| value.get_member(&key.into()).to_string();
        assert_eq!(get("index"), "2");
        assert_eq!(get("index0"), "1");
        assert_eq!(get("revindex"), "2");
        assert_eq!(get("revindex0"), "1");
        assert_eq!(get("first"), "false");
        assert_eq!(get("last"), "false");
        assert_eq!(get("length"), "3");
    }

    #[test]
    fn tuple_targets_unpack_lists() {
        let frame = Frame::root();
        let targets = vec!["k".to_string(), "v".to_string()];
        bind_targets(&frame, &targets, Value::list(vec!["a".into(), Value::Int(1)]), true);
        assert_eq!(frame.lookup("k").unwrap().to_string(), "a");
        assert_eq!(frame.lookup("v").unwrap().to_string(), "1");
    }
}
