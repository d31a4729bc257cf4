//! Module loading, evaluation, and the per-context module cache.
//!
//! Two module systems share one registry, keyed by `(resolved path, kind)`
//! and owned by the VM context (no global state). CommonJS modules are
//! evaluated through the classic wrapper-function protocol, which gives
//! cycle safety for free: a nested require of a module that is still
//! `Evaluating` hands back its current, possibly incomplete exports
//! object. ES modules are engine-native (`Module`), so cyclic imports see
//! live bindings. Interop between the two goes through synthesized
//! façades in both directions.
//!
//! A module that fails to evaluate is cached as `Failed` with its thrown
//! value; repeated requires re-throw the same error without re-executing
//! the module body.

use std::cell::RefCell;
use std::future::Future;
use std::path::Path;
use std::rc::Rc;

use boa_engine::builtins::promise::PromiseState;
use boa_engine::module::{Module, ModuleLoader, Referrer};
use boa_engine::object::{FunctionObjectBuilder, ObjectInitializer};
use boa_engine::property::Attribute;
use boa_engine::{
    js_string, Context, JsError, JsNativeError, JsObject, JsResult, JsString, JsValue,
    NativeFunction, Source,
};
use boa_gc::{Finalize, Trace};
use rustc_hash::FxHashMap;

use nodekit_vfs::path as vpath;

use crate::builtins::Builtin;
use crate::error::GuestErrorKind;
use crate::host::HostHandle;
use crate::resolver::{self, ModuleKind, Resolved};

/// Evaluation lifecycle of a cached module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Loading,
    Evaluating,
    Evaluated,
    Failed,
}

/// A cached CommonJS-side module (also JSON modules and built-ins).
pub struct CjsRecord {
    pub state: ModuleState,
    pub kind: ModuleKind,
    /// The live `module` object; `module.exports` is the identity the
    /// cache guarantees across repeated resolution.
    pub module_obj: JsObject,
    /// Thrown value cached when `state == Failed`.
    pub error: Option<JsValue>,
    /// Direct dependents, for diagnostics only.
    pub dependents: Vec<String>,
}

/// A cached ES module (engine-native) or synthesized interop façade.
pub struct EsRecord {
    pub state: ModuleState,
    pub module: Module,
    pub error: Option<JsValue>,
    pub dependents: Vec<String>,
}

/// The per-context module cache. Never evicted mid-session; a second
/// resolution of the same key returns the same record.
pub struct ModuleRegistry {
    cjs: FxHashMap<String, CjsRecord>,
    es: FxHashMap<String, EsRecord>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            cjs: FxHashMap::default(),
            es: FxHashMap::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.cjs.len() + self.es.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cjs.is_empty() && self.es.is_empty()
    }

    /// Drop every cached module. Only disposal and explicit reset do this.
    pub fn clear(&mut self) {
        self.cjs.clear();
        self.es.clear();
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn push_dependent(dependents: &mut Vec<String>, requester: &str) {
    if !dependents.iter().any(|d| d == requester) {
        dependents.push(requester.to_string());
    }
}

/// Resolve and evaluate `specifier` for a CommonJS requester; the entry
/// point behind both the per-module `require` functions and the
/// `__host.__requireCjs` bridge.
pub fn require(
    host: &HostHandle,
    context: &mut Context,
    specifier: &str,
    from_dir: &str,
    requester: &str,
) -> JsResult<JsValue> {
    let fs = host.state().fs.clone();
    let resolved = match resolver::resolve(&fs, specifier, from_dir) {
        Ok(resolved) => resolved,
        Err(err) => {
            let mut message = err.message();
            if !requester.starts_with('<') {
                message.push_str("\nRequire stack:\n  ");
                message.push_str(requester);
            }
            return Err(module_not_found(context, &message));
        }
    };

    match resolved {
        Resolved::Builtin(builtin) => evaluate_cjs(
            host,
            context,
            &builtin.cache_key(),
            ModuleKind::BuiltIn,
            Some(builtin.source),
            &builtin.cache_key(),
            "/",
            requester,
        ),
        Resolved::File { path, kind } => match kind {
            ModuleKind::Es => require_es(host, context, &path, requester),
            _ => {
                let dirname = vpath::dirname(&path);
                evaluate_cjs(host, context, &path, kind, None, &path, &dirname, requester)
            }
        },
    }
}

/// Evaluate (or return from cache) a CommonJS/JSON/built-in module.
#[allow(clippy::too_many_arguments)]
fn evaluate_cjs(
    host: &HostHandle,
    context: &mut Context,
    key: &str,
    kind: ModuleKind,
    static_source: Option<&'static str>,
    filename: &str,
    dirname: &str,
    requester: &str,
) -> JsResult<JsValue> {
    // Cache hit: Evaluated returns the final exports; Evaluating returns
    // the current (possibly incomplete) exports -- the CommonJS cycle
    // contract; Failed re-throws the cached error.
    let cached = {
        let mut state = host.state_mut();
        state.modules.cjs.get_mut(key).map(|record| {
            push_dependent(&mut record.dependents, requester);
            match record.state {
                ModuleState::Failed => Err(record
                    .error
                    .clone()
                    .map(JsError::from_opaque)
                    .unwrap_or_else(|| {
                        JsNativeError::error()
                            .with_message(format!("module '{}' previously failed", key))
                            .into()
                    })),
                _ => Ok(record.module_obj.clone()),
            }
        })
    };
    if let Some(cached) = cached {
        let module_obj = cached?;
        return module_obj.get(js_string!("exports"), context);
    }

    let source_text = match static_source {
        Some(source) => source.to_string(),
        None => {
            let fs = host.state().fs.clone();
            match fs.read_to_string(key) {
                Ok(text) => text,
                Err(err) => {
                    return Err(JsNativeError::error()
                        .with_message(format!("cannot load module '{}': {}", key, err))
                        .into())
                }
            }
        }
    };

    let exports = JsObject::with_object_proto(context.intrinsics());
    let module_obj = ObjectInitializer::new(context)
        .property(js_string!("id"), JsString::from(key), Attribute::all())
        .property(
            js_string!("filename"),
            JsString::from(filename),
            Attribute::all(),
        )
        .property(js_string!("loaded"), false, Attribute::all())
        .build();
    module_obj.set(js_string!("exports"), exports, true, context)?;

    {
        let mut state = host.state_mut();
        state.modules.cjs.insert(
            key.to_string(),
            CjsRecord {
                state: ModuleState::Evaluating,
                kind,
                module_obj: module_obj.clone(),
                error: None,
                dependents: vec![requester.to_string()],
            },
        );
    }

    let outcome = evaluate_cjs_body(
        host,
        context,
        key,
        kind,
        &source_text,
        filename,
        dirname,
        &module_obj,
    );

    match outcome {
        Ok(()) => {
            module_obj.set(js_string!("loaded"), true, true, context)?;
            if let Some(record) = host.state_mut().modules.cjs.get_mut(key) {
                record.state = ModuleState::Evaluated;
            }
            module_obj.get(js_string!("exports"), context)
        }
        Err(err) => {
            let opaque = err.to_opaque(context);
            if let Some(record) = host.state_mut().modules.cjs.get_mut(key) {
                record.state = ModuleState::Failed;
                record.error = Some(opaque.clone());
            }
            Err(JsError::from_opaque(opaque))
        }
    }
}

/// Run a module body. JSON modules parse straight to their exports; code
/// modules go through the classic `(exports, require, module, __filename,
/// __dirname)` wrapper so each module observes its own location.
#[allow(clippy::too_many_arguments)]
fn evaluate_cjs_body(
    host: &HostHandle,
    context: &mut Context,
    key: &str,
    kind: ModuleKind,
    source_text: &str,
    filename: &str,
    dirname: &str,
    module_obj: &JsObject,
) -> JsResult<()> {
    if kind == ModuleKind::Json {
        let parsed: serde_json::Value = serde_json::from_str(source_text).map_err(|err| {
            JsError::from(
                JsNativeError::syntax()
                    .with_message(format!("invalid JSON in '{}': {}", key, err)),
            )
        })?;
        let value = JsValue::from_json(&parsed, context)?;
        module_obj.set(js_string!("exports"), value, true, context)?;
        return Ok(());
    }

    let wrapper = format!(
        "(function (exports, require, module, __filename, __dirname) {{\n{}\n}})",
        source_text
    );
    let source = Source::from_bytes(wrapper.as_bytes()).with_path(Path::new(filename));
    let wrapped = context.eval(source)?;
    let wrapped = wrapped.as_object().ok_or_else(|| {
        JsError::from(
            JsNativeError::typ().with_message("module wrapper did not evaluate to a function"),
        )
    })?;

    let require_fn = build_require(host, context, dirname, filename);
    let exports_value = module_obj.get(js_string!("exports"), context)?;

    wrapped.call(
        &exports_value.clone(),
        &[
            exports_value,
            require_fn,
            JsValue::from(module_obj.clone()),
            JsValue::from(JsString::from(filename)),
            JsValue::from(JsString::from(dirname)),
        ],
        context,
    )?;
    Ok(())
}

#[derive(Trace, Finalize)]
struct RequireCaptures {
    host: HostHandle,
    #[unsafe_ignore_trace]
    from_dir: String,
    #[unsafe_ignore_trace]
    from_path: String,
}

/// Build the `require` function handed to one module. Each module gets
/// its own, bound to its own directory, so nested requires resolve and
/// report relative to the module that issued them.
fn build_require(
    host: &HostHandle,
    context: &mut Context,
    from_dir: &str,
    from_path: &str,
) -> JsValue {
    let function = NativeFunction::from_copy_closure_with_captures(
        |_this, args, captures: &RequireCaptures, ctx| {
            let specifier = args
                .first()
                .cloned()
                .unwrap_or_default()
                .to_string(ctx)?
                .to_std_string_escaped();
            require(
                &captures.host,
                ctx,
                &specifier,
                &captures.from_dir,
                &captures.from_path,
            )
        },
        RequireCaptures {
            host: host.clone(),
            from_dir: from_dir.to_string(),
            from_path: from_path.to_string(),
        },
    );
    let function = FunctionObjectBuilder::new(context.realm(), function)
        .name(js_string!("require"))
        .length(1)
        .build();
    JsValue::from(function)
}

/// CommonJS pulling in an ES module: the module graph is evaluated
/// through the engine, then the default export (or the namespace when no
/// default exists) becomes the require result. Synchronous by contract --
/// a top-level await that does not settle during the drain is an error.
fn require_es(
    host: &HostHandle,
    context: &mut Context,
    path: &str,
    requester: &str,
) -> JsResult<JsValue> {
    let module = get_or_parse_es(host, context, path, requester)?;
    let promise = module.load_link_evaluate(context);
    context.run_jobs()?;

    match promise.state() {
        PromiseState::Fulfilled(_) => {
            if let Some(record) = host.state_mut().modules.es.get_mut(path) {
                record.state = ModuleState::Evaluated;
            }
            let namespace = module.namespace(context);
            let default = namespace.get(js_string!("default"), context)?;
            if default.is_undefined() {
                Ok(JsValue::from(namespace))
            } else {
                Ok(default)
            }
        }
        PromiseState::Rejected(err) => {
            if let Some(record) = host.state_mut().modules.es.get_mut(path) {
                record.state = ModuleState::Failed;
                record.error = Some(err.clone());
            }
            Err(JsError::from_opaque(err))
        }
        PromiseState::Pending => Err(JsNativeError::error()
            .with_message(format!(
                "cannot require ES module '{}': top-level await did not settle synchronously",
                path
            ))
            .into()),
    }
}

/// Fetch the cached engine module for `path`, parsing it on first sight.
fn get_or_parse_es(
    host: &HostHandle,
    context: &mut Context,
    path: &str,
    requester: &str,
) -> JsResult<Module> {
    let cached = {
        let mut state = host.state_mut();
        state.modules.es.get_mut(path).map(|record| {
            push_dependent(&mut record.dependents, requester);
            record.module.clone()
        })
    };
    if let Some(module) = cached {
        return Ok(module);
    }

    let fs = host.state().fs.clone();
    let source_text = fs.read_to_string(path).map_err(|err| {
        JsError::from(
            JsNativeError::error()
                .with_message(format!("cannot load module '{}': {}", path, err)),
        )
    })?;

    let source = Source::from_bytes(source_text.as_bytes()).with_path(Path::new(path));
    let module = Module::parse(source, None, context)?;
    host.state_mut().modules.es.insert(
        path.to_string(),
        EsRecord {
            state: ModuleState::Loading,
            module: module.clone(),
            error: None,
            dependents: vec![requester.to_string()],
        },
    );
    Ok(module)
}

/// Insert a synthesized façade module under `key`, or return the cached
/// one (identity across repeated imports).
fn get_or_synthesize(
    host: &HostHandle,
    context: &mut Context,
    key: &str,
    facade_source: &str,
) -> JsResult<Module> {
    let cached = {
        let state = host.state();
        state.modules.es.get(key).map(|record| record.module.clone())
    };
    if let Some(module) = cached {
        return Ok(module);
    }

    let source = Source::from_bytes(facade_source.as_bytes()).with_path(Path::new(key));
    let module = Module::parse(source, None, context)?;
    host.state_mut().modules.es.insert(
        key.to_string(),
        EsRecord {
            state: ModuleState::Loading,
            module: module.clone(),
            error: None,
            dependents: Vec::new(),
        },
    );
    Ok(module)
}

fn escape_js(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// ES façade for a built-in: default export plus the statically known
/// named exports.
fn builtin_facade(builtin: &Builtin) -> String {
    let mut source = format!(
        "const __m = __host.__requireCjs(\"{}\", \"/\");\nexport default __m;\n",
        escape_js(builtin.name)
    );
    if !builtin.named_exports.is_empty() {
        source.push_str(&format!(
            "export const {{ {} }} = __m;\n",
            builtin.named_exports.join(", ")
        ));
    }
    source
}

/// ES façade for a CommonJS or JSON file: `module.exports` becomes the
/// default import; named imports exist only for statically analyzable
/// `exports.x = ...` assignments.
fn cjs_facade(path: &str, from_dir: &str, names: &[String]) -> String {
    let mut source = format!(
        "const __m = __host.__requireCjs(\"{}\", \"{}\");\nexport default __m;\n",
        escape_js(path),
        escape_js(from_dir)
    );
    if !names.is_empty() {
        source.push_str(&format!("export const {{ {} }} = __m;\n", names.join(", ")));
    }
    source
}

/// Resolve and load one imported module on behalf of the engine.
fn load_es_dependency(
    host: &HostHandle,
    context: &mut Context,
    specifier: &str,
    referrer: &Referrer,
) -> JsResult<Module> {
    let from_dir = referrer
        .path()
        .map(|p| vpath::dirname(&p.to_string_lossy()))
        .unwrap_or_else(|| host.state().options.cwd.clone());

    let fs = host.state().fs.clone();
    let resolved = match resolver::resolve(&fs, specifier, &from_dir) {
        Ok(resolved) => resolved,
        Err(err) => {
            let mut message = err.message();
            if let Some(importer) = referrer.path() {
                message.push_str("\nImported from: ");
                message.push_str(&importer.to_string_lossy());
            }
            return Err(module_not_found(context, &message));
        }
    };

    match resolved {
        Resolved::Builtin(builtin) => {
            let facade = builtin_facade(builtin);
            get_or_synthesize(host, context, &builtin.cache_key(), &facade)
        }
        Resolved::File { path, kind } => match kind {
            ModuleKind::Es => get_or_parse_es(host, context, &path, "<import>"),
            ModuleKind::CommonJs | ModuleKind::BuiltIn => {
                let names = fs
                    .read_to_string(&path)
                    .map(|source| resolver::cjs_named_exports(&source))
                    .unwrap_or_default();
                let dirname = vpath::dirname(&path);
                let facade = cjs_facade(&path, &dirname, &names);
                get_or_synthesize(host, context, &path, &facade)
            }
            ModuleKind::Json => {
                let dirname = vpath::dirname(&path);
                let facade = cjs_facade(&path, &dirname, &[]);
                get_or_synthesize(host, context, &path, &facade)
            }
        },
    }
}

/// The engine-facing module loader: resolves `import` specifiers against
/// the virtual filesystem and the built-in catalog.
pub struct VfsModuleLoader {
    host: HostHandle,
}

impl VfsModuleLoader {
    pub fn new(host: HostHandle) -> Self {
        Self { host }
    }
}

impl ModuleLoader for VfsModuleLoader {
    fn load_imported_module(
        self: Rc<Self>,
        referrer: Referrer,
        specifier: JsString,
        context: &RefCell<&mut Context>,
    ) -> impl Future<Output = JsResult<Module>> {
        let specifier = specifier.to_std_string_escaped();
        let host = self.host.clone();
        async move {
            let mut ctx = context.borrow_mut();
            load_es_dependency(&host, &mut ctx, &specifier, &referrer)
        }
    }
}

/// A resolution failure thrown into the guest: named after the
/// [`GuestErrorKind::ModuleNotFound`] taxonomy entry and carrying Node's
/// `MODULE_NOT_FOUND` code, so both the guest and the final error payload
/// can tell it apart from ordinary evaluation faults.
fn module_not_found(context: &mut Context, message: &str) -> JsError {
    let err: JsError = JsNativeError::error().with_message(message.to_string()).into();
    let opaque = err.to_opaque(context);
    if let Some(obj) = opaque.as_object() {
        let _ = obj.set(
            js_string!("name"),
            JsString::from(GuestErrorKind::ModuleNotFound.name()),
            false,
            context,
        );
        let _ = obj.set(
            js_string!("code"),
            js_string!("MODULE_NOT_FOUND"),
            false,
            context,
        );
    }
    JsError::from_opaque(opaque)
}

/// Evaluate the synthetic entry module for a CommonJS-classified call.
/// The entry is session-scoped and intentionally not cached, so repeated
/// `execute` calls with the same filename re-run rather than replay.
pub fn evaluate_entry_cjs(
    host: &HostHandle,
    context: &mut Context,
    code: &str,
    entry_path: &str,
) -> JsResult<JsValue> {
    let dirname = vpath::dirname(entry_path);
    let exports = JsObject::with_object_proto(context.intrinsics());
    let module_obj = ObjectInitializer::new(context)
        .property(js_string!("id"), js_string!("."), Attribute::all())
        .property(
            js_string!("filename"),
            JsString::from(entry_path),
            Attribute::all(),
        )
        .property(js_string!("loaded"), false, Attribute::all())
        .build();
    module_obj.set(js_string!("exports"), exports, true, context)?;

    evaluate_cjs_body(
        host,
        context,
        entry_path,
        ModuleKind::CommonJs,
        code,
        entry_path,
        &dirname,
        &module_obj,
    )?;
    module_obj.set(js_string!("loaded"), true, true, context)?;
    module_obj.get(js_string!("exports"), context)
}

/// Parse the synthetic entry module for an ES-classified call. Returns
/// the module; the session drives load/link/evaluate and the drain.
pub fn parse_entry_es(
    context: &mut Context,
    code: &str,
    entry_path: &str,
) -> JsResult<Module> {
    let source = Source::from_bytes(code.as_bytes()).with_path(Path::new(entry_path));
    Module::parse(source, None, context)
}
