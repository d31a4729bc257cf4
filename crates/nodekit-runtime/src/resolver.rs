//! Specifier resolution and module-kind classification.
//!
//! Resolution follows Node's algorithm over the virtual filesystem:
//! built-ins first, then relative/absolute paths with the literal /
//! `.js` / `.json` / directory-`index.js` candidate ladder, then a
//! `node_modules` walk for bare names (the layout the package installer
//! populates). Every candidate tried is remembered for the
//! `ModuleNotFound` diagnostic.

use once_cell::sync::Lazy;
use regex::Regex;

use nodekit_vfs::{path as vpath, MemFs};

use crate::builtins::{resolve_builtin, Builtin};

/// The module systems a resolved module can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Es,
    CommonJs,
    Json,
    BuiltIn,
}

/// A successfully resolved specifier.
#[derive(Debug)]
pub enum Resolved {
    Builtin(&'static Builtin),
    File { path: String, kind: ModuleKind },
}

/// Resolution failure, carrying everything that was tried.
#[derive(Debug, Clone)]
pub struct ResolveError {
    pub specifier: String,
    pub tried: Vec<String>,
}

impl ResolveError {
    /// Node-style diagnostic listing the candidates searched.
    pub fn message(&self) -> String {
        let mut msg = format!("Cannot find module '{}'", self.specifier);
        if !self.tried.is_empty() {
            msg.push_str("\nSearched:");
            for candidate in &self.tried {
                msg.push_str("\n  ");
                msg.push_str(candidate);
            }
        }
        msg
    }
}

/// Resolve `specifier` against the directory of the requesting module.
pub fn resolve(fs: &MemFs, specifier: &str, from_dir: &str) -> Result<Resolved, ResolveError> {
    if let Some(builtin) = resolve_builtin(specifier) {
        return Ok(Resolved::Builtin(builtin));
    }

    let mut tried = Vec::new();

    if specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/') {
        let base = vpath::join(from_dir, specifier);
        if let Some(path) = resolve_as_file_or_dir(fs, &base, &mut tried) {
            let kind = classify_file(fs, &path);
            return Ok(Resolved::File { path, kind });
        }
        return Err(ResolveError {
            specifier: specifier.to_string(),
            tried,
        });
    }

    // Bare specifier: walk node_modules from the requesting directory up.
    let mut dir = from_dir.to_string();
    loop {
        let base = vpath::join(&format!("{}/node_modules", dir), specifier);
        if let Some(path) = resolve_as_file_or_dir(fs, &base, &mut tried) {
            let kind = classify_file(fs, &path);
            return Ok(Resolved::File { path, kind });
        }
        if dir == "/" {
            break;
        }
        dir = vpath::dirname(&dir);
    }

    Err(ResolveError {
        specifier: specifier.to_string(),
        tried,
    })
}

/// The literal / `.js` / `.json` / directory ladder.
fn resolve_as_file_or_dir(fs: &MemFs, base: &str, tried: &mut Vec<String>) -> Option<String> {
    tried.push(base.to_string());
    if fs.is_file(base) {
        return Some(base.to_string());
    }

    for suffix in [".js", ".json"] {
        let candidate = format!("{}{}", base, suffix);
        tried.push(candidate.clone());
        if fs.is_file(&candidate) {
            return Some(candidate);
        }
    }

    if fs.is_dir(base) {
        if let Some(main) = package_main(fs, base) {
            let main_base = vpath::join(base, &main);
            tried.push(main_base.clone());
            if fs.is_file(&main_base) {
                return Some(main_base);
            }
            for suffix in [".js", ".json"] {
                let candidate = format!("{}{}", main_base, suffix);
                tried.push(candidate.clone());
                if fs.is_file(&candidate) {
                    return Some(candidate);
                }
            }
        }
        let index = vpath::join(base, "index.js");
        tried.push(index.clone());
        if fs.is_file(&index) {
            return Some(index);
        }
    }

    None
}

/// `main` from a directory's `package.json`, if present and well-formed.
fn package_main(fs: &MemFs, dir: &str) -> Option<String> {
    let manifest = fs.read_to_string(&vpath::join(dir, "package.json")).ok()?;
    let parsed: serde_json::Value = serde_json::from_str(&manifest).ok()?;
    parsed
        .get("main")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// The `type` field governing `.js` files, from the nearest `package.json`
/// at or above `dir`.
fn package_type(fs: &MemFs, dir: &str) -> Option<String> {
    let mut cur = dir.to_string();
    loop {
        if let Ok(manifest) = fs.read_to_string(&vpath::join(&cur, "package.json")) {
            if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&manifest) {
                if let Some(kind) = parsed.get("type").and_then(|v| v.as_str()) {
                    return Some(kind.to_string());
                }
            }
        }
        if cur == "/" {
            return None;
        }
        cur = vpath::dirname(&cur);
    }
}

/// Classify a resolved file: extension first, then the governing
/// `package.json`, then source syntax. `.js` without module syntax is
/// CommonJS, matching Node.
pub fn classify_file(fs: &MemFs, path: &str) -> ModuleKind {
    match vpath::extname(path).as_str() {
        ".mjs" => return ModuleKind::Es,
        ".cjs" => return ModuleKind::CommonJs,
        ".json" => return ModuleKind::Json,
        _ => {}
    }

    match package_type(fs, &vpath::dirname(path)).as_deref() {
        Some("module") => return ModuleKind::Es,
        Some("commonjs") => return ModuleKind::CommonJs,
        _ => {}
    }

    match fs.read_to_string(path) {
        Ok(source) => classify_source(&source, ModuleKind::CommonJs),
        Err(_) => ModuleKind::CommonJs,
    }
}

/// Classify source text by syntax, falling back to `default_kind` when
/// neither module system's markers appear.
pub fn classify_source(source: &str, default_kind: ModuleKind) -> ModuleKind {
    if has_esm_syntax(source) {
        ModuleKind::Es
    } else if has_cjs_syntax(source) {
        ModuleKind::CommonJs
    } else {
        default_kind
    }
}

static ESM_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*(import[\s("'{]|export\s|export\{|export default)"#).unwrap());

static CJS_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(^|[^.\w"'])(require\s*\(|module\.exports|exports\.[A-Za-z_$])"#).unwrap()
});

/// Whether the source uses `import`/`export` statements. Line-based scan
/// that skips comment lines; a full parse is not needed for this decision.
pub fn has_esm_syntax(source: &str) -> bool {
    let mut in_block_comment = false;
    for line in source.lines() {
        let trimmed = line.trim();
        if in_block_comment {
            if trimmed.contains("*/") {
                in_block_comment = false;
            }
            continue;
        }
        if trimmed.starts_with("//") {
            continue;
        }
        if trimmed.starts_with("/*") {
            if !trimmed.contains("*/") {
                in_block_comment = true;
            }
            continue;
        }
        if ESM_LINE.is_match(trimmed) {
            return true;
        }
    }
    false
}

/// Whether the source uses `require` / `module.exports` / `exports.x`.
pub fn has_cjs_syntax(source: &str) -> bool {
    let mut in_block_comment = false;
    for line in source.lines() {
        let trimmed = line.trim();
        if in_block_comment {
            if trimmed.contains("*/") {
                in_block_comment = false;
            }
            continue;
        }
        if trimmed.starts_with("//") || trimmed.starts_with('*') {
            continue;
        }
        if trimmed.starts_with("/*") {
            if !trimmed.contains("*/") {
                in_block_comment = true;
            }
            continue;
        }
        if CJS_MARKER.is_match(trimmed) {
            return true;
        }
    }
    false
}

static CJS_NAMED_EXPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:module\.)?exports\.([A-Za-z_$][A-Za-z0-9_$]*)\s*=").unwrap()
});

// Names that cannot appear in an `export const { ... }` binding list.
const RESERVED_WORDS: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete",
    "do", "else", "enum", "export", "extends", "false", "finally", "for", "function", "if",
    "import", "in", "instanceof", "let", "new", "null", "return", "static", "super", "switch",
    "this", "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

/// Statically analyzable named exports of a CommonJS module, used to
/// synthesize ES named exports on its import façade. Only plain
/// `exports.x = ...` / `module.exports.x = ...` assignments qualify.
pub fn cjs_named_exports(source: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for capture in CJS_NAMED_EXPORT.captures_iter(source) {
        let name = capture[1].to_string();
        if name == "__esModule" || RESERVED_WORDS.contains(&name.as_str()) {
            continue;
        }
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> MemFs {
        let fs = MemFs::new();
        fs.create_dir_all("/app/src").unwrap();
        fs.write_file("/app/src/math.js", "exports.add = (a, b) => a + b;")
            .unwrap();
        fs.write_file("/app/src/data.json", "{\"n\": 1}").unwrap();
        fs.create_dir_all("/app/src/lib").unwrap();
        fs.write_file("/app/src/lib/index.js", "module.exports = 1;")
            .unwrap();
        fs.create_dir_all("/app/node_modules/left-pad").unwrap();
        fs.write_file(
            "/app/node_modules/left-pad/package.json",
            "{\"name\": \"left-pad\", \"main\": \"lib/pad.js\"}",
        )
        .unwrap();
        fs.create_dir_all("/app/node_modules/left-pad/lib").unwrap();
        fs.write_file(
            "/app/node_modules/left-pad/lib/pad.js",
            "module.exports = (s) => ' ' + s;",
        )
        .unwrap();
        fs
    }

    fn resolved_path(r: Resolved) -> String {
        match r {
            Resolved::File { path, .. } => path,
            Resolved::Builtin(b) => b.cache_key(),
        }
    }

    #[test]
    fn test_builtin_wins() {
        let fs = fixture();
        assert_eq!(resolved_path(resolve(&fs, "path", "/app/src").unwrap()), "node:path");
        assert_eq!(
            resolved_path(resolve(&fs, "node:fs", "/app/src").unwrap()),
            "node:fs"
        );
    }

    #[test]
    fn test_relative_with_extension_ladder() {
        let fs = fixture();
        assert_eq!(
            resolved_path(resolve(&fs, "./math", "/app/src").unwrap()),
            "/app/src/math.js"
        );
        assert_eq!(
            resolved_path(resolve(&fs, "./math.js", "/app/src").unwrap()),
            "/app/src/math.js"
        );
        assert_eq!(
            resolved_path(resolve(&fs, "./data", "/app/src").unwrap()),
            "/app/src/data.json"
        );
    }

    #[test]
    fn test_directory_index() {
        let fs = fixture();
        assert_eq!(
            resolved_path(resolve(&fs, "./lib", "/app/src").unwrap()),
            "/app/src/lib/index.js"
        );
    }

    #[test]
    fn test_node_modules_walk_with_main() {
        let fs = fixture();
        assert_eq!(
            resolved_path(resolve(&fs, "left-pad", "/app/src").unwrap()),
            "/app/node_modules/left-pad/lib/pad.js"
        );
    }

    #[test]
    fn test_not_found_lists_candidates() {
        let fs = fixture();
        let err = resolve(&fs, "./missing", "/app/src").unwrap_err();
        assert!(err.tried.contains(&"/app/src/missing".to_string()));
        assert!(err.tried.contains(&"/app/src/missing.js".to_string()));
        assert!(err.message().contains("Cannot find module './missing'"));
    }

    #[test]
    fn test_kind_by_extension() {
        let fs = fixture();
        fs.write_file("/app/src/es.mjs", "export default 1;").unwrap();
        fs.write_file("/app/src/c.cjs", "module.exports = 1;").unwrap();
        assert_eq!(classify_file(&fs, "/app/src/es.mjs"), ModuleKind::Es);
        assert_eq!(classify_file(&fs, "/app/src/c.cjs"), ModuleKind::CommonJs);
        assert_eq!(classify_file(&fs, "/app/src/data.json"), ModuleKind::Json);
    }

    #[test]
    fn test_kind_by_package_type() {
        let fs = fixture();
        fs.write_file("/app/package.json", "{\"type\": \"module\"}")
            .unwrap();
        fs.write_file("/app/src/plain.js", "const x = 1;").unwrap();
        assert_eq!(classify_file(&fs, "/app/src/plain.js"), ModuleKind::Es);
    }

    #[test]
    fn test_kind_by_syntax() {
        assert_eq!(
            classify_source("import x from './x.js';", ModuleKind::CommonJs),
            ModuleKind::Es
        );
        assert_eq!(
            classify_source("const x = require('./x');", ModuleKind::Es),
            ModuleKind::CommonJs
        );
        assert_eq!(
            classify_source("// import nothing\nconst a = 1;", ModuleKind::CommonJs),
            ModuleKind::CommonJs
        );
    }

    #[test]
    fn test_cjs_named_export_analysis() {
        let names = cjs_named_exports(
            "exports.add = (a, b) => a + b;\nmodule.exports.sub = (a, b) => a - b;\nexports.add = again;",
        );
        assert_eq!(names, vec!["add".to_string(), "sub".to_string()]);
    }
}
