//! Built-in Module Bridge.
//!
//! A closed, statically registered catalog of Node-compatible modules.
//! Each entry carries its guest JS façade source (embedded at compile
//! time) plus the statically known export names used when the module is
//! pulled in through an `import` statement (ES named exports must be
//! static). Adding a built-in is a new entry here, not a branch anywhere
//! else.
//!
//! Two construction patterns coexist in the catalog: pure guest façades
//! (`path`, `events`, ...) and façades that delegate specific operations
//! to host natives reached through the double-underscore `__host` object
//! (`fs`, `crypto`). Guest code never calls a host function by an
//! unprefixed name.

/// One registered built-in module.
#[derive(Debug)]
pub struct Builtin {
    /// Bare module name (`fs`, `path`, `fs/promises`, ...).
    pub name: &'static str,

    /// Guest JS façade source, evaluated as a CommonJS module.
    pub source: &'static str,

    /// Export names surfaced as ES named exports when imported.
    pub named_exports: &'static [&'static str],
}

impl Builtin {
    /// Cache key for this module (`node:` prefixed, like Node's own ids).
    pub fn cache_key(&self) -> String {
        format!("node:{}", self.name)
    }
}

/// The catalog. Order matches rough usage frequency; lookup is by name.
pub static BUILTINS: &[Builtin] = &[
    Builtin {
        name: "path",
        source: include_str!("js/path.js"),
        named_exports: &[
            "sep",
            "delimiter",
            "normalize",
            "isAbsolute",
            "join",
            "resolve",
            "dirname",
            "basename",
            "extname",
            "relative",
            "parse",
            "format",
            "posix",
        ],
    },
    Builtin {
        name: "fs",
        source: include_str!("js/fs.js"),
        named_exports: &[
            "readFileSync",
            "writeFileSync",
            "appendFileSync",
            "existsSync",
            "mkdirSync",
            "readdirSync",
            "statSync",
            "lstatSync",
            "unlinkSync",
            "rmdirSync",
            "rmSync",
            "renameSync",
            "copyFileSync",
            "Stats",
            "promises",
            "constants",
        ],
    },
    Builtin {
        name: "fs/promises",
        source: include_str!("js/fs_promises.js"),
        named_exports: &[
            "readFile",
            "writeFile",
            "appendFile",
            "mkdir",
            "readdir",
            "stat",
            "unlink",
            "rmdir",
            "rm",
            "rename",
            "copyFile",
            "access",
        ],
    },
    Builtin {
        name: "process",
        source: include_str!("js/process.js"),
        named_exports: &["argv", "env", "platform", "version"],
    },
    Builtin {
        name: "buffer",
        source: include_str!("js/buffer.js"),
        named_exports: &["Buffer", "kMaxLength", "constants"],
    },
    Builtin {
        name: "events",
        source: include_str!("js/events.js"),
        named_exports: &["EventEmitter", "once"],
    },
    Builtin {
        name: "crypto",
        source: include_str!("js/crypto.js"),
        named_exports: &[
            "createHash",
            "createHmac",
            "randomBytes",
            "randomInt",
            "randomUUID",
            "timingSafeEqual",
            "getHashes",
            "Hash",
            "Hmac",
            "webcrypto",
        ],
    },
    Builtin {
        name: "os",
        source: include_str!("js/os.js"),
        named_exports: &[
            "EOL",
            "platform",
            "type",
            "arch",
            "release",
            "hostname",
            "homedir",
            "tmpdir",
            "cpus",
            "totalmem",
            "freemem",
            "uptime",
            "userInfo",
            "endianness",
        ],
    },
    Builtin {
        name: "querystring",
        source: include_str!("js/querystring.js"),
        named_exports: &["parse", "stringify", "decode", "encode", "escape", "unescape"],
    },
    Builtin {
        name: "util",
        source: include_str!("js/util.js"),
        named_exports: &[
            "inspect",
            "format",
            "promisify",
            "callbackify",
            "inherits",
            "deprecate",
            "types",
        ],
    },
    Builtin {
        name: "stream",
        source: include_str!("js/stream.js"),
        named_exports: &["Readable", "Writable", "PassThrough", "Transform", "Stream"],
    },
    Builtin {
        name: "http",
        source: include_str!("js/http.js"),
        named_exports: &["createServer", "request", "get", "METHODS", "STATUS_CODES"],
    },
    Builtin {
        name: "timers",
        source: include_str!("js/timers.js"),
        named_exports: &[
            "setTimeout",
            "clearTimeout",
            "setInterval",
            "clearInterval",
            "setImmediate",
            "clearImmediate",
        ],
    },
];

/// Look up a built-in by specifier. Accepts both bare names and the
/// `node:` prefix.
pub fn resolve_builtin(specifier: &str) -> Option<&'static Builtin> {
    let name = specifier.strip_prefix("node:").unwrap_or(specifier);
    BUILTINS.iter().find(|b| b.name == name)
}

/// The bootstrap script installing the global surface.
pub const BOOTSTRAP: &str = include_str!("js/bootstrap.js");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_with_and_without_prefix() {
        assert!(resolve_builtin("fs").is_some());
        assert!(resolve_builtin("node:fs").is_some());
        assert!(resolve_builtin("fs/promises").is_some());
        assert!(resolve_builtin("node:fs/promises").is_some());
        assert!(resolve_builtin("left-pad").is_none());
    }

    #[test]
    fn test_cache_keys_are_prefixed() {
        let fs = resolve_builtin("fs").unwrap();
        assert_eq!(fs.cache_key(), "node:fs");
    }

    #[test]
    fn test_catalog_names_are_unique() {
        let mut names: Vec<&str> = BUILTINS.iter().map(|b| b.name).collect();
        names.sort_unstable();
        let len = names.len();
        names.dedup();
        assert_eq!(names.len(), len);
    }
}
