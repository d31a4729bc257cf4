//! Built-in module bridge coverage, exercised through guest programs.

use nodekit_runtime::{ExecuteOptions, ExecutionMode, RuntimeOptions, Sandbox};
use nodekit_vfs::MemFs;

fn run(fs: MemFs, code: &str) -> nodekit_runtime::ExecutionResult {
    let mut sb = Sandbox::new(ExecutionMode::Direct, RuntimeOptions::default(), fs).unwrap();
    sb.execute(code, ExecuteOptions::default()).unwrap()
}

fn run_ok(code: &str) -> serde_json::Value {
    let result = run(MemFs::new(), code);
    assert!(result.ok, "unexpected failure: {:?}", result.error);
    result.data.expect("data expected")
}

#[test]
fn test_path_module() {
    let data = run_ok(
        "const path = require('path');\n\
         module.exports = {\n\
           joined: path.join('/a', 'b', '../c.js'),\n\
           dir: path.dirname('/a/b/c.js'),\n\
           base: path.basename('/a/b/c.js', '.js'),\n\
           ext: path.extname('/a/b/c.tar.gz'),\n\
           abs: path.isAbsolute('/x') && !path.isAbsolute('x'),\n\
           resolved: path.resolve('src', 'lib'),\n\
         };",
    );
    assert_eq!(data["joined"], serde_json::json!("/a/c.js"));
    assert_eq!(data["dir"], serde_json::json!("/a/b"));
    assert_eq!(data["base"], serde_json::json!("c"));
    assert_eq!(data["ext"], serde_json::json!(".gz"));
    assert_eq!(data["abs"], serde_json::json!(true));
    assert_eq!(data["resolved"], serde_json::json!("/src/lib"));
}

#[test]
fn test_fs_sync_roundtrip_and_host_visibility() {
    let fs = MemFs::new();
    fs.create_dir_all("/data").unwrap();
    fs.write_file("/data/in.txt", "from the host").unwrap();

    let result = run(
        fs.clone(),
        "const fs = require('fs');\n\
         const input = fs.readFileSync('/data/in.txt', 'utf8');\n\
         fs.writeFileSync('/data/out.txt', input.toUpperCase());\n\
         fs.mkdirSync('/data/sub');\n\
         module.exports = {\n\
           input,\n\
           listing: fs.readdirSync('/data'),\n\
           exists: fs.existsSync('/data/out.txt'),\n\
           missing: fs.existsSync('/data/nope.txt'),\n\
           size: fs.statSync('/data/out.txt').size,\n\
           isDir: fs.statSync('/data/sub').isDirectory(),\n\
         };",
    );
    assert!(result.ok, "unexpected failure: {:?}", result.error);
    let data = result.data.unwrap();
    assert_eq!(data["input"], serde_json::json!("from the host"));
    assert_eq!(
        data["listing"],
        serde_json::json!(["in.txt", "out.txt", "sub"])
    );
    assert_eq!(data["exists"], serde_json::json!(true));
    assert_eq!(data["missing"], serde_json::json!(false));
    assert_eq!(data["size"], serde_json::json!(13.0));
    assert_eq!(data["isDir"], serde_json::json!(true));

    // The guest write is visible through the host accessor seam.
    assert_eq!(fs.read_to_string("/data/out.txt").unwrap(), "FROM THE HOST");
}

#[test]
fn test_fs_errors_carry_node_codes() {
    let data = run_ok(
        "const fs = require('fs');\n\
         let code = null;\n\
         try { fs.readFileSync('/absent.txt'); } catch (e) { code = e.code; }\n\
         module.exports = code;",
    );
    assert_eq!(data, serde_json::json!("ENOENT"));
}

#[test]
fn test_uncaught_fs_failure_is_classified_as_host_bridge() {
    let result = run(
        MemFs::new(),
        "require('fs').readFileSync('/absent.txt');",
    );
    assert!(!result.ok);
    match result.error.unwrap() {
        nodekit_runtime::ErrorPayload::Structured(e) => {
            assert_eq!(e.name, "HostBridgeError");
            assert!(e.message.starts_with("ENOENT"));
            assert_eq!(e.properties.get("code"), Some(&serde_json::json!("ENOENT")));
        }
        other => panic!("expected structured error, got {:?}", other),
    }
}

#[test]
fn test_fs_promises_observe_sync_writes() {
    let data = run_ok(
        "const fs = require('fs');\n\
         const fsp = require('fs/promises');\n\
         fs.writeFileSync('/note.txt', 'sync wrote this');\n\
         const text = await fsp.readFile('/note.txt', 'utf8');\n\
         export default text;",
    );
    assert_eq!(data, serde_json::json!("sync wrote this"));
}

#[test]
fn test_buffer_encodings() {
    let data = run_ok(
        "const { Buffer } = require('buffer');\n\
         const buf = Buffer.from('hello world', 'utf8');\n\
         module.exports = {\n\
           hex: buf.toString('hex'),\n\
           b64: buf.toString('base64'),\n\
           back: Buffer.from(buf.toString('base64'), 'base64').toString('utf8'),\n\
           len: Buffer.byteLength('héllo'),\n\
           sliced: buf.slice(0, 5).toString('utf8'),\n\
           eq: Buffer.from('abc').equals(Buffer.from('abc')),\n\
           concat: Buffer.concat([Buffer.from('ab'), Buffer.from('cd')]).toString('utf8'),\n\
         };",
    );
    assert_eq!(data["hex"], serde_json::json!("68656c6c6f20776f726c64"));
    assert_eq!(data["b64"], serde_json::json!("aGVsbG8gd29ybGQ="));
    assert_eq!(data["back"], serde_json::json!("hello world"));
    assert_eq!(data["len"], serde_json::json!(6.0));
    assert_eq!(data["sliced"], serde_json::json!("hello"));
    assert_eq!(data["eq"], serde_json::json!(true));
    assert_eq!(data["concat"], serde_json::json!("abcd"));
}

#[test]
fn test_crypto_digests_match_known_vectors() {
    let data = run_ok(
        "const crypto = require('crypto');\n\
         module.exports = {\n\
           sha256: crypto.createHash('sha256').update('abc').digest('hex'),\n\
           md5: crypto.createHash('md5').update('abc').digest('hex'),\n\
           sha1: crypto.createHash('sha1').update('ab').update('c').digest('hex'),\n\
           hmac: crypto.createHmac('sha256', 'Jefe').update('what do ya want for nothing?').digest('hex'),\n\
         };",
    );
    assert_eq!(
        data["sha256"],
        serde_json::json!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
    );
    assert_eq!(data["md5"], serde_json::json!("900150983cd24fb0d6963f7d28e17f72"));
    assert_eq!(
        data["sha1"],
        serde_json::json!("a9993e364706816aba3e25717850c26c9cd0d89d")
    );
    assert_eq!(
        data["hmac"],
        serde_json::json!("5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843")
    );
}

#[test]
fn test_crypto_random_bytes_shape() {
    let data = run_ok(
        "const crypto = require('crypto');\n\
         const buf = crypto.randomBytes(16);\n\
         const uuid = crypto.randomUUID();\n\
         module.exports = {\n\
           len: buf.length,\n\
           uuidShape: /^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$/.test(uuid),\n\
         };",
    );
    assert_eq!(data["len"], serde_json::json!(16.0));
    assert_eq!(data["uuidShape"], serde_json::json!(true));
}

#[test]
fn test_events_emitter() {
    let data = run_ok(
        "const { EventEmitter } = require('events');\n\
         const seen = [];\n\
         const emitter = new EventEmitter();\n\
         const onPing = (v) => seen.push('on:' + v);\n\
         emitter.on('ping', onPing);\n\
         emitter.once('ping', (v) => seen.push('once:' + v));\n\
         emitter.emit('ping', 1);\n\
         emitter.emit('ping', 2);\n\
         emitter.off('ping', onPing);\n\
         emitter.emit('ping', 3);\n\
         module.exports = seen;",
    );
    assert_eq!(
        data,
        serde_json::json!(["on:1", "once:1", "on:2"])
    );
}

#[test]
fn test_querystring_roundtrip() {
    let data = run_ok(
        "const qs = require('querystring');\n\
         const parsed = qs.parse('a=1&b=two&b=three&plain');\n\
         module.exports = {\n\
           a: parsed.a,\n\
           b: parsed.b,\n\
           plain: parsed.plain,\n\
           encoded: qs.stringify({ x: 'a b', y: ['1', '2'] }),\n\
         };",
    );
    assert_eq!(data["a"], serde_json::json!("1"));
    assert_eq!(data["b"], serde_json::json!(["two", "three"]));
    assert_eq!(data["plain"], serde_json::json!(""));
    assert_eq!(data["encoded"], serde_json::json!("x=a%20b&y=1&y=2"));
}

#[test]
fn test_util_format_and_promisify() {
    let data = run_ok(
        "const util = require('util');\n\
         const delayed = util.promisify((v, cb) => setTimeout(() => cb(null, v * 2), 5));\n\
         const doubled = await delayed(21);\n\
         export default {\n\
           formatted: util.format('%s has %d items: %j', 'cart', 3, [1, 2]),\n\
           doubled,\n\
         };",
    );
    assert_eq!(
        data["formatted"],
        serde_json::json!("cart has 3 items: [1,2]")
    );
    assert_eq!(data["doubled"], serde_json::json!(42.0));
}

#[test]
fn test_os_and_process_stubs() {
    let data = run_ok(
        "const os = require('os');\n\
         module.exports = {\n\
           eol: os.EOL,\n\
           platform: os.platform(),\n\
           tmp: os.tmpdir(),\n\
           cwd: process.cwd(),\n\
           node: process.versions.node,\n\
         };",
    );
    assert_eq!(data["eol"], serde_json::json!("\n"));
    assert_eq!(data["platform"], serde_json::json!("linux"));
    assert_eq!(data["tmp"], serde_json::json!("/tmp"));
    assert_eq!(data["cwd"], serde_json::json!("/"));
    assert_eq!(data["node"], serde_json::json!("18.0.0"));
}

#[test]
fn test_http_stub_throws_descriptive_error() {
    let data = run_ok(
        "const http = require('http');\n\
         let message = null;\n\
         try { http.createServer(); } catch (e) { message = e.message; }\n\
         module.exports = message;",
    );
    assert!(data.as_str().unwrap().contains("not supported"));
}

#[test]
fn test_stream_pipe() {
    let data = run_ok(
        "const { PassThrough, Writable } = require('stream');\n\
         const chunks = [];\n\
         const source = new PassThrough();\n\
         const sink = new Writable({ write(chunk, enc, cb) { chunks.push(chunk); cb(); } });\n\
         source.pipe(sink);\n\
         source.write('alpha');\n\
         source.end('omega');\n\
         await new Promise((resolve) => setTimeout(resolve, 0));\n\
         export default chunks;",
    );
    assert_eq!(data, serde_json::json!(["alpha", "omega"]));
}

#[test]
fn test_builtins_importable_as_es_modules() {
    let data = run_ok(
        "import path, { join } from 'path';\n\
         import { EventEmitter } from 'events';\n\
         export default {\n\
           joined: join('/a', 'b'),\n\
           same: path.join === join,\n\
           emitter: typeof EventEmitter === 'function',\n\
         };",
    );
    assert_eq!(data["joined"], serde_json::json!("/a/b"));
    assert_eq!(data["same"], serde_json::json!(true));
    assert_eq!(data["emitter"], serde_json::json!(true));
}

#[test]
fn test_node_prefixed_specifiers_resolve() {
    let data = run_ok(
        "const path = require('node:path');\n\
         const plain = require('path');\n\
         module.exports = path === plain;",
    );
    assert_eq!(data, serde_json::json!(true));
}

#[test]
fn test_global_buffer_matches_module() {
    let data = run_ok(
        "const fromModule = require('buffer').Buffer;\n\
         module.exports = Buffer === fromModule && Buffer.from('x')[0] === 120;",
    );
    assert_eq!(data, serde_json::json!(true));
}

#[test]
fn test_node_modules_package_resolution() {
    let fs = MemFs::new();
    fs.create_dir_all("/project/node_modules/shout/lib").unwrap();
    fs.write_file(
        "/project/node_modules/shout/package.json",
        "{ \"name\": \"shout\", \"main\": \"lib/index.js\" }",
    )
    .unwrap();
    fs.write_file(
        "/project/node_modules/shout/lib/index.js",
        "module.exports = (s) => s.toUpperCase() + '!';",
    )
    .unwrap();
    fs.create_dir_all("/project/src").unwrap();
    fs.write_file(
        "/project/src/app.js",
        "const shout = require('shout');\nmodule.exports = shout('hey');",
    )
    .unwrap();

    let result = run(
        fs,
        "module.exports = require('/project/src/app.js');",
    );
    assert!(result.ok, "unexpected failure: {:?}", result.error);
    assert_eq!(result.data, Some(serde_json::json!("HEY!")));
}
