//! Isolated-mode parity: the same request yields an equivalent result
//! through the worker protocol, with logs streamed in order.

use std::sync::{Arc, Mutex};

use nodekit_runtime::{ExecuteOptions, ExecutionMode, RuntimeOptions, Sandbox};
use nodekit_vfs::MemFs;

fn pair(fs: MemFs) -> (Sandbox, Sandbox) {
    let direct = Sandbox::new(ExecutionMode::Direct, RuntimeOptions::default(), fs.clone()).unwrap();
    let isolated = Sandbox::new(ExecutionMode::Isolated, RuntimeOptions::default(), fs).unwrap();
    (direct, isolated)
}

#[test]
fn test_results_match_across_modes() {
    let fs = MemFs::new();
    fs.write_file("/math.js", "exports.add = (x, y) => x + y;").unwrap();
    let (mut direct, mut isolated) = pair(fs);

    let code = "const { add } = require('./math.js');\n\
                console.log('sum is ' + add(2, 3));\n\
                module.exports = { sum: add(2, 3) };";

    let a = direct.execute(code, ExecuteOptions::default()).unwrap();
    let b = isolated.execute(code, ExecuteOptions::default()).unwrap();

    assert!(a.ok && b.ok);
    assert_eq!(a.data, b.data);
    assert_eq!(a.logs, b.logs);
}

#[test]
fn test_isolated_log_ordering_and_streaming() {
    let fs = MemFs::new();
    let mut sb = Sandbox::new(ExecutionMode::Isolated, RuntimeOptions::default(), fs).unwrap();

    let streamed = Arc::new(Mutex::new(Vec::new()));
    let sink = streamed.clone();
    let result = sb
        .execute(
            "for (let i = 0; i < 4; i++) console.log('line ' + i);\n\
             setTimeout(() => console.log('from timer'), 5);",
            ExecuteOptions {
                on_log: Some(Box::new(move |line| {
                    sink.lock().unwrap().push(line.to_string())
                })),
                ..Default::default()
            },
        )
        .unwrap();

    assert!(result.ok, "unexpected failure: {:?}", result.error);
    let expected: Vec<String> = (0..4)
        .map(|i| format!("line {}", i))
        .chain(std::iter::once("from timer".to_string()))
        .collect();
    assert_eq!(result.logs, expected);
    assert_eq!(*streamed.lock().unwrap(), expected);
}

#[test]
fn test_isolated_guest_fault_is_a_result_not_an_error() {
    let fs = MemFs::new();
    let mut sb = Sandbox::new(ExecutionMode::Isolated, RuntimeOptions::default(), fs).unwrap();
    let result = sb
        .execute("null.deref();", ExecuteOptions::default())
        .unwrap();
    assert!(!result.ok);
    assert!(result.error.is_some());
}

#[test]
fn test_isolated_fs_shared_with_host() {
    let fs = MemFs::new();
    fs.create_dir_all("/shared").unwrap();
    let mut sb =
        Sandbox::new(ExecutionMode::Isolated, RuntimeOptions::default(), fs.clone()).unwrap();

    let result = sb
        .execute(
            "require('fs').writeFileSync('/shared/from-guest.txt', 'worker wrote this');",
            ExecuteOptions::default(),
        )
        .unwrap();
    assert!(result.ok, "unexpected failure: {:?}", result.error);
    assert_eq!(
        fs.read_to_string("/shared/from-guest.txt").unwrap(),
        "worker wrote this"
    );
}

#[test]
fn test_isolated_serializes_sequential_calls() {
    let fs = MemFs::new();
    fs.write_file("/state.js", "let n = 0;\nexports.bump = () => ++n;").unwrap();
    let mut sb = Sandbox::new(ExecutionMode::Isolated, RuntimeOptions::default(), fs).unwrap();

    let first = sb
        .execute(
            "module.exports = require('./state.js').bump();",
            ExecuteOptions::default(),
        )
        .unwrap();
    let second = sb
        .execute(
            "module.exports = require('./state.js').bump();",
            ExecuteOptions::default(),
        )
        .unwrap();
    assert_eq!(first.data, Some(serde_json::json!(1.0)));
    assert_eq!(second.data, Some(serde_json::json!(2.0)));
}
