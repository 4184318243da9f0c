//! Every returned string goes back through the ledger.

use shoaldb_ffi::{shoaldb_close, shoaldb_execute, shoaldb_free_string, shoaldb_live_strings, shoaldb_open};
use std::ffi::CString;

#[test]
fn long_loop_leaves_no_live_strings() {
    let temp = tempfile::tempdir().unwrap();
    let path = CString::new(temp.path().to_str().unwrap()).unwrap();
    let engine = unsafe { shoaldb_open(path.as_ptr()) };
    assert!(!engine.is_null());

    let baseline = shoaldb_live_strings();
    let commands = [
        r#"{"op":"insert","collection":"c","doc":{"n":1}}"#,
        r#"{"op":"find","collection":"c","query":{}}"#,
        r#"{"op":"bogus"}"#,
        "not json",
    ];
    for i in 0..500 {
        let cmd = CString::new(commands[i % commands.len()]).unwrap();
        let ptr = unsafe { shoaldb_execute(engine, cmd.as_ptr()) };
        assert!(!ptr.is_null());
        assert_eq!(shoaldb_live_strings(), baseline + 1);
        unsafe { shoaldb_free_string(ptr) };
    }
    assert_eq!(shoaldb_live_strings(), baseline);

    shoaldb_close(engine);
}
