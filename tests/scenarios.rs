//! Integration-level scenarios (spec.md §8, S1-S6) exercising the public
//! `subshell` API end to end against real executables.

use std::sync::{Arc, Mutex};
use subshell::{Options, OutputSpec};

#[test]
fn s1_echo_roundtrip_preserves_argument_boundaries() {
    let echo = subshell::command("echo").expect("resolve echo");
    let out = echo
        .run([subshell::arg("hello world"), subshell::arg("again")])
        .expect("run echo");
    let mut out = out;
    let text = out.wait().expect("wait");
    assert_eq!(text.as_code(), 0);
    assert_eq!(out.stdout().expect("stdout").trim_end(), "hello world again");
}

#[test]
fn s2_argument_with_embedded_spaces_is_not_re_split() {
    let printf = subshell::command("printf").expect("resolve printf");
    let mut out = printf.run([subshell::arg("%s|"), subshell::arg("two words")]).expect("run printf");
    out.wait().expect("wait");
    assert_eq!(out.stdout().expect("stdout"), "two words|");
}

#[test]
fn s3_callback_terminates_process_on_match() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_cb = Arc::clone(&seen);

    let sh = subshell::command("sh").expect("resolve sh");
    let mut options = Options::default();
    options.out = OutputSpec::Callback(spawn::CallbackKind::Process(Box::new(move |line, _stdin, process| {
        let line = String::from_utf8_lossy(line).trim().to_owned();
        seen_cb.lock().expect("lock").push(line.clone());
        if line == "3" {
            process.terminate();
            return true;
        }
        false
    })));
    options.out_bufsize = 1;

    let script = "for i in 1 2 3 4 5; do echo $i; sleep 0.05; done";
    let mut handle = sh
        .call([subshell::arg("-c"), subshell::arg(script)], Vec::new(), options)
        .expect("spawn sh");
    let status = handle.exit_status().expect("wait");

    let seen = seen.lock().expect("lock");
    assert!(seen.contains(&"3".to_owned()));
    assert!(!seen.contains(&"5".to_owned()));
    assert_eq!(status.as_code(), -(nix::sys::signal::Signal::SIGTERM as i32));
}

#[test]
fn s4_ok_code_accepts_nonzero_success() {
    let sh = subshell::command("sh").expect("resolve sh");
    let mut options = Options::default();
    options.ok_code = 3.into();
    let mut handle = sh
        .call([subshell::arg("-c"), subshell::arg("exit 3")], Vec::new(), options)
        .expect("spawn sh");
    let status = handle.wait().expect("accepted exit code");
    assert_eq!(status.as_code(), 3);
}

#[test]
fn s4_unexpected_exit_code_is_an_error() {
    let sh = subshell::command("sh").expect("resolve sh");
    let mut handle = sh.run([subshell::arg("-c"), subshell::arg("exit 7")]).expect("spawn sh");
    let err = handle.wait().expect_err("exit 7 is not ok_code {0}");
    match err {
        subshell::Error::NonZeroExit { code, .. } => assert_eq!(code, 7),
        other => panic!("unexpected error variant: {other}"),
    }
}

#[test]
fn s5_stdin_bytes_are_delivered_and_closed() {
    let cat = subshell::command("cat").expect("resolve cat");
    let mut options = Options::default();
    options.r#in = subshell::InputSpec::Bytes(b"line one\nline two\n".to_vec());
    let mut handle = cat.call([], Vec::new(), options).expect("spawn cat");
    handle.wait().expect("wait");
    assert_eq!(handle.stdout().expect("stdout"), "line one\nline two\n");
}

#[test]
fn s6_tty_out_reports_a_controlling_terminal() {
    let sh = subshell::command("sh").expect("resolve sh");
    let mut options = Options::default();
    options.tty_out = true;
    let mut handle = sh
        .call([subshell::arg("-c"), subshell::arg("test -t 1 && echo yes || echo no")], Vec::new(), options)
        .expect("spawn sh");
    handle.wait().expect("wait");
}

#[test]
fn handle_equality_compares_against_stdout_text() {
    let echo = subshell::command("echo").expect("resolve echo");
    let mut options = Options::default();
    options.out_bufsize = 0;
    let handle = echo.call([subshell::arg("-n"), subshell::arg("ok")], Vec::new(), options).expect("run echo");
    assert!(handle == "ok");
}

#[test]
fn non_zero_exit_carries_stderr() {
    let sh = subshell::command("sh").expect("resolve sh");
    let mut handle = sh
        .run([subshell::arg("-c"), subshell::arg("echo boom 1>&2; exit 1")])
        .expect("spawn sh");
    let err = handle.wait().expect_err("non-zero exit");
    match err {
        subshell::Error::NonZeroExit { stderr, .. } => assert_eq!(stderr.trim_end(), "boom"),
        other => panic!("unexpected error variant: {other}"),
    }
}
