use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::error::{WrapperError, WrapperResult};
use crate::payload::{Arguments, Payload};
use crate::policy::PolicySettings;
use crate::wrapper::{Wrapper, WrapperBuilder};

#[derive(Default)]
struct Recorder {
    calls: AtomicUsize,
}

fn register(builder: WrapperBuilder<Recorder>) -> WrapperBuilder<Recorder> {
    builder
        .method("echo", |_recorder, invocation| {
            let mut positional = Vec::new();
            for payload in invocation.arguments().positional() {
                positional.push(payload.extract::<String>()?);
            }
            let mut keywords = Vec::new();
            for (name, payload) in invocation.arguments().keywords() {
                keywords.push(format!("{name}: {}", payload.extract::<String>()?));
            }
            Ok(Payload::new(format!(
                "[{}], {{{}}}",
                positional.join(", "),
                keywords.join(", ")
            )))
        })
        .method("bump", |recorder: &Recorder, _invocation| {
            recorder.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Payload::new(()))
        })
        .method("nap", |_recorder, _invocation| {
            thread::sleep(Duration::from_millis(200));
            Ok(Payload::new(()))
        })
        .method("sum_with_block", |_recorder, mut invocation| {
            let mut total = 0i64;
            for step in 0..3i64 {
                let result = invocation.block()?.call(Arguments::new().arg(step))?;
                total += result.extract::<i64>()?;
            }
            Ok(Payload::new(total))
        })
        .method("run_block", |_recorder, mut invocation| {
            let arguments = invocation.arguments().clone();
            invocation.block()?.call(arguments)
        })
        .method("explode", |_recorder, _invocation| -> WrapperResult<Payload> {
            panic!("boom");
        })
}

fn recorder_builder(threads: usize) -> WrapperBuilder<Recorder> {
    register(
        Wrapper::builder(Recorder::default())
            .name("recorder")
            .threads(threads),
    )
}

#[test]
fn echo_round_trip() {
    let wrapper = recorder_builder(0).start().expect("wrapper starts");
    let reply = wrapper
        .call(
            "echo",
            Arguments::new()
                .arg("1".to_string())
                .arg("2".to_string())
                .kwarg("a", "b".to_string())
                .kwarg("c", "d".to_string()),
        )
        .expect("echo succeeds");
    assert_eq!(
        reply.extract::<String>().unwrap(),
        "[1, 2], {a: b, c: d}"
    );
    wrapper.async_stop().join();
}

#[test]
fn unknown_methods_are_reported() {
    let wrapper = recorder_builder(0).start().expect("wrapper starts");
    let outcome = wrapper.call("nope", Arguments::new());
    assert!(matches!(outcome, Err(WrapperError::NoSuchMethod(name)) if name == "nope"));
    wrapper.async_stop().join();
}

#[test]
fn capability_query_reflects_the_method_table() {
    let wrapper = recorder_builder(0).start().expect("wrapper starts");
    let stub = wrapper.stub();
    assert!(stub.responds_to("echo").unwrap());
    assert!(stub.responds_to("respond_to?").unwrap());
    assert!(!stub.responds_to("nope").unwrap());
    wrapper.async_stop().join();
}

#[test]
fn relay_blocks_service_multiple_yields() {
    let wrapper = recorder_builder(1).start().expect("wrapper starts");
    let reply = wrapper
        .call_with_block("sum_with_block", Arguments::new(), |arguments| {
            let step: i64 = arguments
                .get(0)
                .ok_or_else(|| WrapperError::method("missing step"))?
                .extract()?;
            Ok(Payload::new(step * 10))
        })
        .expect("blocked call succeeds");
    assert_eq!(reply.extract::<i64>().unwrap(), 30);
    wrapper.async_stop().join();
}

#[test]
fn block_errors_travel_back_to_the_method() {
    let wrapper = recorder_builder(0).start().expect("wrapper starts");
    let outcome = wrapper.call_with_block(
        "sum_with_block",
        Arguments::new(),
        |_arguments| -> WrapperResult<Payload> { Err(WrapperError::method("block refused")) },
    );
    assert!(matches!(outcome, Err(WrapperError::Method(msg)) if msg == "block refused"));
    wrapper.async_stop().join();
}

#[test]
fn relay_blocks_run_on_the_calling_thread() {
    let wrapper = recorder_builder(0).start().expect("wrapper starts");
    let caller = thread::current().id();
    let reply = wrapper
        .call_with_block("run_block", Arguments::new(), move |_arguments| {
            Ok(Payload::new(thread::current().id()))
        })
        .expect("blocked call succeeds");
    assert_eq!(reply.extract::<ThreadId>().unwrap(), caller);
    wrapper.async_stop().join();
}

#[test]
fn in_place_blocks_run_in_the_server_domain() {
    let wrapper = recorder_builder(0)
        .method_policy(
            "run_block",
            PolicySettings::new().execute_blocks_in_place(true),
        )
        .start()
        .expect("wrapper starts");
    let caller = thread::current().id();
    let reply = wrapper
        .call_with_block("run_block", Arguments::new(), move |_arguments| {
            Ok(Payload::new(thread::current().id()))
        })
        .expect("blocked call succeeds");
    assert_ne!(reply.extract::<ThreadId>().unwrap(), caller);
    wrapper.async_stop().join();
}

#[test]
fn panicking_handlers_leave_the_pool_alive() {
    let wrapper = recorder_builder(1).start().expect("wrapper starts");
    let outcome = wrapper.call("explode", Arguments::new());
    assert!(matches!(outcome, Err(WrapperError::Panicked(msg)) if msg.contains("boom")));
    // The worker that caught the panic still serves the next call.
    wrapper.call("bump", Arguments::new()).expect("pool still serves");
    wrapper.async_stop().join();
}

#[test]
fn draining_refuses_new_calls_but_finishes_in_flight() {
    let wrapper = recorder_builder(2).start().expect("wrapper starts");
    let napper = {
        let wrapper = wrapper.clone();
        thread::spawn(move || wrapper.call("nap", Arguments::new()))
    };
    thread::sleep(Duration::from_millis(60));
    wrapper.async_stop();
    thread::sleep(Duration::from_millis(40));
    let refused = wrapper.call("bump", Arguments::new());
    assert!(matches!(refused, Err(WrapperError::Closed)));
    // The call that was already in flight still completes.
    assert!(napper.join().unwrap().is_ok());
    wrapper.join();
}

#[test]
fn stop_is_idempotent_from_any_peer() {
    let wrapper = recorder_builder(0).start().expect("wrapper starts");
    let stoppers: Vec<_> = (0..4)
        .map(|_| {
            let wrapper = wrapper.clone();
            thread::spawn(move || {
                wrapper.async_stop();
            })
        })
        .collect();
    for stopper in stoppers {
        stopper.join().unwrap();
    }
    wrapper.async_stop().join();
    assert!(matches!(
        wrapper.call("bump", Arguments::new()),
        Err(WrapperError::Closed)
    ));
}

#[test]
fn join_blocks_until_the_server_terminates() {
    let wrapper = recorder_builder(1).start().expect("wrapper starts");
    let started = Instant::now();
    let napper = {
        let wrapper = wrapper.clone();
        thread::spawn(move || wrapper.call("nap", Arguments::new()))
    };
    thread::sleep(Duration::from_millis(50));
    wrapper.async_stop().join();
    assert!(started.elapsed() >= Duration::from_millis(180));
    assert!(napper.join().unwrap().is_ok());
}

#[test]
fn recovery_returns_the_object_exactly_once() {
    let wrapper = recorder_builder(0).start().expect("wrapper starts");
    wrapper.call("bump", Arguments::new()).unwrap();
    wrapper.call("bump", Arguments::new()).unwrap();
    wrapper.async_stop().join();
    let recorder = wrapper.recover_object().expect("object comes back");
    assert_eq!(recorder.calls.load(Ordering::SeqCst), 2);
    assert!(matches!(
        wrapper.recover_object(),
        Err(WrapperError::AlreadyRecovered)
    ));
}

#[test]
fn local_wrappers_share_the_object_and_deny_recovery() {
    let service = Arc::new(Recorder::default());
    let wrapper = register(Wrapper::shared(Arc::clone(&service)).name("local-recorder"))
        .start()
        .expect("wrapper starts");
    wrapper.call("bump", Arguments::new()).unwrap();
    // The constructing thread still owns a working handle.
    assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    assert!(matches!(
        wrapper.recover_object(),
        Err(WrapperError::RecoveryNotPermitted)
    ));
    wrapper.async_stop().join();
    // Join after teardown is a no-op.
    wrapper.join();
    assert!(matches!(
        wrapper.call("bump", Arguments::new()),
        Err(WrapperError::Closed)
    ));
}
