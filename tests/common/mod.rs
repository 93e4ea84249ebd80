#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crosscall::{Arguments, Payload, Wrapper, WrapperBuilder, WrapperError, WrapperResult};

/// One slow call's duration; the timing tests key their margins off this.
pub const NAP: Duration = Duration::from_millis(400);

pub struct TestService {
    pub calls: AtomicUsize,
}

pub fn service() -> TestService {
    TestService {
        calls: AtomicUsize::new(0),
    }
}

pub fn register(builder: WrapperBuilder<TestService>) -> WrapperBuilder<TestService> {
    builder
        .method("echo", |_service, invocation| {
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
        .method("whoops", |_service, _invocation| -> WrapperResult<Payload> {
            Err(WrapperError::method("Whoops"))
        })
        .method("slow_echo", |service: &TestService, invocation| {
            service.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(NAP);
            Ok(invocation.arg(0)?.clone())
        })
        .method("pass_through", |_service, invocation| {
            Ok(invocation.arg(0)?.clone())
        })
        .method("bump", |service: &TestService, _invocation| {
            service.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Payload::new(service.calls.load(Ordering::SeqCst) as i64))
        })
        .method("yield_probe", |_service, mut invocation| {
            let argument = invocation.arg(0)?.clone();
            let server_id = argument.value_id()?;
            let observed = invocation
                .block()?
                .call(Arguments::new().payload(argument))?;
            let block_id: usize = observed.extract()?;
            Ok(Payload::new((server_id, block_id)))
        })
        .method("explode", |_service, _invocation| -> WrapperResult<Payload> {
            panic!("boom");
        })
}

pub fn isolated(threads: usize) -> Wrapper<TestService> {
    register(Wrapper::builder(service()).name("test-service").threads(threads))
        .start()
        .expect("wrapper starts")
}
