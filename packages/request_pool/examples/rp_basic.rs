//! Example of a minimal request host with request-scoped pooling installed.
//!
//! Three requests are served. Two complete normally and have their objects recycled by the
//! release scheduler. The third never signals completion, so the scheduler gives up at the
//! ceiling and the host drains it manually.

use std::collections::HashMap;
use std::time::Duration;

use nm::Report;
use request_pool::{
    AfterRequest, BeforeRequest, HookError, HookHost, Registry, ReleaseConfig, ReleaseScheduler,
    RequestContext, Shape,
};

const HEADERS: Shape<HashMap<String, String>> = Shape::new("headers").with_capacity(16);
const BODY: Shape<Vec<u8>> = Shape::new("body").with_capacity(1024);

/// A stand-in for a real server framework's hook registry.
#[derive(Default)]
struct Host {
    before: Vec<BeforeRequest>,
    after: Vec<AfterRequest>,
}

impl HookHost for Host {
    fn add_before_request(&mut self, _component: &'static str, hook: BeforeRequest) {
        self.before.push(hook);
    }

    fn add_after_request(&mut self, _component: &'static str, hook: AfterRequest) {
        self.after.push(hook);
    }
}

impl Host {
    fn begin(&self) -> Result<RequestContext, HookError> {
        self.before
            .iter()
            .try_fold(RequestContext::new(), |ctx, hook| hook(ctx))
    }

    fn end(&self, ctx: RequestContext, payload: &str) -> RequestContext {
        self.after
            .iter()
            .fold(ctx, |ctx, hook| hook(ctx, &payload.to_string(), None))
    }
}

fn handle(ctx: &RequestContext, path: &str) {
    let headers = request_pool::borrow(ctx, &HEADERS);
    headers
        .lock()
        .insert("path".to_string(), path.to_string());

    let body = request_pool::borrow(ctx, &BODY);
    body.lock().extend_from_slice(b"hello from ");
    body.lock().extend_from_slice(path.as_bytes());

    println!(
        "served {path}: {}",
        String::from_utf8_lossy(&body.lock())
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), HookError> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let registry = Registry::builder()
        .register_recyclable(HEADERS)
        .register_recyclable(BODY)
        .build();

    let scheduler = ReleaseScheduler::with_config(
        ReleaseConfig::builder()
            .ceiling(Duration::from_millis(200))
            .build(),
    );

    let mut host = Host::default();
    request_pool::install(&mut host, "example", &registry, &scheduler);

    for path in ["/index", "/about"] {
        let ctx = host.begin()?;
        handle(&ctx, path);

        let ctx = host.end(ctx, path);

        // The response has been written.
        ctx.complete();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // A request whose work continues in the background after the callbacks have run.
    let ctx = host.begin()?;
    handle(&ctx, "/stream");
    let ctx = host.end(ctx, "/stream");

    tokio::time::sleep(Duration::from_millis(300)).await;
    println!("release ceiling passed; draining /stream manually");
    request_pool::manual_drain(&ctx);

    let headers = registry.freelist(&HEADERS)?;
    let body = registry.freelist(&BODY)?;
    println!("headers freelist: {:?}", headers.stats());
    println!("body freelist: {:?}", body.stats());

    println!("{}", Report::collect());

    Ok(())
}
