//! End-to-end dispatch behavior through the public surface: scripted
//! sources in, captured writers out.

use std::sync::{Arc, Mutex};

use sluice::testing::{BufferWriter, FailingWriter, TestSource};
use sluice::{
    DispatchOutcome, ErrorLogger, ErrorPolicy, Middleware, MiddlewareWrapper, Pipe, Request,
    Response, ResponseStatus, RouteAction, RouteMap, RouteMapErrorPolicy, SluiceConfig,
    SluiceError,
};

#[derive(Clone, Default)]
struct CaptureLogger {
    messages: Arc<Mutex<Vec<String>>>,
}

impl CaptureLogger {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut self.messages.lock().unwrap())
    }
}

impl ErrorLogger for CaptureLogger {
    fn log(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

fn append_header(req: &mut Request, name: &str, tag: &str) {
    let value = match req.headers().get(name) {
        Some(existing) => format!("{existing},{tag}"),
        None => tag.to_string(),
    };
    req.headers_mut().set(name, value);
}

#[test]
fn named_params_arrive_in_declaration_order() {
    let mut pipe = Pipe::new();
    pipe.get("/users/:uid/posts/:pid", |req: &mut Request| {
        let pairs: Vec<String> = req
            .uri()
            .params()
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        Ok(Response::new().text(pairs.join("&")))
    });

    let mut writer = BufferWriter::new();
    pipe.run(&TestSource::get("/users/7/posts/9"), &mut writer)
        .unwrap();
    assert_eq!(writer.text(), "uid=7&pid=9");
}

#[test]
fn trailing_slash_reaches_the_same_route() {
    let mut pipe = Pipe::new();
    pipe.get("/items/:id", |req: &mut Request| {
        Ok(Response::new().text(req.uri().param("id").unwrap_or_default().to_string()))
    });

    for path in ["/items/5", "/items/5/"] {
        let mut writer = BufferWriter::new();
        pipe.run(&TestSource::get(path), &mut writer).unwrap();
        assert_eq!(writer.text(), "5", "failed for {path}");
    }
}

#[test]
fn traversal_and_duplicate_slashes_normalize_before_routing() {
    let mut pipe = Pipe::new();
    pipe.get("/a/b/c", |_req: &mut Request| {
        Ok(Response::new().text("reached"))
    });

    for path in ["/a/b/../c", "/a//b/../c", "/a//b//c"] {
        let mut writer = BufferWriter::new();
        pipe.run(&TestSource::get(path), &mut writer).unwrap();
        assert_eq!(writer.text(), "reached", "failed for {path}");
    }
}

#[test]
fn first_registered_route_wins() {
    let mut pipe = Pipe::new();
    pipe.get("/users/:id", |_req: &mut Request| {
        Ok(Response::new().text("by-id"))
    });
    pipe.get("/users/special", |_req: &mut Request| {
        Ok(Response::new().text("special"))
    });

    let mut writer = BufferWriter::new();
    pipe.run(&TestSource::get("/users/special"), &mut writer)
        .unwrap();
    assert_eq!(writer.text(), "by-id");
}

#[test]
fn sub_pipe_handles_its_subtree() {
    let mut users = Pipe::new();
    users.get("/:id", |req: &mut Request| {
        Ok(Response::new().text(format!(
            "user {}",
            req.uri().param("id").unwrap_or_default()
        )))
    });

    let mut api = Pipe::new();
    api.pipe("/users", users);

    let mut root = Pipe::new();
    root.pipe("/api", api);

    let mut writer = BufferWriter::new();
    let outcome = root
        .run(&TestSource::get("/api/users/31"), &mut writer)
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Handled);
    assert_eq!(writer.text(), "user 31");
}

#[test]
fn chosen_sub_pipe_is_never_backtracked() {
    // The child claims the /api prefix but has no matching route; the
    // parent's own /api route must not be consulted as a fallback.
    let mut parent = Pipe::new();
    parent.pipe("/api", Pipe::new());
    parent.get("/api/ping", |_req: &mut Request| {
        Ok(Response::new().text("parent"))
    });

    let mut writer = BufferWriter::new();
    let err = parent
        .run(&TestSource::get("/api/ping"), &mut writer)
        .unwrap_err();
    assert!(matches!(err, SluiceError::NotFound { .. }));
    assert_eq!(writer.write_count(), 0);
}

#[test]
fn parent_middleware_runs_before_child_middleware() {
    let mut child = Pipe::new();
    child.use_middleware(Arc::new(
        MiddlewareWrapper::new().on_before_execute(|req| append_header(req, "X-Trace", "child")),
    ));
    child.get("/echo", |req: &mut Request| {
        Ok(Response::new().text(req.headers().get("X-Trace").unwrap_or_default().to_string()))
    });

    let mut parent = Pipe::new();
    parent.use_middleware(Arc::new(
        MiddlewareWrapper::new().on_before_execute(|req| append_header(req, "X-Trace", "parent")),
    ));
    parent.pipe("/sub", child);

    let mut writer = BufferWriter::new();
    parent
        .run(&TestSource::get("/sub/echo"), &mut writer)
        .unwrap();
    assert_eq!(writer.text(), "parent,child");
}

#[test]
fn middleware_can_rewrite_the_response_before_send() {
    let mut pipe = Pipe::new();
    pipe.use_middleware(Arc::new(
        MiddlewareWrapper::new().on_before_send(|resp| resp.header_mut().set("X-Frame", "deny")),
    ));
    pipe.get("/page", |_req: &mut Request| Ok(Response::new().text("hi")));

    let mut writer = BufferWriter::new();
    pipe.run(&TestSource::get("/page"), &mut writer).unwrap();
    assert_eq!(writer.header("X-Frame"), Some("deny".to_string()));
}

#[test]
fn unknown_method_raises_without_a_500_handler() {
    let mut pipe = Pipe::new();
    pipe.get("/x", |_req: &mut Request| Ok(Response::new().text("x")));

    let mut writer = BufferWriter::new();
    let err = pipe
        .run(&TestSource::new("BREW", "/x"), &mut writer)
        .unwrap_err();
    match err {
        SluiceError::UnsupportedMethod { token } => assert_eq!(token, "BREW"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unknown_method_is_recovered_by_a_500_handler() {
    let mut pipe = Pipe::new();
    pipe.error(500, |_req: &mut Request| {
        Ok(Response::new().text("server error"))
    });

    let mut writer = BufferWriter::new();
    let outcome = pipe
        .run(&TestSource::new("BREW", "/x"), &mut writer)
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::ErrorHandled);
    assert_eq!(writer.status_code(), Some(500));
    assert_eq!(writer.text(), "server error");
}

#[test]
fn not_found_with_and_without_a_404_handler() {
    let mut bare = Pipe::new();
    let mut writer = BufferWriter::new();
    let err = bare
        .run(&TestSource::get("/missing"), &mut writer)
        .unwrap_err();
    assert!(matches!(err, SluiceError::NotFound { .. }));
    assert_eq!(writer.write_count(), 0);

    bare.error(404, |req: &mut Request| {
        Ok(Response::new().text(format!(
            "nothing at {}",
            req.uri().uri().unwrap_or_default()
        )))
    });
    let outcome = bare
        .run(&TestSource::get("/missing"), &mut writer)
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::ErrorHandled);
    assert_eq!(writer.status_code(), Some(404));
    assert_eq!(writer.text(), "nothing at /missing");
}

#[test]
fn handler_failure_is_recovered_by_a_500_handler() {
    let mut pipe = Pipe::new();
    pipe.get("/boom", |_req: &mut Request| {
        Err(SluiceError::handler("database down"))
    });
    pipe.error(500, |_req: &mut Request| Ok(Response::new().text("oops")));

    let mut writer = BufferWriter::new();
    let outcome = pipe.run(&TestSource::get("/boom"), &mut writer).unwrap();
    assert_eq!(outcome, DispatchOutcome::ErrorHandled);
    assert_eq!(writer.status_code(), Some(500));
}

#[test]
fn log_policy_reports_failure_without_raising() {
    let logger = CaptureLogger::default();
    let config = SluiceConfig::new()
        .error_policy(ErrorPolicy::Log)
        .error_logger(logger.clone());

    let pipe = Pipe::with_config(config);
    let mut writer = BufferWriter::new();
    let outcome = pipe
        .run(&TestSource::get("/nowhere"), &mut writer)
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Failed);
    assert_eq!(writer.write_count(), 0);
    let logged = logger.take();
    assert_eq!(logged.len(), 1);
    assert!(logged[0].contains("/nowhere"));
}

#[test]
fn transport_failure_bypasses_error_handlers() {
    let mut pipe = Pipe::new();
    pipe.get("/x", |_req: &mut Request| Ok(Response::new().text("x")));
    pipe.error(500, |_req: &mut Request| Ok(Response::new().text("nope")));

    let mut writer = FailingWriter::new("socket closed");
    let err = pipe.run(&TestSource::get("/x"), &mut writer).unwrap_err();
    assert!(matches!(err, SluiceError::Transport { .. }));
}

#[test]
fn registering_a_status_code_makes_it_usable() {
    assert!(matches!(
        ResponseStatus::new(999),
        Err(SluiceError::UnknownStatusCode { code: 999 })
    ));
    assert!(ResponseStatus::register(999, "Vendor Reserved"));

    let mut pipe = Pipe::new();
    pipe.get("/vendor", |_req: &mut Request| {
        Response::new().text("custom").with_status_code(999)
    });

    let mut writer = BufferWriter::new();
    pipe.run(&TestSource::get("/vendor"), &mut writer).unwrap();
    assert_eq!(writer.status_code(), Some(999));
    assert_eq!(writer.reason(), Some("Vendor Reserved"));
}

#[test]
fn route_map_selects_by_segment_and_passes_remaining_args() {
    let mut map = RouteMap::new();
    map.bind("add", |_req, args| {
        let sum: i64 = args.iter().filter_map(|a| a.parse::<i64>().ok()).sum();
        Ok(Response::new().text(sum.to_string()))
    })
    .unwrap();

    let mut pipe = Pipe::new();
    pipe.map("/calc", map);

    let mut writer = BufferWriter::new();
    let outcome = pipe
        .run(&TestSource::get("/calc/add/2/3"), &mut writer)
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Handled);
    assert_eq!(writer.text(), "5");
}

#[test]
fn unbound_route_map_segment_falls_through_to_tables() {
    let mut map = RouteMap::new();
    map.bind("add", |_req, _args| Ok(Response::new().text("added")))
        .unwrap();

    let mut pipe = Pipe::new();
    pipe.map("/calc", map);
    pipe.get("/calc/:op/:a", |req: &mut Request| {
        Ok(Response::new().text(format!(
            "table:{}",
            req.uri().param("op").unwrap_or_default()
        )))
    });

    let mut writer = BufferWriter::new();
    pipe.run(&TestSource::get("/calc/sub/1"), &mut writer)
        .unwrap();
    assert_eq!(writer.text(), "table:sub");
}

#[test]
fn failed_route_map_handler_is_ignored_by_default() {
    let mut map = RouteMap::new();
    map.bind("boom", |_req, _args| Err(SluiceError::handler("exploded")))
        .unwrap();

    let mut pipe = Pipe::new();
    pipe.map("/jobs", map);
    pipe.get("/jobs/boom", |_req: &mut Request| {
        Ok(Response::new().text("table caught it"))
    });

    let mut writer = BufferWriter::new();
    let outcome = pipe
        .run(&TestSource::get("/jobs/boom"), &mut writer)
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Handled);
    assert_eq!(writer.text(), "table caught it");
}

#[test]
fn route_map_failures_can_be_logged_or_propagated() {
    let build = |policy: RouteMapErrorPolicy, logger: &CaptureLogger| {
        let mut map = RouteMap::new();
        map.bind("boom", |_req, _args| Err(SluiceError::handler("exploded")))
            .unwrap();
        let config = SluiceConfig::new()
            .route_map_error_policy(policy)
            .error_logger(logger.clone());
        let mut pipe = Pipe::with_config(config);
        pipe.map("/jobs", map);
        pipe
    };

    let logger = CaptureLogger::default();
    let pipe = build(RouteMapErrorPolicy::Log, &logger);
    let mut writer = BufferWriter::new();
    // Falls through to an empty table after logging.
    let err = pipe
        .run(&TestSource::get("/jobs/boom"), &mut writer)
        .unwrap_err();
    assert!(matches!(err, SluiceError::NotFound { .. }));
    let logged = logger.take();
    assert_eq!(logged.len(), 1);
    assert!(logged[0].contains("exploded"));

    let logger = CaptureLogger::default();
    let pipe = build(RouteMapErrorPolicy::Propagate, &logger);
    let err = pipe
        .run(&TestSource::get("/jobs/boom"), &mut writer)
        .unwrap_err();
    assert!(matches!(err, SluiceError::Handler { .. }));
    assert!(logger.take().is_empty());
}

struct AuditedAction {
    log: Arc<Mutex<Vec<String>>>,
}

impl RouteAction for AuditedAction {
    fn execute(&self, _request: &mut Request) -> Result<Response, SluiceError> {
        Ok(Response::new().text("audited"))
    }
}

impl Middleware for AuditedAction {
    fn before_execute(&self, req: &mut Request) {
        self.log
            .lock()
            .unwrap()
            .push(format!("saw {}", req.uri().uri().unwrap_or_default()));
    }
}

#[test]
fn use_route_hooks_fire_only_on_their_own_pattern() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut pipe = Pipe::new();
    pipe.use_route(
        "/admin/:section",
        Arc::new(AuditedAction {
            log: Arc::clone(&log),
        }),
    );
    pipe.get("/public", |_req: &mut Request| {
        Ok(Response::new().text("public"))
    });

    let mut writer = BufferWriter::new();
    pipe.run(&TestSource::get("/public"), &mut writer).unwrap();
    assert!(log.lock().unwrap().is_empty());

    pipe.run(&TestSource::get("/admin/users"), &mut writer)
        .unwrap();
    assert_eq!(writer.text(), "audited");
    assert_eq!(*log.lock().unwrap(), vec!["saw /admin/users"]);
}

#[test]
fn post_body_and_query_reach_the_handler() {
    let mut pipe = Pipe::new();
    pipe.post("/users", |req: &mut Request| {
        let name = req
            .body()
            .as_map()
            .and_then(|m| m.get_str("name"))
            .unwrap_or_default()
            .to_string();
        let notify = req.params().get_str("notify").unwrap_or_default().to_string();
        Ok(Response::new().text(format!("{name}/{notify}")))
    });

    let source = TestSource::new("POST", "/users?notify=yes")
        .header("Content-Type", "application/json")
        .body(br#"{"name":"ada"}"#.to_vec());

    let mut writer = BufferWriter::new();
    pipe.run(&source, &mut writer).unwrap();
    assert_eq!(writer.text(), "ada/yes");
}

#[test]
fn redirect_responses_carry_location_and_308() {
    let mut pipe = Pipe::new();
    pipe.get("/old", |_req: &mut Request| Ok(Response::redirect("/new")));

    let mut writer = BufferWriter::new();
    pipe.run(&TestSource::get("/old"), &mut writer).unwrap();
    assert_eq!(writer.status_code(), Some(308));
    assert_eq!(writer.header("Location"), Some("/new".to_string()));
}
