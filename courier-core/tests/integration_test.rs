//! Integration tests for courier-core

use async_trait::async_trait;
use courier_core::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Clone)]
struct RegisterUser {
    email: String,
}

impl Request for RegisterUser {
    type Response = u64;
}

struct GetUserCount;

impl Request for GetUserCount {
    type Response = usize;
    const KIND: RequestKind = RequestKind::Query;
}

struct DeactivateUser(u64);

impl Request for DeactivateUser {
    type Response = ();
}

#[derive(Default)]
struct UserStore {
    users: Mutex<Vec<String>>,
}

struct RegisterUserHandler {
    store: Arc<UserStore>,
}

#[async_trait]
impl RequestHandler<RegisterUser> for RegisterUserHandler {
    async fn handle(&self, command: RegisterUser, _ctx: &RequestContext) -> Result<u64, BoxError> {
        let mut users = self.store.users.lock();
        users.push(command.email);
        Ok(users.len() as u64)
    }
}

struct GetUserCountHandler {
    store: Arc<UserStore>,
}

#[async_trait]
impl RequestHandler<GetUserCount> for GetUserCountHandler {
    async fn handle(&self, _query: GetUserCount, _ctx: &RequestContext) -> Result<usize, BoxError> {
        Ok(self.store.users.lock().len())
    }
}

struct DeactivateUserHandler;

#[async_trait]
impl RequestHandler<DeactivateUser> for DeactivateUserHandler {
    async fn handle(&self, command: DeactivateUser, _ctx: &RequestContext) -> Result<(), BoxError> {
        if command.0 == 0 {
            return Err("user 0 cannot be deactivated".into());
        }
        Ok(())
    }
}

struct EmailValidator;

#[async_trait]
impl Validator<RegisterUser> for EmailValidator {
    async fn validate(&self, command: &RegisterUser) -> Result<(), ValidationErrors> {
        if command.email.contains('@') {
            Ok(())
        } else {
            Err(ValidationError::new("email", "must contain @")
                .with_constraint("email")
                .into())
        }
    }
}

/// Handlers built per dispatch from the active service scope.
struct UsersModule;

impl HandlerModule for UsersModule {
    fn name(&self) -> &'static str {
        "users"
    }

    fn register(&self, catalog: &mut HandlerCatalog) {
        catalog
            .handler_factory::<RegisterUser, _, _>(|services| {
                let store = services.get_arc::<UserStore>().ok_or(DispatchError::HandlerResolution {
                    handler: "RegisterUserHandler",
                    reason: "UserStore missing from scope".into(),
                })?;
                Ok(RegisterUserHandler { store })
            })
            .handler_factory::<GetUserCount, _, _>(|services| {
                let store = services.get_arc::<UserStore>().ok_or(DispatchError::HandlerResolution {
                    handler: "GetUserCountHandler",
                    reason: "UserStore missing from scope".into(),
                })?;
                Ok(GetUserCountHandler { store })
            })
            .handler::<DeactivateUser, _>(DeactivateUserHandler)
            .validator::<RegisterUser, _>(EmailValidator);
    }
}

fn services() -> Services {
    let mut services = Services::new();
    services.insert(UserStore::default());
    services
}

// =============================================================================
// Dispatch
// =============================================================================

#[tokio::test]
async fn test_command_then_query() {
    let dispatcher = Dispatcher::builder()
        .module(UsersModule)
        .services(services())
        .build()
        .unwrap();
    let token = CancellationToken::new();

    let id = dispatcher
        .send(RegisterUser { email: "ada@example.com".into() }, &token)
        .await
        .unwrap();
    assert_eq!(id, 1);
    assert_eq!(dispatcher.send(GetUserCount, &token).await.unwrap(), 1);
}

#[tokio::test]
async fn test_factory_resolution_failure_surfaces() {
    let dispatcher = Dispatcher::builder().module(UsersModule).build().unwrap();

    let err = dispatcher
        .send(GetUserCount, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HandlerResolution);
}

#[tokio::test]
async fn test_handler_failure_keeps_cause() {
    let dispatcher = Dispatcher::builder().module(UsersModule).build().unwrap();

    let err = dispatcher
        .execute(DeactivateUser(0), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::HandlerInvocation);
    let source = std::error::Error::source(&err).unwrap();
    assert_eq!(source.to_string(), "user 0 cannot be deactivated");

    dispatcher
        .execute(DeactivateUser(7), &CancellationToken::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_auto_validation() {
    let dispatcher = Dispatcher::builder()
        .module(UsersModule)
        .services(services())
        .build()
        .unwrap();
    let token = CancellationToken::new();

    let err = dispatcher
        .send(RegisterUser { email: "nope".into() }, &token)
        .await
        .unwrap_err();
    match err {
        DispatchError::Validation(errors) => assert_eq!(errors.errors[0].field, "email"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(dispatcher.send(GetUserCount, &token).await.unwrap(), 0);

    let dispatcher = Dispatcher::builder()
        .module(UsersModule)
        .services(services())
        .options(DispatchOptions::new().auto_validate_requests(false))
        .build()
        .unwrap();
    assert!(dispatcher.send(RegisterUser { email: "nope".into() }, &token).await.is_ok());
}

// =============================================================================
// Behaviors
// =============================================================================

struct Recording {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl PipelineBehavior for Recording {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn handle(&self, request: AnyRequest, ctx: RequestContext, next: Next) -> DispatchResult<AnyResponse> {
        self.log.lock().push(format!("{}:before", self.name));
        let result = next.run(request, ctx).await;
        self.log.lock().push(format!("{}:after", self.name));
        result
    }
}

#[tokio::test]
async fn test_behaviors_wrap_in_registration_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = Dispatcher::builder()
        .module(UsersModule)
        .behavior(Recording { name: "outer", log: log.clone() })
        .behavior(Recording { name: "inner", log: log.clone() })
        .build()
        .unwrap();

    dispatcher
        .execute(DeactivateUser(1), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        *log.lock(),
        vec!["outer:before", "inner:before", "inner:after", "outer:after"]
    );
    assert_eq!(
        dispatcher.pipelines().behavior_names::<RegisterUser>(),
        Some(&["outer", "inner", "validation"][..])
    );
}

struct NormalizeEmail;

#[async_trait]
impl RequestBehavior<RegisterUser> for NormalizeEmail {
    async fn handle(
        &self,
        mut command: RegisterUser,
        ctx: RequestContext,
        next: TypedNext<RegisterUser>,
    ) -> DispatchResult<u64> {
        command.email = command.email.trim().to_lowercase();
        next.run(command, ctx).await
    }
}

#[tokio::test]
async fn test_typed_behavior_only_wraps_its_request_type() {
    let store = Arc::new(UserStore::default());
    let mut scope = Services::new();
    scope.insert_arc(store.clone());

    let dispatcher = Dispatcher::builder()
        .module(UsersModule)
        .behavior(for_request::<RegisterUser, _>("normalize_email", NormalizeEmail))
        .services(scope)
        .build()
        .unwrap();

    dispatcher
        .send(RegisterUser { email: "  Ada@Example.COM ".into() }, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(store.users.lock()[0], "ada@example.com");
    assert_eq!(
        dispatcher.pipelines().behavior_names::<GetUserCount>(),
        Some(&[][..])
    );
}

struct FlakyRegistration {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl RequestHandler<RegisterUser> for FlakyRegistration {
    async fn handle(&self, _command: RegisterUser, _ctx: &RequestContext) -> Result<u64, BoxError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < 2 {
            return Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "directory service reset the connection",
            )));
        }
        Ok(u64::from(call))
    }
}

#[tokio::test]
async fn test_retry_behavior_recovers_transient_failures() {
    let calls = Arc::new(AtomicU32::new(0));
    let handler_calls = calls.clone();

    let dispatcher = Dispatcher::builder()
        .module(module_fn("flaky", move |catalog| {
            catalog.handler::<RegisterUser, _>(FlakyRegistration {
                calls: handler_calls.clone(),
            });
        }))
        .behavior(
            RetryBehavior::from_options(&RetryOptions {
                max_retry_attempts: 3,
                initial_delay_seconds: 0.001,
                backoff_factor: 2.0,
            })
            .retry::<RegisterUser>(),
        )
        .build()
        .unwrap();

    let result = dispatcher
        .send(RegisterUser { email: "ada@example.com".into() }, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_circuit_breaker_behavior_fails_fast() {
    let breaker = CircuitBreakerBehavior::from_options(&CircuitBreakerOptions {
        failure_threshold: 2,
        duration_of_break_seconds: 30.0,
    });
    let dispatcher = Dispatcher::builder()
        .module(UsersModule)
        .behavior(breaker)
        .build()
        .unwrap();
    let token = CancellationToken::new();

    for _ in 0..2 {
        let err = dispatcher.execute(DeactivateUser(0), &token).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HandlerInvocation);
    }

    let err = dispatcher.execute(DeactivateUser(1), &token).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CircuitOpen);
}

#[tokio::test]
async fn test_timed_out_trial_does_not_wedge_breaker() {
    struct Lookup;
    impl Request for Lookup {
        type Response = u32;
    }

    struct LookupHandler {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl RequestHandler<Lookup> for LookupHandler {
        async fn handle(&self, _: Lookup, _ctx: &RequestContext) -> Result<u32, BoxError> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err("directory unavailable".into()),
                1 => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(1)
                }
                call => Ok(call),
            }
        }
    }

    let calls = Arc::new(AtomicU32::new(0));
    let handler_calls = calls.clone();
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::new("lookup")
            .failure_threshold(1)
            .duration_of_break(Duration::from_millis(50)),
    );

    let dispatcher = Dispatcher::builder()
        .module(module_fn("lookup", move |catalog| {
            catalog.handler::<Lookup, _>(LookupHandler {
                calls: handler_calls.clone(),
            });
        }))
        .behavior(CircuitBreakerBehavior::shared(breaker.clone()))
        .options(DispatchOptions::new().default_timeout_seconds(1))
        .build()
        .unwrap();
    let token = CancellationToken::new();

    let err = dispatcher.send(Lookup, &token).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HandlerInvocation);
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(80)).await;

    // trial is dropped by the dispatch deadline
    let err = dispatcher.send(Lookup, &token).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_ne!(breaker.state(), CircuitState::Closed);

    for expected in 2..5 {
        assert_eq!(dispatcher.send(Lookup, &token).await.unwrap(), expected);
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

// =============================================================================
// Metrics and summary
// =============================================================================

#[tokio::test]
async fn test_metrics_per_request_type() {
    let dispatcher = Dispatcher::builder().module(UsersModule).build().unwrap();
    let token = CancellationToken::new();

    dispatcher.execute(DeactivateUser(1), &token).await.unwrap();
    let _ = dispatcher.execute(DeactivateUser(0), &token).await;

    let snapshot = dispatcher.metrics().unwrap().snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].total, 2);
    assert_eq!(snapshot[0].succeeded, 1);
    assert_eq!(snapshot[0].failed, 1);

    let json = serde_json::to_value(&snapshot[0]).unwrap();
    assert!(json["request_type"].as_str().unwrap().ends_with("DeactivateUser"));
}

#[tokio::test]
async fn test_summary_counts() {
    let dispatcher = Dispatcher::builder().module(UsersModule).build().unwrap();
    let summary = dispatcher.summary();

    assert_eq!(summary.command_handlers, 2);
    assert_eq!(summary.query_handlers, 1);
    assert_eq!(summary.compiled_pipelines, 3);
    assert_eq!(dispatcher.registry().modules(), &["users"]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_behavior_inside_pipeline() {
    struct Stall;
    impl Request for Stall {
        type Response = ();
    }

    struct StallHandler;

    #[async_trait]
    impl RequestHandler<Stall> for StallHandler {
        async fn handle(&self, _: Stall, ctx: &RequestContext) -> Result<(), BoxError> {
            ctx.cancellation().cancelled().await;
            Err(DispatchError::Cancelled.into())
        }
    }

    let dispatcher = Dispatcher::builder()
        .module(module_fn("stall", |catalog| {
            catalog.handler::<Stall, _>(StallHandler);
        }))
        .behavior(TimeoutBehavior::new(Duration::from_millis(200)))
        .options(DispatchOptions::new().default_timeout_seconds(0))
        .build()
        .unwrap();

    let err = dispatcher.execute(Stall, &CancellationToken::new()).await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(dispatcher.metrics().unwrap().snapshot()[0].timed_out, 1);
}
