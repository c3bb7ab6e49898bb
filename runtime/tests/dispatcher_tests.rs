//! Integration tests for the shortcode dispatcher
//!
//! Covers the per-shortcode lifecycle: claim resolution, stage order, data
//! loading, view rendering, failure containment and the module wrapper.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use pagekit_core::events::{
    ALTER_MODULE_VIEW_MODEL, BEGIN_PROCESS_MODULE_SHORTCODE, POST_MODULE_GET_DATA, POST_MODULE_GET_DATA_2,
    POST_PROCESS_MODULE_SHORTCODE_PROCESSED_HTML,
};
use pagekit_core::shortcode::parse;
use pagekit_core::{
    DataServiceError, HandlerError, ProcessingOptions, RequestContext, ShortcodeClaim, ViewModel,
};
use pagekit_runtime::config::{FailurePolicy, RenderConfig};
use pagekit_runtime::{DispatchError, DispatchOutcome, Runtime};
use pagekit_testing::{EventRecorder, FnViewRenderer, InMemoryDataService, TestModule, fixtures};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

fn alert() -> TestModule {
    TestModule::new("alert", "Alert")
        .claiming("ALERT")
        .with_template("alert-main.html", r#"<div class="alert">{{ data.title }}</div>"#)
}

fn faq() -> TestModule {
    TestModule::new("faq", "FAQ")
        .claiming("FAQ")
        .with_template("faq-main.html", "<dl>{{ data.question }}</dl>")
}

fn content() -> InMemoryDataService {
    InMemoryDataService::new()
        .with_record(fixtures::record("1", "alert", json!({ "title": "Hi" })))
        .with_record(fixtures::record("42", "faq", json!({ "question": "Why?" })))
}

async fn boot(data: &InMemoryDataService, config: RenderConfig, modules: Vec<TestModule>) -> Runtime {
    let mut builder = Runtime::builder()
        .config(config)
        .data_service(Arc::new(data.clone()));
    for module in modules {
        builder = builder.module(module);
    }
    builder.build().await.expect("runtime should boot")
}

fn options(token: &str) -> ProcessingOptions {
    ProcessingOptions::new(parse(token).next().unwrap(), fixtures::request("/"))
}

// ============================================================================
// Claims and stage order
// ============================================================================

#[tokio::test]
async fn claimed_shortcode_renders_module_view() {
    let data = content();
    let runtime = boot(&data, RenderConfig::default(), vec![alert()]).await;

    let outcome = runtime.dispatcher().dispatch(options(r#"[ALERT id="1"]"#)).await;

    match outcome {
        DispatchOutcome::Rendered { html, assets } => {
            assert_eq!(html, r#"<div class="alert">Hi</div>"#);
            assert!(assets.is_empty());
        }
        other => panic!("expected rendered outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn claims_match_case_insensitively() {
    let data = content();
    let runtime = boot(&data, RenderConfig::default(), vec![alert()]).await;

    let outcome = runtime.dispatcher().dispatch(options(r#"[alert id="1"]"#)).await;

    assert!(outcome.is_rendered());
}

#[tokio::test]
async fn stages_run_in_lifecycle_order() {
    let recorder = EventRecorder::new();
    let setup_recorder = recorder.clone();
    let module = alert().with_setup(move |ctx| {
        ctx.on_shortcode(BEGIN_PROCESS_MODULE_SHORTCODE, "ALERT", setup_recorder.handler("begin"))
            .on_shortcode(POST_MODULE_GET_DATA, "ALERT", setup_recorder.handler("get-data"))
            .on_shortcode(POST_MODULE_GET_DATA_2, "ALERT", setup_recorder.handler("get-data-2"))
            .on_shortcode(ALTER_MODULE_VIEW_MODEL, "ALERT", setup_recorder.handler("alter"))
            .on_shortcode(
                POST_PROCESS_MODULE_SHORTCODE_PROCESSED_HTML,
                "ALERT",
                setup_recorder.handler("post-process"),
            );
    });
    let view_recorder = recorder.clone();
    let views = FnViewRenderer::new(move |_, _| {
        view_recorder.record("render");
        Ok("ok".to_string())
    });
    let runtime = Runtime::builder()
        .data_service(Arc::new(content()))
        .view_renderer(Arc::new(views))
        .module(module)
        .build()
        .await
        .unwrap();

    runtime.dispatcher().dispatch(options(r#"[ALERT id="1"]"#)).await;

    assert_eq!(
        recorder.entries(),
        vec!["begin", "get-data", "get-data-2", "alter", "render", "post-process"]
    );
}

#[tokio::test]
async fn scoped_handlers_only_see_their_shortcode() {
    let recorder = EventRecorder::new();
    let setup_recorder = recorder.clone();
    let module = faq().with_setup(move |ctx| {
        ctx.on_shortcode(POST_MODULE_GET_DATA, "ALERT", setup_recorder.handler("alert-only"))
            .on(POST_MODULE_GET_DATA, setup_recorder.handler("everyone"));
    });
    let data = content();
    let runtime = boot(&data, RenderConfig::default(), vec![alert(), module]).await;

    runtime.dispatcher().dispatch(options(r#"[FAQ id="42"]"#)).await;

    assert_eq!(recorder.entries(), vec!["everyone"]);
}

#[tokio::test]
async fn begin_fires_once_per_shortcode() {
    let names = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&names);
    let module = faq().with_setup(move |ctx| {
        let seen = Arc::clone(&seen);
        ctx.on(BEGIN_PROCESS_MODULE_SHORTCODE, move |options: &mut ProcessingOptions| {
            seen.lock().unwrap().push(options.shortcode.name.clone());
            Box::pin(async { Ok(()) })
        });
    });
    let data = content();
    let runtime = boot(&data, RenderConfig::default(), vec![module]).await;

    runtime
        .render_content(r#"<p>[FAQ id="42"]</p>"#, fixtures::request("/"))
        .await;

    assert_eq!(*names.lock().unwrap(), vec!["FAQ".to_string()]);
}

#[tokio::test]
async fn handlers_observe_earlier_mutations() {
    let module = alert()
        .with_template("alert-main.html", "{{ data.seen }}")
        .with_setup(|ctx| {
            ctx.on(POST_MODULE_GET_DATA, |options: &mut ProcessingOptions| {
                options.view_model_mut().insert("x", 1);
                Box::pin(async { Ok(()) })
            })
            .on(POST_MODULE_GET_DATA, |options: &mut ProcessingOptions| {
                let x = options.view_model_mut().get("x").cloned().unwrap_or(Value::Null);
                options.view_model_mut().insert("seen", x);
                Box::pin(async { Ok(()) })
            });
        });
    let data = content();
    let runtime = boot(&data, RenderConfig::default(), vec![module]).await;

    let html = runtime
        .dispatcher()
        .process_module_in_column(r#"[ALERT id="1"]"#, options(r#"[ALERT id="1"]"#))
        .await;

    assert_eq!(html, "1");
}

// ============================================================================
// Legacy broadcast claims
// ============================================================================

#[tokio::test]
async fn broadcast_begin_handlers_can_claim_by_name() {
    let recorder = EventRecorder::new();
    let alert_recorder = recorder.clone();
    let faq_recorder = recorder.clone();
    let alert_module = TestModule::new("alert", "Alert")
        .with_template("alert-main.html", "alert")
        .with_setup(move |ctx| {
            let recorder = alert_recorder.clone();
            ctx.on(BEGIN_PROCESS_MODULE_SHORTCODE, move |options: &mut ProcessingOptions| {
                if options.shortcode.name == "ALERT" {
                    recorder.record("alert-claimed");
                    options.module_name = Some("alert".into());
                }
                Box::pin(async { Ok(()) })
            });
        });
    let faq_module = TestModule::new("faq", "FAQ")
        .with_template("faq-main.html", "<dl>{{ data.question }}</dl>")
        .with_setup(move |ctx| {
            let recorder = faq_recorder.clone();
            ctx.on(BEGIN_PROCESS_MODULE_SHORTCODE, move |options: &mut ProcessingOptions| {
                if options.shortcode.name == "FAQ" {
                    recorder.record("faq-claimed");
                    options.module_name = Some("faq".into());
                }
                Box::pin(async { Ok(()) })
            });
        });
    let data = content();
    let runtime = boot(&data, RenderConfig::default(), vec![alert_module, faq_module]).await;

    let outcome = runtime.dispatcher().dispatch(options(r#"[FAQ id="42"]"#)).await;

    assert_eq!(recorder.entries(), vec!["faq-claimed"]);
    match outcome {
        DispatchOutcome::Rendered { html, .. } => assert_eq!(html, "<dl>Why?</dl>"),
        other => panic!("expected rendered outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn unclaimed_shortcode_is_reported_and_left_alone() {
    let data = content();
    let runtime = boot(&data, RenderConfig::default(), vec![alert()]).await;

    let outcome = runtime
        .dispatcher()
        .dispatch(options(r#"[UNKNOWN-MODULE id="9"]"#))
        .await;
    let html = runtime
        .dispatcher()
        .process_module_in_column(r#"x [UNKNOWN-MODULE id="9"] y"#, options(r#"[UNKNOWN-MODULE id="9"]"#))
        .await;

    assert!(matches!(outcome, DispatchOutcome::Unclaimed));
    assert_eq!(html, r#"x [UNKNOWN-MODULE id="9"] y"#);
    assert_eq!(data.call_count("get_content_by_id"), 0);
}

// ============================================================================
// Data loading
// ============================================================================

#[tokio::test]
async fn preseeded_view_model_skips_the_loader() {
    let data = content();
    let runtime = boot(&data, RenderConfig::default(), vec![alert()]).await;
    let mut view_model = ViewModel::new("1");
    view_model.insert("title", "Seeded");

    let html = runtime
        .dispatcher()
        .process_module_in_column(r#"[ALERT id="1"]"#, options(r#"[ALERT id="1"]"#).with_view_model(view_model))
        .await;

    assert_eq!(html, r#"<div class="alert">Seeded</div>"#);
    assert_eq!(data.call_count("get_content_by_id"), 0);
}

#[tokio::test]
async fn custom_loader_builds_the_view_model() {
    let module = TestModule::new("faq", "FAQ")
        .with_template("faq-list.html", "{{ data.count }} questions")
        .with_setup(|ctx| {
            ctx.claim(
                ShortcodeClaim::new("FAQLIST", "faq")
                    .with_template("faq-list.html")
                    .with_loader(|options, data| {
                        Box::pin(async move {
                            let records = data.get_content_by_type("faq", options.req.session()).await?;
                            let mut view_model = ViewModel::new("list");
                            view_model.insert("count", records.len());
                            Ok::<ViewModel, HandlerError>(view_model)
                        })
                    }),
            );
        });
    let data = content();
    let runtime = boot(&data, RenderConfig::default(), vec![module]).await;

    let html = runtime
        .dispatcher()
        .process_module_in_column("[FAQLIST]", options("[FAQLIST]"))
        .await;

    assert_eq!(html, "1 questions");
}

#[tokio::test]
async fn session_is_forwarded_to_the_data_service() {
    let data = content();
    let runtime = boot(&data, RenderConfig::default(), vec![alert()]).await;
    let req = Arc::new(RequestContext::new("/").with_session("session-1"));

    runtime
        .dispatcher()
        .dispatch(ProcessingOptions::new(parse(r#"[ALERT id="1"]"#).next().unwrap(), req))
        .await;

    let call = &data.calls()[0];
    assert_eq!(call.method, "get_content_by_id");
    assert_eq!(call.key, "1");
    assert_eq!(call.session_id.as_deref(), Some("session-1"));
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn data_failure_is_contained() {
    let data = content();
    data.fail_on("42", DataServiceError::Unavailable("db down".into()));
    let runtime = boot(&data, RenderConfig::default(), vec![faq()]).await;

    let outcome = runtime.dispatcher().dispatch(options(r#"[FAQ id="42"]"#)).await;

    match outcome {
        DispatchOutcome::Failed(DispatchError::DataLoad { module, .. }) => assert_eq!(module, "faq"),
        other => panic!("expected data load failure, got {other:?}"),
    }
}

#[tokio::test]
async fn failing_stage_stops_the_lifecycle() {
    let recorder = EventRecorder::new();
    let setup_recorder = recorder.clone();
    let module = alert().with_setup(move |ctx| {
        ctx.on(ALTER_MODULE_VIEW_MODEL, setup_recorder.failing("alter", "bad view model"))
            .on(
                POST_PROCESS_MODULE_SHORTCODE_PROCESSED_HTML,
                setup_recorder.handler("post-process"),
            );
    });
    let data = content();
    let runtime = boot(&data, RenderConfig::default(), vec![module]).await;

    let outcome = runtime.dispatcher().dispatch(options(r#"[ALERT id="1"]"#)).await;

    assert!(matches!(outcome, DispatchOutcome::Failed(DispatchError::Handler { .. })));
    assert_eq!(recorder.entries(), vec!["alter"]);
}

#[tokio::test]
async fn cancellation_between_stages_skips_the_rest() {
    let recorder = EventRecorder::new();
    let setup_recorder = recorder.clone();
    let module = alert().with_setup(move |ctx| {
        let cancel_recorder = setup_recorder.clone();
        ctx.on(POST_MODULE_GET_DATA, move |options: &mut ProcessingOptions| {
            cancel_recorder.record("get-data");
            options.signal.cancel();
            Box::pin(async { Ok(()) })
        })
        .on(POST_MODULE_GET_DATA_2, setup_recorder.handler("get-data-2"))
        .on(
            POST_PROCESS_MODULE_SHORTCODE_PROCESSED_HTML,
            setup_recorder.handler("post-process"),
        );
    });
    let views = FnViewRenderer::echo();
    let runtime = Runtime::builder()
        .data_service(Arc::new(content()))
        .view_renderer(Arc::new(views.clone()))
        .module(module)
        .build()
        .await
        .unwrap();
    let token = r#"[ALERT id="1"]"#;

    let outcome = runtime.dispatcher().dispatch(options(token)).await;
    let replaced = runtime
        .dispatcher()
        .process_module_in_column(&format!("a {token} b"), options(token))
        .await;

    assert!(matches!(outcome, DispatchOutcome::Skipped));
    assert_eq!(replaced, format!("a {token} b"));
    assert_eq!(recorder.entries(), vec!["get-data", "get-data"]);
    assert!(views.rendered().is_empty());
}

#[tokio::test]
async fn missing_template_fails_the_shortcode() {
    let module = TestModule::new("alert", "Alert").claiming("ALERT");
    let data = content();
    let runtime = boot(&data, RenderConfig::default(), vec![module]).await;

    let outcome = runtime.dispatcher().dispatch(options(r#"[ALERT id="1"]"#)).await;

    match outcome {
        DispatchOutcome::Failed(DispatchError::View { template, .. }) => assert_eq!(template, "alert-main.html"),
        other => panic!("expected view failure, got {other:?}"),
    }
}

#[tokio::test]
async fn failure_policies_shape_the_replacement() {
    let data = content();
    data.fail_on("42", DataServiceError::NotFound("42".into()));
    let token = r#"[FAQ id="42"]"#;

    let mut rendered = Vec::new();
    for policy in [FailurePolicy::Blank, FailurePolicy::Literal, FailurePolicy::Comment] {
        let config = RenderConfig {
            failure_policy: policy,
            ..RenderConfig::default()
        };
        let runtime = boot(&data, config, vec![faq()]).await;
        rendered.push(
            runtime
                .dispatcher()
                .process_module_in_column(&format!("a {token} b"), options(token))
                .await,
        );
    }

    assert_eq!(
        rendered,
        vec![
            "a  b".to_string(),
            format!("a {token} b"),
            "a <!-- shortcode FAQ failed --> b".to_string(),
        ]
    );
}

#[tokio::test]
async fn slow_shortcodes_time_out() {
    let data = content();
    data.delay_on("1", Duration::from_millis(500));
    let config = RenderConfig {
        shortcode_timeout_ms: Some(20),
        ..RenderConfig::default()
    };
    let runtime = boot(&data, config, vec![alert()]).await;

    let outcome = runtime.dispatcher().dispatch(options(r#"[ALERT id="1"]"#)).await;

    match outcome {
        DispatchOutcome::Failed(DispatchError::Timeout { shortcode, after }) => {
            assert_eq!(shortcode, "ALERT");
            assert_eq!(after, Duration::from_millis(20));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

// ============================================================================
// Output
// ============================================================================

#[tokio::test]
async fn every_occurrence_is_replaced() {
    let data = content();
    let runtime = boot(&data, RenderConfig::default(), vec![alert()]).await;
    let token = r#"[ALERT id="1"]"#;

    let html = runtime
        .dispatcher()
        .process_module_in_column(&format!("{token} and {token}"), options(token))
        .await;

    assert_eq!(html, r#"<div class="alert">Hi</div> and <div class="alert">Hi</div>"#);
}

#[tokio::test]
async fn module_wrapper_carries_shortcode_identity() {
    let data = content();
    data.insert(fixtures::record(
        "1",
        "alert",
        json!({ "title": "Hi", "settings": { "data": { "wrapperCss": "wide" } } }),
    ));
    let config = RenderConfig {
        wrap_modules: true,
        ..RenderConfig::default()
    };
    let runtime = boot(&data, config, vec![alert()]).await;

    let html = runtime
        .dispatcher()
        .process_module_in_column(r#"[ALERT id="1"]"#, options(r#"[ALERT id="1"]"#))
        .await;

    assert_eq!(
        html,
        r#"<div class="module wide" data-id="1" data-module="ALERT" data-content-type="alert"><div class="alert">Hi</div></div>"#
    );
}

#[tokio::test]
async fn post_process_handlers_can_rewrite_output() {
    let module = alert().with_setup(|ctx| {
        ctx.on(POST_PROCESS_MODULE_SHORTCODE_PROCESSED_HTML, |options: &mut ProcessingOptions| {
            if let Some(processed) = options.processed_html.as_mut() {
                processed.body = processed.body.to_uppercase();
            }
            Box::pin(async { Ok(()) })
        });
    });
    let data = content();
    let runtime = boot(&data, RenderConfig::default(), vec![module]).await;

    let html = runtime
        .dispatcher()
        .process_module_in_column(r#"[ALERT id="1"]"#, options(r#"[ALERT id="1"]"#))
        .await;

    assert_eq!(html, r#"<DIV CLASS="ALERT">HI</DIV>"#);
}
