//! Integration tests for module boot
//!
//! Boot starts every enabled module exactly once in a stable order, rejects
//! conflicting registrations, and announces the loaded set on the bus.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use pagekit_core::ModuleDefinition;
use pagekit_core::events::{MODULES_LOADED, ModulesLoaded};
use pagekit_runtime::config::RenderConfig;
use pagekit_runtime::error::RuntimeError;
use pagekit_runtime::registry::{BootError, ModuleRegistry};
use pagekit_runtime::Runtime;
use pagekit_testing::{EventRecorder, InMemoryDataService, TestModule};
use std::sync::{Arc, Mutex};

fn data() -> Arc<InMemoryDataService> {
    Arc::new(InMemoryDataService::new())
}

#[tokio::test]
async fn startup_runs_once_per_module() {
    let alert = TestModule::new("alert", "Alert").claiming("ALERT");
    let faq = TestModule::new("faq", "FAQ").claiming("FAQ");

    let registry = ModuleRegistry::builder()
        .register(alert.clone())
        .register(faq.clone())
        .boot(data())
        .await
        .unwrap();

    assert_eq!(alert.startup_count(), 1);
    assert_eq!(faq.startup_count(), 1);
    assert_eq!(registry.shortcode_names(), vec!["ALERT", "FAQ"]);
    assert_eq!(registry.claim("faq").unwrap().module, "faq");
}

#[tokio::test]
async fn modules_start_in_title_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let module = |id: &str, title: &str| {
        let order = Arc::clone(&order);
        TestModule::new(id, title).with_setup(move |ctx| {
            order.lock().unwrap().push(ctx.module_name().to_string());
        })
    };

    let registry = ModuleRegistry::builder()
        .register(module("zeta", "Zeta"))
        .register(module("alpha-b", "Alpha"))
        .register(module("alpha-a", "Alpha"))
        .boot(data())
        .await
        .unwrap();

    let started: Vec<_> = registry.definitions().iter().map(|d| d.system_id.as_str()).collect();
    assert_eq!(started, vec!["alpha-a", "alpha-b", "zeta"]);
    assert_eq!(*order.lock().unwrap(), vec!["alpha-a", "alpha-b", "zeta"]);
}

#[tokio::test]
async fn disabled_modules_are_skipped() {
    let enabled = TestModule::new("alert", "Alert").claiming("ALERT");
    let disabled = TestModule::new("faq", "FAQ").claiming("FAQ").disabled();

    let registry = ModuleRegistry::builder()
        .register(enabled)
        .register(disabled.clone())
        .boot(data())
        .await
        .unwrap();

    assert_eq!(disabled.startup_count(), 0);
    assert!(registry.is_loaded("alert"));
    assert!(!registry.is_loaded("faq"));
    assert!(registry.claim("FAQ").is_none());
}

#[tokio::test]
async fn column_capable_definitions_are_listed() {
    let registry = ModuleRegistry::builder()
        .register(TestModule::from_definition(
            ModuleDefinition::new("alert", "Alert").column_capable(),
        ))
        .register(TestModule::new("analytics", "Analytics"))
        .boot(data())
        .await
        .unwrap();

    let ids: Vec<_> = registry
        .definitions_for_columns()
        .into_iter()
        .map(|d| d.system_id.as_str())
        .collect();
    assert_eq!(ids, vec!["alert"]);
}

#[tokio::test]
async fn failing_startup_aborts_boot() {
    let later = TestModule::new("zeta", "Zeta");

    let result = ModuleRegistry::builder()
        .register(TestModule::new("broken", "Broken").failing_startup("no settings"))
        .register(later.clone())
        .boot(data())
        .await;

    match result {
        Err(BootError::StartupFailed { module, source }) => {
            assert_eq!(module, "broken");
            assert!(source.to_string().contains("no settings"));
        }
        other => panic!("expected startup failure, got {other:?}"),
    }
    assert_eq!(later.startup_count(), 0);
}

#[tokio::test]
async fn duplicate_claims_abort_boot() {
    let result = ModuleRegistry::builder()
        .register(TestModule::new("faq-b", "FAQ B").claiming("FAQ"))
        .register(TestModule::new("faq-a", "FAQ A").claiming("faq"))
        .boot(data())
        .await;

    match result {
        Err(BootError::DuplicateClaim {
            shortcode,
            first,
            second,
        }) => {
            assert_eq!(shortcode, "FAQ");
            assert_eq!(first, "faq-a");
            assert_eq!(second, "faq-b");
        }
        other => panic!("expected duplicate claim, got {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_system_ids_abort_boot() {
    let result = ModuleRegistry::builder()
        .register(TestModule::new("alert", "Alert"))
        .register(TestModule::new("alert", "Alert Again"))
        .boot(data())
        .await;

    assert!(matches!(result, Err(BootError::DuplicateModule(id)) if id == "alert"));
}

#[tokio::test]
async fn modules_loaded_is_emitted_once_after_boot() {
    let loaded = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&loaded);
    let listener = TestModule::new("listener", "Listener").with_setup(move |ctx| {
        let seen = Arc::clone(&seen);
        ctx.on(MODULES_LOADED, move |payload: &mut ModulesLoaded| {
            seen.lock().unwrap().push(payload.modules.clone());
            Box::pin(async { Ok(()) })
        });
    });

    ModuleRegistry::builder()
        .register(listener)
        .register(TestModule::new("alert", "Alert"))
        .boot(data())
        .await
        .unwrap();

    assert_eq!(
        *loaded.lock().unwrap(),
        vec![vec!["alert".to_string(), "listener".to_string()]]
    );
}

#[tokio::test]
async fn failing_modules_loaded_handler_aborts_boot() {
    let recorder = EventRecorder::new();
    let setup_recorder = recorder.clone();
    let module = TestModule::new("alert", "Alert").with_setup(move |ctx| {
        ctx.on(MODULES_LOADED, setup_recorder.failing("loaded", "cannot warm cache"));
    });

    let result = ModuleRegistry::builder().register(module).boot(data()).await;

    assert!(matches!(result, Err(BootError::ModulesLoaded(_))));
    assert_eq!(recorder.count("loaded"), 1);
}

// ============================================================================
// Runtime builder
// ============================================================================

#[tokio::test]
async fn runtime_requires_a_data_service() {
    let result = Runtime::builder().module(TestModule::new("alert", "Alert")).build().await;

    assert!(matches!(result, Err(RuntimeError::MissingDataService)));
}

#[tokio::test]
async fn runtime_rejects_invalid_config() {
    let config = RenderConfig {
        concurrency: 0,
        ..RenderConfig::default()
    };

    let result = Runtime::builder().config(config).data_service(data()).build().await;

    assert!(matches!(result, Err(RuntimeError::Config(_))));
}

#[tokio::test]
async fn runtime_rejects_broken_templates() {
    let module = TestModule::new("alert", "Alert")
        .claiming("ALERT")
        .with_template("alert-main.html", "{{ data.title ");

    let result = Runtime::builder().data_service(data()).module(module).build().await;

    assert!(matches!(result, Err(RuntimeError::View(_))));
}

#[tokio::test]
async fn runtime_surfaces_boot_errors() {
    let module = TestModule::new("broken", "Broken").failing_startup("boom");

    let result = Runtime::builder().data_service(data()).module(module).build().await;

    assert!(matches!(
        result,
        Err(RuntimeError::Boot(BootError::StartupFailed { .. }))
    ));
}

#[tokio::test]
async fn metrics_stay_off_unless_enabled() {
    let runtime = Runtime::builder().data_service(data()).build().await.unwrap();

    assert!(runtime.start_metrics().unwrap().is_none());
}

#[tokio::test]
async fn enabled_metrics_listen_on_the_configured_port() {
    let mut config = RenderConfig::default();
    config.observability.metrics_enabled = true;
    config.observability.metrics_port = 9464;
    let runtime = Runtime::builder().config(config).data_service(data()).build().await.unwrap();

    let server = runtime.start_metrics().unwrap().expect("metrics are enabled");

    assert_eq!(server.addr().port(), 9464);
    assert!(server.addr().ip().is_unspecified());
}
