use std::time::Duration;

use cmap_runner::prelude::*;

fn config() -> RunnerConfig {
    RunnerConfig::builder()
        .step_delay(Duration::from_millis(5))
        .finish()
}

fn spec_from(json: &str) -> Result<Spec<MemoryPool>, HarnessError> {
    let mut spec = Spec::<MemoryPool>::new(CmapScript::from_json_str(json)?)?;
    spec.setup(&config())?;
    Ok(spec)
}

fn position(types: &[&str], event_type: &str) -> usize {
    types
        .iter()
        .position(|t| *t == event_type)
        .unwrap_or_else(|| panic!("{event_type} missing from {types:?}"))
}

#[tokio::test]
async fn single_checkout_publishes_the_creation_chain() -> Result<(), HarnessError> {
    let mut spec = spec_from(
        r#"{ "poolOptions": { "maxPoolSize": 1 }, "operations": [{ "name": "checkOut" }] }"#,
    )?;
    let result = spec.run().await?;
    assert!(result.error.is_none());

    let types = result.event_types();
    assert_eq!(types.len(), 5, "{types:?}");
    let created = position(&types, "ConnectionCreated");
    let ready = position(&types, "ConnectionReady");
    let checked_out = position(&types, "ConnectionCheckedOut");
    assert_eq!(position(&types, "ConnectionPoolCreated"), 0);
    assert!(created < ready && ready < checked_out);
    assert!(position(&types, "ConnectionCheckOutStarted") < checked_out);

    let pool_created = &result.events[0];
    assert_eq!(pool_created.address.as_deref(), Some("localhost:27017"));
    let options = pool_created.options.as_ref().expect("options document");
    assert_eq!(options.get("maxPoolSize"), Some(&serde_json::json!(1)));
    Ok(())
}

#[tokio::test]
async fn checkout_after_close_stops_the_main_sequence() -> Result<(), HarnessError> {
    let mut spec = spec_from(
        r#"{ "operations": [{ "name": "close" }, { "name": "checkOut" }, { "name": "clear" }] }"#,
    )?;
    let result = spec.run().await?;

    let error = result.error.as_ref().expect("checkOut must fail");
    assert_eq!(error.error_type, "PoolClosedError");
    assert_eq!(
        error.message,
        "Attempted to check out a connection from closed connection pool"
    );
    // No checkout events after the close, and the trailing clear never ran.
    assert_eq!(
        result.event_types(),
        ["ConnectionPoolCreated", "ConnectionPoolClosed"]
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queued_checkout_times_out_on_its_thread() -> Result<(), HarnessError> {
    let mut spec = spec_from(
        r#"{
            "poolOptions": { "maxPoolSize": 1, "waitQueueTimeoutMS": 30 },
            "operations": [
                { "name": "checkOut", "label": "conn1" },
                { "name": "start", "target": "t1" },
                { "name": "checkOut", "thread": "t1" },
                { "name": "waitFor", "target": "t1" }
            ]
        }"#,
    )?;
    let result = spec.run().await?;

    assert!(result.error.is_none());
    let errors = result.thread_errors("t1").expect("t1 report");
    assert_eq!(
        errors,
        [ErrorRecord::new(
            "WaitQueueTimeoutError",
            "Timed out while checking out a connection from connection pool"
        )]
    );
    let failed = result
        .events
        .iter()
        .find(|event| event.event_type == "ConnectionCheckOutFailed")
        .expect("checkout failure event");
    assert_eq!(failed.reason.as_deref(), Some("timeout"));
    Ok(())
}

#[tokio::test]
async fn ignored_types_are_dropped_from_the_trace() -> Result<(), HarnessError> {
    let mut spec = spec_from(
        r#"{
            "operations": [{ "name": "checkOut" }, { "name": "checkOut" }],
            "ignore": ["ConnectionCheckOutStarted"]
        }"#,
    )?;
    let result = spec.run().await?;
    let types = result.event_types();
    assert!(!types.contains(&"ConnectionCheckOutStarted"));
    assert_eq!(
        types.iter().filter(|t| **t == "ConnectionCheckedOut").count(),
        2
    );
    Ok(())
}

/// The label is filled by a jittered background task; the main task's
/// `checkIn` must wait for it however the two interleave.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn check_in_waits_for_a_label_under_jitter() -> Result<(), HarnessError> {
    let script = r#"{
        "operations": [
            { "name": "start", "target": "t1" },
            { "name": "checkOut", "label": "conn", "thread": "t1" },
            { "name": "checkIn", "connection": "conn" },
            { "name": "waitFor", "target": "t1" }
        ]
    }"#;
    for seed in 0..8 {
        let config = RunnerConfig::builder()
            .step_delay(Duration::from_millis(1))
            .jitter(seed, 15)
            .finish();
        let mut spec = Spec::<MemoryPool>::new(CmapScript::from_json_str(script)?)?;
        spec.setup(&config)?;
        let result = tokio::time::timeout(Duration::from_secs(5), spec.run())
            .await
            .unwrap_or_else(|_| panic!("seed {seed} deadlocked"))?;

        assert!(result.error.is_none(), "seed {seed}: {:?}", result.error);
        assert_eq!(result.thread_errors("t1"), Some(&[][..]));
        let types = result.event_types();
        assert!(position(&types, "ConnectionCheckedOut") < position(&types, "ConnectionCheckedIn"));
        assert_eq!(spec.pool().expect("pool").available_connections(), 1);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wait_for_event_blocks_until_the_count_is_reached() -> Result<(), HarnessError> {
    let mut spec = spec_from(
        r#"{
            "operations": [
                { "name": "start", "target": "t1" },
                { "name": "wait", "ms": 20, "thread": "t1" },
                { "name": "checkOut", "thread": "t1" },
                { "name": "checkOut", "thread": "t1" },
                { "name": "waitForEvent", "event": "ConnectionCheckedOut", "count": 2 },
                { "name": "close" },
                { "name": "waitFor", "target": "t1" }
            ]
        }"#,
    )?;
    let result = spec.run().await?;
    assert!(result.error.is_none());
    let types = result.event_types();
    assert_eq!(types.iter().filter(|t| **t == "ConnectionCheckedOut").count(), 2);
    assert_eq!(types.last(), Some(&"ConnectionPoolClosed"));
    Ok(())
}

#[tokio::test]
async fn waiting_on_an_unknown_thread_fails_the_run() -> Result<(), HarnessError> {
    let mut spec = spec_from(r#"{ "operations": [{ "name": "waitFor", "target": "ghost" }] }"#)?;
    let err = spec.run().await.unwrap_err();
    assert!(matches!(err, HarnessError::UnknownThread(name) if name == "ghost"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unexpected_background_failure_stays_on_its_thread() -> Result<(), HarnessError> {
    let mut spec = spec_from(
        r#"{
            "operations": [
                { "name": "start", "target": "t1" },
                { "name": "waitFor", "target": "ghost", "thread": "t1" },
                { "name": "checkOut", "thread": "t1" },
                { "name": "waitFor", "target": "t1" }
            ]
        }"#,
    )?;
    let result = spec.run().await?;
    assert!(result.error.is_none());

    // The failing operation does not stop the rest of the thread.
    let errors = result.thread_errors("t1").expect("t1 report");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_type, "UnknownThreadError");
    assert!(result.event_types().contains(&"ConnectionCheckedOut"));
    Ok(())
}

#[tokio::test]
async fn run_requires_setup_and_runs_once() -> Result<(), HarnessError> {
    let script = r#"{ "operations": [{ "name": "checkOut" }] }"#;

    let mut unprepared = Spec::<MemoryPool>::new(CmapScript::from_json_str(script)?)?;
    assert!(matches!(
        unprepared.run().await,
        Err(HarnessError::SetupRequired)
    ));

    let mut spec = spec_from(script)?;
    spec.run().await?;
    assert!(matches!(spec.run().await, Err(HarnessError::AlreadyRun)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contended_pool_never_exceeds_max_size() -> Result<(), HarnessError> {
    let mut operations = Vec::new();
    for thread in ["t1", "t2", "t3", "t4"] {
        operations.push(serde_json::json!({ "name": "start", "target": thread }));
    }
    for round in 0..3 {
        for thread in ["t1", "t2", "t3", "t4"] {
            let label = format!("{thread}-{round}");
            operations.push(serde_json::json!({ "name": "checkOut", "label": &label, "thread": thread }));
            operations.push(serde_json::json!({ "name": "checkIn", "connection": &label, "thread": thread }));
        }
    }
    for thread in ["t1", "t2", "t3", "t4"] {
        operations.push(serde_json::json!({ "name": "waitFor", "target": thread }));
    }
    let script = serde_json::json!({
        "poolOptions": { "maxPoolSize": 2 },
        "operations": operations,
    });

    let config = RunnerConfig::builder()
        .step_delay(Duration::ZERO)
        .jitter(11, 3)
        .finish();
    let mut spec = Spec::<MemoryPool>::new(CmapScript::from_json_str(&script.to_string())?)?;
    spec.setup(&config)?;
    let result = spec.run().await?;

    assert!(result.error.is_none());
    for thread in ["t1", "t2", "t3", "t4"] {
        assert_eq!(result.thread_errors(thread), Some(&[][..]), "{thread}");
    }
    let types = result.event_types();
    assert_eq!(types.iter().filter(|t| **t == "ConnectionCheckedOut").count(), 12);
    assert!(types.iter().filter(|t| **t == "ConnectionCreated").count() <= 2);
    assert!(spec.pool().expect("pool").total_connections() <= 2);
    Ok(())
}
