use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;

use eksplan::{Executor, GraphError, OutputError, RunOptions, SkipReason};

const NO_DEPS: [&str; 0] = [];

fn ids<'a>(names: impl IntoIterator<Item = &'a str>) -> BTreeSet<&'a str> {
    names.into_iter().collect()
}

#[tokio::test]
async fn role_cluster_nodegroup_all_succeed() {
    let seen = Arc::new(Mutex::new(None));
    let mut exec = Executor::<String>::new();

    let role = exec
        .register("role", NO_DEPS, |_| async { Ok("arn:role:1".to_string()) })
        .unwrap();
    let cluster = exec
        .register("cluster", [&role], |inputs| async move {
            assert_eq!(inputs.require("role")?, "arn:role:1");
            Ok("cluster-xyz".to_string())
        })
        .unwrap();
    {
        let seen = Arc::clone(&seen);
        exec.register("nodegroup", [&cluster, &role], move |inputs| {
            let seen = Arc::clone(&seen);
            async move {
                let observed = (
                    inputs.require("cluster")?.clone(),
                    inputs.require("role")?.clone(),
                );
                *seen.lock().unwrap() = Some(observed);
                Ok("ok".to_string())
            }
        })
        .unwrap();
    }

    let report = exec.run(RunOptions::default()).await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.succeeded_ids(), ids(["role", "cluster", "nodegroup"]));
    assert_eq!(
        seen.lock().unwrap().clone(),
        Some(("cluster-xyz".to_string(), "arn:role:1".to_string()))
    );
    assert_eq!(*cluster.output().wait().await.unwrap(), "cluster-xyz");
}

#[tokio::test]
async fn cluster_failure_skips_nodegroup() {
    let nodegroup_ran = Arc::new(AtomicBool::new(false));
    let mut exec = Executor::<String>::new();

    exec.register("role", NO_DEPS, |_| async { Ok("arn:role:1".to_string()) })
        .unwrap();
    exec.register("cluster", ["role"], |_| async { Err(anyhow!("quota exceeded")) })
        .unwrap();
    {
        let ran = Arc::clone(&nodegroup_ran);
        exec.register("nodegroup", ["cluster", "role"], move |_| {
            ran.store(true, Ordering::SeqCst);
            async { Ok("ok".to_string()) }
        })
        .unwrap();
    }

    let report = exec.run(RunOptions::default()).await.unwrap();

    assert!(!report.is_success());
    assert_eq!(report.succeeded_ids(), ids(["role"]));
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed["cluster"].to_string(), "quota exceeded");
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped["nodegroup"].to_string(), "dependency cluster failed");
    assert!(!nodegroup_ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn failure_skips_the_whole_chain() {
    let b_calls = Arc::new(AtomicUsize::new(0));
    let c_calls = Arc::new(AtomicUsize::new(0));
    let mut exec = Executor::<u32>::new();

    exec.register("a", NO_DEPS, |_| async { Err(anyhow!("access denied")) })
        .unwrap();
    {
        let calls = Arc::clone(&b_calls);
        exec.register("b", ["a"], move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(2) }
        })
        .unwrap();
    }
    {
        let calls = Arc::clone(&c_calls);
        exec.register("c", ["b"], move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(3) }
        })
        .unwrap();
    }

    let report = exec.run(RunOptions::default()).await.unwrap();

    assert!(report.succeeded.is_empty());
    assert_eq!(report.failed.keys().map(|k| k.as_str()).collect::<Vec<_>>(), ["a"]);
    assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    assert_eq!(c_calls.load(Ordering::SeqCst), 0);

    // The transitive skip is attributed to the task that actually failed.
    match &report.skipped["c"] {
        SkipReason::DependencyFailed { origin, via, cause } => {
            assert_eq!(origin.as_str(), "a");
            assert_eq!(via.as_str(), "b");
            assert_eq!(cause.to_string(), "access denied");
        }
        other => panic!("unexpected skip reason: {other:?}"),
    }
    assert_eq!(report.skipped["b"].to_string(), "dependency a failed");
}

#[tokio::test]
async fn unknown_dependency_fails_before_anything_runs() {
    let ran = Arc::new(AtomicBool::new(false));
    let mut exec = Executor::<u32>::new();
    {
        let ran = Arc::clone(&ran);
        exec.register("role", NO_DEPS, move |_| {
            ran.store(true, Ordering::SeqCst);
            async { Ok(1) }
        })
        .unwrap();
    }
    exec.register("cluster", ["role", "vpc"], |_| async { Ok(2) })
        .unwrap();

    let err = exec.plan().unwrap_err();
    assert_eq!(
        err,
        GraphError::UnknownDependency {
            task: "cluster".into(),
            dependency: "vpc".into(),
        }
    );

    let err = exec.run(RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, GraphError::UnknownDependency { .. }));
    assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn mutual_dependency_is_a_cycle_naming_both() {
    let mut exec = Executor::<u32>::new();
    exec.register("a", ["b"], |_| async { Ok(1) }).unwrap();
    exec.register("b", ["a"], |_| async { Ok(2) }).unwrap();

    match exec.run(RunOptions::default()).await {
        Err(GraphError::CyclicDependency { cycle }) => {
            let names: Vec<&str> = cycle.iter().map(|id| id.as_str()).collect();
            assert_eq!(names, ["a", "b"]);
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
}

#[tokio::test]
async fn self_dependency_is_a_cycle() {
    let mut exec = Executor::<u32>::new();
    exec.register("a", ["a"], |_| async { Ok(1) }).unwrap();

    let err = exec.plan().unwrap_err();
    assert_eq!(err.to_string(), "cyclic dependency: a -> a");
}

#[tokio::test]
async fn independent_tasks_have_a_stable_outcome() {
    async fn run_once(delay_a: u64, delay_b: u64) -> BTreeSet<String> {
        let mut exec = Executor::<u64>::new();
        exec.register("a", NO_DEPS, move |_| async move {
            tokio::time::sleep(Duration::from_millis(delay_a)).await;
            Ok(delay_a)
        })
        .unwrap();
        exec.register("b", NO_DEPS, move |_| async move {
            tokio::time::sleep(Duration::from_millis(delay_b)).await;
            Ok(delay_b)
        })
        .unwrap();
        exec.register("join", ["a", "b"], |inputs| async move {
            Ok(inputs.require("a")? + inputs.require("b")?)
        })
        .unwrap();

        let report = exec.run(RunOptions::default()).await.unwrap();
        assert_eq!(report.get("join"), Some(&(delay_a + delay_b)));
        report.succeeded.keys().map(|k| k.to_string()).collect()
    }

    let first = run_once(1, 15).await;
    let second = run_once(15, 1).await;
    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
}

#[tokio::test]
async fn late_readers_get_the_resolved_value() {
    let mut exec = Executor::<String>::new();
    let role = exec
        .register("role", NO_DEPS, |_| async { Ok("arn:role:1".to_string()) })
        .unwrap();
    let output = role.output();
    assert!(!output.is_resolved());

    let waiting = {
        let output = output.clone();
        tokio::spawn(async move { output.wait().await })
    };

    exec.run(RunOptions::default()).await.unwrap();

    let early = waiting.await.unwrap().unwrap();
    let late = output.wait().await.unwrap();
    assert_eq!(*late, "arn:role:1");
    assert!(Arc::ptr_eq(&early, &late));
}

#[tokio::test]
async fn producers_can_await_upstream_handles() {
    let mut exec = Executor::<String>::new();
    let role = exec
        .register("role", NO_DEPS, |_| async { Ok("arn:role:1".to_string()) })
        .unwrap();
    let role_output = role.output();
    exec.register("cluster", [&role], move |_| {
        let role_output = role_output.clone();
        async move {
            let arn = role_output.wait().await?;
            Ok(format!("cluster for {arn}"))
        }
    })
    .unwrap();

    let report = exec.run(RunOptions::default()).await.unwrap();
    assert_eq!(report.get("cluster").map(String::as_str), Some("cluster for arn:role:1"));
}

#[tokio::test]
async fn output_of_skipped_task_reports_the_skip() {
    let mut exec = Executor::<u32>::new();
    let a = exec
        .register("a", NO_DEPS, |_| async { Err(anyhow!("boom")) })
        .unwrap();
    let b = exec.register("b", [&a], |_| async { Ok(1) }).unwrap();
    let b_output = b.output();

    exec.run(RunOptions::default()).await.unwrap();

    assert!(matches!(
        b_output.wait().await,
        Err(OutputError::Skipped { .. })
    ));
}
