#![cfg(unix)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use gsd_core::config::{Interpreter, InterpreterTable, OffloadConfig};
use gsd_core::offload::{
    execute_offload_op, OffloadExecutor, OffloadOperation, ScriptType, SignalBus, SignalEvent,
    SignalStatus, SENTINEL_EXIT_CODE,
};
use tokio_test::assert_ok;

const SLACK_MS: u64 = 1_500;

fn config() -> OffloadConfig {
    OffloadConfig {
        kill_grace_ms: 300,
        ..OffloadConfig::default()
    }
}

/// Live as in not yet exited; zombies awaiting reaping count as gone.
fn is_running(pid: u32) -> bool {
    if Path::new("/proc/self").exists() {
        return match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map_or(false, |rest| !rest.trim_start().starts_with(['Z', 'X'])),
            Err(_) => false,
        };
    }
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map_or(false, |status| status.success())
}

/// SIGKILL delivery is asynchronous, so give the target a moment to go.
async fn wait_gone(pid: u32) -> bool {
    for _ in 0..50 {
        if !is_running(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

fn read_pid(dir: &Path) -> u32 {
    std::fs::read_to_string(dir.join("bg.pid"))
        .unwrap()
        .trim()
        .parse()
        .unwrap()
}

fn op(id: &str, script_type: ScriptType, script: &str) -> OffloadOperation {
    OffloadOperation::new(id, script_type, script, std::env::temp_dir())
}

#[tokio::test]
async fn timeout_kills_long_running_script() {
    let operation = op("slow", ScriptType::Sh, "sleep 10; echo never").with_timeout_ms(300);
    let result = assert_ok!(execute_offload_op(&operation, &config()).await);

    assert!(result.timed_out);
    assert_eq!(result.exit_code, SENTINEL_EXIT_CODE);
    assert!(result.duration_ms >= 300, "duration {}", result.duration_ms);
    assert!(result.duration_ms <= 300 + SLACK_MS, "duration {}", result.duration_ms);
    assert!(!result.stdout.contains("never"));
}

#[tokio::test]
async fn sigterm_is_escalated_to_sigkill() {
    let operation = op("stubborn", ScriptType::Sh, "trap '' TERM; sleep 10").with_timeout_ms(200);
    let started = Instant::now();
    let result = assert_ok!(execute_offload_op(&operation, &config()).await);

    assert!(result.timed_out);
    // timeout + grace, well short of the script's own runtime
    assert!(result.duration_ms >= 200 + 300, "duration {}", result.duration_ms);
    assert!(started.elapsed().as_millis() < 5_000);
}

#[tokio::test]
async fn group_member_ignoring_sigterm_is_killed_after_leader_exits() {
    let dir = tempfile::tempdir().unwrap();
    let script = "(trap '' TERM; exec sleep 30) & echo $! > bg.pid; wait";
    let operation =
        OffloadOperation::new("orphan", ScriptType::Sh, script, dir.path()).with_timeout_ms(300);

    let started = Instant::now();
    let result = assert_ok!(execute_offload_op(&operation, &config()).await);

    assert!(result.timed_out);
    assert_eq!(result.exit_code, SENTINEL_EXIT_CODE);
    assert!(started.elapsed().as_millis() < 300 + 300 + SLACK_MS as u128);
    let background = read_pid(dir.path());
    assert!(wait_gone(background).await, "pid {background} outlived the call");
}

#[tokio::test]
async fn background_process_holding_stdout_is_cut_off() {
    let dir = tempfile::tempdir().unwrap();
    let script = "echo hi; sleep 30 & echo $! > bg.pid";
    let operation = OffloadOperation::new("detached", ScriptType::Sh, script, dir.path())
        .with_timeout_ms(5_000);

    let started = Instant::now();
    let result = assert_ok!(execute_offload_op(&operation, &config()).await);
    let elapsed = started.elapsed().as_millis() as u64;

    assert!(!result.timed_out);
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "hi\n");
    assert!(elapsed < 300 + SLACK_MS, "elapsed {elapsed}");
    let background = read_pid(dir.path());
    assert!(wait_gone(background).await, "pid {background} outlived the call");
}

#[tokio::test]
async fn output_written_before_timeout_is_kept() {
    let operation = op("partial", ScriptType::Sh, "echo started; sleep 10").with_timeout_ms(300);
    let result = assert_ok!(execute_offload_op(&operation, &config()).await);
    assert!(result.timed_out);
    assert_eq!(result.stdout, "started\n");
}

#[tokio::test]
async fn fast_script_completes_before_timer() {
    let operation = op("fast", ScriptType::Sh, "echo done").with_timeout_ms(5_000);
    let result = assert_ok!(execute_offload_op(&operation, &config()).await);
    assert!(!result.timed_out);
    assert_eq!(result.exit_code, 0);
    assert!(result.duration_ms < 5_000);
}

#[tokio::test]
async fn working_dir_is_respected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("STATE.md"), "phase: 2\n").unwrap();
    let operation = OffloadOperation::new("cat", ScriptType::Sh, "cat STATE.md", dir.path());
    let result = assert_ok!(execute_offload_op(&operation, &config()).await);
    assert_eq!(result.stdout, "phase: 2\n");
}

#[tokio::test]
async fn executor_publishes_classified_signals() {
    let bus = Arc::new(SignalBus::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.on(SignalEvent::Completion, move |signal| {
        sink.lock()
            .unwrap()
            .push((signal.operation_id.clone(), signal.status));
    });

    let executor = OffloadExecutor::new(config()).with_bus(Arc::clone(&bus));
    let ok = executor.execute(&op("ok", ScriptType::Sh, "exit 0")).await;
    let failed = executor.execute(&op("failed", ScriptType::Sh, "exit 7")).await;
    let slow = executor
        .execute(&op("slow", ScriptType::Sh, "sleep 10").with_timeout_ms(200))
        .await;

    assert_eq!(ok.status, SignalStatus::Success);
    assert_eq!(failed.status, SignalStatus::Failure);
    assert_eq!(failed.result.exit_code, 7);
    assert_eq!(slow.status, SignalStatus::Timeout);
    assert!(slow.error.is_none());

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            ("ok".to_string(), SignalStatus::Success),
            ("failed".to_string(), SignalStatus::Failure),
            ("slow".to_string(), SignalStatus::Timeout),
        ]
    );
    assert_eq!(executor.in_flight(), 0);
}

#[tokio::test]
async fn spawn_failure_is_an_error_signal() {
    let bus = Arc::new(SignalBus::new());
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&statuses);
    bus.on(SignalEvent::Completion, move |signal| {
        sink.lock().unwrap().push(signal.status);
    });

    let config = OffloadConfig {
        interpreters: InterpreterTable::empty().with(
            ScriptType::Bash,
            Interpreter::new("gsd-no-such-interpreter", &["-c"]),
        ),
        ..config()
    };
    let executor = OffloadExecutor::new(config).with_bus(bus);
    let signal = executor.execute(&op("broken", ScriptType::Bash, "true")).await;

    assert_eq!(signal.status, SignalStatus::Error);
    let error = signal.error.expect("spawn error message");
    assert!(error.contains("gsd-no-such-interpreter"), "{error}");
    assert_eq!(*statuses.lock().unwrap(), vec![SignalStatus::Error]);
}

#[tokio::test]
async fn concurrent_operations_have_independent_timers() {
    let executor = OffloadExecutor::new(config());
    let operations = vec![
        op("a", ScriptType::Sh, "sleep 0.2; echo a").with_timeout_ms(5_000),
        op("b", ScriptType::Sh, "sleep 10").with_timeout_ms(300),
        op("c", ScriptType::Sh, "echo c").with_timeout_ms(5_000),
    ];

    let started = Instant::now();
    let signals = executor.execute_all(&operations).await;
    let elapsed = started.elapsed().as_millis() as u64;

    let statuses: Vec<_> = signals.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![SignalStatus::Success, SignalStatus::Timeout, SignalStatus::Success]
    );
    assert_eq!(signals[0].result.stdout, "a\n");
    assert_eq!(signals[2].result.stdout, "c\n");
    assert!(elapsed < 300 + SLACK_MS, "elapsed {elapsed}");
}
