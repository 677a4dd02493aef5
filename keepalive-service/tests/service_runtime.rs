//! End-to-end: the host runtime driven over its socket.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use keepalive_core::{
    CallbackHandle, EventAction, FileStore, NotificationContent, ServiceAction, ServiceStatus,
    TaskCallbackConfig, TaskOptions,
};
use keepalive_service::paths::{notification_path, socket_path};
use keepalive_service::{request_signal, request_status, run, Launch, Stickiness};
use serde_json::Value;
use tempfile::TempDir;

const ECHO_APP: &str = r#"log="$1"
while IFS= read -r line; do
  printf '%s\n' "$line" >> "$log"
  id=$(printf '%s' "$line" | sed -n 's/^{"id":\([0-9][0-9]*\),.*/\1/p')
  if [ -n "$id" ]; then
    printf '{"id":%s,"ok":true}\n' "$id"
  fi
done
"#;

fn seed_home(home: &Path) -> PathBuf {
    let script = home.join("app.sh");
    std::fs::write(&script, ECHO_APP).expect("write script");
    let frames = home.join("frames.log");

    let root = home.join(".keepalive");
    std::fs::create_dir_all(&root).expect("config dir");
    std::fs::write(
        root.join("config.yaml"),
        format!(
            "callbacks:\n  7:\n    command: /bin/sh\n    args: [\"{}\", \"{}\"]\n",
            script.display(),
            frames.display()
        ),
    )
    .expect("write config");

    let store = FileStore::at(home);
    store
        .save_service_status(&ServiceStatus::new(ServiceAction::Start))
        .expect("status");
    store
        .save_task_options(&TaskOptions {
            event_action: EventAction::repeat(100),
            ..TaskOptions::default()
        })
        .expect("options");
    store
        .save_task_callback(&TaskCallbackConfig {
            callback_handle: Some(CallbackHandle(7)),
        })
        .expect("callback");
    store
        .save_notification_content(&NotificationContent {
            title: "Syncing".into(),
            text: "3 files left".into(),
            ..NotificationContent::default()
        })
        .expect("content");
    frames
}

async fn wait_for_status(home: &Path) -> Value {
    for _ in 0..50 {
        let home = home.to_path_buf();
        let status = tokio::task::spawn_blocking(move || request_status(&home))
            .await
            .expect("join");
        // The socket may answer before the initial signal is processed.
        if let Ok(status) = status {
            if status["session"]["running"] == true {
                return status;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("service never reported a running session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_runs_the_callback_and_stop_tears_everything_down() {
    let dir = TempDir::new().expect("tempdir");
    let home = dir.path().to_path_buf();
    let frames = seed_home(&home);

    let service = tokio::spawn(run(home.clone(), Launch::default()));

    let status = wait_for_status(&home).await;
    assert_eq!(status["session"]["running"], true);
    assert_eq!(status["session"]["callback_handle"], 7);
    assert!(notification_path(&home).exists());

    tokio::time::sleep(Duration::from_millis(450)).await;

    FileStore::at(&home)
        .save_service_status(&ServiceStatus::new(ServiceAction::Stop))
        .expect("persist stop");
    let reply = {
        let home = home.clone();
        tokio::task::spawn_blocking(move || request_signal(&home, ServiceAction::Stop))
            .await
            .expect("join")
            .expect("signal")
    };
    assert_eq!(reply["stickiness"], "not_sticky");

    let stickiness = tokio::time::timeout(Duration::from_secs(10), service)
        .await
        .expect("service exits")
        .expect("join")
        .expect("run");
    assert_eq!(stickiness, Stickiness::NotSticky);
    assert!(!socket_path(&home).exists());
    assert!(!notification_path(&home).exists());

    let log = std::fs::read_to_string(&frames).expect("frames");
    let methods: Vec<String> = log
        .lines()
        .map(|line| {
            let frame: Value = serde_json::from_str(line).expect("frame");
            frame["method"].as_str().unwrap_or_default().to_string()
        })
        .collect();
    assert_eq!(methods.first().map(String::as_str), Some("onStart"));
    assert_eq!(methods.last().map(String::as_str), Some("onDestroy"));
    assert!(
        methods.iter().filter(|m| *m == "onRepeatEvent").count() >= 2,
        "got: {methods:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_second_instance_refuses_to_bind() {
    let dir = TempDir::new().expect("tempdir");
    let home = dir.path().to_path_buf();
    seed_home(&home);

    let first = tokio::spawn(run(home.clone(), Launch::default()));
    wait_for_status(&home).await;

    let err = run(home.clone(), Launch::default())
        .await
        .expect_err("second instance");
    assert!(err.to_string().contains("already running"), "got: {err}");

    FileStore::at(&home)
        .save_service_status(&ServiceStatus::new(ServiceAction::Stop))
        .expect("persist stop");
    let home_for_signal = home.clone();
    tokio::task::spawn_blocking(move || request_signal(&home_for_signal, ServiceAction::Stop))
        .await
        .expect("join")
        .expect("signal");
    tokio::time::timeout(Duration::from_secs(10), first)
        .await
        .expect("service exits")
        .expect("join")
        .expect("run");
}
