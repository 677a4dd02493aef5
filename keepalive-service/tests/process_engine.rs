//! Callback bridge driving a real child process over the JSON-line protocol.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use keepalive_core::{CallbackHandle, EntryPoint};
use keepalive_service::bridge::{METHOD_RECEIVE_DATA, METHOD_START};
use keepalive_service::engine::OutboundFrame;
use keepalive_service::{CallbackBridge, InvokeOutcome, ObserverRegistry, ProcessEngine};
use tempfile::TempDir;

/// Echoes every frame to the log file given as `$1` and acknowledges requests.
const ECHO_APP: &str = r#"log="$1"
while IFS= read -r line; do
  printf '%s\n' "$line" >> "$log"
  id=$(printf '%s' "$line" | sed -n 's/^{"id":\([0-9][0-9]*\),.*/\1/p')
  if [ -n "$id" ]; then
    printf '{"id":%s,"ok":true}\n' "$id"
  fi
done
"#;

fn echo_app(dir: &Path) -> (EntryPoint, PathBuf) {
    let script = dir.join("app.sh");
    std::fs::write(&script, ECHO_APP).expect("write script");
    let log = dir.join("frames.log");
    let entry = EntryPoint {
        command: PathBuf::from("/bin/sh"),
        args: vec![script.display().to_string(), log.display().to_string()],
    };
    (entry, log)
}

fn bridge_for(entry: EntryPoint) -> CallbackBridge {
    let engine = ProcessEngine::new(BTreeMap::from([(CallbackHandle(7), entry)]));
    CallbackBridge::new(Arc::new(engine), ObserverRegistry::new(), Duration::from_secs(5))
}

#[tokio::test]
async fn requests_and_notifications_reach_the_child_in_order() {
    let dir = TempDir::new().expect("tempdir");
    let (entry, log) = echo_app(dir.path());
    let mut bridge = bridge_for(entry);

    bridge.create_context(CallbackHandle(7)).expect("create");
    assert_eq!(bridge.invoke_start().await, InvokeOutcome::Success);
    bridge.invoke_repeat_event().expect("repeat");
    bridge
        .relay(METHOD_RECEIVE_DATA, Some("hello".into()))
        .expect("relay");
    assert_eq!(bridge.invoke_destroy().await, InvokeOutcome::Success);
    bridge.destroy_context();

    let frames: Vec<OutboundFrame> = std::fs::read_to_string(&log)
        .expect("frames log")
        .lines()
        .map(|line| serde_json::from_str(line).expect("frame"))
        .collect();
    let methods: Vec<&str> = frames.iter().map(|f| f.method.as_str()).collect();
    assert_eq!(methods, vec![METHOD_START, "onRepeatEvent", METHOD_RECEIVE_DATA, "onDestroy"]);
    assert_eq!(frames[0].id, Some(1));
    assert_eq!(frames[1].id, None);
    assert_eq!(frames[2].data.as_deref(), Some("hello"));
}

#[tokio::test]
async fn a_child_that_exits_resolves_requests_as_channel_closed() {
    let entry = EntryPoint {
        command: PathBuf::from("/bin/sh"),
        args: vec!["-c".into(), "exit 0".into()],
    };
    let mut bridge = bridge_for(entry);

    bridge.create_context(CallbackHandle(7)).expect("create");
    assert_eq!(bridge.invoke_start().await, InvokeOutcome::ChannelClosed);
}

#[tokio::test]
async fn non_protocol_output_is_ignored() {
    let entry = EntryPoint {
        command: PathBuf::from("/bin/sh"),
        args: vec![
            "-c".into(),
            r#"echo "starting up"; read line; echo '{"id":1,"not_implemented":true}'; sleep 5"#.into(),
        ],
    };
    let mut bridge = bridge_for(entry);

    bridge.create_context(CallbackHandle(7)).expect("create");
    assert_eq!(bridge.invoke_start().await, InvokeOutcome::NotImplemented);
    bridge.destroy_context();
}
