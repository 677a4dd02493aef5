//! launchd user agent: the supervisor that turns a sticky exit into a relaunch.
//!
//! `KeepAlive.SuccessfulExit = false` relaunches the service only after a
//! non-zero (sticky) exit; a STOP exits zero and stays down. `ThrottleInterval`
//! carries the crash-restart delay so launchd and the relaunch arranger agree
//! on pacing.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use keepalive_core::config::DEFAULT_CRASH_RESTART_DELAY_MS;

use crate::error::{io_err, ServiceError};
use crate::paths::{
    launch_agents_dir, launchd_plist_path, logs_dir, run_dir, socket_path, stderr_log_path,
    stdout_log_path, SERVICE_LABEL,
};

/// Everything the agent plist is rendered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSpec {
    pub program: PathBuf,
    pub home: PathBuf,
    /// Minimum spacing between relaunches; rounded up to whole seconds.
    pub throttle: Duration,
}

impl AgentSpec {
    pub fn new(program: impl Into<PathBuf>, home: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            home: home.into(),
            throttle: Duration::from_millis(DEFAULT_CRASH_RESTART_DELAY_MS),
        }
    }

    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    fn throttle_seconds(&self) -> u64 {
        let millis = self.throttle.as_millis() as u64;
        millis.div_ceil(1000).max(1)
    }

    /// The relaunched process is told it was resurrected.
    fn arguments(&self) -> [String; 3] {
        [
            self.program.display().to_string(),
            "run".to_string(),
            "--resurrected".to_string(),
        ]
    }

    pub fn render(&self) -> String {
        let arguments: String = self
            .arguments()
            .iter()
            .map(|arg| format!("    <string>{}</string>\n", escape_xml(arg)))
            .collect();

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>Label</key>
  <string>{label}</string>
  <key>ProgramArguments</key>
  <array>
{arguments}  </array>
  <key>RunAtLoad</key>
  <true/>
  <key>KeepAlive</key>
  <dict>
    <key>SuccessfulExit</key>
    <false/>
  </dict>
  <key>ThrottleInterval</key>
  <integer>{throttle}</integer>
  <key>ProcessType</key>
  <string>Background</string>
  <key>StandardOutPath</key>
  <string>{stdout}</string>
  <key>StandardErrorPath</key>
  <string>{stderr}</string>
</dict>
</plist>
"#,
            label = SERVICE_LABEL,
            throttle = self.throttle_seconds(),
            stdout = escape_xml(&stdout_log_path(&self.home).display().to_string()),
            stderr = escape_xml(&stderr_log_path(&self.home).display().to_string()),
        )
    }
}

/// Render the agent plist with the default throttle.
pub fn generate_plist(binary_path: &Path, home: &Path) -> String {
    AgentSpec::new(binary_path, home).render()
}

/// Write the agent plist and (re)bootstrap it for the current user. The
/// throttle follows `crash_restart_delay_ms` from `config.yaml`.
pub fn install(home: &Path, binary_path: &Path) -> Result<PathBuf, ServiceError> {
    ensure_macos()?;

    for dir in [launch_agents_dir(home), logs_dir(home), run_dir(home)] {
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    }

    let config = keepalive_core::config::load_at(home)?;
    let spec = AgentSpec::new(binary_path, home).with_throttle(config.crash_restart_delay());
    let plist = launchd_plist_path(home);
    fs::write(&plist, spec.render()).map_err(|e| io_err(&plist, e))?;

    let launchctl = Launchctl::for_current_user()?;
    launchctl.bootout();
    launchctl.bootstrap(&plist)?;
    launchctl.kickstart()?;
    tracing::info!(plist = %plist.display(), "launchd agent installed");
    Ok(plist)
}

/// Boot out the agent and remove its plist. A missing plist is not an error.
pub fn uninstall(home: &Path) -> Result<(), ServiceError> {
    ensure_macos()?;

    let plist = launchd_plist_path(home);
    if plist.exists() {
        Launchctl::for_current_user()?.bootout();
        fs::remove_file(&plist).map_err(|e| io_err(&plist, e))?;
        tracing::info!(plist = %plist.display(), "launchd agent removed");
    }

    let socket = socket_path(home);
    if socket.exists() {
        let _ = fs::remove_file(socket);
    }
    Ok(())
}

#[cfg(target_os = "macos")]
fn ensure_macos() -> Result<(), ServiceError> {
    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn ensure_macos() -> Result<(), ServiceError> {
    Err(ServiceError::Launchd(
        "launchd management is only supported on macOS".to_string(),
    ))
}

/// `launchctl` scoped to the `gui/<uid>` domain.
struct Launchctl {
    domain: String,
}

impl Launchctl {
    fn for_current_user() -> Result<Self, ServiceError> {
        let output = Command::new("id")
            .arg("-u")
            .output()
            .map_err(|e| io_err("id -u", e))?;
        let uid = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() || uid.is_empty() {
            return Err(ServiceError::Launchd(format!(
                "failed to resolve current uid (status {})",
                output.status
            )));
        }
        Ok(Self {
            domain: format!("gui/{uid}"),
        })
    }

    fn target(&self) -> String {
        format!("{}/{SERVICE_LABEL}", self.domain)
    }

    /// Best effort; the agent may not be loaded.
    fn bootout(&self) {
        if let Err(err) = self.exec(&["bootout", &self.target()]) {
            tracing::debug!(error = %err, "bootout skipped");
        }
    }

    fn bootstrap(&self, plist: &Path) -> Result<(), ServiceError> {
        self.exec(&["bootstrap", &self.domain, &plist.display().to_string()])
    }

    fn kickstart(&self) -> Result<(), ServiceError> {
        self.exec(&["kickstart", "-k", &self.target()])
    }

    fn exec(&self, args: &[&str]) -> Result<(), ServiceError> {
        let output = Command::new("launchctl")
            .args(args)
            .output()
            .map_err(|e| io_err("launchctl", e))?;
        if output.status.success() {
            return Ok(());
        }
        Err(ServiceError::Launchd(format!(
            "launchctl {} failed (status {}): {}",
            args.first().copied().unwrap_or_default(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

fn escape_xml(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use plist::Value;

    fn parse(rendered: &str) -> plist::Dictionary {
        Value::from_reader_xml(rendered.as_bytes())
            .expect("parse plist")
            .into_dictionary()
            .expect("plist root dict")
    }

    #[test]
    fn plist_relaunches_only_after_a_sticky_exit() {
        let dict = parse(&generate_plist(
            Path::new("/usr/local/bin/keepalive"),
            Path::new("/Users/tester"),
        ));

        assert_eq!(
            dict.get("Label").and_then(Value::as_string),
            Some("dev.keepalive.service")
        );
        let keep_alive = dict
            .get("KeepAlive")
            .and_then(Value::as_dictionary)
            .expect("KeepAlive dict");
        assert_eq!(
            keep_alive.get("SuccessfulExit").and_then(Value::as_boolean),
            Some(false)
        );
        assert_eq!(
            dict.get("StandardOutPath").and_then(Value::as_string),
            Some("/Users/tester/.keepalive/logs/service.log")
        );

        let args: Vec<&str> = dict
            .get("ProgramArguments")
            .and_then(Value::as_array)
            .expect("ProgramArguments array")
            .iter()
            .filter_map(Value::as_string)
            .collect();
        assert_eq!(args, vec!["/usr/local/bin/keepalive", "run", "--resurrected"]);
    }

    #[test]
    fn throttle_rounds_up_to_whole_seconds() {
        let spec = AgentSpec::new("/bin/keepalive", "/home/t");
        let throttle = |d| {
            parse(&spec.clone().with_throttle(d).render())
                .get("ThrottleInterval")
                .and_then(Value::as_unsigned_integer)
        };

        assert_eq!(throttle(Duration::from_millis(5000)), Some(5));
        assert_eq!(throttle(Duration::from_millis(1500)), Some(2));
        assert_eq!(throttle(Duration::ZERO), Some(1));
    }

    #[test]
    fn paths_are_escaped() {
        let dict = parse(&generate_plist(
            Path::new("/Apps/R&D <beta>/keepalive"),
            Path::new("/Users/tester"),
        ));
        let program = dict
            .get("ProgramArguments")
            .and_then(Value::as_array)
            .and_then(|args| args.first())
            .and_then(Value::as_string);
        assert_eq!(program, Some("/Apps/R&D <beta>/keepalive"));
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn install_is_refused_off_macos() {
        let home = tempfile::TempDir::new().expect("tempdir");
        let err = install(home.path(), Path::new("/usr/local/bin/keepalive")).unwrap_err();
        assert!(matches!(err, ServiceError::Launchd(_)), "got: {err}");
    }
}
