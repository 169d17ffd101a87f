//! Process supervisor for short-lived helper processes.
//!
//! Every spawned helper is reaped: normal completion consumes the exit
//! status, a timeout kills the child and waits for it before the handle is
//! dropped. Nothing here leaves a zombie behind under 24/7 operation.

use crate::error::HelperError;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

/// Captured output of a completed helper.
#[derive(Debug, Clone)]
pub struct HelperOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    /// Exit code, absent when the helper died to a signal.
    pub code: Option<i32>,
}

/// Spawns and reaps helper processes.
#[derive(Debug, Default)]
pub struct Supervisor;

impl Supervisor {
    pub fn new() -> Self {
        Self
    }

    /// Run a helper to completion with a deadline.
    ///
    /// On timeout the child is killed and reaped before the error returns;
    /// the handle never outlives the OS process.
    pub async fn run_and_capture(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<HelperOutput, HelperError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HelperError::Spawn {
                program: program.to_string(),
                reason: e.to_string(),
            })?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        // Drain pipes while waiting so a chatty helper cannot deadlock on a
        // full pipe buffer.
        let drain = tokio::spawn(async move {
            let mut out = Vec::new();
            let mut err = Vec::new();
            if let Some(ref mut pipe) = stdout_pipe {
                let _ = pipe.read_to_end(&mut out).await;
            }
            if let Some(ref mut pipe) = stderr_pipe {
                let _ = pipe.read_to_end(&mut err).await;
            }
            (out, err)
        });

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                reap(&mut child).await;
                drain.abort();
                return Err(HelperError::Spawn {
                    program: program.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                tracing::warn!("helper '{}' timed out, killing", program);
                reap(&mut child).await;
                drain.abort();
                return Err(HelperError::Timeout {
                    program: program.to_string(),
                    timeout_secs: timeout.as_secs(),
                });
            }
        };

        let (out, err) = drain.await.unwrap_or_default();
        Ok(HelperOutput {
            stdout: String::from_utf8_lossy(&out).into_owned(),
            stderr: String::from_utf8_lossy(&err).into_owned(),
            success: status.success(),
            code: status.code(),
        })
    }

    /// Like [`run_and_capture`](Self::run_and_capture), but a non-zero exit
    /// becomes `HelperError::Exit`.
    pub async fn run_checked(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<HelperOutput, HelperError> {
        let output = self.run_and_capture(program, args, timeout).await?;
        if output.success {
            Ok(output)
        } else {
            Err(HelperError::Exit {
                program: program.to_string(),
                status: match output.code {
                    Some(code) => format!("status {code}"),
                    None => "a signal".to_string(),
                },
            })
        }
    }
}

/// Kill a child and wait for it so the OS entry is released.
async fn reap(child: &mut Child) {
    if child.start_kill().is_ok() {
        // Bounded wait; kill() below waits unconditionally as a last resort.
        if tokio::time::timeout(Duration::from_secs(2), child.wait())
            .await
            .is_ok()
        {
            return;
        }
    }
    let _ = child.kill().await;
}

/// Fire-and-forget audio playback with a terminate-on-shutdown contract.
pub struct AudioHandle {
    child: Child,
    program: String,
}

impl AudioHandle {
    /// Spawn the audio helper. Output is discarded.
    pub fn spawn(program: &str, media: &Path) -> Result<Self, HelperError> {
        let child = Command::new(program)
            .arg(media)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HelperError::Spawn {
                program: program.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            child,
            program: program.to_string(),
        })
    }

    /// True once the helper has exited (status consumed).
    pub fn finished(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Terminate and reap the helper.
    pub async fn terminate(mut self) {
        tracing::debug!("terminating audio helper '{}'", self.program);
        reap(&mut self.child).await;
    }
}

#[derive(Debug, Clone, Copy)]
struct SignalReading {
    dbm: Option<i32>,
    refreshed_at: Option<Instant>,
}

/// Cached Wi-Fi signal strength.
///
/// Helper invocation is rate-limited by the refresh interval; a failed or
/// timed-out query keeps the previous reading instead of raising, so one
/// flaky `iwconfig` run never disturbs the playback loop.
pub struct SignalMonitor {
    refresh: Duration,
    timeout: Duration,
    reading: Mutex<SignalReading>,
}

impl SignalMonitor {
    pub fn new(refresh: Duration, timeout: Duration) -> Self {
        Self {
            refresh,
            timeout,
            reading: Mutex::new(SignalReading {
                dbm: None,
                refreshed_at: None,
            }),
        }
    }

    /// Current signal in dBm, refreshing through the supervisor when stale.
    pub async fn signal_dbm(&self, supervisor: &Supervisor) -> Option<i32> {
        let stale = {
            let reading = self.reading.lock().unwrap();
            match reading.refreshed_at {
                Some(at) => at.elapsed() >= self.refresh,
                None => true,
            }
        };

        if stale {
            let fresh = self.query(supervisor).await;
            let mut reading = self.reading.lock().unwrap();
            reading.refreshed_at = Some(Instant::now());
            if fresh.is_some() {
                reading.dbm = fresh;
            }
        }

        self.reading.lock().unwrap().dbm
    }

    async fn query(&self, supervisor: &Supervisor) -> Option<i32> {
        match supervisor
            .run_and_capture("iwconfig", &[], self.timeout)
            .await
        {
            Ok(output) if output.success => {
                if let Some(dbm) = parse_iwconfig_signal(&output.stdout) {
                    return Some(dbm);
                }
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("signal helper failed: {e}"),
        }

        // Fallback: kernel wireless stats.
        match tokio::fs::read_to_string("/proc/net/wireless").await {
            Ok(contents) => parse_proc_wireless(&contents),
            Err(_) => None,
        }
    }
}

/// Extract "Signal level=-45 dBm" from iwconfig output.
fn parse_iwconfig_signal(output: &str) -> Option<i32> {
    let idx = output.find("Signal level=")?;
    let rest = &output[idx + "Signal level=".len()..];
    let token: String = rest
        .chars()
        .take_while(|c| *c == '-' || c.is_ascii_digit())
        .collect();
    token.parse().ok()
}

/// Parse the signal column of /proc/net/wireless (first interface line).
fn parse_proc_wireless(contents: &str) -> Option<i32> {
    let line = contents.lines().nth(2)?;
    let field = line.split_whitespace().nth(3)?;
    field.trim_end_matches('.').parse::<f32>().ok().map(|v| v as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_iwconfig_output() {
        let out = "wlan0  IEEE 802.11  ESSID:\"home\"\n\
                   Link Quality=60/70  Signal level=-48 dBm\n";
        assert_eq!(parse_iwconfig_signal(out), Some(-48));
        assert_eq!(parse_iwconfig_signal("no signal here"), None);
    }

    #[test]
    fn parses_proc_net_wireless() {
        let contents = "Inter-| sta-|   Quality        |   Discarded packets\n\
                        face | tus | link level noise |  nwid  crypt   frag\n\
                        wlan0: 0000   60.  -52.  -256        0      0      0\n";
        assert_eq!(parse_proc_wireless(contents), Some(-52));
        assert_eq!(parse_proc_wireless("header only\n"), None);
    }

    #[tokio::test]
    async fn run_and_capture_reaps_on_timeout() {
        let supervisor = Supervisor::new();
        let err = supervisor
            .run_and_capture("sleep", &["10"], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, HelperError::Timeout { .. }));
    }

    #[tokio::test]
    async fn run_and_capture_collects_stdout() {
        let supervisor = Supervisor::new();
        let out = supervisor
            .run_and_capture("echo", &["hello"], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn run_checked_reports_non_zero_exit() {
        let supervisor = Supervisor::new();
        let err = supervisor
            .run_checked("false", &[], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, HelperError::Exit { .. }));
        assert!(err.to_string().contains("status 1"));

        let out = supervisor
            .run_checked("true", &[], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.success);
    }

    #[tokio::test]
    async fn audio_handle_terminate_reaps_the_child() {
        let mut handle = AudioHandle::spawn("sleep", Path::new("10")).unwrap();
        assert!(!handle.finished(), "helper should still be running");
        // Terminate must kill and wait within its bounded reap window.
        tokio::time::timeout(Duration::from_secs(5), handle.terminate())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let supervisor = Supervisor::new();
        let err = supervisor
            .run_and_capture("definitely-not-a-real-helper", &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, HelperError::Spawn { .. }));
    }

    #[tokio::test]
    async fn signal_monitor_defaults_on_helper_failure() {
        // No iwconfig and (on most CI) unreadable /proc/net/wireless: the
        // monitor yields its default (None) rather than an error, and caches
        // the attempt so helpers are not respawned per call.
        let supervisor = Supervisor::new();
        let monitor = SignalMonitor::new(Duration::from_secs(30), Duration::from_millis(200));
        let first = monitor.signal_dbm(&supervisor).await;
        let second = monitor.signal_dbm(&supervisor).await;
        assert_eq!(first, second);
    }
}
