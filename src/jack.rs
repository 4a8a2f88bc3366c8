use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::Deserialize;

/// How `jackd` gets launched.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct JackOptions {
    pub realtime: bool,
    pub driver: String,
    pub rate: u32,
    pub period: u32,
    pub nperiods: u32,
    pub softmode: bool,
    pub midi: String,
    pub playback: Option<String>,
}

impl Default for JackOptions {
    fn default() -> Self {
        Self {
            realtime: true,
            driver: "alsa".into(),
            rate: 48000,
            period: 512,
            nperiods: 2,
            softmode: true,
            midi: "seq".into(),
            playback: None,
        }
    }
}

impl JackOptions {
    /// Full argv, program name first.
    pub fn command(&self) -> Vec<String> {
        let mut cmd = vec!["jackd".to_string()];
        cmd.push(if self.realtime { "--realtime" } else { "--no-realtime" }.into());
        cmd.extend(["--driver".into(), self.driver.clone()]);
        cmd.extend(["--rate".into(), self.rate.to_string()]);
        cmd.extend(["--period".into(), self.period.to_string()]);
        cmd.extend(["--nperiods".into(), self.nperiods.to_string()]);
        if self.softmode {
            cmd.push("--softmode".into());
        }
        cmd.extend(["--midi".into(), self.midi.clone()]);
        if let Some(dev) = &self.playback {
            cmd.extend(["--playback".into(), dev.clone()]);
        }
        cmd
    }
}

/// A running `jackd` whose output is collected line by line.
pub struct JackServer {
    child: Child,
    lines: Receiver<String>,
}

impl JackServer {
    pub fn start(options: &JackOptions) -> anyhow::Result<Self> {
        let argv = options.command();
        Self::spawn(&argv)
    }

    fn spawn(argv: &[String]) -> anyhow::Result<Self> {
        let (program, args) = argv.split_first().context("empty command line")?;
        log::info!("Starting jack with {}", argv.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;

        let (tx, lines) = crossbeam_channel::unbounded();
        if let Some(out) = child.stdout.take() {
            forward_lines(out, tx.clone());
        }
        if let Some(err) = child.stderr.take() {
            forward_lines(err, tx);
        }
        Ok(Self { child, lines })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Log whatever the server prints within `budget`. Returns the lines
    /// seen.
    pub fn drain_log(&self, budget: Duration) -> Vec<String> {
        let deadline = Instant::now() + budget;
        let mut seen = Vec::new();
        loop {
            let wait = deadline.saturating_duration_since(Instant::now());
            match self.lines.recv_timeout(wait) {
                Ok(line) => {
                    log::info!("jackd: {line}");
                    seen.push(line);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        seen
    }

    /// SIGTERM, then kill if it hasn't exited within `grace`.
    pub fn stop(&mut self, grace: Duration) -> anyhow::Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        log::info!("Stopping jack");
        terminate(&self.child);
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if let Some(status) = self.child.try_wait()? {
                log::info!("jackd exited: {status}");
                return Ok(());
            }
            thread::sleep(Duration::from_millis(20));
        }
        log::warn!("jackd ignored SIGTERM, killing");
        self.child.kill()?;
        let status = self.child.wait()?;
        log::info!("jackd exited: {status}");
        Ok(())
    }
}

impl Drop for JackServer {
    fn drop(&mut self) {
        if let Err(e) = self.stop(Duration::from_secs(2)) {
            log::warn!("Stopping jack: {e}");
        }
    }
}

fn forward_lines<R: Read + Send + 'static>(stream: R, tx: Sender<String>) {
    thread::spawn(move || {
        for line in BufReader::new(stream).lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

#[cfg(unix)]
fn terminate(child: &Child) {
    // SAFETY: plain kill(2) on a pid we spawned and haven't reaped.
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate(_child: &Child) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_command_line() {
        assert_eq!(
            JackOptions::default().command(),
            [
                "jackd",
                "--realtime",
                "--driver",
                "alsa",
                "--rate",
                "48000",
                "--period",
                "512",
                "--nperiods",
                "2",
                "--softmode",
                "--midi",
                "seq"
            ]
        );
    }

    #[test]
    fn optional_flags() {
        let opts = JackOptions {
            realtime: false,
            softmode: false,
            driver: "dummy".into(),
            playback: Some("hw:1".into()),
            ..JackOptions::default()
        };
        let cmd = opts.command();
        assert_eq!(cmd[1], "--no-realtime");
        assert!(!cmd.contains(&"--softmode".to_string()));
        assert_eq!(&cmd[cmd.len() - 2..], ["--playback", "hw:1"]);
    }

    #[cfg(unix)]
    #[test]
    fn collects_output_and_stops() {
        let argv: Vec<String> = ["sh", "-c", "echo ready; exec sleep 30"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut server = JackServer::spawn(&argv).unwrap();
        let lines = server.drain_log(Duration::from_millis(500));
        assert_eq!(lines, ["ready"]);
        assert!(server.is_running());
        server.stop(Duration::from_secs(2)).unwrap();
        assert!(!server.is_running());
    }
}
