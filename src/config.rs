use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::jack::JackOptions;
use crate::metronome::DEFAULT_BPM;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub synth: SynthConfig,
    pub jack: JackOptions,
    pub metronome: MetronomeConfig,
}

/// Where the synth's shell listens and how to read its replies.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub host: String,
    pub port: u16,
    /// Idle time after which a response is considered complete.
    pub timeout_ms: u64,
    /// Regex stripped from the start of every reply line. Empty disables it.
    pub prompt: String,
    pub chunk_size: usize,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 9800,
            timeout_ms: 100,
            prompt: r"^[^>]*>\s*".into(),
            chunk_size: 8192,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetronomeConfig {
    pub bpm: f64,
    /// Track in text form, see [`crate::metronome::Track`].
    pub track: String,
    pub channel: u8,
    pub client_name: String,
    pub port_name: String,
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            bpm: DEFAULT_BPM,
            track: "60:120 60:90 60:90 60:90".into(),
            channel: 9,
            client_name: "fluidterm".into(),
            port_name: "metronome".into(),
        }
    }
}

/// `<config_dir>/fluidterm/config.toml`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("fluidterm").join("config.toml"))
}

pub fn parse(content: &str) -> anyhow::Result<Config> {
    Ok(toml::from_str(content)?)
}

pub fn load(path: &Path) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    parse(&content).with_context(|| format!("parsing config {}", path.display()))
}

/// Load `explicit` if given (it must exist), else the default location if
/// present, else built-in defaults.
pub fn resolve(explicit: Option<&Path>) -> anyhow::Result<Config> {
    if let Some(path) = explicit {
        return load(path);
    }
    match default_path() {
        Some(path) if path.exists() => {
            log::debug!("Using config {}", path.display());
            load(&path)
        }
        _ => Ok(Config::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_gives_defaults() {
        let c = parse("").unwrap();
        assert_eq!(c.synth.host, "localhost");
        assert_eq!(c.synth.port, 9800);
        assert_eq!(c.synth.timeout_ms, 100);
        assert_eq!(c.metronome.bpm, 120.0);
        assert_eq!(c.jack.rate, 48000);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let c = parse(
            r#"
            [synth]
            port = 9900
            prompt = ""

            [metronome]
            bpm = 90.5
            track = "36,42 42"
            "#,
        )
        .unwrap();
        assert_eq!(c.synth.port, 9900);
        assert_eq!(c.synth.host, "localhost");
        assert!(c.synth.prompt.is_empty());
        assert_eq!(c.metronome.bpm, 90.5);
        assert_eq!(c.metronome.track, "36,42 42");
        assert_eq!(c.metronome.port_name, "metronome");
    }

    #[test]
    fn loads_from_disk() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[jack]\ndriver = \"dummy\"\nrealtime = false").unwrap();
        let c = resolve(Some(f.path())).unwrap();
        assert_eq!(c.jack.driver, "dummy");
        assert!(!c.jack.realtime);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("nope.toml"));
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(parse("[synth]\nport = \"many\"").is_err());
    }
}
