//! The audio server's port graph, as printed by `jack_lsp -pc`.

use std::collections::BTreeSet;
use std::fmt;
use std::process::Command;

use anyhow::{Context, bail};
use regex::Regex;

use crate::matcher::Matcher;

const PORT_LINE: &str = r"(?P<indent>\s*)(?P<layer>[^:]+):(?P<name>.+)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphItem {
    pub layer: String,
    pub name: String,
    pub properties: BTreeSet<String>,
    pub connected: BTreeSet<String>,
}

impl GraphItem {
    fn new(layer: &str, name: &str) -> Self {
        Self {
            layer: layer.to_string(),
            name: name.to_string(),
            properties: BTreeSet::new(),
            connected: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> String {
        format!("{}:{}", self.layer, self.name)
    }
}

impl fmt::Display for GraphItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.layer, self.name)?;
        if !self.properties.is_empty() {
            let props: Vec<_> = self.properties.iter().map(String::as_str).collect();
            write!(f, " [{}]", props.join(","))?;
        }
        for c in &self.connected {
            write!(f, " -> {c}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connection {
    Already,
    Made,
}

#[derive(Debug, Default)]
pub struct PortGraph {
    items: Vec<GraphItem>,
}

impl PortGraph {
    /// Run `jack_lsp -pc` and parse its output.
    pub fn query() -> anyhow::Result<Self> {
        let out = Command::new("jack_lsp")
            .arg("-pc")
            .output()
            .context("failed to run jack_lsp")?;
        if !out.status.success() {
            bail!(
                "jack_lsp failed ({}): {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(Self::parse(&String::from_utf8_lossy(&out.stdout))?)
    }

    pub fn parse(text: &str) -> Result<Self, regex::Error> {
        let mut m = Matcher::new(PORT_LINE)?;
        let mut items: Vec<GraphItem> = Vec::new();
        for line in text.lines() {
            if !m.is_match(line) {
                continue;
            }
            let (Some(indent), Some(layer), Some(name)) =
                (m.name("indent"), m.name("layer"), m.name("name"))
            else {
                continue;
            };
            if indent.is_empty() {
                items.push(GraphItem::new(layer, name));
                continue;
            }
            let layer = layer.trim();
            let Some(item) = items.last_mut() else {
                log::debug!("Sub-line before any port: {line:?}");
                continue;
            };
            if layer == "properties" {
                item.properties.extend(
                    name.trim_matches(|c| c == ' ' || c == ',')
                        .split(',')
                        .map(|p| p.trim().to_string())
                        .filter(|p| !p.is_empty()),
                );
            } else {
                item.connected.insert(format!("{layer}:{name}"));
            }
        }
        Ok(Self { items })
    }

    pub fn items(&self) -> &[GraphItem] {
        &self.items
    }

    /// First port whose `layer:name` matches `glob` (case-insensitive; a
    /// glob without `*` matches anywhere in the id), that has every one of
    /// `properties`, and that lives on `layer` if given.
    pub fn pick(&self, glob: &str, properties: &[&str], layer: Option<&str>) -> Option<&GraphItem> {
        let re = glob_regex(glob)?;
        let found = self.items.iter().find(|item| {
            layer.is_none_or(|l| item.layer == l)
                && properties.iter().all(|p| item.properties.contains(*p))
                && re.is_match(&item.id())
        });
        match found {
            Some(item) => log::debug!("Picked {item}"),
            None if properties.is_empty() => log::info!("{glob} failed to match anything"),
            None => log::info!("{glob} failed to match anything with properties {properties:?}"),
        }
        found
    }

    /// The physical output matching `out_glob` and the input matching
    /// `in_glob` on the same layer.
    pub fn pair(&self, out_glob: &str, in_glob: &str) -> anyhow::Result<(&GraphItem, &GraphItem)> {
        let out = self
            .pick(out_glob, &["output", "physical"], None)
            .with_context(|| format!("no physical output port matches '{out_glob}'"))?;
        let inp = self
            .pick(in_glob, &["input"], Some(out.layer.as_str()))
            .with_context(|| format!("no input port on '{}' matches '{in_glob}'", out.layer))?;
        Ok((out, inp))
    }

    pub fn connect(&self, out_glob: &str, in_glob: &str) -> anyhow::Result<Connection> {
        let (out, inp) = self.pair(out_glob, in_glob)?;
        if is_connected(out, inp) {
            log::info!("{} already connected to {}", out.id(), inp.id());
            return Ok(Connection::Already);
        }
        let status = Command::new("jack_connect")
            .arg(out.id())
            .arg(inp.id())
            .status()
            .context("failed to run jack_connect")?;
        if !status.success() {
            bail!("jack_connect {} {} failed: {status}", out.id(), inp.id());
        }
        log::info!("Connected {} -> {}", out.id(), inp.id());
        Ok(Connection::Made)
    }
}

fn is_connected(a: &GraphItem, b: &GraphItem) -> bool {
    b.connected.contains(&a.id()) || a.connected.contains(&b.id())
}

/// Translate a shell glob to an anchored, case-insensitive regex.
fn glob_regex(glob: &str) -> Option<Regex> {
    let glob = if glob.contains('*') {
        glob.to_string()
    } else {
        format!("*{glob}*")
    };
    let mut pattern = String::from("(?i)^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            '[' => {
                let mut class = String::from("[");
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    if c == '\\' || c == '[' {
                        class.push('\\');
                    }
                    class.push(c);
                }
                if closed {
                    pattern.push_str(&class);
                    pattern.push(']');
                } else {
                    pattern.push_str(&regex::escape(&class));
                }
            }
            c => pattern.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    pattern.push('$');
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            log::warn!("Bad port glob '{glob}': {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LSP: &str = "\
system:capture_1
\tproperties: output,physical,terminal,
system:playback_1
   fluidsynth:left
\tproperties: input,physical,terminal,
fluidsynth:left
   system:playback_1
\tproperties: output,
system:midi_capture_1
\tproperties: output,physical,terminal,
a2j:Midi Through [14] (capture): Midi Through Port-0
\tproperties: output,physical,terminal,
fluidsynth:midi_00
\tproperties: input,
";

    #[test]
    fn parses_ports_properties_and_connections() {
        let g = PortGraph::parse(LSP).unwrap();
        let ids: Vec<_> = g.items().iter().map(GraphItem::id).collect();
        assert_eq!(
            ids,
            [
                "system:capture_1",
                "system:playback_1",
                "fluidsynth:left",
                "system:midi_capture_1",
                "a2j:Midi Through [14] (capture): Midi Through Port-0",
                "fluidsynth:midi_00",
            ]
        );
        let playback = &g.items()[1];
        assert!(playback.properties.contains("input"));
        assert!(playback.properties.contains("physical"));
        assert!(playback.connected.contains("fluidsynth:left"));
        assert_eq!(g.items()[2].layer, "fluidsynth");
    }

    #[test]
    fn pick_requires_every_property() {
        let g = PortGraph::parse(LSP).unwrap();
        let p = g.pick("playback", &["input"], None).unwrap();
        assert_eq!(p.id(), "system:playback_1");
        assert!(g.pick("fluidsynth:left", &["physical"], None).is_none());
        assert!(g.pick("fluidsynth:left", &["output"], None).is_some());
    }

    #[test]
    fn pick_globs_case_insensitively() {
        let g = PortGraph::parse(LSP).unwrap();
        assert_eq!(g.pick("SYSTEM:cap*", &[], None).unwrap().id(), "system:capture_1");
        assert_eq!(
            g.pick("midi through", &["output"], Some("a2j")).unwrap().layer,
            "a2j"
        );
        assert!(g.pick("midi through", &[], Some("system")).is_none());
        assert!(g.pick("*[14]*", &[], None).is_some());
    }

    #[test]
    fn pairs_output_with_input_on_same_layer() {
        let g = PortGraph::parse(LSP).unwrap();
        let (out, inp) = g.pair("capture_1", "playback").unwrap();
        assert_eq!(out.id(), "system:capture_1");
        assert_eq!(inp.id(), "system:playback_1");
        assert!(g.pair("midi_capture", "midi_00").is_err());
    }

    #[test]
    fn detects_existing_connection() {
        let g = PortGraph::parse(
            "\
system:capture_1
   system:playback_1
\tproperties: output,physical,
system:playback_1
   system:capture_1
\tproperties: input,physical,
",
        )
        .unwrap();
        assert_eq!(g.connect("capture", "playback").unwrap(), Connection::Already);
    }

    #[test]
    fn glob_translation() {
        let re = glob_regex("sys?em:*_[12]").unwrap();
        assert!(re.is_match("system:playback_1"));
        assert!(!re.is_match("system:playback_3"));
        assert!(glob_regex("a.b").unwrap().is_match("xxa.byy"));
        assert!(!glob_regex("a.b").unwrap().is_match("axb"));
    }
}
