//! Client for the FluidSynth shell socket.
//!
//! The shell has no end-of-response marker: a response is whatever arrives
//! before the socket stays quiet for `timeout`. A slow server therefore gets
//! its reply cut short; raise `timeout_ms` in the config if that happens.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use regex::Regex;

use crate::config::SynthConfig;
use crate::error::{ProtocolParseError, SessionError};
use crate::matcher::{Matcher, Record};

const FONT_LINE: &str = r"\s*(?P<id>\d+)\s+(?P<path>\S+)\s*";
const CHANNEL_LINE: &str = r"chan\s+(?P<chan>\d+),\s+sfont\s+(?P<font>\d+),\s+bank\s+(?P<bank>\d+),\s+preset\s+(?P<prog>\d+),\s+(?P<name>.+?)\s*$";
const INSTRUMENT_LINE: &str = r"\s*0*(?P<bank>\d+)-0*(?P<prog>\d+)\s+(?P<name>.+?)\s*$";

const FONT_EXTENSIONS: &[&str] = &[".sf2", ".sf3"];

/// A loaded sound font, as listed by `fonts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontRecord {
    pub id: u32,
    pub name: String,
    pub path: String,
}

/// One preset of a sound font, as listed by `inst <font>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentRecord {
    pub name: String,
    pub font_id: u32,
    pub bank: u32,
    pub program: u32,
}

/// What a channel is currently playing, as listed by `channels -verbose`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAssignment {
    pub channel: u8,
    pub name: String,
    pub font_id: u32,
    pub bank: u32,
    pub program: u32,
}

/// Everything the instrument tree is built from, fetched in one go.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub fonts: Vec<FontRecord>,
    pub instruments: Vec<InstrumentRecord>,
    pub channels: Vec<ChannelAssignment>,
}

enum Link {
    Fresh,
    Connected(TcpStream),
    Dropped,
}

pub struct FluidSynth {
    addr: String,
    timeout: Duration,
    chunk_size: usize,
    prompt: Option<Regex>,
    link: Link,
}

/// Lines of one response, read off the socket as they are consumed.
///
/// Dropping a partially consumed response drains the rest, so the next
/// request never sees leftovers.
pub struct Response<'a> {
    synth: &'a mut FluidSynth,
    chunk: Vec<u8>,
    pending: Vec<u8>,
    lines: VecDeque<String>,
    received: bool,
    done: bool,
}

impl FluidSynth {
    pub fn new(config: &SynthConfig) -> Result<Self, SessionError> {
        let prompt = match config.prompt.as_str() {
            "" => None,
            pat => Some(Regex::new(pat)?),
        };
        Ok(Self {
            addr: format!("{}:{}", config.host, config.port),
            timeout: Duration::from_millis(config.timeout_ms.max(1)),
            chunk_size: config.chunk_size.max(64),
            prompt,
            link: Link::Fresh,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.link, Link::Connected(_))
    }

    /// Open (or reopen) the socket.
    pub fn connect(&mut self) -> Result<(), SessionError> {
        let stream = TcpStream::connect(&self.addr).map_err(|source| SessionError::Connect {
            addr: self.addr.clone(),
            source,
        })?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_nodelay(true).ok();
        log::info!("connected to synth at {}", self.addr);
        self.link = Link::Connected(stream);
        Ok(())
    }

    fn stream(&mut self) -> Result<&mut TcpStream, SessionError> {
        if matches!(self.link, Link::Fresh) {
            self.connect()?;
        }
        match &mut self.link {
            Link::Connected(stream) => Ok(stream),
            _ => Err(SessionError::Dropped),
        }
    }

    /// Write `commands` in one go and return the response lines.
    pub fn send<S: AsRef<str>>(&mut self, commands: &[S]) -> Result<Response<'_>, SessionError> {
        let trimmed: Vec<&str> = commands.iter().map(|c| c.as_ref().trim()).collect();
        log::debug!("send({trimmed:?})");
        let mut payload = trimmed.join("\n");
        payload.push('\n');

        let stream = self.stream()?;
        if let Err(e) = stream.write_all(payload.as_bytes()) {
            self.link = Link::Dropped;
            return Err(e.into());
        }

        let chunk = vec![0u8; self.chunk_size];
        Ok(Response {
            synth: self,
            chunk,
            pending: Vec::new(),
            lines: VecDeque::new(),
            received: false,
            done: false,
        })
    }

    /// Send and collect the whole response.
    pub fn request<S: AsRef<str>>(&mut self, commands: &[S]) -> Result<Vec<String>, SessionError> {
        self.send(commands)?.collect()
    }

    /// Round-trip `text` through the shell's `echo` command.
    pub fn echo(&mut self, text: &str) -> Result<Vec<String>, SessionError> {
        self.request(&[format!("echo {text}")])
    }

    /// Loaded sound fonts, ascending by id.
    pub fn list_fonts(&mut self) -> Result<Vec<FontRecord>, SessionError> {
        let lines = self.request(&["fonts"])?;
        let mut m = Matcher::new(FONT_LINE)?;
        let mut fonts: Vec<FontRecord> = lines
            .iter()
            .skip(1)
            .filter_map(|line| parse_line(&mut m, line, &[], FontRecord::from_record))
            .collect();
        fonts.sort_by_key(|f| f.id);
        Ok(fonts)
    }

    /// Channel assignments in the order the server reports them.
    pub fn list_channels(&mut self) -> Result<Vec<ChannelAssignment>, SessionError> {
        let lines = self.request(&["channels -verbose"])?;
        let mut m = Matcher::new(CHANNEL_LINE)?;
        Ok(lines
            .iter()
            .filter_map(|line| parse_line(&mut m, line, &[], ChannelAssignment::from_record))
            .collect())
    }

    /// Every preset of every loaded font, sorted by (font, bank, program).
    pub fn list_instruments(&mut self) -> Result<Vec<InstrumentRecord>, SessionError> {
        let fonts = self.list_fonts()?;
        self.instruments_of(&fonts)
    }

    fn instruments_of(&mut self, fonts: &[FontRecord]) -> Result<Vec<InstrumentRecord>, SessionError> {
        let mut m = Matcher::new(INSTRUMENT_LINE)?;
        let mut out = Vec::new();
        for font in fonts {
            let lines = self.request(&[format!("inst {}", font.id)])?;
            let tag = [("font", font.id.to_string())];
            out.extend(
                lines
                    .iter()
                    .filter_map(|line| parse_line(&mut m, line, &tag, InstrumentRecord::from_record)),
            );
        }
        out.sort_by_key(|i| (i.font_id, i.bank, i.program));
        Ok(out)
    }

    /// Bind `channel` to a preset. The reply is read and discarded.
    pub fn select_instrument(
        &mut self,
        font: u32,
        bank: u32,
        program: u32,
        channel: u8,
    ) -> Result<(), SessionError> {
        let reply = self.request(&[format!("select {channel} {font} {bank} {program}")])?;
        for line in reply {
            log::debug!("select reply: {line}");
        }
        Ok(())
    }

    /// Fonts, instruments and channel assignments, fetched back to back.
    pub fn snapshot(&mut self) -> Result<Snapshot, SessionError> {
        let fonts = self.list_fonts()?;
        let instruments = self.instruments_of(&fonts)?;
        let channels = self.list_channels()?;
        Ok(Snapshot {
            fonts,
            instruments,
            channels,
        })
    }

    fn clean(&self, raw: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(raw);
        let text = text.trim_end();
        let line = match &self.prompt {
            Some(re) => re.replace(text, "").into_owned(),
            None => text.to_string(),
        };
        (!line.is_empty()).then_some(line)
    }
}

fn parse_line<T>(
    m: &mut Matcher,
    line: &str,
    extras: &[(&str, String)],
    build: fn(&Record) -> Result<T, ProtocolParseError>,
) -> Option<T> {
    if !m.is_match(line) {
        log::trace!("skipping unrecognised line {line:?}");
        return None;
    }
    let parsed = m
        .record_with(&[], extras)
        .map_err(|e| e.to_string())
        .and_then(|rec| build(&rec).map_err(|e| e.to_string()));
    match parsed {
        Ok(v) => Some(v),
        Err(e) => {
            log::debug!("skipping line {line:?}: {e}");
            None
        }
    }
}

/// `/usr/share/sounds/sf2/FluidR3_GM.sf2` → `FluidR3_GM`.
pub fn font_name(path: &str) -> String {
    let file = path.rsplit('/').next().unwrap_or(path);
    let lower = file.to_ascii_lowercase();
    FONT_EXTENSIONS
        .iter()
        .find(|ext| lower.ends_with(*ext))
        .map(|ext| file[..file.len() - ext.len()].to_string())
        .unwrap_or_else(|| file.to_string())
}

impl FontRecord {
    fn from_record(rec: &Record) -> Result<Self, ProtocolParseError> {
        let path = rec.text("path")?.to_string();
        Ok(Self {
            id: rec.parse("id")?,
            name: font_name(&path),
            path,
        })
    }
}

impl InstrumentRecord {
    fn from_record(rec: &Record) -> Result<Self, ProtocolParseError> {
        Ok(Self {
            name: rec.text("name")?.to_string(),
            font_id: rec.parse("font")?,
            bank: rec.parse("bank")?,
            program: rec.parse("prog")?,
        })
    }
}

impl ChannelAssignment {
    fn from_record(rec: &Record) -> Result<Self, ProtocolParseError> {
        Ok(Self {
            channel: rec.parse("chan")?,
            name: rec.text("name")?.to_string(),
            font_id: rec.parse("font")?,
            bank: rec.parse("bank")?,
            program: rec.parse("prog")?,
        })
    }
}

impl Response<'_> {
    fn fill(&mut self) -> Result<(), SessionError> {
        let Link::Connected(stream) = &mut self.synth.link else {
            self.done = true;
            return Err(SessionError::Dropped);
        };
        match stream.read(&mut self.chunk) {
            Ok(0) => {
                log::warn!("synth at {} closed the connection", self.synth.addr);
                self.synth.link = Link::Dropped;
                if !self.received {
                    // hung up before answering: nothing to hand back
                    self.done = true;
                    return Err(SessionError::Dropped);
                }
                self.finish();
            }
            Ok(n) => {
                self.received = true;
                self.pending.extend_from_slice(&self.chunk[..n]);
                self.split_lines();
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                self.finish();
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                self.synth.link = Link::Dropped;
                self.done = true;
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn split_lines(&mut self) {
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n' || b == b'\r') {
            let rest = self.pending.split_off(end);
            let raw = std::mem::replace(&mut self.pending, rest);
            let skip = self
                .pending
                .iter()
                .take_while(|&&b| b == b'\n' || b == b'\r')
                .count();
            self.pending.drain(..skip);
            if let Some(line) = self.synth.clean(&raw) {
                self.lines.push_back(line);
            }
        }
    }

    fn finish(&mut self) {
        self.done = true;
        let raw = std::mem::take(&mut self.pending);
        if let Some(line) = self.synth.clean(&raw) {
            self.lines.push_back(line);
        }
    }
}

impl Iterator for Response<'_> {
    type Item = Result<String, SessionError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(line) = self.lines.pop_front() {
                return Some(Ok(line));
            }
            if self.done {
                return None;
            }
            if let Err(e) = self.fill() {
                return Some(Err(e));
            }
        }
    }
}

impl Drop for Response<'_> {
    fn drop(&mut self) {
        while !self.done {
            if self.fill().is_err() {
                break;
            }
        }
    }
}
