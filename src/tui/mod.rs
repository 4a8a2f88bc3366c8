use std::collections::HashSet;
use std::io;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};

use view::list::{Expander, ListState, TreeRow};
use view::{StatusBar, TreeList, centered_rect};

use crate::config::MetronomeConfig;
use crate::error::{MetronomeError, SessionError};
use crate::fluid::{FluidSynth, Snapshot};
use crate::metronome::{Metronome, Track};
use crate::midi::VirtualPort;
use crate::pathkey::PathKey;
use crate::tree::{InstrumentTree, NodeId, NodeKind, TreeDiff};

const STATUS_TTL: Duration = Duration::from_secs(5);
const BPM_STEP: f64 = 5.0;
const BPM_RANGE: (f64, f64) = (5.0, 600.0);
const CHANNELS: u8 = 16;

struct Status {
    text: String,
    error: bool,
    at: Instant,
}

struct State {
    synth: FluidSynth,
    snapshot: Snapshot,
    tree: InstrumentTree,
    expanded: HashSet<PathKey>,
    rows: Vec<(NodeId, usize)>,
    list: ListState,
    channel: u8,
    bpm: f64,
    metro_config: MetronomeConfig,
    metronome: Option<Metronome>,
    status: Option<Status>,
    help: bool,
    quit: bool,
}

impl State {
    fn new(synth: FluidSynth, snapshot: Snapshot, metro_config: MetronomeConfig) -> Self {
        let tree = InstrumentTree::from_snapshot(&snapshot);
        let mut s = Self {
            synth,
            snapshot,
            tree,
            expanded: HashSet::new(),
            rows: Vec::new(),
            list: ListState::new(0),
            channel: 0,
            bpm: metro_config.bpm,
            metro_config,
            metronome: None,
            status: None,
            help: false,
            quit: false,
        };
        s.refresh_rows();
        s.report_lookup_errors();
        s
    }

    fn info(&mut self, text: impl Into<String>) {
        self.status = Some(Status {
            text: text.into(),
            error: false,
            at: Instant::now(),
        });
    }

    fn error(&mut self, text: impl Into<String>) {
        let text = text.into();
        log::warn!("{text}");
        self.status = Some(Status {
            text,
            error: true,
            at: Instant::now(),
        });
    }

    fn expire_status(&mut self) {
        if self.status.as_ref().is_some_and(|s| s.at.elapsed() > STATUS_TTL) {
            self.status = None;
        }
    }

    fn report_lookup_errors(&mut self) {
        match self.tree.lookup_errors() {
            [] => {}
            [one] => {
                let text = one.to_string();
                self.error(text);
            }
            many => {
                let text = format!("{} channels are bound to unlisted instruments", many.len());
                self.error(text);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Tree navigation
    // -----------------------------------------------------------------------

    fn refresh_rows(&mut self) {
        self.rows = self.tree.visible(&self.expanded);
        self.list.set_len(self.rows.len());
    }

    fn focused(&self) -> Option<NodeId> {
        self.rows.get(self.list.selected).map(|&(id, _)| id)
    }

    fn focused_key(&self) -> PathKey {
        self.focused()
            .map(|id| self.tree.node(id).key.clone())
            .unwrap_or_else(PathKey::root)
    }

    /// Move the cursor to `key`, expanding whatever hides it.
    fn focus(&mut self, key: &PathKey) {
        let mut grew = false;
        for a in key.ancestors().skip(1).filter(|a| !a.is_root()) {
            grew |= self.expanded.insert(a);
        }
        if grew {
            self.refresh_rows();
        }
        if let Some(i) = self
            .rows
            .iter()
            .position(|&(id, _)| self.tree.node(id).key == *key)
        {
            self.list.select(i);
        }
    }

    fn expand(&mut self) {
        let Some(id) = self.focused() else { return };
        let node = self.tree.node(id);
        if node.is_leaf() {
            return;
        }
        if self.expanded.insert(node.key.clone()) {
            self.refresh_rows();
        } else if let Some(&first) = node.children().first() {
            let key = self.tree.node(first).key.clone();
            self.focus(&key);
        }
    }

    fn collapse(&mut self) {
        let Some(id) = self.focused() else { return };
        let node = self.tree.node(id);
        if self.expanded.remove(&node.key) {
            self.refresh_rows();
            return;
        }
        if let Some(parent) = node.key.parent().filter(|p| !p.is_root()) {
            self.focus(&parent);
        }
    }

    // -----------------------------------------------------------------------
    // Synth actions
    // -----------------------------------------------------------------------

    /// Swap in a new snapshot, keeping the cursor on the same key (or the
    /// closest surviving ancestor).
    fn apply_snapshot(&mut self, snapshot: Snapshot) -> TreeDiff {
        let focus = self.focused_key();
        let tree = InstrumentTree::from_snapshot(&snapshot);
        let diff = tree.diff(&self.tree);
        self.tree = tree;
        self.snapshot = snapshot;
        self.expanded.retain(|k| self.tree.contains(k));
        self.refresh_rows();
        let target = self.tree.relocate(&focus);
        self.focus(&target);
        diff
    }

    fn reload(&mut self) {
        let result = (|| -> Result<Snapshot, SessionError> {
            if !self.synth.is_connected() {
                self.synth.connect()?;
            }
            self.synth.snapshot()
        })();
        match result {
            Ok(snap) => {
                let d = self.apply_snapshot(snap);
                log::info!(
                    "Reloaded: {} added, {} removed, {} rechanneled",
                    d.added.len(),
                    d.removed.len(),
                    d.rechanneled.len()
                );
                if self.tree.lookup_errors().is_empty() {
                    self.info(format!(
                        "reloaded: +{} -{} ~{}",
                        d.added.len(),
                        d.removed.len(),
                        d.rechanneled.len()
                    ));
                } else {
                    self.report_lookup_errors();
                }
            }
            Err(e) => self.error(format!("reload failed: {e}")),
        }
    }

    fn assign(&mut self) {
        let Some(id) = self.focused() else { return };
        let Some(inst) = self.tree.node(id).instrument().cloned() else {
            self.info("pick an instrument to assign");
            return;
        };
        let channel = self.channel;
        let result = self
            .synth
            .select_instrument(inst.font_id, inst.bank, inst.program, channel)
            .and_then(|()| self.synth.list_channels());
        match result {
            Ok(channels) => {
                let snap = Snapshot {
                    channels,
                    ..self.snapshot.clone()
                };
                self.apply_snapshot(snap);
                self.info(format!("channel {channel} -> {}", inst.name));
            }
            Err(SessionError::Dropped) => {
                self.error("synth closed the connection, press r to reconnect")
            }
            Err(e) => self.error(format!("assign failed: {e}")),
        }
    }

    fn set_channel(&mut self, channel: u8) {
        self.channel = channel.min(CHANNELS - 1);
    }

    // -----------------------------------------------------------------------
    // Metronome
    // -----------------------------------------------------------------------

    /// The click plays on its own configured channel, never the one
    /// instruments are being assigned to.
    fn click_track(&self) -> Result<Track, MetronomeError> {
        let cfg = &self.metro_config;
        Track::parse(&cfg.track, cfg.channel)
    }

    fn open_metronome(&self) -> anyhow::Result<Metronome> {
        let cfg = &self.metro_config;
        let track = self.click_track()?;
        let port = VirtualPort::open(&cfg.client_name, &cfg.port_name)?;
        Ok(Metronome::new(track, self.bpm, Box::new(port))?)
    }

    fn toggle_metronome(&mut self) {
        if self.metronome.is_none() {
            match self.open_metronome() {
                Ok(m) => self.metronome = Some(m),
                Err(e) => {
                    self.error(format!("metronome unavailable: {e}"));
                    return;
                }
            }
        }
        let Some(m) = self.metronome.as_mut() else { return };
        match m.toggle() {
            Ok(true) => self.info(format!("metronome on, {:.0} bpm", self.bpm)),
            Ok(false) => self.info("metronome off"),
            Err(e) => self.error(format!("metronome: {e}")),
        }
    }

    fn nudge_bpm(&mut self, delta: f64) {
        self.bpm = (self.bpm + delta).clamp(BPM_RANGE.0, BPM_RANGE.1);
        if let Some(m) = self.metronome.as_mut() {
            if let Err(e) = m.set_bpm(self.bpm) {
                let text = format!("metronome: {e}");
                self.error(text);
                return;
            }
        }
        self.info(format!("{:.0} bpm", self.bpm));
    }

    fn metronome_running(&self) -> bool {
        self.metronome.as_ref().is_some_and(|m| m.is_running())
    }
}

pub fn run(synth: FluidSynth, snapshot: Snapshot, metro_config: MetronomeConfig) -> anyhow::Result<()> {
    let mut s = State::new(synth, snapshot, metro_config);

    crossterm::terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = event_loop(&mut terminal, &mut s);

    if let Some(m) = s.metronome.as_mut() {
        m.stop();
    }

    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    crossterm::terminal::disable_raw_mode()?;

    result.map_err(Into::into)
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    s: &mut State,
) -> io::Result<()> {
    loop {
        s.expire_status();
        if s.metronome.as_ref().is_some_and(|m| m.sink_failed()) {
            s.metronome = None;
            s.error("metronome stopped: MIDI port went away");
        }

        render(terminal, s)?;
        if s.quit {
            break;
        }

        // Poll with timeout so an expiring status line gets redrawn.
        if !event::poll(Duration::from_millis(250))? {
            continue;
        }
        process_event(s, event::read()?);
        while event::poll(Duration::ZERO)? {
            process_event(s, event::read()?);
        }
    }
    Ok(())
}

fn process_event(s: &mut State, ev: Event) {
    if let Event::Key(key) = ev {
        if key.kind == KeyEventKind::Press {
            handle_key(s, key.code, key.modifiers);
        }
    }
}

fn handle_key(s: &mut State, code: KeyCode, modifiers: KeyModifiers) {
    if s.help {
        s.help = false;
        return;
    }
    if modifiers.contains(KeyModifiers::CONTROL) && code == KeyCode::Char('c') {
        s.quit = true;
        return;
    }
    match code {
        KeyCode::Char('q') | KeyCode::Esc => s.quit = true,
        KeyCode::Char('?') => s.help = true,
        KeyCode::Up | KeyCode::Char('k') => {
            s.list.up();
        }
        KeyCode::Down | KeyCode::Char('j') => {
            s.list.down();
        }
        KeyCode::PageUp => s.list.page_up(10),
        KeyCode::PageDown => s.list.page_down(10),
        KeyCode::Home => s.list.select(0),
        KeyCode::End => s.list.select(usize::MAX),
        KeyCode::Right | KeyCode::Char('l') => s.expand(),
        KeyCode::Enter => {
            let leaf = s.focused().is_some_and(|id| s.tree.node(id).is_leaf());
            if leaf { s.assign() } else { s.expand() }
        }
        KeyCode::Left | KeyCode::Char('h') => s.collapse(),
        KeyCode::Char('s') => s.assign(),
        KeyCode::Char(c @ '0'..='9') => {
            s.set_channel(c as u8 - b'0');
            let ch = s.channel;
            s.info(format!("channel {ch}"));
        }
        KeyCode::Char('+') | KeyCode::Char('=') => {
            s.set_channel(s.channel.saturating_add(1));
            let ch = s.channel;
            s.info(format!("channel {ch}"));
        }
        KeyCode::Char('-') => {
            s.set_channel(s.channel.saturating_sub(1));
            let ch = s.channel;
            s.info(format!("channel {ch}"));
        }
        KeyCode::Char('r') => s.reload(),
        KeyCode::Char('m') => s.toggle_metronome(),
        KeyCode::Char('[') => s.nudge_bpm(-BPM_STEP),
        KeyCode::Char(']') => s.nudge_bpm(BPM_STEP),
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, s: &mut State) -> io::Result<()> {
    terminal.draw(|frame| {
        let area = frame.area();
        let [tree_area, status_area] =
            Layout::vertical([Constraint::Fill(1), Constraint::Length(1)]).areas(area);

        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!(" {} ", s.synth.addr()));
        let inner = block.inner(tree_area);
        frame.render_widget(block, tree_area);

        s.list.ensure_visible(inner.height as usize);
        render_tree(frame, inner, s);
        render_status(frame, status_area, s);

        if s.help {
            render_help(frame, area);
        }
    })?;
    Ok(())
}

fn render_tree(frame: &mut ratatui::Frame, area: Rect, s: &State) {
    if s.rows.is_empty() {
        frame.render_widget(
            Paragraph::new("No soundfonts loaded").style(Style::default().fg(Color::DarkGray)),
            area,
        );
        return;
    }

    let notes: Vec<String> = s
        .rows
        .iter()
        .map(|&(id, _)| {
            let chans = s.tree.channels(id);
            if chans.is_empty() { String::new() } else { chans.to_string() }
        })
        .collect();

    let rows: Vec<TreeRow> = s
        .rows
        .iter()
        .zip(&notes)
        .map(|(&(id, depth), note)| {
            let node = s.tree.node(id);
            let expander = if node.is_leaf() {
                Expander::Leaf
            } else if s.expanded.contains(&node.key) {
                Expander::Expanded
            } else {
                Expander::Collapsed
            };
            let style = match node.kind {
                NodeKind::Font(_) => Style::default().add_modifier(Modifier::BOLD),
                NodeKind::Instrument(_) if s.tree.channels(id).contains(s.channel.into()) => {
                    Style::default().fg(Color::Yellow)
                }
                _ => Style::default(),
            };
            TreeRow::new(depth, expander, &node.name)
                .note(note)
                .style(style)
        })
        .collect();

    frame.render_widget(TreeList::new(&rows, &s.list), area);
}

fn render_status(frame: &mut ratatui::Frame, area: Rect, s: &State) {
    let (message, message_style) = match &s.status {
        Some(st) if st.error => (st.text.as_str(), Style::default().fg(Color::Red)),
        Some(st) => (st.text.as_str(), Style::default().fg(Color::White)),
        None => ("? help", Style::default().fg(Color::DarkGray)),
    };
    let channel = format!("ch {}", s.channel);
    let tempo = format!(
        "{} {:.0} bpm",
        if s.metronome_running() { '▶' } else { '■' },
        s.bpm
    );
    let on = Style::default().fg(Color::Green);
    let off = Style::default().fg(Color::DarkGray);
    let bar = StatusBar::new(message)
        .message_style(message_style)
        .segment(&channel, Style::default().fg(Color::Yellow))
        .segment(&tempo, if s.metronome_running() { on } else { off });
    frame.render_widget(bar, area);
}

fn render_help(frame: &mut ratatui::Frame, area: Rect) {
    let lines = help_lines();
    let height = lines.len() as u16 + 2;
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) as u16 + 4;
    let popup = centered_rect(width, height, area);
    frame.render_widget(Clear, popup);
    frame.render_widget(
        Paragraph::new(lines.join("\n")).block(
            Block::default()
                .borders(Borders::ALL)
                .title(" keys ")
                .border_style(Style::default().fg(Color::Yellow)),
        ),
        popup,
    );
}

fn help_lines() -> &'static [&'static str] {
    &[
        "Up/Down     Move",
        "Right       Expand / first child",
        "Left        Collapse / parent",
        "Enter       Expand, or assign an instrument",
        "s           Assign instrument to channel",
        "0-9 + -     Choose channel (+ - reach 10-15)",
        "r           Reload from the synth",
        "m           Metronome on/off",
        "[ ]         Tempo -/+ 5 bpm",
        "q           Quit",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SynthConfig;
    use crate::fluid::{ChannelAssignment, FontRecord, InstrumentRecord};

    fn snapshot(with_strings: bool) -> Snapshot {
        let mut instruments = vec![
            InstrumentRecord {
                name: "Piano".into(),
                font_id: 1,
                bank: 0,
                program: 0,
            },
            InstrumentRecord {
                name: "Standard".into(),
                font_id: 1,
                bank: 128,
                program: 0,
            },
        ];
        if with_strings {
            instruments.push(InstrumentRecord {
                name: "Strings".into(),
                font_id: 1,
                bank: 0,
                program: 48,
            });
        }
        Snapshot {
            fonts: vec![FontRecord {
                id: 1,
                name: "GM".into(),
                path: "/sf/GM.sf2".into(),
            }],
            instruments,
            channels: vec![ChannelAssignment {
                channel: 0,
                name: "Piano".into(),
                font_id: 1,
                bank: 0,
                program: 0,
            }],
        }
    }

    fn state(snap: Snapshot) -> State {
        let synth = FluidSynth::new(&SynthConfig::default()).unwrap();
        State::new(synth, snap, MetronomeConfig::default())
    }

    fn press(s: &mut State, code: KeyCode) {
        handle_key(s, code, KeyModifiers::NONE);
    }

    #[test]
    fn starts_with_fonts_collapsed() {
        let s = state(snapshot(false));
        assert_eq!(s.rows.len(), 1);
        assert_eq!(s.focused_key(), PathKey::font(1));
    }

    #[test]
    fn expand_and_collapse_walk_the_tree() {
        let mut s = state(snapshot(false));
        press(&mut s, KeyCode::Right);
        assert_eq!(s.rows.len(), 3);
        press(&mut s, KeyCode::Right);
        assert_eq!(s.focused_key(), PathKey::bank(1, 0));
        press(&mut s, KeyCode::Enter);
        press(&mut s, KeyCode::Down);
        assert_eq!(s.focused_key(), PathKey::program(1, 0, 0));

        press(&mut s, KeyCode::Left);
        assert_eq!(s.focused_key(), PathKey::bank(1, 0));
        press(&mut s, KeyCode::Left);
        assert_eq!(s.rows.len(), 3);
        press(&mut s, KeyCode::Left);
        assert_eq!(s.focused_key(), PathKey::font(1));
    }

    #[test]
    fn reload_keeps_focus_on_surviving_key() {
        let mut s = state(snapshot(true));
        s.focus(&PathKey::program(1, 0, 48));
        assert_eq!(s.focused_key(), PathKey::program(1, 0, 48));

        let d = s.apply_snapshot(snapshot(true));
        assert!(d.is_empty());
        assert_eq!(s.focused_key(), PathKey::program(1, 0, 48));

        let d = s.apply_snapshot(snapshot(false));
        assert_eq!(d.removed, [PathKey::program(1, 0, 48)]);
        assert_eq!(s.focused_key(), PathKey::bank(1, 0));
    }

    #[test]
    fn channel_keys_clamp() {
        let mut s = state(snapshot(false));
        press(&mut s, KeyCode::Char('7'));
        assert_eq!(s.channel, 7);
        for _ in 0..20 {
            press(&mut s, KeyCode::Char('+'));
        }
        assert_eq!(s.channel, 15);
        for _ in 0..20 {
            press(&mut s, KeyCode::Char('-'));
        }
        assert_eq!(s.channel, 0);
    }

    #[test]
    fn click_channel_comes_from_config() {
        let synth = FluidSynth::new(&SynthConfig::default()).unwrap();
        let metro = MetronomeConfig {
            channel: 12,
            ..MetronomeConfig::default()
        };
        let mut s = State::new(synth, snapshot(false), metro);
        press(&mut s, KeyCode::Char('3'));
        assert_eq!(s.channel, 3);

        let track = s.click_track().unwrap();
        let channels: Vec<u8> = track.beats().iter().flatten().map(|n| n.channel).collect();
        assert!(!channels.is_empty());
        assert!(channels.iter().all(|&c| c == 12));
    }

    #[test]
    fn tempo_keys_step_and_clamp() {
        let mut s = state(snapshot(false));
        press(&mut s, KeyCode::Char(']'));
        assert_eq!(s.bpm, 125.0);
        for _ in 0..100 {
            press(&mut s, KeyCode::Char('['));
        }
        assert_eq!(s.bpm, 5.0);
    }

    #[test]
    fn assign_on_a_branch_does_nothing() {
        let mut s = state(snapshot(false));
        press(&mut s, KeyCode::Char('s'));
        assert!(s.status.as_ref().is_some_and(|st| !st.error));
        assert!(!s.synth.is_connected());
    }

    #[test]
    fn quit_keys() {
        let mut s = state(snapshot(false));
        handle_key(&mut s, KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert!(s.quit);
    }
}
