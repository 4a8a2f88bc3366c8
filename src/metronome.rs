//! A tempo-locked click track.
//!
//! [`BeatClock`] fires a callback at a fixed rate on its own thread until the
//! callback returns `false` or the clock is stopped. [`Metronome`] walks a
//! [`Track`] on top of it, sounding each beat's notes and releasing them
//! shortly before the next beat.
//!
//! Nothing inside a tick logs or allocates: a tick may run while the UI
//! thread holds the logger.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, select};

use crate::error::MetronomeError;
use crate::midi::{MidiSink, note_off, note_on};

pub const DEFAULT_VELOCITY: u8 = 112;
pub const DEFAULT_BPM: f64 = 120.0;

const MIN_GATE: f64 = 0.1;
const MAX_GATE: f64 = 0.9;
const GATE_RATIO: f64 = 0.95;

pub fn seconds_per_beat(bpm: f64) -> f64 {
    60.0 / bpm
}

/// How long a note sounds before its note-off.
pub fn gate(bpm: f64) -> Duration {
    Duration::from_secs_f64((GATE_RATIO * seconds_per_beat(bpm)).clamp(MIN_GATE, MAX_GATE))
}

fn check_bpm(bpm: f64) -> Result<f64, MetronomeError> {
    if bpm.is_finite() && bpm > 0.0 {
        Ok(bpm)
    } else {
        Err(MetronomeError::Tempo(bpm))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note {
    pub note: u8,
    pub velocity: u8,
    pub channel: u8,
}

impl Note {
    /// Out-of-range values are clamped: note and velocity to 0..=127,
    /// channel to 0..=15.
    pub fn new(note: i64, velocity: i64, channel: i64) -> Self {
        Self {
            note: note.clamp(0, 127) as u8,
            velocity: velocity.clamp(0, 127) as u8,
            channel: channel.clamp(0, 15) as u8,
        }
    }

    pub fn on(&self) -> [u8; 3] {
        note_on(self.channel, self.note, self.velocity)
    }

    pub fn off(&self) -> [u8; 3] {
        note_off(self.channel, self.note)
    }
}

/// Notes sounded together; empty for a rest.
pub type Beat = Vec<Note>;

/// A looped sequence of beats.
///
/// Text form: beats separated by whitespace, notes within a beat by `,`,
/// an optional `:velocity` per note, `.` for a rest. `60:120 60:90 60:90`
/// is a waltz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    beats: Vec<Beat>,
}

impl Track {
    pub fn new(beats: Vec<Beat>) -> Result<Self, MetronomeError> {
        if beats.is_empty() {
            return Err(MetronomeError::EmptyTrack);
        }
        Ok(Self { beats })
    }

    /// Parse the text form, putting every note on `channel`.
    pub fn parse(text: &str, channel: u8) -> Result<Self, MetronomeError> {
        let beats = text
            .split_whitespace()
            .map(|beat| {
                if beat == "." {
                    return Ok(Vec::new());
                }
                beat.split(',')
                    .map(|n| parse_note(n, channel))
                    .collect::<Result<Beat, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(beats)
    }

    pub fn beats(&self) -> &[Beat] {
        &self.beats
    }

    pub fn len(&self) -> usize {
        self.beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }
}

fn parse_note(text: &str, channel: u8) -> Result<Note, MetronomeError> {
    let bad = || MetronomeError::Note(text.to_string());
    let (note, velocity) = match text.split_once(':') {
        Some((n, v)) => (n, v.parse::<i64>().map_err(|_| bad())?),
        None => (text, i64::from(DEFAULT_VELOCITY)),
    };
    let note = note.parse::<i64>().map_err(|_| bad())?;
    Ok(Note::new(note, velocity, channel.into()))
}

impl Default for Track {
    fn default() -> Self {
        Self {
            beats: vec![vec![Note::new(60, DEFAULT_VELOCITY.into(), 0)]],
        }
    }
}

impl FromStr for Track {
    type Err = MetronomeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, 0)
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, beat) in self.beats.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            if beat.is_empty() {
                f.write_str(".")?;
            }
            for (j, n) in beat.iter().enumerate() {
                if j > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{}:{}", n.note, n.velocity)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Beat clock
// ---------------------------------------------------------------------------

/// Fixed-rate timer thread. At most one callback runs at a time, and none
/// runs after [`stop`](Self::stop) returns.
pub struct BeatClock {
    bpm: f64,
    running: Arc<AtomicBool>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl BeatClock {
    pub fn new(bpm: f64) -> Result<Self, MetronomeError> {
        Ok(Self {
            bpm: check_bpm(bpm)?,
            running: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            handle: None,
        })
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(seconds_per_beat(self.bpm))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Arm the clock. A running clock is stopped first.
    pub fn start<F>(&mut self, mut callback: F) -> Result<(), MetronomeError>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.stop();

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let ticker = crossbeam_channel::tick(self.period());
        let running = self.running.clone();
        running.store(true, Ordering::Release);

        let spawned = thread::Builder::new()
            .name("beat-clock".into())
            .spawn(move || {
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            if !callback() {
                                break;
                            }
                        }
                    }
                }
                running.store(false, Ordering::Release);
            });
        match spawned {
            Ok(handle) => {
                self.stop_tx = Some(stop_tx);
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Disarm the clock and wait for an in-flight tick to finish. Safe to
    /// call any number of times.
    pub fn stop(&mut self) {
        // dropping the sender wakes the thread's select
        drop(self.stop_tx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.running.store(false, Ordering::Release);
    }

    /// Change tempo. Only valid while stopped; see [`Metronome::set_bpm`]
    /// for retuning a running clock.
    fn set_bpm(&mut self, bpm: f64) -> Result<(), MetronomeError> {
        self.bpm = check_bpm(bpm)?;
        Ok(())
    }
}

impl Drop for BeatClock {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Metronome
// ---------------------------------------------------------------------------

pub struct Metronome {
    clock: BeatClock,
    track: Arc<Track>,
    sink: Arc<Mutex<Box<dyn MidiSink>>>,
    position: Arc<AtomicUsize>,
    keep_going: Arc<AtomicBool>,
    sink_failed: Arc<AtomicBool>,
    limit: Option<usize>,
    left: Arc<AtomicUsize>,
}

impl Metronome {
    pub fn new(track: Track, bpm: f64, sink: Box<dyn MidiSink>) -> Result<Self, MetronomeError> {
        Ok(Self {
            clock: BeatClock::new(bpm)?,
            track: Arc::new(track),
            sink: Arc::new(Mutex::new(sink)),
            position: Arc::new(AtomicUsize::new(0)),
            keep_going: Arc::new(AtomicBool::new(false)),
            sink_failed: Arc::new(AtomicBool::new(false)),
            limit: None,
            left: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Stop by itself after `beats` ticks. The count restarts with every
    /// [`start`](Self::start) but carries across [`set_bpm`](Self::set_bpm)
    /// and [`set_track`](Self::set_track). A limit of 0 never starts.
    pub fn with_limit(mut self, beats: usize) -> Self {
        self.limit = Some(beats);
        self
    }

    pub fn bpm(&self) -> f64 {
        self.clock.bpm()
    }

    pub fn is_running(&self) -> bool {
        self.clock.is_running()
    }

    /// Index of the beat the next tick will play.
    pub fn position(&self) -> usize {
        self.position.load(Ordering::Relaxed)
    }

    /// True once a tick has failed to write to the MIDI sink; the clock
    /// stopped itself at that point.
    pub fn sink_failed(&self) -> bool {
        self.sink_failed.load(Ordering::Relaxed)
    }

    pub fn start(&mut self) -> Result<(), MetronomeError> {
        if let Some(beats) = self.limit {
            self.left.store(beats, Ordering::Relaxed);
        }
        self.resume()
    }

    fn resume(&mut self) -> Result<(), MetronomeError> {
        let limited = self.limit.is_some();
        if limited && self.left.load(Ordering::Relaxed) == 0 {
            self.clock.stop();
            return Ok(());
        }
        self.keep_going.store(true, Ordering::Relaxed);
        self.sink_failed.store(false, Ordering::Relaxed);

        let track = self.track.clone();
        let sink = self.sink.clone();
        let position = self.position.clone();
        let keep_going = self.keep_going.clone();
        let sink_failed = self.sink_failed.clone();
        let left = self.left.clone();
        let gate = gate(self.clock.bpm());

        self.clock.start(move || {
            let i = position.load(Ordering::Relaxed) % track.len();
            let beat = &track.beats()[i];
            let Ok(mut sink) = sink.lock() else {
                return false;
            };
            for n in beat {
                if sink.send(&n.on()).is_err() {
                    sink_failed.store(true, Ordering::Relaxed);
                    return false;
                }
            }
            if !beat.is_empty() {
                thread::sleep(gate);
            }
            for n in beat {
                if sink.send(&n.off()).is_err() {
                    sink_failed.store(true, Ordering::Relaxed);
                    return false;
                }
            }
            position.store((i + 1) % track.len(), Ordering::Relaxed);

            if limited && left.fetch_sub(1, Ordering::Relaxed) <= 1 {
                return false;
            }
            keep_going.load(Ordering::Relaxed)
        })
    }

    pub fn stop(&mut self) {
        self.keep_going.store(false, Ordering::Relaxed);
        self.clock.stop();
    }

    pub fn toggle(&mut self) -> Result<bool, MetronomeError> {
        if self.is_running() {
            self.stop();
        } else {
            self.start()?;
        }
        Ok(self.is_running())
    }

    /// Retune. A running metronome is stopped, retuned and restarted without
    /// losing its place in the track.
    pub fn set_bpm(&mut self, bpm: f64) -> Result<(), MetronomeError> {
        check_bpm(bpm)?;
        let was_running = self.is_running();
        self.clock.stop();
        self.clock.set_bpm(bpm)?;
        if was_running {
            self.resume()?;
        }
        Ok(())
    }

    /// Swap the track, restarting from its first beat.
    pub fn set_track(&mut self, track: Track) -> Result<(), MetronomeError> {
        let was_running = self.is_running();
        self.clock.stop();
        self.track = Arc::new(track);
        self.position.store(0, Ordering::Relaxed);
        if was_running {
            self.resume()?;
        }
        Ok(())
    }
}
