use anyhow::anyhow;
use midir::{MidiOutput, MidiOutputConnection};

/// Where the metronome writes its raw 3-byte messages.
pub trait MidiSink: Send {
    fn send(&mut self, message: &[u8; 3]) -> anyhow::Result<()>;
}

pub fn note_on(channel: u8, note: u8, velocity: u8) -> [u8; 3] {
    [0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
}

pub fn note_off(channel: u8, note: u8) -> [u8; 3] {
    [0x80 | (channel & 0x0F), note & 0x7F, 0]
}

/// A named MIDI output other programs (the synth, via the audio server) can
/// connect to.
pub struct VirtualPort {
    name: String,
    conn: MidiOutputConnection,
}

impl VirtualPort {
    /// Create the port. Where virtual ports aren't supported, fall back to
    /// the first existing output whose name contains `port`.
    pub fn open(client: &str, port: &str) -> anyhow::Result<Self> {
        let out = MidiOutput::new(client)?;
        let conn = open_output(out, port)?;
        log::info!("Opened MIDI output {client}:{port}");
        Ok(Self {
            name: format!("{client}:{port}"),
            conn,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(unix)]
fn open_output(out: MidiOutput, port: &str) -> anyhow::Result<MidiOutputConnection> {
    use midir::os::unix::VirtualOutput;
    out.create_virtual(port)
        .map_err(|e| anyhow!("create virtual port {port}: {e}"))
}

#[cfg(not(unix))]
fn open_output(out: MidiOutput, port: &str) -> anyhow::Result<MidiOutputConnection> {
    let target = out
        .ports()
        .into_iter()
        .find(|p| out.port_name(p).map(|n| n.contains(port)).unwrap_or(false))
        .ok_or_else(|| anyhow!("no MIDI output matching '{port}'"))?;
    out.connect(&target, port)
        .map_err(|e| anyhow!("connect {port}: {e}"))
}

impl MidiSink for VirtualPort {
    fn send(&mut self, message: &[u8; 3]) -> anyhow::Result<()> {
        self.conn
            .send(message)
            .map_err(|e| anyhow!("send to {}: {e}", self.name))
    }
}

/// Names of the MIDI outputs currently visible.
pub fn output_names() -> anyhow::Result<Vec<String>> {
    let out = MidiOutput::new("fluidterm-enumerate")?;
    Ok(out
        .ports()
        .iter()
        .map(|p| out.port_name(p).unwrap_or_else(|_| "Unknown".into()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_bytes_carry_the_channel() {
        assert_eq!(note_on(0, 60, 112), [0x90, 60, 112]);
        assert_eq!(note_on(9, 36, 100), [0x99, 36, 100]);
        assert_eq!(note_off(15, 60), [0x8F, 60, 0]);
    }

    #[test]
    fn data_bytes_stay_seven_bit() {
        assert_eq!(note_on(0, 200, 255), [0x90, 200 & 0x7F, 0x7F]);
    }
}
