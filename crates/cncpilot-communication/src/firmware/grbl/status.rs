//! GRBL status report parsing.
//!
//! A report is `<Status|Key:value|...>`. Parsing is applied onto the
//! previous snapshot: `WCO` is only reported intermittently and must be
//! carried across reports, while pins are rebuilt every time. Whichever
//! of `MPos`/`WPos` appears is authoritative; the other side is derived
//! through `WPos = MPos - WCO`.

use super::super::{AccessoryState, ControllerStatus, OverrideState, PinState};
use cncpilot_core::{Error, Position, Result};

impl ControllerStatus {
    /// Parse one status report onto this snapshot. On error the snapshot
    /// may be partially updated; callers should discard it.
    pub fn parse(&mut self, data: &str) -> Result<()> {
        let data = data
            .trim()
            .trim_start_matches('<')
            .trim_end_matches('>');
        let mut segments = data.split('|');
        self.status = segments.next().unwrap_or_default().to_string();
        self.pins = PinState::default();

        let mut mpos_authoritative = false;
        for segment in segments {
            let (key, value) = segment.split_once(':').unwrap_or((segment, ""));
            match key {
                "MPos" => {
                    self.mpos = parse_position(key, value)?;
                    mpos_authoritative = true;
                    self.wpos = self.mpos - self.wco;
                }
                "WPos" => {
                    self.wpos = parse_position(key, value)?;
                    self.mpos = self.wpos + self.wco;
                }
                "WCO" => {
                    self.wco = parse_position(key, value)?;
                    if mpos_authoritative {
                        self.wpos = self.mpos - self.wco;
                    } else {
                        self.mpos = self.wpos + self.wco;
                    }
                }
                "F" => {
                    let [feed] = parse_floats(key, value)?;
                    self.feed = feed;
                }
                "FS" => {
                    let [feed, spindle] = parse_floats(key, value)?;
                    self.feed = feed;
                    self.spindle = spindle;
                }
                "Pn" => self.pins = PinState::from_flags(value),
                "Ov" => {
                    let [feed, rapid, spindle] = parse_floats(key, value)?;
                    self.overrides = OverrideState {
                        feed,
                        rapid,
                        spindle,
                    };
                }
                "A" => self.accessory = AccessoryState::from_flags(value),
                _ => {}
            }
        }
        Ok(())
    }
}

fn parse_floats<const N: usize>(key: &str, value: &str) -> Result<[f64; N]> {
    let mut out = [0.0; N];
    let mut fields = value.split(',');
    for slot in &mut out {
        *slot = fields
            .next()
            .and_then(|field| field.trim().parse().ok())
            .ok_or_else(|| Error::ProtocolDecode(format!("parse {key} '{value}'")))?;
    }
    Ok(out)
}

fn parse_position(key: &str, value: &str) -> Result<Position> {
    let [x, y, z] = parse_floats(key, value)?;
    Ok(Position::new(x, y, z))
}

impl PinState {
    fn from_flags(flags: &str) -> Self {
        Self {
            x: flags.contains('X'),
            y: flags.contains('Y'),
            z: flags.contains('Z'),
            probe: flags.contains('P'),
            door: flags.contains('D'),
            hold: flags.contains('H'),
            reset: flags.contains('R'),
            start: flags.contains('S'),
        }
    }
}

impl AccessoryState {
    fn from_flags(flags: &str) -> Self {
        Self {
            spindle_on: flags.contains(['S', 'C']),
            spindle_ccw: flags.contains('C'),
            flood: flags.contains('F'),
            mist: flags.contains('M'),
        }
    }
}
