//! GRBL driver: controller operations as GRBL byte sequences, and status
//! report handling.

pub mod status;

use super::{ControllerStatus, Driver};
use async_trait::async_trait;
use cncpilot_core::Result;
use tokio::sync::watch;

/// GRBL speaks at a fixed rate.
pub const GRBL_BAUD_RATE: u32 = 115200;
/// SPJS flow-control mode with serial-buffer-aware pacing for GRBL.
pub const GRBL_BUFFER_ALGORITHM: &str = "grbl";

/// Driver for a GRBL motion controller.
pub struct GrblDriver {
    status_tx: watch::Sender<ControllerStatus>,
}

impl GrblDriver {
    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(ControllerStatus::default());
        Self { status_tx }
    }

    /// The most recently parsed status snapshot.
    pub fn last_status(&self) -> ControllerStatus {
        self.status_tx.borrow().clone()
    }
}

impl Default for GrblDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for GrblDriver {
    fn name(&self) -> &str {
        "GRBL"
    }

    fn buffer_algorithm(&self) -> &str {
        GRBL_BUFFER_ALGORITHM
    }

    fn baud_rate(&self) -> u32 {
        GRBL_BAUD_RATE
    }

    /// Parse status reports (`<...>`); everything else GRBL prints (ok,
    /// error:N, welcome banner) is handled by SPJS's buffer algorithm.
    async fn handle_data(&self, data: &str) -> Result<()> {
        if !data.starts_with('<') {
            return Ok(());
        }
        let mut next = self.status_tx.borrow().clone();
        next.parse(data)?;
        self.status_tx.send_replace(next);
        Ok(())
    }

    fn wrap_gcode(&self, lines: &[String]) -> Option<String> {
        let mut payload = lines.join("\n");
        payload.push('\n');
        Some(payload)
    }

    fn home_command(&self) -> Option<String> {
        Some("$H\n".into())
    }

    fn feed_hold_command(&self) -> Option<String> {
        Some("!".into())
    }

    fn cycle_start_command(&self) -> Option<String> {
        Some("~".into())
    }

    fn reset_command(&self) -> Option<String> {
        Some("\x18".into())
    }

    fn estop_command(&self) -> Option<String> {
        Some("\x18".into())
    }

    fn jog_command(&self, axis: char, mm: f64) -> Option<String> {
        Some(format!("$J=G21G91F10000{}{}\n", axis, format_mm(mm)))
    }

    fn wpos_command(&self, axis: char, mm: f64) -> Option<String> {
        Some(format!("G10L20P1{}{}\n?", axis, format_mm(mm)))
    }

    fn status_stream(&self) -> Option<watch::Receiver<ControllerStatus>> {
        Some(self.status_tx.subscribe())
    }
}

/// Format a distance to four significant digits, trailing zeros trimmed.
fn format_mm(mm: f64) -> String {
    if mm == 0.0 || !mm.is_finite() {
        return "0".to_string();
    }
    let exponent = mm.abs().log10().floor() as i32;
    let decimals = (3 - exponent).max(0) as usize;
    let formatted = format!("{:.*}", decimals, mm);
    if formatted.contains('.') {
        formatted
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    } else {
        formatted
    }
}
