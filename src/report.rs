//! Status reporting.
//!
//! The link loops describe what happened as [`LinkEvent`]s and hand them to a
//! [`StatusReporter`]. Two reporters are provided:
//!
//! - [`LogReporter`]: one log line per event, in the format of the serial
//!   console output
//! - [`DisplayReporter`]: redraws a small text screen on any
//!   [`StatusDisplay`] (the SSD1306 OLED on hardware)
//!
//! Reporting is fire-and-forget; a reporter never feeds anything back into
//! the link.

use crate::link::Role;
use crate::lora::{Packet, RadioConfig, Setting};
use log::{log, Level};
use std::time::Duration;

/// Characters of payload that fit on one display line.
pub const DISPLAY_PAYLOAD_CHARS: usize = 20;

/// Something that happened on the link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Startup began.
    Initializing { role: Role, banner: String },
    /// One radio setting was rejected; configuration continued.
    SettingRejected { setting: Setting, error: String },
    /// Radio initialized and configured.
    Ready { role: Role, config: RadioConfig },
    /// Startup failed; the node halts.
    Fatal { code: i16, message: String },
    /// Continuous receive armed for the first time.
    Listening,
    /// About to transmit.
    Sending { payload: String },
    /// Transmit completed.
    Sent { payload: String, airtime: Duration },
    /// Transmit failed; the payload is not retried.
    SendFailed { payload: String, error: String },
    /// Packet drained with its quality metrics.
    Received(Packet),
    /// Packet failed its CRC check.
    CrcMismatch,
    /// Drain failed for any other reason.
    ReceiveFailed { error: String },
    /// Re-arming receive failed; retried on the next iteration.
    RearmFailed { error: String },
}

impl LinkEvent {
    /// Severity used when logging this event.
    pub fn severity(&self) -> Level {
        match self {
            Self::Fatal { .. }
            | Self::SendFailed { .. }
            | Self::ReceiveFailed { .. }
            | Self::RearmFailed { .. } => Level::Error,
            Self::SettingRejected { .. } | Self::CrcMismatch => Level::Warn,
            _ => Level::Info,
        }
    }
}

/// Consumer of link status.
pub trait StatusReporter {
    fn report(&mut self, event: &LinkEvent);
}

/// Records events in memory.
impl StatusReporter for Vec<LinkEvent> {
    fn report(&mut self, event: &LinkEvent) {
        self.push(event.clone());
    }
}

/// Reports to both reporters, first then second.
impl<A: StatusReporter, B: StatusReporter> StatusReporter for (A, B) {
    fn report(&mut self, event: &LinkEvent) {
        self.0.report(event);
        self.1.report(event);
    }
}

/// Optional reporter, e.g. a display that failed to come up.
impl<R: StatusReporter> StatusReporter for Option<R> {
    fn report(&mut self, event: &LinkEvent) {
        if let Some(reporter) = self {
            reporter.report(event);
        }
    }
}

/// Writes each event to the `log` facade.
#[derive(Debug, Default)]
pub struct LogReporter {
    label: Option<&'static str>,
}

impl LogReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix every line with `label` (useful when several nodes share a log).
    pub fn with_label(label: &'static str) -> Self {
        Self { label: Some(label) }
    }

    fn prefix(&self) -> String {
        match self.label {
            Some(label) => format!("[{}] ", label),
            None => String::new(),
        }
    }
}

impl StatusReporter for LogReporter {
    fn report(&mut self, event: &LinkEvent) {
        let p = self.prefix();
        let level = event.severity();
        match event {
            LinkEvent::Initializing { role, banner } => log!(
                level,
                "{}{} ({}) - [SX1262] Initializing ...",
                p,
                banner,
                role
            ),
            LinkEvent::SettingRejected { setting, error } => {
                log!(level, "{}[SX1262] {} rejected: {}", p, setting, error)
            }
            LinkEvent::Ready { role, config } => {
                log!(level, "{}[SX1262] {} initialized: {}", p, role, config)
            }
            LinkEvent::Fatal { code, message } => {
                log!(level, "{}[SX1262] failed, code {} ({})", p, code, message)
            }
            LinkEvent::Listening => log!(level, "{}[SX1262] Listening for packets", p),
            LinkEvent::Sending { payload } => log!(
                level,
                "{}sending packet \"{}\", length {}",
                p,
                payload,
                payload.len()
            ),
            LinkEvent::Sent { airtime, .. } => log!(
                level,
                "{}TX done ({:.1} ms on air)",
                p,
                airtime.as_secs_f64() * 1000.0
            ),
            LinkEvent::SendFailed { error, .. } => log!(level, "{}TX failed: {}", p, error),
            LinkEvent::Received(packet) => {
                log!(level, "{}[SX1262] Received packet!", p);
                log!(level, "{}[SX1262] Data:\t\t{}", p, packet.text());
                if let Some(rssi) = packet.rssi_dbm {
                    log!(level, "{}[SX1262] RSSI:\t\t{} dBm", p, rssi);
                }
                if let Some(snr) = packet.snr_db {
                    log!(level, "{}[SX1262] SNR:\t\t{} dB", p, snr);
                }
            }
            LinkEvent::CrcMismatch => log!(level, "{}[SX1262] CRC error!", p),
            LinkEvent::ReceiveFailed { error } => {
                log!(level, "{}[SX1262] receive failed: {}", p, error)
            }
            LinkEvent::RearmFailed { error } => {
                log!(level, "{}[SX1262] re-arming receive failed: {}", p, error)
            }
        }
    }
}

/// Minimal text display surface.
///
/// Drawing is buffered until [`flush`](StatusDisplay::flush). Implementations
/// swallow their own I/O errors.
pub trait StatusDisplay {
    /// Clear the buffer.
    fn clear(&mut self);
    /// Draw `text` with its top-left corner at (`x`, `y`).
    fn draw_text(&mut self, x: i32, y: i32, text: &str);
    /// Push the buffer to the panel.
    fn flush(&mut self);
}

/// Renders link events as status screens.
pub struct DisplayReporter<D> {
    display: D,
}

impl<D: StatusDisplay> DisplayReporter<D> {
    pub fn new(display: D) -> Self {
        Self { display }
    }

    /// The wrapped display.
    pub fn display(&self) -> &D {
        &self.display
    }

    fn screen(&mut self, lines: &[(i32, &str)]) {
        self.display.clear();
        for (y, text) in lines {
            self.display.draw_text(0, *y, text);
        }
        self.display.flush();
    }

    /// Add a line below the current screen without clearing it.
    fn append(&mut self, y: i32, text: &str) {
        self.display.draw_text(0, y, text);
        self.display.flush();
    }
}

impl<D: StatusDisplay> StatusReporter for DisplayReporter<D> {
    fn report(&mut self, event: &LinkEvent) {
        match event {
            LinkEvent::Initializing { banner, .. } => {
                self.screen(&[(0, banner.as_str()), (20, "Initializing...")])
            }
            LinkEvent::Ready { role, .. } => {
                let title = format!("LoRa {} Ready", role.tag());
                self.screen(&[(0, title.as_str())]);
            }
            LinkEvent::Fatal { code, .. } => {
                let code = format!("Code: {}", code);
                self.screen(&[(0, "Radio FAIL"), (20, code.as_str())]);
            }
            LinkEvent::Sending { payload } => {
                self.screen(&[(0, "Transmitting:"), (16, payload.as_str())])
            }
            LinkEvent::Sent { .. } => self.append(32, "TX Success!"),
            LinkEvent::SendFailed { error, .. } => {
                let line = format!("TX FAIL: {}", error);
                self.append(32, &line);
            }
            LinkEvent::Received(packet) => {
                let text: String = packet.text().chars().take(DISPLAY_PAYLOAD_CHARS).collect();
                let rssi = format!("RSSI: {} dBm", packet.rssi_dbm.unwrap_or_default());
                let snr = format!("SNR: {} dB", packet.snr_db.unwrap_or_default());
                self.screen(&[
                    (0, "Received:"),
                    (12, text.as_str()),
                    (24, rssi.as_str()),
                    (36, snr.as_str()),
                ]);
            }
            // Logged only; the last screen stays up.
            LinkEvent::SettingRejected { .. }
            | LinkEvent::Listening
            | LinkEvent::CrcMismatch
            | LinkEvent::ReceiveFailed { .. }
            | LinkEvent::RearmFailed { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Clear,
        Text(i32, i32, String),
        Flush,
    }

    #[derive(Default)]
    struct RecordingDisplay {
        ops: Vec<Op>,
    }

    impl StatusDisplay for RecordingDisplay {
        fn clear(&mut self) {
            self.ops.push(Op::Clear);
        }
        fn draw_text(&mut self, x: i32, y: i32, text: &str) {
            self.ops.push(Op::Text(x, y, text.to_string()));
        }
        fn flush(&mut self) {
            self.ops.push(Op::Flush);
        }
    }

    fn text(y: i32, s: &str) -> Op {
        Op::Text(0, y, s.to_string())
    }

    #[test]
    fn test_received_screen() {
        let mut reporter = DisplayReporter::new(RecordingDisplay::default());
        reporter.report(&LinkEvent::Received(Packet::received(
            b"Hello world 0.01".to_vec(),
            -42,
            9,
        )));
        assert_eq!(
            reporter.display().ops,
            vec![
                Op::Clear,
                text(0, "Received:"),
                text(12, "Hello world 0.01"),
                text(24, "RSSI: -42 dBm"),
                text(36, "SNR: 9 dB"),
                Op::Flush,
            ]
        );
    }

    #[test]
    fn test_received_payload_truncated_to_line() {
        let mut reporter = DisplayReporter::new(RecordingDisplay::default());
        reporter.report(&LinkEvent::Received(Packet::received(
            b"0123456789abcdefghijKLMNOP".to_vec(),
            -80,
            -3,
        )));
        assert!(reporter
            .display()
            .ops
            .contains(&text(12, "0123456789abcdefghij")));
    }

    #[test]
    fn test_transmit_screens() {
        let mut reporter = DisplayReporter::new(RecordingDisplay::default());
        reporter.report(&LinkEvent::Sending {
            payload: "Hello world 0.02".into(),
        });
        reporter.report(&LinkEvent::SendFailed {
            payload: "Hello world 0.02".into(),
            error: "radio timeout".into(),
        });
        assert_eq!(
            reporter.display().ops,
            vec![
                Op::Clear,
                text(0, "Transmitting:"),
                text(16, "Hello world 0.02"),
                Op::Flush,
                text(32, "TX FAIL: radio timeout"),
                Op::Flush,
            ]
        );
    }

    #[test]
    fn test_failure_screen_shows_code() {
        let mut reporter = DisplayReporter::new(RecordingDisplay::default());
        reporter.report(&LinkEvent::Fatal {
            code: -2,
            message: "chip not found".into(),
        });
        assert_eq!(
            reporter.display().ops,
            vec![
                Op::Clear,
                text(0, "Radio FAIL"),
                text(20, "Code: -2"),
                Op::Flush
            ]
        );
    }

    #[test]
    fn test_crc_mismatch_leaves_screen() {
        let mut reporter = DisplayReporter::new(RecordingDisplay::default());
        reporter.report(&LinkEvent::CrcMismatch);
        assert!(reporter.display().ops.is_empty());
    }

    #[test]
    fn test_severity() {
        assert_eq!(LinkEvent::CrcMismatch.severity(), Level::Warn);
        assert_eq!(
            LinkEvent::ReceiveFailed {
                error: "code -1".into()
            }
            .severity(),
            Level::Error
        );
        assert_eq!(LinkEvent::Listening.severity(), Level::Info);
    }

    struct CaptureLog(Mutex<Vec<(Level, String)>>);

    impl log::Log for CaptureLog {
        fn enabled(&self, _: &log::Metadata) -> bool {
            true
        }
        fn log(&self, record: &log::Record) {
            self.0
                .lock()
                .unwrap()
                .push((record.level(), record.args().to_string()));
        }
        fn flush(&self) {}
    }

    static CAPTURE: CaptureLog = CaptureLog(Mutex::new(Vec::new()));

    #[test]
    fn test_log_lines_use_event_severity() {
        log::set_logger(&CAPTURE).unwrap();
        log::set_max_level(log::LevelFilter::Trace);

        let events = [
            LinkEvent::Listening,
            LinkEvent::CrcMismatch,
            LinkEvent::ReceiveFailed {
                error: "code -1".into(),
            },
            LinkEvent::Received(Packet::received(b"hi".to_vec(), -42, 9)),
        ];
        let mut reporter = LogReporter::with_label("severity");
        for event in &events {
            reporter.report(event);
        }

        let lines: Vec<(Level, String)> = CAPTURE
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, line)| line.starts_with("[severity] "))
            .cloned()
            .collect();
        assert_eq!(lines.len(), 7);
        assert_eq!(lines[0].0, Level::Info);
        assert_eq!(
            lines[1],
            (Level::Warn, "[severity] [SX1262] CRC error!".to_string())
        );
        assert_eq!(
            lines[2],
            (
                Level::Error,
                "[severity] [SX1262] receive failed: code -1".to_string()
            )
        );
        assert!(lines[3..].iter().all(|(level, _)| *level == Level::Info));
    }

    #[test]
    fn test_missing_reporter_is_skipped() {
        let mut absent: Option<Vec<LinkEvent>> = None;
        absent.report(&LinkEvent::Listening);
        assert!(absent.is_none());

        let mut present = Some(Vec::new());
        present.report(&LinkEvent::CrcMismatch);
        assert_eq!(present, Some(vec![LinkEvent::CrcMismatch]));
    }

    #[test]
    fn test_pair_reports_to_both() {
        let mut pair: (Vec<LinkEvent>, Vec<LinkEvent>) = (Vec::new(), Vec::new());
        pair.report(&LinkEvent::Listening);
        assert_eq!(pair.0, vec![LinkEvent::Listening]);
        assert_eq!(pair.1, vec![LinkEvent::Listening]);
    }
}
