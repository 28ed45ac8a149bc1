//! TAP (Test Anything Protocol) harness for on-device tests.
//!
//! Host builds use `cargo test`. On the board there is no test harness, so
//! link tests that should also run on real silicon are registered with
//! `#[tap_test]` and executed by the `device-tests` binary, which prints TAP
//! over the serial console.
//!
//! Only compiled with the `tap-tests` feature, so none of this reaches a
//! production image.
//!
//! # Usage
//!
//! ```ignore
//! #[cfg(feature = "tap-tests")]
//! mod tap_tests {
//!     use super::*;
//!     use lora_link_esp32_macros::tap_test;
//!
//!     #[tap_test]
//!     fn default_config_is_valid() {
//!         assert!(RadioConfig::default().validate().is_ok());
//!     }
//!
//!     #[tap_test]
//!     fn payload_fits() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!         let max: usize = "30".parse()?;
//!         assert!(max <= RADIO_BUFFER_BYTES);
//!         Ok(())
//!     }
//! }
//! ```
//!
//! ```ignore
//! // src/bin/device-tests.rs
//! let success = lora_link_esp32::testing::run_all_tests();
//! ```

use std::fmt;
use std::io::{self, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};

// Re-export inventory for use by the proc-macro
pub use inventory;

/// Result type for test functions.
pub type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Type alias for test registration functions.
pub type TestRegisterFn = fn(&mut TestRunner);

/// A `#[tap_test]` function, collected via inventory.
pub struct TapTestEntry {
    pub name: &'static str,
    pub register: TestRegisterFn,
}

impl TapTestEntry {
    pub const fn new(name: &'static str, register: TestRegisterFn) -> Self {
        Self { name, register }
    }
}

inventory::collect!(TapTestEntry);

/// Number of registered tests.
pub fn test_count() -> usize {
    inventory::iter::<TapTestEntry>.into_iter().count()
}

/// Run every registered test. Returns true if all passed.
pub fn run_all_tests() -> bool {
    run_matching(None)
}

/// Run the registered tests whose name contains `filter` (all if `None`).
pub fn run_matching(filter: Option<&str>) -> bool {
    let selected: Vec<&TapTestEntry> = inventory::iter::<TapTestEntry>
        .into_iter()
        .filter(|entry| filter.map_or(true, |f| entry.name.contains(f)))
        .collect();

    let mut runner = TestRunner::new();
    runner.print_header(selected.len());
    if let Some(f) = filter {
        runner.comment(&format!("filter: {}", f));
    }
    for entry in selected {
        (entry.register)(&mut runner);
    }
    runner.finish()
}

/// How a single test ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed(String),
    /// Not run; TAP `# SKIP` with the reason.
    Skipped(String),
}

/// Runs tests and writes TAP lines as they complete.
///
/// Output goes to stdout unless another sink is given with
/// [`with_output`](TestRunner::with_output).
pub struct TestRunner {
    outcomes: Vec<Outcome>,
    out: Box<dyn Write>,
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::with_output(io::stdout())
    }
}

impl fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestRunner")
            .field("outcomes", &self.outcomes)
            .finish_non_exhaustive()
    }
}

/// Extract a human-readable message from panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl TestRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner writing its TAP lines to `out`.
    pub fn with_output(out: impl Write + 'static) -> Self {
        Self {
            outcomes: Vec::new(),
            out: Box::new(out),
        }
    }

    /// Runner that only records outcomes, for runners nested inside a test.
    pub fn quiet() -> Self {
        Self::with_output(io::sink())
    }

    fn line(&mut self, args: fmt::Arguments<'_>) {
        // A lost console line must not abort the run.
        let _ = writeln!(self.out, "{}", args);
    }

    fn record(&mut self, name: &str, outcome: Outcome) {
        let number = self.outcomes.len() + 1;
        match &outcome {
            Outcome::Passed => self.line(format_args!("ok {} - {}", number, name)),
            Outcome::Failed(reason) => {
                self.line(format_args!("not ok {} - {}", number, name));
                self.line(format_args!("# {}", reason));
            }
            Outcome::Skipped(reason) if reason.is_empty() => {
                self.line(format_args!("ok {} - {} # SKIP", number, name))
            }
            Outcome::Skipped(reason) => {
                self.line(format_args!("ok {} - {} # SKIP {}", number, name, reason))
            }
        }
        self.outcomes.push(outcome);
    }

    /// Run a test returning [`TestResult`]. Panics count as failures.
    pub fn run<F>(&mut self, name: &str, test_fn: F)
    where
        F: FnOnce() -> TestResult + std::panic::UnwindSafe,
    {
        let outcome = match catch_unwind(AssertUnwindSafe(test_fn)) {
            Ok(Ok(())) => Outcome::Passed,
            Ok(Err(e)) => Outcome::Failed(format!("Error: {}", e)),
            Err(payload) => Outcome::Failed(format!("Panic: {}", panic_message(payload.as_ref()))),
        };
        self.record(name, outcome);
    }

    /// Run a test that signals failure by panicking.
    pub fn run_assert<F>(&mut self, name: &str, test_fn: F)
    where
        F: FnOnce() + std::panic::UnwindSafe,
    {
        self.run(name, || {
            test_fn();
            Ok(())
        });
    }

    /// Run a test that must panic, optionally with a message containing
    /// `expected`.
    pub fn run_should_panic<F>(&mut self, name: &str, test_fn: F, expected: Option<&str>)
    where
        F: FnOnce() + std::panic::UnwindSafe,
    {
        let outcome = match catch_unwind(AssertUnwindSafe(test_fn)) {
            Ok(()) => Outcome::Failed("Expected panic but test completed normally".to_string()),
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                match expected {
                    Some(want) if !msg.contains(want) => Outcome::Failed(format!(
                        "Expected panic containing '{}', got '{}'",
                        want, msg
                    )),
                    _ => Outcome::Passed,
                }
            }
        };
        self.record(name, outcome);
    }

    /// Record a test as skipped without running it.
    pub fn skip(&mut self, name: &str, reason: &str) {
        self.record(name, Outcome::Skipped(reason.to_string()));
    }

    /// Print the TAP header. Call this before running tests.
    pub fn print_header(&mut self, planned_tests: usize) {
        self.line(format_args!("TAP version 14"));
        self.line(format_args!("1..{}", planned_tests));
    }

    /// Print a diagnostic comment.
    pub fn comment(&mut self, msg: &str) {
        self.line(format_args!("# {}", msg));
    }

    /// Print the summary. Returns true if every test passed.
    pub fn finish(&mut self) -> bool {
        let (run, passed, failed, skipped) = (
            self.tests_run(),
            self.tests_passed(),
            self.tests_failed(),
            self.tests_skipped(),
        );
        self.line(format_args!("# Tests run: {}", run));
        self.line(format_args!("# Passed: {}", passed));
        self.line(format_args!("# Failed: {}", failed));
        self.line(format_args!("# Skipped: {}", skipped));
        let ok = failed == 0;
        self.line(format_args!("# Result: {}", if ok { "PASS" } else { "FAIL" }));
        let _ = self.out.flush();
        ok
    }

    pub fn tests_run(&self) -> usize {
        self.outcomes.len()
    }

    pub fn tests_passed(&self) -> usize {
        self.count(|o| *o == Outcome::Passed)
    }

    pub fn tests_failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    pub fn tests_skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped(_)))
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }

    /// Outcomes in the order the tests ran.
    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }
}

// The harness tests itself through its own macro. Nested runners are quiet
// or write to a buffer so their lines stay out of the outer TAP stream.
mod tap_tests {
    use super::*;
    use lora_link_esp32_macros::tap_test;
    use std::sync::{Arc, Mutex};

    /// Cloneable in-memory sink.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tap_test]
    fn runner_tracks_pass_and_fail() {
        let mut runner = TestRunner::quiet();
        runner.run("pass", || Ok(()));
        runner.run("fail", || Err("radio timeout".into()));
        assert_eq!(runner.tests_run(), 2);
        assert_eq!(runner.tests_passed(), 1);
        assert_eq!(
            runner.outcomes()[1],
            Outcome::Failed("Error: radio timeout".to_string())
        );
    }

    #[tap_test]
    fn runner_catches_panic() {
        let mut runner = TestRunner::quiet();
        runner.run_assert("panicking", || panic!("intentional panic"));
        assert_eq!(
            runner.outcomes(),
            &[Outcome::Failed("Panic: intentional panic".to_string())]
        );
    }

    #[tap_test]
    fn runner_checks_expected_panic_message() {
        let mut runner = TestRunner::quiet();
        runner.run_should_panic("right", || panic!("CRC mismatch"), Some("CRC"));
        runner.run_should_panic("wrong", || panic!("timeout"), Some("CRC"));
        runner.run_should_panic("none", || {}, None);
        assert_eq!(runner.tests_passed(), 1);
        assert_eq!(runner.tests_failed(), 2);
    }

    #[tap_test]
    fn skipped_tests_do_not_fail_the_run() {
        let mut runner = TestRunner::quiet();
        runner.run("pass", || Ok(()));
        runner.skip("needs hardware", "no second board");
        assert_eq!(runner.tests_run(), 2);
        assert_eq!(runner.tests_skipped(), 1);
        assert_eq!(runner.tests_failed(), 0);
        assert!(runner.finish());
    }

    #[tap_test]
    fn runner_writes_tap_to_its_own_output() {
        let sink = Captured::default();
        let mut runner = TestRunner::with_output(sink.clone());
        runner.print_header(3);
        runner.run("pass", || Ok(()));
        runner.run("fail", || Err("radio timeout".into()));
        runner.skip("later", "");
        assert!(!runner.finish());

        let text = sink.text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            &lines[..6],
            &[
                "TAP version 14",
                "1..3",
                "ok 1 - pass",
                "not ok 2 - fail",
                "# Error: radio timeout",
                "ok 3 - later # SKIP",
            ]
        );
        assert_eq!(lines.last(), Some(&"# Result: FAIL"));
    }
}
