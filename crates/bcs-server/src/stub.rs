//! A deterministic in-process interpreter used by the test suites and the
//! demo console. It understands just enough of a command vocabulary to
//! exercise every dispatch, pause and abort path without a real scripting
//! runtime:
//!
//! - `print <arg>` / `print(<arg>)`: render `arg` (namespace lookup, quoted
//!   string or literal) to the terminal writer
//! - `sleep:<millis>`: pausable, interruptible busy period
//! - `wait:<millis>`: uncooperative busy period, stopped only by the hard
//!   interrupt
//! - `fail:<message>`: fails with an execution error
//! - `set:<name>=<value>`: namespace assignment
//! - `input:<name>` (runsource only): read attached stdin into the
//!   namespace and echo it
//!
//! Anything else is recorded in the executed log and otherwise ignored.
//! Lines ending in `\` or `:` are reported as incomplete by `runsource`.

use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bcs_core::{
    Interpreter, InterpreterError, Interrupted, Scannable, TerminalWriter,
};

use crate::worker::check_for_pauses;

#[derive(Default)]
struct StubState {
    writer: Option<Arc<dyn TerminalWriter>>,
    namespace: HashMap<String, String>,
    executed: Vec<String>,
    scannables: Vec<Arc<dyn Scannable>>,
}

#[derive(Default)]
pub struct StubInterpreter {
    state: Mutex<StubState>,
    interrupted: AtomicBool,
}

impl StubInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statements handled by `exec`, `run_script` and `runsource`, in order.
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn is_configured(&self) -> bool {
        self.state.lock().unwrap().writer.is_some()
    }

    /// Adds a scannable to the simulated namespace so the all-stop sweep
    /// has something to find.
    pub fn add_scannable(&self, scannable: Arc<dyn Scannable>) {
        self.state.lock().unwrap().scannables.push(scannable);
    }

    fn writer(&self) -> Result<Arc<dyn TerminalWriter>, InterpreterError> {
        self.state
            .lock()
            .unwrap()
            .writer
            .clone()
            .ok_or(InterpreterError::NotConfigured)
    }

    fn require_configured(&self) -> Result<(), InterpreterError> {
        self.writer().map(|_| ())
    }

    fn clear_interrupt(&self) {
        self.interrupted.store(false, Ordering::SeqCst);
    }

    fn check_hard_interrupt(&self) -> Result<(), InterpreterError> {
        if self.interrupted.load(Ordering::SeqCst) {
            Err(Interrupted.into())
        } else {
            Ok(())
        }
    }

    /// Sleeps in small slices so pause and interrupt requests are honoured
    /// promptly. The uncooperative variant only reacts to the hard
    /// interrupt, which is exactly what makes it useful in tests.
    fn sleep_slices(&self, total: Duration, cooperative: bool) -> Result<(), InterpreterError> {
        let deadline = Instant::now() + total;
        loop {
            if cooperative {
                check_for_pauses()?;
            }
            self.check_hard_interrupt()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep((deadline - now).min(Duration::from_millis(5)));
        }
    }

    /// Statement dispatch without the per-call interrupt reset, shared by
    /// all three execution entry points.
    fn exec_inner(&self, code: &str) -> Result<(), InterpreterError> {
        let code = code.trim();
        if code.is_empty() || code.starts_with('#') {
            return Ok(());
        }
        let writer = self.writer()?;
        self.state.lock().unwrap().executed.push(code.to_string());

        if code == "print" {
            writer.write("\n");
            return Ok(());
        }
        if code.starts_with("print ") || code.starts_with("print(") {
            let rendered = {
                let state = self.state.lock().unwrap();
                print_argument(&code["print".len()..], &state.namespace)
            };
            writer.write(&format!("{rendered}\n"));
            return Ok(());
        }
        if let Some(rest) = code.strip_prefix("sleep:") {
            return self.sleep_slices(parse_millis(rest)?, true);
        }
        if let Some(rest) = code.strip_prefix("wait:") {
            return self.sleep_slices(parse_millis(rest)?, false);
        }
        if let Some(rest) = code.strip_prefix("fail:") {
            return Err(InterpreterError::Execution(rest.trim().to_string()));
        }
        if let Some(rest) = code.strip_prefix("set:") {
            let (name, value) = rest.split_once('=').ok_or_else(|| {
                InterpreterError::Execution(format!("set expects name=value, got '{rest}'"))
            })?;
            self.state
                .lock()
                .unwrap()
                .namespace
                .insert(name.trim().to_string(), value.trim().to_string());
            return Ok(());
        }
        Ok(())
    }
}

impl Interpreter for StubInterpreter {
    fn configure(&self, writer: Arc<dyn TerminalWriter>) -> Result<(), InterpreterError> {
        self.clear_interrupt();
        self.state.lock().unwrap().writer = Some(writer);
        Ok(())
    }

    fn exec(&self, code: &str) -> Result<(), InterpreterError> {
        self.clear_interrupt();
        self.exec_inner(code)
    }

    fn evaluate(&self, expression: &str) -> Result<String, InterpreterError> {
        self.clear_interrupt();
        self.require_configured()?;
        let expr = expression.trim();
        if let Some(rest) = expr.strip_prefix("sleep:") {
            self.sleep_slices(parse_millis(rest)?, true)?;
            return Ok(String::new());
        }
        if let Some(rest) = expr.strip_prefix("fail:") {
            return Err(InterpreterError::Execution(rest.trim().to_string()));
        }
        if let Some(sum) = arithmetic(expr) {
            return Ok(sum);
        }
        if expr.parse::<i64>().is_ok() {
            return Ok(expr.to_string());
        }
        if let Some(inner) = quoted(expr) {
            return Ok(inner.to_string());
        }
        let state = self.state.lock().unwrap();
        state
            .namespace
            .get(expr)
            .cloned()
            .ok_or_else(|| InterpreterError::NameError(expr.to_string()))
    }

    fn run_script(&self, source: &str) -> Result<(), InterpreterError> {
        self.clear_interrupt();
        self.require_configured()?;
        for line in source.lines() {
            check_for_pauses()?;
            self.check_hard_interrupt()?;
            self.exec_inner(line)?;
        }
        Ok(())
    }

    fn runsource(
        &self,
        code: &str,
        stdin: Option<Box<dyn Read + Send>>,
    ) -> Result<bool, InterpreterError> {
        self.clear_interrupt();
        self.require_configured()?;
        let trimmed = code.trim_end();
        if trimmed.ends_with('\\') || trimmed.ends_with(':') {
            return Ok(false);
        }
        if let Some(name) = trimmed.trim().strip_prefix("input:") {
            let mut stream = stdin.ok_or_else(|| {
                InterpreterError::Execution("no input stream attached".to_string())
            })?;
            let mut buffer = String::new();
            stream
                .read_to_string(&mut buffer)
                .map_err(|err| InterpreterError::Execution(err.to_string()))?;
            let value = buffer.trim_end_matches('\n').to_string();
            self.state
                .lock()
                .unwrap()
                .namespace
                .insert(name.trim().to_string(), value.clone());
            self.writer()?.write(&format!("{value}\n"));
            return Ok(true);
        }
        self.exec_inner(trimmed)?;
        Ok(true)
    }

    fn interrupt(&self) {
        tracing::debug!("stub interpreter interrupt requested");
        self.interrupted.store(true, Ordering::SeqCst);
    }

    fn set_variable(&self, name: &str, value: &str) -> Result<(), InterpreterError> {
        self.require_configured()?;
        self.state
            .lock()
            .unwrap()
            .namespace
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn variable(&self, name: &str) -> Result<Option<String>, InterpreterError> {
        self.require_configured()?;
        Ok(self.state.lock().unwrap().namespace.get(name).cloned())
    }

    fn scannables(&self) -> Vec<Arc<dyn Scannable>> {
        self.state.lock().unwrap().scannables.clone()
    }

    fn teardown(&self) -> Result<(), InterpreterError> {
        let mut state = self.state.lock().unwrap();
        state.writer = None;
        state.namespace.clear();
        state.executed.clear();
        state.scannables.clear();
        drop(state);
        self.clear_interrupt();
        Ok(())
    }
}

fn parse_millis(text: &str) -> Result<Duration, InterpreterError> {
    text.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| InterpreterError::Execution(format!("invalid duration '{}'", text.trim())))
}

fn arithmetic(expr: &str) -> Option<String> {
    let (lhs, rhs) = expr.split_once('+')?;
    let lhs: i64 = lhs.trim().parse().ok()?;
    let rhs: i64 = rhs.trim().parse().ok()?;
    Some((lhs + rhs).to_string())
}

fn quoted(expr: &str) -> Option<&str> {
    for quote in ['\'', '"'] {
        if expr.len() >= 2 && expr.starts_with(quote) && expr.ends_with(quote) {
            return Some(&expr[1..expr.len() - 1]);
        }
    }
    None
}

fn print_argument(arg: &str, namespace: &HashMap<String, String>) -> String {
    let mut text = arg.trim();
    if text.len() >= 2 && text.starts_with('(') && text.ends_with(')') {
        text = text[1..text.len() - 1].trim();
    }
    if let Some(inner) = quoted(text) {
        return inner.to_string();
    }
    namespace
        .get(text)
        .cloned()
        .unwrap_or_else(|| text.to_string())
}
