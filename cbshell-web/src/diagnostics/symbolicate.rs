use std::future::Future;

use thiserror::Error;

use super::{CapturedError, StackFrame};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolicationError {
    #[error("error carries no stack")]
    MissingStack,
    #[error("no stack frame could be resolved")]
    NoFrames,
    #[error("stack parser panicked")]
    Panicked,
}

/// Resolves a caught error's stack into frames.
pub trait Symbolicator {
    fn symbolicate(
        &self,
        error: &CapturedError,
    ) -> impl Future<Output = Result<Vec<StackFrame>, SymbolicationError>>;
}

/// Reads frames straight out of the stack text. `origin` (e.g.
/// `https://host:8080`) is stripped from file names.
#[derive(Debug, Clone, Default)]
pub struct StackTraceSymbolicator {
    origin: Option<String>,
}

impl StackTraceSymbolicator {
    pub fn new(origin: Option<String>) -> Self {
        Self { origin }
    }
}

impl Symbolicator for StackTraceSymbolicator {
    async fn symbolicate(
        &self,
        error: &CapturedError,
    ) -> Result<Vec<StackFrame>, SymbolicationError> {
        let stack = error.stack.as_deref().ok_or(SymbolicationError::MissingStack)?;
        let origin = self.origin.as_deref();
        let frames = std::panic::catch_unwind(|| parse_stack(stack, origin))
            .map_err(|_| SymbolicationError::Panicked)?;
        if frames.is_empty() {
            Err(SymbolicationError::NoFrames)
        } else {
            Ok(frames)
        }
    }
}

/// Parse V8 (`at fn (file:line:col)`), Firefox/Safari (`fn@file:line:col`)
/// and Rust backtrace (`N: fn` + `at file:line:col`) frames. Lines that match
/// none of these are skipped.
pub fn parse_stack(stack: &str, origin: Option<&str>) -> Vec<StackFrame> {
    let mut frames = Vec::new();
    let mut rust_fn: Option<&str> = None;

    for line in stack.lines().map(str::trim) {
        if let Some(name) = rust_frame_name(line) {
            rust_fn = Some(name);
            continue;
        }
        let (function, location) = if let Some(rest) = line.strip_prefix("at ") {
            match rust_fn.take() {
                Some(name) => (name, rest),
                None => match rest.strip_suffix(')').and_then(|r| r.split_once(" (")) {
                    Some((name, location)) => (name, location),
                    None => ("<anonymous>", rest),
                },
            }
        } else if let Some((name, location)) = line.split_once('@') {
            (if name.is_empty() { "<anonymous>" } else { name }, location)
        } else {
            continue;
        };
        if let Some(frame) = parse_location(function, location, origin) {
            frames.push(frame);
        }
    }
    frames
}

/// `"12: core::panicking::panic"` -> `"core::panicking::panic"`.
fn rust_frame_name(line: &str) -> Option<&str> {
    let (index, name) = line.split_once(": ")?;
    if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(name.trim())
}

fn parse_location(function: &str, location: &str, origin: Option<&str>) -> Option<StackFrame> {
    let mut parts = location.rsplitn(3, ':');
    let column = parts.next()?.parse().ok()?;
    let line = parts.next()?.parse().ok()?;
    let file = parts.next()?;
    let file = origin
        .and_then(|origin| file.strip_prefix(origin))
        .unwrap_or(file);
    Some(StackFrame {
        function_name: function.strip_prefix("async ").unwrap_or(function).to_string(),
        file_name: file.to_string(),
        line,
        column,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(function: &str, file: &str, line: u32, column: u32) -> StackFrame {
        StackFrame {
            function_name: function.into(),
            file_name: file.into(),
            line,
            column,
        }
    }

    #[test]
    fn test_parse_v8_stack() {
        let stack = "TypeError: x is undefined\n    \
                     at render (http://localhost:1234/bundle.js:120:15)\n    \
                     at http://localhost:1234/bundle.js:7:1";
        let frames = parse_stack(stack, Some("http://localhost:1234"));
        assert_eq!(
            frames,
            vec![
                frame("render", "/bundle.js", 120, 15),
                frame("<anonymous>", "/bundle.js", 7, 1),
            ]
        );
    }

    #[test]
    fn test_parse_firefox_stack() {
        let stack =
            "onFrame@http://localhost:1234/bundle.js:44:9\n@http://localhost:1234/bundle.js:1:1";
        let frames = parse_stack(stack, None);
        assert_eq!(frames[0], frame("onFrame", "http://localhost:1234/bundle.js", 44, 9));
        assert_eq!(frames[1].function_name, "<anonymous>");
    }

    #[test]
    fn test_parse_rust_backtrace() {
        let stack = "   0: std::panicking::begin_panic\n\
                     \x20            at /rustc/abc/library/std/src/panicking.rs:616:12\n\
                     \x20  1: cbshell_web::shell::Shell::on_frame\n\
                     \x20            at ./src/shell.rs:88:5\n\
                     \x20  2: __libc_start_main";
        let frames = parse_stack(stack, None);
        assert_eq!(frames.len(), 2);
        assert_eq!(
            frames[1],
            frame("cbshell_web::shell::Shell::on_frame", "./src/shell.rs", 88, 5)
        );
    }

    #[test]
    fn test_garbage_yields_no_frames() {
        assert!(parse_stack("nothing to see here\nat nowhere", None).is_empty());
    }

    #[tokio::test]
    async fn test_missing_stack_fails() {
        let symbolicator = StackTraceSymbolicator::default();
        let result = symbolicator.symbolicate(&CapturedError::new("boom")).await;
        assert_eq!(result, Err(SymbolicationError::MissingStack));
    }

    #[tokio::test]
    async fn test_unparseable_stack_fails() {
        let symbolicator = StackTraceSymbolicator::default();
        let error = CapturedError::new("boom").with_stack("Error: boom");
        assert_eq!(symbolicator.symbolicate(&error).await, Err(SymbolicationError::NoFrames));
    }
}
