//! Process-wide error capture and the append-only diagnostic log.
//!
//! Every failure the shell cannot handle locally (panics, uncaught JS errors,
//! unhandled rejections, a failed engine load) ends up here as an
//! [`ErrorRecord`]. Records are never removed.

mod symbolicate;

pub use symbolicate::{parse_stack, StackTraceSymbolicator, SymbolicationError, Symbolicator};

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::mpsc;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Note shown instead of frames when the stack could not be resolved.
pub const FALLBACK_NOTE: &str = "failed to gather error origin :(";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Uncaught,
    UnhandledRejection,
    EngineLoad,
}

impl ErrorCategory {
    pub fn prefix(self) -> &'static str {
        match self {
            ErrorCategory::Uncaught => "Error",
            ErrorCategory::UnhandledRejection => "Unhandled Rejection",
            ErrorCategory::EngineLoad => "Engine Failed To Load",
        }
    }
}

/// A failure as it was caught, before symbolication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedError {
    pub message: String,
    pub stack: Option<String>,
}

impl CapturedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl fmt::Display for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub function_name: String,
    pub file_name: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in {} {}:{}",
            self.function_name, self.file_name, self.line, self.column
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub category: ErrorCategory,
    pub message: String,
    pub stack_frames: Vec<StackFrame>,
    pub note: Option<&'static str>,
}

impl ErrorRecord {
    pub fn header(&self) -> String {
        format!("{}: {}", self.category.prefix(), self.message)
    }

    /// Panel lines for this record, ending with a blank separator.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![self.header()];
        lines.extend(self.stack_frames.iter().map(StackFrame::to_string));
        lines.extend(self.note.map(str::to_string));
        lines.push(String::new());
        lines
    }
}

// ─── Log ─────────────────────────────────────────────────────────────

/// Append-only record log, shared by every clone.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticLog {
    records: Rc<RefCell<Vec<ErrorRecord>>>,
    in_flight: Rc<Cell<usize>>,
}

impl DiagnosticLog {
    pub fn records(&self) -> Vec<ErrorRecord> {
        self.records.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn errors_happened(&self) -> bool {
        !self.is_empty() || self.loading()
    }

    /// Whether some captured error is still being symbolicated.
    pub fn loading(&self) -> bool {
        self.in_flight.get() > 0
    }

    pub fn panel_lines(&self) -> Vec<String> {
        self.lines_since(0)
    }

    /// Panel lines of the records appended at or after index `from`.
    pub fn lines_since(&self, from: usize) -> Vec<String> {
        self.records
            .borrow()
            .iter()
            .skip(from)
            .flat_map(ErrorRecord::lines)
            .collect()
    }

    fn append(&self, record: ErrorRecord) {
        log::error!("{}", record.header());
        self.records.borrow_mut().push(record);
    }
}

// ─── Capture service ─────────────────────────────────────────────────

type RestoreHook = Box<dyn FnOnce()>;

/// Turns caught failures into [`ErrorRecord`]s.
///
/// `install` chains a panic hook in front of whatever hook is already set;
/// the hook only forwards the panic into a channel, which the host drains
/// with [`ErrorCapture::drain_panics`].
pub struct ErrorCapture<S> {
    symbolicator: S,
    log: DiagnosticLog,
    panic_tx: mpsc::Sender<CapturedError>,
    panic_rx: mpsc::Receiver<CapturedError>,
    restore: RefCell<Option<RestoreHook>>,
}

impl<S: Symbolicator + 'static> ErrorCapture<S> {
    pub fn new(symbolicator: S) -> Rc<Self> {
        let (panic_tx, panic_rx) = mpsc::channel();
        Rc::new(Self {
            symbolicator,
            log: DiagnosticLog::default(),
            panic_tx,
            panic_rx,
            restore: RefCell::new(None),
        })
    }

    pub fn log(&self) -> &DiagnosticLog {
        &self.log
    }

    pub fn installed(&self) -> bool {
        self.restore.borrow().is_some()
    }

    /// Register the panic hook. Calling it again is a no-op.
    pub fn install(&self) {
        if self.installed() {
            return;
        }
        let previous = Arc::new(std::panic::take_hook());
        let forward = Arc::clone(&previous);
        let tx = self.panic_tx.clone();
        std::panic::set_hook(Box::new(move |info| {
            let message = match info.payload().downcast_ref::<&str>() {
                Some(s) => (*s).to_string(),
                None => match info.payload().downcast_ref::<String>() {
                    Some(s) => s.clone(),
                    None => "Box<dyn Any>".to_string(),
                },
            };
            let backtrace = std::backtrace::Backtrace::force_capture();
            let stack = match backtrace.status() {
                std::backtrace::BacktraceStatus::Captured => Some(backtrace.to_string()),
                _ => info.location().map(|loc| {
                    format!(
                        "   0: <panic>\n             at {}:{}:{}",
                        loc.file(),
                        loc.line(),
                        loc.column()
                    )
                }),
            };
            let _ = tx.send(CapturedError { message, stack });
            forward(info);
        }));
        *self.restore.borrow_mut() = Some(Box::new(move || {
            std::panic::set_hook(Box::new(move |info| previous(info)));
        }));
        log::debug!("Error capture installed");
    }

    /// Put the previous panic hook back.
    pub fn teardown(&self) {
        if let Some(restore) = self.restore.borrow_mut().take() {
            restore();
            log::debug!("Error capture removed");
        }
    }

    /// Panics caught by the hook since the last call.
    pub fn drain_panics(&self) -> Vec<CapturedError> {
        self.panic_rx.try_iter().collect()
    }

    /// Symbolicate `error` and append a record for it. The returned task
    /// never fails; an unresolvable stack, or a symbolicator that panics,
    /// degrades to [`FALLBACK_NOTE`].
    pub fn capture(
        self: &Rc<Self>,
        category: ErrorCategory,
        error: CapturedError,
    ) -> impl Future<Output = ()> + 'static {
        let this = Rc::clone(self);
        let pending = InFlight::enter(&this.log);
        async move {
            let frames = CatchPanic(Box::pin(this.symbolicator.symbolicate(&error))).await;
            let (stack_frames, note) = match frames {
                Ok(frames) => (frames, None),
                Err(e) => {
                    log::debug!("Symbolication failed: {e}");
                    (Vec::new(), Some(FALLBACK_NOTE))
                }
            };
            drop(pending);
            this.log.append(ErrorRecord {
                category,
                message: error.message,
                stack_frames,
                note,
            });
        }
    }
}

/// Counts one capture as in flight until dropped.
struct InFlight(Rc<Cell<usize>>);

impl InFlight {
    fn enter(log: &DiagnosticLog) -> Self {
        log.in_flight.set(log.in_flight.get() + 1);
        Self(Rc::clone(&log.in_flight))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

/// Turns a panic while polling the symbolicator into
/// [`SymbolicationError::Panicked`].
struct CatchPanic<'a>(Pin<Box<dyn Future<Output = SymbolicationResult> + 'a>>);

type SymbolicationResult = Result<Vec<StackFrame>, SymbolicationError>;

impl Future for CatchPanic<'_> {
    type Output = SymbolicationResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.0.as_mut();
        match std::panic::catch_unwind(AssertUnwindSafe(|| inner.poll(cx))) {
            Ok(poll) => poll,
            Err(_) => Poll::Ready(Err(SymbolicationError::Panicked)),
        }
    }
}

impl<S> Drop for ErrorCapture<S> {
    fn drop(&mut self) {
        if let Some(restore) = self.restore.get_mut().take() {
            restore();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "https://play.example.org";

    struct Unresolvable;

    impl Symbolicator for Unresolvable {
        async fn symbolicate(
            &self,
            _: &CapturedError,
        ) -> Result<Vec<StackFrame>, SymbolicationError> {
            Err(SymbolicationError::NoFrames)
        }
    }

    struct Panicking;

    impl Symbolicator for Panicking {
        async fn symbolicate(
            &self,
            _: &CapturedError,
        ) -> Result<Vec<StackFrame>, SymbolicationError> {
            panic!("symbolicator exploded")
        }
    }

    fn boom() -> CapturedError {
        CapturedError::new("boom").with_stack(format!(
            "Error: boom\n    at foo ({ORIGIN}/app.js:10:3)"
        ))
    }

    // ── records ──

    #[test]
    fn test_record_lines() {
        let record = ErrorRecord {
            category: ErrorCategory::UnhandledRejection,
            message: "nope".into(),
            stack_frames: vec![],
            note: Some(FALLBACK_NOTE),
        };
        assert_eq!(
            record.lines(),
            vec!["Unhandled Rejection: nope", FALLBACK_NOTE, ""]
        );
    }

    // ── capture ──

    #[tokio::test]
    async fn test_resolved_stack_shows_frames() {
        let capture = ErrorCapture::new(StackTraceSymbolicator::new(Some(ORIGIN.into())));
        capture.capture(ErrorCategory::Uncaught, boom()).await;
        assert_eq!(
            capture.log().panel_lines(),
            vec!["Error: boom", "foo in /app.js 10:3", ""]
        );
    }

    #[tokio::test]
    async fn test_unresolvable_stack_shows_fallback() {
        let capture = ErrorCapture::new(Unresolvable);
        capture.capture(ErrorCategory::Uncaught, boom()).await;
        let records = capture.log().records();
        assert!(records[0].stack_frames.is_empty());
        assert_eq!(
            capture.log().panel_lines(),
            vec!["Error: boom", FALLBACK_NOTE, ""]
        );
    }

    #[tokio::test]
    async fn test_panicking_symbolicator_shows_fallback() {
        let capture = ErrorCapture::new(Panicking);
        let task = capture.capture(ErrorCategory::UnhandledRejection, boom());
        assert!(capture.log().loading());
        task.await;
        assert!(!capture.log().loading());
        assert_eq!(
            capture.log().panel_lines(),
            vec!["Unhandled Rejection: boom", FALLBACK_NOTE, ""]
        );
    }

    #[tokio::test]
    async fn test_dropped_task_leaves_nothing_in_flight() {
        let capture = ErrorCapture::new(StackTraceSymbolicator::new(None));
        let task = capture.capture(ErrorCategory::Uncaught, boom());
        assert!(capture.log().loading());
        drop(task);
        assert!(!capture.log().loading());
        assert!(capture.log().is_empty());
    }

    #[tokio::test]
    async fn test_log_is_monotonic() {
        let capture = ErrorCapture::new(StackTraceSymbolicator::new(None));
        capture.capture(ErrorCategory::Uncaught, boom()).await;
        let after_first = capture.log().records();
        capture
            .capture(ErrorCategory::UnhandledRejection, CapturedError::new("late"))
            .await;
        let after_second = capture.log().records();
        assert_eq!(&after_second[..after_first.len()], &after_first[..]);
        assert_eq!(after_second.len(), 2);
        assert_eq!(capture.log().lines_since(1)[0], "Unhandled Rejection: late");
    }

    #[tokio::test]
    async fn test_loading_while_symbolicating() {
        let capture = ErrorCapture::new(StackTraceSymbolicator::new(None));
        let task = capture.capture(ErrorCategory::Uncaught, boom());
        assert!(capture.log().loading());
        assert!(capture.log().errors_happened());
        assert!(capture.log().is_empty());
        task.await;
        assert!(!capture.log().loading());
        assert_eq!(capture.log().len(), 1);
    }

    #[tokio::test]
    async fn test_panic_forwarded_through_hook() {
        let capture = ErrorCapture::new(StackTraceSymbolicator::new(None));
        capture.install();
        capture.install();
        let result = std::panic::catch_unwind(|| panic!("kaboom"));
        assert!(result.is_err());
        capture.teardown();
        assert!(!capture.installed());

        let panics = capture.drain_panics();
        let caught = panics.iter().find(|p| p.message == "kaboom").unwrap();
        assert!(caught.stack.is_some());
        capture.capture(ErrorCategory::Uncaught, caught.clone()).await;
        assert_eq!(capture.log().records()[0].header(), "Error: kaboom");
    }
}
