//! Span recording and Chrome Trace JSON output.
//!
//! See the [module docs](crate::profiling) for usage. The API surface is
//! identical with and without the `profiling` feature; only the backend
//! changes.

use std::borrow::Cow;
use std::path::Path;

#[cfg(feature = "profiling")]
mod enabled {
    use std::fs::File;
    use std::io::{BufWriter, Write};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Mutex, OnceLock};
    use std::time::Instant;

    use super::*;

    /// A Chrome Trace "complete event" (`ph:"X"`).
    struct TraceEvent {
        name: String,
        ts_us: u64,
        dur_us: u64,
        tid: u64,
    }

    struct ProfilerState {
        start: Instant,
        out_path: PathBuf,
        recording: AtomicBool,
        events: Mutex<Vec<TraceEvent>>,
    }

    static STATE: OnceLock<ProfilerState> = OnceLock::new();
    static NEXT_TID: AtomicU64 = AtomicU64::new(1);

    thread_local! {
        static TID: u64 = NEXT_TID.fetch_add(1, Ordering::Relaxed);
    }

    /// Initializes the profiler and sets the output path.
    pub fn init<P: AsRef<Path>>(path: P) {
        let _ = STATE.set(ProfilerState {
            start: Instant::now(),
            out_path: path.as_ref().to_path_buf(),
            recording: AtomicBool::new(true),
            events: Mutex::new(Vec::new()),
        });
    }

    /// Stops recording and writes the Chrome Trace JSON.
    pub fn shutdown() {
        let Some(state) = STATE.get() else { return };
        state.recording.store(false, Ordering::Release);
        if let Err(e) = write_trace_file(state) {
            eprintln!("profiler::shutdown failed to write trace: {e}");
        }
    }

    fn write_trace_file(state: &ProfilerState) -> std::io::Result<()> {
        let events = {
            let mut guard = state.events.lock().unwrap();
            std::mem::take(&mut *guard)
        };

        if let Some(parent) = state.out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(&state.out_path)?);

        write!(out, "{{\"traceEvents\":[")?;
        for (index, event) in events.iter().enumerate() {
            if index > 0 {
                write!(out, ",")?;
            }
            write!(out, "{{\"name\":")?;
            write_json_string(&mut out, &event.name)?;
            write!(
                out,
                ",\"cat\":\"ecs\",\"ph\":\"X\",\"ts\":{},\"dur\":{},\"pid\":1,\"tid\":{}}}",
                event.ts_us, event.dur_us, event.tid
            )?;
        }
        write!(out, "]}}")?;
        out.flush()
    }

    fn write_json_string<W: Write>(out: &mut W, s: &str) -> std::io::Result<()> {
        write!(out, "\"")?;
        for ch in s.chars() {
            match ch {
                '"' => write!(out, "\\\"")?,
                '\\' => write!(out, "\\\\")?,
                '\n' => write!(out, "\\n")?,
                c if c.is_control() => write!(out, "\\u{:04x}", c as u32)?,
                c => write!(out, "{c}")?,
            }
        }
        write!(out, "\"")
    }

    /// Opens a profiling span; the event is recorded when the guard drops.
    pub fn span(name: impl Into<super::SpanName>) -> SpanGuard {
        let Some(state) = STATE.get() else {
            return SpanGuard::disabled();
        };
        if !state.recording.load(Ordering::Acquire) {
            return SpanGuard::disabled();
        }
        SpanGuard {
            name: name.into().0.into_owned(),
            ts0: state.start.elapsed().as_micros() as u64,
            tid: TID.with(|t| *t),
            active: true,
        }
    }

    /// RAII guard recording a complete event on drop.
    pub struct SpanGuard {
        name: String,
        ts0: u64,
        tid: u64,
        active: bool,
    }

    impl SpanGuard {
        fn disabled() -> Self {
            Self {
                name: String::new(),
                ts0: 0,
                tid: 0,
                active: false,
            }
        }
    }

    impl Drop for SpanGuard {
        fn drop(&mut self) {
            if !self.active {
                return;
            }
            let Some(state) = STATE.get() else { return };
            let ts1 = state.start.elapsed().as_micros() as u64;
            let event = TraceEvent {
                name: std::mem::take(&mut self.name),
                ts_us: self.ts0,
                dur_us: ts1.saturating_sub(self.ts0),
                tid: self.tid,
            };
            if let Ok(mut events) = state.events.lock() {
                events.push(event);
            }
        }
    }
}

#[cfg(not(feature = "profiling"))]
mod disabled {
    use super::*;

    /// Initializes the profiler (no-op without the `profiling` feature).
    #[inline]
    pub fn init<P: AsRef<Path>>(_path: P) {}

    /// Writes the trace file (no-op).
    #[inline]
    pub fn shutdown() {}

    /// Opens a profiling span (no-op).
    #[inline]
    pub fn span(_name: impl Into<super::SpanName>) -> SpanGuard {
        SpanGuard
    }

    /// No-op span guard.
    pub struct SpanGuard;
}

/// A span name; accepts `&'static str`, `String`, or `Cow<'static, str>`.
pub struct SpanName(pub Cow<'static, str>);

impl From<&'static str> for SpanName {
    fn from(s: &'static str) -> Self {
        SpanName(Cow::Borrowed(s))
    }
}

impl From<String> for SpanName {
    fn from(s: String) -> Self {
        SpanName(Cow::Owned(s))
    }
}

#[cfg(feature = "profiling")]
pub use enabled::{init, shutdown, span, SpanGuard};

#[cfg(not(feature = "profiling"))]
pub use disabled::{init, shutdown, span, SpanGuard};
