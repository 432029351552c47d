//! Panic hook: captures a short crash report (timestamp, thread, location,
//! payload, backtrace) to disk before delegating to the previously
//! registered hook. No terminal state to restore here — this binary is a
//! CLI, not a TUI.

use std::io::Write;
use std::panic::{self};

/// Install the panic hook. Best-effort: failure to write the crash report
/// never panics in turn, and the previous hook still runs afterward so the
/// usual panic message/backtrace still prints.
pub fn install_panic_hook() {
    let prev = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        let _ = (|| {
            let thread = std::thread::current();
            let thread_name = thread.name().unwrap_or("<unnamed>");

            let location = if let Some(loc) = info.location() {
                format!("{}:{}", loc.file(), loc.line())
            } else {
                "<unknown>".to_string()
            };

            let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = info.payload().downcast_ref::<String>() {
                s.clone()
            } else {
                "<non-string-payload>".to_string()
            };

            let backtrace = std::backtrace::Backtrace::capture();

            let base_dir = crate::state_paths::StateLayout::default_root();
            let crash_dir = base_dir.join("crash_reports");
            let _ = std::fs::create_dir_all(&crash_dir);

            let ts = chrono::Utc::now().format("%Y%m%dT%H%M%S").to_string();
            let pid = std::process::id();
            let path = crash_dir.join(format!("panic-{ts}-{pid}.log"));

            let mut f = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;

            writeln!(f, "reconcile panic report")?;
            writeln!(f, "timestamp: {ts}")?;
            writeln!(f, "pid: {pid}")?;
            writeln!(f, "thread: {thread_name}")?;
            writeln!(f, "location: {location}")?;
            writeln!(f, "payload: {payload}")?;
            writeln!(f, "--- backtrace ---")?;
            writeln!(f, "{backtrace:?}")?;
            if let Ok(env) = std::env::var("RUST_LOG") {
                writeln!(f, "RUST_LOG={env}")?;
            }

            f.flush()?;
            Ok::<(), std::io::Error>(())
        })();

        eprintln!("\nreconcile: an unexpected error occurred, the run was aborted. A crash report may have been written.\n");

        prev(info);
    }));
}
