//! Call-trace capture for internal-error log records.
//!
//! Only frames from the configured crate namespaces are kept: the walk
//! starts just above the function that reports the error and stops at the
//! first frame that belongs to anything else (a web framework, the test
//! harness, `std`).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::backtrace::Backtrace;

/// Short form of a stack frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub function: String,
    pub file: String,
    pub line: u32,
}

static FRAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\d+:\s+(?P<function>.+?)\s*$").expect("frame regex is valid")
});

static LOCATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*at\s+(?P<file>.+?):(?P<line>\d+)(?::\d+)?\s*$")
        .expect("location regex is valid")
});

static HASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"::h[0-9a-f]{16}$").expect("hash regex is valid"));

/// Parse the `Display` output of a [`Backtrace`]
pub fn parse_frames(text: &str) -> Vec<Frame> {
    let mut frames: Vec<Frame> = Vec::new();
    for line in text.lines() {
        if let Some(caps) = FRAME_RE.captures(line) {
            let function = HASH_RE.replace(&caps["function"], "").into_owned();
            frames.push(Frame {
                function,
                file: String::new(),
                line: 0,
            });
        } else if let Some(caps) = LOCATION_RE.captures(line) {
            if let Some(frame) = frames.last_mut() {
                if frame.file.is_empty() {
                    frame.file = caps["file"].to_string();
                    frame.line = caps["line"].parse().unwrap_or(0);
                }
            }
        }
    }
    frames
}

fn in_namespaces(function: &str, namespaces: &[String]) -> bool {
    namespaces.iter().any(|ns| {
        let path = format!("{ns}::");
        function.starts_with(&path) || function.contains(&format!("<{path}"))
    })
}

/// Keep the frames above `marker`'s caller that belong to `namespaces`
pub fn select_frames(frames: Vec<Frame>, marker: &str, namespaces: &[String]) -> Vec<Frame> {
    let Some(pos) = frames.iter().position(|f| f.function.ends_with(marker)) else {
        return Vec::new();
    };
    frames
        .into_iter()
        .skip(pos + 2)
        .take_while(|f| in_namespaces(&f.function, namespaces))
        .collect()
}

/// Capture the current call chain, skipping this function and its caller
#[inline(never)]
pub fn collect(namespaces: &[String]) -> Vec<Frame> {
    let text = Backtrace::force_capture().to_string();
    select_frames(parse_frames(&text), "call_trace::collect", namespaces)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "   0: std::backtrace_rs::backtrace::libunwind::trace
             at /rustc/abc/library/std/src/../../backtrace/src/backtrace/libunwind.rs:116:5
   1: std::backtrace::Backtrace::force_capture
             at /rustc/abc/library/std/src/backtrace.rs:312:9
   2: querylog::call_trace::collect
             at ./src/call_trace.rs:80:16
   3: querylog::db::terminal::<impl querylog::db::Db>::report::h0123456789abcdef
             at ./src/db/terminal.rs:30:22
   4: querylog::db::terminal::<impl querylog::db::Db>::first
             at ./src/db/terminal.rs:61:28
   5: myapp::handlers::show_pet
             at ./src/handlers.rs:12:5
   6: core::ops::function::FnOnce::call_once
             at /rustc/abc/library/core/src/ops/function.rs:250:5
   7: myapp::main
             at ./src/main.rs:3:5";

    fn ns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_frames_strips_hash_and_reads_location() {
        let frames = parse_frames(SAMPLE);
        assert_eq!(frames.len(), 8);
        assert_eq!(
            frames[3].function,
            "querylog::db::terminal::<impl querylog::db::Db>::report"
        );
        assert_eq!(frames[3].file, "./src/db/terminal.rs");
        assert_eq!(frames[3].line, 30);
    }

    #[test]
    fn test_select_frames_skips_collector_and_caller() {
        let frames = select_frames(
            parse_frames(SAMPLE),
            "call_trace::collect",
            &ns(&["querylog", "myapp"]),
        );
        let names: Vec<_> = frames.iter().map(|f| f.function.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "querylog::db::terminal::<impl querylog::db::Db>::first",
                "myapp::handlers::show_pet",
            ]
        );
    }

    #[test]
    fn test_select_frames_stops_at_foreign_frame() {
        let frames = select_frames(parse_frames(SAMPLE), "call_trace::collect", &ns(&["querylog"]));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].line, 61);
    }

    #[test]
    fn test_default_settings_need_host_namespace() {
        let defaults = crate::config::Settings::default();
        let frames = select_frames(parse_frames(SAMPLE), "call_trace::collect", &defaults.trace_namespaces);
        assert!(frames.iter().all(|f| !f.function.starts_with("myapp::")));

        let settings = defaults.with_trace_namespaces(["myapp", "querylog"]);
        let frames = select_frames(parse_frames(SAMPLE), "call_trace::collect", &settings.trace_namespaces);
        assert!(frames.iter().any(|f| f.function == "myapp::handlers::show_pet"));
    }

    #[test]
    fn test_select_frames_without_marker_is_empty() {
        let frames = parse_frames("   0: main\n");
        assert!(select_frames(frames, "call_trace::collect", &ns(&["querylog"])).is_empty());
    }

    #[test]
    fn test_collect_never_panics() {
        let frames = collect(&ns(&["querylog"]));
        assert!(frames.iter().all(|f| f.function.contains("querylog::")));
    }
}
