//! Snapshot of the live threads in this process, logged when a test hangs.
//!
//! Each thread gets its name, scheduler state and wait channel, followed by
//! its kernel stack when `/proc/<pid>/task/<tid>/stack` is readable (usually
//! only with `CAP_SYS_ADMIN`).

#[cfg(target_os = "linux")]
pub fn dump_threads() -> String {
    use std::fs;

    let mut out = String::new();
    let entries = match fs::read_dir("/proc/self/task") {
        Ok(entries) => entries,
        Err(err) => return format!("thread dump unavailable: {err}"),
    };
    let mut tids: Vec<u64> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_string_lossy().parse().ok())
        .collect();
    tids.sort_unstable();

    for tid in tids {
        let base = format!("/proc/self/task/{tid}");
        let comm = fs::read_to_string(format!("{base}/comm")).unwrap_or_default();
        let state = fs::read_to_string(format!("{base}/stat"))
            .ok()
            .and_then(|stat| parse_state(&stat))
            .unwrap_or('?');
        let wchan = fs::read_to_string(format!("{base}/wchan")).unwrap_or_default();
        let wchan = wchan.trim();
        out.push_str(&format!(
            "  tid={tid} state={state} name={} wchan={}\n",
            comm.trim(),
            if wchan.is_empty() || wchan == "0" { "-" } else { wchan }
        ));
        if let Ok(stack) = fs::read_to_string(format!("{base}/stack")) {
            out.push_str(&indent_stack(&stack));
        }
    }
    out
}

#[cfg(not(target_os = "linux"))]
pub fn dump_threads() -> String {
    "thread dump unavailable on this platform".into()
}

/// The state letter follows the parenthesised command name, which may itself
/// contain spaces and parentheses.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_state(stat: &str) -> Option<char> {
    let close = stat.rfind(')')?;
    stat[close + 1..].trim_start().chars().next()
}

/// Strips the `[<0>]` address prefix of each kernel stack frame.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn indent_stack(stack: &str) -> String {
    let mut out = String::new();
    for frame in stack.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let frame = match frame.find("] ") {
            Some(idx) if frame.starts_with('[') => &frame[idx + 2..],
            _ => frame,
        };
        out.push_str("      at ");
        out.push_str(frame);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_survives_odd_thread_names() {
        assert_eq!(parse_state("1234 (aupt-test-a) b) S 1 2 3"), Some('S'));
        assert_eq!(parse_state("1 (init) R 0"), Some('R'));
        assert_eq!(parse_state("garbage"), None);
    }

    #[test]
    fn kernel_stack_frames_are_indented_without_addresses() {
        let stack = "[<0>] futex_wait_queue+0x60/0x90\n[<0>] do_futex+0x106/0x1b0\n\n";
        assert_eq!(
            indent_stack(stack),
            "      at futex_wait_queue+0x60/0x90\n      at do_futex+0x106/0x1b0\n"
        );
        assert_eq!(indent_stack(""), "");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn dump_lists_current_thread() {
        let handle = std::thread::Builder::new()
            .name("dump-probe".into())
            .spawn(dump_threads)
            .unwrap();
        let dump = handle.join().unwrap();
        assert!(dump.contains("name=dump-probe"), "{dump}");
    }
}
