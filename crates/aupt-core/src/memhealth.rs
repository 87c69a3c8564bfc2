//! Memory health report built from the collector's meminfo snapshots.

use std::{
    collections::BTreeMap,
    fmt::Write as _,
    fs, io,
    path::{Path, PathBuf},
};

use tracing::warn;

use crate::log_kind::LogKind;

pub const SUMMARY_FILE_NAME: &str = "memory-health.txt";
pub const DETAILS_FILE_NAME: &str = "memory-health-details.txt";

const PSS_SECTION_HEADER: &str = "Total PSS by process:";

/// Per-process PSS samples in kilobytes, in snapshot order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryHealth {
    snapshots: usize,
    processes: BTreeMap<String, Vec<u64>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessStats {
    pub process: String,
    pub samples: usize,
    pub peak_kb: u64,
    pub average_kb: u64,
    pub last_kb: u64,
}

impl MemoryHealth {
    /// Reads every `meminfo-*.txt` under `dir`, oldest first.
    pub fn from_results_dir(dir: &Path) -> io::Result<Self> {
        let mut health = MemoryHealth::default();
        for path in meminfo_snapshots(dir)? {
            match fs::read_to_string(&path) {
                Ok(text) => health.add_snapshot(&text),
                Err(err) => warn!("skipping unreadable {}: {err}", path.display()),
            }
        }
        Ok(health)
    }

    pub fn add_snapshot(&mut self, text: &str) {
        self.snapshots += 1;
        for (process, pss_kb) in parse_total_pss(text) {
            self.processes.entry(process).or_default().push(pss_kb);
        }
    }

    pub fn snapshots(&self) -> usize {
        self.snapshots
    }

    /// Sorted by peak PSS, largest first.
    pub fn stats(&self) -> Vec<ProcessStats> {
        let mut stats: Vec<ProcessStats> = self
            .processes
            .iter()
            .filter(|(_, samples)| !samples.is_empty())
            .map(|(process, samples)| ProcessStats {
                process: process.clone(),
                samples: samples.len(),
                peak_kb: samples.iter().copied().max().unwrap_or(0),
                average_kb: samples.iter().sum::<u64>() / samples.len() as u64,
                last_kb: samples.last().copied().unwrap_or(0),
            })
            .collect();
        stats.sort_by(|a, b| b.peak_kb.cmp(&a.peak_kb).then_with(|| a.process.cmp(&b.process)));
        stats
    }

    pub fn summary_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "meminfo snapshots: {}", self.snapshots);
        if self.processes.is_empty() {
            let _ = writeln!(out, "no PSS samples collected");
            return out;
        }
        let _ = writeln!(
            out,
            "{:<60} {:>8} {:>12} {:>12} {:>12}",
            "process", "samples", "peak_kb", "avg_kb", "last_kb"
        );
        for stat in self.stats() {
            let _ = writeln!(
                out,
                "{:<60} {:>8} {:>12} {:>12} {:>12}",
                stat.process, stat.samples, stat.peak_kb, stat.average_kb, stat.last_kb
            );
        }
        out
    }

    pub fn details_text(&self) -> String {
        let mut out = String::new();
        for stat in self.stats() {
            let _ = writeln!(out, "{}", stat.process);
            if let Some(samples) = self.processes.get(&stat.process) {
                let joined: Vec<String> = samples.iter().map(u64::to_string).collect();
                let _ = writeln!(out, "  pss_kb: {}", joined.join(","));
            }
        }
        out
    }

    /// Writes `memory-health.txt` and `memory-health-details.txt` into `dir`.
    pub fn write_reports(&self, dir: &Path) -> io::Result<(PathBuf, PathBuf)> {
        fs::create_dir_all(dir)?;
        let summary = dir.join(SUMMARY_FILE_NAME);
        let details = dir.join(DETAILS_FILE_NAME);
        fs::write(&summary, self.summary_text())?;
        fs::write(&details, self.details_text())?;
        Ok((summary, details))
    }
}

fn meminfo_snapshots(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let prefix = LogKind::Meminfo.snapshot_prefix();
    let mut found: Vec<(i64, String, PathBuf)> = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(rest) = name.strip_prefix(&prefix) else {
            continue;
        };
        let Some(stem) = rest.strip_suffix(".txt") else {
            continue;
        };
        let millis = stem
            .split('-')
            .next()
            .and_then(|value| value.parse::<i64>().ok())
            .unwrap_or(i64::MAX);
        found.push((millis, name.clone(), entry.path()));
    }
    found.sort();
    Ok(found.into_iter().map(|(_, _, path)| path).collect())
}

/// Extracts `(process, pss_kb)` pairs from the `Total PSS by process:` section
/// of a `dumpsys meminfo` dump. Lines look like
/// `   123,456K: com.android.systemui (pid 2345 / activities)`.
pub fn parse_total_pss(text: &str) -> Vec<(String, u64)> {
    let mut out = Vec::new();
    let mut in_section = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if !in_section {
            if trimmed == PSS_SECTION_HEADER {
                in_section = true;
            }
            continue;
        }
        if trimmed.is_empty() {
            break;
        }
        if let Some(entry) = parse_pss_line(trimmed) {
            out.push(entry);
        }
    }
    out
}

fn parse_pss_line(line: &str) -> Option<(String, u64)> {
    let (amount, rest) = line.split_once("K:")?;
    let kb: u64 = amount.trim().replace(',', "").parse().ok()?;
    let rest = rest.trim();
    let process = match rest.find(" (pid") {
        Some(idx) => &rest[..idx],
        None => rest,
    };
    let process = process.trim();
    if process.is_empty() {
        return None;
    }
    Some((process.to_string(), kb))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT_A: &str = "Applications Memory Usage (in Kilobytes):\n\
Uptime: 1000 Realtime: 1000\n\
\n\
Total PSS by process:\n\
    210,500K: system (pid 1200)\n\
    120,000K: com.android.systemui (pid 2345 / activities)\n\
     45,250K: com.google.android.gms.persistent (pid 3001)\n\
\n\
Total PSS by OOM adjustment:\n\
    400,000K: Native\n";

    const SNAPSHOT_B: &str = "Total PSS by process:\n\
    230,100K: system (pid 1200)\n\
     98,000K: com.android.systemui (pid 2345 / activities)\n\
\n";

    #[test]
    fn parses_only_the_pss_by_process_section() {
        let parsed = parse_total_pss(SNAPSHOT_A);
        assert_eq!(
            parsed,
            vec![
                ("system".to_string(), 210_500),
                ("com.android.systemui".to_string(), 120_000),
                ("com.google.android.gms.persistent".to_string(), 45_250),
            ]
        );
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let text = "Total PSS by process:\n  garbage\n  12K: \n  5,000K: app (pid 1)\n";
        assert_eq!(parse_total_pss(text), vec![("app".to_string(), 5_000)]);
    }

    #[test]
    fn stats_aggregate_across_snapshots() {
        let mut health = MemoryHealth::default();
        health.add_snapshot(SNAPSHOT_A);
        health.add_snapshot(SNAPSHOT_B);
        let stats = health.stats();
        assert_eq!(health.snapshots(), 2);
        assert_eq!(stats[0].process, "system");
        assert_eq!(stats[0].samples, 2);
        assert_eq!(stats[0].peak_kb, 230_100);
        assert_eq!(stats[0].average_kb, 220_300);
        assert_eq!(stats[0].last_kb, 230_100);
        let sysui = stats.iter().find(|s| s.process == "com.android.systemui").unwrap();
        assert_eq!(sysui.peak_kb, 120_000);
        assert_eq!(sysui.last_kb, 98_000);
    }

    #[test]
    fn reports_are_written_from_snapshot_files_in_time_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("meminfo-2000.txt"), SNAPSHOT_B).unwrap();
        fs::write(dir.path().join("meminfo-1000.txt"), SNAPSHOT_A).unwrap();
        fs::write(dir.path().join("cpuinfo-1500.txt"), "Load: 1.0").unwrap();

        let health = MemoryHealth::from_results_dir(dir.path()).unwrap();
        assert_eq!(health.snapshots(), 2);
        let (summary, details) = health.write_reports(dir.path()).unwrap();

        let summary = fs::read_to_string(summary).unwrap();
        assert!(summary.starts_with("meminfo snapshots: 2\n"));
        assert!(summary.contains("system"));
        let details = fs::read_to_string(details).unwrap();
        assert!(details.contains("system\n  pss_kb: 210500,230100\n"));
    }

    #[test]
    fn missing_directory_yields_an_empty_report() {
        let dir = tempfile::tempdir().unwrap();
        let health = MemoryHealth::from_results_dir(&dir.path().join("absent")).unwrap();
        assert_eq!(health.snapshots(), 0);
        assert!(health.summary_text().contains("no PSS samples collected"));
    }
}
