//! Diagnostic snapshots the collector knows how to capture.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use aupt_device::{CommandRunner, DeviceFailure};
use serde::Serialize;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogKind {
    Bugreport,
    Bugreportz,
    Meminfo,
    Cpuinfo,
    Fragmentation,
    Graphics,
    IonHeap,
    PagetypeInfo,
    Trace,
}

impl LogKind {
    pub const ALL: [LogKind; 9] = [
        LogKind::Bugreport,
        LogKind::Bugreportz,
        LogKind::Meminfo,
        LogKind::Cpuinfo,
        LogKind::Fragmentation,
        LogKind::Graphics,
        LogKind::IonHeap,
        LogKind::PagetypeInfo,
        LogKind::Trace,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LogKind::Bugreport => "bugreport",
            LogKind::Bugreportz => "bugreportz",
            LogKind::Meminfo => "meminfo",
            LogKind::Cpuinfo => "cpuinfo",
            LogKind::Fragmentation => "fragmentation",
            LogKind::Graphics => "graphics",
            LogKind::IonHeap => "ion-heap",
            LogKind::PagetypeInfo => "pagetype-info",
            LogKind::Trace => "trace",
        }
    }

    /// Instrumentation argument carrying this kind's interval.
    pub fn arg_key(self) -> &'static str {
        match self {
            LogKind::Bugreport => "bugreportInterval",
            LogKind::Bugreportz => "bugreportzInterval",
            LogKind::Meminfo => "meminfoInterval",
            LogKind::Cpuinfo => "cpuinfoInterval",
            LogKind::Fragmentation => "fragmentationInterval",
            LogKind::Graphics => "graphicsInterval",
            LogKind::IonHeap => "ionHeapInterval",
            LogKind::PagetypeInfo => "pagetypeInfoInterval",
            LogKind::Trace => "traceInterval",
        }
    }

    fn commands(self) -> &'static [&'static str] {
        match self {
            LogKind::Bugreport => &["bugreport"],
            LogKind::Bugreportz => &["bugreportz"],
            LogKind::Meminfo => &["dumpsys meminfo"],
            LogKind::Cpuinfo => &["dumpsys cpuinfo"],
            LogKind::Fragmentation => &["cat /d/extfrag/unusable_index"],
            LogKind::Graphics => &["dumpsys gfxinfo"],
            LogKind::IonHeap => &["cat /d/ion/heaps/audio", "cat /d/ion/heaps/system"],
            LogKind::PagetypeInfo => &["cat /proc/pagetypeinfo"],
            LogKind::Trace => &["atrace --async_dump"],
        }
    }

    fn extension(self) -> &'static str {
        match self {
            LogKind::Bugreportz => "zip",
            _ => "txt",
        }
    }

    pub fn snapshot_prefix(self) -> String {
        format!("{}-", self.name())
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug)]
pub enum CaptureError {
    Device(DeviceFailure),
    Io(io::Error),
    Bugreportz(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Device(err) => write!(f, "{err}"),
            CaptureError::Io(err) => write!(f, "write failed: {err}"),
            CaptureError::Bugreportz(msg) => write!(f, "bugreportz: {msg}"),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<DeviceFailure> for CaptureError {
    fn from(err: DeviceFailure) -> Self {
        CaptureError::Device(err)
    }
}

impl From<io::Error> for CaptureError {
    fn from(err: io::Error) -> Self {
        CaptureError::Io(err)
    }
}

/// `<dir>/<kind>-<millis>.<ext>`, with a numeric suffix if that name is taken.
pub fn snapshot_path(dir: &Path, kind: LogKind, at_millis: i64) -> PathBuf {
    let ext = kind.extension();
    let base = format!("{}{at_millis}", kind.snapshot_prefix());
    let mut path = dir.join(format!("{base}.{ext}"));
    let mut suffix = 1;
    while path.exists() {
        path = dir.join(format!("{base}-{suffix}.{ext}"));
        suffix += 1;
    }
    path
}

/// Captures one snapshot of `kind` into `dir` and returns the written file.
pub async fn capture(
    kind: LogKind,
    runner: &dyn CommandRunner,
    dir: &Path,
    at_millis: i64,
) -> Result<PathBuf, CaptureError> {
    fs::create_dir_all(dir)?;
    let path = snapshot_path(dir, kind, at_millis);
    match kind {
        LogKind::Bugreportz => capture_bugreportz(runner, &path).await?,
        _ => {
            let contents = collect_output(kind, runner).await?;
            fs::write(&path, contents)?;
        }
    }
    debug!("captured {kind} into {}", path.display());
    Ok(path)
}

async fn collect_output(kind: LogKind, runner: &dyn CommandRunner) -> Result<Vec<u8>, CaptureError> {
    let commands = kind.commands();
    if let [command] = commands {
        return Ok(runner.shell(command).await?);
    }

    let mut contents = Vec::new();
    let mut last_err = None;
    let mut succeeded = 0;
    for command in commands {
        contents.extend_from_slice(format!("==== {command} ====\n").as_bytes());
        match runner.shell(command).await {
            Ok(out) => {
                contents.extend_from_slice(&out);
                succeeded += 1;
            }
            Err(err) => {
                contents.extend_from_slice(format!("error: {err}\n").as_bytes());
                last_err = Some(err);
            }
        }
        contents.push(b'\n');
    }
    match last_err {
        Some(err) if succeeded == 0 => Err(err.into()),
        _ => Ok(contents),
    }
}

async fn capture_bugreportz(runner: &dyn CommandRunner, path: &Path) -> Result<(), CaptureError> {
    let out = runner.shell("bugreportz").await?;
    let remote = parse_bugreportz_reply(&String::from_utf8_lossy(&out))
        .map_err(CaptureError::Bugreportz)?;
    runner.pull(&remote, path).await?;
    if !runner.remove(&remote).await {
        debug!("could not remove {remote} after pulling it");
    }
    Ok(())
}

/// `bugreportz` prints `OK:<path>` on success and `FAIL:<reason>` otherwise,
/// possibly after progress lines.
pub fn parse_bugreportz_reply(reply: &str) -> Result<String, String> {
    for line in reply.lines().map(str::trim) {
        if let Some(path) = line.strip_prefix("OK:") {
            let path = path.trim();
            if path.is_empty() {
                return Err("empty path in reply".into());
            }
            return Ok(path.to_string());
        }
        if let Some(reason) = line.strip_prefix("FAIL:") {
            return Err(reason.trim().to_string());
        }
    }
    Err(format!("unexpected reply: {}", reply.trim()))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct ScriptedDevice {
        commands: Mutex<Vec<String>>,
        failing: Vec<&'static str>,
    }

    #[async_trait]
    impl CommandRunner for ScriptedDevice {
        fn describe(&self) -> String {
            "scripted".into()
        }

        async fn shell(&self, command: &str) -> Result<Vec<u8>, DeviceFailure> {
            self.commands.lock().unwrap().push(command.to_string());
            if self.failing.iter().any(|failing| *failing == command) {
                return Err(DeviceFailure::Exit {
                    status: 1,
                    stdout: String::new(),
                    stderr: "No such file or directory".into(),
                });
            }
            if command == "bugreportz" {
                return Ok(b"BEGIN:/data/br.zip\nOK:/data/br.zip\n".to_vec());
            }
            Ok(format!("output of {command}\n").into_bytes())
        }

        async fn pull(&self, remote: &str, local: &Path) -> Result<(), DeviceFailure> {
            fs::write(local, format!("zip from {remote}"))
                .map_err(|e| DeviceFailure::Io(e.to_string()))
        }
    }

    #[test]
    fn kinds_have_distinct_names_and_keys() {
        let names: std::collections::HashSet<_> = LogKind::ALL.iter().map(|k| k.name()).collect();
        let keys: std::collections::HashSet<_> = LogKind::ALL.iter().map(|k| k.arg_key()).collect();
        assert_eq!(names.len(), LogKind::ALL.len());
        assert_eq!(keys.len(), LogKind::ALL.len());
    }

    #[test]
    fn bugreportz_replies() {
        assert_eq!(
            parse_bugreportz_reply("BEGIN:/x\nOK:/bugreports/a.zip\n"),
            Ok("/bugreports/a.zip".into())
        );
        assert_eq!(
            parse_bugreportz_reply("FAIL: could not create zip"),
            Err("could not create zip".into())
        );
        assert!(parse_bugreportz_reply("weird").is_err());
        assert!(parse_bugreportz_reply("OK:").is_err());
    }

    #[test]
    fn snapshot_names_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let first = snapshot_path(dir.path(), LogKind::Meminfo, 1000);
        assert_eq!(first.file_name().unwrap(), "meminfo-1000.txt");
        fs::write(&first, b"x").unwrap();
        let second = snapshot_path(dir.path(), LogKind::Meminfo, 1000);
        assert_eq!(second.file_name().unwrap(), "meminfo-1000-1.txt");
    }

    #[tokio::test]
    async fn single_command_capture_writes_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let device = ScriptedDevice::default();
        let path = capture(LogKind::Cpuinfo, &device, dir.path(), 42).await.unwrap();
        assert_eq!(path.file_name().unwrap(), "cpuinfo-42.txt");
        assert_eq!(fs::read_to_string(path).unwrap(), "output of dumpsys cpuinfo\n");
    }

    #[tokio::test]
    async fn multi_command_capture_keeps_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let device = ScriptedDevice {
            failing: vec!["cat /d/ion/heaps/audio"],
            ..Default::default()
        };
        let path = capture(LogKind::IonHeap, &device, dir.path(), 7).await.unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("==== cat /d/ion/heaps/audio ====\nerror:"));
        assert!(text.contains("output of cat /d/ion/heaps/system"));
    }

    #[tokio::test]
    async fn multi_command_capture_fails_when_everything_fails() {
        let dir = tempfile::tempdir().unwrap();
        let device = ScriptedDevice {
            failing: vec!["cat /d/ion/heaps/audio", "cat /d/ion/heaps/system"],
            ..Default::default()
        };
        let err = capture(LogKind::IonHeap, &device, dir.path(), 7).await.unwrap_err();
        assert!(matches!(err, CaptureError::Device(_)));
    }

    #[tokio::test]
    async fn bugreportz_is_pulled_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let device = ScriptedDevice::default();
        let path = capture(LogKind::Bugreportz, &device, dir.path(), 9).await.unwrap();
        assert_eq!(path.file_name().unwrap(), "bugreportz-9.zip");
        assert_eq!(fs::read_to_string(path).unwrap(), "zip from /data/br.zip");
        let commands = device.commands.lock().unwrap().clone();
        assert_eq!(commands, vec!["bugreportz", "rm -f /data/br.zip"]);
    }
}
