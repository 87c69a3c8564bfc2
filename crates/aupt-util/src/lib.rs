use std::{
    fs, io,
    io::Write,
    path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::debug;
use walkdir::WalkDir;
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

pub const ENV_PREFIX: &str = "AUPT_";

pub fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Accepts the usual spellings of a boolean; anything else is `None`.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Maps an instrumentation argument key such as `testCaseTimeout` to its
/// environment override, `AUPT_TEST_CASE_TIMEOUT`.
pub fn env_key_for(arg_key: &str) -> String {
    let mut out = String::from(ENV_PREFIX);
    let mut prev_lower = false;
    for ch in arg_key.chars() {
        if ch == '-' || ch == '.' {
            out.push('_');
            prev_lower = false;
            continue;
        }
        if ch.is_ascii_uppercase() && prev_lower {
            out.push('_');
        }
        prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        out.push(ch.to_ascii_uppercase());
    }
    out
}

pub fn data_dir() -> PathBuf {
    if let Some(dir) = env_var("AUPT_DATA_DIR") {
        return expand_user(&dir);
    }
    if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".local/share/aupt")
    } else {
        PathBuf::from("/tmp/aupt")
    }
}

pub fn default_results_dir() -> PathBuf {
    data_dir().join("results")
}

pub fn expand_user(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            let rest = path.strip_prefix("~/").unwrap_or("");
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

pub fn ensure_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Replaces anything that is not safe inside a file name with `_`.
pub fn sanitize_segment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        "_".into()
    } else {
        out
    }
}

/// Zips every regular file under `source_dir` into `output_path`, storing
/// entries relative to `source_dir`. The output file itself is skipped when it
/// lives inside the source tree.
pub fn zip_directory(source_dir: &Path, output_path: &Path) -> io::Result<usize> {
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(output_path)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut count = 0;

    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        let path = entry.path();
        if !entry.file_type().is_file() || path == output_path {
            continue;
        }
        let Ok(relative) = path.strip_prefix(source_dir) else {
            continue;
        };
        let name = relative.to_string_lossy().replace('\\', "/");
        debug!("bundling {name}");
        zip.start_file(name, options)?;
        let mut input = fs::File::open(path)?;
        io::copy(&mut input, &mut zip)?;
        count += 1;
    }

    zip.flush()?;
    zip.finish()?;
    Ok(count)
}

pub fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();
    Ok(())
}
