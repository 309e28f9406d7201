use anyhow::{Context, Result, anyhow, bail, ensure};
use candle_core::Device;
use rand::Rng;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const FALSY_STRINGS: [&str; 3] = ["off", "false", "0"];
const TRUTHY_STRINGS: [&str; 3] = ["on", "true", "1"];

const DUMP_FOLDER_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const DUMP_FOLDER_LEN: usize = 10;

/// Parse boolean arguments from the command line (`on/off`, `true/false`, `1/0`).
pub fn parse_bool_flag(s: &str) -> Result<bool, String> {
    let lower = s.to_lowercase();
    if FALSY_STRINGS.contains(&lower.as_str()) {
        Ok(false)
    } else if TRUTHY_STRINGS.contains(&lower.as_str()) {
        Ok(true)
    } else {
        Err("invalid value for a boolean flag. use 0 or 1".to_string())
    }
}

/// Broadcast a JSON parameter into a list of `len` values, unless it already is one.
pub fn bcast_json_list(param: &str, len: usize) -> Result<Vec<usize>> {
    let value: serde_json::Value =
        serde_json::from_str(param).with_context(|| format!("invalid JSON parameter: {param}"))?;
    match value {
        serde_json::Value::Array(items) => {
            ensure!(
                items.len() == len,
                "expected {len} values in {param}, got {}",
                items.len()
            );
            items
                .iter()
                .map(|v| {
                    v.as_u64()
                        .map(|n| n as usize)
                        .ok_or_else(|| anyhow!("non-integer value {v} in {param}"))
                })
                .collect()
        }
        serde_json::Value::Number(n) => {
            let n = n
                .as_u64()
                .ok_or_else(|| anyhow!("expected a non-negative integer, got {param}"))?;
            Ok(vec![n as usize; len])
        }
        other => bail!("expected an integer or a list of integers, got {other}"),
    }
}

/// Create the directory that stores this experiment.
///
/// The leaf folder is the cluster job ID when `CHRONOS_JOB_ID` is set,
/// otherwise a fresh random name.
pub fn get_dump_path(main_dump_path: &Path, exp_name: &str) -> Result<PathBuf> {
    let job_id = std::env::var("CHRONOS_JOB_ID").ok();
    let mut rng = rand::rng();
    create_dump_path(main_dump_path, exp_name, job_id.as_deref(), &mut rng)
}

pub(crate) fn create_dump_path<R: Rng>(
    main_dump_path: &Path,
    exp_name: &str,
    job_id: Option<&str>,
    rng: &mut R,
) -> Result<PathBuf> {
    let exp_name = exp_name.trim();
    ensure!(!exp_name.is_empty(), "experiment name must not be empty");
    ensure!(
        main_dump_path.is_dir(),
        "main dump path {} is not a directory",
        main_dump_path.display()
    );

    let sweep_path = main_dump_path.join(exp_name);
    std::fs::create_dir_all(&sweep_path)
        .with_context(|| format!("failed to create {}", sweep_path.display()))?;

    let dump_path = match job_id {
        Some(job_id) => {
            ensure!(
                !job_id.is_empty() && job_id.chars().all(|c| c.is_ascii_digit()),
                "CHRONOS_JOB_ID must be numeric, got {job_id:?}"
            );
            let path = sweep_path.join(job_id);
            ensure!(!path.is_dir(), "{} already exists", path.display());
            path
        }
        None => loop {
            let name: String = (0..DUMP_FOLDER_LEN)
                .map(|_| DUMP_FOLDER_CHARS[rng.random_range(0..DUMP_FOLDER_CHARS.len())] as char)
                .collect();
            let path = sweep_path.join(name);
            if !path.is_dir() {
                break path;
            }
        },
    };

    std::fs::create_dir_all(&dump_path)
        .with_context(|| format!("failed to create {}", dump_path.display()))?;
    Ok(dump_path)
}

/// CPU for a negative GPU id, otherwise the requested CUDA device when available.
pub fn select_device(gpu_id: i32) -> Result<Device> {
    if gpu_id < 0 {
        return Ok(Device::Cpu);
    }
    Ok(Device::cuda_if_available(gpu_id as usize)?)
}

/// Log to stderr and to `<dump_path>/train.log`.
pub fn init_logging(dump_path: &Path) -> Result<()> {
    let log_path = dump_path.join("train.log");
    let file = File::create(&log_path)
        .with_context(|| format!("failed to create {}", log_path.display()))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .map_err(|e| anyhow!("failed to install logger: {e}"))?;
    Ok(())
}
