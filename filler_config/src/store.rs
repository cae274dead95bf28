//! TOML file persistence for tuned PID gains.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use filler_traits::{BoxError, ParameterStore, StoredGains};
use serde::{Deserialize, Serialize};

/// Write `bytes` to a sibling temp file and rename it over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("new");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)
}

#[derive(Debug, Serialize, Deserialize)]
struct GainsFile {
    pid: GainsToml,
}

#[derive(Debug, Serialize, Deserialize)]
struct GainsToml {
    kp: f32,
    ki: f32,
    kd: f32,
}

/// Stores gains as
///
/// ```toml
/// [pid]
/// kp = 3.06
/// ki = 0.61
/// kd = 3.82
/// ```
#[derive(Debug, Clone)]
pub struct FileParameterStore {
    path: PathBuf,
}

impl FileParameterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ParameterStore for FileParameterStore {
    fn load_pid(&self) -> Result<Option<StoredGains>, BoxError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Box::new(e)),
        };
        if text.trim().is_empty() {
            return Ok(None);
        }
        let file: GainsFile = toml::from_str(&text)?;
        let g = file.pid;
        if !(g.kp.is_finite() && g.ki.is_finite() && g.kd.is_finite()) {
            return Err(format!("non-finite gains in {}", self.path.display()).into());
        }
        Ok(Some(StoredGains {
            kp: g.kp,
            ki: g.ki,
            kd: g.kd,
        }))
    }

    fn save_pid(&mut self, gains: &StoredGains) -> Result<(), BoxError> {
        let file = GainsFile {
            pid: GainsToml {
                kp: gains.kp,
                ki: gains.ki,
                kd: gains.kd,
            },
        };
        let text = toml::to_string(&file)?;
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        write_atomic(&self.path, text.as_bytes())?;
        Ok(())
    }
}
