//! Run report and exit policy

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use storyshots_common::Result;

use crate::runner::RunResult;

/// Whether a run passed and the process status it maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub success: bool,
    pub exit_code: i32,
}

impl Verdict {
    pub const PASSED: Verdict = Verdict {
        success: true,
        exit_code: 0,
    };

    pub const FAILED: Verdict = Verdict {
        success: false,
        exit_code: 1,
    };

    /// Verdict when the catalog could not be loaded at all
    pub fn load_failed() -> Self {
        Self::FAILED
    }
}

/// Success iff nothing errored and no snapshot is obsolete
pub fn decide(result: &RunResult) -> Verdict {
    if result.failures() == 0 {
        Verdict::PASSED
    } else {
        Verdict::FAILED
    }
}

#[derive(Serialize)]
struct ResultsFile<'a> {
    timestamp: DateTime<Utc>,
    success: bool,
    #[serde(flatten)]
    result: &'a RunResult,
}

/// Write the run result as pretty JSON
pub fn write_results(result: &RunResult, path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let file = ResultsFile {
        timestamp: Utc::now(),
        success: decide(result).success,
        result,
    };
    let json = serde_json::to_string_pretty(&file)?;
    std::fs::write(path, json)?;

    info!("Results written to: {}", path.display());
    Ok(path.to_path_buf())
}
