//! Once command implementation.

use crate::SyncArgs;
use serde::Serialize;
use std::time::UNIX_EPOCH;
use unionsync_engine::SyncCycleResult;

/// Printable summary of one cycle.
#[derive(Debug, Serialize)]
pub struct CycleReport {
    /// Whiteouts reported to the project.
    pub whiteouts_reported: usize,
    /// Files sent to the project.
    pub pushed: usize,
    /// Outcome of the remote extraction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_outcome: Option<String>,
    /// Files unpacked from the project.
    pub pulled: u64,
    /// Project files skipped because the cached copy was newer.
    pub kept_newer: u64,
    /// Cached paths removed because the project deleted them.
    pub local_deletes: usize,
    /// New watermark, milliseconds since the epoch.
    pub watermark_ms: u128,
    /// Cycle duration in seconds.
    pub duration_secs: f64,
}

impl From<&SyncCycleResult> for CycleReport {
    fn from(result: &SyncCycleResult) -> Self {
        Self {
            whiteouts_reported: result.whiteouts_reported,
            pushed: result.pushed,
            push_outcome: result.push_outcome.map(|o| format!("{o:?}")),
            pulled: result.pulled,
            kept_newer: result.kept_newer,
            local_deletes: result.local_deletes,
            watermark_ms: result
                .watermark
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0),
            duration_secs: result.duration.as_secs_f64(),
        }
    }
}

/// Runs the once command.
pub fn run(args: &SyncArgs, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !matches!(format, "text" | "json") {
        return Err(format!("unknown format: {format}").into());
    }

    let engine = super::engine(args)?;
    let result = engine.sync();
    engine.close()?;
    let report = CycleReport::from(&result?);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Whiteouts reported: {}", report.whiteouts_reported);
        println!("Pushed:             {}", report.pushed);
        if let Some(outcome) = &report.push_outcome {
            println!("Push outcome:       {outcome}");
        }
        println!("Pulled:             {}", report.pulled);
        println!("Kept newer:         {}", report.kept_newer);
        println!("Local deletes:      {}", report.local_deletes);
        println!("Watermark (ms):     {}", report.watermark_ms);
        println!("Duration:           {:.3}s", report.duration_secs);
    }
    Ok(())
}
