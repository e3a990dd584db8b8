//! Layout command implementation.

use crate::SyncArgs;
use serde::Serialize;
use unionsync_engine::Layout;

/// One derived path.
#[derive(Debug, Serialize)]
pub struct LayoutEntry {
    /// What the path is used for.
    pub name: &'static str,
    /// The path.
    pub path: String,
}

/// Runs the layout command.
pub fn run(args: &SyncArgs, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let layout = Layout::new(&args.lower, &args.upper, &args.mount, args.compute_server_id)?;
    let entries: Vec<LayoutEntry> = layout
        .describe()
        .into_iter()
        .map(|(name, path)| LayoutEntry { name, path })
        .collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        "text" => {
            let width = entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
            for entry in &entries {
                println!("{:width$}  {}", entry.name, entry.path);
            }
        }
        other => return Err(format!("unknown format: {other}").into()),
    }
    Ok(())
}
