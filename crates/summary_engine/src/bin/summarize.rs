use anyhow::{Context, Result};
use models::KaimemoAmount;
use std::env;
use std::fs;
use std::path::PathBuf;
use summary_engine::summarize;

/// Reads a JSON array of amount records and prints (or writes) the
/// weekly/monthly summary the API would return for them.
fn main() -> Result<()> {
    let records = env::args()
        .position(|a| a == "--records")
        .and_then(|i| env::args().nth(i + 1))
        .unwrap_or("records.json".to_string());
    let out = env::args()
        .position(|a| a == "--out")
        .and_then(|i| env::args().nth(i + 1));

    let records_path = PathBuf::from(&records);
    let raw = fs::read_to_string(&records_path)
        .with_context(|| format!("Reading records file: {}", records_path.display()))?;
    let records: Vec<KaimemoAmount> = serde_json::from_str(&raw)
        .with_context(|| format!("Parsing records JSON in {}", records_path.display()))?;

    let summary = summarize(&records)?;
    let json = serde_json::to_string_pretty(&summary)?;

    match out {
        Some(out) => {
            let out_path = PathBuf::from(&out);
            if let Some(parent) = out_path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(&out_path, json)?;
            println!(
                "Summarized {} records into {} months / {} weeks -> {}",
                records.len(),
                summary.monthly_summaries.len(),
                summary.weekly_summaries.len(),
                out_path.display()
            );
        }
        None => println!("{json}"),
    }

    Ok(())
}
