use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use reqchain_engine::{run_chain, RunOptions, RunSummary};
use reqchain_transport::{HttpOptions, HttpTransport};

/// Flags of the `run` command.
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub timeout_ms: u64,
    pub flush_every: usize,
    pub insecure: bool,
    pub json: bool,
}

/// Execute the `run` command: run the chain and print a summary.
pub async fn execute(chain_path: &Path, args: &RunArgs) -> Result<()> {
    let options = RunOptions::default()
        .with_request_timeout(Duration::from_millis(args.timeout_ms))
        .with_flush_every(args.flush_every);
    let http = HttpOptions {
        accept_invalid_certs: args.insecure,
    };
    let transport = HttpTransport::new(&http, tokio::runtime::Handle::current())
        .context("Failed to initialize HTTP transport")?;

    tracing::info!(
        chain = %chain_path.display(),
        timeout_ms = args.timeout_ms,
        flush_every = options.flush_every,
        insecure = args.insecure,
        "Running chain"
    );

    let summary = run_chain(chain_path, &options, Arc::new(transport))
        .await
        .with_context(|| format!("Chain run failed: {}", chain_path.display()))?;

    for line in summary_lines(chain_path, &summary) {
        println!("{line}");
    }
    if args.json {
        println!("{}", serde_json::to_string(&summary)?);
    }
    Ok(())
}

fn summary_lines(chain_path: &Path, summary: &RunSummary) -> Vec<String> {
    vec![
        format!("Chain '{}' completed.", chain_path.display()),
        format!("  Records:             {}", summary.records),
        format!("  Executed:            {}", summary.executed),
        format!("  Transport failures:  {}", summary.transport_failures),
        format!("  Resolution warnings: {}", summary.resolution_warnings),
        format!("  Records written:     {}", summary.records_written),
        format!("  Duration:            {:.2}s", summary.duration_secs),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_reports_counts() {
        let summary = RunSummary {
            records: 4,
            parsed: 4,
            executed: 3,
            transport_failures: 1,
            resolution_warnings: 2,
            records_written: 4,
            duration_secs: 1.234,
        };
        let lines = summary_lines(Path::new("flow.chain"), &summary);
        assert_eq!(lines[0], "Chain 'flow.chain' completed.");
        assert!(lines.iter().any(|l| l.ends_with("Transport failures:  1")));
        assert!(lines.iter().any(|l| l.ends_with("1.23s")));
        assert_eq!(lines.len(), 7);
    }
}
