// ABOUTME: Hosts command implementation.
// ABOUTME: Lists the fleet with tags and each host's last known good artifact.

use keel::config::Config;
use keel::error::Result;
use keel::output::Output;
use keel::types::TagFilter;
use serde::Serialize;

#[derive(Serialize)]
struct HostRow<'a> {
    id: &'a str,
    address: String,
    tags: &'a keel::types::Tags,
    last_good: Option<&'a str>,
    last_outcome: Option<String>,
}

pub fn hosts(config: Config, filter: TagFilter, output: Output) -> Result<()> {
    let ledger = config.open_ledger()?;
    let registry = config.registry(&ledger)?;
    let hosts = registry.list_by_tag(&filter);

    if hosts.is_empty() {
        output.warning(&format!("no hosts match '{filter}'"));
        return Ok(());
    }

    for host in &hosts {
        let last_outcome = ledger
            .history(&host.id)
            .last()
            .map(|d| format!("{} {}", d.target.id, d.outcome));
        let row = HostRow {
            id: host.id.as_str(),
            address: host.address.to_string(),
            tags: &host.tags,
            last_good: host.last_good.as_ref().map(|a| a.id.as_str()),
            last_outcome,
        };

        if output.is_json() {
            output.record(&row);
            continue;
        }

        let tags = host
            .tags
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        output.success(&format!(
            "{:<20} {:<28} {:<24} last good: {}{}",
            row.id,
            row.address,
            tags,
            row.last_good.unwrap_or("-"),
            row.last_outcome
                .as_deref()
                .map(|o| format!(" (last: {o})"))
                .unwrap_or_default(),
        ));
    }
    Ok(())
}
