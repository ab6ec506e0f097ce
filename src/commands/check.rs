use anyhow::{Context, Result};
use std::path::Path;

use imagescan::config::Config;
use imagescan::task::{parse_interval, parse_tag_spec, Registry, ScanConfig};

/// Print the loaded configuration and optionally lint a scan config file
///
/// The service config was already validated while loading.
pub async fn check(config: &Config, scan_config: Option<&Path>) -> Result<()> {
    println!("Configuration OK");
    println!("  Ledger backend: {:?}", config.database.backend);
    println!(
        "  Workers: {} (queue capacity {})",
        config.execution.concurrency, config.execution.queue_capacity
    );
    for community in &config.communities {
        println!(
            "  Owner {}: {} {}/{}@{}",
            community.name,
            community.platform,
            community.scan_config_location.repo,
            community.scan_config_location.path,
            community.scan_config_location.git_ref
        );
    }

    let Some(path) = scan_config else {
        return Ok(());
    };

    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let scan_config = ScanConfig::from_yaml_bytes(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    let problems = lint(&scan_config);
    println!(
        "Scan config {}: {} repo declarations, {} pinned tags",
        path.display(),
        scan_config.repos.len(),
        scan_config.images.iter().map(|i| i.tags.len()).sum::<usize>()
    );
    for problem in &problems {
        println!("  {problem}");
    }

    if !problems.is_empty() {
        anyhow::bail!("{} problems found in {}", problems.len(), path.display());
    }
    Ok(())
}

/// Declarations that reconciliation would skip
fn lint(config: &ScanConfig) -> Vec<String> {
    let defaults = &config.scanner.global;
    let interval_of = |own: &str| {
        parse_interval(own).or_else(|e| parse_interval(&defaults.default_interval).map_err(|_| e))
    };

    let mut problems = Vec::new();

    for repo in &config.repos {
        if let Err(e) = repo.registry.parse::<Registry>() {
            problems.push(format!("repo {}: {e}", repo.namespace));
        }
        if let Err(e) = interval_of(&repo.interval) {
            problems.push(format!("repo {}: {e}", repo.namespace));
        }
    }

    for tag in config.images.iter().flat_map(|i| &i.tags) {
        if tag.disable {
            continue;
        }
        if let Err(e) = parse_tag_spec(&tag.tag) {
            problems.push(format!("tag {}: {e}", tag.tag));
        }
        if let Err(e) = interval_of(&tag.interval) {
            problems.push(format!("tag {}: {e}", tag.tag));
        }
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lint_reports_bad_declarations() {
        let config = ScanConfig::from_yaml(
            r#"
scanner:
  global:
    default_interval: 1d
repos:
  - namespace: openeuler
    registry: hub.example.com
images:
  - image: nginx
    tags:
      - tag: docker.io/library/nginx:1.25
      - tag: nginx
      - tag: docker.io/library/nginx:1.24
        interval: 10x
"#,
        )
        .unwrap();

        let problems = lint(&config);
        // A bad own interval falls back to the default, so only two problems remain
        assert_eq!(problems.len(), 2, "{problems:?}");
        assert!(problems[0].starts_with("repo openeuler"));
        assert!(problems[1].starts_with("tag nginx"));
    }
}
