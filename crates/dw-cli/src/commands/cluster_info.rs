//! Show what the cluster API reports about the cluster under test.

use std::io::Write;

use anyhow::{Context, Result};

use crate::Config;

pub fn run<W: Write>(writer: &mut W, config: &Config) -> Result<()> {
    let client = config
        .cluster_client()
        .context("invalid cluster configuration")?
        .ok_or_else(|| anyhow::anyhow!("missing API server (set DW_API_SERVER or config.toml)"))?;

    let runtime = tokio::runtime::Runtime::new().context("failed to initialize tokio runtime")?;
    let (context, etcd_revision) = runtime.block_on(async {
        let context = client
            .cluster_context()
            .await
            .context("failed to fetch cluster infrastructure")?;
        let revision = client
            .etcd_revision()
            .await
            .context("failed to fetch etcd revision")?;
        anyhow::Ok((context, revision))
    })?;

    let output = serde_json::json!({
        "api_server": client.api_server(),
        "platform": context.platform,
        "topology": context.topology,
        "etcd_revision": etcd_revision,
    });
    writeln!(writer, "{}", serde_json::to_string_pretty(&output)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_api_server() {
        let mut output = Vec::new();
        let err = run(&mut output, &Config::default()).unwrap_err();
        assert!(err.to_string().contains("missing API server"));
    }

    #[test]
    fn rejects_invalid_api_server() {
        let config = Config {
            api_server: Some("ftp://api.example.com".to_string()),
            ..Config::default()
        };
        let mut output = Vec::new();
        let err = run(&mut output, &config).unwrap_err();
        assert!(err.to_string().contains("invalid cluster configuration"));
    }

    #[test]
    fn unreachable_server_is_an_error() {
        let config = Config {
            api_server: Some("http://127.0.0.1:1".to_string()),
            ..Config::default()
        };
        let mut output = Vec::new();
        let err = run(&mut output, &config).unwrap_err();
        assert!(err.to_string().contains("failed to fetch cluster infrastructure"));
        assert!(output.is_empty());
    }
}
