use anyhow::{bail, Context};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::Path;

/// Body of any `/api/dump` reply, success or failure.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DumpReply {
    success: bool,
    #[serde(default)]
    dumped_code: String,
    stats: Option<Stats>,
    #[serde(default)]
    console_output: String,
    warnings: Option<String>,
    error: Option<String>,
    details: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Stats {
    total_lines: u64,
    remote_calls: u64,
    suspicious_strings: u64,
}

pub struct ClientCli {
    inner: reqwest::Client,
    base: String,
}

impl ClientCli {
    pub fn connect(server_addr: &str) -> Self {
        Self {
            inner: reqwest::Client::new(),
            base: server_addr.trim_end_matches('/').to_string(),
        }
    }

    pub async fn health(&self) -> anyhow::Result<()> {
        let url = format!("{}/api/health", self.base);
        let body: Value = self
            .inner
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?
            .error_for_status()?
            .json()
            .await?;
        println!("{}", serde_json::to_string_pretty(&body)?);
        Ok(())
    }

    /// Submit `file`, then write the dumped code to `out` (or stdout).
    pub async fn dump(
        &self,
        file: &Path,
        key: Option<&str>,
        place_id: Option<&str>,
        out: Option<&Path>,
    ) -> anyhow::Result<()> {
        let code = tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("reading {}", file.display()))?;
        let url = format!("{}/api/dump", self.base);
        let reply: DumpReply = self
            .inner
            .post(&url)
            .json(&dump_body(code, key, place_id))
            .send()
            .await
            .with_context(|| format!("POST {}", url))?
            .json()
            .await
            .context("server sent a malformed reply")?;

        if !reply.success {
            let error = reply.error.unwrap_or_else(|| "unknown error".into());
            match reply.details {
                Some(details) => bail!("{}: {}", error, details.trim_end()),
                None => bail!("{}", error),
            }
        }

        if !reply.console_output.is_empty() {
            eprint!("{}", reply.console_output);
        }
        if let Some(warnings) = reply.warnings {
            eprintln!("warnings:\n{}", warnings.trim_end());
        }
        if let Some(stats) = reply.stats {
            eprintln!(
                "lines: {}, remotes: {}, suspicious strings: {}",
                stats.total_lines, stats.remote_calls, stats.suspicious_strings
            );
        }
        match out {
            Some(path) => {
                tokio::fs::write(path, &reply.dumped_code)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
                eprintln!("wrote {}", path.display());
            }
            None => print!("{}", reply.dumped_code),
        }
        Ok(())
    }
}

fn dump_body(code: String, key: Option<&str>, place_id: Option<&str>) -> Value {
    let mut options = Map::new();
    if let Some(key) = key {
        options.insert("key".into(), key.into());
    }
    if let Some(place_id) = place_id {
        let value = match place_id.parse::<u64>() {
            Ok(n) => n.into(),
            Err(_) => place_id.into(),
        };
        options.insert("placeId".into(), value);
    }
    json!({ "code": code, "options": options })
}
