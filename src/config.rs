use crate::ignore_policy::IgnorePolicy;
use crate::rewriter::RewriteConfig;
use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use std::{env, fs, path::Path};
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub webserver: Webserver,
    pub proxy_port: u16,
    #[serde(default)]
    pub ignore_images: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct Webserver {
    pub port: u16,
    #[serde(default)]
    pub tls: Option<Tls>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tls {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl Config {
    pub fn rewrite_config(&self) -> Result<RewriteConfig> {
        if self.proxy_port == 0 {
            bail!("proxyPort must not be 0");
        }
        let ignore_policy = IgnorePolicy::new(&self.ignore_images)
            .context("Failed to compile ignoreImages patterns")?;
        if ignore_policy.is_empty() {
            info!("Rewriting all images through proxy port {}", self.proxy_port);
        } else {
            info!(
                "Rewriting images through proxy port {}, ignoring {} patterns",
                self.proxy_port,
                ignore_policy.len()
            );
        }
        Ok(RewriteConfig {
            proxy_port: self.proxy_port,
            ignore_policy,
        })
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    info!("Loading config from file {}", path.as_ref().display());
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;

    Ok(config)
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error naming the first missing variable.
fn expand_env_vars(input: &str) -> Result<String> {
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    let mut result = String::with_capacity(input.len());
    let mut last = 0;
    for caps in re.captures_iter(input) {
        let (Some(placeholder), Some(var_name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = env::var(var_name.as_str())
            .with_context(|| format!("Missing environment variable: {}", var_name.as_str()))?;
        result.push_str(&input[last..placeholder.start()]);
        result.push_str(&value);
        last = placeholder.end();
    }
    result.push_str(&input[last..]);

    Ok(result)
}
