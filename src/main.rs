// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};

use layercake::config::{EngineConfig, TreeKind};
use layercake::document::{Path, Value};
use layercake::engine::{EngineContext, Evaluator};
use layercake::merge::merge_documents;

fn usage(program: &str) -> String {
    format!(
        "Usage: {} [options] <base.yml> [overlay.yml ...]\n\
         \n\
         Options:\n\
         \x20 --config <file>       engine configuration (YAML)\n\
         \x20 --define <path=value> satisfy a (( param )) declaration\n\
         \x20 --sequential          disable parallel wave execution\n\
         \x20 --cow                 use the copy-on-write document tree\n",
        program
    )
}

struct CliArgs {
    config_path: Option<PathBuf>,
    documents: Vec<PathBuf>,
    overrides: HashMap<String, Value>,
    sequential: bool,
    cow: bool,
}

fn parse_args(args: &[String]) -> anyhow::Result<CliArgs> {
    let mut parsed = CliArgs {
        config_path: None,
        documents: Vec::new(),
        overrides: HashMap::new(),
        sequential: false,
        cow: false,
    };
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let value = iter.next().context("--config requires a file path")?;
                parsed.config_path = Some(PathBuf::from(value));
            }
            "--define" => {
                let value = iter.next().context("--define requires path=value")?;
                let (path, raw) = value
                    .split_once('=')
                    .context("--define requires path=value")?;
                let value = serde_yaml::from_str::<serde_yaml::Value>(raw)
                    .map(|v| Value::from_yaml(&v))
                    .unwrap_or_else(|_| Value::String(raw.to_string()));
                parsed.overrides.insert(Path::parse(path).to_string(), value);
            }
            "--sequential" => parsed.sequential = true,
            "--cow" => parsed.cow = true,
            other if other.starts_with("--") => bail!("unknown option '{}'", other),
            _ => parsed.documents.push(PathBuf::from(arg)),
        }
    }
    Ok(parsed)
}

fn load_document(path: &PathBuf) -> anyhow::Result<Value> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let yaml: serde_yaml::Value = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Value::from_yaml(&yaml))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().cloned().unwrap_or_else(|| "layercake".into());
    if args.len() < 2 {
        eprintln!("{}", usage(&program));
        std::process::exit(1);
    }

    match run(&args[1..]).await {
        Ok(rendered) => {
            print!("{}", rendered);
        }
        Err(error) => {
            eprintln!("{}: {}", program, error);
            std::process::exit(1);
        }
    }
}

async fn run(args: &[String]) -> anyhow::Result<String> {
    let cli = parse_args(args)?;
    if cli.documents.is_empty() {
        bail!("at least one input document is required");
    }

    let mut config = EngineConfig::load(cli.config_path.as_deref())
        .map_err(|e| anyhow::anyhow!(e))?;
    if cli.sequential {
        config.parallel = false;
    }
    if cli.cow {
        config.tree = TreeKind::Cow;
    }

    let documents = cli
        .documents
        .iter()
        .map(load_document)
        .collect::<anyhow::Result<Vec<_>>>()?;
    let composite = merge_documents(documents).context("deep merge failed")?;

    let ctx = Arc::new(EngineContext::with_defaults(config));
    let evaluator = Evaluator::with_overrides(ctx.clone(), composite, cli.overrides);
    let resolved = match evaluator.run().await {
        Ok(resolved) => resolved,
        Err(error) => {
            ctx.persist();
            bail!("{}", error.diagnostic());
        }
    };
    ctx.persist();

    serde_yaml::to_string(&resolved.to_yaml()).context("failed to serialize output")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let args: Vec<String> = vec![
            "--sequential".into(),
            "--define".into(),
            "meta.size=3".into(),
            "base.yml".into(),
            "overlay.yml".into(),
        ];
        let cli = parse_args(&args).unwrap();
        assert!(cli.sequential);
        assert!(!cli.cow);
        assert_eq!(cli.documents.len(), 2);
        assert_eq!(cli.overrides.get("meta.size"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_unknown_option_rejected() {
        let args: Vec<String> = vec!["--bogus".into()];
        assert!(parse_args(&args).is_err());
    }
}
