use std::{env, path::PathBuf};

use anyhow::{Context, Result, anyhow, bail};

use crate::types::{CollectionKey, RunRequest, UnitId};

const USAGE: &str = "usage: bulk-annotator [--config <path>] --collection <key> \
[--units <id,id,...>] [--dry-run | --commit]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub config_path: PathBuf,
    pub collection_key: CollectionKey,
    pub unit_ids: Option<Vec<UnitId>>,
    pub dry_run: Option<bool>,
}

impl CliArgs {
    pub fn from_env() -> Result<Self> {
        let default_config = env::current_dir()?.join("bulk-annotator.jsonc");
        parse_args(env::args().skip(1), default_config)
    }

    pub fn run_request(&self) -> RunRequest {
        RunRequest {
            collection_key: self.collection_key.clone(),
            requested_unit_ids: self.unit_ids.clone(),
            requested_dry_run: self.dry_run,
        }
    }
}

pub fn parse_args(
    args: impl IntoIterator<Item = String>,
    default_config: PathBuf,
) -> Result<CliArgs> {
    let mut config_path = None;
    let mut collection_key = None;
    let mut unit_ids = None;
    let mut dry_run = None;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = Some(PathBuf::from(expect_value(&mut args, &arg)?)),
            "--collection" => collection_key = Some(expect_value(&mut args, &arg)?),
            "--units" => unit_ids = Some(parse_unit_ids(&expect_value(&mut args, &arg)?)?),
            "--dry-run" | "--commit" => {
                let requested = arg == "--dry-run";
                if dry_run.is_some_and(|current| current != requested) {
                    bail!("--dry-run and --commit are mutually exclusive\n{USAGE}");
                }
                dry_run = Some(requested);
            }
            other => bail!("unexpected argument '{other}'\n{USAGE}"),
        }
    }

    let collection_key = collection_key
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| anyhow!("--collection is required\n{USAGE}"))?;

    Ok(CliArgs {
        config_path: config_path.unwrap_or(default_config),
        collection_key,
        unit_ids,
        dry_run,
    })
}

fn expect_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next()
        .filter(|value| !value.starts_with("--"))
        .ok_or_else(|| anyhow!("{flag} expects a value\n{USAGE}"))
}

fn parse_unit_ids(raw: &str) -> Result<Vec<UnitId>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<UnitId>()
                .with_context(|| format!("invalid unit id '{part}'"))
        })
        .collect()
}
