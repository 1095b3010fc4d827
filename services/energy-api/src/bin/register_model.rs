//! Import a model artifact into the model store.
//!
//! Usage: `register-model <artifact.json|artifact.onnx> [name]`. The store root and
//! default name come from the same configuration as the server.

use anyhow::{anyhow, Context, Result};
use energy_api::provider::{default_metadata, load_artifact};
use energy_core::{init_tracing, load_config, ModelFormat, ModelStore, ModelTag};
use std::path::PathBuf;
use tracing::info;

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let artifact = args
        .next()
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("usage: register-model <artifact.json|artifact.onnx> [name]"))?;
    let cfg = load_config("register-model")?;
    init_tracing(&cfg.service_name, &cfg.log_level, cfg.json_log)?;

    let name = match args.next() {
        Some(n) => n,
        None => ModelTag::parse(&cfg.model_tag)?.name,
    };
    let format = ModelFormat::from_path(&artifact)
        .ok_or_else(|| anyhow!("cannot infer model format of {} (expected .json or .onnx)", artifact.display()))?;
    let metadata = default_metadata();

    // refuse artifacts the server could not load
    let bytes = std::fs::read(&artifact).with_context(|| format!("reading {}", artifact.display()))?;
    load_artifact(&bytes, &artifact, format, &metadata)?;

    let store = ModelStore::open(&cfg.model_store)?;
    let record = store.register(&name, &artifact, format, metadata)?;
    info!(tag = %record.tag(), store = %store.root().display(), "artifact registered");
    println!("{}", record.tag());
    Ok(())
}
