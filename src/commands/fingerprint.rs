use anyhow::{Context, Result};

use crate::cli::FingerprintArgs;
use encore::cli_utils::encore_prefix;
use encore::fingerprint::{Args, Fingerprint, FunctionIdentity};

pub fn run(args: FingerprintArgs) -> Result<()> {
    let identity = if args.versioned {
        FunctionIdentity::versioned(args.name.as_str(), &args.source)
    } else {
        FunctionIdentity::from_source(args.name.as_str(), &args.source)
    };

    let call_args = build_args(&args.args, &args.kwargs)?;
    let fingerprint = Fingerprint::compute(&identity, &call_args)?;

    tracing::debug!(
        function = %identity.name(),
        logic_hash = %identity.logic_hash(),
        "computed fingerprint"
    );

    if args.full {
        println!("{}", fingerprint.as_str());
    } else {
        println!("{} {}", encore_prefix(), fingerprint);
    }

    Ok(())
}

fn build_args(positional: &[String], keyword: &[String]) -> Result<Args> {
    let mut args = Args::new();

    for raw in positional {
        let value: serde_json::Value = serde_json::from_str(raw)
            .with_context(|| format!("--arg is not valid JSON: {}", raw))?;
        args = args.arg(&value)?;
    }

    for raw in keyword {
        let (name, value) = raw
            .split_once('=')
            .with_context(|| format!("--kwarg must be name=JSON, got: {}", raw))?;
        let value: serde_json::Value = serde_json::from_str(value)
            .with_context(|| format!("--kwarg `{}` is not valid JSON: {}", name, value))?;
        args = args.kwarg(name, &value)?;
    }

    Ok(args)
}
