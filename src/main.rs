use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use nese_ingest_lib::{
    GeminiVisionClient, IngestConfig, IngestionPipeline, SourceFile, UnavailablePdfBackend,
    VisionFailurePolicy, VisionTranscriber,
};

const USAGE: &str = "usage: nese-ingest <file> [--no-vision] [--keep-native] [--json]";

struct CliArgs {
    path: String,
    no_vision: bool,
    keep_native: bool,
    json: bool,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut path = None;
    let mut no_vision = false;
    let mut keep_native = false;
    let mut json = false;

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--no-vision" => no_vision = true,
            "--keep-native" => keep_native = true,
            "--json" => json = true,
            "-h" | "--help" => bail!(USAGE),
            flag if flag.starts_with("--") => bail!("unknown flag {}\n{}", flag, USAGE),
            _ if path.is_some() => bail!("only one file can be ingested at a time\n{}", USAGE),
            _ => path = Some(arg),
        }
    }

    Ok(CliArgs {
        path: path.context(USAGE)?,
        no_vision,
        keep_native,
        json,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志写到 stderr，stdout 只输出结果
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let cfg = IngestConfig::from_env_and_file()?;

    let pipeline = match IngestionPipeline::with_pdfium(cfg.clone()).await {
        Ok(pipeline) => pipeline,
        Err(err) => {
            warn!("[Ingest] {}; PDF files will fail to extract", err);
            IngestionPipeline::new(cfg.clone(), Arc::new(UnavailablePdfBackend::new(err.to_string())))?
        }
    };

    let transcriber = if args.no_vision {
        None
    } else {
        match GeminiVisionClient::new(cfg.vision.clone()) {
            Ok(client) => Some(client),
            Err(err) => {
                warn!("[Vision] {}; scanned PDFs will keep native text only", err);
                None
            }
        }
    };

    let policy = if args.keep_native {
        VisionFailurePolicy::KeepNativeText
    } else {
        VisionFailurePolicy::Fail
    };

    let file = SourceFile::from_path(&args.path).await?;
    let outcome = pipeline
        .extract_with_recovery(
            &file,
            transcriber.as_ref().map(|t| t as &dyn VisionTranscriber),
            policy,
        )
        .await?;

    info!(
        "[Ingest] is_scan={}, vision_used={}",
        outcome.result.is_scan, outcome.vision_used
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", outcome.labeled(file.name()));
    }
    Ok(())
}
