use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand, ValueEnum};
use log::error;
use slidecap::cdp::CdpSurface;
use slidecap::progress::ProgressObserver;
use slidecap::server::{self, RenderService, ServiceConfig, SurfaceRenderer};
use slidecap::{CaptureConfig, FailurePolicy, LayeringStrategy, OutputFormat, Pipeline, Progress, SanitizePolicy};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "slidecap", version, about = "Capture HTML slides as a PNG archive or a PDF")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture every slide of an HTML document
    Capture(CaptureArgs),
    /// Run the HTTP render service
    Serve(ServiceConfig),
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Strict,
    Allowlist,
}

#[derive(clap::Args)]
struct CaptureArgs {
    /// HTML file, or `-` for stdin
    input: String,
    /// Output path; defaults to `slides.zip` or `slides.pdf`
    #[arg(short, long)]
    out: Option<PathBuf>,
    /// JSON config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long)]
    scale: Option<f64>,
    /// Settle delay after scripts, in milliseconds
    #[arg(long)]
    settle_ms: Option<u64>,
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,
    #[arg(long, value_enum)]
    layering: Option<LayeringStrategy>,
    /// Stop at the first failed slide
    #[arg(long)]
    fail_fast: bool,
    /// Base URL for relative script sources
    #[arg(long)]
    base_url: Option<String>,
    /// Disable the Chrome sandbox (needed in some containers)
    #[arg(long)]
    no_sandbox: bool,
    /// On malformed input, print a correction prompt instead of the bare error
    #[arg(long)]
    prompt: bool,
    /// Print a JSON report with the artifact inlined as base64
    #[arg(long)]
    json: bool,
}

impl CaptureArgs {
    fn config(&self) -> slidecap::Result<CaptureConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| slidecap::Error::ConfigError(format!("{}: {}", path.display(), e)))?;
                CaptureConfig::from_json(&text)?
            }
            None => CaptureConfig::default(),
        };
        if let Some(format) = self.format {
            config.format = format;
        }
        if let Some(width) = self.width {
            config.viewport.width = width;
        }
        if let Some(height) = self.height {
            config.viewport.height = height;
        }
        if let Some(scale) = self.scale {
            config.scale = scale;
        }
        if let Some(ms) = self.settle_ms {
            config.settle_delay_ms = ms;
        }
        match self.policy {
            Some(PolicyArg::Strict) => config.sanitize = SanitizePolicy::Strict,
            Some(PolicyArg::Allowlist) => config.sanitize = SanitizePolicy::default(),
            None => {}
        }
        if let Some(layering) = self.layering {
            config.layering = layering;
        }
        if self.fail_fast {
            config.failure_policy = FailurePolicy::Strict;
        }
        if self.base_url.is_some() {
            config.base_url = self.base_url.clone();
        }
        if self.no_sandbox {
            config.sandbox = false;
        }
        config.validate()?;
        Ok(config)
    }

    fn read_input(&self) -> std::io::Result<String> {
        if self.input == "-" {
            let mut html = String::new();
            std::io::stdin().read_to_string(&mut html)?;
            Ok(html)
        } else {
            std::fs::read_to_string(&self.input)
        }
    }
}

async fn capture(args: CaptureArgs) -> ExitCode {
    let config = match args.config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
    };
    let html = match args.read_input() {
        Ok(h) => h,
        Err(e) => {
            eprintln!("failed to read {}: {}", args.input, e);
            return ExitCode::from(2);
        }
    };
    let out = args
        .out
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("slides.{}", config.format.extension())));

    let pipeline = match Pipeline::launch(config).await {
        Ok(p) => p,
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let observer: ProgressObserver = Arc::new(|p: Progress| eprintln!("[{}/{}] slide captured", p.current, p.total));
    let outcome = pipeline.run_with_progress(&html, Some(observer)).await;
    if let Err(e) = pipeline.close().await {
        log::warn!("failed to close surface: {}", e);
    }

    let result = match outcome {
        Ok(r) => r,
        Err(e) => {
            match e.diagnostic() {
                Some(diagnostic) if args.prompt => println!("{}", diagnostic.correction_prompt()),
                _ => eprintln!("{}", e),
            }
            return ExitCode::FAILURE;
        }
    };

    for warning in result.warnings() {
        eprintln!("warning: {}", warning);
    }
    if args.json {
        let report = serde_json::json!({
            "success": result.success(),
            "message": result.message(),
            "format": result.format(),
            "buffer": STANDARD.encode(result.buffer()),
        });
        println!("{}", report);
    }
    if let Err(e) = std::fs::write(&out, result.buffer()) {
        eprintln!("failed to write {}: {}", out.display(), e);
        return ExitCode::FAILURE;
    }
    eprintln!("{} -> {}", result.message(), out.display());
    ExitCode::SUCCESS
}

async fn serve(config: ServiceConfig) -> ExitCode {
    let renderer = SurfaceRenderer::<CdpSurface>::new(config.surface_config());
    match server::serve(RenderService::new(config, renderer)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Capture(args) => capture(args).await,
        Command::Serve(config) => serve(config).await,
    }
}
