use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tryon_pipeline::api::server::serve;
use tryon_pipeline::edit::catalog::CategoryFamily;
use tryon_pipeline::edit::selection::Selection;
use tryon_pipeline::edit::EditableImage;
use tryon_pipeline::pipeline::PipelineController;
use tryon_pipeline::remote::health::HealthProbe;
use tryon_pipeline::remote::http::HttpEditService;
use tryon_pipeline::settings::{default_app_root, TryOnSettings};

#[derive(Parser)]
#[command(
    name = "tryon-pipeline",
    version,
    about = "Sequential virtual try-on edits against a remote image edit service"
)]
struct Cli {
    /// Settings TOML (default: config/tryon.settings.toml under the working directory).
    #[arg(long, global = true, value_name = "PATH")]
    settings: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP surface.
    Serve(ServeArgs),
    /// Apply edits to one image file and write the result.
    Apply(ApplyArgs),
    /// Probe the remote edit service.
    Health(HealthArgs),
}

#[derive(Args, Default)]
struct ServeArgs {
    #[arg(long, value_name = "ADDR")]
    bind: Option<SocketAddr>,
}

#[derive(Args)]
struct ApplyArgs {
    #[arg(long, value_name = "FILE")]
    image: PathBuf,

    /// category[:key=value,...], e.g. lipstick:shade=Medium,intensity=70
    #[arg(long = "op", value_name = "SPEC", required = true)]
    ops: Vec<String>,

    #[arg(long, value_name = "FILE")]
    output: PathBuf,

    #[arg(long)]
    family: Option<CategoryFamily>,
}

#[derive(Args)]
struct HealthArgs {
    /// Attempts before giving up, spaced by the configured health interval.
    #[arg(long, default_value_t = 1)]
    wait: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli = Cli::parse();
    let settings = TryOnSettings::load(default_app_root().as_path(), cli.settings.as_deref())?;

    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => run_serve(settings, args).await,
        Command::Apply(args) => run_apply(settings, args).await,
        Command::Health(args) => run_health(settings, args).await,
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run_serve(
    mut settings: TryOnSettings,
    args: ServeArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(bind) = args.bind {
        settings.bind = bind;
    }
    serve(settings).await?;
    Ok(())
}

async fn run_apply(
    mut settings: TryOnSettings,
    args: ApplyArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(family) = args.family {
        settings.family = family;
    }
    let mut selection = Selection::new(settings.family);
    for spec in &args.ops {
        apply_op_spec(&mut selection, spec.as_str())?;
    }

    let base = EditableImage::from_bytes(std::fs::read(&args.image)?)?;
    let service = HttpEditService::new(settings.edit_service_config())?;
    let controller = PipelineController::new(Arc::new(service), settings.family);

    match controller.apply_all(base, selection.operations()).await {
        Ok(image) => {
            std::fs::write(&args.output, image.bytes())?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "ok": true,
                    "output": args.output.display().to_string(),
                    "image": image.summary(),
                    "snapshot": controller.snapshot(),
                }))?
            );
            Ok(())
        }
        Err(error) => {
            if let Some(failure) = error.step_failure().filter(|f| f.step > 1) {
                std::fs::write(&args.output, failure.last_good.bytes())?;
                eprintln!(
                    "kept last good image from step {} in {}",
                    failure.step - 1,
                    args.output.display()
                );
            }
            Err(error.into())
        }
    }
}

async fn run_health(
    settings: TryOnSettings,
    args: HealthArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let probe = HealthProbe::new(
        &settings.api_base,
        settings.health_path.as_str(),
        settings.request_timeout,
    )?;
    let status = probe
        .poll_until_connected(args.wait, settings.health_interval)
        .await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn apply_op_spec(
    selection: &mut Selection,
    spec: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let (category, raw_params) = spec.split_once(':').unwrap_or((spec, ""));
    let category = category.trim();
    if category.is_empty() {
        return Err(std::io::Error::other(format!("Missing category in --op '{spec}'")).into());
    }

    let mut params = BTreeMap::new();
    for pair in raw_params.split(',').map(str::trim).filter(|v| !v.is_empty()) {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(std::io::Error::other(format!(
                "Expected key=value in --op '{spec}', got '{pair}'"
            ))
            .into());
        };
        params.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    if let Some(shade) = params.remove("shade") {
        selection.pick_shade(category, shade.as_str())?;
    } else if let Some(color) = params.remove("color") {
        selection.pick_color(category, color.as_str())?;
    } else if selection.family() == CategoryFamily::Jewelry || params.contains_key("overlay_url") {
        selection.pick_overlay(category, params.get("overlay_url").map(String::as_str))?;
    } else {
        let first_shade = selection
            .family()
            .lookup(category)
            .and_then(|spec| spec.shades.first())
            .map(|shade| shade.name)
            .unwrap_or_default();
        selection.pick_shade(category, first_shade)?;
    }
    params.remove("overlay_url");

    if let Some(raw) = params.remove("intensity") {
        let percent = raw.parse::<u8>().map_err(|e| {
            std::io::Error::other(format!("Invalid intensity '{raw}' in --op '{spec}': {e}"))
        })?;
        selection.set_intensity(category, percent)?;
    }

    if let Some(unknown) = params.keys().next() {
        return Err(
            std::io::Error::other(format!("Unknown key '{unknown}' in --op '{spec}'")).into(),
        );
    }
    Ok(())
}
