use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use attend_core::verifier;
use attend_core::{Encoding, Extractor, ModelEmbedder};
use attend_hw::Camera;
use clap::{Parser, Subcommand};
use serde_json::json;

#[derive(Parser)]
#[command(name = "attend", about = "Attend face encoding and camera tools")]
struct Cli {
    /// Directory containing the detector and encoder models
    #[arg(long, global = true, env = "ATTEND_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the face encoding of a photo with exactly one face
    Encode {
        image: PathBuf,
    },
    /// Compare the face in a capture against an enrollment photo
    Compare {
        enrolled: PathBuf,
        capture: PathBuf,
    },
    /// List V4L2 capture devices
    Cameras,
    /// Save one frame from a camera
    Snapshot {
        #[arg(short, long, default_value = "/dev/video0", env = "ATTEND_CAMERA_DEVICE")]
        device: String,
        out: PathBuf,
    },
}

fn load_extractor(model_dir: Option<PathBuf>) -> Result<Extractor<ModelEmbedder>> {
    let dir = model_dir.unwrap_or_else(attend_core::default_model_dir);
    let embedder = ModelEmbedder::load(&dir)
        .with_context(|| format!("failed to load models from {}", dir.display()))?;
    Ok(Extractor::new(embedder))
}

fn encode_file(extractor: &mut Extractor<ModelEmbedder>, path: &Path) -> Result<Encoding> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    extractor
        .extract(&bytes)
        .map_err(|reason| anyhow::anyhow!("{}: {reason}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Encode { image } => {
            let mut extractor = load_extractor(cli.model_dir)?;
            let encoding = encode_file(&mut extractor, &image)?;
            if cli.json {
                println!("{}", json!({ "dim": encoding.dim(), "encoding": encoding.values }));
            } else {
                println!("{encoding}");
            }
        }
        Commands::Compare { enrolled, capture } => {
            let mut extractor = load_extractor(cli.model_dir)?;
            let stored = encode_file(&mut extractor, &enrolled)?;
            let captured = encode_file(&mut extractor, &capture)?;
            let outcome = verifier::compare(&stored, &captured)?;
            if cli.json {
                println!(
                    "{}",
                    json!({
                        "matched": outcome.matched,
                        "distance": outcome.distance,
                        "threshold": attend_core::MATCH_THRESHOLD,
                        "status": outcome.status(),
                    })
                );
            } else {
                println!("{}", outcome.status());
            }
        }
        Commands::Cameras => {
            let devices = Camera::list_devices();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("No capture devices found");
            } else {
                for d in &devices {
                    println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
                }
            }
        }
        Commands::Snapshot { device, out } => {
            let camera = Camera::open(&device)?;
            let frame = camera.capture_frame()?;
            if frame.is_dark() {
                tracing::warn!(brightness = frame.avg_brightness(), "captured frame is very dark");
            }
            frame
                .image
                .save(&out)
                .with_context(|| format!("failed to write {}", out.display()))?;
            if cli.json {
                println!(
                    "{}",
                    json!({
                        "device": device,
                        "path": out.display().to_string(),
                        "width": frame.image.width(),
                        "height": frame.image.height(),
                        "sequence": frame.sequence,
                    })
                );
            } else {
                println!(
                    "Saved {}x{} frame from {device} to {}",
                    frame.image.width(),
                    frame.image.height(),
                    out.display()
                );
            }
        }
    }

    Ok(())
}
