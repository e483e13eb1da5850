//! mipforge - GPU block compression for mip-mapped textures

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use mipforge::config::Settings;
use mipforge::device::{list_gpus, WgpuDevice};
use mipforge::textures::{CompressionFormat, CompressionReport, Compressor};

#[derive(Parser)]
#[command(name = "mipforge")]
#[command(version)]
#[command(about = "Compress images into mip-mapped GPU block-compressed textures")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (defaults to ~/.config/mipforge/settings.json)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress an image on the GPU and report per-level sizes
    Compress {
        /// Source image (PNG, JPEG, ...), RGB or RGBA
        image: PathBuf,

        /// Target format, e.g. RGBA_S3TC_DXT5, DXT1, BC7
        #[arg(short, long)]
        format: Option<String>,

        /// Base width of the square mip chain (power of two, >= 16)
        #[arg(short, long)]
        width: Option<u32>,

        /// Compress once per supported format, in cycling order
        #[arg(long, conflicts_with = "format")]
        all_formats: bool,

        /// GPU index from `mipforge gpus` (default: auto-select)
        #[arg(long)]
        gpu: Option<usize>,

        /// Store the format, width and GPU used here as the new defaults
        #[arg(long)]
        save: bool,
    },

    /// List compression formats
    Formats,

    /// List available GPUs
    Gpus,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.verbose { "mipforge=debug" } else { "mipforge=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_directive.parse()?))
        .init();

    let mut settings = match &cli.settings {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load(),
    };

    match cli.command {
        Commands::Compress {
            image,
            format,
            width,
            all_formats,
            gpu,
            save,
        } => {
            let formats = if all_formats {
                CompressionFormat::ALL.to_vec()
            } else {
                let format = match format {
                    Some(name) => CompressionFormat::from_str(&name)
                        .ok_or_else(|| anyhow::anyhow!("Unknown compression format: {}", name))?,
                    None => settings.resolve_format()?,
                };
                vec![format]
            };
            let width = width.unwrap_or_else(|| settings.resolve_base_width());

            let device = WgpuDevice::with_gpu_index(gpu.or(settings.gpu_index))
                .context("Failed to initialize GPU device")?;
            println!("GPU: {}", device.info());

            let compressor = Compressor::new(&device).context("Failed to build blit pipeline")?;
            run_compress(&compressor, &image, &formats, width, all_formats)?;

            if save {
                let format = (!all_formats).then(|| formats[0]);
                settings.remember(format, width, gpu);
                match &cli.settings {
                    Some(path) => settings.save_to(path)?,
                    None => settings.save()?,
                }
                println!("Saved defaults");
            }
        }

        Commands::Formats => {
            for format in CompressionFormat::ALL {
                println!("{:<24} 0x{:04X}  {:>2} bytes/block", format.name(), format.gl_enum(), format.block_bytes());
            }
        }

        Commands::Gpus => {
            let gpus = list_gpus();
            if gpus.is_empty() {
                println!("No GPUs found");
            }
            for gpu in &gpus {
                println!("{:>3}  {}", gpu.adapter_index, gpu);
            }
        }
    }

    Ok(())
}

/// Compress once per format; with `keep_going`, a failing format is reported
/// and the next one is tried
fn run_compress(
    compressor: &Compressor<'_, WgpuDevice>,
    image: &Path,
    formats: &[CompressionFormat],
    width: u32,
    keep_going: bool,
) -> Result<()> {
    let mut failed = 0;

    for &format in formats {
        println!("\nGenerating as: {} ({})", format, format.gl_enum());
        match compressor.compress(image, format, width) {
            Ok(compressed) => print_report(&compressed.report),
            Err(e) if keep_going => {
                println!("  failed: {}", e);
                failed += 1;
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to compress {}", image.display())),
        }
    }

    if failed > 0 {
        println!("\n{} of {} formats failed", failed, formats.len());
    }
    Ok(())
}

fn print_report(report: &CompressionReport) {
    println!("  {:>5}  {:>9}  {:>10}", "Level", "Size", "Bytes");
    for level in &report.levels {
        println!(
            "  {:>5}  {:>9}  {:>10}",
            level.level,
            format!("{}x{}", level.width, level.width),
            level.compressed_bytes
        );
    }
    println!("  Total bytes: {}", report.total_bytes);
}
