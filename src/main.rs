use clap::{Parser, Subcommand};
use image_derivatives::config::{self, ManagerConfig};
use image_derivatives::imaging::{CropRect, ImageBackend, RustBackend};
use image_derivatives::manager::{CachePolicy, ImageManager, Incoming};
use image_derivatives::model::ImageRecord;
use image_derivatives::output;
use image_derivatives::presets::ORIGINAL;
use image_derivatives::repository::{ImageRepository, JsonRepository};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

type Manager = ImageManager<RustBackend, JsonRepository>;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup, called exactly once
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "image-derivatives")]
#[command(about = "On-demand crops and resizes of stored images")]
#[command(long_about = "\
On-demand crops and resizes of stored images

Originals are stored once under a random hash. Derivatives are named
(size, aspect) variants, rendered on first request and cached on disk:

  public/                          # image_dir
  ├── catalog.json                 # presets + image records
  └── assets/images/               # prefix
      └── 01/01234567/             # shard directories (file_levels = \"2:8\")
          ├── 0123..._or_or.jpg    # the original
          └── 0123..._sm_1x1.jpg   # size \"sm\", aspect \"1x1\"

Logging is controlled with RUST_LOG, e.g. RUST_LOG=image_derivatives=debug.

Run 'image-derivatives gen-config' to generate a documented config.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store an image file as a new original (the file is moved)
    Ingest {
        file: PathBuf,
        /// Name to record instead of the file's own name
        #[arg(long)]
        name: Option<String>,
    },
    /// Store a copy of an image file as a new original (the file is kept)
    Copy { file: PathBuf },
    /// Render one derivative to disk
    Generate {
        hash: String,
        #[arg(default_value = ORIGINAL)]
        size: String,
        #[arg(default_value = ORIGINAL)]
        aspect: String,
        /// Keep an already rendered derivative instead of recomputing it
        #[arg(long)]
        reuse: bool,
    },
    /// Resolve a request path and write the image to stdout or a file
    Serve {
        path: String,
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
    /// Print the URL of a derivative
    Url {
        hash: String,
        #[arg(default_value = ORIGINAL)]
        size: String,
        #[arg(default_value = ORIGINAL)]
        aspect: String,
        /// Append a ?timestamp= cache buster
        #[arg(long)]
        timestamp: bool,
    },
    /// Crop the original in place
    Crop {
        hash: String,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        #[arg(long)]
        greyscale: bool,
    },
    /// Rotate the original a quarter turn in place (left or right)
    Rotate { hash: String, direction: String },
    /// Duplicate an original under a new hash
    Clone { hash: String },
    /// Remove the derivatives of an image
    Delete {
        hash: String,
        /// Keep the original file
        #[arg(long)]
        keep_original: bool,
        /// Also remove the image record
        #[arg(long)]
        purge: bool,
    },
    /// List the size and aspect presets
    Presets,
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::GenConfig => print!("{}", config::stock_config_toml()),
        command => {
            let config = config::load_config(&cli.config)?;
            let manager = open_manager(&config)?;
            run(&manager, &config, command)?;
        }
    }

    Ok(())
}

fn run(
    manager: &Manager,
    config: &ManagerConfig,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Ingest { file, name } => {
            let incoming = match name {
                Some(original_name) => Incoming::Upload {
                    path: file,
                    original_name,
                },
                None => Incoming::File(file),
            };
            let record = manager.ingest(incoming, true)?;
            output::print_record(&record, &manager.url_for(&record, ORIGINAL, ORIGINAL, true));
        }
        Command::Copy { file } => {
            let record = copy_in(manager, &file, &config.image_dir())?;
            output::print_record(&record, &manager.url_for(&record, ORIGINAL, ORIGINAL, true));
        }
        Command::Generate {
            hash,
            size,
            aspect,
            reuse,
        } => {
            let record = manager.image_by_hash(&hash)?;
            let policy = if reuse {
                CachePolicy::ReuseExisting
            } else {
                CachePolicy::Recompute
            };
            let result = manager.generate(&record, &size, &aspect, policy)?;
            println!("{}", output::format_result(&result));
        }
        Command::Serve { path, out } => {
            let response = manager.serve(&path)?;
            let body = response.body()?;
            match out {
                Some(out) => std::fs::write(&out, &body)?,
                None => std::io::stdout().lock().write_all(&body)?,
            }
            tracing::info!(path = %path, content_type = response.content_type(), "served");
        }
        Command::Url {
            hash,
            size,
            aspect,
            timestamp,
        } => {
            let record = manager.image_by_hash(&hash)?;
            println!("{}", manager.url_for(&record, &size, &aspect, timestamp));
        }
        Command::Crop {
            hash,
            x,
            y,
            width,
            height,
            greyscale,
        } => {
            let mut record = manager.image_by_hash(&hash)?;
            let rect = CropRect {
                x,
                y,
                width,
                height,
            };
            let path = manager.crop(&mut record, rect, greyscale, true)?;
            println!("{}", path.display());
        }
        Command::Rotate { hash, direction } => {
            let mut record = manager.image_by_hash(&hash)?;
            let path = manager.rotate_named(&mut record, &direction, true)?;
            println!("{}", path.display());
        }
        Command::Clone { hash } => {
            let source = manager.image_by_hash(&hash)?;
            let record = manager.clone_image(&source, true)?;
            output::print_record(&record, &manager.url_for(&record, ORIGINAL, ORIGINAL, true));
        }
        Command::Delete {
            hash,
            keep_original,
            purge,
        } => {
            let record = manager.image_by_hash(&hash)?;
            manager.delete(&record, keep_original, purge)?;
        }
        Command::Presets => {
            output::print_presets(manager.preset_aspects()?, manager.preset_sizes()?);
        }
        // Needs no manager, printed by main
        Command::GenConfig => {}
    }

    Ok(())
}

fn open_manager(config: &ManagerConfig) -> Result<Manager, Box<dyn std::error::Error>> {
    let repository = JsonRepository::open(config.catalog_path())?;
    Ok(ImageManager::new(config, RustBackend::new(), repository)?)
}

/// Ingest a copy of `file`, leaving `file` itself in place.
fn copy_in<B: ImageBackend, R: ImageRepository>(
    manager: &ImageManager<B, R>,
    file: &Path,
    image_dir: &Path,
) -> Result<ImageRecord, Box<dyn std::error::Error>> {
    let staged = stage_copy(file, image_dir)?;
    let original_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    // Dropping `staged` on error removes the copy
    let record = manager.ingest(
        Incoming::Upload {
            path: staged.to_path_buf(),
            original_name,
        },
        true,
    )?;
    staged.keep()?;
    Ok(record)
}

/// Copy `file` next to the image tree so ingesting it can rename instead of
/// copying again. The copy is deleted when the returned path is dropped.
fn stage_copy(file: &Path, image_dir: &Path) -> std::io::Result<TempPath> {
    std::fs::create_dir_all(image_dir)?;
    let staged = tempfile::NamedTempFile::new_in(image_dir)?.into_temp_path();
    std::fs::copy(file, &staged)?;
    Ok(staged)
}
