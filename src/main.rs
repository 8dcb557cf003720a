//! jimage CLI - browse and extract module containers

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use jimage::ops::{extract, info, list, list_recursive, ExtractOptions};
use jimage::{Config, Error, ImageReader, PreviewMode};

#[derive(Parser)]
#[command(name = "jimage")]
#[command(about = "read-only browser for jimage module containers")]
#[command(version)]
struct Cli {
    /// container to open (defaults to the configured image, then $JAVA_HOME/lib/modules)
    #[arg(short, long, env = "JIMAGE")]
    image: Option<PathBuf>,

    /// preview mode: disabled, enabled or runtime
    #[arg(short, long)]
    preview: Option<PreviewMode>,

    /// config file
    #[arg(short, long, env = "JIMAGE_CONFIG")]
    config: Option<PathBuf>,

    /// more logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// show header fields and counts
    Info,

    /// list a directory
    Ls {
        /// node name, e.g. /modules/java.base/java/lang
        #[arg(default_value = "/modules")]
        path: String,

        /// list recursively
        #[arg(short, long)]
        recursive: bool,
    },

    /// write a resource to stdout
    Cat {
        /// module name
        module: String,

        /// path inside the module
        path: String,
    },

    /// extract resources to a directory
    Extract {
        /// destination directory
        destination: PathBuf,

        /// only extract this module (repeatable)
        #[arg(short, long = "module")]
        modules: Vec<String>,

        /// keep files that already exist
        #[arg(long)]
        no_overwrite: bool,
    },

    /// list packages
    Packages,

    /// show the module holding a package
    Which {
        /// package name, e.g. java.lang
        package: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn open(cli: &Cli) -> jimage::Result<ImageReader> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let image = config.image_path(cli.image.as_deref())?;
    let mode = cli.preview.unwrap_or(config.preview);
    ImageReader::open(&image, mode)
}

fn run(cli: Cli) -> jimage::Result<()> {
    let reader = open(&cli)?;

    match cli.command {
        Commands::Info => {
            println!("{}", info(&reader)?);
        }

        Commands::Ls { path, recursive } => {
            let entries = if recursive {
                list_recursive(&reader, &path)?
            } else {
                list(&reader, &path)?
            };

            for entry in entries {
                println!("{}", entry);
            }
        }

        Commands::Cat { module, path } => {
            let node = reader
                .find_resource_node(&module, &path)?
                .ok_or_else(|| Error::PathNotFound(format!("/modules/{}/{}", module, path)))?;
            let data = reader.get_resource_buffer(&node)?;
            io::stdout()
                .write_all(&data)
                .map_err(|e| Error::Io {
                    path: "stdout".into(),
                    source: e,
                })?;
        }

        Commands::Extract {
            destination,
            modules,
            no_overwrite,
        } => {
            let opts = ExtractOptions {
                overwrite: !no_overwrite,
                modules,
            };
            let stats = extract(&reader, &destination, &opts)?;
            println!(
                "extracted {} files ({} bytes) to {}",
                stats.files,
                stats.bytes,
                destination.display()
            );
        }

        Commands::Packages => {
            for package in reader.package_names()? {
                println!("{}", package);
            }
        }

        Commands::Which { package } => match reader.package_to_module(&package)? {
            Some(module) => println!("{}", module),
            None => return Err(Error::PathNotFound(format!("/packages/{}", package))),
        },
    }

    reader.close()
}
