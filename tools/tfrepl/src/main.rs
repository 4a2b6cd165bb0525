use std::path::{Path, PathBuf};

use clap::Parser;
use miette::{Context, IntoDiagnostic};
use serde::Deserialize;
use tforth::{host::StdHost, Forth, ForthParams};

fn main() -> miette::Result<()> {
    use tracing_subscriber::prelude::*;

    let args = Args::parse();
    let filter = tracing_subscriber::EnvFilter::try_new(&args.trace_filter)
        .into_diagnostic()
        .wrap_err("invalid trace filter")?;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let params = args.params(config.forth);
    tracing::debug!(?params, "starting");

    let image = args.image.as_ref().or(config.image.as_ref());
    let mut forth = match image {
        Some(path) => {
            let bytes = std::fs::read(path)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to read image {}", path.display()))?;
            Forth::from_image(params, StdHost::new(), &[], &bytes)
                .map_err(|error| miette::miette!("{error}"))
                .wrap_err_with(|| format!("failed to load image {}", path.display()))?
        }
        None => Forth::new(params, StdHost::new(), &[])
            .map_err(|error| miette::miette!("{error}"))
            .wrap_err("failed to build the dictionary")?,
    };

    if let Some(entry) = forth.entry_point() {
        tracing::info!("running turnkey image");
        let code = match forth.execute(entry) {
            Ok(()) => forth.return_code(),
            Err(error) if error.is_bye() => forth.bye_code(),
            Err(error) => {
                forth.flush_output();
                return Err(miette::miette!("turnkey program failed: {error}"));
            }
        };
        forth.flush_output();
        std::process::exit(code);
    }

    for path in config.include.iter().chain(args.files.iter()) {
        let name = path.to_string_lossy();
        let res = forth.include_path(name.as_bytes());
        forth.flush_output();
        match res {
            Ok(()) => {}
            Err(error) if error.is_bye() => std::process::exit(forth.bye_code()),
            Err(error) => {
                tracing::error!(path = %path.display(), %error, "include failed");
                if args.batch {
                    std::process::exit(error.code());
                }
            }
        }
    }

    let code = if args.batch { forth.bye_code() } else { forth.quit() };

    if let Some(path) = &args.save {
        let bytes = forth
            .save_image(None)
            .map_err(|error| miette::miette!("{error}"))?;
        std::fs::write(path, bytes)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to write image {}", path.display()))?;
        tracing::info!(path = %path.display(), "image saved");
    }

    std::process::exit(code);
}

/// An interactive tforth session.
///
/// Source files named on the command line are included in order before
/// the prompt starts reading standard input.
#[derive(Debug, Parser)]
#[clap(about, version)]
struct Args {
    /// Source files to include at startup.
    files: Vec<PathBuf>,

    /// A TOML file with VM sizes and startup files.
    #[clap(long, short, env = "TFORTH_CONFIG")]
    config: Option<PathBuf>,

    /// Start from a saved dictionary image instead of a fresh dictionary.
    ///
    /// A turnkey image runs its entry point and exits.
    #[clap(long, short)]
    image: Option<PathBuf>,

    /// Save the dictionary to this file when the session ends.
    #[clap(long)]
    save: Option<PathBuf>,

    /// Exit after the startup files instead of reading standard input.
    #[clap(long, short)]
    batch: bool,

    /// No `ok.` prompts and no redefinition notes.
    #[clap(long, short)]
    quiet: bool,

    /// Print lines read from source files.
    #[clap(long)]
    echo: bool,

    /// Match word names ignoring ASCII case.
    #[clap(long)]
    case_insensitive: bool,

    /// Data stack size in cells.
    #[clap(long)]
    data_stack: Option<usize>,

    /// Return stack size in cells.
    #[clap(long)]
    return_stack: Option<usize>,

    /// Tracing filter for the VM's diagnostics.
    #[clap(long = "trace", alias = "log", env = "RUST_LOG", default_value = "warn")]
    trace_filter: String,
}

impl Args {
    fn params(&self, mut params: ForthParams) -> ForthParams {
        if let Some(size) = self.data_stack {
            params.data_stack_size = size;
        }
        if let Some(size) = self.return_stack {
            params.return_stack_size = size;
        }
        params.quiet |= self.quiet;
        params.echo |= self.echo;
        params.case_insensitive |= self.case_insensitive;
        params
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Config {
    forth: ForthParams,
    image: Option<PathBuf>,
    include: Vec<PathBuf>,
}

impl Config {
    fn load(path: &Path) -> miette::Result<Self> {
        let text = std::fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&text)
            .into_diagnostic()
            .wrap_err_with(|| format!("invalid config {}", path.display()))
    }
}
