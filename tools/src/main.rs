use std::path::{Path, PathBuf};

use asset_cook::{BuildOptions, ExitStatus};
use clap::{Parser, Subcommand};
use cook_formats::archive::{self, ArchiveError, ArchiveFile};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tools", version, about = "Asset cook CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cooks a source tree into a destination tree and archive.
    Build(BuildArgs),
    Archive(ArchiveArgs),
}

#[derive(Parser)]
struct BuildArgs {
    #[arg(value_name = "SOURCE_ROOT")]
    source_root: PathBuf,

    #[arg(value_name = "DEST_ROOT")]
    dest_root: PathBuf,

    /// Archive file name inside DEST_ROOT.
    #[arg(long, value_name = "NAME")]
    archive: Option<String>,

    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Remove DEST_ROOT before building.
    #[arg(long)]
    clean: bool,
}

#[derive(Parser)]
struct ArchiveArgs {
    #[command(subcommand)]
    command: ArchiveCommand,
}

#[derive(Subcommand)]
enum ArchiveCommand {
    List {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,
    },
    Extract {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,
        #[arg(long, value_name = "DIR")]
        out: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    install_tracing();
    let exit_code = match cli.command {
        Commands::Build(args) => run_build(args),
        Commands::Archive(args) => run_archive(args),
    };
    std::process::exit(exit_code);
}

fn install_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_build(args: BuildArgs) -> i32 {
    let options = BuildOptions {
        archive_name: args.archive,
        config_path: args.config,
        clean: args.clean,
    };
    asset_cook::run(&args.source_root, &args.dest_root, &options).code()
}

fn run_archive(args: ArchiveArgs) -> i32 {
    match args.command {
        ArchiveCommand::List { archive } => archive_list(&archive),
        ArchiveCommand::Extract { archive, out } => archive_extract(&archive, &out),
    }
}

fn archive_list(path: &Path) -> i32 {
    let archive = match load_archive(path) {
        Ok(archive) => archive,
        Err(code) => return code,
    };
    println!("archive: {}", path.display());
    for entry in archive.entries() {
        println!("{:>10} {:>10} {}", entry.offset, entry.size, entry.name);
    }
    ExitStatus::Success.code()
}

fn archive_extract(path: &Path, out_dir: &Path) -> i32 {
    let archive = match load_archive(path) {
        Ok(archive) => archive,
        Err(code) => return code,
    };
    if let Err(err) = archive.extract_all(out_dir) {
        eprintln!("archive extract failed: {}", err);
        return failure_code(&err);
    }
    println!(
        "extracted {} entries to {}",
        archive.entries().len(),
        out_dir.display()
    );
    ExitStatus::Success.code()
}

fn load_archive(path: &Path) -> Result<ArchiveFile, i32> {
    archive::read_archive(path).map_err(|err| {
        eprintln!("archive read failed: {}", err);
        failure_code(&err)
    })
}

fn failure_code(err: &ArchiveError) -> i32 {
    match err {
        ArchiveError::Io(_) => ExitStatus::IoFailure.code(),
        _ => ExitStatus::ValidationFailure.code(),
    }
}
