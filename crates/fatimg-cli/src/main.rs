#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use fatimg::{FatFs, FileByteDevice, OpenOptions};
use std::env;
use std::fmt;
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Wrong argument count, unknown command or unparsable argument.
#[derive(Debug)]
struct UsageError(String);

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for UsageError {}

fn usage(message: impl Into<String>) -> anyhow::Error {
    UsageError(message.into()).into()
}

fn main() -> ExitCode {
    init_tracing();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) if error.downcast_ref::<UsageError>().is_some() => {
            eprintln!("error: {error}");
            print_usage();
            ExitCode::from(1)
        }
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(2)
        }
    }
}

/// Log to stderr, filtered by `FATIMG_LOG` (default `warn`).
fn init_tracing() {
    let filter = EnvFilter::try_from_env("FATIMG_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    // A second init (only possible in-process) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let [image, command, rest @ ..] = args.as_slice() else {
        return Err(usage("expected <image> <command>"));
    };
    let image = Path::new(image);

    match (command.as_str(), rest) {
        ("create", [size]) => {
            let size: u64 = size
                .parse()
                .map_err(|_| usage(format!("invalid size in bytes: {size}")))?;
            FatFs::create(image, size)
                .with_context(|| format!("cannot create image {}", image.display()))
        }
        ("create", _) => Err(usage("create requires <size in bytes>")),
        ("dump", flags) => {
            let mut json = false;
            let mut options = OpenOptions::default();
            for flag in flags {
                match flag.as_str() {
                    "--json" => json = true,
                    "--skip-validation" => options.skip_validation = true,
                    other => return Err(usage(format!("unknown dump flag: {other}"))),
                }
            }
            dump(image, &options, json)
        }
        ("list", []) => {
            let fs = mount(image, &OpenOptions::default())?;
            println!("Content of the file system:");
            for name in fs.list_files() {
                println!("{name}");
            }
            unmount(fs, image)
        }
        ("push", [source, dest]) => {
            let mut fs = mount(image, &OpenOptions::default())?;
            let code = result_code(fs.copy_in_from_path(source, dest).map(|_| ()));
            println!("Pushing new file, result: {code}");
            unmount(fs, image)
        }
        ("pull", [source, dest]) => {
            let fs = mount(image, &OpenOptions::default())?;
            let code = result_code(fs.copy_out_to_path(source, dest).map(|_| ()));
            println!("Downloading file, result: {code}");
            unmount(fs, image)
        }
        ("remove", [name]) => {
            let mut fs = mount(image, &OpenOptions::default())?;
            let code = result_code(fs.delete_file(name).map(|_| ()));
            println!("Removing file, result: {code}");
            unmount(fs, image)
        }
        ("delete", []) => {
            let code = result_code(FatFs::destroy_image(image));
            println!("Deleting file system, result: {code}");
            Ok(())
        }
        ("check", []) => {
            let fs = mount(image, &OpenOptions::default())?;
            print!("{}", fs.check());
            unmount(fs, image)
        }
        ("list" | "push" | "pull" | "remove" | "delete" | "check", _) => {
            Err(usage(format!("wrong number of arguments for {command}")))
        }
        (other, _) => Err(usage(format!("invalid command `{other}`"))),
    }
}

fn print_usage() {
    println!("fatimg <image> <command> (...)\n");
    println!("COMMANDS:");
    println!("  create <size in bytes>");
    println!("  dump [--json] [--skip-validation]");
    println!("  list");
    println!("  push <source file> <destination name>");
    println!("  pull <source name> <destination file>");
    println!("  remove <name>");
    println!("  delete");
    println!("  check");
}

fn mount(image: &Path, options: &OpenOptions) -> Result<FatFs<FileByteDevice>> {
    FatFs::mount_with_options(image, options)
        .with_context(|| format!("cannot open image {}", image.display()))
}

fn unmount(fs: FatFs<FileByteDevice>, image: &Path) -> Result<()> {
    fs.unmount()
        .with_context(|| format!("cannot flush image {}", image.display()))?;
    Ok(())
}

/// `0` on success, otherwise the operation's result code.
fn result_code(outcome: fatimg::Result<()>) -> i32 {
    match outcome {
        Ok(()) => 0,
        Err(err) => {
            tracing::debug!(error = %err, "operation failed");
            err.result_code()
        }
    }
}

fn dump(image: &Path, options: &OpenOptions, json: bool) -> Result<()> {
    let fs = mount(image, options)?;
    let report = fs.dump();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize dump")?
        );
    } else {
        print!("{report}");
    }
    unmount(fs, image)
}
