//! Nodekit command-line runner.
//!
//! Mounts a host directory into the virtual filesystem, executes an entry
//! file (or inline code) in the sandbox, and streams guest console output
//! to stdout as it is produced.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use nodekit_runtime::{ExecuteOptions, ExecutionMode, ExecutionResult, RuntimeOptions, Sandbox};
use nodekit_vfs::MemFs;

mod mount;

#[derive(Parser)]
#[command(name = "nodekit")]
#[command(about = "Run JavaScript in a sandboxed Node-compatible runtime", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a JavaScript file
    Run {
        /// Entry file on the host filesystem
        file: PathBuf,
        /// Directory to mount into the sandbox (defaults to the entry
        /// file's parent)
        #[arg(long)]
        mount: Option<PathBuf>,
        /// Execute on a dedicated worker thread
        #[arg(long)]
        isolated: bool,
        /// Arguments passed to the program as process.argv
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },

    /// Evaluate inline code
    Eval {
        /// Code to execute
        code: String,
        /// Execute on a dedicated worker thread
        #[arg(long)]
        isolated: bool,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            file,
            mount,
            isolated,
            args,
        } => cmd_run(&file, mount.as_deref(), isolated, args)?,
        Commands::Eval { code, isolated } => cmd_eval(&code, isolated)?,
    };

    report(result)
}

fn mode_for(isolated: bool) -> ExecutionMode {
    if isolated {
        ExecutionMode::Isolated
    } else {
        ExecutionMode::Direct
    }
}

fn cmd_run(
    file: &Path,
    mount_dir: Option<&Path>,
    isolated: bool,
    args: Vec<String>,
) -> anyhow::Result<ExecutionResult> {
    let file = file
        .canonicalize()
        .with_context(|| format!("cannot open {}", file.display()))?;
    let default_mount = file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let mount_dir = mount_dir.unwrap_or(&default_mount);

    let fs = MemFs::new();
    mount::mount_directory(&fs, mount_dir, "/")
        .with_context(|| format!("cannot mount {}", mount_dir.display()))?;

    let filename = match file.strip_prefix(mount_dir) {
        Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
        Err(_) => bail!(
            "entry file {} is outside the mounted directory {}",
            file.display(),
            mount_dir.display()
        ),
    };
    let code = std::fs::read_to_string(&file)
        .with_context(|| format!("cannot read {}", file.display()))?;

    let mut sandbox = Sandbox::new(mode_for(isolated), RuntimeOptions::default(), fs)?;
    let result = sandbox.execute(
        &code,
        ExecuteOptions {
            filename: Some(filename),
            argv: args,
            on_log: Some(Box::new(|line| println!("{}", line))),
        },
    )?;
    Ok(result)
}

fn cmd_eval(code: &str, isolated: bool) -> anyhow::Result<ExecutionResult> {
    let mut sandbox = Sandbox::new(mode_for(isolated), RuntimeOptions::default(), MemFs::new())?;
    let result = sandbox.execute(
        code,
        ExecuteOptions {
            on_log: Some(Box::new(|line| println!("{}", line))),
            ..Default::default()
        },
    )?;
    Ok(result)
}

/// Print the final outcome. Logs were already streamed; only the result
/// value (or the failure) remains.
fn report(result: ExecutionResult) -> anyhow::Result<()> {
    if result.ok {
        if let Some(data) = result.data {
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        Ok(())
    } else {
        if let Some(error) = result.error {
            eprintln!("error: {}", error);
        }
        std::process::exit(1);
    }
}
