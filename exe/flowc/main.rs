mod app_config;

use app_config::AppConfig;
use clap::{Args, Parser, Subcommand};
use flowc::{subcommands, utils};
use std::{
  error::Error,
  fs,
  path::{Path, PathBuf},
};
use tracing::info;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
  /// YAML config file
  #[arg(short, long, value_name = "PATH", global = true)]
  config: Option<PathBuf>,
  #[command(subcommand)]
  command: Command,
}

/// Flags shared by commands that compile a graph. They override the config file.
#[derive(Args)]
struct CompileFlags {
  /// Graph document (JSON GraphDef)
  #[arg(long, value_name = "PATH")]
  graph: PathBuf,
  /// Argument list (JSON)
  #[arg(long, value_name = "PATH")]
  args: PathBuf,
  #[arg(long)]
  backend: Option<String>,
  /// Keep constant outputs in the computation instead of folding them
  #[arg(long)]
  no_resolve_constants: bool,
  /// Link isolated nodes to source and sink before validating
  #[arg(long)]
  fixup: bool,
}

impl CompileFlags {
  fn config(&self) -> AppConfig {
    AppConfig {
      backend: self.backend.clone(),
      resolve_compile_time_constants: self.no_resolve_constants.then_some(false),
      fixup_source_and_sink_edges: self.fixup.then_some(true),
      ..Default::default()
    }
  }
}

#[derive(Subcommand)]
enum Command {
  /// Compile a graph and write the compilation result
  Compile {
    #[command(flatten)]
    flags: CompileFlags,
    /// Result file (JSON); printed when omitted
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Directory for Graphviz/GraphML dumps
    #[arg(long, value_name = "DIR")]
    artifacts: Option<String>,
  },
  /// Compile a graph and execute it on the reference client
  Run {
    #[command(flatten)]
    flags: CompileFlags,
    /// One literal per argument (JSON)
    #[arg(long, value_name = "PATH")]
    inputs: PathBuf,
  },
  /// List the operations registered for a backend
  Ops {
    #[arg(long)]
    backend: Option<String>,
  },
}

fn read_config(path: &Option<PathBuf>) -> Result<AppConfig, Box<dyn Error>> {
  match path {
    Some(path) => Ok(serde_yaml::from_str(&fs::read_to_string(path)?)?),
    None => Ok(AppConfig::default()),
  }
}

fn main() -> Result<(), Box<dyn Error>> {
  utils::init_logging()?;
  let args = Cli::parse();
  let config = read_config(&args.config)?;

  match args.command {
    Command::Compile {
      flags,
      output,
      artifacts,
    } => {
      let config = config.merge(flags.config()).merge(AppConfig {
        artifacts,
        ..Default::default()
      });
      let job = subcommands::Job::load(&flags.graph, &flags.args)?;
      let mut app = subcommands::Compile::new(job, config.backend(), config.compile_options());
      if let Some(path) = &output {
        app = app.output(path);
      }
      if let Some(dir) = &config.artifacts {
        app = app.artifacts(Path::new(dir));
      }
      let result = app.run()?;
      if output.is_none() {
        println!("{}", serde_json::to_string_pretty(&result)?);
      }
    }
    Command::Run { flags, inputs } => {
      let config = config.merge(flags.config());
      let job = subcommands::Job::load(&flags.graph, &flags.args)?;
      let app = subcommands::Run::new(job, config.backend(), config.compile_options(), &inputs)?;
      println!("{}", app.run()?);
    }
    Command::Ops { backend } => {
      let config = config.merge(AppConfig {
        backend,
        ..Default::default()
      });
      let ops = subcommands::Ops::new(config.backend()).run();
      info!("{} operations registered for {}", ops.len(), config.backend());
      for op in ops {
        println!("{}", op);
      }
    }
  }
  Ok(())
}
