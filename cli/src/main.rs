#![deny(clippy::all)]

use anyhow::Context;
use cnext::{
    transpile_batch, CacheKeyGenerator, DiskProvider, RunPlan,
    TranspileConfig,
};
use serde::de::DeserializeOwned;
use std::{fs, path::PathBuf, process};
use structopt::StructOpt;

/// The default config file name, looked up in the working directory.
const DEFAULT_CONFIG: &str = "cnext.config.json";

/// The sub-command to execute.
#[derive(Debug, StructOpt)]
enum Command {
    /// Transpile C-Next source files to C.
    #[structopt(name = "transpile")]
    Transpile {
        /// Paths to the source files
        #[structopt(parse(from_os_str), required = true)]
        sources: Vec<PathBuf>,
        /// Directory for the generated .h/.c files. Defaults to each
        /// source file's directory.
        #[structopt(parse(from_os_str), long = "out", short = "o")]
        out_dir: Option<PathBuf>,
        /// Additional include search paths
        #[structopt(parse(from_os_str), long = "include", short = "I")]
        include_paths: Vec<PathBuf>,
        /// Path to the config file, in JSON format. If not provided,
        /// cnext.config.json is used when present.
        #[structopt(parse(from_os_str), long = "config")]
        config_path: Option<PathBuf>,
    },

    /// Print the incremental-build cache key for a source file.
    #[structopt(name = "cache-key")]
    CacheKey {
        /// Path to the source file
        #[structopt(parse(from_os_str))]
        source: PathBuf,
    },
}

/// C-Next executable, for transpiling C-Next programs to C
#[derive(Debug, StructOpt)]
#[structopt(name = "cnext")]
struct Opt {
    #[structopt(subcommand)]
    cmd: Command,
}

fn read_file(path: &PathBuf) -> anyhow::Result<String> {
    fs::read_to_string(path)
        .with_context(|| format!("Failed to read file {:?}", path))
}

/// Loads a config from a JSON file. If no path is given and no default
/// config exists, returns the default value instead.
fn load_config<T: Default + DeserializeOwned>(
    path_opt: &Option<PathBuf>,
) -> anyhow::Result<T> {
    let path = match path_opt {
        Some(path) => Some(path.clone()),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            if default.exists() {
                Some(default)
            } else {
                None
            }
        }
    };
    match path {
        None => Ok(T::default()),
        Some(path) => {
            let config_str = read_file(&path)?;
            serde_json::from_str(&config_str).with_context(|| {
                format!("Failed to parse config file {:?}", path)
            })
        }
    }
}

/// Decide whether and how to run, from the config file.
fn plan(config_path: &Option<PathBuf>) -> RunPlan {
    let loaded: anyhow::Result<TranspileConfig> = load_config(config_path);
    match loaded {
        Ok(config) => RunPlan {
            should_run: true,
            exit_code: 0,
            config: Some(config),
        },
        Err(err) => {
            eprintln!("{:#}", err);
            RunPlan {
                should_run: false,
                exit_code: 1,
                config: None,
            }
        }
    }
}

fn run(opt: Opt) -> anyhow::Result<i32> {
    match opt.cmd {
        Command::Transpile {
            sources,
            out_dir,
            include_paths,
            config_path,
        } => {
            let plan = plan(&config_path);
            if !plan.should_run {
                return Ok(plan.exit_code);
            }
            let mut config = plan.config.unwrap_or_default();
            // CLI flags override the config file
            if out_dir.is_some() {
                config.output_dir = out_dir;
            }
            config.include_paths.extend(include_paths);

            let provider = DiskProvider;
            let results = transpile_batch(&sources, &provider, &config);

            let mut failed = 0;
            for result in results {
                for warning in &result.warnings {
                    eprintln!("{}", warning);
                }
                if let Some(errors) = &result.errors {
                    eprintln!("{:#}", errors);
                    failed += 1;
                }
                let file_parent =
                    result.file.parent().map(|p| p.to_owned());
                let output = match result.output {
                    Some(output) => output,
                    None => continue,
                };
                let target_dir = config
                    .output_dir
                    .clone()
                    .or_else(|| file_parent)
                    .unwrap_or_else(|| PathBuf::from("."));
                fs::create_dir_all(&target_dir).with_context(|| {
                    format!("Failed to create {:?}", target_dir)
                })?;
                let header_path = target_dir.join(&output.header_name);
                let impl_path = target_dir.join(&output.impl_name);
                fs::write(&header_path, output.header).with_context(
                    || format!("Failed to write {:?}", header_path),
                )?;
                fs::write(&impl_path, output.implementation)
                    .with_context(|| {
                        format!("Failed to write {:?}", impl_path)
                    })?;
                println!(
                    "{} -> {}, {}",
                    result.file.display(),
                    header_path.display(),
                    impl_path.display(),
                );
            }
            Ok(if failed > 0 { 1 } else { 0 })
        }

        Command::CacheKey { source } => {
            let provider = DiskProvider;
            match CacheKeyGenerator::generate(&provider, &source) {
                Some(key) => {
                    println!("{}", key);
                    Ok(0)
                }
                None => {
                    eprintln!("Failed to read file {:?}", source);
                    Ok(1)
                }
            }
        }
    }
}

fn main() {
    tracing_subscriber::fmt::init();
    let exit_code = match run(Opt::from_args()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            1
        }
    };
    process::exit(exit_code);
}
