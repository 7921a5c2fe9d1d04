//! terrarun: prune sumaform-style templates and drive terraform.
//!
//! Settings come from `terrarun.toml` (see [`EnvConfig`]); command-line
//! flags override the file. Commands that run terraform exit with
//! terraform's exit code.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use regex::Regex;
use serde_json::Value;
use tracing::{error, info, warn};

use terrarun::core::repos::{InjectStatus, RepositoryMap, parse_repositories};
use terrarun::core::variables::read_defaults;
use terrarun::exit_codes;
use terrarun::io::config::{CONFIG_FILE, EnvConfig, load_config};
use terrarun::io::state::StateError;
use terrarun::io::tool::TerraformCli;
use terrarun::lifecycle::{ApplyOptions, Environment};
use terrarun::logging;
use terrarun::prune::{prune_template_file, prune_tfvars_file};

#[derive(Parser)]
#[command(
    name = "terrarun",
    version,
    about = "Prune terraform templates and manage test environments"
)]
struct Cli {
    #[command(flatten)]
    overrides: ConfigArgs,

    #[command(subcommand)]
    command: Command,
}

/// Flags that override `terrarun.toml`.
#[derive(Args, Debug, Default)]
struct ConfigArgs {
    /// Configuration file.
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,
    /// Working directory terraform runs in.
    #[arg(long, global = true)]
    workdir: Option<PathBuf>,
    /// Template copied to `<workdir>/main.tf`.
    #[arg(long, global = true)]
    template: Option<PathBuf>,
    /// Variable file; repeat for several.
    #[arg(long = "tfvars", global = true)]
    tfvars_files: Vec<PathBuf>,
    /// Variable declarations copied to `<workdir>/variables.tf`.
    #[arg(long, global = true)]
    variables_description: Option<PathBuf>,
    /// Backend module to link.
    #[arg(long, global = true)]
    backend: Option<String>,
    /// Terraform binary.
    #[arg(long, global = true)]
    terraform_bin: Option<PathBuf>,
    /// File terraform output is appended to.
    #[arg(long, global = true)]
    output_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
struct KeepArgs {
    /// Role kept besides the default survivors; repeat or comma-separate.
    #[arg(long, value_delimiter = ',')]
    keep: Vec<String>,
    /// Also drop proxies, monitoring, retail and DHCP/DNS roles by default.
    #[arg(long)]
    delete_all: bool,
}

impl KeepArgs {
    fn keep_set(&self) -> BTreeSet<String> {
        self.keep
            .iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }
}

#[derive(Subcommand)]
enum Command {
    /// Prepare the working directory, init and apply.
    Apply {
        /// Terraform `-parallelism`.
        #[arg(long)]
        parallelism: Option<u32>,
        /// Prune unselected roles from the template and variable files.
        #[arg(long)]
        prune: bool,
        #[command(flatten)]
        keep: KeepArgs,
        /// JSON file mapping roles to additional repositories.
        #[arg(long)]
        repos: Option<PathBuf>,
        /// After applying, taint resources matching this pattern and apply again.
        #[arg(long)]
        taint: Option<String>,
    },
    /// Prepare the working directory and run `terraform init`.
    Init,
    /// Taint every resource whose address matches the pattern from the start.
    Taint { pattern: String },
    /// Destroy the environment.
    Destroy,
    /// Print the hostname of a role.
    Hostname {
        role: String,
        /// Print every hostname of the role, one per line.
        #[arg(long)]
        all: bool,
    },
    /// Print the IP address of a single-node deployment.
    Ip,
    /// Prune a template and variable files in place, without terraform.
    Prune {
        /// Template to rewrite.
        #[arg(value_name = "TEMPLATE")]
        template_path: PathBuf,
        /// Variable files to rewrite.
        var_files: Vec<PathBuf>,
        #[command(flatten)]
        keep: KeepArgs,
    },
    /// Inject additional repositories into the working copy.
    Inject { repos: PathBuf },
    /// Print the defaults declared in a variables file as JSON.
    Variables { file: PathBuf },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Apply {
            parallelism,
            prune,
            keep,
            repos,
            taint,
        } => {
            let options = ApplyOptions {
                parallelism,
                prune,
                keep: keep.keep_set(),
                delete_all: keep.delete_all,
            };
            cmd_apply(&cli.overrides, &options, repos.as_deref(), taint.as_deref())
        }
        Command::Init => cmd_init(&cli.overrides),
        Command::Taint { pattern } => cmd_taint(&cli.overrides, &pattern),
        Command::Destroy => cmd_destroy(&cli.overrides),
        Command::Hostname { role, all } => cmd_hostname(&cli.overrides, &role, all),
        Command::Ip => cmd_ip(&cli.overrides),
        Command::Prune {
            template_path,
            var_files,
            keep,
        } => cmd_prune(&template_path, &var_files, &keep),
        Command::Inject { repos } => cmd_inject(&cli.overrides, &repos),
        Command::Variables { file } => cmd_variables(&file),
    }
}

fn load(overrides: &ConfigArgs) -> Result<EnvConfig> {
    let mut cfg = load_config(&overrides.config)?;
    if let Some(workdir) = &overrides.workdir {
        cfg.workdir = workdir.clone();
    }
    if let Some(template) = &overrides.template {
        cfg.template = template.clone();
    }
    if !overrides.tfvars_files.is_empty() {
        cfg.tfvars_files = overrides.tfvars_files.clone();
    }
    if let Some(description) = &overrides.variables_description {
        cfg.variables_description = Some(description.clone());
    }
    if let Some(backend) = &overrides.backend {
        cfg.backend = backend.clone();
    }
    if let Some(bin) = &overrides.terraform_bin {
        cfg.terraform_bin = bin.clone();
    }
    if let Some(output_file) = &overrides.output_file {
        cfg.output_file = Some(output_file.clone());
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Environment for an existing (or new) working directory.
fn resume(overrides: &ConfigArgs) -> Result<Environment<TerraformCli>> {
    let cfg = load(overrides)?;
    let tool = TerraformCli::from_config(&cfg);
    Environment::resume(cfg, tool)
}

fn cmd_apply(
    overrides: &ConfigArgs,
    options: &ApplyOptions,
    repos: Option<&Path>,
    taint: Option<&str>,
) -> Result<i32> {
    let taint = taint
        .map(Regex::new)
        .transpose()
        .context("invalid taint pattern")?;
    let mut env = Environment::terraform(load(overrides)?)?;
    env.prepare()?;

    if let Some(path) = repos {
        match load_repositories(path)? {
            Some(repositories) => {
                let report = env.inject_repositories(&repositories)?;
                if report.template.status != InjectStatus::Success {
                    warn!(
                        status = report.template.status.code(),
                        role = ?report.template.role,
                        "template placeholders not injected"
                    );
                }
            }
            None => warn!(path = %path.display(), "skipping malformed repository file"),
        }
    }

    let code = env.init()?;
    if code != 0 {
        return Ok(code);
    }
    let code = env.apply(options)?;
    let Some(pattern) = taint else {
        return Ok(code);
    };
    if code != 0 {
        return Ok(code);
    }

    let tainted = env.taint(&pattern)?;
    if tainted.is_empty() {
        info!(pattern = %pattern, "nothing to taint");
        return Ok(code);
    }
    let reapply = ApplyOptions {
        prune: false,
        ..options.clone()
    };
    env.apply(&reapply)
}

fn cmd_init(overrides: &ConfigArgs) -> Result<i32> {
    let mut env = resume(overrides)?;
    env.prepare()?;
    env.init()
}

fn cmd_taint(overrides: &ConfigArgs, pattern: &str) -> Result<i32> {
    let pattern = Regex::new(pattern).context("invalid taint pattern")?;
    let mut env = resume(overrides)?;
    let tainted = env.taint(&pattern)?;
    Ok(tainted
        .iter()
        .map(|t| t.exit_code)
        .find(|&code| code != 0)
        .unwrap_or(exit_codes::OK))
}

fn cmd_destroy(overrides: &ConfigArgs) -> Result<i32> {
    let mut env = resume(overrides)?;
    env.prepare()?;
    env.destroy()
}

fn cmd_hostname(overrides: &ConfigArgs, role: &str, all: bool) -> Result<i32> {
    let env = resume(overrides)?;
    let names = if all {
        env.hostnames(role)
    } else {
        env.hostname(role).map(|name| name.into_iter().collect())
    };
    print_query(names, &format!("hostname for {role}"))
}

fn cmd_ip(overrides: &ConfigArgs) -> Result<i32> {
    let env = resume(overrides)?;
    let ip = env.single_node_ip().map(|ip| ip.into_iter().collect());
    print_query(ip, "single node address")
}

/// Print query results one per line and map absence to exit codes.
fn print_query(result: Result<Vec<String>, StateError>, what: &str) -> Result<i32> {
    match result {
        Ok(values) if values.is_empty() => {
            warn!("no {what} in state");
            Ok(exit_codes::NOT_FOUND)
        }
        Ok(values) => {
            for value in values {
                println!("{value}");
            }
            Ok(exit_codes::OK)
        }
        Err(StateError::Missing(path)) => {
            error!(path = %path.display(), "state file missing");
            Ok(exit_codes::STATE_MISSING)
        }
        Err(err) => Err(err.into()),
    }
}

fn cmd_prune(template: &Path, tfvars: &[PathBuf], keep: &KeepArgs) -> Result<i32> {
    let explicit = keep.keep_set();
    prune_template_file(template, &explicit, keep.delete_all)?;
    for file in tfvars {
        prune_tfvars_file(file, &explicit, keep.delete_all)?;
    }
    Ok(exit_codes::OK)
}

fn cmd_inject(overrides: &ConfigArgs, repos: &Path) -> Result<i32> {
    let Some(repositories) = load_repositories(repos)? else {
        return Ok(InjectStatus::Malformed.code());
    };
    let mut env = resume(overrides)?;
    env.prepare()?;
    let report = env.inject_repositories(&repositories)?;
    for name in &report.updated_tfvars {
        info!(file = %name, "additional repositories set");
    }
    Ok(report.template.status.code())
}

/// Read a repository mapping. `None` when the document has the wrong shape.
fn load_repositories(path: &Path) -> Result<Option<RepositoryMap>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    match parse_repositories(&value) {
        Ok(map) => Ok(Some(map)),
        Err(err) => {
            error!(path = %path.display(), error = %err, "invalid repository file");
            Ok(None)
        }
    }
}

fn cmd_variables(file: &Path) -> Result<i32> {
    let contents = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let defaults =
        read_defaults(&contents).with_context(|| format!("parse {}", file.display()))?;
    let json: serde_json::Map<String, Value> = defaults
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&Value::Object(json)).context("serialize defaults")?
    );
    Ok(exit_codes::OK)
}
