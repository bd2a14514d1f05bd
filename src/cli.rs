use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "eksplan",
    version,
    about = "Provision an EKS stack as a dependency-ordered task graph",
    long_about = None
)]
pub struct EksplanArgs {
    /// High-level command:
    /// - "run" : provision the stack
    /// - "plan" : print the task graph without provisioning anything
    #[arg(value_enum, default_value_t = Command::Run)]
    pub command: Command,

    /// Path to the stack configuration file (JSON).
    /// Example: --file stack.json
    #[arg(short, long, default_value = "stack.json")]
    pub file: PathBuf,

    /// Maximum number of tasks to run in parallel (0 = unbounded).
    /// Example: -j 8  or  --max-concurrency 8
    #[arg(short = 'j', long = "max-concurrency", default_value_t = 4)]
    pub max_concurrency: usize,

    /// Override the output directory from the stack file.
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Override the cluster name from the stack file.
    #[arg(long)]
    pub cluster_name: Option<String>,

    /// Write the run summary and stack outputs as JSON to this path.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence when set).
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Command {
    Run,
    Plan,
}

impl EksplanArgs {
    /// Concurrency limit for the executor; `None` means unbounded.
    pub fn concurrency_limit(&self) -> Option<usize> {
        (self.max_concurrency > 0).then_some(self.max_concurrency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_run_with_four_workers() {
        let args = EksplanArgs::parse_from(["eksplan"]);
        assert_eq!(args.command, Command::Run);
        assert_eq!(args.file, PathBuf::from("stack.json"));
        assert_eq!(args.concurrency_limit(), Some(4));
    }

    #[test]
    fn zero_means_unbounded() {
        let args = EksplanArgs::parse_from(["eksplan", "plan", "-j", "0", "--cluster-name", "c"]);
        assert_eq!(args.command, Command::Plan);
        assert_eq!(args.concurrency_limit(), None);
        assert_eq!(args.cluster_name.as_deref(), Some("c"));
    }
}
