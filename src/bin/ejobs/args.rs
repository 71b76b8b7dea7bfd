use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub(crate) struct Args {
    /// YAML file with worker settings and the jobs to seed the queue with.
    #[arg(short, long)]
    pub(crate) config: Option<PathBuf>,
    /// How often to look for due jobs, e.g. "5s".
    #[arg(short, long, default_value = "5s", value_parser = humantime::parse_duration)]
    pub(crate) poll_interval: Duration,
    /// Sets the maximum number of jobs claimed per poll.
    #[arg(short, long, default_value_t = 16)]
    pub(crate) batch: usize,
    /// Enables human-friendly logging.
    #[arg(short, long, default_value_t)]
    pub(crate) debug: bool,
}
