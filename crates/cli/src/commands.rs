use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a graph once on this machine
    Run {
        #[arg(long, help = "Graph definition (JSON)")]
        graph: PathBuf,

        #[arg(long, help = "Engine settings file (JSON)")]
        settings: Option<PathBuf>,

        #[arg(long, help = "Extra KEY=VALUE variables for ${VAR} expansion")]
        env_file: Option<PathBuf>,

        #[arg(long, help = "Capacity of every RowSet, overrides the settings file")]
        rowset_size: Option<usize>,

        #[arg(
            long,
            help = "Directory with a prior run's line logs; only listed lines are processed"
        )]
        replay_dir: Option<PathBuf>,

        #[arg(long, help = "Directory of the run journal")]
        state_dir: Option<PathBuf>,

        #[arg(long, help = "Do not journal this run")]
        no_journal: bool,

        #[arg(long, help = "Print the run result as JSON instead of a table")]
        json: bool,
    },
    /// Check a graph definition without running it
    Validate {
        #[arg(long, help = "Graph definition (JSON)")]
        graph: PathBuf,

        #[arg(long, help = "Extra KEY=VALUE variables for ${VAR} expansion")]
        env_file: Option<PathBuf>,
    },
    /// Show what the journal recorded about a run
    History {
        #[arg(long, help = "Run id to inspect; the latest run when omitted")]
        run: Option<String>,

        #[arg(long, help = "Engine settings file (JSON)")]
        settings: Option<PathBuf>,

        #[arg(long, help = "Directory of the run journal")]
        state_dir: Option<PathBuf>,

        #[arg(long, help = "Print the summary as JSON instead of a table")]
        json: bool,
    },
    /// Run a partitioned graph over in-process worker agents
    Cluster {
        #[arg(long, help = "Graph definition (JSON)")]
        graph: PathBuf,

        #[arg(long, default_value_t = 2, help = "Number of worker agents")]
        workers: usize,

        #[arg(long, help = "Engine settings file (JSON)")]
        settings: Option<PathBuf>,

        #[arg(long, help = "Extra KEY=VALUE variables for ${VAR} expansion")]
        env_file: Option<PathBuf>,

        #[arg(long, help = "Print the cluster result as JSON instead of a table")]
        json: bool,
    },
}
