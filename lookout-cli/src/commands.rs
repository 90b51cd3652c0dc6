use clap::Subcommand;
use lookout_protocol::protocol::DEFAULT_PAGE_BYTES;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the log of a function instance
    Logs {
        /// Function as tenant/namespace/name
        function: String,

        /// Instance index
        #[arg(short, long, default_value_t = 0)]
        instance: u32,

        /// Page size in bytes
        #[arg(long, default_value_t = DEFAULT_PAGE_BYTES, allow_negative_numbers = true)]
        bytes: i64,

        /// Number of pages to read, walking back from the end
        #[arg(long, default_value_t = 1, conflicts_with = "follow")]
        pages: u32,

        /// Resume backward paging from this position
        #[arg(long, conflicts_with = "forward_pos")]
        backward_pos: Option<i64>,

        /// Read forward from this position
        #[arg(long)]
        forward_pos: Option<i64>,

        /// Read from this worker instead of resolving the placement
        #[arg(long)]
        worker_id: Option<String>,

        /// Keep printing lines as they are appended
        #[arg(long)]
        follow: bool,

        /// Poll interval in milliseconds when following
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        /// Print page positions to stderr
        #[arg(long)]
        positions: bool,
    },
    /// Show the cached placement of a function
    Describe {
        /// Function as tenant/namespace/name
        function: String,
    },
    /// Count the functions the gateway knows under a tenant
    Count {
        tenant: String,
    },
    /// Check that the gateway is reachable
    Ping,
}
