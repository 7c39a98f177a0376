use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

const DEFAULT_IMAGE: &str = "5cebb13a-f783-4f8c-8058-c4182c724ccd";

#[derive(Parser)]
#[command(name = "cumulus")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Provision and wire together cloud infrastructure", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Region (data center) to provision in, e.g. DFW or ORD
    #[arg(long, env = "CUMULUS_REGION", global = true)]
    pub region: Option<String>,

    /// Account username
    #[arg(long, env = "CUMULUS_USERNAME", global = true, hide_env_values = true)]
    pub username: Option<String>,

    /// Account API key
    #[arg(long, env = "CUMULUS_API_KEY", global = true, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Config file (default: ~/.config/cumulus/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create servers and print their credentials
    Servers(ServersArgs),

    /// Create servers behind a new load balancer
    Cluster(ClusterArgs),

    /// Servers, load balancer, health check, error page, DNS and backup
    Stack(StackArgs),

    /// Add new servers to an existing load balancer
    Grow(GrowArgs),

    /// Clone a server through a snapshot image
    Clone(CloneArgs),

    /// Create one server and point a DNS name at it
    Host(HostArgs),

    /// Create an A or AAAA record
    Record(RecordArgs),

    /// Create a database instance with a database and user
    Database(DatabaseArgs),

    /// Create a CDN-enabled container
    CdnContainer(CdnContainerArgs),

    /// Publish a static site from a CDN container behind a CNAME
    Site(SiteArgs),

    /// Upload the files of a directory into a container
    Upload(UploadArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Shared argument groups
// ============================================================================

#[derive(Args, Clone)]
pub struct WaitArgs {
    /// Wait INTERVAL seconds between status checks
    #[arg(short = 't', long)]
    pub interval: Option<u64>,
}

#[derive(Args, Clone)]
pub struct ServerArgs {
    /// Base server name, numbered from 1 (web1, web2, ...)
    #[arg(short, long, default_value = "web")]
    pub name: String,

    /// Number of servers to create
    #[arg(short, long, default_value = "2")]
    pub count: usize,

    /// Image id to boot from
    #[arg(short, long, default_value = DEFAULT_IMAGE)]
    pub image: String,

    /// Flavor id
    #[arg(short, long, default_value = "2")]
    pub flavor: String,
}

#[derive(Args, Clone)]
pub struct BalancerArgs {
    /// Load balancer name
    #[arg(short = 'l', long = "lb-name", default_value = "testlb")]
    pub lb_name: String,

    /// Virtual IP port
    #[arg(long, default_value = "80")]
    pub port: u16,

    /// Port the load balancer connects to on each node
    #[arg(short = 'p', long, default_value = "80")]
    pub node_port: u16,

    /// Balanced protocol
    #[arg(short = 'o', long, default_value = "HTTP")]
    pub protocol: String,

    /// Place the virtual IP on the private service network
    #[arg(short = 'w', long)]
    pub private: bool,
}

// ============================================================================
// Scenarios
// ============================================================================

#[derive(Args)]
pub struct ServersArgs {
    #[command(flatten)]
    pub server: ServerArgs,

    /// Public key installed as root's authorized_keys
    #[arg(short = 'k', long)]
    pub ssh_key: Option<PathBuf>,

    #[command(flatten)]
    pub wait: WaitArgs,
}

#[derive(Args)]
pub struct ClusterArgs {
    #[command(flatten)]
    pub server: ServerArgs,

    #[command(flatten)]
    pub balancer: BalancerArgs,

    #[command(flatten)]
    pub wait: WaitArgs,
}

#[derive(Args)]
pub struct StackArgs {
    /// HTML file served when no node is available
    pub error_page: PathBuf,

    /// Hostname to create for the load balancer virtual IP
    pub fqdn: String,

    #[command(flatten)]
    pub server: ServerArgs,

    #[command(flatten)]
    pub balancer: BalancerArgs,

    /// Public key installed as root's authorized_keys
    #[arg(short = 'k', long, default_value = "~/.ssh/id_rsa.pub")]
    pub ssh_key: PathBuf,

    /// Container the error page is backed up to (must not exist)
    #[arg(short = 'a', long, default_value = "errorcontainer")]
    pub container: String,

    #[command(flatten)]
    pub wait: WaitArgs,
}

#[derive(Args)]
pub struct GrowArgs {
    /// Name of the existing load balancer
    pub load_balancer: String,

    #[command(flatten)]
    pub server: ServerArgs,

    /// Port the load balancer connects to on each node
    #[arg(short = 'p', long, default_value = "80")]
    pub node_port: u16,

    #[command(flatten)]
    pub wait: WaitArgs,
}

#[derive(Args)]
pub struct CloneArgs {
    /// Name of the new server
    pub destination: String,

    /// Name of the server to clone
    #[arg(short, long, conflicts_with = "id", required_unless_present = "id")]
    pub name: Option<String>,

    /// Id of the server to clone
    #[arg(short, long)]
    pub id: Option<String>,

    /// Delete the snapshot image once the clone is built
    #[arg(long)]
    pub delete_image: bool,

    #[command(flatten)]
    pub wait: WaitArgs,
}

#[derive(Args)]
pub struct HostArgs {
    /// Fully qualified hostname; also the server name
    pub fqdn: String,

    /// Image id to boot from
    #[arg(short, long, default_value = DEFAULT_IMAGE)]
    pub image: String,

    /// Flavor id
    #[arg(short, long, default_value = "2")]
    pub flavor: String,

    /// Public key installed as root's authorized_keys
    #[arg(short = 'k', long)]
    pub ssh_key: Option<PathBuf>,

    /// Give up on the server build after TIMEOUT seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    #[command(flatten)]
    pub wait: WaitArgs,
}

#[derive(Args)]
pub struct RecordArgs {
    /// Fully qualified hostname
    pub fqdn: String,

    /// IPv4 or IPv6 address the name points at
    pub address: String,

    /// Create the zone with admin contact EMAIL if it doesn't exist
    #[arg(long, value_name = "EMAIL")]
    pub create_zone: Option<String>,

    #[command(flatten)]
    pub wait: WaitArgs,
}

#[derive(Args)]
pub struct DatabaseArgs {
    /// Database flavor id
    #[arg(short, long, default_value = "1")]
    pub flavor: String,

    /// Volume size in GB
    #[arg(short, long, default_value = "1")]
    pub size: u32,

    /// Instance name
    #[arg(short, long, default_value = "testinst")]
    pub instance: String,

    /// Database name
    #[arg(short = 'n', long, default_value = "testdb")]
    pub database: String,

    /// Database user
    #[arg(short, long, default_value = "testuser")]
    pub user: String,

    /// Password for the database user
    #[arg(short, long, default_value = "testpass")]
    pub password: String,

    #[command(flatten)]
    pub wait: WaitArgs,
}

#[derive(Args)]
pub struct CdnContainerArgs {
    /// Container to create (must not exist)
    pub container: String,
}

#[derive(Args)]
pub struct SiteArgs {
    /// Container to create (must not exist)
    pub container: String,

    /// Hostname the CNAME is created for
    pub fqdn: String,

    /// Name of the index object
    #[arg(short, long, default_value = "index.html")]
    pub index: String,

    /// Local file uploaded as the index object
    #[arg(long)]
    pub index_file: Option<PathBuf>,

    #[command(flatten)]
    pub wait: WaitArgs,
}

#[derive(Args)]
pub struct UploadArgs {
    /// Directory whose files are uploaded
    pub source: PathBuf,

    /// Destination container
    pub container: String,

    /// Fail instead of creating a missing container
    #[arg(long)]
    pub no_create: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_stack_defaults() {
        let cli = Cli::try_parse_from(["cumulus", "stack", "error.html", "www.example.com"]).unwrap();
        match cli.command {
            Command::Stack(args) => {
                assert_eq!(args.server.count, 2);
                assert_eq!(args.server.flavor, "2");
                assert_eq!(args.balancer.lb_name, "testlb");
                assert_eq!(args.container, "errorcontainer");
                assert!(!args.balancer.private);
                assert!(args.wait.interval.is_none());
            }
            _ => panic!("expected stack"),
        }
    }

    #[test]
    fn test_clone_requires_exactly_one_source() {
        assert!(Cli::try_parse_from(["cumulus", "clone", "copy"]).is_err());
        assert!(
            Cli::try_parse_from(["cumulus", "clone", "copy", "--name", "a", "--id", "b"]).is_err()
        );
        assert!(Cli::try_parse_from(["cumulus", "clone", "copy", "--id", "b"]).is_ok());
    }

    #[test]
    fn test_verbosity_counts() {
        let cli = Cli::try_parse_from(["cumulus", "-vv", "cdn-container", "assets"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }
}
