//! CLI command definitions.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Print this install's machine id
    MachineId,

    /// Activate a license key on this machine
    Activate {
        /// License key
        key: String,
    },

    /// Show license status
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove the stored license key
    Deactivate,

    /// Show or update the shop profile
    Profile {
        #[arg(long)]
        shop: Option<String>,

        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        phone: Option<String>,

        #[arg(long)]
        address: Option<String>,
    },

    /// Issue and manage license keys
    Admin {
        /// Admin password (prompted if omitted)
        #[arg(long, global = true, env = "KPS_ADMIN_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Generate a new key for a machine
    Generate {
        /// Machine id of the target install
        #[arg(short, long)]
        machine: String,

        /// Term in days; fractions allowed for trials
        #[arg(short, long)]
        days: f64,

        #[arg(short, long, default_value = "PRO")]
        plan: String,

        #[arg(long, default_value_t = 0.0)]
        price: f64,

        #[arg(long)]
        shop: Option<String>,

        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        phone: Option<String>,

        #[arg(long)]
        address: Option<String>,
    },

    /// Move a key's remaining time to another machine
    Transfer {
        /// Key to transfer
        #[arg(short, long)]
        key: String,

        /// Machine id of the new install
        #[arg(long)]
        to: String,
    },

    /// Replace a key with a fresh term on the same machine
    Renew {
        #[arg(short, long)]
        key: String,

        #[arg(short, long)]
        days: f64,

        /// New plan (keeps the current plan if omitted)
        #[arg(short, long)]
        plan: Option<String>,
    },

    /// List all license records
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Export all records to a backup file
    Export {
        file: PathBuf,
    },

    /// Import records from a backup file
    Import {
        file: PathBuf,
    },

    /// Change the admin password
    SetPassword,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}
