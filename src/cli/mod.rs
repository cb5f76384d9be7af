pub mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pocket-sync")]
#[command(about = "Keep a local, offline copy of your Pocket list", long_about = None)]
pub struct Cli {
    /// Use this config file instead of ~/.config/pocket-sync/config.toml
    #[arg(short, long, global = true)]
    pub config: Option<std::path::PathBuf>,

    /// Keep the item cache and credential here
    #[arg(long, global = true)]
    pub data_dir: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Authorize pocket-sync in the browser
    Login,
    /// Forget the stored credential
    Logout {
        /// Also delete the cached items
        #[arg(long)]
        purge: bool,
    },
    /// Show the logged-in account
    Whoami,
    /// Fetch the full list from Pocket and merge it into the cache
    Sync,
    /// List cached items
    List {
        /// Only archived items
        #[arg(long, conflicts_with = "unread")]
        archived: bool,

        /// Only unread items
        #[arg(long)]
        unread: bool,

        /// Only favorites
        #[arg(long)]
        favorites: bool,
    },
    /// Save a URL to Pocket
    Add {
        /// URL to save
        url: String,
    },
    /// Move an item to the archive
    Archive { id: String },
    /// Move an archived item back to the list
    Readd { id: String },
    /// Mark an item as favorite
    Favorite { id: String },
    /// Remove the favorite mark
    Unfavorite { id: String },
    /// Delete an item from Pocket
    Delete { id: String },
    /// Sync periodically and print changes until interrupted
    Watch {
        /// Sync interval (e.g., "30m", "1h", "1d"); defaults to sync.interval
        #[arg(short, long)]
        interval: Option<String>,

        /// Wait one interval before the first sync
        #[arg(long)]
        no_initial_sync: bool,
    },
    /// Delete the local item cache (recovery from a corrupt store)
    Reset {
        /// Skip the confirmation check
        #[arg(long)]
        yes: bool,
    },
}
