use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about = "Search images by their detected labels", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP daemon
    Daemon {
        /// Address to listen on (defaults to `listen_addr` from config)
        #[clap(long)]
        addr: Option<String>,
    },

    /// Find images matching a free-text query
    Search {
        query: String,

        /// Print similarity scores alongside ids
        #[clap(short, long, default_value = "false")]
        scores: bool,
    },

    /// Add an image to the catalog
    Add {
        /// Image file to upload
        file: PathBuf,

        /// Labels to store instead of calling the labeler,
        /// e.g. "cat:0.98,piano:0.9,keys"
        #[clap(short, long)]
        labels: Option<String>,
    },

    /// List all image ids
    List {},

    /// Show the labels stored for an image
    Labels { id: String },

    /// Delete an image and its catalog record
    Delete {
        id: String,

        /// Auto confirm
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },
}
