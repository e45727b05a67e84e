use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Data directory holding config.yaml, record files and uploads
    #[clap(short, long, default_value = ".facefind")]
    pub data_dir: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum EventArgs {
    /// Create a new event and print its credentials.
    ///
    /// The host and access tokens are printed exactly once; only their
    /// hashes are stored.
    Create {
        /// Event name
        name: String,

        /// Create the event with face search turned off
        #[clap(long, default_value = "false")]
        no_face_search: bool,
    },

    /// List events
    List {},

    /// Soft-delete an event and all of its photos
    Delete {
        /// Event id
        id: String,

        /// Auto confirm
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum PhotoArgs {
    /// Ingest an image file into an event
    Add {
        /// Event id
        event: String,

        /// Path to an image file
        path: String,

        /// Store the photo unapproved (invisible to search)
        #[clap(long, default_value = "false")]
        unapproved: bool,
    },

    /// Approve a photo for search
    Approve {
        /// Photo id
        id: String,

        /// Revoke approval instead
        #[clap(long, default_value = "false")]
        revoke: bool,
    },

    /// Soft-delete a photo
    Delete {
        /// Photo id
        id: String,

        /// Auto confirm
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },

    /// Re-run face extraction for every photo of an event
    Reindex {
        /// Event id
        event: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start facefind as a service.
    Daemon {},

    /// Manage events
    Event {
        #[clap(subcommand)]
        action: EventArgs,
    },

    /// Manage photos
    Photo {
        #[clap(subcommand)]
        action: PhotoArgs,
    },

    /// Search an event's photos with a reference image
    Search {
        /// Event id
        event: String,

        /// Path to the reference image
        path: String,

        /// Minimum similarity [0.0, 1.0]
        #[clap(short, long)]
        threshold: Option<f32>,

        /// Print only the match count
        #[clap(long, default_value = "false")]
        count: bool,
    },
}
