use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// Command line interface for the choir wall.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Backend base URL (http or https).
    #[arg(long, global = true)]
    pub url: Option<String>,
    /// Public anon key of the backend project.
    #[arg(long, global = true)]
    pub anon_key: Option<String>,
    /// Access token of the signed-in member.
    #[arg(long, global = true)]
    pub token: Option<String>,
    /// Interface language (ca, es, en, fr).
    #[arg(long, global = true)]
    pub locale: Option<String>,
    /// Enable or disable logging (true/false).
    #[arg(long, global = true)]
    pub logging: Option<bool>,
    /// Path to configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Default, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the wall and follow live changes until Ctrl+C.
    #[default]
    Tail,
    /// Publish a post.
    Post {
        /// Text of the post.
        #[arg(long)]
        text: Option<String>,
        /// File to attach; may be repeated.
        #[arg(long = "attach", value_name = "FILE")]
        attachments: Vec<PathBuf>,
    },
    /// Delete a post by id.
    Delete { id: Uuid },
    /// Post count and latest posts (admins only).
    Stats,
}
