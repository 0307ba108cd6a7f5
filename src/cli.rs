use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "agrishare")]
#[command(about = "Client for the AgriShare dataset service", long_about = None, version)]
pub struct Cli {
    /// Configuration file; overrides AGRISHARE_CONFIG
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(flatten)]
    Service(ServiceCommands),
    /// Inspect the effective configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Commands that use the stored session or the backend
#[derive(Subcommand, Debug)]
pub enum ServiceCommands {
    /// Sign in with email and password
    Login(LoginArgs),
    /// Create an account and sign in
    Signup(SignupArgs),
    /// Sign in with a third-party identity token
    Oauth(OAuthArgs),
    /// Forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Create a dataset and upload files into it
    Upload(UploadArgs),
    /// Inspect datasets
    #[command(subcommand)]
    Dataset(DatasetCommands),
    /// Download a dataset file
    Download(DownloadArgs),
}

#[derive(clap::Args, Debug)]
pub struct LoginArgs {
    #[arg(long)]
    pub email: String,
    #[arg(long)]
    pub password: String,
}

#[derive(clap::Args, Debug)]
pub struct SignupArgs {
    #[arg(long)]
    pub email: String,
    #[arg(long)]
    pub password: String,
    #[arg(long)]
    pub first_name: String,
    #[arg(long)]
    pub last_name: String,
    #[arg(long)]
    pub gender: Option<String>,
    #[arg(long)]
    pub country: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct OAuthArgs {
    /// Identity provider, e.g. "google"
    #[arg(long, default_value = "google")]
    pub provider: String,
    /// ID token issued by the provider
    #[arg(long)]
    pub credential: String,
}

#[derive(clap::Args, Debug)]
pub struct UploadArgs {
    /// Dataset name
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub description: Option<String>,
    /// Tag to attach; repeat for several
    #[arg(long = "tag")]
    pub tags: Vec<String>,
    /// Where the data was collected
    #[arg(long)]
    pub location: Option<String>,
    /// Period the data covers, e.g. "2019-2023"
    #[arg(long)]
    pub period: Option<String>,
    /// Files to upload, in order
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum DatasetCommands {
    /// Show dataset details
    Show { id: i64 },
    /// List the files attached to a dataset
    Files { id: i64 },
}

#[derive(clap::Args, Debug)]
pub struct DownloadArgs {
    pub file_id: i64,
    /// Where to write the file
    #[arg(long, short)]
    pub output: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the configuration after all sources are applied
    Show,
}
