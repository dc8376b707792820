use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ldx",
    about = "LDX — explore and edit embedded document databases",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Explorer settings file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database password; prompted for on stdin when needed and absent
    #[arg(long, global = true)]
    pub password: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a new, empty database file
    Create(CreateArgs),
    /// List collections
    Collections(DatabaseArgs),
    /// Show engine information
    Info(DatabaseArgs),
    /// Run a command and print its result
    Query(QueryArgs),
    /// Export documents, a query result, or stored files
    Export(ExportArgs),
    /// Rewrite the database file, optionally changing its password
    Rebuild(RebuildArgs),
    /// Create an empty collection
    AddCollection(CollectionArgs),
    /// Rename a collection
    Rename(RenameArgs),
    /// Drop a collection
    Drop(CollectionArgs),
    /// Insert documents from canonical text
    Import(ImportArgs),
    /// Store a file as a blob
    AddBlob(AddBlobArgs),
    /// Get or set the user version
    UserVersion(UserVersionArgs),
}

#[derive(Args)]
pub struct DatabaseArgs {
    pub database: PathBuf,
}

#[derive(Args)]
pub struct CreateArgs {
    pub database: PathBuf,
}

#[derive(Args)]
pub struct QueryArgs {
    pub database: PathBuf,
    pub command: String,
    /// Print escaped canonical text instead of decoded characters
    #[arg(long)]
    pub raw: bool,
    /// Print as a table
    #[arg(long)]
    pub table: bool,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum ExportFormat {
    Json,
    Csv,
    Files,
}

#[derive(Args)]
pub struct ExportArgs {
    pub database: PathBuf,
    /// Collection to export; omit when using --query
    pub collection: Option<String>,
    #[arg(long, default_value = "json")]
    pub format: ExportFormat,
    /// Export the result of this command instead of a collection
    #[arg(long, conflicts_with = "collection")]
    pub query: Option<String>,
    /// Only export these document ids (canonical text, e.g. 1 or "\"a\"")
    #[arg(long = "id")]
    pub ids: Vec<String>,
    /// Output file, or directory for --format files
    #[arg(short, long)]
    pub out: PathBuf,
}

#[derive(Args)]
pub struct RebuildArgs {
    pub database: PathBuf,
    /// Password to set after the rebuild
    #[arg(long, conflicts_with = "clear_password")]
    pub new_password: Option<String>,
    /// Remove password protection
    #[arg(long)]
    pub clear_password: bool,
}

#[derive(Args)]
pub struct CollectionArgs {
    pub database: PathBuf,
    pub name: String,
}

#[derive(Args)]
pub struct RenameArgs {
    pub database: PathBuf,
    pub old: String,
    pub new: String,
}

#[derive(Args)]
pub struct ImportArgs {
    pub database: PathBuf,
    pub collection: String,
    /// File holding a document or an array of documents; `-` for stdin
    pub input: PathBuf,
    /// Create the collection if it does not exist
    #[arg(long)]
    pub create: bool,
}

#[derive(Args)]
pub struct AddBlobArgs {
    pub database: PathBuf,
    pub id: String,
    pub file: PathBuf,
}

#[derive(Args)]
pub struct UserVersionArgs {
    pub database: PathBuf,
    pub value: Option<i32>,
}
