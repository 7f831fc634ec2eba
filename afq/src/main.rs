//! afq: Advanced Filter Query - CLI for composing, encoding and storing filters.

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "afq")]
#[command(about = "Advanced Filter Query - compose, encode and store filter queries")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Identity a command runs as.
#[derive(Args, Debug, Clone, Default)]
pub struct ActorArgs {
    /// Username (default: $USER)
    #[arg(short = 'u', long = "user")]
    pub user: Option<String>,

    /// Group the user belongs to (repeatable)
    #[arg(short = 'g', long = "group")]
    pub groups: Vec<String>,

    /// Act as a superuser
    #[arg(long = "superuser")]
    pub superuser: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the filter store
    Init,

    /// Build a query from filter rows (JSON) and print its encoding
    Encode {
        /// File with a JSON array of rows ("-" or omitted reads stdin)
        #[arg(short = 'r', long = "rows")]
        rows: Option<String>,

        /// Model the rows refer to (validates field paths against the schema)
        #[arg(short = 'm', long = "model")]
        model: Option<String>,

        /// Schema file (default: AFILTER_ROOT/schema.toml)
        #[arg(long = "schema")]
        schema: Option<String>,

        /// Print plain JSON instead of base64
        #[arg(long = "plain")]
        plain: bool,
    },

    /// Decode an encoded query
    Decode {
        /// The encoded query string
        query: String,

        /// Output: tree, mapping, fields, rows
        #[arg(short = 'f', long = "format", default_value = "tree")]
        format: String,

        /// Model used to validate fields when printing rows
        #[arg(short = 'm', long = "model")]
        model: Option<String>,

        /// Schema file (default: AFILTER_ROOT/schema.toml)
        #[arg(long = "schema")]
        schema: Option<String>,

        /// Input is plain JSON instead of base64
        #[arg(long = "plain")]
        plain: bool,
    },

    /// Create or update a stored filter
    Save {
        /// Filter title
        #[arg(short = 't', long = "title")]
        title: String,

        /// Model the filter applies to
        #[arg(short = 'm', long = "model")]
        model: String,

        /// File with a JSON array of rows ("-" or omitted reads stdin)
        #[arg(short = 'r', long = "rows")]
        rows: Option<String>,

        /// Update the filter with this id instead of creating one
        #[arg(long = "id")]
        id: Option<String>,

        /// Share with a user (repeatable)
        #[arg(long = "share-user")]
        share_users: Vec<String>,

        /// Share with a group (repeatable)
        #[arg(long = "share-group")]
        share_groups: Vec<String>,

        /// Schema file (default: AFILTER_ROOT/schema.toml)
        #[arg(long = "schema")]
        schema: Option<String>,

        #[command(flatten)]
        actor: ActorArgs,
    },

    /// List filters shared with you
    #[command(visible_alias = "ls")]
    List {
        /// Only filters for this model
        #[arg(short = 'm', long = "model")]
        model: Option<String>,

        /// Output format: table, json
        #[arg(short = 'f', long = "format", default_value = "table")]
        format: String,

        #[command(flatten)]
        actor: ActorArgs,
    },

    /// Show a stored filter as editable rows
    Show {
        /// Filter id
        id: String,

        /// Output: rows, tree
        #[arg(short = 'f', long = "format", default_value = "rows")]
        format: String,

        /// Schema file (default: AFILTER_ROOT/schema.toml)
        #[arg(long = "schema")]
        schema: Option<String>,

        #[command(flatten)]
        actor: ActorArgs,
    },

    /// Delete a stored filter
    #[command(visible_alias = "rm")]
    Delete {
        /// Filter id
        id: String,

        #[command(flatten)]
        actor: ActorArgs,
    },
}

/// Log to stderr; filter from AFQ_LOG, then RUST_LOG, default warn.
fn init_logging() {
    let filter = std::env::var("AFQ_LOG")
        .ok()
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init => commands::init(),
        Commands::Encode { rows, model, schema, plain } => {
            commands::encode(rows.as_deref(), model.as_deref(), schema.as_deref(), plain)
        }
        Commands::Decode { query, format, model, schema, plain } => {
            commands::decode(&query, &format, model.as_deref(), schema.as_deref(), plain)
        }
        Commands::Save { title, model, rows, id, share_users, share_groups, schema, actor } => {
            let opts = commands::SaveOptions {
                title,
                model,
                id,
                share_users,
                share_groups,
            };
            commands::save(&opts, rows.as_deref(), schema.as_deref(), &actor)
        }
        Commands::List { model, format, actor } => commands::list(model.as_deref(), &format, &actor),
        Commands::Show { id, format, schema, actor } => {
            commands::show(&id, &format, schema.as_deref(), &actor)
        }
        Commands::Delete { id, actor } => commands::delete(&id, &actor),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
