use std::path::PathBuf;

use boba_core::config::{ClientConfig, OutputFormat};
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "boba", version, about = "Interactive MySQL client for the terminal")]
pub struct Cli {
    /// Path to config file
    #[arg(short = 'c', long, global = true, env = "BOBA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Server hostname
    #[arg(short = 'H', long, global = true)]
    pub host: Option<String>,

    /// Server port
    #[arg(short = 'P', long, global = true)]
    pub port: Option<u16>,

    /// Login user
    #[arg(short = 'u', long, global = true)]
    pub user: Option<String>,

    /// Login password
    #[arg(short = 'p', long, global = true)]
    pub password: Option<String>,

    /// Default database
    #[arg(short = 'd', long, global = true)]
    pub database: Option<String>,

    /// Output format for one-shot commands
    #[arg(short = 'f', long, global = true, value_enum)]
    pub format: Option<FormatArg>,

    /// Log at debug level
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// Flags win over the config file and the environment.
    pub fn apply_overrides(&self, config: &mut ClientConfig) {
        let connection = &mut config.connection;
        if let Some(host) = &self.host {
            connection.host.clone_from(host);
        }
        if let Some(port) = self.port {
            connection.port = port;
        }
        if let Some(user) = &self.user {
            connection.user.clone_from(user);
        }
        if let Some(password) = &self.password {
            connection.password = Some(password.clone()).filter(|pw| !pw.is_empty());
        }
        if let Some(database) = &self.database {
            connection.database.clone_from(database);
        }
        if let Some(format) = self.format {
            config.display.format = format.into();
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open the terminal UI (default)
    #[command(visible_aliases = ["i", "shell"])]
    Interactive,

    /// Run one statement and print its result
    #[command(visible_aliases = ["q", "exec"])]
    Query {
        /// SQL text; separate words are joined with spaces
        #[arg(required = true, num_args = 1..)]
        sql: Vec<String>,
    },

    /// Show connection and server details
    #[command(visible_aliases = ["ping", "info"])]
    Status,

    /// List tables in the current database, or all databases
    #[command(visible_alias = "ls")]
    List {
        #[arg(value_enum, default_value_t = ListTarget::Tables)]
        target: ListTarget,
    },

    /// Show the columns of a table
    #[command(visible_alias = "desc")]
    Describe { table: String },

    /// Run a query and write its rows to a file (CSV unless --format is given)
    Export { query: String, file: PathBuf },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListTarget {
    Tables,
    Databases,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatArg {
    Table,
    Csv,
    Json,
    Markdown,
}

impl From<FormatArg> for OutputFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Table => Self::Table,
            FormatArg::Csv => Self::Csv,
            FormatArg::Json => Self::Json,
            FormatArg::Markdown => Self::Markdown,
        }
    }
}
