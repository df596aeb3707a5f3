//! dirclient CLI
//!
//! Command-line interface for querying and updating a directory server.

use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use dirclient::{Attributes, Client, ClientConfig, Entry, Result, SearchScope};
use tracing_subscriber::{fmt, EnvFilter};

/// dirclient CLI
#[derive(Parser, Debug)]
#[command(name = "dirclient-cli")]
#[command(about = "CLI for directory servers")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:389")]
    server: String,

    /// DN to bind as (anonymous when omitted)
    #[arg(short = 'D', long)]
    bind_dn: Option<String>,

    /// Password for the bind DN
    #[arg(short = 'w', long, default_value = "")]
    password: String,

    /// Per-operation timeout in milliseconds
    #[arg(short, long, default_value = "30000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Scope {
    Base,
    One,
    Sub,
}

impl From<Scope> for SearchScope {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::Base => SearchScope::Base,
            Scope::One => SearchScope::OneLevel,
            Scope::Sub => SearchScope::Subtree,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search for entries
    Search {
        /// Search base DN
        #[arg(short, long, default_value = "")]
        base: String,

        /// Search scope
        #[arg(long, value_enum, default_value = "sub")]
        scope: Scope,

        /// Page size; 0 disables paging
        #[arg(short, long, default_value = "0")]
        page_size: u32,

        /// Filter, e.g. (objectClass=person)
        #[arg(default_value = "(objectClass=*)")]
        filter: String,

        /// Attributes to return (all when omitted)
        attributes: Vec<String>,
    },

    /// Add an entry
    Add {
        /// DN of the new entry
        dn: String,

        /// Attribute values as name=value (repeatable)
        #[arg(short, long = "attr", required = true)]
        attrs: Vec<String>,
    },

    /// Delete an entry
    Delete {
        /// DN of the entry to delete
        dn: String,
    },

    /// Compare an attribute value
    Compare {
        /// DN of the entry
        dn: String,

        /// Attribute name
        attr: String,

        /// Value to test
        value: String,
    },

    /// Show the identity the server associates with this connection
    Whoami,
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dirclient=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    tracing::info!("dirclient CLI v{}", dirclient::VERSION);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config = ClientConfig::builder()
        .operation_timeout_ms(args.timeout_ms)
        .build();

    let client = Client::connect_with_config(&args.server, config)?;

    if let Some(dn) = &args.bind_dn {
        client.bind(dn, &args.password)?;
    }

    let outcome = execute(&client, args.command);
    client.close()?;
    outcome
}

fn execute(client: &Client, command: Commands) -> Result<()> {
    match command {
        Commands::Search {
            base,
            scope,
            page_size,
            filter,
            attributes,
        } => {
            let attributes: Vec<&str> = attributes.iter().map(String::as_str).collect();
            let mut count = 0usize;

            if page_size > 0 {
                for entry in client.paged_search(&base, scope.into(), &filter, &attributes, page_size)? {
                    print_entry(&entry?);
                    count += 1;
                }
            } else {
                let result = client.search(&base, scope.into(), &filter, &attributes)?;
                for entry in &result.entries {
                    print_entry(entry);
                }
                for url in &result.referrals {
                    println!("# referral: {}", url);
                }
                count = result.entries.len();
            }

            println!("# {} entries", count);
        }

        Commands::Add { dn, attrs } => {
            let mut attributes = Attributes::new();
            for pair in &attrs {
                let (name, value) = pair.split_once('=').ok_or_else(|| {
                    dirclient::LdapError::InvalidArgument(format!(
                        "expected name=value, got {:?}",
                        pair
                    ))
                })?;
                match attributes.get_mut(name) {
                    Some(attribute) => {
                        attribute.insert(value.as_bytes());
                    }
                    None => attributes.insert(dirclient::Attribute::new(name, [value]))?,
                }
            }
            client.add(&dn, &attributes)?;
            println!("added {}", dn);
        }

        Commands::Delete { dn } => {
            client.delete(&dn)?;
            println!("deleted {}", dn);
        }

        Commands::Compare { dn, attr, value } => {
            let matched = client.compare(&dn, &attr, value.as_bytes())?;
            println!("{}", if matched { "TRUE" } else { "FALSE" });
        }

        Commands::Whoami => {
            let identity = client.who_am_i()?;
            if identity.is_empty() {
                println!("anonymous");
            } else {
                println!("{}", identity);
            }
        }
    }

    Ok(())
}

fn print_entry(entry: &Entry) {
    println!("dn: {}", entry.dn);
    for attribute in entry.attributes.iter() {
        for value in attribute.values() {
            match std::str::from_utf8(value) {
                Ok(text) => println!("{}: {}", attribute.name(), text),
                Err(_) => println!("{}:: <{} bytes>", attribute.name(), value.len()),
            }
        }
    }
    println!();
}
