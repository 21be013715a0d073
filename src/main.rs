//! netfence - declarative nftables policy store
//!
//! Command-line front end for managing one host's firewall policy.
//!
//! # Usage
//!
//! ```bash
//! netfence list                                   # All rules in id order
//! netfence add-rule --proto tcp --ports 22,443    # Accept HTTPS and SSH inbound
//! netfence set-defaults --input drop --forward drop --output accept
//! netfence dryrun                                 # Preview what apply would load
//! netfence export --file policy.json              # Save the whole policy
//! netfence import --file policy.json              # Replace the whole policy
//! netfence --as operator apply                    # Load the ruleset into the kernel
//! ```
//!
//! Configuration is read from `~/.config/netfence/config.json` (or `--config`)
//! and can be overridden with `NETFENCE_DB`, `NETFENCE_LOCK` and
//! `NETFENCE_NFT_COMMAND`.

use clap::{ArgAction, Parser, Subcommand};
use netfence::config::load_config;
use netfence::core::error::NftablesErrorPattern;
use netfence::snapshot::{read_snapshot, to_json, write_snapshot};
use netfence::utils::truncate_string;
use netfence::{Defaults, DefaultsDraft, Error, PolicyService, Rule, RuleDraft};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;

/// Widest comment shown in rule tables
const COMMENT_WIDTH: usize = 32;

/// Default number of audit entries shown
const AUDIT_LIMIT: usize = 20;

#[derive(Parser)]
#[command(name = "netfence", version)]
#[command(about = "Declarative nftables policy store", long_about = None)]
struct Cli {
    /// Policy database (overrides config and NETFENCE_DB)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,
    /// Change lock file (overrides config and NETFENCE_LOCK)
    #[arg(long, global = true, value_name = "PATH")]
    lock: Option<PathBuf>,
    /// Config file to use instead of the per-user one
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// User to act as
    #[arg(long = "as", global = true, default_value = "root", value_name = "USER")]
    actor: String,
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List rules in id order
    List {
        /// Only show enabled rules
        #[arg(long)]
        enabled: bool,
    },
    /// Show the default chain policies
    Defaults,
    /// Replace the default chain policies
    SetDefaults {
        #[arg(long, value_name = "POLICY")]
        input: String,
        #[arg(long, value_name = "POLICY")]
        forward: String,
        #[arg(long, value_name = "POLICY")]
        output: String,
        #[arg(long, default_value = "")]
        log_prefix: String,
    },
    /// Add a rule at the end of its chain
    AddRule {
        #[arg(long, default_value = "input")]
        chain: String,
        #[arg(long, default_value = "all")]
        proto: String,
        #[arg(long, default_value = "accept")]
        action: String,
        /// Match the inbound interface
        #[arg(long)]
        in_if: Option<String>,
        /// Match the outbound interface
        #[arg(long)]
        out_if: Option<String>,
        /// Comma-separated destination ports (tcp/udp only)
        #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
        ports: Vec<i64>,
        /// Comma-separated source prefixes
        #[arg(long = "src", value_delimiter = ',')]
        sources: Vec<String>,
        /// Comma-separated destination prefixes
        #[arg(long = "dst", value_delimiter = ',')]
        destinations: Vec<String>,
        /// Comma-separated ICMP types (icmp only)
        #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
        icmp_types: Vec<i64>,
        #[arg(long)]
        comment: Option<String>,
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        enabled: bool,
    },
    /// Delete a rule by id
    DelRule { id: i64 },
    /// Write the whole policy as a JSON document
    Export {
        /// Destination file; prints to stdout when omitted
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Replace the whole policy with a JSON document
    Import {
        #[arg(long)]
        file: PathBuf,
    },
    /// Show the defaults and the enabled rules that apply would load
    Dryrun,
    /// Print the nftables script for the current policy
    Render,
    /// Let nft parse the current script without loading it
    Check,
    /// Load the current policy into the kernel
    Apply,
    /// Show recent audit entries, newest first
    Audit {
        #[arg(long, default_value_t = AUDIT_LIMIT)]
        limit: usize,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            if let Error::Nftables { message, .. } = &e {
                let translation = NftablesErrorPattern::match_error(message);
                eprintln!("{}", translation.user_message);
                for suggestion in &translation.suggestions {
                    eprintln!("  - {suggestion}");
                }
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> netfence::Result<()> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(lock) = cli.lock {
        config.lock_path = lock;
    }

    let mut service = PolicyService::from_config(&config, cli.actor)?;

    match cli.command {
        Commands::List { enabled } => {
            print_rules(&service.rules(enabled)?);
        }
        Commands::Defaults => {
            print_defaults(&service.defaults()?);
        }
        Commands::SetDefaults {
            input,
            forward,
            output,
            log_prefix,
        } => {
            let defaults = service.set_defaults(&DefaultsDraft {
                input_policy: input,
                forward_policy: forward,
                output_policy: output,
                log_prefix,
            })?;
            println!("✓ Default policies updated.");
            print_defaults(&defaults);
        }
        Commands::AddRule {
            chain,
            proto,
            action,
            in_if,
            out_if,
            ports,
            sources,
            destinations,
            icmp_types,
            comment,
            enabled,
        } => {
            let id = service.add_rule(&RuleDraft {
                chain,
                protocol: proto,
                action,
                in_iface: in_if,
                out_iface: out_if,
                ports,
                sources,
                destinations,
                icmp_types,
                comment,
                enabled,
            })?;
            println!("✓ Added rule {id}.");
        }
        Commands::DelRule { id } => {
            if service.delete_rule(id)? {
                println!("✓ Deleted rule {id}.");
            } else {
                println!("No rule with id {id}.");
            }
        }
        Commands::Export { file } => {
            let snapshot = service.export()?;
            match file {
                Some(path) => {
                    write_snapshot(&path, &snapshot)?;
                    println!(
                        "✓ Exported {} rules to {}.",
                        snapshot.rules.len(),
                        path.display()
                    );
                }
                None => print!("{}", to_json(&snapshot)?),
            }
        }
        Commands::Import { file } => {
            let snapshot = read_snapshot(&file)?;
            let count = service.import(&snapshot)?;
            println!("✓ Imported {count} rules from {}.", file.display());
        }
        Commands::Dryrun => {
            print_defaults(&service.defaults()?);
            println!();
            print_rules(&service.rules(true)?);
        }
        Commands::Render => {
            print!("{}", service.render()?);
        }
        Commands::Check => {
            service.check()?;
            println!("✓ nft accepted the ruleset.");
        }
        Commands::Apply => {
            let report = service.apply()?;
            println!("✓ Applied {} rules to the kernel.", report.rules);
        }
        Commands::Audit { limit } => {
            for event in service.audit_trail(limit)? {
                println!(
                    "{}  {:<8} {:<16} {:<10} {}",
                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    event.actor,
                    event.event_type,
                    event.object,
                    event.details
                );
            }
        }
    }
    Ok(())
}

fn print_defaults(defaults: &Defaults) {
    println!("{:<8} {:<8} {:<8} LOG PREFIX", "INPUT", "FORWARD", "OUTPUT");
    println!(
        "{:<8} {:<8} {:<8} {}",
        defaults.input_policy, defaults.forward_policy, defaults.output_policy, defaults.log_prefix
    );
}

fn print_rules(rules: &[Rule]) {
    if rules.is_empty() {
        println!("No rules.");
        return;
    }

    println!(
        "{:>5}  {:<8} {:<6} {:<7} {:<8} {:<8} {:<18} {:<18} {:<18} {:<6} {:<3} COMMENT",
        "ID", "CHAIN", "PROTO", "ACTION", "IN", "OUT", "PORTS", "SRC", "DST", "ICMP", "ON"
    );
    for rule in rules {
        println!(
            "{:>5}  {:<8} {:<6} {:<7} {:<8} {:<8} {:<18} {:<18} {:<18} {:<6} {:<3} {}",
            rule.id,
            rule.chain,
            rule.protocol,
            rule.action,
            rule.in_iface.as_deref().unwrap_or("-"),
            rule.out_iface.as_deref().unwrap_or("-"),
            truncate_string(&join_or_dash(&rule.ports), 18),
            truncate_string(&join_or_dash(&rule.sources), 18),
            truncate_string(&join_or_dash(&rule.destinations), 18),
            truncate_string(&join_or_dash(&rule.icmp_types), 6),
            if rule.enabled { "yes" } else { "no" },
            truncate_string(rule.comment.as_deref().unwrap_or(""), COMMENT_WIDTH),
        );
    }
}

fn join_or_dash<T: ToString>(values: &[T]) -> String {
    if values.is_empty() {
        "-".to_string()
    } else {
        values
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}
