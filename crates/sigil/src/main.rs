//! Sigil: atproto identity resolution from the command line
//!
//! Subcommands:
//! - `resolve`: resolve handles or DIDs and verify them in both directions
//! - `handle`: look up the DID a handle claims, without verification
//! - `document`: fetch a DID document

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use miette::Result;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sigil_identity::{
    AtIdentifier, Deadline, Did, DidMode, Handle, IdentityError, IdentityRecord, ResolutionCache,
    Resolver, TracingReporter, Verifier,
};

mod settings;

use settings::ResolverArgs;

#[derive(Parser)]
#[command(name = "sigil")]
#[command(about = "Resolve and verify atproto handles and DIDs", long_about = None)]
struct Cli {
    #[command(flatten)]
    resolver: ResolverArgs,

    /// Give up after this many seconds
    #[arg(long, global = true, default_value = "30")]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve handles or DIDs and print verified identity records as JSON
    Resolve {
        /// Handles (alice.example.com) or DIDs (did:plc:...)
        #[arg(value_name = "IDENTIFIER", required = true)]
        identifiers: Vec<String>,

        /// For DIDs, fetch the document without checking its handle
        #[arg(long)]
        document_only: bool,
    },

    /// Print the DID a handle claims, without checking the DID document
    Handle {
        #[arg(value_name = "HANDLE")]
        handle: String,
    },

    /// Print the current DID document for a DID
    Document {
        #[arg(value_name = "DID")]
        did: String,
    },
}

/// One line of `resolve` output.
#[derive(Serialize)]
#[serde(untagged)]
enum Resolution<'a> {
    Found(&'a IdentityRecord),
    Failed {
        identifier: &'a str,
        kind: String,
        error: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing. Output goes to stdout, so logs go to stderr.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "sigil=info,sigil_identity=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = cli
        .resolver
        .to_config()
        .map_err(|e| miette::miette!("invalid configuration: {}", e))?;
    let verifier = Verifier::from_config(&config)
        .map_err(|e| miette::miette!("failed to build resolver: {}", e))?
        .with_reporter(Arc::new(TracingReporter));
    let deadline = Deadline::after(Duration::from_secs(cli.timeout_secs));

    match cli.command {
        Commands::Resolve {
            identifiers,
            document_only,
        } => {
            let mode = if document_only {
                DidMode::DocumentOnly
            } else {
                DidMode::Bidirectional
            };
            let cache = ResolutionCache::new(Arc::new(verifier), config.cache.clone())
                .with_reporter(Arc::new(TracingReporter));
            resolve(&cache, &identifiers, mode, &deadline).await
        }

        Commands::Handle { handle } => {
            let handle = Handle::parse(&handle).map_err(|e| miette::miette!("{}", e))?;
            let did = verifier
                .handle_resolver()
                .resolve(&handle, &deadline)
                .await
                .map_err(|e| miette::miette!("{}: {}", handle, e))?;
            println!("{did}");
            Ok(())
        }

        Commands::Document { did } => {
            let did = Did::parse(&did).map_err(|e| miette::miette!("{}", e))?;
            let document = verifier
                .did_resolver()
                .resolve(&did, &deadline)
                .await
                .map_err(|e| miette::miette!("{}: {}", did, e))?;
            print_json(&document)
        }
    }
}

/// Resolve every identifier concurrently; duplicates share one lookup.
async fn resolve(
    cache: &ResolutionCache,
    identifiers: &[String],
    mode: DidMode,
    deadline: &Deadline,
) -> Result<()> {
    let lookups = identifiers.iter().map(|input| async move {
        let outcome = match AtIdentifier::parse(input) {
            Ok(identifier) => cache.resolve_identifier(&identifier, mode, deadline).await,
            Err(e) => Err(e),
        };
        (input.as_str(), outcome)
    });
    let outcomes = futures_util::future::join_all(lookups).await;

    let mut failures = 0;
    for (input, outcome) in &outcomes {
        let line = match outcome {
            Ok(record) => Resolution::Found(record),
            Err(e) => {
                failures += 1;
                failure(input, e)
            }
        };
        print_json(&line)?;
    }

    if failures > 0 {
        return Err(miette::miette!(
            "{} of {} identifiers failed to resolve",
            failures,
            outcomes.len()
        ));
    }
    Ok(())
}

fn failure<'a>(identifier: &'a str, err: &IdentityError) -> Resolution<'a> {
    tracing::warn!(identifier = %identifier, error = %err, "resolution failed");
    Resolution::Failed {
        identifier,
        kind: format!("{:?}", err.kind()),
        error: err.to_string(),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| miette::miette!("failed to serialize output: {}", e))?;
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_resolve_command() {
        let cli = Cli::try_parse_from([
            "sigil",
            "resolve",
            "alice.example.com",
            "did:plc:abc123",
            "--document-only",
        ])
        .unwrap();
        match cli.command {
            Commands::Resolve {
                identifiers,
                document_only,
            } => {
                assert_eq!(identifiers, vec!["alice.example.com", "did:plc:abc123"]);
                assert!(document_only);
            }
            _ => panic!("expected resolve"),
        }
        assert_eq!(cli.timeout_secs, 30);
    }

    #[test]
    fn test_resolve_requires_identifier() {
        assert!(Cli::try_parse_from(["sigil", "resolve"]).is_err());
    }

    #[test]
    fn test_failure_line_shape() {
        let err = IdentityError::UnsupportedMethod("key".into());
        let line = failure("did:key:z6Mk", &err);
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "identifier": "did:key:z6Mk",
                "kind": "UnsupportedMethod",
                "error": "unsupported DID method: key",
            })
        );
    }
}
