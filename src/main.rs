//! schemactl: command-line client for schemad.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use schemad::client::{RemoteReasoner, SchemaClient};
use schemad::kb::{KbSettings, KnowledgeBase, SchemaReasoner};
use schemad::ontology::{Axiom, AxiomSet, Entity};
use schemad::reasoner::QueryKind;
use schemad::source::DocumentFile;

#[derive(Parser)]
#[command(name = "schemactl", version, about = "Schema reasoning client")]
struct Cli {
    /// Base URL of the schemad instance.
    #[arg(long, global = true, default_value = "http://127.0.0.1:18080")]
    url: String,

    /// Reason over this ontology document in-process instead of a server.
    #[arg(long, global = true)]
    local: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show server health.
    Health,

    /// Ask the server to shut down gracefully.
    Shutdown,

    /// List loaded ontologies.
    List,

    /// Run a hierarchy or instance query.
    Query {
        ontology: String,
        /// e.g. super_classes, direct_sub_classes, instances, types.
        kind: QueryKind,
        entity: String,
        /// Treat ENTITY as an individual rather than a class.
        #[arg(long)]
        individual: bool,
    },

    /// Check whether an axiom (JSON) is entailed.
    Entails { ontology: String, axiom: String },

    /// List justifications for an entailed axiom (JSON).
    Explain {
        ontology: String,
        axiom: String,
        /// Maximum justifications; 0 for all.
        #[arg(long, default_value = "0")]
        limit: usize,
    },

    /// Add and remove axioms, each read from a `{"axioms": [...]}` file.
    Update {
        ontology: String,
        #[arg(long)]
        add: Option<PathBuf>,
        #[arg(long)]
        remove: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let client = SchemaClient::new(cli.url.clone());

    match cli.command {
        Commands::Health => {
            let health = client.health()?;
            println!("{} (schemad {})", health.status, health.version);
            println!(
                "  generation {} loaded at {}, {} ontologies",
                health.generation, health.loaded_at, health.ontologies
            );
        }

        Commands::Shutdown => {
            client.shutdown()?;
            println!("Shutdown requested at {}", client.base_url());
        }

        Commands::List => {
            let ontologies = client.list()?;
            if ontologies.is_empty() {
                println!("No ontologies loaded.");
            }
            for o in &ontologies {
                println!(
                    "  {}  version {}  {} axioms  revision {}",
                    o.name, o.version, o.axioms, o.revision
                );
            }
        }

        Commands::Query {
            ontology,
            kind,
            entity,
            individual,
        } => {
            let entity = if individual {
                Entity::individual(entity)
            } else {
                Entity::class(entity)
            };
            let reasoner = open(&client, cli.local.as_deref(), &ontology)?;
            let nodes = reasoner.query(kind, &entity)?;
            println!("{kind} of {entity}: {} nodes", nodes.len());
            for node in nodes.nodes() {
                let names: Vec<String> = node.entities().map(ToString::to_string).collect();
                println!("  {{{}}}", names.join(", "));
            }
            reasoner.close();
        }

        Commands::Entails { ontology, axiom } => {
            let axiom = parse_axiom(&axiom)?;
            let reasoner = open(&client, cli.local.as_deref(), &ontology)?;
            let entailed = reasoner.is_entailed(&axiom)?;
            println!("{axiom}: {}", if entailed { "entailed" } else { "not entailed" });
            reasoner.close();
        }

        Commands::Explain {
            ontology,
            axiom,
            limit,
        } => {
            let axiom = parse_axiom(&axiom)?;
            let reasoner = open(&client, cli.local.as_deref(), &ontology)?;
            let justifications = reasoner.explain(&axiom, limit)?;
            if justifications.is_empty() {
                println!("{axiom}: no justifications (not entailed)");
            }
            for (i, justification) in justifications.iter().enumerate() {
                println!("Justification {}:", i + 1);
                for a in justification {
                    println!("  {a}");
                }
            }
            reasoner.close();
        }

        Commands::Update {
            ontology,
            add,
            remove,
        } => {
            let additions = read_axioms(add.as_deref())?;
            let removals = read_axioms(remove.as_deref())?;
            if additions.is_empty() && removals.is_empty() {
                miette::bail!("nothing to update: pass --add and/or --remove");
            }
            let reasoner = open(&client, cli.local.as_deref(), &ontology)?;
            let summary = reasoner.update(&additions, &removals)?;
            println!(
                "Added {}, removed {}; now at revision {}",
                summary.added, summary.removed, summary.revision
            );
            reasoner.close();
        }
    }

    Ok(())
}

/// A local knowledge base over `local`, or `ontology` on the server.
fn open(client: &SchemaClient, local: Option<&Path>, ontology: &str) -> Result<Box<dyn SchemaReasoner>> {
    match local {
        Some(path) => {
            let axioms = read_axioms(Some(path))?;
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(ontology);
            let kb = KnowledgeBase::new(name, &axioms, KbSettings::default())?;
            Ok(Box::new(kb))
        }
        None => Ok(Box::new(RemoteReasoner::new(client.clone(), ontology))),
    }
}

fn read_axioms(path: Option<&Path>) -> Result<AxiomSet> {
    let Some(path) = path else {
        return Ok(AxiomSet::new());
    };
    let content = std::fs::read_to_string(path).into_diagnostic()?;
    let doc: DocumentFile = serde_json::from_str(&content).into_diagnostic()?;
    Ok(doc.axioms)
}

fn parse_axiom(json: &str) -> Result<Axiom> {
    let axiom: Axiom = serde_json::from_str(json).into_diagnostic()?;
    axiom.validate()?;
    Ok(axiom)
}
