//! # docchat CLI
//!
//! The `docchat` binary manages documents and conversations from the
//! command line and starts the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! docchat --config ./config/docchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat init` | Create the SQLite database and run schema migrations |
//! | `docchat serve` | Start the HTTP API |
//! | `docchat upload <path>` | Store a PDF |
//! | `docchat docs` | List uploaded documents |
//! | `docchat extract <id>` | Extract a document's text |
//! | `docchat embed <id>` | Chunk, embed and index a document |
//! | `docchat delete <id>` | Delete a document and its vectors |
//! | `docchat search "<query>"` | Raw similarity search |
//! | `docchat ask "<question>"` | Run one chat turn |
//! | `docchat conversations` | List conversations |
//! | `docchat show <id>` | Print a conversation |
//! | `docchat rename <id> <title>` | Rename a conversation |
//! | `docchat forget <id>` | Delete a conversation |
//! | `docchat report <id> --out <file>` | Write a PDF report |
//!
//! ## Examples
//!
//! ```bash
//! docchat init
//! docchat upload ./policies/returns.pdf
//! docchat extract 3f2a...
//! docchat embed 3f2a...
//! docchat ask "What is the refund policy?"
//! docchat ask "Does it apply to electronics?" --conversation 9c1d...
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use docchat::app::AppContext;
use docchat::chat::AskRequest;
use docchat::config;
use docchat::extract::MIME_PDF;
use docchat::migrate;
use docchat::models::Role;
use docchat::report::render_conversation_pdf;
use docchat::sentiment::label_conversation;
use docchat::server;

/// docchat: ask questions about your PDF documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docchat.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docchat",
    about = "docchat: a retrieval-augmented chat backend for PDF documents",
    version,
    long_about = "docchat stores uploaded PDFs, extracts and chunks their text, embeds the chunks \
    into a vector index, and answers questions grounded in the retrieved chunks while keeping a \
    bounded conversation history."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Upload a PDF file.
    Upload {
        /// Path to the `.pdf` file.
        path: PathBuf,
    },

    /// List uploaded documents.
    Docs,

    /// Extract text from an uploaded document.
    Extract {
        /// Document id.
        id: String,
    },

    /// Chunk and embed an extracted document into the vector index.
    ///
    /// Requires an embedding provider to be configured.
    Embed {
        /// Document id.
        id: String,
    },

    /// Delete a document, its stored file and its vectors.
    Delete {
        /// Document id.
        id: String,
    },

    /// Similarity search over embedded chunks.
    Search {
        query: String,

        /// Maximum number of results.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Ask a question about the uploaded documents.
    Ask {
        question: String,

        /// Continue an existing conversation.
        #[arg(long)]
        conversation: Option<String>,

        /// Number of chunks used as context.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// List conversations, most recently updated first.
    Conversations {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print a conversation.
    Show {
        conversation: String,
    },

    /// Rename a conversation.
    Rename {
        conversation: String,
        title: String,
    },

    /// Delete a conversation.
    Forget {
        conversation: String,
    },

    /// Write a PDF report of a conversation, with sentiment markers.
    Report {
        conversation: String,

        /// Output file.
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("{}=info", env!("CARGO_PKG_NAME")))),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Upload { path } => {
            let ctx = AppContext::from_config(&cfg).await?;
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let is_pdf = path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
            let content_type = if is_pdf {
                MIME_PDF
            } else {
                "application/octet-stream"
            };
            let doc = ctx
                .documents
                .upload(&filename, Some(content_type), bytes)
                .await?;
            println!("Uploaded {} ({} bytes)", doc.filename, doc.size_bytes);
            println!("  id: {}", doc.id);
        }
        Commands::Docs => {
            let ctx = AppContext::from_config(&cfg).await?;
            let docs = ctx.documents.list().await?;
            if docs.is_empty() {
                println!("No documents.");
            }
            for doc in docs {
                println!(
                    "{}  {:<9}  {:>9} bytes  {}",
                    doc.id,
                    doc.status.as_str(),
                    doc.size_bytes,
                    doc.filename
                );
            }
        }
        Commands::Extract { id } => {
            let ctx = AppContext::from_config(&cfg).await?;
            let doc = ctx.documents.extract(&id).await?;
            let chars = doc
                .extracted_text
                .as_deref()
                .map(|t| t.chars().count())
                .unwrap_or(0);
            println!("Extracted {} characters from {}", chars, doc.filename);
        }
        Commands::Embed { id } => {
            let ctx = AppContext::from_config(&cfg).await?;
            let report = ctx.documents.embed(&id).await?;
            println!(
                "Embedded {} chunks into collection {}",
                report.chunks, report.collection
            );
        }
        Commands::Delete { id } => {
            let ctx = AppContext::from_config(&cfg).await?;
            ctx.documents.delete(&id).await?;
            println!("Deleted document {}", id);
        }
        Commands::Search { query, top_k } => {
            let ctx = AppContext::from_config(&cfg).await?;
            let top_k = top_k.unwrap_or(cfg.retrieval.top_k);
            let results = ctx.chat.retriever().retrieve(&query, top_k).await?;
            if results.is_empty() {
                println!("No results.");
            }
            for (i, hit) in results.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} #{}",
                    i + 1,
                    hit.score,
                    hit.document_id,
                    hit.chunk_index
                );
                println!("   {}", snippet(&hit.text, 200));
            }
        }
        Commands::Ask {
            question,
            conversation,
            top_k,
        } => {
            let ctx = AppContext::from_config(&cfg).await?;
            let mut request = AskRequest::new(question);
            request.conversation_id = conversation;
            request.top_k = top_k;
            let turn = ctx.chat.ask(request).await?;
            if let Some(rewrite) = &turn.rewrite {
                println!("(searched for: {})", rewrite);
            }
            println!("{}", turn.answer);
            println!();
            println!("conversation: {}", turn.conversation_id);
        }
        Commands::Conversations { limit } => {
            let ctx = AppContext::from_config(&cfg).await?;
            let limit = limit.unwrap_or(cfg.conversation.list_limit);
            let list = ctx.conversations.list(limit).await?;
            if list.is_empty() {
                println!("No conversations.");
            }
            for summary in list {
                println!(
                    "{}  {}  {}",
                    summary.conversation_id,
                    summary.updated_at.format("%Y-%m-%d %H:%M"),
                    summary.title
                );
            }
        }
        Commands::Show { conversation } => {
            let ctx = AppContext::from_config(&cfg).await?;
            let conv = ctx
                .conversations
                .get(&conversation)
                .await?
                .ok_or_else(|| anyhow::anyhow!("conversation {} not found", conversation))?;
            println!("{} ({})", conv.title, conv.id);
            for message in &conv.messages {
                let who = match message.role {
                    Role::User => "You",
                    Role::Assistant => "AI",
                };
                println!();
                println!("{}: {}", who, message.content);
            }
        }
        Commands::Rename {
            conversation,
            title,
        } => {
            let ctx = AppContext::from_config(&cfg).await?;
            ctx.conversations.rename(&conversation, &title).await?;
            println!("Renamed {} to \"{}\"", conversation, title);
        }
        Commands::Forget { conversation } => {
            let ctx = AppContext::from_config(&cfg).await?;
            ctx.conversations.delete(&conversation).await?;
            println!("Deleted conversation {}", conversation);
        }
        Commands::Report { conversation, out } => {
            let ctx = AppContext::from_config(&cfg).await?;
            let conv = ctx
                .conversations
                .get(&conversation)
                .await?
                .ok_or_else(|| anyhow::anyhow!("conversation {} not found", conversation))?;
            let labels = label_conversation(&conv, ctx.sentiment.as_ref()).await;
            let pdf = render_conversation_pdf(&conv, &labels)?;
            tokio::fs::write(&out, &pdf)
                .await
                .with_context(|| format!("Failed to write {}", out.display()))?;
            println!("Wrote report to {}", out.display());
        }
    }

    Ok(())
}

/// First `max` characters of `text` on one line.
fn snippet(text: &str, max: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max).collect();
        format!("{}...", cut)
    }
}
