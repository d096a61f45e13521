//! # Notion Harness CLI (`notion-harness`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `serve stdio` | MCP server over stdin/stdout |
//! | `serve http` | JSON HTTP tool server on `[server].bind` |
//! | `ask "<question>"` | Answer a question from page content |
//! | `search "<query>"` | Ranked multi-strategy search |
//! | `find --title T` / `find --path "A > B"` | Look up pages in the hierarchy |
//! | `pages` | Print the page hierarchy |
//! | `write` | Create a page or append to one |
//! | `refresh` | Rebuild the hierarchy cache |
//! | `stats` | Hierarchy statistics |
//! | `completions <shell>` | Print a shell completion script |
//!
//! The Notion token is read from `NOTION_TOKEN` (or the variable named by
//! `notion.token_env`). Logs go to stderr; stdout carries results only.

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use notion_harness::ask;
use notion_harness::config::{self, Config};
use notion_harness::error::HarnessError;
use notion_harness::mcp;
use notion_harness::present;
use notion_harness::server;
use notion_harness::tools::ToolContext;
use notion_harness::write::{self, WriteRequest};

const DEFAULT_CONFIG: &str = "./config/notion.toml";

/// Page-hierarchy cache and multi-strategy search over a Notion workspace.
#[derive(Parser)]
#[command(name = "notion-harness", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/notion.toml`; built-in defaults are used when
    /// that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a tool server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },

    /// Answer a question with content from the best-matching pages.
    Ask {
        question: String,

        /// Pages whose full content is included (1-10).
        #[arg(long, default_value_t = 5)]
        pages: usize,

        /// Use only the remote keyword search.
        #[arg(long)]
        basic: bool,
    },

    /// Search pages by keyword, title/path and content.
    Search {
        query: String,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Use only the remote keyword search.
        #[arg(long)]
        basic: bool,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Find pages by title or by path.
    Find {
        #[arg(long)]
        title: Option<String>,

        /// Path from the top level, segments separated by `>`.
        #[arg(long)]
        path: Option<String>,

        /// Allow token-overlap and prefix matches.
        #[arg(long)]
        fuzzy: bool,
    },

    /// Print the page hierarchy as an outline.
    Pages {
        /// Deepest level to print (0 = top level only).
        #[arg(long)]
        depth: Option<usize>,

        /// Include archived pages.
        #[arg(long)]
        archived: bool,
    },

    /// Create a page under a parent, or rename and append to a page.
    ///
    /// Markdown is read from `--file`, or from stdin when no file is given.
    Write {
        /// Parent page or database for a new page.
        #[arg(long, conflicts_with = "page")]
        parent: Option<String>,

        /// Existing page to update.
        #[arg(long)]
        page: Option<String>,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Rebuild the hierarchy cache now.
    Refresh,

    /// Print hierarchy statistics as JSON.
    Stats,

    /// Print a shell completion script.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ServeService {
    /// MCP over stdin/stdout.
    Stdio,
    /// JSON HTTP API.
    Http,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None => config::load_or_default(&PathBuf::from(DEFAULT_CONFIG)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(
            shell,
            &mut Cli::command(),
            "notion-harness",
            &mut std::io::stdout(),
        );
        return Ok(());
    }

    let cfg = load(cli.config.as_ref())?;

    match cli.command {
        Commands::Serve { service } => match service {
            ServeService::Stdio => mcp::run_stdio(&cfg).await?,
            ServeService::Http => server::run_server(&cfg).await?,
        },
        command => {
            let ctx = ToolContext::from_config(Arc::new(cfg))?;
            run_command(command, &ctx).await?;
        }
    }

    Ok(())
}

async fn run_command(command: Commands, ctx: &ToolContext) -> anyhow::Result<()> {
    match command {
        Commands::Ask {
            question,
            pages,
            basic,
        } => {
            let answer = ask::ask(ctx.engine(), ctx.workspace(), &question, pages, !basic).await?;
            println!("{}", answer.answer);
        }
        Commands::Search {
            query,
            limit,
            basic,
            json,
        } => {
            let limit = limit.unwrap_or(ctx.config().search.default_max_results);
            let hits = ctx.engine().search(&query, limit, !basic).await?;
            let presented = present::present(&hits);
            if json {
                println!("{}", serde_json::to_string_pretty(&presented)?);
            } else {
                print!("{}", present::render_text(&query, &presented));
            }
        }
        Commands::Find { title, path, fuzzy } => {
            let segments: Option<Vec<String>> = path.map(|p| {
                p.split('>')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            });
            let snapshot = ctx.cache().get_or_refresh().await?;
            let matches = match (segments, title) {
                (Some(segments), _) if !segments.is_empty() => match snapshot.find_by_path(&segments) {
                    Some(found) => vec![found],
                    None if fuzzy => snapshot.find_under_path(&segments),
                    None => Vec::new(),
                },
                (_, Some(title)) => snapshot.find_by_title(&title, fuzzy),
                _ => anyhow::bail!("pass --title or --path"),
            };
            if matches.is_empty() {
                return Err(HarnessError::NotFound("no page matches the given title or path".to_string()).into());
            }
            for record in matches {
                println!("{}  ({})", record.display_path(), record.id);
            }
        }
        Commands::Pages { depth, archived } => {
            let snapshot = ctx.cache().get_or_refresh().await?;
            print!("{}", snapshot.render_tree(depth, archived));
        }
        Commands::Write {
            parent,
            page,
            title,
            file,
        } => {
            let markdown_content = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            let request = WriteRequest {
                parent_id: parent,
                page_id: page,
                title,
                markdown_content,
            };
            let outcome = write::write_page(ctx.workspace(), ctx.cache(), &request).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Refresh => {
            let refresh = ctx.cache().force_refresh().await?;
            println!(
                "Cached {} pages in {} ms.",
                refresh.snapshot.len(),
                refresh.duration.as_millis()
            );
        }
        Commands::Stats => {
            let snapshot = ctx.cache().get_or_refresh().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot.stats())?);
        }
        Commands::Serve { .. } | Commands::Completions { .. } => {}
    }
    Ok(())
}
