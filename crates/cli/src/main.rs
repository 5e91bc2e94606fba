use async_trait::async_trait;
use clap::{Parser, Subcommand};
use lib::engine::{
    ConversationEngine, HttpTransport, InputRejection, Renderer, TokioPacer,
};
use lib::forms::FieldType;
use lib::gateway::PublicQuestion;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "talkform")]
#[command(about = "Talkform CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the submission gateway. Forms are seeded from a JSON file
    /// (default: forms.json next to the config file).
    Serve {
        /// Config file path (default: TALKFORM_CONFIG_PATH or ~/.talkform/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Forms seed file (default: forms.json next to the config file)
        #[arg(long, value_name = "PATH")]
        forms: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 15180)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Fill out a form conversationally against a running gateway.
    Chat {
        /// Form handle
        handle: String,

        /// Gateway base URL (default: http://127.0.0.1:15180)
        #[arg(long, value_name = "URL")]
        server: Option<String>,

        /// Locale for question content (e.g. "nl")
        #[arg(long, value_name = "LOCALE")]
        locale: Option<String>,
    },

    /// Print a CSV export of the seeded forms (one form with --form-id,
    /// all submissions otherwise).
    Export {
        /// Config file path (default: TALKFORM_CONFIG_PATH or ~/.talkform/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Forms seed file (default: forms.json next to the config file)
        #[arg(long, value_name = "PATH")]
        forms: Option<std::path::PathBuf>,

        /// Export a single form with per-question columns
        #[arg(long, value_name = "ID")]
        form_id: Option<i64>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("talkform {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Serve {
            config,
            forms,
            port,
        }) => {
            if let Err(e) = run_serve(config, forms, port).await {
                log::error!("serve failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat {
            handle,
            server,
            locale,
        }) => {
            if let Err(e) = run_chat(handle, server, locale).await {
                log::error!("chat failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Export {
            config,
            forms,
            form_id,
        }) => {
            if let Err(e) = run_export(config, forms, form_id).await {
                log::error!("export failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    forms: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    let forms_path = forms.unwrap_or_else(|| lib::config::default_forms_path(&path));
    log::info!(
        "starting gateway on {}:{}",
        config.gateway.bind,
        config.gateway.port
    );
    lib::gateway::run_gateway(config, Some(forms_path)).await
}

/// Terminal chat surface for the conversation engine.
struct TerminalRenderer;

#[async_trait]
impl Renderer for TerminalRenderer {
    async fn show_typing(&self) {
        println!("  ...");
    }

    async fn show_question(&self, question: &PublicQuestion, text: &str) {
        println!("Bot: {}", text);
        if let Some(options) = &question.options {
            for (i, option) in options.iter().enumerate() {
                println!("  {}. {}", i + 1, option.label());
            }
        }
        if !question.required {
            let skip = question.skip_text.as_deref().unwrap_or("Skip this question");
            println!("  (optional, /skip: {})", skip);
        }
    }

    async fn show_reply(&self, text: &str) {
        println!("You: {}", text);
    }

    async fn show_message(&self, text: &str) {
        println!("Bot: {}", text);
    }

    async fn show_progress(&self, current: usize, total: usize) {
        println!("[{}/{}]", current, total);
    }
}

async fn run_chat(
    handle: String,
    server: Option<String>,
    locale: Option<String>,
) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let base_url = server.unwrap_or_else(|| "http://127.0.0.1:15180".to_string());
    let transport = HttpTransport::new(base_url);
    let form = transport.fetch_form(&handle, locale.as_deref()).await?;

    println!("{}", form.name);
    let mut engine = ConversationEngine::new(
        form,
        Arc::new(TerminalRenderer),
        Arc::new(TokioPacer),
        Arc::new(transport),
    );
    engine.open().await;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    while let Some(question) = engine.current_question().cloned() {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            engine.close();
            return Ok(());
        }
        let input = line.trim();

        let result = if input.eq_ignore_ascii_case("/skip") {
            engine.skip().await
        } else if question.field_type == FieldType::Buttons {
            let options = question.options.as_deref().unwrap_or(&[]);
            let picked = input
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| options.get(i))
                .or_else(|| {
                    options
                        .iter()
                        .find(|o| o.label().eq_ignore_ascii_case(input))
                });
            match picked {
                Some(option) => {
                    engine
                        .choose_option(option.label(), option.value())
                        .await
                }
                None => {
                    println!("Please pick one of the options.");
                    continue;
                }
            }
        } else {
            engine.submit_input(input).await
        };

        match result {
            Ok(()) => {}
            Err(InputRejection::Required) => println!("This field is required."),
            Err(InputRejection::InvalidEmail) => {
                println!("Please enter a valid email address.")
            }
            Err(InputRejection::NotSkippable) => println!("This question is required."),
            Err(InputRejection::NotAwaitingInput) => {}
        }
    }

    Ok(())
}

async fn run_export(
    config_path: Option<std::path::PathBuf>,
    forms: Option<std::path::PathBuf>,
    form_id: Option<i64>,
) -> anyhow::Result<()> {
    let (_config, path) = lib::config::load_config(config_path)?;
    let forms_path = forms.unwrap_or_else(|| lib::config::default_forms_path(&path));
    let store = lib::store::MemoryStore::new();
    let loaded = lib::store::load_forms_file(&forms_path)?;
    store.seed(loaded).await?;

    let csv = match form_id {
        Some(id) => lib::store::export_form_csv(&store, id)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?,
        None => lib::store::export_all_csv(&store).await,
    };
    print!("{}", csv);
    Ok(())
}
