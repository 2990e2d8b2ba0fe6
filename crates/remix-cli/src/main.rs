use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use remix_contracts::chat::{parse_command, ChatCommand, SelectTarget, CHAT_HELP_COMMANDS};
use remix_contracts::intake::{data_url_payload, source_image_from_path};
use remix_contracts::naming::{original_download_name, variation_download_name};
use remix_contracts::progress::{GenerationUpdate, ProgressSink};
use remix_contracts::session::{GallerySelection, SessionState};
use remix_engine::{
    run_generation, DryrunStyleClient, GeminiStyleClient, RemixSession, StyleClient,
    StyleClientRegistry, DEFAULT_IMAGE_MODEL, DEFAULT_TEXT_MODEL,
};

#[derive(Debug, Parser)]
#[command(name = "remix", version, about = "Eight-style document image remixer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Run(RunArgs),
    Chat(ChatArgs),
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    context: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = "gemini")]
    client: String,
    #[arg(long, default_value = DEFAULT_TEXT_MODEL)]
    text_model: String,
    #[arg(long, default_value = DEFAULT_IMAGE_MODEL)]
    image_model: String,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = "gemini")]
    client: String,
    #[arg(long, default_value = DEFAULT_TEXT_MODEL)]
    text_model: String,
    #[arg(long, default_value = DEFAULT_IMAGE_MODEL)]
    image_model: String,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("remix error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_once(args),
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
    }
}

fn build_registry(text_model: &str, image_model: &str) -> StyleClientRegistry {
    let mut clients = StyleClientRegistry::new();
    clients.register(DryrunStyleClient);
    clients.register(GeminiStyleClient::new().with_models(
        Some(text_model.to_string()),
        Some(image_model.to_string()),
    ));
    clients
}

fn resolve_client<'a>(
    registry: &'a StyleClientRegistry,
    name: &str,
) -> Result<&'a dyn StyleClient> {
    let Some(client) = registry.get(name) else {
        bail!(
            "unknown client '{}' (available: [{}])",
            name,
            registry.names().join(", ")
        );
    };
    Ok(client)
}

struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn on_update(&mut self, update: GenerationUpdate<'_>) {
        match update {
            GenerationUpdate::DescriptionsRequested => {
                println!("Deriving style directions...");
            }
            GenerationUpdate::DescriptionsReady { styles } => {
                println!("Derived {} style directions.", styles.len());
            }
            GenerationUpdate::VariationRendered { variation, progress } => {
                println!(
                    "[{}/{}] {}",
                    progress.current, progress.total, variation.description
                );
            }
            GenerationUpdate::Completed { total } => {
                println!("All {total} variations rendered.");
            }
            GenerationUpdate::Failed { message } => {
                println!("Generation failed: {message}");
            }
        }
    }
}

fn run_once(args: RunArgs) -> Result<i32> {
    let registry = build_registry(&args.text_model, &args.image_model);
    let client = resolve_client(&registry, &args.client)?;

    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let events_path = args
        .events
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let mut session = RemixSession::new(events_path)?;

    let image = source_image_from_path(&args.image)?;
    println!("Loaded {} ({})", image.file_name, image.mime_type);
    session.upload(image)?;

    run_generation(&mut session, client, &args.context, &mut ConsoleProgress)?;

    match session.state() {
        SessionState::Complete { .. } => {
            let saved = save_gallery(session.state(), &args.out)?;
            for path in &saved {
                println!("Saved {}", path.display());
            }
            Ok(0)
        }
        SessionState::Failed { message } => {
            eprintln!("{message}");
            Ok(1)
        }
        other => bail!("generation ended in the {} state", other.phase_name()),
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let registry = build_registry(&args.text_model, &args.image_model);
    let client = resolve_client(&registry, &args.client)?;

    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let mut session = RemixSession::new(events_path)?;

    let stdin = io::stdin();
    let mut line = String::new();

    println!(
        "Remix chat started (client: {}). Type /help for commands.",
        client.name()
    );

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        match parse_command(&line) {
            ChatCommand::Noop => {}
            ChatCommand::Help => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join("  "));
                println!("Any other text submits the document context and starts a run.");
            }
            ChatCommand::Quit => break,
            ChatCommand::Show => print_state(&session),
            ChatCommand::Reset => {
                session.reset()?;
                println!("Session cleared; upload a new image with /image <path>.");
            }
            ChatCommand::UploadImage { path } => {
                if path.is_empty() {
                    println!("/image requires a path");
                    continue;
                }
                match source_image_from_path(Path::new(&path)) {
                    Ok(image) => {
                        let label = format!("{} ({})", image.file_name, image.mime_type);
                        match session.upload(image) {
                            Ok(()) => println!("Loaded {label}; now describe the document."),
                            Err(err) => println!("Upload refused: {err}"),
                        }
                    }
                    Err(err) => println!("Upload rejected: {err}"),
                }
            }
            ChatCommand::SubmitContext { context } => match session.state() {
                SessionState::ImageReady { .. } | SessionState::Complete { .. } => {
                    run_generation(&mut session, client, &context, &mut ConsoleProgress)?;
                    print_state(&session);
                }
                SessionState::Failed { .. } => {
                    println!("The last run failed; use /reset to start over.");
                }
                other => {
                    println!("Upload an image first (state: {}).", other.phase_name());
                }
            },
            ChatCommand::GenerateAgain => {
                let Some(context) = session.state().context().map(str::to_string) else {
                    println!("Nothing to regenerate yet; submit a context first.");
                    continue;
                };
                if !matches!(session.state(), SessionState::Complete { .. }) {
                    println!("A run is not finished yet; /again only works after completion.");
                    continue;
                }
                run_generation(&mut session, client, &context, &mut ConsoleProgress)?;
                print_state(&session);
            }
            ChatCommand::Select { target } => {
                let Some(target) = target else {
                    println!("/select takes 'original' or a variation number (1-8)");
                    continue;
                };
                let selection = match target {
                    SelectTarget::Original => GallerySelection::Original,
                    SelectTarget::Variation(index) => GallerySelection::Variation(index),
                };
                match session.select(selection) {
                    Ok(()) => print_state(&session),
                    Err(err) => println!("Select failed: {err}"),
                }
            }
            ChatCommand::Save { dir } => {
                let out = dir.map(PathBuf::from).unwrap_or_else(|| args.out.clone());
                match save_gallery(session.state(), &out) {
                    Ok(saved) => {
                        for path in &saved {
                            println!("Saved {}", path.display());
                        }
                    }
                    Err(err) => println!("Save failed: {err}"),
                }
            }
            ChatCommand::Unknown { command } => {
                println!("Unknown command {command}; type /help for the list.");
            }
        }
    }

    Ok(())
}

fn print_state(session: &RemixSession) {
    match session.state() {
        SessionState::NoImage => println!("No image loaded; use /image <path>."),
        SessionState::ImageReady { image } => {
            println!("{} loaded; submit a context to generate.", image.file_name);
        }
        SessionState::GeneratingDescriptions { context, .. } => {
            println!("Deriving styles for \"{context}\"...");
        }
        SessionState::GeneratingVariations { progress, .. } => {
            println!("Rendering variations ({}/{})...", progress.current, progress.total);
        }
        SessionState::Complete {
            context,
            variations,
            selected,
            image,
        } => {
            println!("Results for \"{context}\":");
            let marker = |wanted: GallerySelection, current: GallerySelection| {
                if wanted == current {
                    "*"
                } else {
                    " "
                }
            };
            println!(
                " {} original  {}",
                marker(GallerySelection::Original, *selected),
                original_download_name(image)
            );
            for variation in variations {
                println!(
                    " {} {}. {}  -> {}",
                    marker(GallerySelection::Variation(variation.index), *selected),
                    variation.index + 1,
                    variation.description,
                    variation_download_name(context, variation.index, &variation.mime_type)
                );
            }
        }
        SessionState::Failed { message } => {
            println!("Failed: {message}");
            println!("Use /reset to start over.");
        }
    }
}

/// Write the completed gallery to disk: the untouched original plus each
/// variation under its download name.
fn save_gallery(state: &SessionState, out: &Path) -> Result<Vec<PathBuf>> {
    let SessionState::Complete {
        image,
        context,
        variations,
        ..
    } = state
    else {
        bail!("no completed gallery to save (state: {})", state.phase_name());
    };

    fs::create_dir_all(out).with_context(|| format!("failed to create {}", out.display()))?;
    let mut saved = Vec::new();

    let original_path = out.join(original_download_name(image));
    write_data_url(&original_path, &image.data_url)?;
    saved.push(original_path);

    for variation in variations {
        let path = out.join(variation_download_name(
            context,
            variation.index,
            &variation.mime_type,
        ));
        write_data_url(&path, &variation.data_url)?;
        saved.push(path);
    }

    Ok(saved)
}

fn write_data_url(path: &Path, data_url: &str) -> Result<()> {
    let payload = data_url_payload(data_url)
        .with_context(|| format!("malformed data URL for {}", path.display()))?;
    let bytes = BASE64
        .decode(payload)
        .with_context(|| format!("invalid base64 payload for {}", path.display()))?;
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
