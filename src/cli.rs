use std::error::Error;
use std::path::PathBuf;

use atty::Stream;
use clap::{Parser, Subcommand};
use serde_json::json;
use termimad::{FmtText, MadSkin, terminal_size};
use tracing::Level;
use wordcards::logging::{init_tracing, level_from_verbosity};
use wordcards::{
    AppConfig, CardView, FilterState, KnownFilter, LevelFilter, LocalApp, PersistenceError,
    PlaybackRate, UserId, WordId, lookup_url, open_local,
};

#[derive(Parser, Debug)]
#[command(name = "wordcards", about = "Study vocabulary flashcards", version)]
pub struct Cli {
    /// Emit JSON instead of human-readable output.
    #[arg(long, global = true)]
    json: bool,

    /// Directory holding the word list and header JSON files.
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// File used to remember the active user and known words.
    #[arg(long, global = true, value_name = "FILE")]
    state_file: Option<PathBuf>,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List cards matching the level and status filters.
    Cards {
        /// Level to show, or "all".
        #[arg(short, long, default_value = "all")]
        level: String,
        /// One of all, new, known.
        #[arg(short, long, default_value = "all")]
        known: String,
    },
    /// Flip the known state of a word for the active user.
    Toggle {
        /// Word ID as shown by `cards`.
        #[arg(allow_negative_numbers = true)]
        id: WordId,
    },
    /// Show the active user, or switch to another one.
    User {
        /// User to make active.
        name: Option<String>,
    },
    /// Pronounce a word through the speech engine.
    Speak {
        word: String,
        /// Playback rate; the page offers 0.5 to 1.5.
        #[arg(short, long, default_value_t = 1.0)]
        rate: f32,
    },
    /// Print the pronunciation lookup link for a word.
    Lookup { word: String },
    /// List the voices reported by the speech engine.
    Voices,
    /// Serve the flashcard page over HTTP.
    #[cfg(feature = "web")]
    Serve {
        /// Address to bind.
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: std::net::SocketAddr,
        /// Page styling: tailwind or bootstrap.
        #[arg(long, default_value = "tailwind")]
        theme: wordcards::web::WebTheme,
        /// Public base URL used in canonical links.
        #[arg(long)]
        base_url: Option<String>,
        /// Do not start the speech engine on the host.
        #[arg(long)]
        silent: bool,
    },
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let base = match &cli.command {
        #[cfg(feature = "web")]
        Command::Serve { .. } => Level::INFO,
        _ => Level::WARN,
    };
    init_tracing(level_from_verbosity(base, cli.verbose));

    let mut config = AppConfig::default();
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(path) = cli.state_file {
        config.state_path = path;
    }

    match cli.command {
        Command::Cards { level, known } => handle_cards(&config, &level, &known, cli.json),
        Command::Toggle { id } => handle_toggle(&config, id, cli.json),
        Command::User { name } => handle_user(&config, name, cli.json),
        Command::Speak { word, rate } => handle_speak(&config, &word, rate, cli.json),
        Command::Lookup { word } => handle_lookup(&word, cli.json),
        Command::Voices => handle_voices(&config, cli.json),
        #[cfg(feature = "web")]
        Command::Serve {
            addr,
            theme,
            base_url,
            silent,
        } => handle_serve(config, addr, theme, base_url, silent),
    }
}

fn handle_cards(
    config: &AppConfig,
    level: &str,
    known: &str,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let level: LevelFilter = level.parse()?;
    let known: KnownFilter = known.parse()?;
    let filter = FilterState::new(level, known);
    let app = open_local(config)?;
    let cards = app.cards(&filter);

    if as_json {
        let payload = json!({
            "user": app.user(),
            "level": filter.level.to_string(),
            "known": filter.known.as_str(),
            "total": app.words().len(),
            "known_count": app.known_count(),
            "cards": cards,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_deck(&app, &cards);
    }
    Ok(())
}

fn handle_toggle(config: &AppConfig, id: WordId, as_json: bool) -> Result<(), Box<dyn Error>> {
    let mut app = open_local(config)?;
    let outcome = app
        .toggle_known(id)
        .ok_or_else(|| format!("No word with ID {id}"))?;
    if let Some(err) = &outcome.warning {
        print_warning(err);
    }
    let word = app
        .words()
        .get(id)
        .map(|word| word.value.clone())
        .unwrap_or_default();

    if as_json {
        let payload = json!({
            "user": app.user(),
            "word_id": outcome.word_id,
            "word": word,
            "known": outcome.known,
            "toggle_label": outcome.toggle_label,
            "saved": outcome.warning.is_none(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        let state = if outcome.known { "known" } else { "new" };
        println!("{word} (#{id}) is now {state} for {}.", app.user());
    }
    Ok(())
}

fn handle_user(
    config: &AppConfig,
    name: Option<String>,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let mut app = open_local(config)?;
    if let Some(name) = name {
        let user = UserId::new(&name).ok_or("User name cannot be empty")?;
        if let Some(err) = app.switch_user(user) {
            print_warning(&err);
        }
    }
    let options = config.user_options(app.user());

    if as_json {
        let payload = json!({
            "user": app.user(),
            "known_count": app.known_count(),
            "users": options,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for user in &options {
            let marker = if user == app.user() { "*" } else { " " };
            println!("{marker} {user}");
        }
        println!("{} knows {} of {} words.", app.user(), app.known_count(), app.words().len());
    }
    Ok(())
}

fn handle_speak(
    config: &AppConfig,
    word: &str,
    rate: f32,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let mut app = open_local(config)?;
    app.set_rate(PlaybackRate::new(rate));
    let started = app.speak(word);
    let voice = app
        .speech_mut()
        .select_voice()
        .map(|voice| voice.name.clone());
    app.speech_mut().wait_idle();

    if as_json {
        let payload = json!({
            "word": word.trim(),
            "rate": app.rate(),
            "voice": voice,
            "started": started,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if !started {
        println!("Nothing was spoken.");
    }
    Ok(())
}

fn handle_lookup(word: &str, as_json: bool) -> Result<(), Box<dyn Error>> {
    if word.trim().is_empty() {
        return Err("Word cannot be empty".into());
    }
    let url = lookup_url(word);
    if as_json {
        println!("{}", serde_json::to_string_pretty(&json!({ "word": word, "url": url }))?);
    } else {
        println!("{url}");
    }
    Ok(())
}

fn handle_voices(config: &AppConfig, as_json: bool) -> Result<(), Box<dyn Error>> {
    let mut app = open_local(config)?;
    let speech = app.speech_mut();
    speech.voices_changed();
    let selected = speech.select_voice().map(|voice| voice.name.clone());

    if as_json {
        let payload = json!({
            "selected": selected,
            "voices": speech.voices(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }
    if speech.voices().is_empty() {
        println!("No voices reported; the engine default will be used.");
        return Ok(());
    }
    let width = speech
        .voices()
        .iter()
        .map(|voice| voice.name.len())
        .max()
        .unwrap_or(4)
        .max("VOICE".len());
    println!("  {:<width$}  {}", "VOICE", "LANG", width = width);
    println!("  {:-<width$}  {}", "", "-----", width = width);
    for voice in speech.voices() {
        let marker = if Some(&voice.name) == selected.as_ref() { "*" } else { " " };
        println!("{marker} {:<width$}  {}", voice.name, voice.lang, width = width);
    }
    Ok(())
}

#[cfg(feature = "web")]
fn handle_serve(
    mut config: AppConfig,
    addr: std::net::SocketAddr,
    theme: wordcards::web::WebTheme,
    base_url: Option<String>,
    silent: bool,
) -> Result<(), Box<dyn Error>> {
    use wordcards::web::{AppState, WebConfig, serve};

    if silent {
        config.speech_program = None;
    }
    let web = WebConfig {
        addr,
        theme,
        base_url: base_url.unwrap_or_else(|| format!("http://{addr}")),
    };
    // A load failure is served as an error page rather than aborting.
    let app = open_local(&config);
    let state = AppState::new(app, config, &web);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(web, state))?;
    Ok(())
}

fn print_warning(err: &PersistenceError) {
    eprintln!("warning: progress not saved: {err}");
}

fn print_deck(app: &LocalApp, cards: &[CardView]) {
    let header = app.header();
    println!("{}", header.external_name);
    if !header.description_header_content.trim().is_empty() {
        println!("{}", header.description_header_content.trim());
    }
    println!(
        "{} knows {} of {} words.\n",
        app.user(),
        app.known_count(),
        app.words().len()
    );
    if cards.is_empty() {
        println!("No words match these filters.");
        return;
    }
    if stdout_is_tty() {
        let skin = markdown_skin();
        for card in cards {
            let markdown = card_markdown(card);
            let formatted = FmtText::from(&skin, &markdown, Some(markdown_width()));
            println!("{formatted}");
        }
    } else {
        for card in cards {
            let marker = if card.known { "x" } else { " " };
            println!(
                "[{marker}] #{:<5} {:<20} {:<10} {}",
                card.word_id, card.word, card.level_badge, card.meaning
            );
        }
    }
}

fn card_markdown(card: &CardView) -> String {
    let status = if card.known { " ✓" } else { "" };
    format!(
        "## {}{status}\n*{}* · #{}\n\n{}\n\n> {}\n\n[{}]({})",
        card.word,
        card.level_badge,
        card.word_id,
        card.meaning,
        card.example,
        card.toggle_label,
        card.lookup_url
    )
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

fn markdown_width() -> usize {
    let (width, _) = terminal_size();
    width.max(60) as usize
}

fn markdown_skin() -> MadSkin {
    MadSkin::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn toggle_accepts_negative_ids() {
        let cli = Cli::parse_from(["wordcards", "toggle", "-4"]);
        match cli.command {
            Command::Toggle { id } => assert_eq!(id, -4),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::parse_from([
            "wordcards",
            "cards",
            "--known",
            "new",
            "--json",
            "--data-dir",
            "fixtures",
            "-vv",
        ]);
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.data_dir, Some(PathBuf::from("fixtures")));
        match cli.command {
            Command::Cards { level, known } => {
                assert_eq!(level, "all");
                assert_eq!(known, "new");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn card_markdown_lists_card_fields() {
        let card = CardView {
            word_id: 4,
            word: "harbor".to_string(),
            level: "2".to_string(),
            level_badge: "רמה 2".to_string(),
            meaning: "A sheltered port".to_string(),
            example: "Boats rest in the harbor.".to_string(),
            known: true,
            toggle_label: wordcards::cards::MARK_NEW_LABEL,
            lookup_url: lookup_url("harbor"),
        };
        let text = card_markdown(&card);
        assert!(text.starts_with("## harbor ✓"));
        assert!(text.contains("*רמה 2*"));
        assert!(text.contains("> Boats rest in the harbor."));
        assert!(text.contains("(https://youglish.com/pronounce/harbor/english)"));
    }
}
