//! diary-pilot - resilient portal submission and structured generation

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use diary_pilot::browser::{BrowserKind, PageDriver, WebDriverPage};
use diary_pilot::config::{BrowserSettings, ConfigLoader, PilotConfig};
use diary_pilot::llm::{
    GenerationRequest, ProviderCredentials, ProviderFallbackChain, ProviderKind,
};
use diary_pilot::locator::{
    field_names, JsonSelectorStore, LocatorConfig, SelectorStore, SelfHealingLocator,
};
use diary_pilot::submission::{
    CookieJar, Credentials, MachineConfig, ProgressSnapshot, ProgressTracker, SubmissionEntry,
    SubmissionStateMachine, SubmissionStatus,
};
use diary_pilot::PilotError;

/// How often the progress bar polls the tracker.
const PROGRESS_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "diary-pilot")]
#[command(version)]
#[command(about = "Submit diary entries to the internship portal and generate them with LLM fallback", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit entries from a JSON file to the portal
    Submit {
        /// JSON array of entries ({date, hours, activities, learnings, ...})
        entries: PathBuf,

        /// Portal login (email)
        #[arg(long, env = "PORTAL_USERNAME")]
        username: Option<String>,

        /// Portal password
        #[arg(long, env = "PORTAL_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Fill every form but highlight Save instead of clicking it
        #[arg(long)]
        dry_run: bool,

        /// Browser to drive: auto, chrome or firefox
        #[arg(long)]
        browser: Option<String>,

        /// Attach to a running WebDriver server instead of spawning one
        #[arg(long, value_name = "URL")]
        webdriver_url: Option<String>,

        /// Show the browser window
        #[arg(long)]
        headed: bool,

        /// Cookie profile to use
        #[arg(long)]
        profile: Option<String>,

        /// Print results as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Generate structured output from a prompt
    Generate {
        /// Prompt text (or use --file)
        prompt: Option<String>,

        /// Read the prompt from a file
        #[arg(short, long, conflicts_with = "prompt")]
        file: Option<PathBuf>,

        /// System preamble
        #[arg(long)]
        system: Option<String>,

        /// Provider to try first: auto, groq, gemini, cerebras, openai or mock
        #[arg(long)]
        provider: Option<String>,

        /// Attempts per provider
        #[arg(long)]
        max_retries: Option<u32>,

        #[command(flatten)]
        keys: KeyArgs,
    },

    /// Show the provider chain that would be used
    Providers {
        /// Provider to try first
        #[arg(long)]
        provider: Option<String>,

        #[command(flatten)]
        keys: KeyArgs,
    },

    /// Inspect or clear learned selectors
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show or validate settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Explicit API keys; these override the environment.
#[derive(clap::Args, Default)]
struct KeyArgs {
    #[arg(long, value_name = "KEY")]
    groq_key: Option<String>,
    #[arg(long, value_name = "KEY")]
    gemini_key: Option<String>,
    #[arg(long, value_name = "KEY")]
    cerebras_key: Option<String>,
    #[arg(long, value_name = "KEY")]
    openai_key: Option<String>,
}

impl KeyArgs {
    fn credentials(self) -> ProviderCredentials {
        let mut creds = ProviderCredentials::from_env();
        for (kind, key) in [
            (ProviderKind::Groq, self.groq_key),
            (ProviderKind::Gemini, self.gemini_key),
            (ProviderKind::Cerebras, self.cerebras_key),
            (ProviderKind::OpenAi, self.openai_key),
        ] {
            if let Some(key) = key {
                creds = creds.with_key(kind, key);
            }
        }
        creds
    }
}

#[derive(Subcommand)]
enum CacheAction {
    /// List learned selectors
    Show,
    /// Forget learned selectors
    Clear {
        /// Only forget this field
        field: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective settings
    Show,
    /// Validate settings files
    Validate,
    /// Show where settings and data live
    Paths,
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose {
        "diary_pilot=debug,info"
    } else {
        "diary_pilot=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    // Resolve project path
    let project_path = cli.project.canonicalize().unwrap_or(cli.project.clone());

    if !project_path.exists() {
        eprintln!(
            "{} Project directory does not exist: {}",
            "Error:".red().bold(),
            project_path.display()
        );
        std::process::exit(1);
    }

    if let Err(e) = run(cli.command, &project_path).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        let code = e
            .downcast_ref::<PilotError>()
            .map_or(1, PilotError::exit_code);
        std::process::exit(code);
    }
}

async fn run(command: Commands, project: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Submit {
            entries,
            username,
            password,
            dry_run,
            browser,
            webdriver_url,
            headed,
            profile,
            json,
        } => {
            let mut config = load_valid_config(project)?;
            if let Some(kind) = browser {
                config.browser.kind = kind;
            }
            if webdriver_url.is_some() {
                config.browser.webdriver_url = webdriver_url;
            }
            if headed {
                config.browser.headless = false;
            }
            if let Some(profile) = profile {
                config.submission.profile = profile;
            }

            // Without credentials the run relies on a stored session; the
            // login step reports a failure when there is none.
            let credentials = Credentials::new(
                username.unwrap_or_default(),
                password.unwrap_or_default(),
            );

            submit(project, &config, &entries, credentials, dry_run, json).await
        }

        Commands::Generate {
            prompt,
            file,
            system,
            provider,
            max_retries,
            keys,
        } => {
            let mut config = load_valid_config(project)?;
            if let Some(provider) = provider {
                config.llm.provider = provider;
            }
            let prompt = match (prompt, file) {
                (Some(prompt), _) => prompt,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Cannot read prompt file {}", path.display()))?,
                (None, None) => anyhow::bail!("Provide a prompt or --file"),
            };

            let mut chain = ProviderFallbackChain::from_credentials(
                &keys.credentials(),
                config.primary_provider()?,
            )?
            .with_throttle_delay(Duration::from_secs(config.llm.throttle_delay_secs));

            let mut request = GenerationRequest::new(prompt)
                .with_max_tokens(config.llm.max_tokens)
                .with_temperature(config.llm.temperature);
            if let Some(system) = system {
                request = request.with_system(system);
            }

            let value = chain
                .generate(&request, max_retries.unwrap_or(config.llm.max_retries))
                .await?;
            println!("{}", serde_json::to_string_pretty(&value)?);

            for (name, stats) in chain.stats() {
                if stats.requests > 0 {
                    tracing::info!(
                        provider = %name,
                        requests = stats.requests,
                        prompt_tokens = stats.prompt_tokens,
                        completion_tokens = stats.completion_tokens,
                        "Provider usage"
                    );
                }
            }
            Ok(())
        }

        Commands::Providers { provider, keys } => {
            let mut config = load_valid_config(project)?;
            if let Some(provider) = provider {
                config.llm.provider = provider;
            }
            let primary = config.primary_provider()?;
            let credentials = keys.credentials();

            println!("\n{} Provider chain", "LLM:".cyan().bold());
            println!("{}", "─".repeat(40));
            for kind in ProviderKind::FALLBACK_ORDER {
                let status = if credentials.has(kind) {
                    "✓".green().to_string()
                } else {
                    "✗".red().to_string()
                };
                let marker = if primary == Some(kind) {
                    " (primary)".green().to_string()
                } else {
                    String::new()
                };
                println!(
                    "   {} {:<9} {}{}",
                    status,
                    kind.name(),
                    kind.default_model().dimmed(),
                    marker
                );
            }

            let chain = ProviderFallbackChain::from_credentials(&credentials, primary)?;
            println!("\n   Order: {}", chain.provider_names().join(" → "));
            Ok(())
        }

        Commands::Cache { action } => {
            let config = PilotConfig::load(project)?;
            let mut store = JsonSelectorStore::in_dir(config.data_dir(project));

            match action {
                CacheAction::Show => {
                    let entries = store.entries();
                    println!(
                        "\n{} Learned selectors ({})",
                        "Cache:".cyan().bold(),
                        store.path().display()
                    );
                    println!("{}", "─".repeat(40));
                    if entries.is_empty() {
                        println!("   (empty)");
                    }
                    for (field, selector) in entries {
                        println!("   {:<20} {}", field, selector);
                    }
                }

                CacheAction::Clear { field } => {
                    let fields: Vec<String> = match field {
                        Some(field) => {
                            if !field_names().any(|known| known == field) {
                                eprintln!(
                                    "{} '{}' is not a catalog field",
                                    "Warning:".yellow().bold(),
                                    field
                                );
                            }
                            vec![field]
                        }
                        None => store.entries().into_iter().map(|(f, _)| f).collect(),
                    };

                    let mut removed = 0;
                    for field in &fields {
                        if store.remove(field) {
                            removed += 1;
                        }
                    }
                    store.persist()?;
                    println!("{} Forgot {} learned selector(s)", "OK".green().bold(), removed);
                }
            }
            Ok(())
        }

        Commands::Config { action } => {
            match action {
                ConfigAction::Show => {
                    let config = PilotConfig::load(project)?;
                    println!("{}", config.to_json()?);
                }

                ConfigAction::Validate => {
                    let (config, sources) = ConfigLoader::new().load_with_sources(project)?;
                    for source in &sources {
                        if source.loaded {
                            println!(
                                "{} [{}] {}",
                                "OK".green(),
                                source.level,
                                source.path.display()
                            );
                        } else {
                            println!(
                                "{} [{}] {} not found (using defaults)",
                                "Info:".blue(),
                                source.level,
                                source.path.display()
                            );
                        }
                    }

                    let report = config.validate();
                    println!("{}", report.verbose_report());
                    if !report.is_valid() {
                        std::process::exit(report.exit_code());
                    }
                }

                ConfigAction::Paths => {
                    let config = PilotConfig::load(project)?;
                    println!("\n{} Configuration Paths", "Config:".cyan().bold());
                    println!("{}", "─".repeat(40));
                    if let Some(user) = ConfigLoader::default_user_path() {
                        println!("   User settings:    {}", user.display());
                    }
                    println!(
                        "   Project settings: {}",
                        PilotConfig::settings_path(project).display()
                    );
                    println!("   Selector cache:   {}", config.data_dir(project).display());
                    println!("   Sessions:         {}", config.session_dir(project).display());
                    println!(
                        "   Screenshots:      {}",
                        config.screenshot_dir(project).display()
                    );
                }
            }
            Ok(())
        }
    }
}

/// Load settings and refuse to continue when they are invalid.
fn load_valid_config(project: &Path) -> anyhow::Result<PilotConfig> {
    let config = PilotConfig::load(project)?;
    let report = config.validate();
    for warning in &report.warnings {
        tracing::warn!("{}", warning);
    }
    if !report.is_valid() {
        eprintln!("{}", report.verbose_report());
        return Err(PilotError::config_with_path(
            report.summary(),
            PilotConfig::settings_path(project),
        )
        .into());
    }
    Ok(config)
}

async fn open_browser(settings: &BrowserSettings) -> diary_pilot::Result<WebDriverPage> {
    let requested = BrowserKind::from_name(&settings.kind);

    if let Some(url) = &settings.webdriver_url {
        let kind = requested.unwrap_or(BrowserKind::Chrome);
        return WebDriverPage::connect(url, kind, settings.headless).await;
    }

    let kind = match requested {
        Some(kind) => kind,
        None => BrowserKind::detect().map(|(kind, _)| kind).ok_or_else(|| {
            PilotError::driver("launch", "neither chromedriver nor geckodriver is on PATH")
        })?,
    };
    WebDriverPage::launch(kind, settings.headless).await
}

async fn submit(
    project: &Path,
    config: &PilotConfig,
    entries_path: &Path,
    credentials: Credentials,
    dry_run: bool,
    json: bool,
) -> anyhow::Result<()> {
    let entries = SubmissionEntry::load_all(entries_path)?;
    if entries.is_empty() {
        println!("{} No entries in {}", "Info:".blue(), entries_path.display());
        return Ok(());
    }

    let page = Arc::new(open_browser(&config.browser).await?);
    let driver: Arc<dyn PageDriver> = page.clone();

    let store = JsonSelectorStore::in_dir(config.data_dir(project));
    let locator = SelfHealingLocator::new(Arc::clone(&driver), Box::new(store))
        .with_config(LocatorConfig::from_config(config));

    let machine_config = MachineConfig::from_config(config, Some(&PilotConfig::data_root(project)))
        .with_dry_run(dry_run);
    let mut machine = SubmissionStateMachine::new(locator, credentials, machine_config)
        .with_cookie_jar(CookieJar::new(config.session_dir(project)));

    let tracker = ProgressTracker::new(entries.len());
    let run_tracker = tracker.clone();
    let handle = tokio::spawn(async move { machine.run(&entries, &run_tracker).await });

    let bar = progress_bar(tracker.snapshot().total);
    let outcome = tracker
        .observe_task(handle, PROGRESS_POLL_INTERVAL, |snapshot| {
            render(&bar, snapshot)
        })
        .await;
    bar.finish_and_clear();

    if let Err(e) = page.close().await {
        tracing::warn!("Failed to close browser session: {}", e);
    }
    let (results, last) = outcome?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        println!("\n{} Run {}", "Submission:".cyan().bold(), last.run_id);
        println!("{}", "─".repeat(40));
        for result in &results {
            let status = match result.status {
                SubmissionStatus::Success => "success".green(),
                SubmissionStatus::Skipped => "skipped".yellow(),
                SubmissionStatus::Failed => "failed".red(),
            };
            print!("   {} {:<8}", result.date, status);
            if let Some(error) = &result.error {
                print!(" {}", error.dimmed());
            }
            println!();
        }
        println!(
            "\n   Completed: {}  Failed: {}  Total: {}",
            last.completed, last.failed, last.total
        );
    }

    if let Some(error) = last.error {
        return Err(PilotError::login(error).into());
    }
    Ok(())
}

fn progress_bar(total: usize) -> ProgressBar {
    let bar = ProgressBar::new(total as u64);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn render(bar: &ProgressBar, snapshot: &ProgressSnapshot) {
    bar.set_position(snapshot.processed() as u64);
    bar.set_message(snapshot.current.clone());
}
