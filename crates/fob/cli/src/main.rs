use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use crossbeam_channel::{Receiver, bounded, never, select};
use fob_apdu_core::event::{ReaderEventReceiver, reader_event_channel};
use fob_apdu_transport_pcsc::{PcscConfig, PcscDeviceManager};
use fob_provision::supervisor::control_channel;
use fob_provision::{
    Config, Control, ControlSender, FobStore, JsonFileStore, MemoryStore, NoticeReceiver,
    Notifier, Provisioner, RegistryEnvironment, ShutdownOutcome, Supervisor, TokioDispatch,
    UploadPipeline, Workflow,
};
use tokio::runtime::Runtime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod console;
mod display;

use config::{Overrides, ReaderOverrides, RegistryOverrides, StoreOverrides};
use console::{ConsoleOperator, HELP, Input, Prompt, is_yes, stdin_lines};

#[derive(Parser)]
#[command(
    version,
    about = "Provision contactless fobs and register them with the backend"
)]
struct Cli {
    /// Configuration file (default: ~/.fob-register/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reader name to use (first attached reader if not specified)
    #[arg(short, long)]
    reader: Option<String>,

    /// Registry deployment: production or oss
    #[arg(long, value_parser = parse_environment)]
    environment: Option<RegistryEnvironment>,

    /// Registry base URL, overriding the deployment
    #[arg(long)]
    base_url: Option<String>,

    /// Factory agent user; the password comes from the config file or
    /// FOB_REGISTER_REGISTRY__PASSWORD
    #[arg(short, long)]
    username: Option<String>,

    /// Fob store file (default: ~/.fob-register/fobs.json)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Keep records in memory only
    #[arg(long)]
    ephemeral: bool,

    /// Debug output, including every card exchange
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Run the provisioning console (default)
    Run,

    /// List available readers
    Readers,

    /// Show every known fob
    List,

    /// Upload every initialized fob not yet registered, then exit
    Upload,
}

fn parse_environment(value: &str) -> Result<RegistryEnvironment, String> {
    match value.to_ascii_lowercase().as_str() {
        "production" | "prod" => Ok(RegistryEnvironment::Production),
        "oss" => Ok(RegistryEnvironment::Oss),
        other => Err(format!("unknown registry environment '{other}'")),
    }
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            reader: ReaderOverrides {
                name: self.reader.clone(),
            },
            registry: RegistryOverrides {
                environment: self.environment,
                base_url: self.base_url.clone(),
                username: self.username.clone(),
            },
            store: StoreOverrides {
                path: self.store.clone(),
            },
        }
    }
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = config::load(cli.config.as_deref(), &cli.overrides())?;
    tracing::debug!(?config, "Configuration loaded");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Readers => list_readers(&config),
        Commands::List => {
            list_fobs(open_store(&config, cli.ephemeral)?.as_ref())?;
            Ok(())
        }
        Commands::Upload => {
            let runtime = Runtime::new()?;
            let services = Services::build(&config, cli.ephemeral, &runtime)?;
            let batch = runtime.block_on(services.pipeline.upload_all())?;
            for fob in &batch.succeeded {
                println!("{}", display::success(&format!("Uploaded {}", fob.display_number())));
            }
            if !batch.is_complete() {
                println!("{}", display::failure(&batch.failure_message()));
            }
            Ok(())
        }
        Commands::Run => {
            let runtime = Runtime::new()?;
            let services = Services::build(&config, cli.ephemeral, &runtime)?;
            run_console(&config, services, &runtime, cli.verbose)
        }
    }
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .init();
}

fn list_readers(config: &Config) -> eyre::Result<()> {
    let manager = PcscDeviceManager::with_config(pcsc_config(config))?;
    let readers = match manager.list_readers() {
        Ok(readers) => readers,
        Err(fob_apdu_transport_pcsc::PcscError::NoReadersAvailable) => {
            println!("No readers found!");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!("Available readers:");
    for (i, reader) in readers.iter().enumerate() {
        let status = match reader.serial() {
            Some(serial) => format!("fob {}", fob_provision::fob::display_number(&serial)),
            None if reader.has_card() => "card present".to_string(),
            None => "no card".to_string(),
        };
        println!("{}. {} ({})", i + 1, reader.name(), status);
    }
    Ok(())
}

fn list_fobs(store: &dyn FobStore) -> eyre::Result<()> {
    let fobs = store.find_all()?;
    if fobs.is_empty() {
        println!("No fobs yet");
        return Ok(());
    }
    for fob in &fobs {
        println!("{}", display::fob_row(fob));
    }
    let pending = fobs.iter().filter(|fob| fob.awaits_upload()).count();
    println!(
        "{} fob(s), {} initialized, {pending} awaiting upload",
        fobs.len(),
        fobs.iter().filter(|fob| fob.initialized).count()
    );
    Ok(())
}

fn pcsc_config(config: &Config) -> PcscConfig {
    PcscConfig::default()
        .with_response_timeout(Duration::from_millis(config.reader.response_timeout_ms))
        .with_poll_interval(Duration::from_millis(config.reader.poll_interval_ms))
}

fn open_store(config: &Config, ephemeral: bool) -> eyre::Result<Arc<dyn FobStore>> {
    match (&config.store.path, ephemeral) {
        (Some(path), false) => {
            info!(path = %path.display(), "Opening fob store");
            Ok(Arc::new(JsonFileStore::open(path)?))
        }
        _ => Ok(Arc::new(MemoryStore::new())),
    }
}

/// Everything shared between the console, the supervisor and upload tasks
struct Services {
    store: Arc<dyn FobStore>,
    notifier: Notifier,
    notices: NoticeReceiver,
    pipeline: Arc<UploadPipeline>,
    prompts: Receiver<Prompt>,
}

impl Services {
    fn build(config: &Config, ephemeral: bool, runtime: &Runtime) -> eyre::Result<Self> {
        let store = open_store(config, ephemeral)?;
        let (notifier, notices) = Notifier::channel();
        let (operator, prompts) = ConsoleOperator::new();

        let registry = config.registry.client();
        match (&config.registry.username, &config.registry.password) {
            (Some(username), Some(password)) => {
                runtime.block_on(registry.login(username, password))?;
                println!(
                    "{}",
                    display::info(&format!("Logged in to {}", registry.base_url()))
                );
            }
            _ => println!(
                "{}",
                display::warning("No registry credentials configured; uploads will fail")
            ),
        }

        let pipeline = Arc::new(UploadPipeline::new(
            Arc::new(registry),
            store.clone(),
            notifier.clone(),
            Arc::new(operator),
        ));
        Ok(Self {
            store,
            notifier,
            notices,
            pipeline,
            prompts,
        })
    }
}

/// Forward only the events of the reader whose name contains `name`
fn filter_reader(events: ReaderEventReceiver, name: String) -> ReaderEventReceiver {
    let (sender, receiver) = reader_event_channel();
    thread::spawn(move || {
        for event in events {
            if event.reader().contains(&name) && sender.send(event).is_err() {
                break;
            }
        }
    });
    receiver
}

fn run_console(
    config: &Config,
    services: Services,
    runtime: &Runtime,
    verbose: bool,
) -> eyre::Result<()> {
    let manager = PcscDeviceManager::with_config(pcsc_config(config))?;
    let monitor = manager.monitor()?;
    let mut events = monitor.start()?;
    if let Some(name) = &config.reader.name {
        events = filter_reader(events, name.clone());
    }

    let provisioner = Provisioner::new(
        services.store.clone(),
        services.notifier.clone(),
        config.provisioner()?,
    );
    let dispatch = Arc::new(TokioDispatch::new(
        runtime.handle().clone(),
        services.pipeline.clone(),
    ));
    let supervisor = Supervisor::new(manager, provisioner, dispatch, services.notifier.clone());
    let (control, control_rx) = control_channel();
    let supervisor = thread::spawn(move || supervisor.run(events, control_rx));

    println!("{HELP}");
    let console = Console {
        verbose,
        store: services.store,
        pipeline: services.pipeline,
        control,
        notices: services.notices,
        prompts: services.prompts,
        pending: VecDeque::new(),
        quitting: false,
    };
    let outcome = console.run(runtime);

    monitor.stop();
    if supervisor.join().is_err() {
        warn!("Supervisor thread panicked");
    }

    let outcome = outcome?;
    if outcome.remaining > 0 {
        println!(
            "{}",
            display::warning(&format!("{} fob(s) left unuploaded", outcome.remaining))
        );
    }
    Ok(())
}

/// Console loop: commands, notices and questions on one thread
struct Console {
    verbose: bool,
    store: Arc<dyn FobStore>,
    pipeline: Arc<UploadPipeline>,
    control: ControlSender,
    notices: NoticeReceiver,
    prompts: Receiver<Prompt>,
    pending: VecDeque<Prompt>,
    quitting: bool,
}

impl Console {
    fn run(mut self, runtime: &Runtime) -> eyre::Result<ShutdownOutcome> {
        let mut lines = stdin_lines();
        let mut stdin_open = true;
        let mut finished = never();

        loop {
            select! {
                recv(self.notices) -> notice => {
                    if let Ok(notice) = notice {
                        if let Some(line) = display::notice(&notice, self.verbose) {
                            println!("{line}");
                        }
                    }
                }
                recv(self.prompts) -> prompt => {
                    if let Ok(prompt) = prompt {
                        if stdin_open {
                            println!("{}", display::question(&prompt.question));
                            self.pending.push_back(prompt);
                        } else {
                            prompt.answer(false);
                        }
                    }
                }
                recv(lines) -> line => match line {
                    Ok(line) => match self.next_prompt() {
                        Some(prompt) => prompt.answer(is_yes(&line)),
                        None => {
                            if let Some(done) = self.command(Input::parse(&line), runtime) {
                                finished = done;
                            }
                        }
                    },
                    Err(_) => {
                        stdin_open = false;
                        lines = never();
                        self.pending.drain(..).for_each(|prompt| prompt.answer(false));
                        if let Some(done) = self.command(Input::Quit, runtime) {
                            finished = done;
                        }
                    }
                },
                recv(finished) -> outcome => {
                    return match outcome {
                        Ok(outcome) => Ok(outcome?),
                        Err(_) => Err(eyre::eyre!("shutdown task was dropped")),
                    };
                }
            }
        }
    }

    /// Oldest question still waiting for an answer
    fn next_prompt(&mut self) -> Option<Prompt> {
        while let Some(prompt) = self.pending.pop_front() {
            if !prompt.is_stale() {
                return Some(prompt);
            }
        }
        None
    }

    /// Run one operator command; returns the shutdown receiver on quit
    fn command(
        &mut self,
        input: Input,
        runtime: &Runtime,
    ) -> Option<Receiver<fob_provision::Result<ShutdownOutcome>>> {
        if self.quitting {
            return None;
        }
        let control = match input {
            Input::Init => Control::Start(Workflow::Initializing),
            Input::Verify => Control::Start(Workflow::Verifying),
            Input::Stop => Control::Stop,
            Input::List => {
                if let Err(e) = list_fobs(self.store.as_ref()) {
                    println!("{}", display::failure(&e.to_string()));
                }
                return None;
            }
            Input::Upload => {
                let pipeline = self.pipeline.clone();
                runtime.spawn(async move {
                    match pipeline.upload_all().await {
                        Ok(batch) if batch.is_complete() => {
                            info!(count = batch.succeeded.len(), "All pending fobs uploaded");
                        }
                        Ok(batch) => {
                            println!("{}", display::failure(&batch.failure_message()));
                        }
                        Err(e) => println!("{}", display::failure(&e.to_string())),
                    }
                });
                return None;
            }
            Input::Help => {
                println!("{HELP}");
                return None;
            }
            Input::Empty => return None,
            Input::Unknown(command) => {
                println!(
                    "{}",
                    display::warning(&format!("Unknown command '{command}', try 'help'"))
                );
                return None;
            }
            Input::Quit => {
                self.quitting = true;
                // Stop taking taps before the exit flow; the pipeline then
                // settles interactive uploads before its batch round
                let _ = self.control.send(Control::Shutdown);
                let (done, finished) = bounded(1);
                let pipeline = self.pipeline.clone();
                runtime.spawn(async move {
                    let _ = done.send(pipeline.shutdown().await);
                });
                return Some(finished);
            }
        };

        if self.control.send(control).is_err() {
            println!("{}", display::failure("The reader supervisor is not running"));
        }
        None
    }
}
