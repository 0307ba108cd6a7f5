use std::sync::Arc;

use agrishare::api::ApiClient;
use agrishare::api::models::{SignupRequest, TokenResponse};
use agrishare::config::Config;
use agrishare::notify::{ConsoleNotifier, Notice, Notifier};
use agrishare::observability::Metrics;
use agrishare::session::{AuthState, FileTokenStore, SessionManager, SignOutReason};
use agrishare::upload::{
    DatasetMetadata, FileStatus, ProgressStatus, SelectedFile, UploadBatch, UploadLimits,
    UploadOrchestrator, UploadProgress,
};
use chrono::DateTime;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::cli::{Commands, ConfigCommands, DatasetCommands, ServiceCommands, UploadArgs};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Everything a signed-in command needs, wired from one configuration
struct App {
    config: Config,
    store: FileTokenStore,
    session: Arc<SessionManager>,
    client: Arc<ApiClient>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<Metrics>,
}

impl App {
    fn open(config: Config) -> Result<Self, AnyError> {
        let store = FileTokenStore::open(&config.session.storage_dir)?;
        let metrics = Arc::new(Metrics::new());
        let session = Arc::new(
            SessionManager::new(Arc::new(store.clone()), config.session.idle_timeout())
                .with_metrics(metrics.clone()),
        );
        session.restore();
        let client = Arc::new(ApiClient::new(&config, session.clone())?);

        Ok(Self {
            config,
            store,
            session,
            client,
            notifier: Arc::new(ConsoleNotifier),
            metrics,
        })
    }

    fn sign_in(&self, response: TokenResponse) -> Result<(), AnyError> {
        let session = self
            .session
            .login(&response.access_token, response.refresh_token.as_deref())?;
        let who = session
            .claims()
            .email
            .clone()
            .or_else(|| session.claims().subject_id())
            .unwrap_or_else(|| "unknown user".to_string());
        self.notifier.notify(Notice::success("Signed in", who));
        Ok(())
    }
}

pub async fn run(command: Commands, config: Config) -> Result<(), AnyError> {
    match command {
        Commands::Config(ConfigCommands::Show) => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Commands::Service(command) => App::open(config)?.run(command).await,
    }
}

impl App {
    async fn run(&self, command: ServiceCommands) -> Result<(), AnyError> {
        match command {
            ServiceCommands::Login(args) => {
                let response = self.client.login(&args.email, &args.password).await?;
                self.sign_in(response)?;
            }
            ServiceCommands::Signup(args) => {
                let request = SignupRequest {
                    email: args.email,
                    password: args.password,
                    first_name: args.first_name,
                    last_name: args.last_name,
                    gender: args.gender,
                    country: args.country,
                };
                let response = self.client.signup(&request).await?;
                if let Some(message) = &response.message {
                    info!(%message, "Account created");
                }
                self.sign_in(response)?;
            }
            ServiceCommands::Oauth(args) => {
                let response = self.client.oauth(&args.provider, &args.credential).await?;
                self.sign_in(response)?;
            }
            ServiceCommands::Logout => {
                self.session.logout(SignOutReason::UserRequested);
                self.notifier.notify(Notice::info("Signed out", "Stored session removed"));
            }
            ServiceCommands::Whoami => whoami(self),
            ServiceCommands::Upload(args) => upload(self, args).await?,
            ServiceCommands::Dataset(DatasetCommands::Show { id }) => {
                let dataset = self.client.get_dataset(id).await?;
                println!("{} (#{})", dataset.dataset_name, dataset.dataset_id);
                if let Some(description) = &dataset.dataset_description {
                    println!("  {description}");
                }
                println!("  uploader:   {}", dataset.uploader_id);
                println!("  created:    {}", dataset.date_of_creation);
                println!("  downloads:  {}", dataset.downloads_count);
                if !dataset.tags.is_empty() {
                    println!("  tags:       {}", dataset.tags.join(", "));
                }
                if let Some(location) = &dataset.geographic_location {
                    println!("  location:   {location}");
                }
                if let Some(period) = &dataset.data_time_period {
                    println!("  period:     {period}");
                }
                if let Some(status) = &dataset.approval_status {
                    println!("  status:     {status}");
                }
            }
            ServiceCommands::Dataset(DatasetCommands::Files { id }) => {
                let files = self.client.list_dataset_files(id).await?;
                if files.is_empty() {
                    println!("No files in dataset {id}");
                }
                for file in files {
                    let size = file
                        .size
                        .and_then(|s| u64::try_from(s).ok())
                        .map(|s| agrishare::humanize::ByteSize(s).to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("{:>8}  {:>10}  {}", file.file_id, size, file.file_name);
                }
            }
            ServiceCommands::Download(args) => {
                let bytes = self.client.download_file(args.file_id).await?;
                tokio::fs::write(&args.output, &bytes).await?;
                self.notifier.notify(Notice::success(
                    "Download complete",
                    format!("{} bytes written to {}", bytes.len(), args.output.display()),
                ));
            }
        }
        Ok(())
    }
}

fn whoami(app: &App) {
    match app.session.state() {
        AuthState::SignedIn(session) => {
            let claims = session.claims();
            println!(
                "{}",
                claims
                    .display_name()
                    .or_else(|| claims.email.clone())
                    .unwrap_or_else(|| "signed in".to_string())
            );
            if let Some(email) = &claims.email {
                println!("  email:   {email}");
            }
            if let Some(id) = session.uploader_id() {
                println!("  user id: {id}");
            }
            if let Some(role) = &claims.role {
                println!("  role:    {role}");
            }
            match session.expires_at().and_then(|exp| DateTime::from_timestamp(exp, 0)) {
                Some(expiry) => println!("  expires: {}", expiry.to_rfc3339()),
                None => println!("  expires: never"),
            }
        }
        _ => println!("Not signed in"),
    }
}

async fn upload(app: &App, args: UploadArgs) -> Result<(), AnyError> {
    if app.session.current().is_none() {
        return Err("not signed in; run `agrishare login` first".into());
    }

    let mut metadata = DatasetMetadata {
        name: args.name,
        description: args.description,
        tags: args.tags,
        ..Default::default()
    };
    metadata.geographic_location = args.location;
    metadata.data_time_period = args.period;

    let mut batch = UploadBatch::new(metadata, UploadLimits::from(&app.config.upload));
    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        match SelectedFile::from_path(path).await {
            Ok(file) => files.push(file),
            Err(e) => app.notifier.notify(Notice::error("File skipped", e.to_string())),
        }
    }
    let offered = files.len();
    let taken = batch.selection.add(files);
    debug!(offered, taken, "Selection built");
    for entry in batch.selection.entries() {
        if let Some(error) = entry.error() {
            app.notifier.notify(Notice::error("File skipped", error));
        }
    }

    let sweep = app.session.spawn_expiry_sweep(app.config.session.expiry_sweep());
    let (events, watcher) = app.store.watch(app.config.session.storage_poll());
    let listener = app.session.spawn_storage_listener(events);

    let orchestrator =
        UploadOrchestrator::new(app.client.clone(), app.session.clone(), app.notifier.clone())
            .with_metrics(app.metrics.clone());
    let reporter = tokio::spawn(report_progress(orchestrator.subscribe()));
    let mut auth = app.session.subscribe();

    let result = tokio::select! {
        outcome = orchestrator.upload_dataset(&mut batch) => Ok(outcome),
        reason = wait_for_sign_out(&mut auth) => Err(reason),
    };

    for task in [sweep, watcher, listener, reporter] {
        task.abort();
    }

    for entry in batch.selection.entries() {
        let marker = match entry.status() {
            FileStatus::Success => "ok",
            FileStatus::Error => "failed",
            FileStatus::Uploading => "interrupted",
            FileStatus::Idle => "not sent",
        };
        eprintln!("  {:<11} {}", marker, entry.file().name);
    }
    let counters = app.metrics.snapshot();
    debug!(?counters, "Upload counters");

    match result {
        Ok(outcome) if outcome.success => {
            if let Some(id) = outcome.dataset_id {
                println!("{id}");
            }
            Ok(())
        }
        Ok(outcome) => Err(outcome
            .error
            .unwrap_or_else(|| "upload failed".to_string())
            .into()),
        Err(reason) => Err(format!("session ended during upload ({reason:?})").into()),
    }
}

/// Resolves once the session leaves the signed-in state
async fn wait_for_sign_out(auth: &mut watch::Receiver<AuthState>) -> Option<SignOutReason> {
    loop {
        if let AuthState::SignedOut(reason) = &*auth.borrow_and_update() {
            return *reason;
        }
        if auth.changed().await.is_err() {
            return None;
        }
    }
}

async fn report_progress(mut progress: watch::Receiver<UploadProgress>) {
    while progress.changed().await.is_ok() {
        let snapshot = progress.borrow_and_update().clone();
        if snapshot.status != ProgressStatus::Uploading {
            continue;
        }
        eprintln!(
            "[{:>3}%] {}/{} {}",
            snapshot.overall_percent,
            snapshot.completed_files,
            snapshot.total_files,
            snapshot.current_file.as_deref().unwrap_or("creating dataset"),
        );
    }
}
