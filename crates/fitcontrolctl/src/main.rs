mod config;

use anyhow::{bail, Context as AnyhowContext, Result};
use clap::{Parser, Subcommand};
use config::{Config, Context};
use fitcontrol_client::models::RegisterData;
use fitcontrol_client::session::FileSessionPersistence;
use fitcontrol_client::{
    ApiClient, ApiError, ApiRequest, AuthService, ClientConfig, Environment, SessionStore,
    UploadForm,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fitcontrol")]
#[command(version, about = "FitControl Command Line Tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// API base URL (overrides context and environment)
    #[arg(long, global = true)]
    server_url: Option<String>,

    /// Backend environment: development or production
    #[arg(long, global = true)]
    env: Option<Environment>,

    /// Session file (default: ~/.fitcontrol/auth-storage.json)
    #[arg(long, global = true)]
    session_file: Option<PathBuf>,

    /// Emit only JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Api(ApiCommand),
    /// Context management
    Context {
        #[command(subcommand)]
        command: ContextCommand,
    },
}

/// Commands that talk to the backend through a client.
#[derive(Subcommand)]
enum ApiCommand {
    /// Sign in and store the session
    /// Examples:
    ///     fitcontrol login ana
    ///     fitcontrol --env production login ana --password 's3cret'
    #[command(verbatim_doc_comment)]
    Login {
        username: String,
        /// Password (prompted when omitted)
        #[arg(long)]
        password: Option<String>,
    },
    /// Create an account and store the session
    /// Example:
    ///     fitcontrol register ana ana@example.com
    #[command(verbatim_doc_comment)]
    Register {
        username: String,
        email: String,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Fetch the signed-in user from the backend
    Whoami,
    /// Show the stored session without contacting the backend
    Status,
    /// Refresh the access token now
    Refresh,
    /// Send an authenticated request
    /// Examples:
    ///     fitcontrol request GET /plans/ --query difficulty_level=beginner
    ///     fitcontrol request POST /log/ --data '{"exercise_id": 3, "sets_completed": 3}'
    ///     fitcontrol request DELETE /plans/12/
    #[command(verbatim_doc_comment)]
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,
        /// API path relative to the base URL
        path: String,
        /// JSON body
        #[arg(short, long)]
        data: Option<String>,
        /// Query parameter as key=value (repeatable)
        #[arg(short, long = "query")]
        query: Vec<String>,
    },
    /// Upload a file as multipart form data
    /// Example:
    ///     fitcontrol upload /analyze/ --file squat.mp4 --field video --form exercise_id=3
    #[command(verbatim_doc_comment)]
    Upload {
        /// API path relative to the base URL
        path: String,
        /// File to send
        #[arg(short, long)]
        file: PathBuf,
        /// Form field name for the file
        #[arg(long, default_value = "file")]
        field: String,
        /// Extra text field as key=value (repeatable)
        #[arg(long = "form")]
        form: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ContextCommand {
    /// Add a named backend
    /// Examples:
    ///     fitcontrol context add local --server-url=http://localhost:8000/api
    ///     fitcontrol context add prod --server-url=https://api.fitcontrol.com/api --set-current
    #[command(verbatim_doc_comment)]
    Add {
        name: String,
        #[arg(long)]
        server_url: String,
        #[arg(long)]
        environment: Option<Environment>,
        /// Set as current context
        #[arg(long)]
        set_current: bool,
    },
    /// List configured contexts
    List,
    /// Switch to a different context
    Use { name: String },
    /// Delete a context
    Delete { name: String },
    /// Show the current context
    Current,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,fitcontrol_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let mut config = Config::load()?;

    let command = match cli.command {
        Some(Commands::Context { command }) => return handle_context_command(&mut config, command),
        Some(Commands::Api(command)) => command,
        None => {
            println!("Use --help for usage information");
            return Ok(());
        }
    };

    let client_config = resolve_client_config(cli.server_url, cli.env, &config)?;
    tracing::debug!(
        environment = %client_config.environment,
        base_url = %client_config.base_url,
        "Client configuration loaded"
    );

    let session_path = match cli.session_file {
        Some(path) => path,
        None => FileSessionPersistence::default_path()?,
    };
    let session = SessionStore::load(Arc::new(FileSessionPersistence::new(session_path))).await;
    let client = ApiClient::new(client_config, session)?;

    if let Err(e) = run(command, client, cli.json).await {
        eprintln!("Error: {}", user_message(&e));
        std::process::exit(1);
    }

    Ok(())
}

/// `--server-url`, then `--env`, then the current context, then the process environment.
fn resolve_client_config(
    server_url: Option<String>,
    env: Option<Environment>,
    config: &Config,
) -> Result<ClientConfig> {
    let base = match env {
        Some(env) => ClientConfig::for_environment(env),
        None => ClientConfig::from_env()?,
    };

    if let Some(url) = server_url {
        return Ok(base.with_base_url(&url));
    }
    if env.is_some() {
        return Ok(base);
    }

    match config.get_current_context() {
        Some((_, ctx)) => {
            let mut resolved = base.with_base_url(&ctx.server_url);
            if let Some(environment) = ctx.environment {
                resolved.environment = environment;
            }
            Ok(resolved)
        }
        None => Ok(base),
    }
}

fn user_message(error: &anyhow::Error) -> String {
    match error.downcast_ref::<ApiError>() {
        Some(api_error) => api_error.message(),
        None => format!("{:#}", error),
    }
}

async fn run(command: ApiCommand, client: ApiClient, json_only: bool) -> Result<()> {
    let auth = AuthService::new(client.clone());

    match command {
        ApiCommand::Login { username, password } => {
            let password = match password {
                Some(password) => password,
                None => prompt("Password: ")?,
            };
            let user = auth.login(&username, &password).await?;
            print_value(&serde_json::to_value(&user)?, json_only, "Logged in as")?;
        }
        ApiCommand::Register {
            username,
            email,
            first_name,
            last_name,
        } => {
            let password = prompt("Password: ")?;
            let confirm_password = prompt("Confirm password: ")?;
            let data = RegisterData {
                username,
                email,
                password,
                confirm_password,
                first_name,
                last_name,
            };
            let user = auth.register(&data).await?;
            print_value(&serde_json::to_value(&user)?, json_only, "Registered")?;
        }
        ApiCommand::Logout => {
            auth.logout().await;
            if !json_only {
                println!("Logged out.");
            }
        }
        ApiCommand::Whoami => {
            let user = auth.current_user().await?;
            print_value(&serde_json::to_value(&user)?, json_only, "User")?;
        }
        ApiCommand::Status => {
            let session = client.session().snapshot().await;
            let summary = serde_json::json!({
                "authenticated": session.is_authenticated(),
                "username": session.user().map(|u| u.username.clone()),
                "has_access_token": session.access_token().is_some(),
                "has_refresh_token": session.refresh_token().is_some(),
                "server_url": client.config().base_url,
            });
            print_value(&summary, json_only, "Session")?;
        }
        ApiCommand::Refresh => {
            auth.refresh_access_token().await?;
            if !json_only {
                println!("Access token refreshed.");
            }
        }
        ApiCommand::Request {
            method,
            path,
            data,
            query,
        } => {
            let mut request = match method.to_uppercase().as_str() {
                "GET" => ApiRequest::get(path),
                "POST" => ApiRequest::post(path),
                "PUT" => ApiRequest::put(path),
                "PATCH" => ApiRequest::patch(path),
                "DELETE" => ApiRequest::delete(path),
                other => bail!("Unsupported HTTP method: {}", other),
            };
            for pair in &query {
                let (key, value) = split_pair(pair)?;
                request = request.query_param(key, value);
            }
            if let Some(data) = data {
                let body: serde_json::Value =
                    serde_json::from_str(&data).context("Failed to parse --data as JSON")?;
                request = request.json(&body)?;
            }

            let response = client.send(&request).await?;
            let body: serde_json::Value = response
                .json()
                .unwrap_or_else(|_| serde_json::Value::String(response.text()));
            print_value(&body, json_only, &format!("Status {}", response.status()))?;
        }
        ApiCommand::Upload {
            path,
            file,
            field,
            form,
        } => {
            let mut upload = UploadForm::new();
            for pair in &form {
                let (key, value) = split_pair(pair)?;
                upload = upload.text(key, value);
            }
            let upload = upload.file_from_path(field, &file).await?;

            let response = client.send(&ApiRequest::post(path).multipart(upload)).await?;
            let body: serde_json::Value = response
                .json()
                .unwrap_or_else(|_| serde_json::Value::String(response.text()));
            print_value(&body, json_only, "Uploaded")?;
        }
    }

    Ok(())
}

fn handle_context_command(config: &mut Config, command: ContextCommand) -> Result<()> {
    match command {
        ContextCommand::Add {
            name,
            server_url,
            environment,
            set_current,
        } => {
            config.contexts.insert(
                name.clone(),
                Context {
                    server_url,
                    environment,
                },
            );
            if set_current || config.current_context.is_none() {
                config.current_context = Some(name.clone());
            }
            config.save()?;
            println!("Context '{}' added.", name);
            if config.current_context.as_ref() == Some(&name) {
                println!("Context '{}' is now the current context.", name);
            }
        }
        ContextCommand::List => {
            println!("  {:<20} {:<40}", "NAME", "SERVER URL");
            for (name, ctx) in &config.contexts {
                let current_mark = if config.current_context.as_ref() == Some(name) {
                    "*"
                } else {
                    " "
                };
                println!("{} {:<20} {:<40}", current_mark, name, ctx.server_url);
            }
        }
        ContextCommand::Use { name } => {
            if !config.contexts.contains_key(&name) {
                bail!("Context '{}' not found.", name);
            }
            config.current_context = Some(name.clone());
            config.save()?;
            println!("Switched to context '{}'.", name);
        }
        ContextCommand::Delete { name } => {
            if config.contexts.remove(&name).is_none() {
                bail!("Context '{}' not found.", name);
            }
            if config.current_context.as_ref() == Some(&name) {
                config.current_context = None;
            }
            config.save()?;
            println!("Context '{}' deleted.", name);
        }
        ContextCommand::Current => match config.get_current_context() {
            Some((name, ctx)) => println!("Current context: {} ({})", name, ctx.server_url),
            None => println!("No current context set."),
        },
    }
    Ok(())
}

fn split_pair(pair: &str) -> Result<(&str, &str)> {
    pair.split_once('=')
        .with_context(|| format!("Expected key=value, got '{}'", pair))
}

fn prompt(label: &str) -> Result<String> {
    rpassword::prompt_password(label).context("Failed to read password")
}

fn print_value(value: &serde_json::Value, json_only: bool, label: &str) -> Result<()> {
    if json_only {
        println!("{}", serde_json::to_string(value)?);
    } else {
        println!("{}: {}", label, serde_json::to_string_pretty(value)?);
    }
    Ok(())
}
