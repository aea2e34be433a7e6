//! jiralink - Multi-instance Jira bridge
//!
//! Main entry point for the jiralink CLI. Operates on the SQLite store named
//! in the configuration, with a log-only host standing in for the chat side.

use clap::{Args, Parser, Subcommand};
use jiralink::client::metrics::encode_metrics;
use jiralink::client::UserService;
use jiralink::config::{validate_config_result, PluginConfig};
use jiralink::host::{LogNotifier, MemoryHost, StaticLicense};
use jiralink::instance::{Instance, InstanceType};
use jiralink::plugin::TransitionIssue;
use jiralink::store::{InstanceStore, SqliteStore};
use jiralink::types::Id;
use jiralink::user::{Connection, Credentials};
use jiralink::{JiraLinkError, Plugin, ResultExt};
use std::process;
use std::sync::Arc;

/// jiralink - Connect chat users to many Jira instances
#[derive(Parser, Debug)]
#[command(name = "jiralink")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/jiralink/config.yaml)
    #[arg(short, long, env = "JIRALINK_CONFIG")]
    config: Option<String>,

    /// Allow more than one installed instance
    #[arg(long, env = "JIRALINK_ENTERPRISE")]
    enterprise: bool,

    /// Debug logging unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,

    /// Print Jira request metrics to stderr when done
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage installed Jira instances
    #[command(subcommand)]
    Instance(InstanceCommands),

    /// Manage user connections
    #[command(subcommand)]
    User(UserCommands),

    /// Work with issues as a connected user
    #[command(subcommand)]
    Issue(IssueCommands),

    /// Print the Prometheus metrics registered by the client
    Metrics,
}

#[derive(Subcommand, Debug)]
enum InstanceCommands {
    /// List installed instances
    List,

    /// Install or reinstall an instance
    Install {
        /// Jira URL (scheme optional)
        url: String,

        /// server, cloud-oauth or cloud
        #[arg(short, long, default_value = "server")]
        r#type: InstanceType,

        /// Atlassian cloud ID (cloud-oauth)
        #[arg(long)]
        cloud_id: Option<String>,

        /// App key (cloud)
        #[arg(long)]
        app_key: Option<String>,
    },

    /// Uninstall an instance and disconnect its users
    Uninstall {
        url: String,

        /// Must match the installed type
        #[arg(short, long, default_value = "server")]
        r#type: InstanceType,
    },

    /// Mark the instance used when a request names none
    Legacy { url: String },

    /// Set an instance alias; omit the alias to clear it
    Alias { url: String, alias: Option<String> },

    /// Show which instance a webhook would be routed to
    Resolve { hint: Option<String> },
}

#[derive(Args, Debug)]
struct CredentialArgs {
    /// Bearer token (OAuth or personal access token)
    #[arg(long, conflicts_with_all = ["username", "password"])]
    token: Option<String>,

    #[arg(long, requires = "password")]
    username: Option<String>,

    #[arg(long, env = "JIRALINK_PASSWORD", requires = "username")]
    password: Option<String>,
}

impl CredentialArgs {
    fn into_credentials(self) -> jiralink::Result<Credentials> {
        match (self.token, self.username, self.password) {
            (Some(token), _, _) => Ok(Credentials::Bearer { token }),
            (None, Some(username), Some(password)) => Ok(Credentials::Basic { username, password }),
            _ => Err(JiraLinkError::InvalidInput(
                "pass --token, or --username and --password".to_string(),
            )),
        }
    }
}

#[derive(Subcommand, Debug)]
enum UserCommands {
    /// Connect a host user to an instance
    Connect {
        user: String,
        url: String,

        #[command(flatten)]
        credentials: CredentialArgs,

        /// Skip looking up the Jira account behind the credentials
        #[arg(long)]
        offline: bool,
    },

    /// Disconnect a user; the default instance when none is given
    Disconnect { user: String, instance: Option<String> },

    /// Set a user's default instance
    Default { user: String, instance: String },

    /// Show which instance a user's request would be routed to
    Resolve { user: String, hint: Option<String> },
}

#[derive(Subcommand, Debug)]
enum IssueCommands {
    /// Show one issue
    Get {
        user: String,
        key: String,
        #[arg(short, long, default_value = "")]
        instance: String,
    },

    /// Search by text, or by JQL with --jql
    Search {
        user: String,
        #[arg(default_value = "")]
        query: String,
        #[arg(long, default_value = "")]
        jql: String,
        /// Comma-separated fields (default: key,summary)
        #[arg(long, default_value = "")]
        fields: String,
        #[arg(long, default_value = "")]
        limit: String,
        #[arg(short, long, default_value = "")]
        instance: String,
    },

    /// Move an issue to the state matching STATE
    Transition {
        user: String,
        key: String,
        state: String,
        #[arg(short, long, default_value = "")]
        instance: String,
    },

    /// Assign an issue to the single Jira user matching QUERY
    Assign {
        user: String,
        key: String,
        query: String,
        #[arg(short, long, default_value = "")]
        instance: String,
    },

    /// Clear an issue's assignee
    Unassign {
        user: String,
        key: String,
        #[arg(short, long, default_value = "")]
        instance: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    if let Err(e) = jiralink::logging::init_with_level(level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let print_metrics = cli.metrics;
    let result = run(cli).await;
    if print_metrics {
        eprint!("{}", encode_metrics());
    }
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn load_config(path: &Option<String>) -> jiralink::Result<PluginConfig> {
    let config = match path {
        Some(path) => PluginConfig::load(path)?,
        None => PluginConfig::load_default()?,
    };
    validate_config_result(&config)?;
    Ok(config)
}

fn build_plugin(config: PluginConfig, enterprise: bool) -> jiralink::Result<Plugin> {
    let store = SqliteStore::open(config.store.store_config())
        .context("failed to open the jiralink store")?;
    tracing::debug!(path = %store.path().display(), "Store opened");

    let host = MemoryHost::new(config.site_url.clone(), config.bot_user_id.clone());
    Plugin::builder(config)
        .store(Arc::new(store))
        .host(Arc::new(host))
        .notifier(Arc::new(LogNotifier))
        .license(Arc::new(StaticLicense(enterprise)))
        .build()
}

async fn run(cli: Cli) -> jiralink::Result<()> {
    if let Commands::Metrics = cli.command {
        print!("{}", encode_metrics());
        return Ok(());
    }

    let config = load_config(&cli.config)?;
    let plugin = build_plugin(config, cli.enterprise)?;

    match cli.command {
        Commands::Instance(cmd) => handle_instance_command(&plugin, cmd).await,
        Commands::User(cmd) => handle_user_command(&plugin, cmd).await,
        Commands::Issue(cmd) => handle_issue_command(&plugin, cmd).await,
        Commands::Metrics => Ok(()),
    }
}

async fn handle_instance_command(plugin: &Plugin, cmd: InstanceCommands) -> jiralink::Result<()> {
    match cmd {
        InstanceCommands::List => {
            let instances = plugin.list_instances().await?;
            if instances.is_empty() {
                println!("No Jira instances installed.");
                return Ok(());
            }
            println!("Installed Jira instances: {}", instances.len());
            println!();
            for instance in instances {
                let mut line = format!("  {} ({})", instance.instance_id, instance.instance_type);
                if !instance.alias.is_empty() {
                    line.push_str(&format!(" alias {}", instance.alias));
                }
                if instance.is_v2_legacy {
                    line.push_str(" [legacy]");
                }
                println!("{}", line);
            }
        }

        InstanceCommands::Install {
            url,
            r#type,
            cloud_id,
            app_key,
        } => {
            let instance = match r#type {
                InstanceType::Server => Instance::server(&url)?,
                InstanceType::CloudOAuth => Instance::cloud_oauth(
                    &url,
                    cloud_id.ok_or_else(|| {
                        JiraLinkError::InvalidInput("--cloud-id is required for cloud-oauth".into())
                    })?,
                )?,
                InstanceType::Cloud => Instance::cloud(
                    &url,
                    app_key.ok_or_else(|| {
                        JiraLinkError::InvalidInput("--app-key is required for cloud".into())
                    })?,
                )?,
            };
            let id = instance.id().clone();
            plugin.install_instance(instance).await?;
            println!("Installed {} ({})", id, r#type);
        }

        InstanceCommands::Uninstall { url, r#type } => {
            let id = Id::new(jiralink::instance::normalize_jira_url(&url)?);
            match plugin.uninstall_instance(&id, r#type).await? {
                Some(_) => println!("Uninstalled {}", id),
                None => println!("Removed {} from the registry (its record was missing)", id),
            }
        }

        InstanceCommands::Legacy { url } => {
            let id = Id::new(jiralink::instance::normalize_jira_url(&url)?);
            plugin.store_v2_legacy_instance(&id).await?;
            println!("{} is now the legacy instance", id);
        }

        InstanceCommands::Alias { url, alias } => {
            let id = Id::new(jiralink::instance::normalize_jira_url(&url)?);
            let alias = alias.unwrap_or_default();
            plugin.set_instance_alias(&id, &alias).await?;
            if alias.is_empty() {
                println!("Cleared the alias of {}", id);
            } else {
                println!("{} is now known as {}", id, alias);
            }
        }

        InstanceCommands::Resolve { hint } => {
            let id = plugin
                .resolve_webhook_instance_url(hint.as_deref().unwrap_or_default())
                .await?;
            println!("{}", id);
        }
    }
    Ok(())
}

async fn handle_user_command(plugin: &Plugin, cmd: UserCommands) -> jiralink::Result<()> {
    match cmd {
        UserCommands::Connect {
            user,
            url,
            credentials,
            offline,
        } => {
            let instance_id = Id::new(jiralink::instance::normalize_jira_url(&url)?);
            let mut connection = Connection::new(credentials.into_credentials()?);

            if !offline {
                let instance = plugin.instance_store().load_instance(&instance_id).await?;
                let http = plugin.config().http.build_client()?;
                let me = instance
                    .get_client(&http, &connection)?
                    .get_self()
                    .await
                    .context("failed to look up the Jira account; use --offline to skip")?;
                connection.display_name = me.display_name;
                connection.account_id = me.account_id;
                connection.name = me.name;
                connection.key = me.key;
                connection.email_address = me.email_address;
            }

            let display = connection.display().to_string();
            let user = plugin
                .connect_user(&instance_id, &Id::new(user), connection)
                .await?;
            println!(
                "Connected {} to {} as {}",
                user.host_user_id, instance_id, display
            );
        }

        UserCommands::Disconnect { user, instance } => {
            let connection = plugin
                .disconnect(&Id::new(user), instance.as_deref().unwrap_or_default())
                .await?;
            println!("Disconnected {}", connection.display());
        }

        UserCommands::Default { user, instance } => {
            let id = plugin.set_default_instance(&Id::new(user), &instance).await?;
            println!("Default instance is now {}", id);
        }

        UserCommands::Resolve { user, hint } => {
            let (_, id) = plugin
                .resolve_user_instance_url(&Id::new(user), hint.as_deref().unwrap_or_default())
                .await?;
            println!("{}", id);
        }
    }
    Ok(())
}

async fn handle_issue_command(plugin: &Plugin, cmd: IssueCommands) -> jiralink::Result<()> {
    match cmd {
        IssueCommands::Get {
            user,
            key,
            instance,
        } => {
            let user_id = Id::new(user);
            let (_, instance_id) = plugin.resolve_user_instance_url(&user_id, &instance).await?;
            let issue = plugin.get_issue_by_key(&instance_id, &user_id, &key).await?;
            println!("{}: {}", issue.key, issue.summary());
            if let Some(status) = &issue.fields.status {
                println!("  Status:   {}", status.name);
            }
            if let Some(assignee) = &issue.fields.assignee {
                println!("  Assignee: {}", assignee.display_name);
            }
            if !issue.fields.description.is_empty() {
                println!();
                println!("{}", issue.fields.description);
            }
        }

        IssueCommands::Search {
            user,
            query,
            jql,
            fields,
            limit,
            instance,
        } => {
            let user_id = Id::new(user);
            let (_, instance_id) = plugin.resolve_user_instance_url(&user_id, &instance).await?;
            let issues = plugin
                .get_search_issues(&instance_id, &user_id, &query, &jql, &fields, &limit)
                .await?;
            println!("Found {} issues:", issues.len());
            for issue in issues {
                println!("  {:<12} {}", issue.key, issue.summary());
            }
        }

        IssueCommands::Transition {
            user,
            key,
            state,
            instance,
        } => {
            let user_id = Id::new(user);
            let (_, instance_id) = plugin.resolve_user_instance_url(&user_id, &instance).await?;
            let msg = plugin
                .transition_issue(&TransitionIssue {
                    instance_id,
                    user_id,
                    channel_id: String::new(),
                    issue_key: key,
                    to_state: state,
                })
                .await?;
            println!("{}", msg);
        }

        IssueCommands::Assign {
            user,
            key,
            query,
            instance,
        } => {
            let user_id = Id::new(user);
            let (_, instance_id) = plugin.resolve_user_instance_url(&user_id, &instance).await?;
            let msg = plugin
                .assign_issue(&instance_id, &user_id, &key, &query, None)
                .await?;
            println!("{}", msg);
        }

        IssueCommands::Unassign {
            user,
            key,
            instance,
        } => {
            let user_id = Id::new(user);
            let (_, instance_id) = plugin.resolve_user_instance_url(&user_id, &instance).await?;
            let msg = plugin.unassign_issue(&instance_id, &user_id, &key).await?;
            println!("{}", msg);
        }
    }
    Ok(())
}
