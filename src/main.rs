use anyhow::Context;
use clap::Parser;
use mailinlet::{AuthMethod, DeliveryHook, Email, ServerConfig, SmtpServer};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Embeddable SMTP receiving server.
///
/// Set MAILINLET_LOG to adjust the log filter, for example
/// `MAILINLET_LOG=mailinlet=debug` to trace every protocol line.
#[derive(Debug, Parser)]
#[command(about, version)]
struct Opt {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:2525")]
    listen: String,

    /// Domain announced to clients. Overrides the config file.
    #[arg(long)]
    domain: Option<String>,

    /// TOML file with server settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Refuse EHLO and do not advertise extensions
    #[arg(long)]
    no_extensions: bool,

    /// Number of connection transcripts to retain
    #[arg(long)]
    log_capacity: Option<usize>,
}

impl Opt {
    fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => ServerConfig::new("mailinlet.local"),
        };
        if let Some(domain) = &self.domain {
            config.domain = domain.clone();
        }
        if self.no_extensions {
            config.allow_extensions = false;
        }
        if let Some(capacity) = self.log_capacity {
            config.transaction_log_capacity = capacity;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Prints every delivered message
struct PrintingHook;

impl DeliveryHook for PrintingHook {
    fn has_mailbox(&self, _user: &str) -> bool {
        true
    }

    fn validate_login(&self, _user: &str, _credential: &str, _method: AuthMethod) -> bool {
        false
    }

    fn on_mail_received(&self, recipient: &str, message: &Email) {
        println!("-------- MESSAGE BEGINS --------");
        println!("Received at: {}", message.received_at.to_rfc2822());
        println!("From: {}", message.sender);
        println!("To: {recipient}");
        if let Some(subject) = message.subject() {
            println!("Subject: {subject}");
        }
        for info in &message.metadata {
            println!(" - {info}");
        }
        println!();
        for line in &message.body {
            println!("{line}");
        }
        println!("-------- MESSAGE ENDS --------");
    }
}

fn main() -> anyhow::Result<()> {
    let opts = Opt::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("MAILINLET_LOG")
                .unwrap_or_else(|_| EnvFilter::new("mailinlet=info")),
        )
        .with_thread_names(true)
        .init();

    let config = opts.server_config()?;
    tracing::info!(
        domain = %config.domain,
        extensions = config.allow_extensions,
        "starting SMTP server"
    );

    let server = SmtpServer::with_hooks(config, PrintingHook);
    spawn_shutdown_watcher(server.clone())?;
    server
        .start(&opts.listen)
        .with_context(|| format!("serving on {}", opts.listen))?;
    tracing::info!("{}", server.status());
    Ok(())
}

/// Call `shutdown` on the server once the process is asked to stop
fn spawn_shutdown_watcher(server: SmtpServer) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;
    std::thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            runtime.block_on(wait_for_signal());
            tracing::info!("Shutdown requested");
            server.shutdown();
        })
        .context("spawning signal thread")?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sig_term = match signal(SignalKind::terminate()) {
        Ok(sig_term) => sig_term,
        Err(err) => {
            tracing::warn!("cannot listen for SIGTERM: {err}");
            tokio::signal::ctrl_c().await.ok();
            return;
        }
    };
    tokio::select! {
        _ = sig_term.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}
