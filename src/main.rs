//! Entangle - Pair devices over a rendezvous channel with a PIN and a TOTP
//!
//! The issuer shows a QR code for an authenticator app; the requester types
//! the PIN followed by the app's current code and receives the issuer's
//! credential.

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use entangle_auth::secret::derive_secret;
use entangle_auth::{
    address_for_key, current_token, Collaborators, CredentialSuite, DirectoryStore, Ed25519Suite,
    EventKind, Identity, PairingSession, ProvisioningInfo, Role, SessionEvent, TokenProvider,
    TokenTicker,
};
use entangle_core::{Algorithm, MatchRule, SessionConfig};
use entangle_rendezvous::MemoryRendezvous;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Entangle - PIN + one-time passcode device pairing
#[derive(Parser, Debug)]
#[command(name = "entangle")]
#[command(version, about, long_about = None)]
struct Args {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the enrollment QR code and otpauth URI
    Provision {
        #[command(flatten)]
        session: SessionArgs,

        /// Also write the QR code as a PNG file
        #[arg(long)]
        png: Option<PathBuf>,
    },

    /// Print the current token
    Token {
        #[command(flatten)]
        session: SessionArgs,

        /// Keep printing a new token at every period boundary
        #[arg(short, long)]
        follow: bool,
    },

    /// Publish an alias for a public key in the local directory
    Alias {
        /// Alias name, with or without the ~@ prefix
        name: String,

        /// Public key the alias points at
        public_key: String,

        /// Directory file (defaults to ~/.config/entangle/directory.json)
        #[arg(long)]
        directory: Option<PathBuf>,
    },

    /// Run an issuer and a requester in this process and pair them
    Demo {
        #[command(flatten)]
        session: SessionArgs,

        /// Passcode to submit (defaults to PIN + current token)
        #[arg(long)]
        passcode: Option<String>,
    },
}

/// Issuer settings shared by the subcommands
#[derive(ClapArgs, Debug)]
struct SessionArgs {
    /// PIN the requester must type before the token
    #[arg(long, default_value = "")]
    pin: String,

    /// Passphrase the TOTP secret is derived from (random if omitted)
    #[arg(long)]
    passphrase: Option<String>,

    /// User name shown (obfuscated) in the authenticator app
    #[arg(long)]
    user: Option<String>,

    /// Issuer name shown in the authenticator app
    #[arg(long, default_value = entangle_core::config::DEFAULT_ISSUER)]
    issuer: String,

    /// Token period in seconds
    #[arg(long, default_value = "30")]
    period: u64,

    /// Token length
    #[arg(long, default_value = "6")]
    digits: u32,

    /// HMAC algorithm (SHA1, SHA256, SHA512)
    #[arg(long, default_value = "SHA1")]
    algorithm: Algorithm,

    /// Pairing window per peer in seconds
    #[arg(long, default_value = "300")]
    timeout: u64,

    /// Failed guesses allowed per peer
    #[arg(long, default_value = "10")]
    max_attempts: u32,

    /// How PIN and token combine (pin-then-token, token-then-pin, containment)
    #[arg(long, default_value = "pin-then-token")]
    match_rule: MatchRule,
}

impl SessionArgs {
    fn config(&self) -> Result<SessionConfig> {
        let mut config = SessionConfig::new()
            .with_issuer(self.issuer.clone())
            .with_pin(self.pin.clone())
            .with_period(self.period)
            .with_digits(self.digits)
            .with_algorithm(self.algorithm)
            .with_timeout(Duration::from_secs(self.timeout))
            .with_max_attempts(self.max_attempts)
            .with_match_rule(self.match_rule);
        if let Some(passphrase) = &self.passphrase {
            config = config.with_secret_passphrase(passphrase.clone());
        }
        if let Some(user) = &self.user {
            config = config.with_user(user.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    match args.command {
        Command::Provision { session, png } => provision(&session, png).await,
        Command::Token { session, follow } => token(&session, follow).await,
        Command::Alias {
            name,
            public_key,
            directory,
        } => alias(&name, &public_key, directory).await,
        Command::Demo { session, passcode } => demo(&session, passcode).await,
    }
}

async fn provision(session: &SessionArgs, png: Option<PathBuf>) -> Result<()> {
    let config = session.config()?;
    let credential = Ed25519Suite.generate_keypair()?;
    let address = address_for_key(credential.public_key());
    let info = ProvisioningInfo::build(address, &config);

    print_provisioning(&info)?;
    println!("  Public key: {}", credential.public_key());
    println!();

    if let Some(path) = png {
        let bytes = info.render_image()?;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("QR code written to {}", path.display());
    }
    Ok(())
}

async fn token(session: &SessionArgs, follow: bool) -> Result<()> {
    let config = session.config()?;
    if config.secret_passphrase.is_none() {
        warn!("No --passphrase given; tokens come from a random secret");
    }
    let secret = derive_secret(config.secret_passphrase.as_deref());

    println!(
        "{}",
        current_token(&secret, config.period, config.digits, config.algorithm)?
    );
    if !follow {
        return Ok(());
    }

    let provider = TokenProvider::new(&secret, config.period, config.digits, config.algorithm)?;
    let _ticker = TokenTicker::spawn(provider, |token| println!("{}", token));

    info!("Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    Ok(())
}

async fn alias(name: &str, public_key: &str, path: Option<PathBuf>) -> Result<()> {
    let directory = match path {
        Some(path) => DirectoryStore::with_path(path).await?,
        None => DirectoryStore::new().await?,
    };
    directory.publish_alias(name, public_key).await?;

    let identity = Identity::alias(name);
    println!("{} -> {}", identity, address_for_key(public_key));
    Ok(())
}

async fn demo(session: &SessionArgs, passcode: Option<String>) -> Result<()> {
    let config = session.config()?;
    let pin = config.pin.clone();

    let hub = Arc::new(MemoryRendezvous::new());
    let directory = Arc::new(DirectoryStore::in_memory());
    let collaborators = Collaborators::new(hub, directory.clone());

    let credential = Ed25519Suite.generate_keypair()?;
    directory
        .publish_alias("demo", credential.public_key())
        .await?;

    let issuer = PairingSession::start(
        Role::Issuer {
            credential: credential.clone(),
            config,
        },
        &collaborators,
    )
    .await?;
    if let Some(info) = issuer.provisioning_info() {
        print_provisioning(info)?;
    }
    issuer.events().on(EventKind::Rejected, |event| {
        if let SessionEvent::Rejected { rejection, .. } = event {
            warn!("Issuer refused a challenge: {}", rejection);
        }
    });

    let requester =
        PairingSession::start(Role::Requester(Identity::alias("demo")), &collaborators).await?;
    let mut events = requester.subscribe();

    let passcode = match passcode {
        Some(passcode) => passcode,
        None => format!("{}{}", pin, issuer.current_token()?),
    };
    debug!("Submitting passcode");
    requester.verify(&passcode).await?;

    loop {
        match events.recv().await? {
            SessionEvent::Authorized(received) => {
                println!();
                println!("  ✓ Paired! Received credential for {}", received.public_key());
                println!();
                if received != credential {
                    warn!("Received credential does not match the issuer's");
                }
                break;
            }
            SessionEvent::Error(error) => {
                println!();
                println!("  ✗ {}", error);
                println!();
                // A 401 leaves the requester usable, but the demo has no one to retype
                break;
            }
            SessionEvent::Closed => break,
            _ => {}
        }
    }

    requester.close().await;
    issuer.close().await;
    Ok(())
}

fn print_provisioning(info: &ProvisioningInfo) -> Result<()> {
    println!();
    println!("{}", info.render_terminal()?);
    println!();
    println!("  Scan the QR code with an authenticator app, or enter:");
    println!("    Secret: {}", info.secret);
    println!("    URI:    {}", info.uri);
    println!();
    println!("  Rendezvous: {}", info.address);
    if !info.pin.is_empty() {
        println!();
        println!("  ╔══════════════════════════════════════╗");
        println!("  ║         PAIRING PIN: {:<8}        ║", info.pin);
        println!("  ╚══════════════════════════════════════╝");
    }
    println!();
    Ok(())
}
