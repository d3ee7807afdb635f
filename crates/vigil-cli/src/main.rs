use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

// `#[zbus::proxy]` generates `AccessProxy` from this trait.
#[zbus::proxy(
    interface = "org.vigil.Access1",
    default_service = "org.vigil.Access1",
    default_path = "/org/vigil/Access1"
)]
trait Access {
    async fn enroll(
        &self,
        image_path: &str,
        name: &str,
        category: &str,
        authorized: bool,
        external_reference: &str,
    ) -> zbus::Result<String>;
    async fn identify(&self, image_path: &str, location: &str, threshold: f64)
        -> zbus::Result<String>;
    async fn list_identities(&self, authorized_only: bool) -> zbus::Result<String>;
    async fn remove_identity(&self, identity_id: &str) -> zbus::Result<bool>;
    async fn set_authorized(&self, identity_id: &str, authorized: bool) -> zbus::Result<bool>;
    async fn recent_access(&self, limit: u32) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "vigil", about = "Vigil face-recognition access control CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    /// (also enabled by VIGIL_SESSION_BUS=1)
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the face in an image as a new identity
    Enroll {
        /// Photo containing the face to enroll
        image: PathBuf,
        /// Display name for the identity
        #[arg(short, long)]
        name: String,
        /// resident, visitor, employee, delivery or unknown
        #[arg(short, long, default_value = "resident")]
        category: String,
        /// Grant access immediately
        #[arg(short, long)]
        authorized: bool,
        /// Link to a record kept elsewhere (e.g. a resident account)
        #[arg(short, long)]
        reference: Option<String>,
    },
    /// Identify the face in an image against authorized identities
    Identify {
        image: PathBuf,
        /// Where the attempt happened (default: the daemon's configured location)
        #[arg(short, long, default_value = "")]
        location: String,
        /// Normalized-distance threshold (default: the daemon's configured value)
        #[arg(short, long)]
        threshold: Option<f64>,
    },
    /// List enrolled identities
    List {
        /// Only identities that are currently authorized
        #[arg(short, long)]
        authorized: bool,
    },
    /// Remove an identity
    Remove {
        /// Identity ID to remove
        id: String,
    },
    /// Grant access to an identity
    Authorize { id: String },
    /// Revoke access from an identity
    Revoke { id: String },
    /// Show recent access attempts
    Log {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: u32,
    },
    /// Show daemon status
    Status,
}

fn session_bus_requested(flag: bool, env: Option<String>) -> bool {
    flag || env.is_some_and(|v| !v.is_empty() && v != "0")
}

/// Absolute path for the daemon, which does not share our working directory.
fn absolute(path: &Path) -> Result<String> {
    let canonical = path
        .canonicalize()
        .with_context(|| format!("cannot access {}", path.display()))?;
    Ok(canonical.to_string_lossy().into_owned())
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("daemon returned malformed JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_changed(changed: bool, id: &str, action: &str) {
    if changed {
        println!("{action} {id}");
    } else {
        println!("No identity with id {id}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let session = session_bus_requested(cli.session, std::env::var("VIGIL_SESSION_BUS").ok());
    let connection = if session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to D-Bus")?;
    let proxy = AccessProxy::new(&connection)
        .await
        .context("vigild is not reachable")?;
    tracing::debug!(session, "connected to vigild");

    match cli.command {
        Commands::Enroll {
            image,
            name,
            category,
            authorized,
            reference,
        } => {
            let path = absolute(&image)?;
            let reply = proxy
                .enroll(
                    &path,
                    &name,
                    &category,
                    authorized,
                    reference.as_deref().unwrap_or(""),
                )
                .await?;
            print_json(&reply)?;
        }
        Commands::Identify {
            image,
            location,
            threshold,
        } => {
            let path = absolute(&image)?;
            let reply = proxy
                .identify(&path, &location, threshold.unwrap_or(-1.0))
                .await?;
            print_json(&reply)?;
        }
        Commands::List { authorized } => {
            print_json(&proxy.list_identities(authorized).await?)?;
        }
        Commands::Remove { id } => {
            let removed = proxy.remove_identity(&id).await?;
            print_changed(removed, &id, "Removed");
        }
        Commands::Authorize { id } => {
            let changed = proxy.set_authorized(&id, true).await?;
            print_changed(changed, &id, "Authorized");
        }
        Commands::Revoke { id } => {
            let changed = proxy.set_authorized(&id, false).await?;
            print_changed(changed, &id, "Revoked");
        }
        Commands::Log { limit } => {
            print_json(&proxy.recent_access(limit).await?)?;
        }
        Commands::Status => {
            print_json(&proxy.status().await?)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_enroll_arguments() {
        let cli = Cli::try_parse_from([
            "vigil", "enroll", "ana.jpg", "--name", "Ana", "--category", "employee", "--authorized",
        ])
        .unwrap();
        match cli.command {
            Commands::Enroll {
                image,
                name,
                category,
                authorized,
                reference,
            } => {
                assert_eq!(image, PathBuf::from("ana.jpg"));
                assert_eq!(name, "Ana");
                assert_eq!(category, "employee");
                assert!(authorized);
                assert!(reference.is_none());
            }
            _ => panic!("expected enroll"),
        }
    }

    #[test]
    fn test_identify_defaults() {
        let cli = Cli::try_parse_from(["vigil", "identify", "door.png"]).unwrap();
        match cli.command {
            Commands::Identify {
                location,
                threshold,
                ..
            } => {
                assert_eq!(location, "");
                assert!(threshold.is_none());
            }
            _ => panic!("expected identify"),
        }
    }

    #[test]
    fn test_enroll_requires_name() {
        assert!(Cli::try_parse_from(["vigil", "enroll", "ana.jpg"]).is_err());
    }

    #[test]
    fn test_session_bus_selection() {
        assert!(session_bus_requested(true, None));
        assert!(session_bus_requested(false, Some("1".into())));
        assert!(!session_bus_requested(false, Some("0".into())));
        assert!(!session_bus_requested(false, None));
    }

    #[test]
    fn test_session_flag_is_global() {
        let cli = Cli::try_parse_from(["vigil", "status", "--session"]).unwrap();
        assert!(cli.session);
    }

    #[test]
    fn test_absolute_rejects_missing_file() {
        assert!(absolute(Path::new("/definitely/not/here.png")).is_err());
    }
}
