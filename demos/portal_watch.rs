//! Signs in to a KYC portal, mounts the role's dashboard and re-reads the
//! dashboard data whenever a pushed event made it stale.
//!
//! ```text
//! KYC_EMAIL=admin@example.com KYC_PASSWORD=... cargo run --example portal_watch
//! ```
//!
//! Set `KYC_OTP` as well when the account requires a one-time password.

use kyc_realtime_kit::api::LoginOutcome;
use kyc_realtime_kit::prelude::*;
use std::time::Duration;
use tracing::{error, info, warn};

async fn refresh(portal: &Portal<RestClient>, role: Role) -> Result<(), PortalError> {
    match role {
        Role::Admin => {
            let submissions = portal.admin_submissions().await?;
            info!(count = submissions.len(), "Admin submissions loaded.");
        }
        Role::Client => {
            let status = portal.client_status().await?;
            info!(status = ?status.status, documents = status.documents.len(), "KYC status loaded.");
        }
        Role::Triparty => {
            let overview = portal.triparty_overview().await?;
            info!(count = overview.submissions.len(), "Triparty overview loaded.");
        }
    }
    Ok(())
}

async fn sign_in(portal: &Portal<RestClient>) -> Result<Role, Box<dyn std::error::Error>> {
    if let Some(role) = portal.restore()? {
        return Ok(role);
    }

    let email = std::env::var("KYC_EMAIL")?;
    let password = std::env::var("KYC_PASSWORD")?;
    match portal.login(&email, &password).await? {
        LoginOutcome::Authenticated(credential) => Ok(credential.role),
        LoginOutcome::OtpRequired { email } => {
            let otp = std::env::var("KYC_OTP")?;
            Ok(portal.verify_otp(&email, &otp).await?.role)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("portal_watch=info".parse()?)
                .add_directive("kyc_realtime_kit=info".parse()?),
        )
        .init();

    let config = PortalConfig::from_env()?;
    let portal = Portal::from_config(&config);

    let role = sign_in(&portal).await?;
    info!(%role, route = role.dashboard_route(), "Signed in.");

    let dashboard = portal.mount_dashboard()?;
    let scope = role.scope();
    refresh(&portal, role).await?;

    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {}
        }

        if let Some(connection) = portal.connections().current() {
            if connection.state() == ConnectionState::Exhausted {
                warn!("Realtime connection gave up, reconnecting.");
                portal.reconnect()?;
            }
        }

        let stale = match role {
            Role::Admin => matches!(
                portal.cache().peek::<Vec<kyc_realtime_kit::api::Submission>>(&scope),
                QueryState::Stale(_) | QueryState::Failed(_)
            ),
            Role::Client => matches!(
                portal.cache().peek::<kyc_realtime_kit::api::KycStatus>(&scope),
                QueryState::Stale(_) | QueryState::Failed(_)
            ),
            Role::Triparty => matches!(
                portal.cache().peek::<kyc_realtime_kit::api::TripartyOverview>(&scope),
                QueryState::Stale(_) | QueryState::Failed(_)
            ),
        };
        if stale {
            if let Err(e) = refresh(&portal, role).await {
                error!(error = %e, message = ?e.server_message(), "Refresh failed.");
            }
        }
    }

    dashboard.unmount();
    info!(stats = ?portal.cache().stats(), "Shutting down.");
    // Keep the stored credential so the next run can restore the session.
    portal.connections().disconnect();
    Ok(())
}
