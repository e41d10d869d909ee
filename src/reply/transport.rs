//! Reply delivery: local relay binary or SMTP.
//!
//! A configured sendmail binary always wins. Otherwise the reply goes to
//! the fixed SMTP relay, or to the first MX host of the owner's domain when
//! no relay is configured. Nothing is retried; the MTA owns requeueing.
//! lettre's transports are blocking, so each send runs on the blocking pool.

use std::path::PathBuf;
use std::sync::Arc;

use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use lettre::{Message, SendmailTransport, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::config::{Config, SmtpConfig};
use crate::error::DeliveryError;
use crate::reply::dns::{MxLookup, primary_exchange};

/// Where a reply is handed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Sendmail(PathBuf),
    Smtp { host: String, port: u16 },
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sendmail(path) => write!(f, "sendmail {}", path.display()),
            Self::Smtp { host, port } => write!(f, "smtp {host}:{port}"),
        }
    }
}

/// Delivers composed replies.
pub struct Mailer {
    smtp: SmtpConfig,
    sendmail_bin: Option<PathBuf>,
    mx: Arc<dyn MxLookup>,
}

impl Mailer {
    pub fn new(config: &Config, mx: Arc<dyn MxLookup>) -> Self {
        Self {
            smtp: config.smtp.clone(),
            sendmail_bin: config.sendmail_bin.clone(),
            mx,
        }
    }

    /// Pick the delivery route for a reply sent on behalf of `owner`.
    pub async fn route_for(&self, owner: &str) -> Result<Route, DeliveryError> {
        if let Some(path) = &self.sendmail_bin {
            return Ok(Route::Sendmail(path.clone()));
        }

        let host = match &self.smtp.server {
            Some(server) => server.clone(),
            None => {
                let domain = owner
                    .rsplit_once('@')
                    .map(|(_, d)| d)
                    .filter(|d| !d.is_empty())
                    .ok_or_else(|| DeliveryError::InvalidAddress {
                        address: owner.to_string(),
                        reason: "no domain part".into(),
                    })?;
                primary_exchange(self.mx.as_ref(), domain).await?
            }
        };

        Ok(Route::Smtp {
            host,
            port: self.smtp.port,
        })
    }

    /// Deliver `message` and report the route used.
    pub async fn deliver(&self, owner: &str, message: Message) -> Result<Route, DeliveryError> {
        let route = self.route_for(owner).await?;
        debug!(route = %route, "Delivering reply");

        let task_route = route.clone();
        let smtp = self.smtp.clone();
        tokio::task::spawn_blocking(move || match task_route {
            Route::Sendmail(path) => send_sendmail(&path, &message),
            Route::Smtp { host, .. } => send_smtp(&smtp, &host, &message),
        })
        .await
        .map_err(|e| DeliveryError::Task(e.to_string()))??;

        info!(route = %route, "Vacation reply sent");
        Ok(route)
    }
}

fn send_sendmail(path: &std::path::Path, message: &Message) -> Result<(), DeliveryError> {
    SendmailTransport::new_with_command(path)
        .send(message)
        .map_err(|e| DeliveryError::Sendmail {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

/// Build the blocking SMTP transport for `host`.
fn smtp_transport(smtp: &SmtpConfig, host: &str) -> Result<SmtpTransport, DeliveryError> {
    let tls_parameters = TlsParameters::new(host.to_string()).map_err(|e| DeliveryError::Smtp {
        host: host.to_string(),
        port: smtp.port,
        reason: format!("TLS setup: {e}"),
    })?;
    let tls = if smtp.ssl {
        Tls::Wrapper(tls_parameters)
    } else {
        Tls::Opportunistic(tls_parameters)
    };

    let mut builder = SmtpTransport::builder_dangerous(host)
        .port(smtp.port)
        .timeout(Some(smtp.timeout))
        .hello_name(ClientId::Domain(smtp.helo.clone()))
        .tls(tls);

    if let (Some(id), Some(password)) = (&smtp.auth_id, &smtp.auth_password) {
        builder = builder.credentials(Credentials::new(
            id.clone(),
            password.expose_secret().to_string(),
        ));
    }

    Ok(builder.build())
}

fn send_smtp(smtp: &SmtpConfig, host: &str, message: &Message) -> Result<(), DeliveryError> {
    let transport = smtp_transport(smtp, host)?;
    transport.send(message).map(|_| ()).map_err(|e| {
        if e.is_timeout() {
            DeliveryError::Timeout {
                host: host.to_string(),
                timeout: smtp.timeout,
            }
        } else {
            DeliveryError::Smtp {
                host: host.to_string(),
                port: smtp.port,
                reason: e.to_string(),
            }
        }
    })
}
