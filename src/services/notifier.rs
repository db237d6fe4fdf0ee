//! Out-of-band delivery of sign-in links.

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::info;

/// Failures reported synchronously by a [`Notifier`].
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Required environment variable is missing.
    #[error("missing mailer environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[cfg(feature = "http-mailer")]
    #[error("failed to build mailer client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    #[cfg(feature = "http-mailer")]
    #[error("failed to reach mailer at `{url}`")]
    Send {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[cfg(feature = "http-mailer")]
    #[error("mailer rejected the message with status {status}")]
    Status { status: reqwest::StatusCode },
}

/// A one-time sign-in link addressed to an email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInLink {
    pub email: String,
    pub token: String,
    pub url: String,
}

/// Delivers sign-in links to players.
pub trait Notifier: Send + Sync {
    fn send_sign_in_link(&self, link: SignInLink) -> BoxFuture<'static, Result<(), NotifyError>>;
}

/// Notifier that writes links to the log; used when no mailer is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send_sign_in_link(&self, link: SignInLink) -> BoxFuture<'static, Result<(), NotifyError>> {
        Box::pin(async move {
            info!(email = %link.email, url = %link.url, "sign-in link issued");
            Ok(())
        })
    }
}

#[cfg(feature = "http-mailer")]
pub use self::http::{HttpMailer, MailerConfig};

#[cfg(feature = "http-mailer")]
mod http {
    use std::{env, sync::Arc};

    use futures::future::BoxFuture;
    use reqwest::Client;
    use serde::Serialize;

    use super::{Notifier, NotifyError, SignInLink};

    /// Settings of the transactional email API.
    #[derive(Debug, Clone)]
    pub struct MailerConfig {
        pub url: String,
        pub api_key: Option<String>,
        pub from: String,
    }

    impl MailerConfig {
        /// Read `MAILER_URL`, `MAILER_API_KEY` and `MAILER_FROM`.
        pub fn from_env() -> Result<Self, NotifyError> {
            let url = env::var("MAILER_URL")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .ok_or(NotifyError::MissingEnvVar { var: "MAILER_URL" })?;
            let api_key = env::var("MAILER_API_KEY")
                .ok()
                .filter(|value| !value.is_empty());
            let from = env::var("MAILER_FROM")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| "no-reply@neon-expedition.local".into());
            Ok(Self { url, api_key, from })
        }
    }

    #[derive(Serialize)]
    struct MailerMessage<'a> {
        from: &'a str,
        to: &'a str,
        subject: &'a str,
        text: String,
    }

    /// Posts sign-in links to an HTTP email API.
    #[derive(Clone)]
    pub struct HttpMailer {
        client: Client,
        config: Arc<MailerConfig>,
    }

    impl HttpMailer {
        pub fn new(config: MailerConfig) -> Result<Self, NotifyError> {
            let client = Client::builder()
                .build()
                .map_err(|source| NotifyError::ClientBuilder { source })?;
            Ok(Self {
                client,
                config: Arc::new(config),
            })
        }
    }

    impl Notifier for HttpMailer {
        fn send_sign_in_link(
            &self,
            link: SignInLink,
        ) -> BoxFuture<'static, Result<(), NotifyError>> {
            let this = self.clone();
            Box::pin(async move {
                let message = MailerMessage {
                    from: &this.config.from,
                    to: &link.email,
                    subject: "Your Neon Expedition sign-in link",
                    text: format!(
                        "Open this link to sign in (it can be used once): {}",
                        link.url
                    ),
                };

                let mut request = this.client.post(&this.config.url).json(&message);
                if let Some(key) = this.config.api_key.as_deref() {
                    request = request.bearer_auth(key);
                }

                let response = request.send().await.map_err(|source| NotifyError::Send {
                    url: this.config.url.clone(),
                    source,
                })?;

                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(NotifyError::Status {
                        status: response.status(),
                    })
                }
            })
        }
    }
}

#[cfg(test)]
pub use self::recording::RecordingNotifier;

#[cfg(test)]
mod recording {
    use std::sync::Mutex;

    use futures::future::BoxFuture;

    use super::{Notifier, NotifyError, SignInLink};

    /// Captures links in memory so tests can follow them.
    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<SignInLink>>,
    }

    impl RecordingNotifier {
        pub fn last(&self) -> Option<SignInLink> {
            self.sent.lock().unwrap().last().cloned()
        }
    }

    impl Notifier for RecordingNotifier {
        fn send_sign_in_link(
            &self,
            link: SignInLink,
        ) -> BoxFuture<'static, Result<(), NotifyError>> {
            self.sent.lock().unwrap().push(link);
            Box::pin(async { Ok(()) })
        }
    }
}
