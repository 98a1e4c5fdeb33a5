//! External user-agent collaborator
//!
//! User authentication happens outside this process, in a browser or a
//! platform web-authentication sheet.  The engine only needs one thing from
//! that environment: present a URL, then deliver exactly one callback URL or
//! a cancellation.  [`UserAgent`] models that boundary as a single awaitable
//! call.
//!
//! [`ConsoleUserAgent`] is the terminal implementation used by the CLI: it
//! prints the URL, tries to open the system browser, and reads the callback
//! URL the user pastes back.

use std::fmt;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use url::Url;

use crate::error::AuthorizationError;
use crate::oidc::authorizer::AuthorizationRequest;

/// What the user agent delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAgentOutcome {
    /// The redirect that ended the interaction.
    Callback(Url),
    /// The user abandoned the interaction.
    Cancelled,
}

/// Presents an authorization URL and waits for the resulting callback.
#[async_trait::async_trait]
pub trait UserAgent: Send + Sync + fmt::Debug {
    /// Presents `authorization_url` and resolves once the interaction ends.
    ///
    /// `request` lets implementations recognise the callback with
    /// [`AuthorizationRequest::is_callback`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthorizationError::UserAgent`] if the agent cannot present
    /// the URL or deliver a result.
    async fn present(
        &self,
        authorization_url: &Url,
        request: &AuthorizationRequest,
    ) -> Result<UserAgentOutcome, AuthorizationError>;
}

type Input = Box<dyn AsyncBufRead + Unpin + Send>;

/// Terminal user agent.
///
/// An empty line or end of input cancels.  Lines that do not parse as a URL,
/// or that are not addressed to the redirect URI, are rejected and the user
/// is prompted again.
pub struct ConsoleUserAgent {
    input: Mutex<Input>,
    open_browser: bool,
}

impl ConsoleUserAgent {
    /// Reads callbacks from standard input and tries to open the browser.
    pub fn stdin() -> Self {
        Self {
            input: Mutex::new(Box::new(BufReader::new(tokio::io::stdin()))),
            open_browser: true,
        }
    }

    /// Reads callbacks from `input` without launching a browser.
    pub fn with_input(input: impl AsyncBufRead + Unpin + Send + 'static) -> Self {
        Self {
            input: Mutex::new(Box::new(input)),
            open_browser: false,
        }
    }

    /// Attempts to open `url` in the default browser.
    ///
    /// Failures are ignored; the URL is always printed as well.
    fn try_open_browser(&self, url: &str) {
        if !self.open_browser {
            return;
        }
        #[cfg(target_os = "macos")]
        {
            let _ = std::process::Command::new("open").arg(url).spawn();
        }
        #[cfg(target_os = "linux")]
        {
            let _ = std::process::Command::new("xdg-open").arg(url).spawn();
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            let _ = url;
        }
    }
}

impl fmt::Debug for ConsoleUserAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleUserAgent")
            .field("open_browser", &self.open_browser)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl UserAgent for ConsoleUserAgent {
    async fn present(
        &self,
        authorization_url: &Url,
        request: &AuthorizationRequest,
    ) -> Result<UserAgentOutcome, AuthorizationError> {
        eprintln!("\nOpen the following URL in your browser to sign in:\n\n  {authorization_url}\n");
        self.try_open_browser(authorization_url.as_str());

        let mut input = self.input.lock().await;
        loop {
            eprintln!(
                "Paste the URL you were redirected to ({}...), or press Enter to cancel:",
                request.redirect_uri()
            );
            let mut line = String::new();
            let read = input
                .read_line(&mut line)
                .await
                .map_err(|e| AuthorizationError::UserAgent(format!("failed to read callback: {e}")))?;
            let line = line.trim();
            if read == 0 || line.is_empty() {
                return Ok(UserAgentOutcome::Cancelled);
            }
            match Url::parse(line) {
                Ok(url) if request.is_callback(&url) => return Ok(UserAgentOutcome::Callback(url)),
                Ok(url) => {
                    tracing::warn!(url = %url.origin().ascii_serialization(), "ignoring URL not addressed to the redirect URI");
                    eprintln!("That URL does not match {}.", request.redirect_uri());
                }
                Err(e) => eprintln!("Not a valid URL: {e}"),
            }
        }
    }
}
