use crate::api::client::ApiClient;
use crate::app::{Session, Settings};
use crate::error::{ClientError, Result};
use crate::utils::normalize_url;

pub struct LoginForm {
    pub server: String,
    pub email: String,
    pub username: Option<String>,
    pub token: Option<String>,
}

impl LoginForm {
    /// Merges the form over the existing settings, keeping the poll interval.
    pub fn to_settings(&self, current: &Settings) -> Result<Settings> {
        let server = self.server.trim();
        let email = self.email.trim();
        if server.is_empty() || email.is_empty() {
            return Err(ClientError::Config("server URL and email are required".into()));
        }
        Ok(Settings {
            base_url: normalize_url(server),
            email: email.to_string(),
            username: self.username.clone().filter(|u| !u.trim().is_empty()),
            token: self.token.clone().filter(|t| !t.trim().is_empty()),
            poll_interval_secs: current.poll_interval_secs,
        })
    }
}

/// Validates the form, checks the server, and saves the settings whatever
/// the check says. Returns a status line for the user.
pub async fn run(form: &LoginForm) -> Result<String> {
    let settings = form.to_settings(&Settings::load())?;
    let session = Session::from_settings(&settings)?;
    let client = ApiClient::new(&session)?;

    let status = match client.users().await {
        Ok(dir) => format!("Connected ({} users in directory)", dir.users().len()),
        Err(ClientError::Status { status, .. }) => format!("Saved (server answered HTTP {status})"),
        Err(e) => {
            log::warn!("server check failed: {e}");
            "Saved (server unreachable)".to_string()
        }
    };

    let path = settings.save()?;
    log::info!("settings written to {}", path.display());
    Ok(status)
}
