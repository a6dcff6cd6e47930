//! Logged-in HTTP sessions for servers that sit behind a form login (MINT, rad69, DICOMweb).

use reqwest::blocking::Client;
use tracing::{debug, info};

use super::{ClientResult, DicomClientError};

/// Credentials for a form login. The password is only held for the duration of the login call.
pub struct LoginDetails<'a> {
    pub login_url: &'a str,
    pub user: &'a str,
    pub password: &'a str,
    pub realm: &'a str,
}

/// HTTP client with a cookie store, authenticated against `login_url` when one is given.
pub fn create_session(details: &LoginDetails<'_>) -> ClientResult<Client> {
    let client = Client::builder().cookie_store(true).build()?;

    if details.login_url.is_empty() {
        debug!("No login url configured, using anonymous session");
        return Ok(client);
    }

    info!("Logging in to {} as {}", details.login_url, details.user);
    let response = client
        .post(details.login_url)
        .form(&[
            ("username", details.user),
            ("password", details.password),
            ("realm", details.realm),
        ])
        .send()?;

    let status = response.status();
    if !status.is_success() {
        return Err(DicomClientError::Login {
            url: details.login_url.to_string(),
            reason: format!("server answered {status}"),
        });
    }
    Ok(client)
}
