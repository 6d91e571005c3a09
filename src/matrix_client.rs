// ABOUTME: Matrix client initialization and authentication
// ABOUTME: Builds the client on a sqlite store and logs in via access token or password

use anyhow::{Context, Result};
use matrix_sdk::{ruma::OwnedUserId, Client};
use std::path::Path;

use crate::config::MatrixConfig;

pub async fn create_client(home_server: &str, store_path: &Path) -> Result<Client> {
    std::fs::create_dir_all(store_path)
        .with_context(|| format!("Failed to create store dir {}", store_path.display()))?;

    let client = Client::builder()
        .homeserver_url(home_server)
        .sqlite_store(store_path, None)
        .build()
        .await
        .context("Failed to create Matrix client")?;

    tracing::info!(home_server, store = %store_path.display(), "Matrix client created");

    Ok(client)
}

pub async fn login(client: &Client, config: &MatrixConfig) -> Result<()> {
    if let Some(token) = config.access_token.as_deref() {
        tracing::info!("Logging in with access token");
        let user_id: OwnedUserId = config
            .user_id
            .parse()
            .with_context(|| format!("Invalid Matrix user ID: {}", config.user_id))?;
        let session = matrix_sdk::AuthSession::Matrix(matrix_sdk::authentication::matrix::MatrixSession {
            meta: matrix_sdk::SessionMeta {
                user_id,
                device_id: config.device_name.clone().into(),
            },
            tokens: matrix_sdk::SessionTokens {
                access_token: token.to_string(),
                refresh_token: None,
            },
        });
        client
            .restore_session(session)
            .await
            .context("Failed to restore session")?;
    } else if let Some(pwd) = config.password.as_deref() {
        tracing::info!("Logging in with password");
        client
            .matrix_auth()
            .login_username(&config.user_id, pwd)
            .device_id(&config.device_name)
            .initial_device_display_name(&config.device_name)
            .send()
            .await
            .context("Failed to log in")?;
    } else {
        anyhow::bail!("Either MATRIX_PASSWORD or MATRIX_ACCESS_TOKEN is required");
    }

    let user_id = client
        .user_id()
        .context("Login finished without a user id")?;
    tracing::info!(user_id = %user_id, "Logged in successfully");

    Ok(())
}
