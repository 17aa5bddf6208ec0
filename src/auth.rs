use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;
use tracing::debug;

/// One shared password for every login. The login name becomes the actor
/// that capability checks run against.
#[derive(Debug)]
pub struct BerthAuthSource {
    password: String,
}

impl BerthAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for BerthAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        debug!("login as {}", login.user().unwrap_or("<none>"));
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
