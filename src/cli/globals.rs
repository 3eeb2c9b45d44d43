use secrecy::SecretString;

/// Provider credentials and the token secret, resolved once at startup.
#[derive(Clone)]
pub struct GlobalArgs {
    pub provider_url: String,
    pub provider_public_key: SecretString,
    pub provider_service_key: Option<SecretString>,
    pub token_secret: Option<SecretString>,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(provider_url: String) -> Self {
        Self {
            provider_url,
            provider_public_key: SecretString::default(),
            provider_service_key: None,
            token_secret: None,
        }
    }

    pub fn set_public_key(&mut self, key: SecretString) {
        self.provider_public_key = key;
    }

    pub fn set_service_key(&mut self, key: Option<SecretString>) {
        self.provider_service_key = key;
    }

    pub fn set_token_secret(&mut self, secret: Option<SecretString>) {
        self.token_secret = secret;
    }
}

impl std::fmt::Debug for GlobalArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let masked = |present: bool| if present { "***" } else { "<unset>" };
        f.debug_struct("GlobalArgs")
            .field("provider_url", &self.provider_url)
            .field("provider_public_key", &"***")
            .field(
                "provider_service_key",
                &masked(self.provider_service_key.is_some()),
            )
            .field("token_secret", &masked(self.token_secret.is_some()))
            .finish()
    }
}
