/// Connection settings for an OpenAI-compatible DIAL gateway.
///
/// The gateway hosts many deployments under one endpoint; the deployment is
/// chosen per request so a single config serves both chat and embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct DialProviderConfig {
    pub host: String,
    pub api_version: Option<String>,
}

impl DialProviderConfig {
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self {
            host: host.into(),
            api_version: None,
        }
    }

    pub fn with_api_version<S: Into<String>>(mut self, api_version: S) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    pub fn completions_url(&self, deployment: &str) -> String {
        self.deployment_url(deployment, "chat/completions")
    }

    pub fn embeddings_url(&self, deployment: &str) -> String {
        self.deployment_url(deployment, "embeddings")
    }

    fn deployment_url(&self, deployment: &str, operation: &str) -> String {
        let mut url = format!(
            "{}/openai/deployments/{}/{}",
            self.host.trim_end_matches('/'),
            urlencoding::encode(deployment),
            operation
        );
        if let Some(version) = &self.api_version {
            url.push_str("?api-version=");
            url.push_str(&urlencoding::encode(version));
        }
        url
    }
}
