use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, RANGE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use reina_core::{
    AddonSpec, ConfigVars, FormationSpec, Platform, PlatformError, PlatformResult,
};

/// Production API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.heroku.com";

/// Selects version 3 of the Platform API.
pub const ACCEPT_HEADER: &str = "application/vnd.heroku+json; version=3";

const NEXT_RANGE: &str = "next-range";

/// Connection settings for the Platform API.
#[derive(Debug, Clone)]
pub struct HerokuConfig {
    /// API base URL, without a trailing slash
    pub api_url: String,
    /// Bearer token
    pub token: String,
}

impl HerokuConfig {
    pub fn new(token: &str) -> Self {
        HerokuConfig {
            api_url: DEFAULT_API_URL.to_string(),
            token: token.to_string(),
        }
    }

    /// Point the client at another endpoint, e.g. a mock server.
    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }
}

#[derive(Debug, Deserialize)]
struct AppInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PipelineInfo {
    id: String,
}

/// Platform API client.
pub struct HerokuPlatform {
    config: HerokuConfig,
    http: reqwest::Client,
}

impl HerokuPlatform {
    pub fn new(config: HerokuConfig) -> PlatformResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("reina/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(http_error)?;

        Ok(HerokuPlatform { config, http })
    }

    /// Client for the production endpoint.
    pub fn from_token(token: &str) -> PlatformResult<Self> {
        Self::new(HerokuConfig::new(token))
    }

    pub fn config(&self) -> &HerokuConfig {
        &self.config
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.config.api_url, path))
            .bearer_auth(&self.config.token)
            .header(ACCEPT, ACCEPT_HEADER)
    }

    /// Send a request and turn non-success statuses into errors.
    async fn send(&self, request: RequestBuilder) -> PlatformResult<Response> {
        let response = request.send().await.map_err(http_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), body = %body, "platform API call failed");
        Err(PlatformError::Api {
            status: status.as_u16(),
            body,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> PlatformResult<T> {
        let response = self.send(request).await?;
        decode(response).await
    }
}

fn http_error(err: reqwest::Error) -> PlatformError {
    PlatformError::Http(err.to_string())
}

async fn decode<T: DeserializeOwned>(response: Response) -> PlatformResult<T> {
    response
        .json()
        .await
        .map_err(|e| PlatformError::Decode(e.to_string()))
}

/// Request body for `POST /apps/{app}/addons`.
fn addon_body(addon: &AddonSpec) -> Value {
    match addon {
        AddonSpec::Plain(plan) => json!({ "plan": plan }),
        AddonSpec::Configured { plan, config } => json!({ "plan": plan, "config": config }),
    }
}

/// Request body for `PATCH /apps/{app}/formation/{type}`. Unset fields are
/// left as they are on the platform.
fn formation_body(formation: &FormationSpec) -> Value {
    let mut body = Map::new();
    if let Some(quantity) = formation.quantity {
        body.insert("quantity".to_string(), json!(quantity));
    }
    if let Some(size) = &formation.size {
        body.insert("size".to_string(), json!(size));
    }
    Value::Object(body)
}

#[async_trait]
impl Platform for HerokuPlatform {
    async fn list_apps(&self) -> PlatformResult<Vec<String>> {
        let mut names = Vec::new();
        let mut range: Option<HeaderValue> = None;

        // Large accounts are paged; 206 plus Next-Range means more to fetch.
        loop {
            let mut request = self.request(Method::GET, "/apps");
            if let Some(range) = range.take() {
                request = request.header(RANGE, range);
            }
            let response = self.send(request).await?;
            let partial = response.status() == StatusCode::PARTIAL_CONTENT;
            let next = response.headers().get(NEXT_RANGE).cloned();

            let page: Vec<AppInfo> = decode(response).await?;
            names.extend(page.into_iter().map(|app| app.name));

            match next {
                Some(next) if partial => range = Some(next),
                _ => break,
            }
        }

        debug!(count = names.len(), "listed apps");
        Ok(names)
    }

    async fn create_app(&self, name: &str, region: &str) -> PlatformResult<()> {
        let request = self
            .request(Method::POST, "/apps")
            .json(&json!({ "name": name, "region": region }));
        self.send(request).await?;
        Ok(())
    }

    async fn delete_app(&self, name: &str) -> PlatformResult<()> {
        self.send(self.request(Method::DELETE, &format!("/apps/{name}")))
            .await?;
        Ok(())
    }

    async fn create_addon(&self, app: &str, addon: &AddonSpec) -> PlatformResult<()> {
        let request = self
            .request(Method::POST, &format!("/apps/{app}/addons"))
            .json(&addon_body(addon));
        self.send(request).await?;
        Ok(())
    }

    async fn update_buildpacks(&self, app: &str, buildpacks: &[String]) -> PlatformResult<()> {
        let updates: Vec<Value> = buildpacks
            .iter()
            .map(|url| json!({ "buildpack": url }))
            .collect();
        let request = self
            .request(Method::PUT, &format!("/apps/{app}/buildpack-installations"))
            .json(&json!({ "updates": updates }));
        self.send(request).await?;
        Ok(())
    }

    async fn config_vars(&self, app: &str) -> PlatformResult<ConfigVars> {
        // Values may be null for keys that were unset.
        let raw: Map<String, Value> = self
            .send_json(self.request(Method::GET, &format!("/apps/{app}/config-vars")))
            .await?;

        Ok(raw
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::String(s) => Some((key, s)),
                Value::Null => None,
                other => Some((key, other.to_string())),
            })
            .collect())
    }

    async fn update_config_vars(&self, app: &str, vars: &ConfigVars) -> PlatformResult<()> {
        let request = self
            .request(Method::PATCH, &format!("/apps/{app}/config-vars"))
            .json(vars);
        self.send(request).await?;
        Ok(())
    }

    async fn update_formation(
        &self,
        app: &str,
        process_type: &str,
        formation: &FormationSpec,
    ) -> PlatformResult<()> {
        let request = self
            .request(
                Method::PATCH,
                &format!("/apps/{app}/formation/{process_type}"),
            )
            .json(&formation_body(formation));
        self.send(request).await?;
        Ok(())
    }

    async fn pipeline_id(&self, pipeline: &str) -> PlatformResult<String> {
        let info: PipelineInfo = self
            .send_json(self.request(Method::GET, &format!("/pipelines/{pipeline}")))
            .await?;
        Ok(info.id)
    }

    async fn couple_pipeline(
        &self,
        app: &str,
        pipeline_id: &str,
        stage: &str,
    ) -> PlatformResult<()> {
        let request = self.request(Method::POST, "/pipeline-couplings").json(&json!({
            "app": app,
            "pipeline": pipeline_id,
            "stage": stage,
        }));
        self.send(request).await?;
        Ok(())
    }

    async fn run_command(&self, app: &str, command: &str) -> PlatformResult<()> {
        let request = self
            .request(Method::POST, &format!("/apps/{app}/dynos"))
            .json(&json!({ "command": command, "attach": false }));
        self.send(request).await?;
        Ok(())
    }
}
