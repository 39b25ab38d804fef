use std::sync::Arc;
use std::time::Duration;

use snafu::{ResultExt, Snafu};

mod auth;
mod graphql;

pub use auth::{HostedAuth, SessionRefresher};
pub use graphql::{GraphQlClient, HostedAssistant, HostedDataService};

use crate::auth::SessionSlot;
use crate::services::ChatServices;
use crate::settings::HostedEndpoints;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HostedError {
    #[snafu(display("failed to build HTTP client on `{stage}`: {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("HTTP request failed on `{stage}`: {source}"))]
    HttpRequest {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("HTTP status {status} on `{stage}`: {body}"))]
    HttpStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to decode response on `{stage}`: {source}"))]
    DecodeResponse {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("GraphQL error on `{stage}`: {message}"))]
    GraphQl { stage: &'static str, message: String },
    #[snafu(display("response on `{stage}` is missing `{field}`"))]
    MissingData {
        stage: &'static str,
        field: &'static str,
    },
}

pub type HostedResult<T> = Result<T, HostedError>;

/// Service set backed by the hosted GraphQL API and auth service.
pub fn hosted_services(endpoints: &HostedEndpoints, session: SessionSlot) -> HostedResult<ChatServices> {
    let http = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context(BuildClientSnafu {
            stage: "build-hosted-http-client",
        })?;

    let auth = Arc::new(HostedAuth::new(
        http.clone(),
        endpoints.auth.clone(),
        session.clone(),
    ));
    let client = Arc::new(
        GraphQlClient::new(http, endpoints.graphql.clone(), session)
            .with_refresher(Arc::clone(&auth) as Arc<dyn SessionRefresher>),
    );
    tracing::info!(
        graphql = %endpoints.graphql,
        auth = %endpoints.auth,
        "using hosted backend"
    );

    Ok(ChatServices::new(
        Arc::new(HostedDataService::new(Arc::clone(&client))),
        Arc::new(HostedAssistant::new(client)),
        auth,
    ))
}
