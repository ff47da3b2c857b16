//! Gateway endpoint construction

use url::Url;

use super::ConnectionConfig;
use crate::error::{Error, Result};

/// Boot arguments the desktop client sends on connect
const START_ARGS: &str = "?agent=client&org_wide_aware=true&agent_version=1742552854\
&eac_cache_ts=true&cache_ts=0&name_tagging=true&only_self_subteams=true\
&connect_only=true&ms_latest=true";

/// Build the default endpoint from the base URL and the client token
pub fn default_endpoint(config: &ConnectionConfig, token: &str) -> Result<Url> {
    let mut url = Url::parse(&config.endpoint_base)
        .map_err(|e| Error::config_field_invalid("connection.endpoint_base", e.to_string()))?;

    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("token", token)
            .append_pair("sync_desync", "1")
            .append_pair("slack_client", "desktop")
            .append_pair("start_args", START_ARGS)
            .append_pair("no_query_on_subscribe", "1")
            .append_pair("flannel", "3")
            .append_pair("lazy_channels", "1");
        if let Some(server) = config.gateway_server.as_deref().filter(|s| !s.is_empty()) {
            query.append_pair("gateway_server", server);
        }
        query.append_pair("batch_presence_aware", "1");
    }

    Ok(url)
}

/// Endpoint without its query string, safe to log
pub fn display_endpoint(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}
