use std::net::SocketAddr;
use std::sync::Arc;

use echo_orchestrator::agent::planner::StaticPlanner;
use echo_orchestrator::agent::{Agent, Collaborators};
use echo_orchestrator::connectors::http::{MsgProxyClient, TimelineClient};
use echo_orchestrator::connectors::CalendarService;
use echo_orchestrator::google_api::calendar::GoogleCalendarClient;
use echo_orchestrator::google_api::gmail::GmailTransport;
use echo_orchestrator::google_api::TokenSource;
use echo_orchestrator::server::{self, ServerState};
use echo_orchestrator::state::{google_token_path, load_config};
use echo_orchestrator::types::Config;

fn collaborators(config: &Config) -> anyhow::Result<Collaborators> {
    let timeout = config.collaborator_timeout();
    let http = reqwest::Client::builder().timeout(timeout).build()?;
    let tokens = Arc::new(TokenSource::new(google_token_path(config), http.clone()));

    let calendar: Option<Arc<dyn CalendarService>> = if !config.calendar_enabled {
        log::info!("Calendar disabled in config");
        None
    } else if !tokens.is_available() {
        log::warn!(
            "No Google token at {}; calendar disabled",
            tokens.path().display()
        );
        None
    } else {
        Some(Arc::new(GoogleCalendarClient::new(tokens.clone(), http.clone())))
    };

    Ok(Collaborators {
        calendar,
        email: Arc::new(GmailTransport::new(tokens, http, config.email_from.clone())),
        timeline: Arc::new(TimelineClient::new(&config.timeline_base_url, timeout)),
        messages: Arc::new(MsgProxyClient::new(&config.msg_proxy_base_url, timeout)),
        planner: Arc::new(StaticPlanner::default()),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = load_config().map_err(|e| anyhow::anyhow!("Failed to load config: {e}"))?;
    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address '{}': {e}", config.bind_addr))?;
    log::info!(
        "Timezone {}, timeline {}, message proxy {}",
        config.timezone,
        config.timeline_base_url,
        config.msg_proxy_base_url
    );

    let agent = Agent::new(&config, collaborators(&config)?);
    let reader = TimelineClient::new(&config.timeline_base_url, config.collaborator_timeout());
    let state = ServerState::new(agent).with_timeline_reader(reader);
    server::serve(addr, Arc::new(state))
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {e}"))?;
    Ok(())
}
