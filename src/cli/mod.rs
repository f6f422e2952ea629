//! CLI commands for the agency using clap.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::agency::Agency;
use crate::agent::{Agent, AgentInfo, AgentSpec, AgentTask};
use crate::audit::TracingAudit;
use crate::behavior::{handler, Behavior};
use crate::client::{AgencyClient, RegistryClient, RetryPolicy};
use crate::config::{load_settings, Settings};
use crate::core::{AgencyContext, AgencyRouter};
use crate::logging;
use crate::protocol::{AclMessage, AgentId, Performative, ProtocolId};
use crate::web::{run_server, WebServerConfig};

/// fipa-agency - hosts agents of a multi-agent system and routes their messages.
#[derive(Parser)]
#[command(name = "fipa-agency")]
#[command(version)]
#[command(about = "Agency runtime for FIPA-style multi-agent systems", long_about = None)]
pub struct Commands {
    /// Settings file (defaults to settings.json in the config directory)
    #[arg(long, short, global = true, env = "AGENCY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the agency server
    Serve {
        /// Listen port, overrides the settings
        #[arg(long)]
        port: Option<u16>,
    },

    /// Print the effective settings
    Config,

    /// Post a single message to an agency
    Send {
        /// Agency host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Agency port
        #[arg(long, default_value_t = 10000)]
        port: u16,

        /// Sending agent
        #[arg(long, default_value_t = 0)]
        sender: AgentId,

        /// Receiving agent
        #[arg(long)]
        receiver: AgentId,

        /// Protocol id
        #[arg(long, default_value_t = 0)]
        protocol: ProtocolId,

        /// Performative code
        #[arg(long, default_value_t = 8)]
        performative: i32,

        /// Message content
        content: String,
    },

    /// Show agency info and its agents
    Info {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value_t = 10000)]
        port: u16,
    },

    /// Manage agents of a running agency
    #[command(subcommand, alias = "a")]
    Agent(AgentCommand),
}

#[derive(Subcommand)]
pub enum AgentCommand {
    /// Create and start an agent
    Create {
        id: AgentId,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long = "type", default_value = "")]
        agent_type: String,
        #[arg(long, default_value_t = 0)]
        mas: u32,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 10000)]
        port: u16,
    },

    /// Terminate an agent
    Remove {
        id: AgentId,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 10000)]
        port: u16,
    },

    /// Show the run status of an agent
    Status {
        id: AgentId,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 10000)]
        port: u16,
    },

    /// Replace the custom configuration of an agent
    Custom {
        id: AgentId,
        custom: String,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 10000)]
        port: u16,
    },
}

impl Commands {
    /// Run the command.
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Command::Serve { port } => cmd_serve(self.config.as_deref(), *port).await,
            Command::Config => cmd_config(self.config.as_deref()),
            Command::Send {
                host,
                port,
                sender,
                receiver,
                protocol,
                performative,
                content,
            } => {
                let msg = AclMessage::new(*sender, *receiver, *protocol, *performative, content.as_str());
                cmd_send(host, *port, msg).await
            }
            Command::Info { host, port } => cmd_info(host, *port).await,
            Command::Agent(cmd) => cmd_agent(cmd).await,
        }
    }
}

fn operator_client(port: u16) -> Result<AgencyClient> {
    Ok(AgencyClient::new(
        port,
        Duration::from_secs(10),
        RetryPolicy::none(),
        1,
    )?)
}

// Command implementations

async fn cmd_serve(config: Option<&Path>, port: Option<u16>) -> Result<()> {
    let mut settings = load_settings(config)?;
    if let Some(port) = port {
        settings.agency.port = port;
    }
    let _guard = logging::init(&settings.logging)?;

    let agency = build_agency(&settings, echo_task())?;
    run_server(
        WebServerConfig {
            host: settings.agency.host.clone(),
            port: settings.agency.port,
        },
        agency,
    )
    .await?;
    Ok(())
}

/// Wire an agency to the real registry and peer transport.
pub fn build_agency(settings: &Settings, task: AgentTask) -> Result<Arc<Agency>> {
    let transport = &settings.transport;
    let registry = RegistryClient::new(
        &settings.registry.host,
        settings.registry.port,
        transport.timeout(),
        transport.retry,
    )?;
    let peers = AgencyClient::new(
        transport.peer_port,
        transport.timeout(),
        transport.retry,
        transport.dns_retries,
    )?;

    let context = AgencyContext::new(settings.agency.name.clone(), settings.agency.mas_id);
    let router = AgencyRouter::new(
        context,
        settings.router_settings(),
        Arc::new(registry),
        Arc::new(peers),
        Arc::new(TracingAudit),
    );
    Ok(Arc::new(Agency::new(
        settings.agency.id,
        router,
        task,
        settings.behavior_queues(),
    )))
}

/// Demo agent logic: answer every message with an Inform echoing its content.
pub fn echo_task() -> AgentTask {
    handler(|agent: Arc<Agent>| async move {
        let id = agent.id();
        let custom = agent.custom_update_behavior(handler(move |custom: String| async move {
            tracing::info!("Agent {} got new custom configuration: {}", id, custom);
            anyhow::Ok(())
        }));
        custom.start()?;

        while let Ok(msg) = agent.receive_blocking().await {
            tracing::debug!("Agent {} received: {}", id, msg);
            let reply = msg.reply(Performative::Inform, msg.content.clone());
            if let Err(e) = agent.send(reply).await {
                tracing::warn!("Agent {} could not answer {}: {}", id, msg.sender, e);
            }
        }
        anyhow::Ok(())
    })
}

fn cmd_config(config: Option<&Path>) -> Result<()> {
    let settings = load_settings(config)?;
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

async fn cmd_send(host: &str, port: u16, msg: AclMessage) -> Result<()> {
    let client = operator_client(port)?;
    let receiver = msg.receiver;
    client.send_msgs(host, &[msg]).await?;
    println!("Sent message to agent {} via {}:{}", receiver, host, port);
    Ok(())
}

async fn cmd_info(host: &str, port: u16) -> Result<()> {
    let info = operator_client(port)?.get_info(host).await?;
    println!(
        "Agency {} (MAS {}, id {}): {:?}",
        info.spec.name, info.spec.mas_id, info.spec.id, info.status.code
    );
    for agent in info.spec.agents {
        let name = if agent.spec.name.is_empty() { "-" } else { agent.spec.name.as_str() };
        println!("  {:>6}  {:<20} {:?}", agent.id, name, agent.status.code);
    }
    Ok(())
}

async fn cmd_agent(cmd: &AgentCommand) -> Result<()> {
    match cmd {
        AgentCommand::Create {
            id,
            name,
            agent_type,
            mas,
            host,
            port,
        } => {
            let info = AgentInfo {
                id: *id,
                mas_id: *mas,
                spec: AgentSpec {
                    name: name.clone(),
                    agent_type: agent_type.clone(),
                    ..AgentSpec::default()
                },
                ..AgentInfo::default()
            };
            operator_client(*port)?.post_agent(host, &info).await?;
            println!("Created agent {}", id);
        }
        AgentCommand::Remove { id, host, port } => {
            operator_client(*port)?.delete_agent(host, *id).await?;
            println!("Removed agent {}", id);
        }
        AgentCommand::Status { id, host, port } => {
            let status = operator_client(*port)?.agent_status(host, *id).await?;
            println!(
                "Agent {}: {:?} since {}",
                id,
                status.code,
                status.last_update.format("%Y-%m-%d %H:%M:%S")
            );
        }
        AgentCommand::Custom {
            id,
            custom,
            host,
            port,
        } => {
            operator_client(*port)?.put_custom(host, *id, custom).await?;
            println!("Updated custom configuration of agent {}", id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NoAudit;
    use crate::client::testing::serve;
    use crate::core::testing::{MockRegistry, MockTransport};
    use crate::core::RouterSettings;
    use crate::protocol::{Protocol, StatusCode};
    use crate::web::create_app_router;

    #[test]
    fn test_parse_send() {
        let args = Commands::try_parse_from([
            "fipa-agency",
            "send",
            "--receiver",
            "7",
            "--protocol",
            "3",
            "hello",
        ])
        .unwrap();
        match args.command {
            Command::Send {
                receiver,
                protocol,
                performative,
                content,
                ..
            } => {
                assert_eq!(receiver, 7);
                assert_eq!(protocol, 3);
                assert_eq!(performative, Performative::Inform.code());
                assert_eq!(content, "hello");
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn test_parse_agent_alias() {
        let args = Commands::try_parse_from(["fipa-agency", "a", "status", "4", "--port", "9999"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Agent(AgentCommand::Status { id: 4, port: 9999, .. })
        ));
    }

    fn echo_agency() -> (Arc<Agency>, Arc<MockTransport>) {
        let registry = Arc::new(MockRegistry::new());
        registry.place(60, "B");
        let transport = Arc::new(MockTransport::new());
        let router = AgencyRouter::new(
            AgencyContext::new("A", 0),
            RouterSettings::default(),
            registry,
            transport.clone(),
            Arc::new(NoAudit),
        );
        let agency = Agency::new(1, router, echo_task(), Default::default());
        (Arc::new(agency), transport)
    }

    #[tokio::test]
    async fn test_echo_task_answers() {
        let (agency, transport) = echo_agency();
        agency
            .create_agent(AgentInfo {
                id: 1,
                ..AgentInfo::default()
            })
            .unwrap();

        let msg = AclMessage::new(60, 1, Protocol::Query, Performative::QueryRef, "ping");
        agency.accept_msgs(vec![msg]).await.unwrap();
        transport.wait_for_messages(1, Duration::from_secs(1)).await;
        let reply = &transport.batches()[0][0];
        assert_eq!(reply.content, "ping");
        assert_eq!(reply.performative, Performative::Inform.code());
    }

    #[tokio::test]
    async fn test_operator_commands_against_agency() {
        let (agency, _) = echo_agency();
        let port = serve(create_app_router(agency.clone())).await.port();
        let host = "127.0.0.1".to_string();

        cmd_agent(&AgentCommand::Create {
            id: 5,
            name: "meter".to_string(),
            agent_type: String::new(),
            mas: 0,
            host: host.clone(),
            port,
        })
        .await
        .unwrap();
        assert_eq!(agency.agent_status(5).unwrap().code, StatusCode::Running);
        cmd_agent(&AgentCommand::Status {
            id: 5,
            host: host.clone(),
            port,
        })
        .await
        .unwrap();

        cmd_agent(&AgentCommand::Custom {
            id: 5,
            custom: "v2".to_string(),
            host: host.clone(),
            port,
        })
        .await
        .unwrap();
        assert_eq!(agency.agent(5).unwrap().custom(), "v2");

        cmd_info(&host, port).await.unwrap();
        cmd_agent(&AgentCommand::Remove {
            id: 5,
            host: host.clone(),
            port,
        })
        .await
        .unwrap();
        assert!(agency.agent(5).is_none());
        assert!(cmd_agent(&AgentCommand::Status { id: 5, host, port }).await.is_err());
    }

    #[tokio::test]
    async fn test_send_posts_batch() {
        let (agency, _) = echo_agency();
        let port = serve(create_app_router(agency.clone())).await.port();
        let msg = AclMessage::new(60, 1, Protocol::None, Performative::Inform, "x");
        cmd_send("127.0.0.1", port, msg).await.unwrap();
    }
}
