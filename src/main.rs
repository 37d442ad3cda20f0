//! Backbone demo - main entry point.
//!
//! Composes three layers:
//! - settings: a ready value holding the greeting
//! - db: hosted behind an in-memory channel, consumed through a client
//! - http: built from db, fetches the greeting over the message protocol

use backbone_core::backbone::ServiceLayer;
use backbone_core::messaging::{
    ChannelIdentity, MemoryNetwork, RemoteServiceClient, RemoteServiceHost, ServiceDefinition,
};
use backbone_core::service::{operation, ServiceObject, ServiceRef};
use backbone_core::types::PeerId;
use backbone_core::{supervisor, Config, Error};
use clap::Parser;
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "backbone-demo", about = "Run the settings/db/http composition")]
struct Args {
    /// JSON configuration file; defaults apply when omitted.
    #[arg(long, env = "BACKBONE_CONFIG")]
    config: Option<PathBuf>,

    /// Greeting stored in the settings service.
    #[arg(long, default_value = "Test message")]
    message: String,
}

fn db_definition() -> ServiceDefinition {
    ServiceDefinition::new("db")
        .event("queried")
        .declare_message("getMessage")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::from_json_str(&std::fs::read_to_string(path)?)?,
        None => Config::default(),
    };

    // Initialize observability
    backbone_core::observability::init_tracing_with(&config.observability);

    let settings = ServiceObject::new()
        .with_value("message", json!(args.message))
        .into_ref();

    // The db process: reads the greeting it was configured with.
    let network = MemoryNetwork::new();
    let db_id = PeerId::new();
    let greeting = args.message.clone();
    let hosted = db_definition().message("getMessage", move |handle, _args| {
        let greeting = greeting.clone();
        async move {
            handle.emit("queried", json!(greeting));
            Ok(json!(greeting))
        }
    });
    let host_channel = network.serve(
        ChannelIdentity::new(db_id.clone()).with_appspace(config.messaging.appspace.clone()),
    )?;
    let _host = RemoteServiceHost::start(hosted, host_channel).await?;

    let messaging = config.messaging.clone();
    let layers = vec![
        ServiceLayer::new().ready("settings", settings),
        ServiceLayer::new().factory("db", ["settings"], move |_ctx, _deps| {
            let network = network.clone();
            let db_id = db_id.clone();
            let messaging = messaging.clone();
            async move {
                let identity =
                    ChannelIdentity::new(PeerId::new()).with_appspace(messaging.appspace.clone());
                let channel = network.connect(identity, &db_id)?;
                let client =
                    RemoteServiceClient::start(&db_definition(), channel, db_id, &messaging).await?;
                Ok(client.into_ref())
            }
        }),
        ServiceLayer::new().factory("http", ["db"], |_ctx, deps| async move {
            let db: ServiceRef = deps
                .into_iter()
                .next()
                .ok_or_else(|| Error::internal("http factory got no db"))?;
            let handler = operation(move |_args: Vec<Value>| {
                let db = db.clone();
                async move { db.invoke("getMessage", vec![]).await }
            });
            Ok(ServiceObject::new().with_operation("get", handler).into_ref())
        }),
    ];

    let backbone = supervisor::supervise(layers, &config).await?;
    backbone.on("db:queried", |payload| {
        tracing::info!(payload = %payload, "db reported a query");
    })?;

    let http = backbone
        .get("http")
        .ok_or_else(|| Error::not_found("http"))?;
    let reply = http.invoke("get", vec![]).await?;
    println!("{reply}");

    Ok(())
}
