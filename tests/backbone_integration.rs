//! Backbone integration tests: layered startup, forward binds, and conforming
//! services through the public API only.

use backbone_core::backbone::{Backbone, Binding, ServiceLayer};
use backbone_core::interface::{InterfaceDescriptor, Kind};
use backbone_core::service::{operation, Member, Service, ServiceObject, ServiceRef};
use backbone_core::{Error, Result};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;

/// Layers `[{settings}, {db: factory(settings)}, {http: factory(db, settings)}]`.
fn web_layers() -> Vec<ServiceLayer> {
    let settings = ServiceObject::new()
        .with_value("message", json!("Test message"))
        .into_ref();

    vec![
        ServiceLayer::new().ready("settings", settings),
        ServiceLayer::new().factory("db", ["settings"], |_ctx, deps| async move {
            let message = deps[0]
                .member("message")
                .and_then(|m| match m {
                    Member::Value(v) => Some(v),
                    _ => None,
                })
                .ok_or_else(|| Error::validation("settings.message missing"))?;
            let get_message = operation(move |_args| {
                let message = message.clone();
                async move { Ok(message) }
            });
            Ok(ServiceObject::new()
                .with_operation("getMessage", get_message)
                .into_ref())
        }),
        ServiceLayer::new().factory("http", ["db", "settings"], |_ctx, deps| async move {
            let db = deps[0].clone();
            let get_message = operation(move |_args| {
                let db = db.clone();
                async move { db.invoke("getMessage", vec![]).await }
            });
            Ok(ServiceObject::new()
                .with_operation("getMessage", get_message)
                .with_service("settings", deps[1].clone())
                .into_ref())
        }),
    ]
}

#[tokio::test]
async fn test_web_scenario_reaches_settings_through_db() {
    let backbone = Backbone::start(web_layers()).await.unwrap();

    assert_eq!(backbone.names(), vec!["settings", "db", "http"]);
    let http = backbone.get("http").unwrap();
    assert_eq!(
        http.invoke("getMessage", vec![]).await.unwrap(),
        json!("Test message")
    );
}

#[tokio::test]
async fn test_later_layer_reference_names_both_services() {
    let mut layers = web_layers();
    layers.swap(1, 2);

    let err = Backbone::start(layers).await.unwrap_err();
    match err {
        Error::UnresolvedDependency {
            dependency,
            dependent,
        } => {
            assert_eq!(dependency, "db");
            assert_eq!(dependent, "http");
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// A layer-0 service whose `db` field is filled in by a forward bind.
#[derive(Debug, Default)]
struct Api {
    db: Mutex<Option<ServiceRef>>,
}

impl Service for Api {
    fn member(&self, name: &str) -> Option<Member> {
        match name {
            "db" => self.db.lock().clone().map(Member::Service),
            _ => None,
        }
    }
}

#[tokio::test]
async fn test_forward_dependency_populated_after_start() {
    let layers = vec![
        ServiceLayer::new().factory("api", Vec::<String>::new(), |ctx, _deps| async move {
            let api = Arc::new(Api::default());
            assert!(!ctx.backbone().contains("db"));

            let target = api.clone();
            ctx.backbone().on_service_bind(
                "db",
                move |binding: &Binding| {
                    *target.db.lock() = Some(binding.service.clone());
                },
                true,
            );
            let service: ServiceRef = api;
            Ok(service)
        }),
        ServiceLayer::new().ready(
            "db",
            ServiceObject::new().with_value("kind", json!("sql")).into_ref(),
        ),
    ];

    let backbone = Backbone::start(layers).await.unwrap();
    let api = backbone.get_as::<Api>("api").unwrap();
    let db = api.db.lock().clone().expect("db populated by forward bind");
    assert!(matches!(db.member("kind"), Some(Member::Value(v)) if v == "sql"));
}

#[tokio::test]
async fn test_conforming_services_now_and_later() -> Result<()> {
    let storage_shape = InterfaceDescriptor::shape()
        .expect("read", Kind::Function)
        .expect("write", Kind::Function);
    let store = || {
        let noop = operation(|_args: Vec<Value>| async { Ok(Value::Null) });
        ServiceObject::new()
            .with_operation("read", noop.clone())
            .with_operation("write", noop)
            .into_ref()
    };

    let backbone = Backbone::start(vec![ServiceLayer::new()
        .ready("disk", store())
        .ready("config", ServiceObject::new().into_ref())])
    .await?;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    backbone.on_conforming_service_bind(storage_shape.clone(), move |b: &Binding| {
        sink.lock().push(b.name.clone());
    })?;
    assert_eq!(*seen.lock(), vec!["disk"]);

    backbone
        .load(vec![ServiceLayer::new()
            .ready("s3", store())
            .ready("metrics", ServiceObject::new().into_ref())])
        .await?;

    assert_eq!(*seen.lock(), vec!["disk", "s3"]);
    assert_eq!(
        backbone.list_conforming_services(storage_shape)?,
        vec!["disk", "s3"]
    );
    Ok(())
}

#[tokio::test]
async fn test_scoped_event_registered_before_scope_is_bound() {
    let emitter = Arc::new(ServiceObject::new().with_events());
    let events = emitter.clone();

    let heard = Arc::new(Mutex::new(Vec::new()));
    let sink = heard.clone();

    let layers = vec![
        ServiceLayer::new().factory("audit", Vec::<String>::new(), move |ctx, _deps| {
            let sink = sink.clone();
            async move {
                ctx.backbone().on("db:saved", move |v| sink.lock().push(v.clone()))?;
                Ok(ServiceObject::new().into_ref())
            }
        }),
        ServiceLayer::new().factory("db", Vec::<String>::new(), move |_ctx, _deps| {
            let service: ServiceRef = events.clone();
            async move { Ok(service) }
        }),
    ];

    let _backbone = Backbone::start(layers).await.unwrap();
    emitter.emit("saved", &json!({"row": 1}));
    assert_eq!(*heard.lock(), vec![json!({"row": 1})]);
}
