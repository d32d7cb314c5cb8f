use std::time::Instant;

use serde_json::{json, Value};

use crate::parsers::dom_json::{self, PageOp};
use crate::services::session::Session;

mod command;
use command::Command;

fn get_cmd(req: &Value) -> &str {
    req.get("cmd").and_then(|v| v.as_str()).unwrap_or("")
}

fn get_id(req: &Value) -> Value {
    req.get("id").cloned().unwrap_or(Value::Null)
}

fn get_payload(req: &Value) -> &Value {
    static EMPTY: Value = Value::Null;
    req.get("payload").unwrap_or(&EMPTY)
}

fn ok(id: Value, payload: Value) -> String {
    json!({
        "id": id,
        "status": "ok",
        "payload": payload
    })
    .to_string()
}

fn err(id: Value, message: impl Into<String>) -> String {
    json!({
        "id": id,
        "status": "error",
        "message": message.into()
    })
    .to_string()
}

fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn parse_ops(payload: &Value) -> Result<Vec<PageOp>, String> {
    let arr = payload
        .get("ops")
        .and_then(|v| v.as_array())
        .ok_or_else(|| "payload.ops must be an array".to_string())?;

    let mut ops = Vec::with_capacity(arr.len());
    for (i, v) in arr.iter().cloned().enumerate() {
        match serde_json::from_value::<PageOp>(v) {
            Ok(op) => ops.push(op),
            Err(e) => return Err(format!("invalid op at index {i}: {e}")),
        }
    }
    Ok(ops)
}

pub fn handle(session: &mut Session, input: &str) -> String {
    let req: Value = match serde_json::from_str(input) {
        Ok(v) => v,
        Err(_) => {
            return json!({
                "status": "error",
                "message": "invalid json"
            })
            .to_string();
        }
    };

    let id = get_id(&req);
    let cmd_str = get_cmd(&req);
    let payload = get_payload(&req);
    let now = Instant::now();

    match Command::from(cmd_str) {
        Command::Ping => ok(id, json!({ "message": "overlaylex-core alive" })),

        Command::Boot => {
            let host = payload.get("host").and_then(|v| v.as_str()).unwrap_or("");
            let path = payload.get("path").and_then(|v| v.as_str()).unwrap_or("/");
            if host.is_empty() {
                return err(id, "payload.host is required");
            }
            let report = session.boot(host, path);
            ok(
                id,
                json!({
                    "report": to_json(&report),
                    "active": session.is_active(),
                    "notices": to_json(&session.take_notices()),
                }),
            )
        }

        Command::PageLoad => {
            let Some(spec) = payload.get("page") else {
                return err(id, "payload.page is required");
            };
            let page = match dom_json::parse_page(spec.clone()) {
                Ok(p) => p,
                Err(e) => return err(id, e.to_string()),
            };
            let report = session.attach_page(page, now);
            ok(
                id,
                json!({
                    "flush": to_json(&report),
                    "status": to_json(session.status()),
                }),
            )
        }

        Command::PageMutate => {
            let ops = match parse_ops(payload) {
                Ok(v) => v,
                Err(e) => return err(id, e),
            };
            let Some(page) = session.page_mut() else {
                return err(id, "no page loaded");
            };

            let mut results = Vec::with_capacity(ops.len());
            for (i, op) in ops.into_iter().enumerate() {
                match dom_json::apply_op(page, op) {
                    Ok(v) => results.push(v),
                    Err(e) => return err(id, format!("op {i} failed: {e}")),
                }
            }
            ok(id, json!({ "results": results }))
        }

        Command::PageSnapshot => match session.page() {
            Some(page) => ok(id, dom_json::snapshot(page)),
            None => err(id, "no page loaded"),
        },

        Command::Tick => {
            let report = session.tick(now);
            ok(
                id,
                json!({
                    "report": to_json(&report),
                    "notices": to_json(&session.take_notices()),
                }),
            )
        }

        Command::TranslateText => {
            let text = payload.get("text").and_then(|v| v.as_str()).unwrap_or("");
            ok(id, json!({ "text": session.translate_text(text) }))
        }

        Command::PackageList => ok(id, json!({ "packages": to_json(&session.package_views()) })),

        Command::PackageSetEnabled => {
            let package_id = payload.get("id").and_then(|v| v.as_str()).unwrap_or("");
            let Some(enabled) = payload.get("enabled").and_then(|v| v.as_bool()) else {
                return err(id, "payload.enabled must be a boolean");
            };
            if package_id.is_empty() {
                return err(id, "payload.id is required");
            }
            match session.set_enabled(package_id, enabled, now) {
                Ok(report) => ok(
                    id,
                    json!({
                        "flush": to_json(&report),
                        "packages": to_json(&session.package_views()),
                    }),
                ),
                Err(e) => err(id, e.to_string()),
            }
        }

        Command::CheckUpdates => match session.check_updates(now) {
            Ok(report) => ok(
                id,
                json!({
                    "flush": to_json(&report),
                    "packages": to_json(&session.package_views()),
                }),
            ),
            Err(e) => err(id, e.to_string()),
        },

        Command::Status => ok(
            id,
            json!({
                "active": session.is_active(),
                "status": to_json(session.status()),
                "entries": session.matcher().dictionary().len(),
            }),
        ),

        Command::Notices => ok(id, json!({ "notices": to_json(&session.take_notices()) })),

        Command::Unknown => err(id, format!("unknown command: {cmd_str}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::services::fetch::fake::FakeFetcher;
    use crate::services::fetch::Fetcher;
    use std::sync::Arc;

    fn session(dir: &tempfile::TempDir, fetcher: Arc<FakeFetcher>) -> Session {
        let cfg = EngineConfig {
            api_base_url: "https://api.test".into(),
            storage_dir: Some(dir.path().to_path_buf()),
            ..EngineConfig::default()
        };
        let fetcher: Arc<dyn Fetcher> = fetcher;
        Session::new(cfg, fetcher)
    }

    fn call(s: &mut Session, req: Value) -> Value {
        serde_json::from_str(&handle(s, &req.to_string())).unwrap()
    }

    #[test]
    fn ping_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(&dir, Arc::new(FakeFetcher::new()));

        let r = call(&mut s, json!({ "id": 1, "cmd": "ping" }));
        assert_eq!(r["status"], "ok");
        assert_eq!(r["id"], 1);

        let r = call(&mut s, json!({ "id": 2, "cmd": "nope" }));
        assert_eq!(r["status"], "error");

        let r: Value = serde_json::from_str(&handle(&mut s, "{not json")).unwrap();
        assert_eq!(r["message"], "invalid json");

        let r = call(&mut s, json!({ "id": 3, "cmd": "page.snapshot" }));
        assert_eq!(r["message"], "no page loaded");
    }

    #[test]
    fn full_session_over_the_wire() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::new());
        fetcher.respond(
            "https://api.test/domain-package.json",
            json!({
                "id": "overlaylex-domain-allowlist",
                "kind": "domain-allowlist",
                "version": "1",
                "rules": [ { "type": "exact", "value": "owlbear.rodeo" } ]
            }),
        );
        fetcher.respond(
            "https://api.test/manifest",
            json!({
                "scriptVersion": "0.2.0",
                "packages": [ { "id": "core", "version": "1", "enabledByDefault": true } ]
            }),
        );
        fetcher.respond(
            "https://api.test/packages/core.json",
            json!({ "id": "core", "version": "1", "translations": { "Map": "地图" } }),
        );
        let mut s = session(&dir, fetcher);

        let r = call(
            &mut s,
            json!({ "id": 1, "cmd": "boot", "payload": { "host": "owlbear.rodeo", "path": "/" } }),
        );
        assert_eq!(r["payload"]["active"], true, "{r}");

        let r = call(
            &mut s,
            json!({ "id": 2, "cmd": "page.load", "payload": { "page": {
                "origin": "https://owlbear.rodeo",
                "body": [ { "tag": "p", "children": [ { "text": "Map" } ] } ]
            } } }),
        );
        assert_eq!(r["payload"]["flush"]["changed"], 1);

        let r = call(&mut s, json!({ "id": 3, "cmd": "page.snapshot" }));
        assert_eq!(
            r["payload"]["documents"][0]["body"]["children"][0]["children"][0]["text"],
            "地图"
        );

        let r = call(&mut s, json!({ "id": 4, "cmd": "translate_text", "payload": { "text": "Map " } }));
        assert_eq!(r["payload"]["text"], "地图 ");

        let r = call(&mut s, json!({ "id": 5, "cmd": "package.list" }));
        assert_eq!(r["payload"]["packages"][0]["enabled"], true);

        let r = call(
            &mut s,
            json!({ "id": 6, "cmd": "package.set_enabled", "payload": { "id": "core", "enabled": false } }),
        );
        assert_eq!(r["payload"]["packages"][0]["enabled"], false);

        let r = call(&mut s, json!({ "id": 7, "cmd": "status" }));
        assert_eq!(r["payload"]["entries"], 0);
    }
}
